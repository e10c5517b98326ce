use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use campus_chat::writer::ATTACHMENTS_BUCKET;
use campus_chat::{Backend, ChatClient, ChatError, SendMessage, Session, UploadFile};
use campus_db::{Database, now_timestamp};
use campus_realtime::ChangeFeed;
use campus_storage::ObjectStore;
use campus_types::models::{MessageType, ParticipantRole};

struct Harness {
    _dir: TempDir,
    backend: Arc<Backend>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_max_upload(campus_storage::MAX_OBJECT_SIZE).await
    }

    async fn with_max_upload(max: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = ObjectStore::new(dir.path().join("storage"), "http://localhost:3000")
            .await
            .unwrap()
            .with_max_object_size(max);
        let backend = Backend::new(Database::open_in_memory().unwrap(), storage, ChangeFeed::new());
        Self {
            _dir: dir,
            backend: Arc::new(backend),
        }
    }

    /// Register a profile and return a client signed in as it.
    fn user(&self, username: &str, display_name: &str) -> ChatClient {
        let id = Uuid::new_v4();
        self.backend
            .db()
            .create_profile(&id.to_string(), username, display_name, "hash", &now_timestamp())
            .unwrap();
        ChatClient::new(self.backend.clone(), Session::authenticated(id, username))
    }

    /// A signed-in session whose profile was never created.
    fn ghost(&self) -> ChatClient {
        ChatClient::new(self.backend.clone(), Session::authenticated(Uuid::new_v4(), "ghost"))
    }

    fn anonymous(&self) -> ChatClient {
        ChatClient::new(self.backend.clone(), Session::anonymous())
    }

    fn room_count(&self) -> i64 {
        self.backend
            .db()
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get::<_, i64>(0))?))
            .unwrap()
    }

    fn stored_files(&self, owner: Uuid) -> usize {
        let dir = self.backend.storage().root().join(ATTACHMENTS_BUCKET).join(owner.to_string());
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn id_of(client: &ChatClient) -> Uuid {
    client.session().current_user().unwrap().id
}

fn png(name: &str) -> UploadFile {
    UploadFile {
        name: name.into(),
        content_type: "image/png".into(),
        data: Bytes::from_static(b"\x89PNG fake image"),
    }
}

fn pdf(name: &str) -> UploadFile {
    UploadFile {
        name: name.into(),
        content_type: "application/pdf".into(),
        data: Bytes::from_static(b"%PDF-1.4 fake"),
    }
}

// -- Room Resolver --

#[tokio::test]
async fn direct_message_resolves_same_room_from_both_sides() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada Lovelace");
    let alan = h.user("alan", "Alan Turing");

    let from_ada = ada.find_or_create_direct_message(id_of(&alan)).await.unwrap();
    let from_alan = alan.find_or_create_direct_message(id_of(&ada)).await.unwrap();
    let again = ada.find_or_create_direct_message(id_of(&alan)).await.unwrap();

    assert_eq!(from_ada.id, from_alan.id);
    assert_eq!(from_ada.id, again.id);
    assert_eq!(from_ada.name, "Alan Turing");
    assert!(from_ada.is_private);
    assert_eq!(h.backend.db().participant_count(&from_ada.id.to_string()).unwrap(), 2);
    assert_eq!(h.room_count(), 1);

    let member = h
        .backend
        .db()
        .get_participant(&from_ada.id.to_string(), &id_of(&ada).to_string())
        .unwrap()
        .unwrap()
        .into_model()
        .unwrap();
    assert_eq!(member.role, ParticipantRole::Member);
}

#[tokio::test]
async fn shared_group_room_is_not_a_direct_message() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let alan = h.user("alan", "Alan");
    let grace = h.user("grace", "Grace");

    let group = ada.create_group_room("Algorithms Study", None, None).await.unwrap();
    assert!(alan.join_room(group.id).await.unwrap());
    assert!(grace.join_room(group.id).await.unwrap());

    let dm = ada.find_or_create_direct_message(id_of(&alan)).await.unwrap();
    assert_ne!(dm.id, group.id);
    assert_eq!(h.backend.db().participant_count(&dm.id.to_string()).unwrap(), 2);
}

#[tokio::test]
async fn direct_message_with_self_is_rejected() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");

    let err = ada.find_or_create_direct_message(id_of(&ada)).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
}

#[tokio::test]
async fn direct_message_with_unknown_user_leaves_no_room() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");

    assert!(ada.find_or_create_direct_message(Uuid::new_v4()).await.is_err());
    assert_eq!(h.room_count(), 0);
}

#[tokio::test]
async fn group_room_makes_creator_admin() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");

    let room = ada
        .create_group_room("  Algorithms Study ", Some("Weekly problem sets"), Some(true))
        .await
        .unwrap();
    assert_eq!(room.name, "Algorithms Study");
    assert_eq!(room.description.as_deref(), Some("Weekly problem sets"));
    assert!(room.is_private);
    assert_eq!(room.created_by, id_of(&ada));

    let admin = h
        .backend
        .db()
        .get_participant(&room.id.to_string(), &id_of(&ada).to_string())
        .unwrap()
        .unwrap()
        .into_model()
        .unwrap();
    assert_eq!(admin.role, ParticipantRole::Admin);
}

#[tokio::test]
async fn failed_admin_insert_leaves_no_room() {
    let h = Harness::new().await;
    // The session is valid but has no profile, so the participant row
    // violates its foreign key after the room row was written.
    let ghost = h.ghost();

    let err = ghost.create_group_room("Orphans", None, None).await.unwrap_err();
    assert!(matches!(err, ChatError::Store(_)));
    assert_eq!(h.room_count(), 0);
}

#[tokio::test]
async fn private_rooms_cannot_be_joined() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let alan = h.user("alan", "Alan");

    let room = ada.create_group_room("Secret", None, Some(true)).await.unwrap();
    let err = alan.join_room(room.id).await.unwrap_err();
    assert!(err.is_access_denied());

    let open = ada.create_group_room("Open", None, None).await.unwrap();
    assert!(alan.join_room(open.id).await.unwrap());
    assert!(!alan.join_room(open.id).await.unwrap());
}

#[tokio::test]
async fn anonymous_session_is_rejected() {
    let h = Harness::new().await;
    let anon = h.anonymous();

    assert!(matches!(
        anon.create_group_room("x", None, None).await,
        Err(ChatError::NotAuthenticated)
    ));
    assert!(matches!(anon.list_user_rooms().await, Err(ChatError::NotAuthenticated)));
    assert!(matches!(
        anon.send_message(SendMessage::text(Uuid::new_v4(), "hi")).await,
        Err(ChatError::NotAuthenticated)
    ));
}

// -- Message Writer --

#[tokio::test]
async fn text_message_has_no_attachments() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let sent = ada.send_message(SendMessage::text(room.id, "hello")).await.unwrap();
    assert_eq!(sent.message_type, MessageType::Text);
    assert!(sent.attachments.is_none());

    let stored = ada.fetch_messages(room.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message.id, sent.id);
    assert!(stored[0].message.attachments.is_none());
    assert_eq!(stored[0].message.created_at, sent.created_at);
}

#[tokio::test]
async fn image_message_uploads_attachment() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let mut req = SendMessage::text(room.id, "");
    req.image_file = Some(png("whiteboard.png"));
    let sent = ada.send_message(req).await.unwrap();

    assert_eq!(sent.message_type, MessageType::Image);
    let attachments = sent.attachments.as_ref().unwrap();
    assert_eq!(attachments.len(), 1);
    assert!(attachments[0].mime_type.starts_with("image/"));
    assert_eq!(attachments[0].name, "whiteboard.png");
    assert_eq!(attachments[0].size, 15);
    assert!(attachments[0].url.starts_with(&format!(
        "http://localhost:3000/storage/{}/{}/",
        ATTACHMENTS_BUCKET,
        id_of(&ada)
    )));
    assert!(attachments[0].url.ends_with(".png"));
    assert_eq!(h.stored_files(id_of(&ada)), 1);

    let stored = ada.fetch_messages(room.id).await.unwrap();
    assert_eq!(stored[0].message.attachments.as_ref(), Some(attachments));
}

#[tokio::test]
async fn document_type_wins_over_image() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let mut req = SendMessage::text(room.id, "notes and photo");
    req.image_file = Some(png("board.png"));
    req.document_file = Some(pdf("notes.pdf"));
    let sent = ada.send_message(req).await.unwrap();

    assert_eq!(sent.message_type, MessageType::File);
    assert_eq!(sent.attachments.unwrap().len(), 2);
}

#[tokio::test]
async fn image_slot_requires_image_type() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let mut req = SendMessage::text(room.id, "");
    req.image_file = Some(pdf("not-an-image.pdf"));
    let err = ada.send_message(req).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(h.stored_files(id_of(&ada)), 0);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let err = ada.send_message(SendMessage::text(room.id, "   ")).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
}

#[tokio::test]
async fn failed_upload_aborts_send() {
    let h = Harness::with_max_upload(16).await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let mut req = SendMessage::text(room.id, "slides");
    req.image_file = Some(png("small.png"));
    req.document_file = Some(UploadFile {
        name: "huge.pdf".into(),
        content_type: "application/pdf".into(),
        data: Bytes::from(vec![0u8; 64]),
    });

    let err = ada.send_message(req).await.unwrap_err();
    assert!(matches!(err, ChatError::Upload(_)));
    assert!(ada.fetch_messages(room.id).await.unwrap().is_empty());
    // the image that did upload is cleaned up too
    assert_eq!(h.stored_files(id_of(&ada)), 0);
}

#[tokio::test]
async fn failed_insert_removes_uploaded_files() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let alan = h.user("alan", "Alan");
    let room = ada.create_group_room("Study", None, Some(true)).await.unwrap();

    let mut req = SendMessage::text(room.id, "let me in");
    req.image_file = Some(png("knock.png"));
    let err = alan.send_message(req).await.unwrap_err();

    assert!(err.is_access_denied());
    assert_eq!(h.stored_files(id_of(&alan)), 0);
}

#[tokio::test]
async fn reply_references_earlier_message() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let first = ada.send_message(SendMessage::text(room.id, "question?")).await.unwrap();
    let mut req = SendMessage::text(room.id, "answer");
    req.reply_to = Some(first.id);
    let reply = ada.send_message(req).await.unwrap();

    assert_eq!(reply.reply_to, Some(first.id));
    let stored = ada.fetch_messages(room.id).await.unwrap();
    assert_eq!(stored[1].message.reply_to, Some(first.id));
}

#[tokio::test]
async fn reply_to_unknown_or_foreign_message_is_invalid() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let study = ada.create_group_room("Study", None, None).await.unwrap();
    let lounge = ada.create_group_room("Lounge", None, None).await.unwrap();
    let elsewhere = ada.send_message(SendMessage::text(lounge.id, "hi")).await.unwrap();

    let mut req = SendMessage::text(study.id, "replying to nothing");
    req.reply_to = Some(Uuid::new_v4());
    let err = ada.send_message(req).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)), "{:?}", err);

    let mut req = SendMessage::text(study.id, "replying across rooms");
    req.reply_to = Some(elsewhere.id);
    req.image_file = Some(png("context.png"));
    let err = ada.send_message(req).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)), "{:?}", err);
    assert_eq!(h.stored_files(id_of(&ada)), 0);

    assert!(ada.fetch_messages(study.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_sender_can_delete() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let alan = h.user("alan", "Alan");
    let room = ada.create_group_room("Study", None, None).await.unwrap();
    alan.join_room(room.id).await.unwrap();

    let msg = ada.send_message(SendMessage::text(room.id, "oops")).await.unwrap();

    assert!(alan.delete_message(msg.id).await.unwrap_err().is_access_denied());
    assert!(ada.delete_message(msg.id).await.unwrap());
    assert!(!ada.delete_message(msg.id).await.unwrap());
    assert!(ada.fetch_messages(room.id).await.unwrap().is_empty());
}

// -- Message Reader --

#[tokio::test]
async fn unread_counts_exclude_own_messages() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let alan = h.user("alan", "Alan");
    let room = ada.create_group_room("Study", None, None).await.unwrap();
    alan.join_room(room.id).await.unwrap();

    h.backend
        .db()
        .set_last_read(
            &room.id.to_string(),
            &id_of(&ada).to_string(),
            "2000-01-01T00:00:00.000000Z",
        )
        .unwrap();

    for text in ["one", "two", "three"] {
        alan.send_message(SendMessage::text(room.id, text)).await.unwrap();
    }

    let ada_rooms = ada.list_user_rooms().await.unwrap();
    assert_eq!(ada_rooms.len(), 1);
    assert_eq!(ada_rooms[0].unread_count, 3);
    assert_eq!(ada_rooms[0].participants.len(), 2);
    assert_eq!(ada_rooms[0].last_message.as_ref().unwrap().text, "three");

    let alan_rooms = alan.list_user_rooms().await.unwrap();
    assert_eq!(alan_rooms[0].unread_count, 0);

    assert!(ada.mark_room_read(room.id).await.unwrap());
    assert_eq!(ada.list_user_rooms().await.unwrap()[0].unread_count, 0);
}

#[tokio::test]
async fn room_list_previews_attachments() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let photos = ada.create_group_room("Photos", None, None).await.unwrap();
    let docs = ada.create_group_room("Docs", None, None).await.unwrap();
    ada.create_group_room("Empty", None, None).await.unwrap();

    let mut req = SendMessage::text(photos.id, "look");
    req.image_file = Some(png("cat.png"));
    ada.send_message(req).await.unwrap();

    let mut req = SendMessage::text(docs.id, "read");
    req.document_file = Some(pdf("paper.pdf"));
    ada.send_message(req).await.unwrap();

    let rooms = ada.list_user_rooms().await.unwrap();
    assert_eq!(rooms.len(), 3);

    let preview = |id: Uuid| {
        rooms
            .iter()
            .find(|r| r.room.id == id)
            .and_then(|r| r.last_message.as_ref())
            .map(|m| m.text.clone())
    };
    assert_eq!(preview(photos.id).as_deref(), Some("📷 Photo"));
    assert_eq!(preview(docs.id).as_deref(), Some("📎 File"));
    // most recently active room first
    assert_eq!(rooms[0].room.id, docs.id);
}

#[tokio::test]
async fn history_is_oldest_first_with_senders() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada Lovelace");
    let alan = h.user("alan", "Alan Turing");
    let room = ada.find_or_create_direct_message(id_of(&alan)).await.unwrap();

    ada.send_message(SendMessage::text(room.id, "first")).await.unwrap();
    alan.send_message(SendMessage::text(room.id, "second")).await.unwrap();

    let history = alan.fetch_messages(room.id).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, ["first", "second"]);
    assert_eq!(history[0].sender.display_name, "Ada Lovelace");
    assert_eq!(history[0].sender.username, "ada");
    assert_eq!(history[1].sender.username, "alan");
}

#[tokio::test]
async fn history_access_follows_store_policy() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let bob = h.user("bob", "Bob");
    let room = ada.create_group_room("Algorithms Study", None, None).await.unwrap();
    ada.send_message(SendMessage::text(room.id, "welcome")).await.unwrap();

    let err = bob.fetch_messages(room.id).await.unwrap_err();
    assert!(err.is_access_denied());
    assert!(!bob.mark_room_read(room.id).await.unwrap());

    bob.join_room(room.id).await.unwrap();
    assert_eq!(bob.fetch_messages(room.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn blank_search_skips_the_store() {
    let h = Harness::new().await;
    // No session at all: a blank query must return before authentication.
    let anon = h.anonymous();
    assert!(anon.search_users("").await.unwrap().is_empty());
    assert!(anon.search_users("   ").await.unwrap().is_empty());
    assert!(matches!(anon.search_users("ada").await, Err(ChatError::NotAuthenticated)));
}

#[tokio::test]
async fn search_matches_names_and_excludes_self() {
    let h = Harness::new().await;
    let grace = h.user("grace", "Grace Hopper");
    h.user("ghopper", "G. Hopper");
    h.user("ada", "Ada Lovelace");
    for i in 0..12 {
        h.user(&format!("hopper{}", i), &format!("Hopper Fan {}", i));
    }

    let found = grace.search_users("LOVE").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].username, "ada");

    let found = grace.search_users("grace").await.unwrap();
    assert!(found.is_empty());

    let found = grace.search_users("hopper").await.unwrap();
    assert_eq!(found.len(), campus_chat::reader::SEARCH_LIMIT as usize);
    assert!(found.iter().all(|p| p.id != id_of(&grace)));
}

#[tokio::test]
async fn search_ignores_case_in_non_ascii_names() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada Lovelace");
    h.user("ezola", "Émile Zola");

    for query in ["Émile", "émile", "ÉMILE"] {
        let found = ada.search_users(query).await.unwrap();
        assert_eq!(found.len(), 1, "query {:?}", query);
        assert_eq!(found[0].display_name, "Émile Zola");
    }
}

// -- Realtime Notifier --

#[tokio::test]
async fn subscriber_receives_hydrated_inserts_only() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada Lovelace");
    let alan = h.user("alan", "Alan Turing");
    let room = ada.find_or_create_direct_message(id_of(&alan)).await.unwrap();
    let other = ada.create_group_room("Elsewhere", None, None).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = ada
        .subscribe_to_room_messages(room.id, move |m| {
            let _ = tx.send(m);
        })
        .await
        .unwrap();
    assert_eq!(sub.room_id(), room.id);
    assert_eq!(h.backend.feed().active_channels(), 1);

    ada.send_message(SendMessage::text(other.id, "not here")).await.unwrap();
    let first = alan.send_message(SendMessage::text(room.id, "ping")).await.unwrap();
    alan.delete_message(first.id).await.unwrap();
    let own = ada.send_message(SendMessage::text(room.id, "pong")).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(got.message.id, first.id);
    assert_eq!(got.sender.display_name, "Alan Turing");

    // the sender's own messages come back too; the delete was skipped
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(got.message.id, own.id);
    assert_eq!(got.sender.username, "ada");

    sub.unsubscribe().await;
    assert_eq!(h.backend.feed().active_channels(), 0);
}

#[tokio::test]
async fn dropping_subscription_closes_channel() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let room = ada.create_group_room("Study", None, None).await.unwrap();

    let sub = ada.subscribe_to_room_messages(room.id, |_| {}).await.unwrap();
    assert_eq!(h.backend.feed().active_channels(), 1);
    drop(sub);

    for _ in 0..100 {
        if h.backend.feed().active_channels() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.backend.feed().active_channels(), 0);
}

#[tokio::test]
async fn non_participant_cannot_subscribe() {
    let h = Harness::new().await;
    let ada = h.user("ada", "Ada");
    let bob = h.user("bob", "Bob");
    let room = ada.create_group_room("Study", None, Some(true)).await.unwrap();

    let err = bob.subscribe_to_room_messages(room.id, |_| {}).await.unwrap_err();
    assert!(err.is_access_denied());
    assert_eq!(h.backend.feed().active_channels(), 0);
}
