use anyhow::{Result, bail};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 50 MB upload limit for objects
pub const MAX_OBJECT_SIZE: usize = 50 * 1024 * 1024;

const SUFFIX_LEN: usize = 8;

/// Bucketed object storage on local disk.
///
/// Each object lives at `{root}/{bucket}/{key}`, where `key` may contain
/// `/`-separated segments (used to namespace objects by owner). Objects are
/// public: anyone holding the URL from `public_url` can fetch them, the
/// server mounts `root` under `/storage`.
pub struct ObjectStore {
    root: PathBuf,
    public_base_url: String,
    max_object_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

impl ObjectStore {
    pub async fn new(root: PathBuf, public_base_url: &str) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Object storage directory: {}", root.display());
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_object_size: MAX_OBJECT_SIZE,
        })
    }

    pub fn with_max_object_size(mut self, max: usize) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the object on disk. Rejects names that could escape the
    /// bucket directory.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    /// Store a new object. Existing objects are never overwritten.
    pub async fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<StoredObject> {
        if data.is_empty() {
            bail!("Refusing to store empty object {}/{}", bucket, key);
        }
        if data.len() > self.max_object_size {
            bail!(
                "Object {}/{} is {} bytes, limit is {}",
                bucket,
                key,
                data.len(),
                self.max_object_size
            );
        }

        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!("Stored {}/{} ({} bytes)", bucket, key, data.len());
        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
        })
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/{}/{}", self.public_base_url, bucket, key)
    }

    pub async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        Ok(fs::read(&path).await?)
    }

    /// Delete an object. Removing something that is already gone succeeds.
    pub async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted object {}/{}", bucket, key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {}/{} already gone", bucket, key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A collision-resistant object name: upload time in milliseconds, a random
/// suffix, and the original file's extension.
pub fn unique_object_name(original_name: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    let stamp = chrono::Utc::now().timestamp_millis();

    match extension_of(original_name) {
        Some(ext) => format!("{}-{}.{}", stamp, suffix, ext),
        None => format!("{}-{}", stamp, suffix),
    }
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let valid = !ext.is_empty() && ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

fn validate_bucket(bucket: &str) -> Result<()> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        bail!("Invalid bucket name '{}'", bucket);
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && !key.contains('\0')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !valid {
        bail!("Invalid object key '{}'", key);
    }
    Ok(())
}
