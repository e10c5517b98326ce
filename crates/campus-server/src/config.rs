use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration, read from `CAMPUS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        Ok(Self {
            jwt_secret: var("CAMPUS_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("CAMPUS_DB_PATH", "campus.db")),
            storage_dir: PathBuf::from(var("CAMPUS_STORAGE_DIR", "./storage")),
            public_url: var("CAMPUS_PUBLIC_URL", "http://localhost:3000"),
            host: var("CAMPUS_HOST", "0.0.0.0"),
            port: var("CAMPUS_PORT", "3000").parse()?,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
