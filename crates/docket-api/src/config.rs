//! Server configuration read from the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use docket_core::{defaults, Error, Result};

/// Storage behind the queue and the document table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// PostgreSQL via `DATABASE_URL`.
    Postgres,
    /// In-process stores. State is lost on restart.
    Memory,
}

impl fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueBackend::Postgres => f.write_str("postgres"),
            QueueBackend::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for QueueBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(QueueBackend::Postgres),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(Error::Config(format!(
                "QUEUE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub backend: QueueBackend,
    pub storage_root: PathBuf,
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: defaults::SERVER_HOST.to_string(),
            port: defaults::SERVER_PORT,
            database_url: None,
            backend: QueueBackend::Memory,
            storage_root: PathBuf::from(defaults::STORAGE_ROOT),
            max_body_size: defaults::MAX_BODY_SIZE_BYTES,
        }
    }
}

impl ApiConfig {
    /// Read `HOST`, `PORT`, `DATABASE_URL`, `QUEUE_BACKEND`, `STORAGE_ROOT`
    /// and `MAX_BODY_SIZE_BYTES`.
    ///
    /// `QUEUE_BACKEND` defaults to `postgres` when `DATABASE_URL` is set and
    /// to `memory` otherwise.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("HOST").unwrap_or_else(|| defaults::SERVER_HOST.to_string());
        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got '{}'", raw)))?,
            None => defaults::SERVER_PORT,
        };
        let database_url = get("DATABASE_URL").filter(|u| !u.trim().is_empty());
        let backend = match get("QUEUE_BACKEND") {
            Some(raw) => raw.parse()?,
            None if database_url.is_some() => QueueBackend::Postgres,
            None => QueueBackend::Memory,
        };
        if backend == QueueBackend::Postgres && database_url.is_none() {
            return Err(Error::Config(
                "QUEUE_BACKEND=postgres requires DATABASE_URL".to_string(),
            ));
        }
        let storage_root = get("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::STORAGE_ROOT));
        let max_body_size = get("MAX_BODY_SIZE_BYTES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults::MAX_BODY_SIZE_BYTES);

        Ok(Self {
            host,
            port,
            database_url,
            backend,
            storage_root,
            max_body_size,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
