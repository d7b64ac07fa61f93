use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::OutputFormat;

/// How to authenticate against the search service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthConfig {
    /// Bearer token authentication.
    Token(String),
    /// HTTP basic authentication.
    Basic { username: String, password: String },
}

/// Connection settings for the search service REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub auth: AuthConfig,
    pub use_tls: bool,
    /// Ignored when `use_tls` is false.
    pub verify_tls: bool,
}

impl ClientConfig {
    /// The scheme://host:port prefix every request path is appended to.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Options for downloading the results of one completed search job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// The sid of the job to download results from.
    pub sid: String,
    pub format: OutputFormat,
    /// Maximum concurrent result fetches.
    pub max_connections: usize,
    /// Delete the job from the server once the download succeeds.
    pub delete_when_done: bool,
    /// Where the reassembled results are written.
    pub filename: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            sid: String::new(),
            format: OutputFormat::Raw,
            max_connections: 8,
            delete_when_done: false,
            filename: PathBuf::new(),
        }
    }
}
