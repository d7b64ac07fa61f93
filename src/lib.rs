pub mod client;
pub mod config;
pub mod downloader;
pub mod format;
pub mod gate;
pub mod models;

/// Convenient re-exports of the common types.
pub mod prelude {
    pub use crate::client::{ClientError, SplunkClient};
    pub use crate::config::{AuthConfig, ClientConfig, DownloadConfig};
    pub use crate::downloader::{DownloadError, Downloader, DownloadPlan, PAGE_SIZE};
    pub use crate::gate::RESULT_LIMIT;
    pub use crate::models::{JobStatus, OutputFormat, Page};
}
