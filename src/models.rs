use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format for downloaded results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Upstream payload passed through untouched.
    Raw,
    /// Comma-separated values; the upstream repeats the header on every
    /// page, so only page 0 keeps it.
    Csv,
    /// One compact JSON object per result line, re-serialized from the
    /// service's JSON results envelope.
    Ndjson,
}

impl OutputFormat {
    /// The `output_mode` value sent to the service. The line-delimited
    /// format requests the JSON envelope and re-serializes locally.
    pub fn wire_value(&self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Csv => "csv",
            OutputFormat::Ndjson => "json",
        }
    }

    /// Infer the format from an output filename extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "txt" => Some(OutputFormat::Raw),
            "csv" => Some(OutputFormat::Csv),
            "ndjson" | "json" => Some(OutputFormat::Ndjson),
            _ => None,
        }
    }
}

/// Status snapshot of a search job, read once before a download starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub is_failed: bool,
    #[serde(default)]
    pub dispatch_state: String,
    #[serde(default)]
    pub done_progress: f64,
    #[serde(default)]
    pub event_count: u64,
    #[serde(default)]
    pub run_duration: f64,
}

/// One entry of the job status response.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEntry {
    #[serde(default)]
    pub name: String,
    pub content: JobStatus,
}

/// Envelope returned by the job status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default)]
    pub entry: Vec<JobEntry>,
}

/// Envelope returned when a new search job is created.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSearchJob {
    pub sid: String,
}

/// Envelope returned by the results endpoint in JSON mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPage {
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub init_offset: i64,
    #[serde(default)]
    pub results: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// One fetched and decoded slice of the result set. Created by a worker,
/// consumed exactly once by the collector.
#[derive(Debug, Clone)]
pub struct Page {
    /// Zero-based ordinal of this fixed-size slice.
    pub index: u64,
    pub payload: String,
}
