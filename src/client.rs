use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::{AuthConfig, ClientConfig};
use crate::format;
use crate::models::{JobStatus, JobStatusResponse, NewSearchJob, OutputFormat};

/// How long a polled job may run before the server reaps it.
const JOB_TTL_SECS: &str = "3600";

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Errors from the search service transport.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Http { status: StatusCode, url: String },
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no job found for sid {0}")]
    MissingJob(String),
}

/// Authenticated client for the search service REST API.
#[derive(Debug, Clone)]
pub struct SplunkClient {
    http: Client,
    base_url: String,
    auth: AuthConfig,
}

impl SplunkClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.use_tls && !config.verify_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            auth: config.auth,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthConfig::Token(token) => request.bearer_auth(token),
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ClientError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let url = response.url().to_string();
        debug!(%status, %url, "response received");

        if !status.is_success() {
            return Err(ClientError::Http { status, url });
        }
        Ok(response.text().await?)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        self.send(self.http.get(url).query(query)).await
    }

    /// Retrieve the status snapshot of a search job.
    pub async fn job_status(&self, sid: &str) -> Result<JobStatus, ClientError> {
        let path = format!("/services/search/v2/jobs/{sid}");
        let body = self
            .get(&path, &[("output_mode", "json".to_string())])
            .await?;

        let parsed: JobStatusResponse = serde_json::from_str(&body)?;
        parsed
            .entry
            .into_iter()
            .next()
            .map(|entry| entry.content)
            .ok_or_else(|| ClientError::MissingJob(sid.to_string()))
    }

    /// Fetch one page of results and decode it for the requested format.
    ///
    /// `index` addresses a fixed-size slice of the result set; the service
    /// speaks count/offset pagination, so the offset sent upstream is
    /// `index * page_size`.
    pub async fn fetch_page(
        &self,
        sid: &str,
        page_size: u64,
        index: u64,
        format: OutputFormat,
    ) -> Result<String, ClientError> {
        let path = format!("/services/search/v2/jobs/{sid}/results");
        let query = [
            ("count", page_size.to_string()),
            ("offset", (index * page_size).to_string()),
            ("output_mode", format.wire_value().to_string()),
        ];

        let body = self.get(&path, &query).await?;
        let decoded = format::decode_page(body, format, index)?;
        debug!(sid, index, decoded_len = decoded.len(), "page fetched");
        Ok(decoded)
    }

    /// Submit a new search job and return its sid.
    pub async fn create_search_job(
        &self,
        query: &str,
        earliest: &str,
        latest: &str,
    ) -> Result<String, ClientError> {
        // A query that is not a generating command must start with the
        // `search` keyword; add it when the caller left it off.
        let trimmed = query.trim_start();
        let query = if trimmed.starts_with('|') || trimmed.starts_with("search ") {
            query.to_string()
        } else {
            format!("search {query}")
        };
        debug!(%query, earliest, latest, "creating search job");

        let url = format!("{}/services/search/jobs", self.base_url);
        let form = [
            ("search", query.as_str()),
            ("earliest_time", earliest),
            ("latest_time", latest),
            ("rf", "*"),
            ("timeout", JOB_TTL_SECS),
        ];
        let body = self
            .send(
                self.http
                    .post(url)
                    .query(&[("output_mode", "json")])
                    .form(&form),
            )
            .await?;

        let job: NewSearchJob = serde_json::from_str(&body)?;
        debug!(sid = %job.sid, "search job created");
        Ok(job.sid)
    }

    /// Poll the job until the server reports it done. Returns the final
    /// status snapshot.
    pub async fn wait_until_done(&self, sid: &str) -> Result<JobStatus, ClientError> {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;
            let status = self.job_status(sid).await?;
            debug!(
                sid,
                is_done = status.is_done,
                dispatch_state = %status.dispatch_state,
                done_progress = status.done_progress,
                "job status check"
            );
            if status.is_done {
                return Ok(status);
            }
        }
    }

    /// Remove a finished job from the server.
    pub async fn delete_job(&self, sid: &str) -> Result<(), ClientError> {
        let path = format!("/services/search/v2/jobs/{sid}");
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "DELETE");
        self.send(
            self.http
                .delete(url)
                .query(&[("output_mode", "json".to_string())]),
        )
        .await?;
        Ok(())
    }
}
