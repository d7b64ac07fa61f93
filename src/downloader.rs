use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::{ClientError, SplunkClient};
use crate::config::DownloadConfig;
use crate::gate::{self, RESULT_LIMIT};
use crate::models::{OutputFormat, Page};

/// Number of records requested per page fetch.
pub const PAGE_SIZE: u64 = 10_000;

/// Capacity of the index and page channels.
const CHANNEL_CAPACITY: usize = 100;

/// Errors from a download attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("job {sid} is not complete (state: {state}, progress: {progress:.1}%)")]
    NotComplete {
        sid: String,
        state: String,
        /// Already scaled to the 0..100 range.
        progress: f64,
    },
    #[error("job {sid} has failed")]
    JobFailed { sid: String },
    #[error(
        "job {sid} has {count} results, more than {}. Split your search into multiple jobs.",
        RESULT_LIMIT
    )]
    ResultLimitExceeded { sid: String, count: u64 },
    #[error("client error: {0}")]
    Client(#[from] ClientError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reassembly incomplete: {total_pages} pages expected, pages {missing:?} never arrived")]
    ReassemblyIncomplete { missing: Vec<u64>, total_pages: u64 },
    #[error("download cancelled")]
    Cancelled,
    #[error("task failed: {0}")]
    Join(#[from] JoinError),
}

/// Immutable description of one download, derived once from the job status.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub sid: String,
    pub page_size: u64,
    pub total_pages: u64,
    pub concurrency: usize,
    pub format: OutputFormat,
    pub delete_when_done: bool,
}

impl DownloadPlan {
    fn new(config: &DownloadConfig, result_count: u64) -> Self {
        Self {
            sid: config.sid.clone(),
            page_size: PAGE_SIZE,
            // Integer division plus one: never zero pages, and an exact
            // multiple of the page size yields one trailing empty page.
            total_pages: result_count / PAGE_SIZE + 1,
            concurrency: config.max_connections.max(1),
            format: config.format,
            delete_when_done: config.delete_when_done,
        }
    }
}

/// What the collector saw by the time the page stream closed.
#[derive(Debug, PartialEq, Eq)]
struct ReassemblyReport {
    pages_written: u64,
    /// First index that was never written. Equals the page count on a
    /// complete download.
    next_index: u64,
    /// Indices still parked in the holding buffer at shutdown: pages that
    /// arrived but could not be written because of a gap below them.
    buffered: Vec<u64>,
}

/// Downloads the full result set of one completed search job, fetching
/// pages concurrently and writing them out in index order.
pub struct Downloader {
    client: SplunkClient,
    config: DownloadConfig,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(client: SplunkClient, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts the run when cancelled: pending fetches are
    /// dropped, queued work is discarded and `run` returns `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download all results of the configured job into the output file.
    pub async fn run(&self) -> Result<(), DownloadError> {
        debug!(
            sid = %self.config.sid,
            format = ?self.config.format,
            max_connections = self.config.max_connections,
            "starting download"
        );

        let status = self.client.job_status(&self.config.sid).await?;
        info!(
            sid = %self.config.sid,
            result_count = status.result_count,
            dispatch_state = %status.dispatch_state,
            is_done = status.is_done,
            is_failed = status.is_failed,
            "job status retrieved"
        );

        gate::check_ready(&status)?;

        let plan = DownloadPlan::new(&self.config, status.result_count);
        info!(
            total_pages = plan.total_pages,
            page_size = plan.page_size,
            concurrency = plan.concurrency,
            "starting page downloads"
        );

        // The gate has passed; only now does the output file exist.
        let file = tokio::fs::File::create(&self.config.filename).await?;
        self.download_pages(&plan, BufWriter::new(file)).await?;

        if plan.delete_when_done {
            debug!(sid = %plan.sid, "deleting search job");
            // Cleanup failure is reported but never invalidates a
            // completed download.
            match self.client.delete_job(&plan.sid).await {
                Ok(()) => debug!(sid = %plan.sid, "search job deleted"),
                Err(err) => error!(sid = %plan.sid, error = %err, "failed to delete search job"),
            }
        }

        info!(
            sid = %plan.sid,
            filename = %self.config.filename.display(),
            "download completed"
        );
        Ok(())
    }

    /// Fan page indices out to the worker pool and reassemble the fetched
    /// pages into `sink` in strict index order.
    async fn download_pages<W>(&self, plan: &DownloadPlan, sink: W) -> Result<(), DownloadError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (index_tx, index_rx) = mpsc::channel::<u64>(CHANNEL_CAPACITY);
        let (page_tx, page_rx) = mpsc::channel::<Page>(CHANNEL_CAPACITY);

        // Workers consume the index queue competitively; each index is
        // dequeued by exactly one worker.
        let index_rx = Arc::new(Mutex::new(index_rx));

        debug!(worker_count = plan.concurrency, "starting fetch workers");
        let mut workers = Vec::with_capacity(plan.concurrency);
        for _ in 0..plan.concurrency {
            workers.push(tokio::spawn(fetch_worker(
                self.client.clone(),
                plan.clone(),
                index_rx.clone(),
                page_tx.clone(),
                self.cancel.clone(),
            )));
        }
        // Workers hold the only remaining handles to both channels.
        drop(index_rx);
        drop(page_tx);

        let collector = tokio::spawn(async move {
            let mut page_rx = page_rx;
            let mut sink = sink;
            let result = collect_pages(&mut page_rx, &mut sink).await;
            // Close the sink whether or not reassembly succeeded.
            let closed = sink.shutdown().await;
            let report = result?;
            closed?;
            Ok::<ReassemblyReport, std::io::Error>(report)
        });

        for index in 0..plan.total_pages {
            if index_tx.send(index).await.is_err() {
                // Every worker has exited; nothing left to feed.
                break;
            }
        }
        drop(index_tx);
        debug!("all page indices dispatched");

        for worker in workers {
            worker.await?;
        }
        debug!("all fetch workers finished");

        let report = collector.await??;

        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        if report.next_index != plan.total_pages {
            let missing: Vec<u64> = (report.next_index..plan.total_pages)
                .filter(|index| !report.buffered.contains(index))
                .collect();
            error!(?missing, total_pages = plan.total_pages, "download is missing pages");
            return Err(DownloadError::ReassemblyIncomplete {
                missing,
                total_pages: plan.total_pages,
            });
        }

        debug!(pages_written = report.pages_written, "all pages written");
        Ok(())
    }
}

/// One fetch worker: dequeue an index, fetch and decode the page, hand it
/// to the collector. A failed fetch is logged and its index dropped; the
/// gap is reported at the end of the run.
async fn fetch_worker(
    client: SplunkClient,
    plan: DownloadPlan,
    index_rx: Arc<Mutex<Receiver<u64>>>,
    page_tx: Sender<Page>,
    cancel: CancellationToken,
) {
    loop {
        // The lock is held only for the dequeue itself.
        let index = tokio::select! {
            _ = cancel.cancelled() => break,
            index = async { index_rx.lock().await.recv().await } => match index {
                Some(index) => index,
                None => break,
            },
        };

        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.fetch_page(&plan.sid, plan.page_size, index, plan.format) => {
                match result {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(index, error = %err, "error fetching page");
                        continue;
                    }
                }
            }
        };

        if page_tx.send(Page { index, payload }).await.is_err() {
            // Collector is gone; no point fetching more.
            break;
        }
    }
}

/// Serialize an unordered page stream into `sink` in ascending index
/// order. Pages ahead of their turn wait in a holding buffer; every write
/// drains the buffer for as long as it holds the next index. Returns once
/// the stream closes, with whatever state remains.
async fn collect_pages<W>(
    pages: &mut Receiver<Page>,
    sink: &mut W,
) -> Result<ReassemblyReport, std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let mut holding: BTreeMap<u64, String> = BTreeMap::new();
    let mut next_index: u64 = 0;
    let mut pages_written: u64 = 0;

    while let Some(page) = pages.recv().await {
        debug!(
            index = page.index,
            expected = next_index,
            buffered = holding.len(),
            "page received"
        );

        if page.index == next_index {
            sink.write_all(page.payload.as_bytes()).await?;
            next_index += 1;
            pages_written += 1;
        } else {
            holding.insert(page.index, page.payload);
            continue;
        }

        while let Some(payload) = holding.remove(&next_index) {
            sink.write_all(payload.as_bytes()).await?;
            next_index += 1;
            pages_written += 1;
        }
    }

    sink.flush().await?;
    Ok(ReassemblyReport {
        pages_written,
        next_index,
        buffered: holding.into_keys().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: u64, payload: &str) -> Page {
        Page {
            index,
            payload: payload.to_string(),
        }
    }

    async fn collect(pages: Vec<Page>) -> (ReassemblyReport, String) {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        for page in pages {
            tx.send(page).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        let report = collect_pages(&mut rx, &mut out).await.unwrap();
        (report, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn in_order_pages_stream_straight_through() {
        let (report, out) =
            collect(vec![page(0, "a"), page(1, "b"), page(2, "c")]).await;
        assert_eq!(out, "abc");
        assert_eq!(report.pages_written, 3);
        assert_eq!(report.next_index, 3);
        assert!(report.buffered.is_empty());
    }

    #[tokio::test]
    async fn arrival_order_never_changes_output_order() {
        let payloads = ["p0|", "p1|", "p2|", "p3|", "p4|"];
        let arrivals: [&[u64]; 4] = [
            &[4, 3, 2, 1, 0],
            &[2, 0, 4, 1, 3],
            &[1, 0, 3, 2, 4],
            &[0, 4, 1, 3, 2],
        ];

        for order in arrivals {
            let pages = order
                .iter()
                .map(|&i| page(i, payloads[i as usize]))
                .collect();
            let (report, out) = collect(pages).await;
            assert_eq!(out, "p0|p1|p2|p3|p4|", "arrival order {order:?}");
            assert_eq!(report.next_index, 5);
            assert!(report.buffered.is_empty());
        }
    }

    #[tokio::test]
    async fn gap_in_stream_leaves_later_pages_buffered() {
        // Page 1 never arrives: 0 is written, 2 and 3 stay parked.
        let (report, out) = collect(vec![page(0, "a"), page(2, "c"), page(3, "d")]).await;
        assert_eq!(out, "a");
        assert_eq!(report.pages_written, 1);
        assert_eq!(report.next_index, 1);
        assert_eq!(report.buffered, vec![2, 3]);
    }

    #[tokio::test]
    async fn empty_stream_writes_nothing() {
        let (report, out) = collect(Vec::new()).await;
        assert_eq!(out, "");
        assert_eq!(report.pages_written, 0);
        assert_eq!(report.next_index, 0);
        assert!(report.buffered.is_empty());
    }

    #[test]
    fn plan_page_arithmetic() {
        let config = DownloadConfig {
            sid: "sid".to_string(),
            ..DownloadConfig::default()
        };

        // Zero results still fetches one (empty) page.
        assert_eq!(DownloadPlan::new(&config, 0).total_pages, 1);
        assert_eq!(DownloadPlan::new(&config, 1).total_pages, 1);
        assert_eq!(DownloadPlan::new(&config, PAGE_SIZE - 1).total_pages, 1);
        // An exact multiple carries one guaranteed-empty trailing page.
        assert_eq!(DownloadPlan::new(&config, PAGE_SIZE).total_pages, 2);
        assert_eq!(DownloadPlan::new(&config, 2 * PAGE_SIZE).total_pages, 3);
        assert_eq!(DownloadPlan::new(&config, 154_569).total_pages, 16);
    }

    #[test]
    fn plan_clamps_concurrency_to_at_least_one() {
        let config = DownloadConfig {
            sid: "sid".to_string(),
            max_connections: 0,
            ..DownloadConfig::default()
        };
        assert_eq!(DownloadPlan::new(&config, 100).concurrency, 1);
    }
}
