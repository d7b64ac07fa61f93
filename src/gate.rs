use crate::downloader::DownloadError;
use crate::models::JobStatus;

/// Jobs with more results than this must be split before downloading.
pub const RESULT_LIMIT: u64 = 500_000;

/// Validate that a job is ready to download: finished, not failed, and
/// within the result ceiling. Pure check of the status snapshot; runs
/// before any page fetch is attempted.
pub fn check_ready(status: &JobStatus) -> Result<(), DownloadError> {
    if !status.is_done {
        return Err(DownloadError::NotComplete {
            sid: status.sid.clone(),
            state: status.dispatch_state.clone(),
            progress: status.done_progress * 100.0,
        });
    }

    if status.is_failed {
        return Err(DownloadError::JobFailed {
            sid: status.sid.clone(),
        });
    }

    if status.result_count > RESULT_LIMIT {
        return Err(DownloadError::ResultLimitExceeded {
            sid: status.sid.clone(),
            count: status.result_count,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done_status(result_count: u64) -> JobStatus {
        JobStatus {
            sid: "1756172871.1180".to_string(),
            result_count,
            is_done: true,
            is_failed: false,
            dispatch_state: "DONE".to_string(),
            done_progress: 1.0,
            event_count: result_count,
            run_duration: 0.5,
        }
    }

    #[test]
    fn complete_job_passes() {
        assert!(check_ready(&done_status(154_569)).is_ok());
    }

    #[test]
    fn job_at_result_limit_passes() {
        assert!(check_ready(&done_status(RESULT_LIMIT)).is_ok());
    }

    #[test]
    fn running_job_is_rejected_with_state_and_progress() {
        let status = JobStatus {
            is_done: false,
            dispatch_state: "RUNNING".to_string(),
            done_progress: 0.5,
            ..done_status(0)
        };

        let err = check_ready(&status).unwrap_err();
        assert!(matches!(err, DownloadError::NotComplete { .. }));
        let message = err.to_string();
        assert!(message.contains("is not complete"), "{message}");
        assert!(message.contains("RUNNING"), "{message}");
        assert!(message.contains("50.0%"), "{message}");
    }

    #[test]
    fn failed_job_is_rejected() {
        let status = JobStatus {
            is_failed: true,
            ..done_status(10)
        };

        let err = check_ready(&status).unwrap_err();
        assert!(matches!(err, DownloadError::JobFailed { .. }));
        assert!(err.to_string().contains("has failed"));
    }

    #[test]
    fn job_over_result_limit_is_rejected_naming_the_ceiling() {
        let err = check_ready(&done_status(RESULT_LIMIT + 1)).unwrap_err();
        assert!(matches!(err, DownloadError::ResultLimitExceeded { .. }));
        let message = err.to_string();
        assert!(message.contains("500000"), "{message}");
        assert!(message.contains("Split your search"), "{message}");
    }

    #[test]
    fn incomplete_beats_failed_and_size() {
        // A job that is running, marked failed, and oversized reports
        // NotComplete first, matching the check order.
        let status = JobStatus {
            is_done: false,
            is_failed: true,
            dispatch_state: "RUNNING".to_string(),
            done_progress: 0.1,
            ..done_status(RESULT_LIMIT + 5)
        };
        let err = check_ready(&status).unwrap_err();
        assert!(matches!(err, DownloadError::NotComplete { .. }));
    }
}
