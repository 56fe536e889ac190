// Shared job types and the error taxonomy

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

/// Opaque identifier the server assigns to an accepted job (`process_id`).
///
/// The handle keys every later status and download call and names the local
/// result file. It is kept exactly as the server sent it; transports encode
/// it when they place it in a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    /// Validate a raw `process_id` returned by the server.
    pub fn parse(raw: impl Into<String>) -> JobResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty()
            || raw == "."
            || raw == ".."
            || raw.contains('/')
            || raw.contains('\\')
            || raw.chars().any(char::is_control)
        {
            return Err(JobError::SubmitFailed(format!("invalid process id {:?}", raw)));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job state as reported by `GET /status/{process_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Error,
    /// Any non-terminal tag, kept verbatim (e.g. `PROCESSING`).
    Pending(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl From<&str> for JobStatus {
    fn from(tag: &str) -> Self {
        match tag {
            "COMPLETED" => JobStatus::Completed,
            "ERROR" => JobStatus::Error,
            other => JobStatus::Pending(other.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Error => write!(f, "ERROR"),
            JobStatus::Pending(tag) => write!(f, "{}", tag),
        }
    }
}

/// Raw bytes produced by a completed job. Never parsed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultArtifact {
    pub bytes: Bytes,
}

impl ResultArtifact {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of a successful end-to-end run.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub handle: JobHandle,
    pub artifact: ResultArtifact,
    /// Where the artifact was persisted.
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("payload unavailable: {path}: {reason}")]
    PayloadUnavailable { path: PathBuf, reason: String },

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("submission failed: {0}")]
    SubmitFailed(String),

    #[error("status query failed for job {handle}: {message}")]
    StatusQueryFailed { handle: JobHandle, message: String },

    #[error("job {handle} did not reach a terminal state within {waited_secs}s")]
    PollTimedOut { handle: JobHandle, waited_secs: u64 },

    #[error("remote processing failed for job {0}")]
    RemoteProcessingFailed(JobHandle),

    #[error("result download failed for job {handle}: {message}")]
    ResultFetchFailed { handle: JobHandle, message: String },

    #[error("could not persist result of job {handle} to {path}: {source}")]
    ResultPersistFailed {
        handle: JobHandle,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job task aborted: {0}")]
    TaskAborted(String),
}

impl JobError {
    /// Name of the protocol stage that failed, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::PayloadUnavailable { .. } => "payload",
            JobError::MalformedDescriptor(_) => "descriptor",
            JobError::SubmitFailed(_) => "submit",
            JobError::StatusQueryFailed { .. } => "status",
            JobError::PollTimedOut { .. } => "poll",
            JobError::RemoteProcessingFailed(_) => "processing",
            JobError::ResultFetchFailed { .. } => "download",
            JobError::ResultPersistFailed { .. } => "persist",
            JobError::TaskAborted(_) => "task",
        }
    }
}

pub type JobResult<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_accepts_uuid() {
        let handle = JobHandle::parse("3f1c2a9e-8d4b-4c1e-9a77-0b2d5e6f7a81").unwrap();
        assert_eq!(handle.as_str(), "3f1c2a9e-8d4b-4c1e-9a77-0b2d5e6f7a81");
    }

    #[test]
    fn test_handle_rejects_path_like_values() {
        for raw in ["", "   ", ".", "..", "../etc", "a/b", "a\\b", "a\0b", "job\n1"] {
            let err = JobHandle::parse(raw).unwrap_err();
            assert_eq!(err.stage(), "submit", "{:?} should be rejected", raw);
        }
    }

    #[test]
    fn test_handle_is_kept_verbatim() {
        assert_eq!(JobHandle::parse(" abc ").unwrap().as_str(), " abc ");
        assert_eq!(JobHandle::parse("job?1#frag").unwrap().as_str(), "job?1#frag");
        assert_eq!(JobHandle::parse("..hidden").unwrap().as_str(), "..hidden");
    }

    #[test]
    fn test_status_tags() {
        assert_eq!(JobStatus::from("COMPLETED"), JobStatus::Completed);
        assert_eq!(JobStatus::from("ERROR"), JobStatus::Error);
        assert_eq!(
            JobStatus::from("PROCESSING"),
            JobStatus::Pending("PROCESSING".to_string())
        );
        // Tags are case sensitive on the wire
        assert!(!JobStatus::from("completed").is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_error_display_names_server_message() {
        let err = JobError::SubmitFailed("HTTP 400: SERVER: FITS file is missing.".to_string());
        assert_eq!(
            err.to_string(),
            "submission failed: HTTP 400: SERVER: FITS file is missing."
        );
        assert_eq!(err.stage(), "submit");
    }
}
