// In-memory transport that replays a scripted status sequence

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::descriptor::JobDescriptor;
use crate::transport::JobTransport;
use crate::types::{JobError, JobHandle, JobResult, JobStatus, ResultArtifact};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Submit { user_id: Option<String>, payload: Option<PathBuf> },
    Status(JobHandle),
    Fetch(JobHandle),
}

/// Every accepted job walks through `statuses`; the last entry repeats.
pub(crate) struct ScriptedTransport {
    statuses: Vec<JobStatus>,
    reject_users: HashSet<String>,
    fail_fetch: bool,
    fail_status_after: Option<usize>,
    artifact: Vec<u8>,
    cursors: Mutex<HashMap<JobHandle, usize>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub(crate) fn new(statuses: &[&str]) -> Self {
        Self {
            statuses: statuses.iter().map(|s| JobStatus::from(*s)).collect(),
            reject_users: HashSet::new(),
            fail_fetch: false,
            fail_status_after: None,
            artifact: b"id ra dec score\n0 12.5 -30.25 0.93\n".to_vec(),
            cursors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Refuse uploads from this user with a 400-style message.
    pub(crate) fn rejecting_user(mut self, user_id: impl ToString) -> Self {
        self.reject_users.insert(user_id.to_string());
        self
    }

    pub(crate) fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Answer the first `answered` status queries of each job, then fail.
    pub(crate) fn failing_status_after(mut self, answered: usize) -> Self {
        self.fail_status_after = Some(answered);
        self
    }

    pub(crate) fn artifact(&self) -> &[u8] {
        &self.artifact
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn status_queries(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Status(_)))
            .count()
    }

    pub(crate) fn fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl JobTransport for ScriptedTransport {
    async fn submit(
        &self,
        descriptor: &JobDescriptor,
        payload: Option<&Path>,
    ) -> JobResult<JobHandle> {
        if let Some(path) = payload {
            tokio::fs::metadata(path)
                .await
                .map_err(|e| JobError::PayloadUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
        }

        let user_id = descriptor.user_id().map(str::to_string);
        self.record(Call::Submit {
            user_id: user_id.clone(),
            payload: payload.map(Path::to_path_buf),
        });

        let user = user_id.unwrap_or_else(|| "anonymous".to_string());
        if self.reject_users.contains(&user) {
            return Err(JobError::SubmitFailed(
                "HTTP 400 Bad Request: SERVER: XML file is missing.".to_string(),
            ));
        }
        JobHandle::parse(format!("job-{}", user))
    }

    async fn get_status(&self, handle: &JobHandle) -> JobResult<JobStatus> {
        self.record(Call::Status(handle.clone()));

        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(handle.clone()).or_insert(0);
        if self.fail_status_after.is_some_and(|answered| *cursor >= answered) {
            return Err(JobError::StatusQueryFailed {
                handle: handle.clone(),
                message: "HTTP 500 Internal Server Error".to_string(),
            });
        }
        let status = self
            .statuses
            .get(*cursor)
            .or_else(|| self.statuses.last())
            .cloned()
            .unwrap_or(JobStatus::Completed);
        *cursor += 1;
        Ok(status)
    }

    async fn fetch_result(&self, handle: &JobHandle) -> JobResult<ResultArtifact> {
        self.record(Call::Fetch(handle.clone()));

        if self.fail_fetch {
            return Err(JobError::ResultFetchFailed {
                handle: handle.clone(),
                message: "HTTP 404 Not Found: File not found".to_string(),
            });
        }
        Ok(ResultArtifact::new(self.artifact.clone()))
    }
}
