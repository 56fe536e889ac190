// Transport layer between the client and the processing server

pub mod http;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use async_trait::async_trait;

use crate::descriptor::JobDescriptor;
use crate::types::{JobHandle, JobResult, JobStatus, ResultArtifact};

pub use http::HttpTransport;

/// The three calls of the job protocol. None of them retries.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Submit a descriptor, optionally with the FITS file at `payload`.
    ///
    /// The payload is read in full before any request is made; an unreadable
    /// file fails with `PayloadUnavailable` and nothing is sent.
    async fn submit(
        &self,
        descriptor: &JobDescriptor,
        payload: Option<&Path>,
    ) -> JobResult<JobHandle>;

    async fn get_status(&self, handle: &JobHandle) -> JobResult<JobStatus>;

    async fn fetch_result(&self, handle: &JobHandle) -> JobResult<ResultArtifact>;
}
