//! End-to-end client run: build, submit, poll, then fetch or report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, field, info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::descriptor::{JobDescriptor, Region};
use crate::polling::{poll_until_terminal, PollPolicy};
use crate::transport::JobTransport;
use crate::types::{CompletedJob, JobError, JobHandle, JobResult, JobStatus, ResultArtifact};

/// Prefix of persisted result files: `result_<process_id>`.
pub const RESULT_FILE_PREFIX: &str = "result_";

/// Inputs of one processing request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams {
    pub user_id: Option<String>,
    pub region: Region,
    pub image_path: Option<PathBuf>,
    pub model_name: Option<String>,
    pub quantization: Option<String>,
    /// Upload the FITS image together with the descriptor.
    pub attach_payload: bool,
}

impl JobParams {
    pub fn new(region: Region) -> Self {
        Self {
            user_id: None,
            region,
            image_path: None,
            model_name: None,
            quantization: None,
            attach_payload: true,
        }
    }

    /// Fresh descriptor stamped with the current time.
    pub fn descriptor(&self) -> JobDescriptor {
        let mut builder = JobDescriptor::builder(self.region);
        if let Some(user_id) = &self.user_id {
            builder = builder.user_id(user_id);
        }
        if let Some(path) = &self.image_path {
            builder = builder.image_path(path);
        }
        if let Some(name) = &self.model_name {
            builder = builder.model_name(name);
        }
        if let Some(tag) = &self.quantization {
            builder = builder.quantization(tag);
        }
        builder.build()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory receiving `result_<process_id>` files
    pub result_dir: PathBuf,
    pub poll: PollPolicy,
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            result_dir: config.output.result_dir.clone(),
            poll: PollPolicy::from(&config.polling),
        }
    }
}

pub struct JobOrchestrator {
    transport: Arc<dyn JobTransport>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(transport: Arc<dyn JobTransport>, config: OrchestratorConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn result_path(&self, handle: &JobHandle) -> PathBuf {
        self.config
            .result_dir
            .join(format!("{}{}", RESULT_FILE_PREFIX, handle))
    }

    /// Run one job to its end. A failed run leaves no file behind.
    ///
    /// Everything the run logs sits in a `job` span carrying the user id and,
    /// once the server accepted the job, its handle.
    pub async fn run(&self, params: &JobParams) -> JobResult<CompletedJob> {
        let descriptor = params.descriptor();
        let user = descriptor.user_id().unwrap_or("anonymous").to_string();
        let span = info_span!("job", user = %user, handle = field::Empty);

        self.submit_and_wait(params, descriptor).instrument(span).await
    }

    async fn submit_and_wait(
        &self,
        params: &JobParams,
        descriptor: JobDescriptor,
    ) -> JobResult<CompletedJob> {
        let payload = if params.attach_payload {
            let path = params.image_path.as_deref().ok_or_else(|| {
                JobError::MalformedDescriptor(
                    "image path is required to upload the FITS payload".to_string(),
                )
            })?;
            Some(path)
        } else {
            None
        };

        info!(
            "Submitting job (RA {}, DEC {})",
            descriptor.region().ra,
            descriptor.region().dec
        );
        let handle = self.transport.submit(&descriptor, payload).await?;
        Span::current().record("handle", field::display(&handle));
        info!("Job accepted as {}", handle);

        let status = poll_until_terminal(self.transport.as_ref(), &handle, &self.config.poll).await?;
        self.settle(&handle, status).await
    }

    async fn settle(&self, handle: &JobHandle, status: JobStatus) -> JobResult<CompletedJob> {
        match status {
            JobStatus::Completed => self.download(handle).await,
            JobStatus::Error => {
                warn!("Job {} processing failed on the server", handle);
                Err(JobError::RemoteProcessingFailed(handle.clone()))
            }
            JobStatus::Pending(tag) => Err(JobError::StatusQueryFailed {
                handle: handle.clone(),
                message: format!("polling stopped on non-terminal status {}", tag),
            }),
        }
    }

    /// Fetch the artifact of a completed job and persist it.
    pub async fn download(&self, handle: &JobHandle) -> JobResult<CompletedJob> {
        let artifact = self.transport.fetch_result(handle).await?;
        let path = self.persist(handle, &artifact).await?;
        info!("Job {} result saved as {} ({} bytes)", handle, path.display(), artifact.len());

        Ok(CompletedJob {
            handle: handle.clone(),
            artifact,
            path,
        })
    }

    // Write to a hidden part file, then rename into place
    async fn persist(&self, handle: &JobHandle, artifact: &ResultArtifact) -> JobResult<PathBuf> {
        let path = self.result_path(handle);
        let partial = self
            .config
            .result_dir
            .join(format!(".{}{}.part", RESULT_FILE_PREFIX, handle));

        match write_atomically(&self.config.result_dir, &partial, &path, &artifact.bytes).await {
            Ok(()) => Ok(path),
            Err(source) => {
                discard(&partial).await;
                error!("Could not save result of job {}: {}", handle, source);
                Err(JobError::ResultPersistFailed {
                    handle: handle.clone(),
                    path,
                    source,
                })
            }
        }
    }
}

async fn write_atomically(
    dir: &Path,
    partial: &Path,
    path: &Path,
    bytes: &[u8],
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(partial, bytes).await?;
    tokio::fs::rename(partial, path).await
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial file {}: {}", path.display(), e);
        }
    }
}
