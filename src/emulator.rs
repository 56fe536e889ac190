//! Concurrent request emulator.
//!
//! Spawns one independent task per emulated client and waits for all of
//! them. Tasks share only the read-only orchestrator; a failure, or even a
//! panic, in one job is recorded against that job and never touches the
//! others.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use rand::Rng;
use tracing::{error, info};

use crate::config::EmulatorConfig;
use crate::descriptor::Region;
use crate::orchestrator::{JobOrchestrator, JobParams};
use crate::types::{CompletedJob, JobError, JobResult};

/// Fields common to every emulated request.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub base_user_id: u64,
    pub image_path: PathBuf,
    pub model_name: String,
    pub quantization: String,
}

impl From<&EmulatorConfig> for RequestTemplate {
    fn from(config: &EmulatorConfig) -> Self {
        Self {
            base_user_id: config.base_user_id,
            image_path: config.image_path.clone(),
            model_name: config.model_name.clone(),
            quantization: config.quantization.clone(),
        }
    }
}

/// `count` requests with user ids `base + 1 ..= base + count` and a random
/// region each: RA in [0, 360), DEC in [-90, 90), crop sides in [50, 200].
pub fn randomized_params(template: &RequestTemplate, count: usize) -> Vec<JobParams> {
    let mut rng = rand::thread_rng();

    (1..=count as u64)
        .map(|n| {
            let region = Region::new(
                rng.gen_range(0.0..360.0),
                rng.gen_range(-90.0..90.0),
                rng.gen_range(50..=200),
                rng.gen_range(50..=200),
            );
            JobParams {
                // No overflow past u64::MAX
                user_id: Some((u128::from(template.base_user_id) + u128::from(n)).to_string()),
                image_path: Some(template.image_path.clone()),
                model_name: Some(template.model_name.clone()),
                quantization: Some(template.quantization.clone()),
                ..JobParams::new(region)
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct JobReport {
    /// 1-based position in the batch
    pub index: usize,
    pub user_id: Option<String>,
    pub outcome: JobResult<CompletedJob>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct EmulationReport {
    pub jobs: Vec<JobReport>,
}

impl EmulationReport {
    pub fn successes(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| !j.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(JobReport::is_success)
    }
}

pub struct Emulator {
    orchestrator: Arc<JobOrchestrator>,
    template: RequestTemplate,
}

impl Emulator {
    pub fn new(orchestrator: Arc<JobOrchestrator>, template: RequestTemplate) -> Self {
        Self {
            orchestrator,
            template,
        }
    }

    /// Emulate `count` simultaneous clients with randomized regions.
    pub async fn run(&self, count: usize) -> EmulationReport {
        self.run_all(randomized_params(&self.template, count)).await
    }

    /// Run every parameter set as its own task and wait for all of them.
    pub async fn run_all(&self, requests: Vec<JobParams>) -> EmulationReport {
        info!("Starting {} concurrent jobs", requests.len());

        let users: Vec<Option<String>> = requests.iter().map(|p| p.user_id.clone()).collect();
        let tasks = requests.into_iter().map(|params| {
            let orchestrator = Arc::clone(&self.orchestrator);
            tokio::spawn(async move { orchestrator.run(&params).await })
        });
        let joined = join_all(tasks.collect::<Vec<_>>()).await;

        let jobs: Vec<JobReport> = joined
            .into_iter()
            .zip(users)
            .enumerate()
            .map(|(i, (joined, user_id))| {
                let outcome = joined.unwrap_or_else(|e| Err(JobError::TaskAborted(e.to_string())));
                JobReport {
                    index: i + 1,
                    user_id,
                    outcome,
                }
            })
            .collect();

        let report = EmulationReport { jobs };
        for job in report.failures() {
            if let Err(e) = &job.outcome {
                error!(
                    "Request {} (user {}) failed at {}: {}",
                    job.index,
                    job.user_id.as_deref().unwrap_or("anonymous"),
                    e.stage(),
                    e
                );
            }
        }
        info!(
            "{} of {} jobs completed",
            report.successes().count(),
            report.jobs.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::polling::PollPolicy;
    use crate::transport::testing::ScriptedTransport;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn template(fits: &NamedTempFile) -> RequestTemplate {
        RequestTemplate {
            base_user_id: 2443423,
            image_path: fits.path().to_path_buf(),
            model_name: "net0_s1800.dat".to_string(),
            quantization: "FP32C_FP32A".to_string(),
        }
    }

    fn fits_file() -> NamedTempFile {
        let mut fits = NamedTempFile::new().unwrap();
        fits.write_all(b"SIMPLE  =                    T").unwrap();
        fits
    }

    #[test]
    fn test_randomized_params_ranges() {
        let fits = fits_file();
        let params = randomized_params(&template(&fits), 200);

        assert_eq!(params.len(), 200);
        assert_eq!(params[0].user_id.as_deref(), Some("2443424"));
        assert_eq!(params[199].user_id.as_deref(), Some("2443623"));
        for p in &params {
            assert!((0.0..360.0).contains(&p.region.ra));
            assert!((-90.0..90.0).contains(&p.region.dec));
            assert!((50..=200).contains(&p.region.height));
            assert!((50..=200).contains(&p.region.width));
            assert!(p.attach_payload);
            assert_eq!(p.image_path.as_deref(), Some(fits.path()));
        }
    }

    #[test]
    fn test_user_ids_past_u64_max() {
        let fits = fits_file();
        let mut template = template(&fits);
        template.base_user_id = u64::MAX;

        let ids: Vec<String> = randomized_params(&template, 2)
            .into_iter()
            .filter_map(|p| p.user_id)
            .collect();

        assert_eq!(ids, vec!["18446744073709551616", "18446744073709551617"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_does_not_affect_siblings() {
        let fits = fits_file();
        let results = TempDir::new().unwrap();
        // The second client (user base + 2) is refused at upload
        let transport = Arc::new(
            ScriptedTransport::new(&["PROCESSING", "COMPLETED"]).rejecting_user(2443425),
        );
        let orchestrator = Arc::new(JobOrchestrator::new(
            transport.clone(),
            OrchestratorConfig {
                result_dir: results.path().to_path_buf(),
                poll: PollPolicy::default(),
            },
        ));
        let emulator = Emulator::new(orchestrator, template(&fits));

        let report = emulator.run(3).await;

        assert_eq!(report.jobs.len(), 3);
        assert!(!report.all_succeeded());
        assert!(report.jobs[0].is_success());
        assert!(report.jobs[2].is_success());
        assert!(matches!(report.jobs[1].outcome, Err(JobError::SubmitFailed(_))));
        assert_eq!(report.jobs[1].index, 2);
        assert_eq!(report.successes().count(), 2);
        assert_eq!(report.failures().count(), 1);

        let mut saved: Vec<String> = std::fs::read_dir(results.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        saved.sort();
        assert_eq!(saved, vec!["result_job-2443424", "result_job-2443426"]);
        assert_eq!(transport.fetches(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fits = fits_file();
        let results = TempDir::new().unwrap();
        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::new(ScriptedTransport::new(&["COMPLETED"])),
            OrchestratorConfig {
                result_dir: results.path().to_path_buf(),
                poll: PollPolicy::default(),
            },
        ));

        let report = Emulator::new(orchestrator, template(&fits)).run(0).await;

        assert!(report.jobs.is_empty());
        assert!(report.all_succeeded());
    }
}
