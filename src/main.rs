use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cianna_client::config::{Config, LoggingConfig};
use cianna_client::emulator::{Emulator, RequestTemplate};
use cianna_client::transport::{HttpTransport, JobTransport};
use cianna_client::{JobError, JobHandle, JobOrchestrator, JobParams, OrchestratorConfig, Region};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Command-line arguments
struct Args {
    /// Processing server base URL (overrides CIANNA_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Directory receiving result files (overrides RESULT_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Seconds between two status queries
    #[arg(long, global = true, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Give up waiting for a job after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    poll_timeout: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one job and wait for its result
    Submit(RequestArgs),
    /// Print the descriptor XML of a request without sending it
    Describe(RequestArgs),
    /// Emulate several clients submitting randomized requests at once
    Emulate {
        /// Number of simultaneous requests (overrides NB_REQUESTS)
        #[arg(long, short = 'n', value_name = "COUNT")]
        requests: Option<usize>,
    },
    /// Query the status of a submitted job
    Status {
        #[arg(value_name = "PROCESS_ID")]
        process_id: String,
    },
    /// Download the result of a completed job
    Download {
        #[arg(value_name = "PROCESS_ID")]
        process_id: String,
    },
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Right ascension in degrees
    #[arg(long, allow_negative_numbers = true)]
    ra: f64,

    /// Declination in degrees
    #[arg(long, allow_negative_numbers = true)]
    dec: f64,

    /// Crop height in pixels
    #[arg(long)]
    height: u32,

    /// Crop width in pixels
    #[arg(long)]
    width: u32,

    /// FITS image to upload (defaults to IMAGE_PATH)
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    #[arg(long)]
    user_id: Option<String>,

    /// YOLO-CIANNA model name (defaults to YOLO_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Quantization tag (defaults to QUANTIZATION)
    #[arg(long)]
    quantization: Option<String>,

    /// Send the descriptor alone, without the FITS payload
    #[arg(long)]
    xml_only: bool,
}

impl RequestArgs {
    fn into_params(self, config: &Config) -> JobParams {
        JobParams {
            user_id: self.user_id,
            image_path: Some(self.image.unwrap_or_else(|| config.emulator.image_path.clone())),
            model_name: Some(self.model.unwrap_or_else(|| config.emulator.model_name.clone())),
            quantization: Some(
                self.quantization
                    .unwrap_or_else(|| config.emulator.quantization.clone()),
            ),
            attach_payload: !self.xml_only,
            ..JobParams::new(Region::new(self.ra, self.dec, self.height, self.width))
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cianna-client.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cianna_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn report_failure(err: &JobError) -> ExitCode {
    error!("Job failed at {}: {}", err.stage(), err);
    eprintln!("[{}] {}", err.stage(), err);
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Load configuration, then apply command-line overrides
    let mut config = Config::from_env()?;
    if let Some(server) = args.server {
        config.server.base_url = server.trim_end_matches('/').to_string();
    }
    if let Some(dir) = args.output_dir {
        config.output.result_dir = dir;
    }
    if let Some(secs) = args.poll_interval {
        config.polling.interval_secs = secs;
    }
    if let Some(secs) = args.poll_timeout {
        config.polling.timeout_secs = Some(secs);
    }

    let _guard = init_tracing(&config.logging);
    info!("Using processing server {}", config.server.base_url);

    let transport = Arc::new(HttpTransport::new(&config.server)?);
    let orchestrator = Arc::new(JobOrchestrator::new(
        transport.clone(),
        OrchestratorConfig::from(&config),
    ));

    match args.command {
        Command::Submit(request) => {
            let params = request.into_params(&config);
            match orchestrator.run(&params).await {
                Ok(done) => {
                    println!("{} -> {}", done.handle, done.path.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_failure(&e)),
            }
        }
        Command::Describe(request) => {
            let params = request.into_params(&config);
            println!("{}", params.descriptor().to_xml()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Emulate { requests } => {
            let count = requests.unwrap_or(config.emulator.requests);
            let emulator = Emulator::new(
                orchestrator,
                RequestTemplate::from(&config.emulator),
            );
            let report = emulator.run(count).await;

            for job in &report.jobs {
                let user = job.user_id.as_deref().unwrap_or("anonymous");
                match &job.outcome {
                    Ok(done) => println!(
                        "request {} (user {}): {} -> {}",
                        job.index,
                        user,
                        done.handle,
                        done.path.display()
                    ),
                    Err(e) => eprintln!(
                        "request {} (user {}): failed at {}: {}",
                        job.index,
                        user,
                        e.stage(),
                        e
                    ),
                }
            }

            Ok(if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status { process_id } => {
            let handle = JobHandle::parse(process_id)?;
            match transport.get_status(&handle).await {
                Ok(status) => {
                    println!("{}: {}", handle, status);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_failure(&e)),
            }
        }
        Command::Download { process_id } => {
            let handle = JobHandle::parse(process_id)?;
            match orchestrator.download(&handle).await {
                Ok(done) => {
                    println!("{} -> {}", done.handle, done.path.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_failure(&e)),
            }
        }
    }
}
