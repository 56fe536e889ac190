// CIANNA client - submit, track and retrieve YOLO-CIANNA source detection jobs

pub mod config;
pub mod types;
pub mod descriptor;
pub mod transport;    // Job protocol over HTTP
pub mod polling;
pub mod orchestrator;
pub mod emulator;     // Concurrent client emulation

// Re-exports for convenience
pub use config::Config;
pub use descriptor::{JobDescriptor, Region};
pub use orchestrator::{JobOrchestrator, JobParams, OrchestratorConfig};
pub use types::{CompletedJob, JobError, JobHandle, JobResult, JobStatus, ResultArtifact};
