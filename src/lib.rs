/*!
 * Sluice - distributed password-recovery pipeline
 *
 * Orchestrates a hash-recovery loop against a single remote GPU worker:
 * - Partitions a large hash universe into fixed-size batches
 * - Filters out baseline-cracked hashes with bounded memory
 * - Dispatches concatenated chunks to the worker over SSH, inside
 *   detached sessions that survive disconnects
 * - Splits results into recovered pairs and per-batch remainders under
 *   strict conservation
 * - Tracks per-batch attack progress in an atomically persisted state
 *   document with resume semantics
 * - Mines recovered plaintexts for roots, patterns and cohorts, and
 *   feeds derived wordlists and rules into the next iteration
 */

pub mod analyze;
pub mod baseline;
pub mod chunk;
pub mod config;
pub mod distribute;
pub mod error;
pub mod feedback;
pub mod hashline;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod remote;
pub mod sequencer;
pub mod state;
pub mod stats;

// Re-export commonly used types for convenience
pub use analyze::{AnalysisReport, Analyzer};
pub use config::{AttackPhase, AttackRecipe, CohortFingerprint, PipelineConfig};
pub use distribute::{CrackedLog, CrackedRecord, Distributor, PotfileMap};
pub use error::{ErrorCategory, Result, SluiceError};
pub use feedback::FeedbackEmitter;
pub use pipeline::Pipeline;
pub use remote::{RemoteExecutor, RunSpec, SshTransport, Transport};
pub use sequencer::{AttackRegistry, Sequencer};
pub use state::{BatchState, BatchStatus, StateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
