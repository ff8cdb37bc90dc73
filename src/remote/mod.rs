/*!
 * Remote worker supervision
 *
 * Everything that touches the GPU worker lives here: the SSH transport,
 * detached-session handling, pre-flight checks, and the polling
 * supervisor that survives disconnects and confirms completion from
 * three independent signals.
 */

pub mod executor;
pub mod mock;
pub mod preflight;
pub mod session;
pub mod transport;

pub use executor::{Outcome, RemoteExecutor, RunSpec};
pub use preflight::preflight;
pub use session::{DetachedSession, SessionStatus, TerminalStatus};
pub use transport::{ExecOutput, SshTransport, Transport, TransportError, TransportResult};
