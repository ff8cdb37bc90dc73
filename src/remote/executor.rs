/*!
 * Remote execution supervisor
 *
 * Runs one cracking command on the worker inside a detached session and
 * watches it to completion. Three orthogonal signals are polled each
 * round: worker-process liveness, session liveness, and a terminal
 * status marker in the command's log. Any single signal can lie (a
 * process listing can race an exit, a log write can be buffered past
 * session teardown), so completion and failure are judged on the
 * combination, and an all-negative reading must repeat on two
 * consecutive polls before the run is declared dead.
 *
 * Transport loss during polling triggers a capped exponential
 * reconnect; the remote work is unaffected because it lives in the
 * detached session. For the same reason neither a timeout nor a lost
 * connection kills the session: the work is still valuable and the
 * operator decides.
 */

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::session::{self, DetachedSession, SessionStatus, TerminalStatus};
use super::transport::{Transport, TransportError};
use crate::config::ExecutorConfig;
use crate::error::{Result, SluiceError};

/// Tail length attached to launch/stop failures
const FAILURE_LOG_LINES: usize = 25;

/// One command to supervise
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Detached session name; re-running with the same name resumes
    pub session_name: String,
    /// Fully translated worker command
    pub command: String,
    /// Absolute remote log path
    pub log_path: String,
    /// Absolute remote path of the output artifact (potfile)
    pub artifact_path: String,
    /// Worker process pattern for the liveness signal
    pub process_pattern: String,
}

/// Completed run description
#[derive(Debug, Clone)]
pub struct Outcome {
    pub terminal: TerminalStatus,
    /// Remote artifact path, ready for download
    pub artifact_path: String,
    /// Supervised wall time in seconds
    pub duration_seconds: u64,
    /// True when an existing session was adopted instead of launched
    pub resumed: bool,
}

/// One poll round's view of the three signals
#[derive(Debug, Clone, Copy)]
struct Signals {
    process_alive: bool,
    session_alive: bool,
    log_terminal: Option<TerminalStatus>,
}

impl Signals {
    fn in_progress(&self) -> bool {
        self.process_alive || self.session_alive
    }
}

/// Supervisor over a transport
pub struct RemoteExecutor<T: Transport> {
    transport: T,
    config: ExecutorConfig,
    sleeper: Box<dyn FnMut(Duration)>,
}

impl<T: Transport> RemoteExecutor<T> {
    pub fn new(transport: T, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            sleeper: Box::new(|d| std::thread::sleep(d)),
        }
    }

    /// Replace the sleep function (tests run the poll loop instantly)
    pub fn with_sleeper(mut self, sleeper: Box<dyn FnMut(Duration)>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Supervise one run to completion.
    ///
    /// If the named detached session already exists the command is NOT
    /// relaunched; polling starts directly, which makes a second
    /// invocation after a crash safe.
    pub fn run(&mut self, spec: &RunSpec) -> Result<Outcome> {
        let session = DetachedSession::new(spec.session_name.as_str(), spec.log_path.as_str());

        let resumed = self.with_reconnect(|t| session.exists(t))?;
        if resumed {
            info!(session = %spec.session_name, "detached session already exists; resuming watch");
        } else {
            let launched = self.with_reconnect(|t| session.launch(t, &spec.command))?;
            if !launched {
                let tail = self.log_tail_best_effort(&session);
                return Err(SluiceError::LaunchFailed {
                    session: spec.session_name.clone(),
                    log_tail: tail,
                });
            }

            // Give the worker a moment, then verify something actually started.
            // A fast run may already be done, so a terminal log also counts.
            (self.sleeper)(Duration::from_secs(self.config.settle_secs));
            let (signals, _) = self.check_signals(&session, &spec.process_pattern)?;
            if !signals.in_progress() && signals.log_terminal.is_none() {
                let tail = self.log_tail_best_effort(&session);
                return Err(SluiceError::LaunchFailed {
                    session: spec.session_name.clone(),
                    log_tail: tail,
                });
            }
            if let Some(terminal) = signals.log_terminal {
                if !signals.in_progress() {
                    return Ok(Outcome {
                        terminal,
                        artifact_path: spec.artifact_path.clone(),
                        duration_seconds: self.config.settle_secs,
                        resumed: false,
                    });
                }
            }
        }

        self.poll_to_completion(spec, &session, resumed)
    }

    fn poll_to_completion(
        &mut self,
        spec: &RunSpec,
        session: &DetachedSession,
        resumed: bool,
    ) -> Result<Outcome> {
        let mut waited: u64 = 0;
        let mut tentative_stops: u32 = 0;

        loop {
            if waited >= self.config.max_wait_secs {
                // Deliberately leave the session running; the work may
                // still complete and the operator chooses what to do
                warn!(
                    session = %spec.session_name,
                    waited, "wall-clock ceiling reached; leaving session running"
                );
                return Err(SluiceError::CompletionTimeout {
                    session: spec.session_name.clone(),
                    waited_secs: waited,
                });
            }

            (self.sleeper)(Duration::from_secs(self.config.poll_interval_secs));
            waited += self.config.poll_interval_secs;

            let (signals, log) = self.check_signals(session, &spec.process_pattern)?;

            if signals.in_progress() {
                tentative_stops = 0;
                self.report_progress(spec, &log, waited);
                continue;
            }

            if let Some(terminal) = signals.log_terminal {
                info!(
                    session = %spec.session_name,
                    ?terminal, waited, "run completed"
                );
                return Ok(Outcome {
                    terminal,
                    artifact_path: spec.artifact_path.clone(),
                    duration_seconds: waited,
                    resumed,
                });
            }

            // No process, no session, no terminal marker: require two
            // consecutive readings before giving up on the run
            tentative_stops += 1;
            debug!(
                session = %spec.session_name,
                tentative_stops, "no liveness and no terminal status"
            );
            if tentative_stops >= 2 {
                let tail = self.log_tail_best_effort(session);
                return Err(SluiceError::UnexpectedStop {
                    session: spec.session_name.clone(),
                    log_tail: tail,
                });
            }
        }
    }

    /// One-shot status probe
    pub fn status(&mut self, session_name: &str, log_path: &str, process_pattern: &str) -> Result<SessionStatus> {
        let session = DetachedSession::new(session_name, log_path);
        let (signals, _) = self.check_signals(&session, process_pattern)?;
        Ok(if signals.process_alive {
            SessionStatus::Running
        } else if signals.session_alive {
            SessionStatus::Idle
        } else if signals.log_terminal.is_some() {
            SessionStatus::Completed
        } else {
            SessionStatus::Unknown
        })
    }

    /// Kill the detached session (explicit operator action)
    pub fn kill(&mut self, session_name: &str) -> Result<bool> {
        let session = DetachedSession::new(session_name, "");
        Ok(self.with_reconnect(|t| session.kill(t))?)
    }

    fn check_signals(
        &mut self,
        session: &DetachedSession,
        process_pattern: &str,
    ) -> Result<(Signals, String)> {
        let process_alive =
            self.with_reconnect(|t| session::worker_running(t, process_pattern))?;
        let session_alive = self.with_reconnect(|t| session.exists(t))?;
        let log = self.with_reconnect(|t| session.log_tail(t, 100))?;
        let signals = Signals {
            process_alive,
            session_alive,
            log_terminal: session::parse_terminal_status(&log),
        };
        Ok((signals, log))
    }

    fn report_progress(&mut self, spec: &RunSpec, log: &str, waited: u64) {
        let progress = session::last_progress_line(log);
        let artifact_size = self
            .with_reconnect(|t| session::remote_file_size(t, &spec.artifact_path))
            .ok()
            .flatten();
        info!(
            session = %spec.session_name,
            elapsed_secs = waited,
            progress = progress.as_deref().unwrap_or("-"),
            artifact_bytes = artifact_size.unwrap_or(0),
            "attack in progress"
        );
    }

    fn log_tail_best_effort(&mut self, session: &DetachedSession) -> String {
        self.with_reconnect(|t| session.log_tail(t, FAILURE_LOG_LINES))
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    }

    /// Run a transport operation, absorbing transient failures with a
    /// bounded exponential reconnect. Gives up with `ConnectionLost`
    /// once the total reconnect budget is spent.
    fn with_reconnect<R, F>(&mut self, mut op: F) -> Result<R>
    where
        F: FnMut(&mut T) -> std::result::Result<R, TransportError>,
    {
        match op(&mut self.transport) {
            Ok(value) => Ok(value),
            Err(e) if e.is_retriable() => {
                warn!(error = %e, "transport failure; reconnecting");
                self.reconnect_with_backoff()?;
                op(&mut self.transport).map_err(SluiceError::Transport)
            }
            Err(e) => Err(SluiceError::Transport(e)),
        }
    }

    fn reconnect_with_backoff(&mut self) -> Result<()> {
        let mut waited: u64 = 0;
        let mut delay = self.config.reconnect_base_secs.max(1);
        let mut rng = rand::rng();

        loop {
            if waited >= self.config.reconnect_ceiling_secs {
                return Err(SluiceError::ConnectionLost {
                    waited_secs: waited,
                });
            }

            let jitter = rng.random_range(0..=delay / 2);
            let pause = delay + jitter;
            debug!(pause_secs = pause, waited, "reconnect backoff");
            (self.sleeper)(Duration::from_secs(pause));
            waited += pause;

            match self.transport.reconnect() {
                Ok(()) => {
                    info!(endpoint = %self.transport.endpoint(), "transport reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    delay = (delay * 2).min(self.config.reconnect_cap_secs.max(1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{MockTransport, WorkerTick};

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            poll_interval_secs: 1,
            max_wait_secs: 100,
            settle_secs: 1,
            reconnect_base_secs: 1,
            reconnect_cap_secs: 4,
            reconnect_ceiling_secs: 10,
            ..Default::default()
        }
    }

    fn spec() -> RunSpec {
        RunSpec {
            session_name: "sluice-0001".to_string(),
            command: "hashcat -m 100 -a 3 /srv/sluice/chunk.txt ?a?a?a".to_string(),
            log_path: "/srv/sluice/sluice-0001.log".to_string(),
            artifact_path: "/srv/sluice/sluice-0001.pot".to_string(),
            process_pattern: "hashcat".to_string(),
        }
    }

    fn executor(transport: MockTransport) -> RemoteExecutor<MockTransport> {
        RemoteExecutor::new(transport, fast_config()).with_sleeper(Box::new(|_| {}))
    }

    #[test]
    fn test_run_to_exhausted() {
        // Pre-launch tick first, then running, then done
        let transport = MockTransport::new(vec![
            WorkerTick::default(),
            WorkerTick::running(""),
            WorkerTick::running("Progress: 10/100"),
            WorkerTick::finished("Status...........: Exhausted"),
        ]);
        let mut executor = executor(transport.clone());

        let outcome = executor.run(&spec()).unwrap();
        assert_eq!(outcome.terminal, TerminalStatus::Exhausted);
        assert!(!outcome.resumed);
        assert_eq!(transport.launches(), 1);
    }

    #[test]
    fn test_resume_does_not_relaunch() {
        let transport = MockTransport::new(vec![
            WorkerTick::running("Progress: 50/100"),
            WorkerTick::finished("Status...........: Cracked"),
        ]);
        let mut executor = executor(transport.clone());

        let outcome = executor.run(&spec()).unwrap();
        assert_eq!(outcome.terminal, TerminalStatus::Cracked);
        assert!(outcome.resumed);
        assert_eq!(transport.launches(), 0);
    }

    #[test]
    fn test_tentative_stop_needs_two_confirmations() {
        // One all-negative reading is ignored; the session reappears
        let transport = MockTransport::new(vec![
            WorkerTick::default(),
            WorkerTick::running(""),
            WorkerTick::default(), // blip: everything negative, no terminal
            WorkerTick::running("Progress: 99/100"),
            WorkerTick::finished("Status...........: Exhausted"),
        ]);
        let mut executor = executor(transport);

        let outcome = executor.run(&spec()).unwrap();
        assert_eq!(outcome.terminal, TerminalStatus::Exhausted);
    }

    #[test]
    fn test_two_confirmations_is_unexpected_stop() {
        let transport = MockTransport::new(vec![
            WorkerTick::default(),
            WorkerTick::running(""),
            WorkerTick {
                process_alive: false,
                session_alive: false,
                log: "last write\n".to_string(),
            },
        ]);
        let mut executor = executor(transport);

        let err = executor.run(&spec()).unwrap_err();
        match err {
            SluiceError::UnexpectedStop { session, log_tail } => {
                assert_eq!(session, "sluice-0001");
                assert!(log_tail.contains("last write"));
            }
            other => panic!("expected UnexpectedStop, got {other}"),
        }
    }

    #[test]
    fn test_launch_failure_attaches_log() {
        // Session never appears after launch and log shows an error
        let transport = MockTransport::new(vec![WorkerTick {
            process_alive: false,
            session_alive: false,
            log: "hashcat: command not found\n".to_string(),
        }]);
        let mut executor = executor(transport);

        let err = executor.run(&spec()).unwrap_err();
        match err {
            SluiceError::LaunchFailed { log_tail, .. } => {
                assert!(log_tail.contains("command not found"));
            }
            other => panic!("expected LaunchFailed, got {other}"),
        }
    }

    #[test]
    fn test_fast_run_finishes_before_first_poll() {
        // Terminal status already present at the startup check
        let transport = MockTransport::new(vec![WorkerTick::finished(
            "Status...........: Cracked",
        )]);
        let mut executor = executor(transport);

        let outcome = executor.run(&spec()).unwrap();
        assert_eq!(outcome.terminal, TerminalStatus::Cracked);
    }

    #[test]
    fn test_completion_timeout_leaves_session() {
        let transport = MockTransport::new(vec![WorkerTick::running("Progress: 1/1000000")]);
        let mut executor = RemoteExecutor::new(
            transport.clone(),
            ExecutorConfig {
                poll_interval_secs: 10,
                max_wait_secs: 30,
                settle_secs: 0,
                ..fast_config()
            },
        )
        .with_sleeper(Box::new(|_| {}));

        let err = executor.run(&spec()).unwrap_err();
        assert!(matches!(err, SluiceError::CompletionTimeout { .. }));
        assert_eq!(transport.kills(), 0);
    }

    #[test]
    fn test_transport_blip_reconnects_and_continues() {
        let transport = MockTransport::new(vec![
            WorkerTick::running(""),
            WorkerTick::running(""),
            WorkerTick::finished("Status...........: Exhausted"),
        ]);
        transport.fail_next_execs(1);
        let mut executor = executor(transport.clone());

        let outcome = executor.run(&spec()).unwrap();
        assert_eq!(outcome.terminal, TerminalStatus::Exhausted);
        assert_eq!(transport.reconnects(), 1);
    }

    #[test]
    fn test_reconnect_ceiling_is_connection_lost() {
        let transport = MockTransport::new(vec![WorkerTick::running("")]);
        transport.fail_next_execs(1);
        transport.fail_next_reconnects(100);
        let mut executor = executor(transport);

        let err = executor.run(&spec()).unwrap_err();
        assert!(matches!(err, SluiceError::ConnectionLost { .. }));
    }

    #[test]
    fn test_status_mapping() {
        let transport = MockTransport::new(vec![WorkerTick::running("")]);
        let mut exec1 = executor(transport);
        assert_eq!(
            exec1
                .status("sluice-0001", "/srv/sluice/s.log", "hashcat")
                .unwrap(),
            SessionStatus::Running
        );

        let transport = MockTransport::new(vec![WorkerTick {
            process_alive: false,
            session_alive: true,
            log: String::new(),
        }]);
        let mut exec2 = executor(transport);
        assert_eq!(
            exec2
                .status("sluice-0001", "/srv/sluice/s.log", "hashcat")
                .unwrap(),
            SessionStatus::Idle
        );

        let transport = MockTransport::new(vec![WorkerTick::finished(
            "Status...........: Exhausted",
        )]);
        let mut exec3 = executor(transport);
        assert_eq!(
            exec3
                .status("sluice-0001", "/srv/sluice/s.log", "hashcat")
                .unwrap(),
            SessionStatus::Completed
        );

        let transport = MockTransport::new(vec![WorkerTick::default()]);
        let mut exec4 = executor(transport);
        assert_eq!(
            exec4
                .status("sluice-0001", "/srv/sluice/s.log", "hashcat")
                .unwrap(),
            SessionStatus::Unknown
        );
    }
}
