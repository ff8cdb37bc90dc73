/*!
 * Mock transport for testing
 *
 * Simulates a worker host in memory: a scripted timeline of
 * process/session/log signals, a small remote filesystem, and optional
 * injected connection failures. Supervision logic can then be tested
 * without a real SSH endpoint.
 */

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::transport::{ExecOutput, Transport, TransportError, TransportResult};

/// Worker signal state for one poll round
#[derive(Debug, Clone, Default)]
pub struct WorkerTick {
    pub process_alive: bool,
    pub session_alive: bool,
    /// Full session log content visible at this tick
    pub log: String,
}

impl WorkerTick {
    pub fn running(log: &str) -> Self {
        Self {
            process_alive: true,
            session_alive: true,
            log: log.to_string(),
        }
    }

    pub fn finished(log: &str) -> Self {
        Self {
            process_alive: false,
            session_alive: false,
            log: log.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    ticks: Vec<WorkerTick>,
    tick: usize,
    calls: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    /// Remaining exec calls that fail with a connection error
    fail_execs: usize,
    /// When set, every exec after this many successful ones fails
    fail_after_execs: Option<usize>,
    /// Remaining reconnect attempts that fail
    fail_reconnects: usize,
    reconnects: usize,
    launches: usize,
    kills: usize,
    /// Canned `df -P -k` output
    df_output: Option<String>,
}

impl MockState {
    fn current_tick(&self) -> WorkerTick {
        if self.ticks.is_empty() {
            return WorkerTick::default();
        }
        let index = self.tick.min(self.ticks.len() - 1);
        self.ticks[index].clone()
    }
}

/// Scripted transport; clones share one worker state
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(ticks: Vec<WorkerTick>) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().ticks = ticks;
        transport
    }

    /// Place a file on the simulated remote filesystem
    pub fn add_remote_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Make the next `n` exec calls fail with a connection error
    pub fn fail_next_execs(&self, n: usize) {
        self.state.lock().unwrap().fail_execs = n;
    }

    /// Let `n` exec calls succeed, then fail every one after that
    /// (simulates the transport going down mid-run)
    pub fn fail_after_execs(&self, n: usize) {
        self.state.lock().unwrap().fail_after_execs = Some(n);
    }

    /// Make the next `n` reconnect attempts fail
    pub fn fail_next_reconnects(&self, n: usize) {
        self.state.lock().unwrap().fail_reconnects = n;
    }

    /// Canned output for disk-headroom queries
    pub fn set_df_output(&self, output: &str) {
        self.state.lock().unwrap().df_output = Some(output.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn kills(&self) -> usize {
        self.state.lock().unwrap().kills
    }

    pub fn reconnects(&self) -> usize {
        self.state.lock().unwrap().reconnects
    }

    fn quoted_arg(command: &str) -> Option<String> {
        let start = command.find('\'')? + 1;
        let end = command[start..].find('\'')? + start;
        Some(command[start..end].to_string())
    }

    fn ok() -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            ..Default::default()
        }
    }

    fn failed() -> ExecOutput {
        ExecOutput {
            exit_code: 1,
            ..Default::default()
        }
    }
}

impl Transport for MockTransport {
    fn exec(&mut self, command: &str) -> TransportResult<ExecOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.to_string());

        if state.fail_execs > 0 {
            state.fail_execs -= 1;
            return Err(TransportError::ConnectionFailed {
                endpoint: "mock".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        match state.fail_after_execs {
            Some(0) => {
                return Err(TransportError::ConnectionFailed {
                    endpoint: "mock".to_string(),
                    reason: "injected mid-run disconnect".to_string(),
                });
            }
            Some(ref mut remaining) => *remaining -= 1,
            None => {}
        }

        let tick = state.current_tick();
        if command.starts_with("pgrep -f") {
            return Ok(if tick.process_alive {
                Self::ok()
            } else {
                Self::failed()
            });
        }
        if command.starts_with("tmux has-session") {
            return Ok(if tick.session_alive {
                Self::ok()
            } else {
                Self::failed()
            });
        }
        if command.starts_with("tmux new-session") {
            state.launches += 1;
            // The timeline's first tick is the pre-launch state
            if state.tick + 1 < state.ticks.len() {
                state.tick += 1;
            }
            return Ok(Self::ok());
        }
        if command.starts_with("tmux kill-session") {
            state.kills += 1;
            return Ok(Self::ok());
        }
        if command.starts_with("tail -n") {
            // Reading the log closes one poll round
            let log = tick.log.clone();
            if state.tick + 1 < state.ticks.len() {
                state.tick += 1;
            }
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: log,
                ..Default::default()
            });
        }
        if command.starts_with("stat ") {
            if let Some(path) = Self::quoted_arg(command) {
                if let Some(data) = state.files.get(&path) {
                    return Ok(ExecOutput {
                        exit_code: 0,
                        stdout: format!("{}\n", data.len()),
                        ..Default::default()
                    });
                }
            }
            return Ok(Self::failed());
        }
        if command.starts_with("df ") {
            if let Some(output) = state.df_output.clone() {
                return Ok(ExecOutput {
                    exit_code: 0,
                    stdout: output,
                    ..Default::default()
                });
            }
            return Ok(Self::failed());
        }

        // Unmodeled commands succeed silently
        Ok(Self::ok())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> TransportResult<u64> {
        let data = std::fs::read(local)?;
        let len = data.len() as u64;
        self.state
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), data);
        Ok(len)
    }

    fn download(&mut self, remote: &str, local: &Path) -> TransportResult<u64> {
        let data = self
            .state
            .lock()
            .unwrap()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::Transfer {
                path: remote.to_string(),
                reason: "no such remote file".to_string(),
            })?;
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, &data)?;
        Ok(data.len() as u64)
    }

    fn reconnect(&mut self) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reconnects > 0 {
            state.fail_reconnects -= 1;
            return Err(TransportError::ConnectionFailed {
                endpoint: "mock".to_string(),
                reason: "injected reconnect failure".to_string(),
            });
        }
        state.reconnects += 1;
        Ok(())
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::session::DetachedSession;

    #[test]
    fn test_scripted_signals_advance_on_log_read() {
        let mut transport = MockTransport::new(vec![
            WorkerTick::running("Progress: 1"),
            WorkerTick::finished("Status: Exhausted"),
        ]);
        let session = DetachedSession::new("sluice-test", "/srv/sluice/test.log");

        assert!(crate::remote::session::worker_running(&mut transport, "hashcat").unwrap());
        assert!(session.exists(&mut transport).unwrap());
        assert_eq!(session.log_tail(&mut transport, 50).unwrap(), "Progress: 1");

        // Next round sees the finished tick
        assert!(!crate::remote::session::worker_running(&mut transport, "hashcat").unwrap());
        assert!(!session.exists(&mut transport).unwrap());
        assert_eq!(
            session.log_tail(&mut transport, 50).unwrap(),
            "Status: Exhausted"
        );
    }

    #[test]
    fn test_injected_exec_failures() {
        let mut transport = MockTransport::new(vec![WorkerTick::running("")]);
        transport.fail_next_execs(1);

        assert!(transport.exec("pgrep -f 'hashcat'").is_err());
        assert!(transport.exec("pgrep -f 'hashcat'").is_ok());
    }

    #[test]
    fn test_remote_file_stat() {
        let mut transport = MockTransport::new(vec![WorkerTick::default()]);
        transport.add_remote_file("/srv/sluice/chunk.txt", b"abc\ndef\n");

        let output = transport.exec("stat -c %s '/srv/sluice/chunk.txt'").unwrap();
        assert_eq!(output.stdout_trimmed(), "8");

        let missing = transport.exec("stat -c %s '/srv/sluice/absent'").unwrap();
        assert!(!missing.success());
    }
}
