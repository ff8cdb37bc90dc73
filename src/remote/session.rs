/*!
 * Detached worker sessions and log grammar
 *
 * Attacks run inside a named tmux session on the worker, so the run
 * outlives the SSH connection that started it. Completion is read from
 * the worker's own log: a line starting with `Status: Exhausted` or
 * `Status: Cracked` marks a terminal state.
 */

use tracing::debug;

use super::transport::{Transport, TransportResult};

/// Terminal states a worker log can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// The keyspace was fully searched
    Exhausted,
    /// Every hash in the list was recovered
    Cracked,
}

/// Coarse session state reported by `status()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The worker process is running
    Running,
    /// The session exists but no worker process was found
    Idle,
    /// No process, no session, and the log shows a terminal state
    Completed,
    /// None of the signals gave a usable answer
    Unknown,
}

/// Scan log text for the last terminal-status marker
pub fn parse_terminal_status(log: &str) -> Option<TerminalStatus> {
    let mut result = None;
    for line in log.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("Status") {
            let rest = rest.trim_start_matches(|c: char| c == ':' || c == '.' || c == ' ');
            if rest.starts_with("Exhausted") {
                result = Some(TerminalStatus::Exhausted);
            } else if rest.starts_with("Cracked") {
                result = Some(TerminalStatus::Cracked);
            }
        }
    }
    result
}

/// Extract the last progress line from log text, if any
pub fn last_progress_line(log: &str) -> Option<String> {
    log.lines()
        .rev()
        .find(|l| l.trim_start().starts_with("Progress"))
        .map(|l| l.trim().to_string())
}

/// Shell-quote a string for safe embedding in single quotes
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Remote-side handle for one named detached session
#[derive(Debug, Clone)]
pub struct DetachedSession {
    pub name: String,
    /// Absolute remote path of the command's log file
    pub log_path: String,
}

impl DetachedSession {
    pub fn new(name: impl Into<String>, log_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_path: log_path.into(),
        }
    }

    /// Whether the detached session exists on the worker
    pub fn exists<T: Transport>(&self, transport: &mut T) -> TransportResult<bool> {
        let output = transport.exec(&format!(
            "tmux has-session -t {} 2>/dev/null",
            shell_quote(&self.name)
        ))?;
        Ok(output.success())
    }

    /// Launch a command inside a fresh detached session, with stdout
    /// and stderr appended to the session log
    pub fn launch<T: Transport>(&self, transport: &mut T, command: &str) -> TransportResult<bool> {
        let wrapped = format!("{} >> {} 2>&1", command, shell_quote(&self.log_path));
        let launch = format!(
            "tmux new-session -d -s {} {}",
            shell_quote(&self.name),
            shell_quote(&wrapped)
        );
        debug!(session = %self.name, "launching detached session");
        let output = transport.exec(&launch)?;
        Ok(output.success())
    }

    /// Kill the detached session (the operator's explicit choice; the
    /// executor never does this on timeout)
    pub fn kill<T: Transport>(&self, transport: &mut T) -> TransportResult<bool> {
        let output = transport.exec(&format!(
            "tmux kill-session -t {} 2>/dev/null",
            shell_quote(&self.name)
        ))?;
        Ok(output.success())
    }

    /// Fetch the last lines of the session log; missing logs read as
    /// empty (the command may not have produced output yet)
    pub fn log_tail<T: Transport>(&self, transport: &mut T, lines: usize) -> TransportResult<String> {
        let output = transport.exec(&format!(
            "tail -n {} {} 2>/dev/null",
            lines,
            shell_quote(&self.log_path)
        ))?;
        Ok(output.stdout)
    }
}

/// Whether any worker process matching the pattern is alive
pub fn worker_running<T: Transport>(
    transport: &mut T,
    process_pattern: &str,
) -> TransportResult<bool> {
    let output = transport.exec(&format!(
        "pgrep -f {} >/dev/null 2>&1",
        shell_quote(process_pattern)
    ))?;
    Ok(output.success())
}

/// Size in bytes of a remote file, or `None` when absent
pub fn remote_file_size<T: Transport>(
    transport: &mut T,
    path: &str,
) -> TransportResult<Option<u64>> {
    let output = transport.exec(&format!(
        "stat -c %s {} 2>/dev/null || stat -f %z {} 2>/dev/null",
        shell_quote(path),
        shell_quote(path)
    ))?;
    if !output.success() {
        return Ok(None);
    }
    Ok(output.stdout_trimmed().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terminal_status() {
        assert_eq!(
            parse_terminal_status("Session..: sluice\nStatus...........: Exhausted\n"),
            Some(TerminalStatus::Exhausted)
        );
        assert_eq!(
            parse_terminal_status("Status...........: Cracked"),
            Some(TerminalStatus::Cracked)
        );
        assert_eq!(
            parse_terminal_status("Status: Running\nProgress: 5%"),
            None
        );
        assert_eq!(parse_terminal_status(""), None);

        // The last marker wins when a resumed log contains several
        let log = "Status...........: Running\nStatus...........: Exhausted\n";
        assert_eq!(parse_terminal_status(log), Some(TerminalStatus::Exhausted));
    }

    #[test]
    fn test_last_progress_line() {
        let log = "Progress.........: 1000/9999\nSpeed: fast\nProgress.........: 5000/9999\n";
        assert_eq!(
            last_progress_line(log),
            Some("Progress.........: 5000/9999".to_string())
        );
        assert_eq!(last_progress_line("no progress here"), None);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("simple"), "'simple'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
