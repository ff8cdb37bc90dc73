/*!
 * Remote transport abstraction
 *
 * The executor talks to the worker through the `Transport` trait so
 * the supervision logic can be exercised against a mock. The real
 * implementation runs commands and moves files over SSH.
 */

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use secrecy::ExposeSecret;
use ssh2::Session;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RemoteConfig;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Transport-layer failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Authentication failed for {username}@{endpoint}: {reason}")]
    AuthenticationFailed {
        username: String,
        endpoint: String,
        reason: String,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Remote command failed to execute: {0}")]
    Exec(String),

    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Check if this error is worth a reconnect-and-retry
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. } => true,
            TransportError::NotConnected => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionRefused
            ),
            TransportError::Ssh(_) => true,
            TransportError::AuthenticationFailed { .. } => false,
            TransportError::Exec(_) => false,
            TransportError::Transfer { .. } => false,
        }
    }
}

/// Captured output of one remote command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Synchronous command-and-file channel to the worker
pub trait Transport {
    /// Run a command on the worker and capture its output
    fn exec(&mut self, command: &str) -> TransportResult<ExecOutput>;

    /// Upload a local file to an absolute remote path
    fn upload(&mut self, local: &Path, remote: &str) -> TransportResult<u64>;

    /// Download an absolute remote path to a local file
    fn download(&mut self, remote: &str, local: &Path) -> TransportResult<u64>;

    /// Tear down and re-establish the connection
    fn reconnect(&mut self) -> TransportResult<()>;

    /// Human-readable endpoint for log and error messages
    fn endpoint(&self) -> String;
}

/// SSH transport over `ssh2`
///
/// Authentication uses the configured private key file (with optional
/// passphrase) or falls back to the local SSH agent.
pub struct SshTransport {
    config: RemoteConfig,
    session: Option<Session>,
}

impl SshTransport {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Connect eagerly; later `exec` calls reuse the session
    pub fn connect(&mut self) -> TransportResult<()> {
        let endpoint = self.endpoint();
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::ConnectionFailed {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        stream
            .set_read_timeout(Some(Duration::from_secs(self.config.connect_timeout_secs)))
            .ok();
        stream
            .set_write_timeout(Some(Duration::from_secs(self.config.connect_timeout_secs)))
            .ok();

        let mut session = Session::new().map_err(TransportError::Ssh)?;
        session.set_tcp_stream(stream);
        session.set_timeout((self.config.connect_timeout_secs * 1000) as u32);
        session
            .handshake()
            .map_err(|e| TransportError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        match self.config.key_file {
            Some(ref key_path) => {
                let passphrase = self
                    .config
                    .key_passphrase
                    .as_ref()
                    .map(|p| p.expose_secret().to_string());
                session
                    .userauth_pubkey_file(
                        &self.config.username,
                        None,
                        key_path,
                        passphrase.as_deref(),
                    )
                    .map_err(|e| TransportError::AuthenticationFailed {
                        username: self.config.username.clone(),
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })?;
            }
            None => {
                session
                    .userauth_agent(&self.config.username)
                    .map_err(|e| TransportError::AuthenticationFailed {
                        username: self.config.username.clone(),
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }

        if !session.authenticated() {
            return Err(TransportError::AuthenticationFailed {
                username: self.config.username.clone(),
                endpoint,
                reason: "authentication did not complete".to_string(),
            });
        }

        info!(endpoint = %self.endpoint(), "ssh session established");
        self.session = Some(session);
        Ok(())
    }

    fn session(&mut self) -> TransportResult<&Session> {
        if self.session.is_none() {
            self.connect()?;
        }
        self.session.as_ref().ok_or(TransportError::NotConnected)
    }
}

impl Transport for SshTransport {
    fn exec(&mut self, command: &str) -> TransportResult<ExecOutput> {
        let session = self.session()?;
        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;
        debug!(command, exit_code, "remote command finished");

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn upload(&mut self, local: &Path, remote: &str) -> TransportResult<u64> {
        let data = std::fs::read(local).map_err(|e| TransportError::Transfer {
            path: local.display().to_string(),
            reason: e.to_string(),
        })?;
        let session = self.session()?;
        let sftp = session.sftp()?;
        let mut file =
            sftp.create(Path::new(remote))
                .map_err(|e| TransportError::Transfer {
                    path: remote.to_string(),
                    reason: e.to_string(),
                })?;
        file.write_all(&data).map_err(|e| TransportError::Transfer {
            path: remote.to_string(),
            reason: e.to_string(),
        })?;
        debug!(local = %local.display(), remote, bytes = data.len(), "uploaded");
        Ok(data.len() as u64)
    }

    fn download(&mut self, remote: &str, local: &Path) -> TransportResult<u64> {
        let session = self.session()?;
        let sftp = session.sftp()?;
        let mut file = sftp
            .open(Path::new(remote))
            .map_err(|e| TransportError::Transfer {
                path: remote.to_string(),
                reason: e.to_string(),
            })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| TransportError::Transfer {
                path: remote.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, &data).map_err(|e| TransportError::Transfer {
            path: local.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(remote, local = %local.display(), bytes = data.len(), "downloaded");
        Ok(data.len() as u64)
    }

    fn reconnect(&mut self) -> TransportResult<()> {
        self.session = None;
        self.connect()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        )
    }
}
