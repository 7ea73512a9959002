//! Remote transport capability used by the deployment pipeline.
//!
//! The pipeline only talks to a remote host through [`RemoteTransport`] and
//! [`RemoteSession`]; [`crate::ssh::SshTransport`] is the production
//! implementation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cancel::{CancelToken, Interrupted};

/// How to authenticate against the remote host
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Keys held by a running ssh-agent
    Agent,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

/// Identity of one deployment target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub username: String,
    pub credential: Credential,
    pub port: u16,
}

impl RemoteTarget {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            credential,
            port: Self::DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    #[inline]
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }
}

/// Transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("SSH {context} failed")]
    Protocol {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens sessions to a remote host
pub trait RemoteTransport {
    type Session: RemoteSession;

    /// Connect and authenticate. `timeout` bounds connection establishment.
    fn connect(
        &self,
        target: &RemoteTarget,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self::Session, TransportError>;
}

/// One live, authenticated connection. Dropping it closes the connection.
pub trait RemoteSession {
    /// Absolute path of the login user's home directory
    fn home_dir(&mut self) -> Result<String, TransportError>;

    /// Copy `local` to `remote`, reporting (bytes_sent, bytes_total) after
    /// each chunk. Returns the number of bytes sent.
    fn send_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<u64, TransportError>;

    /// Run `command` through the remote shell and wait for it to exit
    fn run_command(
        &mut self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, TransportError>;
}

/// Quote `s` as a single POSIX shell word
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+:@%=".contains(&b))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Join a remote directory and a file name with exactly one `/`
pub fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
