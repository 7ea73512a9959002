//! SSH implementation of the remote transport, backed by libssh2.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{ErrorCode, Session};
use tracing::{debug, warn};

use crate::cancel::{CancelToken, Interrupted};
use crate::transport::{
    CommandOutput, Credential, RemoteSession, RemoteTarget, RemoteTransport, TransportError,
};

/// Upload chunk size
const CHUNK_SIZE: usize = 32 * 1024;

/// `LIBSSH2_ERROR_TIMEOUT`
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

fn protocol(context: &'static str) -> impl FnOnce(ssh2::Error) -> TransportError {
    move |e| TransportError::Protocol {
        context,
        source: Box::new(e),
    }
}

/// libssh2 timeouts are in milliseconds; 0 means "no timeout"
fn timeout_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        Some(t) => u32::try_from(t.as_millis()).unwrap_or(u32::MAX).max(1),
        None => 0,
    }
}

/// libssh2 timed out on a blocking call
fn is_timeout(err: &TransportError) -> bool {
    match err {
        TransportError::Io(e) => matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock),
        TransportError::Protocol { source, .. } => source
            .downcast_ref::<ssh2::Error>()
            .is_some_and(|e| matches!(e.code(), ErrorCode::Session(code) if code == LIBSSH2_ERROR_TIMEOUT)),
        _ => false,
    }
}

/// Report a session timeout that fired because the deadline ran out as such
fn past_deadline(cancel: &CancelToken) -> impl Fn(TransportError) -> TransportError + '_ {
    move |err| {
        if cancel.remaining() == Some(Duration::ZERO) && is_timeout(&err) {
            TransportError::Interrupted(Interrupted::DeadlineExceeded)
        } else {
            err
        }
    }
}

/// Opens a fresh SSH connection per [`connect`](RemoteTransport::connect) call
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTransport;

impl SshTransport {
    pub fn new() -> Self {
        Self
    }

    /// Resolve on a helper thread so a stalled resolver cannot outlive `timeout`
    fn resolve(target: &RemoteTarget, timeout: Duration) -> Result<Vec<SocketAddr>, TransportError> {
        let (tx, rx) = mpsc::channel();
        let endpoint = (target.host.clone(), target.port);
        thread::spawn(move || {
            let addrs = endpoint
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<SocketAddr>>());
            let _ = tx.send(addrs);
        });

        let resolve_err = |source: io::Error| TransportError::Resolve {
            host: target.host.clone(),
            port: target.port,
            source,
        };
        match rx.recv_timeout(timeout) {
            Ok(Ok(addrs)) if !addrs.is_empty() => Ok(addrs),
            Ok(Ok(_)) => Err(resolve_err(io::Error::new(ErrorKind::NotFound, "no addresses"))),
            Ok(Err(source)) => Err(resolve_err(source)),
            Err(_) => Err(resolve_err(io::Error::new(
                ErrorKind::TimedOut,
                "name resolution timed out",
            ))),
        }
    }

    /// Dial each resolved address in turn; `timeout` bounds the whole attempt
    fn open_tcp(target: &RemoteTarget, timeout: Duration) -> Result<TcpStream, TransportError> {
        let deadline = Instant::now() + timeout;
        let addrs = Self::resolve(target, timeout)?;

        let mut last_err = None;
        for addr in &addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match TcpStream::connect_timeout(addr, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some((addr.to_string(), e));
                }
            }
        }

        let (addr, source) = last_err.unwrap_or_else(|| {
            (
                format!("{}:{}", target.host, target.port),
                io::Error::new(ErrorKind::TimedOut, "connect timed out"),
            )
        });
        Err(TransportError::Connect { addr, source })
    }

    fn authenticate(session: &Session, target: &RemoteTarget) -> Result<(), TransportError> {
        let user = target.username.as_str();
        let result = match &target.credential {
            Credential::Password(password) => session.userauth_password(user, password),
            Credential::KeyFile { path, passphrase } => {
                session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
            }
            Credential::Agent => session.userauth_agent(user),
        };

        if let Err(e) = result {
            debug!(error = %e, "authentication rejected");
        }
        if !session.authenticated() {
            return Err(TransportError::Auth {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }
        Ok(())
    }
}

impl RemoteTransport for SshTransport {
    type Session = SshSession;

    fn connect(
        &self,
        target: &RemoteTarget,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<SshSession, TransportError> {
        cancel.check()?;
        let tcp = Self::open_tcp(target, timeout)?;

        let mut session = Session::new().map_err(protocol("session setup"))?;
        session.set_timeout(timeout_millis(Some(timeout)));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(protocol("handshake"))?;
        Self::authenticate(&session, target)?;

        // Past establishment only the caller's deadline bounds blocking calls
        session.set_timeout(timeout_millis(cancel.remaining()));
        debug!(remote = %target, "ssh session established");

        Ok(SshSession { session })
    }
}

/// An authenticated libssh2 session; disconnects on drop
pub struct SshSession {
    session: Session,
}

impl RemoteSession for SshSession {
    fn home_dir(&mut self) -> Result<String, TransportError> {
        let sftp = self.session.sftp().map_err(protocol("sftp"))?;
        let home = sftp.realpath(Path::new(".")).map_err(protocol("realpath"))?;
        Ok(home.to_string_lossy().into_owned())
    }

    fn send_file(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<u64, TransportError> {
        self.upload(local, remote, progress, cancel)
            .map_err(past_deadline(cancel))
    }

    fn run_command(
        &mut self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, TransportError> {
        self.exec(command, cancel).map_err(past_deadline(cancel))
    }
}

impl SshSession {
    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<u64, TransportError> {
        let mut src = File::open(local)?;
        let total = src.metadata()?.len();

        let sftp = self.session.sftp().map_err(protocol("sftp"))?;
        let mut dst = sftp
            .create(Path::new(remote))
            .map_err(protocol("remote file create"))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        progress(sent, total);
        loop {
            cancel.check()?;
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
            sent += n as u64;
            progress(sent, total);
        }
        dst.flush()?;

        Ok(sent)
    }

    fn exec(
        &mut self,
        command: &str,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, TransportError> {
        cancel.check()?;
        self.session.set_timeout(timeout_millis(cancel.remaining()));

        let mut channel = self
            .session
            .channel_session()
            .map_err(protocol("channel open"))?;
        channel.exec(command).map_err(protocol("exec"))?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;

        channel.wait_close().map_err(protocol("channel close"))?;
        let exit_status = channel.exit_status().map_err(protocol("exit status"))?;

        Ok(CommandOutput {
            exit_status,
            stdout,
            stderr,
        })
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            warn!(error = %e, "ssh disconnect failed");
        }
    }
}
