//! Build → upload → remote extract, as one operation.
//!
//! Each phase opens its own short-lived transport session. The local archive
//! is owned by a drop guard, so it is removed whether the pipeline finishes
//! or fails at any step after the archive was written.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveBuilder, BuiltArchive};
use crate::cancel::CancelToken;
use crate::error::DeployError;
use crate::ignore::IgnoreConfig;
use crate::progress::{bracketed, ProgressEvent, ProgressSink, Stage};
use crate::transport::{
    remote_join, shell_quote, RemoteSession, RemoteTarget, RemoteTransport,
};

/// Where a pipeline run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Building,
    Uploading,
    Extracting,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Building => "building",
            PipelineState::Uploading => "uploading",
            PipelineState::Extracting => "extracting",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// Timeouts and local paths used by the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bound on establishing each upload/extract connection
    pub connect_timeout: Duration,
    /// Bound on the connection probe in [`DeploymentPipeline::test_connection`]
    pub test_timeout: Duration,
    /// Overall deadline for one `upload_and_extract` (None = unbounded)
    pub deadline: Option<Duration>,
    /// Directory the local archive is written to
    pub archive_dir: PathBuf,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            test_timeout: Duration::from_secs(10),
            deadline: None,
            archive_dir: env::temp_dir(),
        }
    }
}

/// Summary of a deployment target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub host: String,
    pub username: String,
    pub port: u16,
    pub reachable: bool,
}

/// Deletes the local archive when dropped
struct LocalArchive(PathBuf);

impl Drop for LocalArchive {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed local archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove local archive"),
        }
    }
}

/// Remote shell command that unpacks `archive` inside `dir` and removes it
pub fn extract_command(dir: &str, archive: &str) -> String {
    let archive = shell_quote(archive);
    format!("cd {} && tar -xzf {archive} && rm -f {archive}", shell_quote(dir))
}

/// Deploys project snapshots to one remote target
pub struct DeploymentPipeline<T: RemoteTransport> {
    transport: T,
    target: RemoteTarget,
    ignore: IgnoreConfig,
    options: PipelineOptions,
    state: PipelineState,
}

impl<T: RemoteTransport> DeploymentPipeline<T> {
    pub fn new(transport: T, target: RemoteTarget) -> Self {
        Self {
            transport,
            target,
            ignore: IgnoreConfig::default(),
            options: PipelineOptions::default(),
            state: PipelineState::Idle,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    /// Extra ignore patterns applied to every packaging run
    pub fn add_ignore_patterns<S: Into<String>>(&mut self, patterns: impl IntoIterator<Item = S>) {
        for pattern in patterns {
            let pattern = pattern.into();
            if !self.ignore.patterns.contains(&pattern) {
                self.ignore.patterns.push(pattern);
            }
        }
    }

    /// Explicit paths excluded from every packaging run
    pub fn add_ignore_paths<P: Into<PathBuf>>(&mut self, paths: impl IntoIterator<Item = P>) {
        for path in paths {
            let path = path.into();
            if !self.ignore.paths.contains(&path) {
                self.ignore.paths.push(path);
            }
        }
    }

    pub fn ignore(&self) -> &IgnoreConfig {
        &self.ignore
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Probe reachability and credentials. Never mutates remote state.
    pub fn test_connection(&self) -> bool {
        match self
            .transport
            .connect(&self.target, self.options.test_timeout, &CancelToken::new())
        {
            Ok(_session) => true,
            Err(e) => {
                debug!(remote = %self.target, error = %e, "connection test failed");
                false
            }
        }
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            host: self.target.host.clone(),
            username: self.target.username.clone(),
            port: self.target.port,
            reachable: self.test_connection(),
        }
    }

    /// Package `project_root` into the archive directory
    pub fn build_archive(
        &self,
        project_root: &Path,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<BuiltArchive, DeployError> {
        ArchiveBuilder::new(&self.ignore)
            .output_dir(&self.options.archive_dir)
            .build(project_root, cancel, progress)
    }

    /// Upload one local file. Defaults to `<home>/<file name>` remotely.
    pub fn upload_file(
        &self,
        local: &Path,
        remote: Option<&str>,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, DeployError> {
        if !local.is_file() {
            return Err(DeployError::LocalFileMissing {
                path: local.to_path_buf(),
            });
        }

        let mut session = self.connect(cancel, progress)?;
        let remote = match remote {
            Some(path) => path.to_string(),
            None => {
                let name = local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                remote_join(&session.home_dir()?, &name)
            }
        };
        send(&mut session, local, &remote, cancel, progress)?;

        Ok(remote)
    }

    /// Package, upload and unpack `project_root`; returns the remote project path.
    ///
    /// `remote_dir` defaults to the login user's home directory. Any error
    /// leaves the pipeline in [`PipelineState::Failed`] with no local archive.
    pub fn upload_and_extract(
        &mut self,
        project_root: &Path,
        remote_dir: Option<&str>,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, DeployError> {
        let cancel = match self.options.deadline {
            Some(deadline) => cancel.with_timeout(deadline),
            None => cancel.clone(),
        };

        self.state = PipelineState::Idle;
        match self.run(project_root, remote_dir, &cancel, progress) {
            Ok(remote_path) => {
                self.state = PipelineState::Done;
                info!(remote = %self.target, path = %remote_path, "deployment complete");
                Ok(remote_path)
            }
            Err(e) => {
                error!(remote = %self.target, stage = self.state.as_str(), error = %e, "deployment failed");
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        project_root: &Path,
        remote_dir: Option<&str>,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<String, DeployError> {
        self.state = PipelineState::Building;
        let archive = self.build_archive(project_root, cancel, progress)?;
        let _local = LocalArchive(archive.path.clone());
        let archive_name = archive.file_name();

        self.state = PipelineState::Uploading;
        let remote_dir = {
            let mut session = self.connect(cancel, progress)?;
            let remote_dir = match remote_dir {
                Some(dir) => dir.to_string(),
                None => session.home_dir()?,
            };
            let remote_archive = remote_join(&remote_dir, &archive_name);
            send(&mut session, &archive.path, &remote_archive, cancel, progress)?;
            remote_dir
        };

        self.state = PipelineState::Extracting;
        bracketed(progress, Stage::Extracting, || -> Result<(), DeployError> {
            let mut session =
                self.transport
                    .connect(&self.target, self.options.connect_timeout, cancel)?;
            let output = session.run_command(&extract_command(&remote_dir, &archive_name), cancel)?;
            if !output.success() {
                return Err(DeployError::ExtractionFailed {
                    code: output.exit_status,
                    stderr: output.stderr_lossy(),
                });
            }
            Ok(())
        })?;

        Ok(remote_join(&remote_dir, &archive.project_name))
    }

    fn connect(
        &self,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<T::Session, DeployError> {
        bracketed(progress, Stage::Connecting, || {
            self.transport
                .connect(&self.target, self.options.connect_timeout, cancel)
                .map_err(DeployError::from)
        })
    }
}

fn send<S: RemoteSession>(
    session: &mut S,
    local: &Path,
    remote: &str,
    cancel: &CancelToken,
    progress: &mut dyn ProgressSink,
) -> Result<u64, DeployError> {
    let mut on_bytes =
        |sent: u64, total: u64| progress.report(ProgressEvent::new(Stage::Uploading, sent, total));
    let sent = session.send_file(local, remote, &mut on_bytes, cancel)?;
    info!(remote, bytes = sent, "upload complete");
    Ok(sent)
}
