//! Build a `.tar.gz` of the included project files.
//!
//! Files are first copied into a temporary staging directory so the project
//! tree is never touched, then the staging copy is compressed under a single
//! top-level directory named after the project. The staging directory is
//! removed on every exit path.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::copier::{count_selected, stage_selected};
use crate::error::DeployError;
use crate::ignore::{IgnoreConfig, IgnoreRuleStore};
use crate::progress::{bracketed, ProgressEvent, ProgressSink, Stage};
use crate::selector::{MatchPolicy, SelectionContext};

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// A freshly written archive on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    /// Location of the `.tar.gz`
    pub path: PathBuf,
    /// Top-level directory inside the archive
    pub project_name: String,
    /// Number of files packed
    pub file_count: u64,
    /// Uncompressed size of the packed files
    pub bytes: u64,
}

impl BuiltArchive {
    /// Archive file name without its directory
    pub fn file_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => archive_file_name(&self.project_name),
        }
    }
}

/// `<project>.tar.gz`
pub fn archive_file_name(project_name: &str) -> String {
    format!("{project_name}.{ARCHIVE_EXTENSION}")
}

/// Canonical project root plus its base name
pub fn resolve_project_root(project_root: &Path) -> Result<(PathBuf, String), DeployError> {
    let root = project_root
        .canonicalize()
        .map_err(|_| DeployError::ProjectRootNotFound {
            path: project_root.to_path_buf(),
        })?;

    if !root.is_dir() {
        return Err(DeployError::InvalidProjectRoot {
            path: root,
            reason: "not a directory",
        });
    }

    let Some(name) = root.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        return Err(DeployError::InvalidProjectRoot {
            path: root,
            reason: "no usable directory name",
        });
    };

    Ok((root, name))
}

/// Packages one project directory
#[derive(Debug, Clone)]
pub struct ArchiveBuilder<'a> {
    ignore: &'a IgnoreConfig,
    output: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    policies: Vec<MatchPolicy>,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(ignore: &'a IgnoreConfig) -> Self {
        Self {
            ignore,
            output: None,
            output_dir: None,
            policies: MatchPolicy::ALL.to_vec(),
        }
    }

    /// Write the archive to exactly this path
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Write `<project>.tar.gz` into this directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn policies(mut self, policies: &[MatchPolicy]) -> Self {
        self.policies = policies.to_vec();
        self
    }

    /// Selection state for `root`, built from scratch
    pub fn selection_context(&self, root: &Path) -> SelectionContext {
        let mut store = IgnoreRuleStore::from_config(self.ignore);
        store.collect_from_tree(root);
        debug!(rules = store.len(), root = %root.display(), "collected ignore rules");
        SelectionContext::compile(root, &store).with_policies(&self.policies)
    }

    fn output_path(&self, project_name: &str) -> PathBuf {
        match (&self.output, &self.output_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join(archive_file_name(project_name)),
            (None, None) => PathBuf::from(archive_file_name(project_name)),
        }
    }

    /// Collect rules, stage included files and compress them.
    pub fn build(
        &self,
        project_root: &Path,
        cancel: &CancelToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<BuiltArchive, DeployError> {
        let (root, project_name) = resolve_project_root(project_root)?;
        let output = self.output_path(&project_name);

        let ctx = bracketed(progress, Stage::CollectingRules, || {
            let mut ctx = self.selection_context(&root);
            // A previous archive written inside the project must not be re-packed
            ctx.exclude_path(absolute(&output));
            Ok::<_, DeployError>(ctx)
        })?;

        progress.report(ProgressEvent::new(Stage::CountingFiles, 0, 0));
        let total = count_selected(&ctx);
        progress.report(ProgressEvent::new(Stage::CountingFiles, total, total));

        let staging = tempfile::Builder::new()
            .prefix("deploy-stage-")
            .tempdir()
            .map_err(|source| DeployError::StagingFailed { source })?;
        let stage_root = staging.path().join(&project_name);
        fs::create_dir_all(&stage_root).map_err(|source| DeployError::CreateDirFailed {
            path: stage_root.clone(),
            source,
        })?;

        let (file_count, bytes) = stage_selected(&ctx, &stage_root, total, cancel, progress)?;
        cancel.check()?;

        bracketed(progress, Stage::BuildingArchive, || {
            compress(&stage_root, &output, &project_name)
        })?;

        if let Err(e) = staging.close() {
            warn!(error = %e, "failed to remove staging directory");
        }

        info!(
            archive = %output.display(),
            files = file_count,
            bytes,
            "archive built"
        );

        Ok(BuiltArchive {
            path: output,
            project_name,
            file_count,
            bytes,
        })
    }
}

/// Write `src_dir` as `<top_level>/...` into a gzip-compressed tar at `output`.
///
/// A partially written archive is removed on failure.
pub fn compress(src_dir: &Path, output: &Path, top_level: &str) -> Result<(), DeployError> {
    let result = write_tar_gz(src_dir, output, top_level);
    if result.is_err() && output.exists() {
        if let Err(e) = fs::remove_file(output) {
            warn!(path = %output.display(), error = %e, "failed to remove partial archive");
        }
    }
    result.map_err(|source| DeployError::ArchiveFailed {
        path: output.to_path_buf(),
        source,
    })
}

fn write_tar_gz(src_dir: &Path, output: &Path, top_level: &str) -> std::io::Result<()> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.append_dir_all(top_level, src_dir)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// Absolute, symlink-resolved form of a path that may not exist yet
fn absolute(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}
