use std::fs;
use std::path::{Path, PathBuf};

use filetime::{set_file_times, FileTime};
use tracing::warn;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::DeployError;
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crate::selector::{is_system_artifact, SelectionContext};

/// ENOSPC on Unix
const ENOSPC: i32 = 28;

/// Included regular files under the selection root, in walk order
pub fn selected_files(ctx: &SelectionContext) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(ctx.root())
        .follow_links(true)
        .into_iter()
        // Never descend into VCS internals or caches
        .filter_entry(|e| e.depth() == 0 || !is_system_artifact(e.file_name()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(move |path| !ctx.should_ignore(path))
}

/// Number of files [`selected_files`] would yield
pub fn count_selected(ctx: &SelectionContext) -> u64 {
    selected_files(ctx).count() as u64
}

/// Copy a single file from src to dst
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, DeployError> {
    // Create parent directory if needed
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                if e.raw_os_error() == Some(ENOSPC) {
                    return DeployError::DiskFull {
                        path: parent.to_path_buf(),
                    };
                }
                DeployError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                }
            })?;
        }
    }

    let bytes = fs::copy(src, dst).map_err(|e| {
        if e.raw_os_error() == Some(ENOSPC) {
            return DeployError::DiskFull {
                path: dst.to_path_buf(),
            };
        }
        DeployError::CopyFailed {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: e,
        }
    })?;

    preserve_times(src, dst);
    Ok(bytes)
}

/// Carry access/modification times over so archive members keep them
fn preserve_times(src: &Path, dst: &Path) {
    let result = fs::metadata(src).and_then(|metadata| {
        set_file_times(
            dst,
            FileTime::from_last_access_time(&metadata),
            FileTime::from_last_modification_time(&metadata),
        )
    });
    if let Err(e) = result {
        warn!(path = %dst.display(), error = %e, "failed to preserve file times");
    }
}

/// Copy every included file into `dst`, mirroring the layout under the
/// selection root. Returns (files_copied, bytes_copied).
pub fn stage_selected(
    ctx: &SelectionContext,
    dst: &Path,
    total: u64,
    cancel: &CancelToken,
    progress: &mut dyn ProgressSink,
) -> Result<(u64, u64), DeployError> {
    let mut files_copied = 0u64;
    let mut bytes_copied = 0u64;

    for src_path in selected_files(ctx) {
        cancel.check()?;

        let relative = src_path.strip_prefix(ctx.root()).unwrap_or(&src_path);
        let dst_path = dst.join(relative);

        bytes_copied += copy_file(&src_path, &dst_path)?;
        files_copied += 1;
        // Files may appear between the counting and copying walks
        progress.report(ProgressEvent::new(
            Stage::CopyingFiles,
            files_copied,
            total.max(files_copied),
        ));
    }

    Ok((files_copied, bytes_copied))
}
