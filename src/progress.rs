//! Progress reporting contract shared by packaging and transfer stages.

use std::fmt;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CollectingRules,
    CountingFiles,
    CopyingFiles,
    BuildingArchive,
    Connecting,
    Uploading,
    Extracting,
}

impl Stage {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CollectingRules => "collecting rules",
            Stage::CountingFiles => "counting files",
            Stage::CopyingFiles => "copying files",
            Stage::BuildingArchive => "building archive",
            Stage::Connecting => "connecting",
            Stage::Uploading => "uploading",
            Stage::Extracting => "extracting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress report. `total == 0` means the count is indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(stage: Stage, current: u64, total: u64) -> Self {
        Self {
            stage,
            current,
            total,
        }
    }

    #[inline]
    pub fn is_indeterminate(&self) -> bool {
        self.total == 0
    }
}

/// Receiver of progress events. Invoked synchronously on the calling thread.
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent);
}

impl<F: FnMut(ProgressEvent)> ProgressSink for F {
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Report a `0/100` then `100/100` pair around `f`
pub(crate) fn bracketed<T, E>(
    progress: &mut dyn ProgressSink,
    stage: Stage,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    progress.report(ProgressEvent::new(stage, 0, 100));
    let value = f()?;
    progress.report(ProgressEvent::new(stage, 100, 100));
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = [
            Stage::CollectingRules,
            Stage::CountingFiles,
            Stage::CopyingFiles,
            Stage::BuildingArchive,
            Stage::Connecting,
            Stage::Uploading,
            Stage::Extracting,
        ]
        .iter()
        .map(Stage::as_str)
        .collect();

        assert_eq!(
            names,
            vec![
                "collecting rules",
                "counting files",
                "copying files",
                "building archive",
                "connecting",
                "uploading",
                "extracting",
            ]
        );
    }

    #[test]
    fn test_indeterminate() {
        assert!(ProgressEvent::new(Stage::CountingFiles, 0, 0).is_indeterminate());
        assert!(!ProgressEvent::new(Stage::CopyingFiles, 1, 3).is_indeterminate());
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ProgressEvent| seen.push(e);
            sink.report(ProgressEvent::new(Stage::Uploading, 10, 20));
        }
        assert_eq!(seen, vec![ProgressEvent::new(Stage::Uploading, 10, 20)]);
    }

    #[test]
    fn test_bracketed_skips_completion_on_error() {
        let mut seen = Vec::new();
        let mut sink = |e: ProgressEvent| seen.push(e);
        let result: Result<(), &str> = bracketed(&mut sink, Stage::Connecting, || Err("down"));
        assert!(result.is_err());
        assert_eq!(seen, vec![ProgressEvent::new(Stage::Connecting, 0, 100)]);
    }
}
