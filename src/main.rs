use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use project_deploy::archive::ArchiveBuilder;
use project_deploy::cancel::CancelToken;
use project_deploy::config::{Cli, Config};
use project_deploy::pipeline::DeploymentPipeline;
use project_deploy::progress::{ProgressEvent, ProgressSink, Stage};
use project_deploy::ssh::SshTransport;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// One indicatif bar per stage
#[derive(Default)]
struct StageBars {
    current: Option<(Stage, ProgressBar)>,
}

impl StageBars {
    fn bar_for(stage: Stage, total: u64) -> ProgressBar {
        if total == 0 {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} {pos}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(stage.as_str());
            return pb;
        }

        let template = match stage {
            Stage::Uploading => {
                "{msg:>16} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})"
            }
            _ => "{msg:>16} [{bar:40.cyan/blue}] {pos}/{len}",
        };
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(stage.as_str());
        pb
    }

    fn finish(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.finish();
        }
    }
}

impl ProgressSink for StageBars {
    fn report(&mut self, event: ProgressEvent) {
        let same_stage = matches!(&self.current, Some((stage, _)) if *stage == event.stage);
        if !same_stage {
            self.finish();
            self.current = Some((event.stage, Self::bar_for(event.stage, event.total)));
        }

        if let Some((_, pb)) = &mut self.current {
            if event.total > 0 && pb.length() != Some(event.total) {
                // Spinner became determinate (e.g. counting finished)
                pb.finish_and_clear();
                *pb = Self::bar_for(event.stage, event.total);
            }
            pb.set_position(event.current);
        }
    }
}

impl Drop for StageBars {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = Config::from_cli(cli)?;

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    let cancel = CancelToken::from_flag(shutdown);

    eprintln!("Project root: {}", config.project_root.display());
    let start = Instant::now();

    if config.archive_only {
        let mut builder = ArchiveBuilder::new(&config.ignore);
        if let Some(output) = &config.output {
            builder = builder.output(output);
        }
        let archive = {
            let mut bars = StageBars::default();
            builder.build(&config.project_root, &cancel, &mut bars)
        }
        .context("Failed to build archive")?;

        println!(
            "Archived {} files ({} bytes) to {} in {:.2}s",
            archive.file_count,
            archive.bytes,
            archive.path.display(),
            start.elapsed().as_secs_f64()
        );
        return Ok(());
    }

    if config.output.is_some() {
        bail!("--output is only valid together with --archive-only");
    }

    if config.needs_prompt() {
        config.prompt(&mut io::stdin().lock(), &mut io::stderr(), |question| {
            rpassword::prompt_password(question)
        })?;
    }
    let target = config.target()?;

    let mut pipeline = DeploymentPipeline::new(SshTransport::new(), target.clone())
        .with_options(config.pipeline_options())
        .with_ignore(config.ignore.clone());

    eprintln!("Testing connection to {target}...");
    if !pipeline.test_connection() {
        bail!("Could not connect to {target}; check host, port and credentials");
    }

    let remote_path = {
        let mut bars = StageBars::default();
        pipeline.upload_and_extract(
            &config.project_root,
            config.remote_dir.as_deref(),
            &cancel,
            &mut bars,
        )
    }
    .with_context(|| format!("Deployment to {target} failed"))?;

    println!(
        "Deployed to {}:{} in {:.2}s",
        target.host,
        remote_path,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
