//! CLI configuration and runtime settings for project deployment.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::ignore::IgnoreConfig;
use crate::pipeline::PipelineOptions;
use crate::transport::{Credential, RemoteTarget};

/// Package a project directory, upload it over SSH and unpack it remotely
#[derive(Parser, Debug)]
#[command(name = "project-deploy")]
#[command(version)]
#[command(about = "Package a project, upload it over SSH and extract it on the server")]
pub struct Cli {
    /// Server host name or IP address
    #[arg(long)]
    pub host: Option<String>,

    /// Login user on the server
    #[arg(short, long)]
    pub username: Option<String>,

    /// Login password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Private key file used instead of a password
    #[arg(long)]
    pub identity_file: Option<PathBuf>,

    /// SSH port
    #[arg(long, default_value_t = RemoteTarget::DEFAULT_PORT)]
    pub port: u16,

    /// Project directory to deploy
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Remote directory to extract into (default: login user's home)
    #[arg(long)]
    pub remote_dir: Option<String>,

    /// Prompt for server details
    #[arg(short, long)]
    pub interactive: bool,

    /// Extra ignore patterns (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Paths to exclude, relative to the project root (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<PathBuf>,

    /// Seconds allowed for establishing each connection
    #[arg(long, default_value_t = 30)]
    pub connect_timeout: u64,

    /// Overall deadline for the deployment, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only build the archive, do not connect
    #[arg(long)]
    pub archive_only: bool,

    /// Archive output path (with --archive-only)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical project root
    pub project_root: PathBuf,
    pub host: Option<String>,
    pub username: Option<String>,
    /// None until a password or identity file is given
    pub credential: Option<Credential>,
    pub port: u16,
    /// Remote extraction directory (None = home)
    pub remote_dir: Option<String>,
    pub interactive: bool,
    /// User ignore patterns and explicit paths
    pub ignore: IgnoreConfig,
    pub connect_timeout: Duration,
    /// Overall deadline (None = unbounded)
    pub deadline: Option<Duration>,
    pub archive_only: bool,
    pub output: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let project_root = match cli.project_root.canonicalize() {
            Ok(path) => path,
            Err(_) => anyhow::bail!(
                "Project directory not found: {}",
                cli.project_root.display()
            ),
        };
        if !project_root.is_dir() {
            anyhow::bail!("Not a directory: {}", project_root.display());
        }

        if cli.port == 0 {
            anyhow::bail!("Port must be between 1 and 65535");
        }
        if cli.connect_timeout == 0 {
            anyhow::bail!("Connect timeout must be at least one second");
        }

        for pattern in &cli.ignore {
            if let Err(e) = globset::Glob::new(pattern) {
                anyhow::bail!("Invalid ignore pattern '{pattern}': {e}");
            }
        }

        // Password beats identity file; agent is only chosen interactively
        let credential = match (cli.password, cli.identity_file) {
            (Some(password), _) => Some(Credential::Password(password)),
            (None, Some(path)) => Some(Credential::KeyFile {
                path,
                passphrase: None,
            }),
            (None, None) => None,
        };

        Ok(Config {
            project_root,
            host: cli.host.filter(|h| !h.trim().is_empty()),
            username: cli.username.filter(|u| !u.trim().is_empty()),
            credential,
            port: cli.port,
            remote_dir: cli.remote_dir,
            interactive: cli.interactive,
            ignore: IgnoreConfig {
                patterns: cli.ignore,
                paths: cli.exclude,
            },
            connect_timeout: Duration::from_secs(cli.connect_timeout),
            deadline: cli.timeout.map(Duration::from_secs),
            archive_only: cli.archive_only,
            output: cli.output,
            verbose: cli.verbose,
        })
    }

    /// Whether server details must be asked for before connecting
    pub fn needs_prompt(&self) -> bool {
        !self.archive_only
            && (self.interactive
                || self.host.is_none()
                || self.username.is_none()
                || self.credential.is_none())
    }

    /// Ask for server details on `input`.
    ///
    /// With `--interactive` every field is asked for and an empty answer
    /// keeps the value given on the command line; otherwise only missing
    /// fields are asked for. An empty password selects the ssh-agent.
    pub fn prompt<R, W, S>(&mut self, input: &mut R, output: &mut W, mut read_secret: S) -> anyhow::Result<()>
    where
        R: BufRead,
        W: Write,
        S: FnMut(&str) -> io::Result<String>,
    {
        if self.interactive || self.host.is_none() {
            let answer = ask(input, output, "Server host: ")?;
            self.host = non_empty(answer).or(self.host.take());
            if self.host.is_none() {
                anyhow::bail!("Server host must not be empty");
            }
        }

        if self.interactive || self.username.is_none() {
            let answer = ask(input, output, "Username: ")?;
            self.username = non_empty(answer).or(self.username.take());
            if self.username.is_none() {
                anyhow::bail!("Username must not be empty");
            }
        }

        if self.interactive || self.credential.is_none() {
            let answer = read_secret("Password (empty to use ssh-agent): ")?;
            self.credential = match non_empty(answer) {
                Some(password) => Some(Credential::Password(password)),
                None => self.credential.take().or(Some(Credential::Agent)),
            };
        }

        if self.interactive {
            let answer = ask(input, output, &format!("SSH port [{}]: ", self.port))?;
            if let Some(port) = non_empty(answer) {
                self.port = match port.parse::<u16>() {
                    Ok(p) if p > 0 => p,
                    _ => anyhow::bail!("Port must be a number between 1 and 65535"),
                };
            }
        }

        Ok(())
    }

    /// Deployment target, once host, user and credential are known
    pub fn target(&self) -> anyhow::Result<RemoteTarget> {
        let Some(host) = &self.host else {
            anyhow::bail!("No server host given (use --host or --interactive)");
        };
        let Some(username) = &self.username else {
            anyhow::bail!("No username given (use --username or --interactive)");
        };
        let Some(credential) = &self.credential else {
            anyhow::bail!("No credentials given (use --password, --identity-file or --interactive)");
        };

        Ok(RemoteTarget::new(host.clone(), username.clone(), credential.clone()).with_port(self.port))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            connect_timeout: self.connect_timeout,
            deadline: self.deadline,
            ..PipelineOptions::default()
        }
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<String> {
    output.write_all(question.as_bytes())?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line)
}

fn non_empty(answer: String) -> Option<String> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
