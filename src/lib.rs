//! # Project Deploy
//!
//! Packages a project directory into a `.tar.gz`, uploads it to a server over
//! SSH and unpacks it there.
//!
//! ## Features
//!
//! - `.gitignore` / `.deploy_ignore` discovery, anchored per directory
//! - Exact, glob and ancestor-directory matching, switchable per policy
//! - Staged archive building with progress reporting
//! - Upload and remote extraction through a pluggable transport
//! - Cancellation and overall deadlines threaded through every stage
//!
//! ## Usage
//!
//! ```ignore
//! use project_deploy::cancel::CancelToken;
//! use project_deploy::pipeline::DeploymentPipeline;
//! use project_deploy::progress::NoProgress;
//! use project_deploy::ssh::SshTransport;
//! use project_deploy::transport::{Credential, RemoteTarget};
//!
//! let target = RemoteTarget::new("10.0.0.5", "deploy", Credential::Agent);
//! let mut pipeline = DeploymentPipeline::new(SshTransport::new(), target);
//! let remote = pipeline.upload_and_extract(&root, None, &CancelToken::new(), &mut NoProgress)?;
//! ```

/// Staging copy and tar.gz creation
pub mod archive;

/// Cancellation flag and deadline
pub mod cancel;

/// CLI configuration and argument parsing
pub mod config;

/// Selected-file walking and copying
pub mod copier;

/// Error types for deployment operations
pub mod error;

/// Ignore-file discovery and rule storage
pub mod ignore;

/// Build, upload and extract orchestration
pub mod pipeline;

/// Progress events and sinks
pub mod progress;

/// Ignore-rule evaluation
pub mod selector;

/// SSH transport
pub mod ssh;

/// Remote transport capability
pub mod transport;
