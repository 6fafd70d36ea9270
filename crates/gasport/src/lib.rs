//! # gasport
//!
//! A developer-tooling server that exposes a Google Apps Script project as
//! a remote, editable, executable workspace.
//!
//! gasport maintains a bootstrap dispatcher inside the remote project,
//! executes ad-hoc JavaScript against environment-pinned deployments with
//! drift detection and warm-up retries, promotes code snapshots across
//! dev/staging/prod, and keeps a local git mirror in sync with the remote
//! file tree. Tools are exposed over the Model Context Protocol; the
//! transport lives in the CLI crate and dispatches into [`tools`].
//!
//! ## Three authorities of truth
//!
//! Every operation coordinates the local filesystem mirror, the local git
//! repository, and the remote project:
//!
//! - Drift between mirror and remote **blocks execution** (or rides along
//!   as a non-fatal `collision` when explicitly skipped).
//! - The write path never commits on mainline: feature branches
//!   (`llm-feature-*`) are created on demand and squash-merged on finish.
//! - An execution observes either a frozen version snapshot (staging/prod)
//!   or current HEAD (dev) — never a mixture.
//!
//! ## Pipeline
//!
//! A typical `exec` flows **sync check → URL resolution → request →
//! envelope interpretation**, with two recovery paths: a one-shot
//! domain-cookie retry for cookie-gated responses, and infrastructure
//! repair followed by a bounded warm-up loop when the deployment is
//! missing or not yet servable.
//!
//! ## Modules
//!
//! - [`gateway`] — typed operations over the Apps Script REST surface
//! - [`shim`] — the embedded dispatcher, HTML templates, and manifest
//! - [`deployments`] — environment-tagged deployment registry
//! - [`infra`] — shim/manifest/deployment verification and repair
//! - [`engine`] — the execution engine (phases, deadlines, warm-up)
//! - [`sync`] — mirror/remote drift classification and diffs
//! - [`mirror`] — local file tree mapping and root resolution
//! - [`gitflow`] — the feature-branch workflow
//! - [`promote`] — snapshot promotion across environments
//! - [`cache`] — session URL cache and per-project locks
//! - [`config`] — the user config file and environment overrides
//! - [`events`] — per-request JSONL event log
//! - [`tools`] — the MCP tool surface and dispatch

pub mod cache;
pub mod config;
pub mod deployments;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod gitflow;
pub mod infra;
pub mod mirror;
pub mod promote;
pub mod report;
pub mod shim;
pub mod sync;
pub mod tools;
pub mod types;

pub use error::GasError;
pub use report::{NullReporter, Reporter, VecReporter};
