//! resources-updater - keeps local resource archives in sync with a remote index
//!
//! For each configured resource group the updater scans a directory, hashes
//! the candidate files, asks the remote index which digests are stale, and
//! replaces stale files with fresh downloads while archiving the old ones.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`paths`]: Working-directory scoping
//! - [`filter`]: Candidate file selection
//! - [`hash`]: Streaming content digests
//! - [`remote`]: Remote index lookup (Modrinth)
//! - [`sync`]: Per-group synchronization engine
//! - [`download`]: Download, archive and promote
//! - [`handler`]: Handler trait and registry
//! - [`scheduler`]: Sequential / concurrent handler execution

pub mod config;
pub mod download;
pub mod error;
pub mod filter;
pub mod handler;
pub mod hash;
pub mod paths;
pub mod remote;
pub mod scheduler;
pub mod sync;

pub use config::Config;
pub use error::SyncError;
pub use handler::{Handler, HandlerRegistry, HandlerReport, ModrinthHandler};
pub use scheduler::{GroupScheduler, RunSummary};
pub use sync::{GroupOutcome, SyncContext, SyncEngine};
