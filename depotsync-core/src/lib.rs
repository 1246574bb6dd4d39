//! # depotsync-core
//!
//! Core library for depotsync - the shared-storage sync and lock layer of the
//! inventory tracker.
//!
//! This library provides:
//! - A lock record guarding the master database on shared storage
//! - Copy-down / copy-up of the whole database file
//! - Persistent sync status tracking for the UI banner
//! - A mutation dispatcher that queues a copy-up after every successful write
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! The master database lives on a network share. A session copies it to a
//! private local working copy, serves every read and write from that copy, and
//! pushes the whole file back after each mutation and at shutdown. Only one
//! user/machine may hold the master at a time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use depotsync_core::{Config, Operation, Session, SyncContext};
//!
//! # async fn run() -> depotsync_core::Result<()> {
//! let config = Config::load()?;
//! let session = Session::start(SyncContext::from_config(&config)?).await?;
//!
//! session.execute(
//!     Operation::CreateSite,
//!     &serde_json::json!({ "name": "North Yard" }),
//! )?;
//! println!("{:?}", session.sync_status());
//!
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use context::{SyncContext, SyncPaths};
pub use db::Store;
pub use dispatch::MutationDispatcher;
pub use error::{Error, Result};
pub use lock::{LockIdentity, LockOutcome, MasterLock};
pub use ops::{Operation, OperationKind};
pub use session::Session;
pub use status::{DerivedStatus, SyncMetadata, SyncState, SyncStatusSnapshot, SyncTracker};
pub use worker::{SyncHandle, SyncOutcome, SyncReport, SyncTrigger, SyncWorker};

// Public modules
pub mod config;
pub mod context;
pub mod copy;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod logging;
pub mod ops;
pub mod session;
pub mod status;
pub mod worker;
