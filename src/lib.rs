#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # CropCycle Core
//!
//! Crop lifecycle state machine and deferred task scheduler for microgreens
//! production.
//!
//! ## Overview
//!
//! Every crop moves through soaking, germination, blackout, light and harvest. Crops
//! planted together move together as a batch. This crate owns the rules for those
//! moves and the timers that make them happen on schedule:
//!
//! - **Stage transitions**: one validated, locked, audited write path for advancing
//!   and reverting batches
//! - **Recipe timing**: per-variety stage durations turned into one-shot tasks
//! - **Dispatch**: due tasks consumed at most once, with stale tasks discarded
//!
//! ## Module Organization
//!
//! - [`models`] - Crops, recipes, stages, batches, tasks and audit records
//! - [`state_machine`] - Stage graph, validator, batch resolver and executor
//! - [`scheduling`] - Task scheduler, dispatcher and memory guard
//! - [`services`] - Notifier, seed inventory and crop planting
//! - [`store`] - Persistence traits with Postgres and in-memory backends
//! - [`bootstrap`] - Component wiring shared by every entry point
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cropcycle_core::config::ConfigManager;
//! use cropcycle_core::services::{NoopSeedInventory, TracingNotifier};
//! use cropcycle_core::CropCycleCore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config_manager = ConfigManager::load()?;
//! let core = CropCycleCore::from_config(
//!     config_manager,
//!     Arc::new(TracingNotifier),
//!     Arc::new(NoopSeedInventory),
//! )
//! .await?;
//!
//! let summary = core.dispatcher.process_due_tasks(100).await?;
//! println!("executed {} tasks", summary.executed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (in-memory store)
//! ```

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod scheduling;
pub mod services;
pub mod state_machine;
pub mod store;

pub use bootstrap::CropCycleCore;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigManager, CropCycleConfig};
pub use error::{CropCycleError, Result};
pub use models::{
    BatchKey, BatchRef, Crop, Recipe, ScheduledTask, Stage, StageCode, TaskName,
    TransitionTarget,
};
pub use scheduling::{DispatchSummary, TaskDispatcher, TaskScheduler};
pub use state_machine::{
    AdvanceOptions, RevertOptions, StageGraph, TransitionExecutor, TransitionResult,
    TransitionValidator,
};
pub use store::{CropStore, CropTransaction, InMemoryStore, PgCropStore};
