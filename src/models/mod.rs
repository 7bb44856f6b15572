//! # Crop Lifecycle Models
//!
//! Plain data types shared by the state machine, the scheduler and the stores.
//! Row mapping for Postgres lives in [`crate::store::postgres`]; `Crop` and `Recipe`
//! derive `sqlx::FromRow` directly because their columns map one to one.

pub mod batch;
pub mod crop;
pub mod recipe;
pub mod stage;
pub mod task;
pub mod transition;

pub use batch::{BatchKey, BatchRef, TransitionTarget};
pub use crop::Crop;
pub use recipe::{duration_to_hours, hours_to_duration, Recipe};
pub use stage::{Stage, StageCode};
pub use task::{NewScheduledTask, ScheduledTask, TaskConditions, TaskName};
pub use transition::{
    CropTransitionEntry, FailedCrop, NewStageTransitionRecord, StageTransitionRecord,
    TransitionKind, TransitionOrigin,
};
