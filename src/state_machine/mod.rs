// Crop stage state machine
//
// StageGraph decides what is legal, TransitionValidator decides whether a specific
// transition may happen now, and TransitionExecutor is the only writer of stage state.

pub mod batch_resolver;
pub mod executor;
pub mod stage_graph;
pub mod validator;

// Re-export main types for convenient access
pub use batch_resolver::{BatchResolver, ResolvedBatch};
pub use executor::{
    AdvanceOptions, CropOutcome, CropStatus, RevertOptions, TransitionExecutor, TransitionResult,
};
pub use stage_graph::StageGraph;
pub use validator::{count_critical_tasks, RevertContext, TransitionValidator, ValidationResult};
