//! Persistence seam for crops, tasks and transition history.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::{InMemoryStore, MemoryTransaction};
pub use postgres::{PgCropStore, PgCropTransaction};
pub use traits::{
    CropStore, CropTransaction, NewCropRow, StoreError, StoreResult, ACTIVE_TRAY_INDEX,
};
