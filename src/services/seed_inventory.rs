//! Seed stock deduction after planting.

use crate::error::Result;
use crate::models::Crop;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

#[async_trait]
pub trait SeedInventory: Send + Sync + Debug {
    /// Deduct the seed used by newly planted crops
    async fn deduct(&self, crops: &[Crop]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSeedInventory;

#[async_trait]
impl SeedInventory for NoopSeedInventory {
    async fn deduct(&self, _crops: &[Crop]) -> Result<()> {
        Ok(())
    }
}

/// Records the crop ids of every deduction call
#[derive(Debug, Clone, Default)]
pub struct RecordingSeedInventory {
    calls: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl RecordingSeedInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<i64>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SeedInventory for RecordingSeedInventory {
    async fn deduct(&self, crops: &[Crop]) -> Result<()> {
        self.calls.lock().push(crops.iter().map(|c| c.id).collect());
        Ok(())
    }
}
