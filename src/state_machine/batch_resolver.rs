//! Batch membership resolution.
//!
//! A batch is either every crop sharing an explicit `crop_batch_id`, or every crop
//! without one that shares recipe, germination time and current stage. Membership is
//! always read fresh; callers never cache it across transactions.

use crate::error::{CropCycleError, Result};
use crate::models::{BatchRef, Crop, TransitionTarget};
use crate::store::CropTransaction;
use tracing::debug;

/// Crops that transition together, ordered by id
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBatch {
    pub batch: BatchRef,
    pub crops: Vec<Crop>,
}

impl ResolvedBatch {
    /// First member by id; drives validation and scheduling for the batch
    pub fn representative(&self) -> &Crop {
        &self.crops[0]
    }

    pub fn crop_ids(&self) -> Vec<i64> {
        self.crops.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.crops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResolver;

impl BatchResolver {
    /// Resolve members without taking locks
    pub async fn resolve<T: CropTransaction>(
        tx: &mut T,
        target: TransitionTarget,
    ) -> Result<ResolvedBatch> {
        Self::resolve_with(tx, target, false).await
    }

    /// Resolve members and lock every row until the transaction ends
    pub async fn resolve_for_update<T: CropTransaction>(
        tx: &mut T,
        target: TransitionTarget,
    ) -> Result<ResolvedBatch> {
        Self::resolve_with(tx, target, true).await
    }

    async fn resolve_with<T: CropTransaction>(
        tx: &mut T,
        target: TransitionTarget,
        lock: bool,
    ) -> Result<ResolvedBatch> {
        let batch = match target {
            TransitionTarget::Crop(crop_id) => tx
                .find_crop(crop_id, lock)
                .await?
                .ok_or_else(|| CropCycleError::not_found(format!("crop {crop_id}")))?
                .batch_ref(),
            TransitionTarget::Batch(batch) => batch,
        };

        let crops = tx.crops_in_batch(&batch, lock).await?;
        if crops.is_empty() {
            return Err(CropCycleError::not_found(format!("no crops in {batch}")));
        }
        // invariant: ResolvedBatch is never empty
        debug!(batch = %batch, members = crops.len(), lock, "Resolved batch");
        Ok(ResolvedBatch { batch, crops })
    }
}
