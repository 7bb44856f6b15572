//! Collaborators around the lifecycle core: notifications, seed stock and planting.

pub mod crop_planting_service;
pub mod notifier;
pub mod seed_inventory;

pub use crop_planting_service::{CreationMode, CropPlanting, NewCrop};
pub use notifier::{Notification, Notifier, RecordingNotifier, TracingNotifier};
pub use seed_inventory::{NoopSeedInventory, RecordingSeedInventory, SeedInventory};
