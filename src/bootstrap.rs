//! # CropCycle Bootstrap
//!
//! One bootstrap path wiring store, clock and collaborators into the scheduler,
//! executor, dispatcher and planting service. Every entry point (the dispatch
//! binary, embedding applications, tests) builds its components through here so
//! they share one configuration.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigManager, CropCycleConfig};
use crate::error::Result;
use crate::scheduling::{TaskDispatcher, TaskScheduler};
use crate::services::{CropPlanting, Notifier, SeedInventory};
use crate::state_machine::TransitionExecutor;
use crate::store::{CropStore, PgCropStore};
use std::sync::Arc;
use tracing::info;

pub struct CropCycleCore<S: CropStore> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<TaskScheduler<S>>,
    pub executor: Arc<TransitionExecutor<S>>,
    pub dispatcher: Arc<TaskDispatcher<S>>,
    pub planting: Arc<CropPlanting<S>>,
}

impl<S: CropStore> CropCycleCore<S> {
    /// Wire components over an existing store
    pub fn from_parts(
        store: Arc<S>,
        config: &CropCycleConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        inventory: Arc<dyn SeedInventory>,
    ) -> Self {
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));
        let executor = Arc::new(TransitionExecutor::new(
            store.clone(),
            clock.clone(),
            config.validation.clone(),
            scheduler.clone(),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            store.clone(),
            executor.clone(),
            notifier,
            clock.clone(),
            config.dispatcher.clone(),
        ));
        let planting = Arc::new(CropPlanting::new(
            store.clone(),
            scheduler.clone(),
            inventory,
            clock.clone(),
        ));
        Self {
            store,
            clock,
            scheduler,
            executor,
            dispatcher,
            planting,
        }
    }
}

impl CropCycleCore<PgCropStore> {
    /// Connect to Postgres using loaded configuration, running migrations when
    /// `database.run_migrations` is set
    pub async fn from_config(
        config_manager: Arc<ConfigManager>,
        notifier: Arc<dyn Notifier>,
        inventory: Arc<dyn SeedInventory>,
    ) -> Result<Self> {
        let config = config_manager.config();
        info!(
            environment = %config_manager.environment(),
            max_connections = config.database.max_connections,
            "🔧 Initializing CropCycleCore"
        );

        let store = PgCropStore::connect(&config.database).await?;
        if config.database.run_migrations {
            store.migrate().await?;
            info!("✅ CORE: Migrations applied");
        }

        Ok(Self::from_parts(
            Arc::new(store),
            config,
            Arc::new(SystemClock),
            notifier,
            inventory,
        ))
    }
}
