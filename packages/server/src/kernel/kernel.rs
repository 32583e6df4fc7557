//! Process-wide dependency holder.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::kernel::engine::{JobStore, TaskManager};
use crate::kernel::platform::PlatformClient;
use crate::kernel::stream_hub::StreamHub;

/// Everything the server layer needs, built once at boot.
#[derive(Clone)]
pub struct Kernel {
    pub db_pool: PgPool,
    pub store: Arc<dyn JobStore>,
    pub platform: Arc<dyn PlatformClient>,
    pub manager: Arc<TaskManager>,
    pub hub: StreamHub,
    pub config: Config,
}

impl Kernel {
    pub fn new(
        db_pool: PgPool,
        store: Arc<dyn JobStore>,
        platform: Arc<dyn PlatformClient>,
        manager: Arc<TaskManager>,
        hub: StreamHub,
        config: Config,
    ) -> Self {
        Self {
            db_pool,
            store,
            platform,
            manager,
            hub,
            config,
        }
    }
}
