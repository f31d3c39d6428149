//! Shared API state

use postroom_core::{AzureCorrelator, QueueWorkerConfig};
use postroom_storage::models::Bounce;
use postroom_storage::DatabasePool;
use tokio::sync::mpsc;

/// State shared by all handlers
pub struct AppState {
    pub db_pool: DatabasePool,
    pub queue_cfg: QueueWorkerConfig,
    pub correlator: AzureCorrelator,
    pub bounce_tx: mpsc::Sender<Bounce>,
}
