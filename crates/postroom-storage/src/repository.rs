//! Repositories for database operations

pub mod bounces;
pub mod campaigns;
pub mod events;
pub mod queue;
pub mod settings;
pub mod tracking;
pub mod usage;
pub mod webhook_logs;

pub use bounces::BounceRepository;
pub use campaigns::CampaignRepository;
pub use events::{EventOrder, EventRepository, SortDirection};
pub use queue::{QueueFilter, QueueRepository};
pub use settings::SettingsRepository;
pub use tracking::MessageTrackingRepository;
pub use usage::UsageRepository;
pub use webhook_logs::WebhookLogRepository;
