//! Postroom Core - send scheduling, queue processing and event correlation
//!
//! This crate holds the delivery engine: the campaign scheduler that spreads
//! sends across SMTP servers and time, the long-running queue processor with
//! its rate policies, the auto-pause worker, the delivery estimator, and the
//! bounce/webhook pipeline that correlates provider events back to campaigns
//! and subscribers.

pub mod bounce;
pub mod messenger;
pub mod queue;

pub use bounce::correlator::AzureCorrelator;
pub use bounce::{BounceManager, BounceRecorder, Mailbox};
pub use messenger::{Messenger, SmtpMessenger};
pub use queue::autopause::AutoPauseWorker;
pub use queue::estimator::{DeliveryEstimate, Estimator};
pub use queue::processor::Processor;
pub use queue::scheduler::Scheduler;
pub use queue::Config as QueueWorkerConfig;
