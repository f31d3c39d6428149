//! Bounce pipeline
//!
//! Webhook handlers and mailbox scanners push `Bounce` records into a
//! buffered channel; a single consumer hands them to the recorder.
//! Idempotence is the recorder's concern, so a failed record is dropped
//! rather than retried.

pub mod correlator;
pub mod webhooks;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use postroom_storage::models::Bounce;
use postroom_storage::repository::BounceRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Capacity of the bounce channel
const QUEUE_CAPACITY: usize = 1000;

/// Persists a bounce and may blocklist the subscriber
#[async_trait]
pub trait BounceRecorder: Send + Sync {
    async fn record(&self, bounce: Bounce) -> Result<()>;
}

#[async_trait]
impl BounceRecorder for BounceRepository {
    async fn record(&self, bounce: Bounce) -> Result<()> {
        BounceRepository::record(self, &bounce).await?;
        Ok(())
    }
}

/// A POP/IMAP mailbox that can be scanned for bounce messages
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Display name for logging
    fn name(&self) -> &str;

    /// How often to scan
    fn scan_interval(&self) -> Duration;

    /// Scan up to `limit` messages, pushing bounces into the channel
    async fn scan(&self, limit: usize, tx: mpsc::Sender<Bounce>) -> Result<()>;
}

/// Bounce manager: producers hold the channel sender, `run` drains it
pub struct BounceManager {
    tx: mpsc::Sender<Bounce>,
    rx: mpsc::Receiver<Bounce>,
    recorder: Arc<dyn BounceRecorder>,
    mailboxes: Vec<Arc<dyn Mailbox>>,
}

impl BounceManager {
    /// Create a new bounce manager
    pub fn new(recorder: Arc<dyn BounceRecorder>, mailboxes: Vec<Arc<dyn Mailbox>>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            recorder,
            mailboxes,
        }
    }

    /// A sender handle for webhook handlers
    pub fn sender(&self) -> mpsc::Sender<Bounce> {
        self.tx.clone()
    }

    /// Consume the channel until every sender is gone. Starts a scanner
    /// task per configured mailbox.
    pub async fn run(mut self) {
        for mailbox in &self.mailboxes {
            let mailbox = mailbox.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                run_mailbox_scanner(mailbox, tx).await;
            });
        }

        // The manager's own sender is handed out via sender(); drop the
        // original so the loop ends when all producers are gone.
        drop(self.tx);

        while let Some(mut bounce) = self.rx.recv().await {
            if bounce.created_at.is_none() {
                bounce.created_at = Some(Utc::now());
            }

            if let Err(e) = self.recorder.record(bounce.clone()).await {
                error!("error recording bounce for {}: {}", bounce.email, e);
            }
        }
    }
}

async fn run_mailbox_scanner(mailbox: Arc<dyn Mailbox>, tx: mpsc::Sender<Bounce>) {
    let interval = mailbox.scan_interval();
    info!(
        "bounce mailbox '{}' will scan every {:?}",
        mailbox.name(),
        interval
    );

    loop {
        if let Err(e) = mailbox.scan(1000, tx.clone()).await {
            error!("error scanning bounce mailbox '{}': {}", mailbox.name(), e);
        }

        tokio::time::sleep(interval).await;
    }
}
