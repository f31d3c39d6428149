//! Message transport seam
//!
//! The processor hands (campaign, subscriber, server) triples to a
//! `Messenger` and records whatever provider message id comes back for
//! later webhook correlation. The default implementation relays through the
//! configured SMTP servers with `lettre`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use postroom_common::types::{CampaignId, SubscriberId};
use postroom_storage::models::SmtpServer;
use postroom_storage::repository::{CampaignRepository, SettingsRepository};
use postroom_storage::DatabasePool;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Transport abstraction the processor sends through
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver one campaign message via the given server. Returns the
    /// provider message id when the transport exposes one.
    async fn push(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        server_uuid: &str,
    ) -> Result<Option<String>>;
}

/// SMTP relay messenger
pub struct SmtpMessenger {
    campaigns: CampaignRepository,
    settings: SettingsRepository,
    hostname: String,
}

impl SmtpMessenger {
    /// Create a new SMTP messenger
    pub fn new(db_pool: DatabasePool, hostname: String) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
            hostname,
        }
    }

    fn build_transport(&self, server: &SmtpServer) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if server.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)
                .context("failed to create SMTP transport")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
        };

        builder = builder.port(server.port);

        if let (Some(username), Some(password)) = (&server.username, &server.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.timeout(Some(Duration::from_secs(30))).build())
    }
}

#[async_trait]
impl Messenger for SmtpMessenger {
    async fn push(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        server_uuid: &str,
    ) -> Result<Option<String>> {
        let settings = self.settings.get().await?;
        let server = settings
            .smtp
            .iter()
            .find(|s| s.uuid == server_uuid && s.enabled)
            .ok_or_else(|| anyhow!("unknown SMTP server {}", server_uuid))?;

        let (subject, body, to_address) = self
            .campaigns
            .message_parts(campaign_id, subscriber_id)
            .await?
            .ok_or_else(|| anyhow!("campaign {} / subscriber {} not found", campaign_id, subscriber_id))?;

        let message_id = format!("<{}.{}@{}>", Uuid::new_v4(), Utc::now().timestamp(), self.hostname);

        let email = Message::builder()
            .from(server.from_email.parse().context("invalid from address")?)
            .to(to_address.parse().context("invalid recipient address")?)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(body)
            .context("failed to build email")?;

        let mailer = self.build_transport(server)?;
        let response = mailer.send(email).await.context("SMTP send failed")?;
        debug!("email relayed: {:?}", response);

        Ok(Some(message_id))
    }
}
