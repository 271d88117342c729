use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use signoff_core::config::NotifierConfig;
use signoff_core::notify::{NotificationEvent, NotificationHook, NotifyError};

/// Posts each notification event as JSON to a configured webhook.
///
/// Delivery is best effort: the caller fires this after the transaction
/// commits and logs failures without retrying or rolling anything back.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    bearer_token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn from_config(config: &NotifierConfig) -> Result<Option<Self>, NotifyError> {
        if !config.enabled {
            return Ok(None);
        }
        let webhook_url = match &config.webhook_url {
            Some(url) => url.clone(),
            None => return Ok(None),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;

        Ok(Some(Self { client, webhook_url, bearer_token: config.bearer_token.clone() }))
    }
}

#[async_trait]
impl NotificationHook for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.webhook_url).json(event);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;

        Ok(())
    }
}
