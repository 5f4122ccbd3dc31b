// WhatsApp transport
// Outbound replies through the Twilio Messages API

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::WhatsAppConfig;

pub const INVALID_MESSAGE_REPLY: &str = "Please send a valid message.";
const CHANNEL_PREFIX: &str = "whatsapp:";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct TwilioClient {
    messages_url: Url,
    authorization: String,
    from: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

impl TwilioClient {
    #[inline]
    pub fn new(config: &WhatsAppConfig) -> Result<Self> {
        let base = Url::parse(&config.api_base)
            .with_context(|| format!("Invalid Twilio API base '{}'", config.api_base))?;
        let messages_url = base
            .join(&format!(
                "/2010-04-01/Accounts/{}/Messages.json",
                config.account_sid
            ))
            .context("Failed to build Twilio messages URL")?;

        let credentials = STANDARD.encode(format!("{}:{}", config.account_sid, config.auth_token));
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(SEND_TIMEOUT))
            .build()
            .into();

        Ok(Self {
            messages_url,
            authorization: format!("Basic {credentials}"),
            from: channel_address(&config.from_number),
            agent,
        })
    }

    /// Blocking send; returns the Twilio message sid
    #[inline]
    pub fn send_message_blocking(&self, to: &str, body: &str) -> Result<String> {
        let to = channel_address(to);
        debug!("Sending WhatsApp message to {}", to);

        let text = self
            .agent
            .post(self.messages_url.as_str())
            .header("Authorization", &self.authorization)
            .send_form([
                ("To", to.as_str()),
                ("From", self.from.as_str()),
                ("Body", body),
            ])
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| {
                warn!("Twilio send to {} failed: {}", to, e);
                anyhow::anyhow!("Twilio request failed: {e}")
            })?;

        let response: MessageResponse =
            serde_json::from_str(&text).context("Failed to parse Twilio response")?;
        Ok(response.sid)
    }

    #[inline]
    pub async fn send_message(&self, to: &str, body: &str) -> Result<String> {
        let client = self.clone();
        let (to, body) = (to.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || client.send_message_blocking(&to, &body))
            .await
            .context("Twilio send task panicked")?
    }
}

/// `whatsapp:+15551234567` form expected by Twilio for both ends
#[inline]
pub fn channel_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with(CHANNEL_PREFIX) {
        number.to_string()
    } else {
        format!("{CHANNEL_PREFIX}{number}")
    }
}
