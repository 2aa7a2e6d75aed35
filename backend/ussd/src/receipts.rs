//! Receipt SMS delivery.
//!
//! Receipts are best-effort: [`ReceiptDispatcher::dispatch`] spawns the send
//! under its own timeout and only logs the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SmsConfig;

/// Outcome of one receipt send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_receipt(&self, phone_number: &str, message: &str) -> Delivery;
}

const SMS_MAX_ATTEMPTS: u32 = 3;
const SMS_INITIAL_BACKOFF_MILLIS: u64 = 500;

/// Sends receipts through an HTTP SMS gateway (form-encoded `username`,
/// `to`, `message`, optional `from`; API key in the `apiKey` header).
///
/// Transport errors, 429 and 5xx responses are retried with exponential
/// back-off up to [`SMS_MAX_ATTEMPTS`] times. Any other non-success status
/// fails at once.
pub struct SmsNotifier {
    client: Client,
    config: SmsConfig,
    initial_backoff: Duration,
}

impl SmsNotifier {
    pub fn new(client: Client, config: SmsConfig) -> Self {
        Self {
            client,
            config,
            initial_backoff: Duration::from_millis(SMS_INITIAL_BACKOFF_MILLIS),
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    async fn attempt(&self, form: &[(&str, &str)]) -> Attempt {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("apiKey", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await;

        let resp = match response {
            Ok(resp) => resp,
            Err(e) => return Attempt::Retry(format!("request failed: {e}")),
        };
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Attempt::Retry(format!("SMS gateway returned {status}"));
        }
        if !status.is_success() {
            return Attempt::Done(Delivery::Failed(format!("SMS gateway returned {status}")));
        }
        match resp.json::<Value>().await {
            Ok(body) => Attempt::Done(delivery_from_body(&body)),
            // A 2xx without a parseable body is taken as accepted.
            Err(_) => Attempt::Done(Delivery::Delivered),
        }
    }
}

enum Attempt {
    Done(Delivery),
    Retry(String),
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send_receipt(&self, phone_number: &str, message: &str) -> Delivery {
        let mut form = vec![
            ("username", self.config.username.as_str()),
            ("to", phone_number),
            ("message", message),
        ];
        if let Some(sender) = self.config.sender_id.as_deref() {
            form.push(("from", sender));
        }

        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.attempt(&form).await {
                Attempt::Done(delivery) => return delivery,
                Attempt::Retry(reason) if attempt >= SMS_MAX_ATTEMPTS => {
                    return Delivery::Failed(format!("{reason} after {attempt} attempts"));
                }
                Attempt::Retry(reason) => {
                    warn!("Receipt send attempt {attempt} failed (will retry in {backoff:?}): {reason}");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }
}

/// Inspect per-recipient statuses (`SMSMessageData.Recipients[].status`)
/// when the gateway reports them.
fn delivery_from_body(body: &Value) -> Delivery {
    let recipients = body
        .get("SMSMessageData")
        .and_then(|d| d.get("Recipients"))
        .and_then(Value::as_array);

    match recipients.and_then(|r| r.first()) {
        None => Delivery::Delivered,
        Some(recipient) => match recipient.get("status").and_then(Value::as_str) {
            Some("Success") | None => Delivery::Delivered,
            Some(other) => Delivery::Failed(format!("recipient status {other}")),
        },
    }
}

/// Used when no SMS gateway is configured: receipts only reach the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_receipt(&self, phone_number: &str, message: &str) -> Delivery {
        info!("Receipt for {} (SMS disabled): {message}", mask_phone(phone_number));
        Delivery::Delivered
    }
}

#[derive(Clone)]
pub struct ReceiptDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl ReceiptDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Fire-and-forget: the returned handle may be dropped.
    pub fn dispatch(&self, phone_number: String, message: String) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let masked = mask_phone(&phone_number);
            match tokio::time::timeout(timeout, notifier.send_receipt(&phone_number, &message))
                .await
            {
                Ok(Delivery::Delivered) => info!("Receipt delivered to {masked}"),
                Ok(Delivery::Failed(reason)) => warn!("Receipt to {masked} failed: {reason}"),
                Err(_) => warn!("Receipt to {masked} timed out after {timeout:?}"),
            }
        })
    }
}

/// Keep the leading five and trailing four characters of a phone number.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 9 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 9))
}
