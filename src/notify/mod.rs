//! Webhook fan-out of per-project backup reports.
//!
//! Channels are independent: a failing webhook is logged and never blocks the
//! other channels or the pipeline.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::json;

use crate::config::NotifyOptions;
use crate::runlog::{RunStatus, Uploaded, TIMESTAMP_FORMAT};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One report about a finished (or skipped-for-lack-of-data) backup attempt.
#[derive(Debug)]
pub struct Notification<'a> {
    pub project: &'a str,
    pub status: RunStatus,
    pub message: &'a str,
    pub timestamp: NaiveDateTime,
    /// Read back from the run log, not from in-memory pipeline state.
    pub uploaded: Uploaded,
}

pub struct Notifier {
    client: reqwest::blocking::Client,
    options: NotifyOptions,
}

impl Notifier {
    pub fn new(options: NotifyOptions) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("http client should build");

        Self { client, options }
    }

    /// Whether at least one webhook channel is configured.
    pub fn enabled(&self) -> bool {
        self.options.slack_webhook.is_some() || self.options.discord_webhook.is_some()
    }

    /// Fans the notification out to all configured channels.
    ///
    /// Returns whether at least one channel accepted it. Each channel failure
    /// is logged independently and never escalates the run status.
    pub fn notify(&self, notification: &Notification<'_>) -> bool {
        let mut delivered = false;

        if let Some(url) = &self.options.slack_webhook {
            match self.post(url, &slack_payload(notification)) {
                Ok(()) => delivered = true,
                Err(e) => {
                    log::error!(target: "notify::slack", "{}: webhook delivery failed: {e}", notification.project)
                }
            }
        }

        if let Some(url) = &self.options.discord_webhook {
            match self.post(url, &discord_payload(notification)) {
                Ok(()) => delivered = true,
                Err(e) => {
                    log::error!(target: "notify::discord", "{}: webhook delivery failed: {e}", notification.project)
                }
            }
        }

        delivered
    }

    fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(payload)
            .send()?
            .error_for_status()?;

        Ok(())
    }
}

fn slack_payload(n: &Notification<'_>) -> serde_json::Value {
    json!({
        "text": format!(
            "[{}] backup of {} at {} (uploaded: {})\n{}",
            n.status,
            n.project,
            n.timestamp.format(TIMESTAMP_FORMAT),
            n.uploaded,
            n.message,
        ),
    })
}

fn discord_payload(n: &Notification<'_>) -> serde_json::Value {
    json!({
        "embeds": [{
            "title": format!("{}: {}", n.project, n.status),
            "description": n.message,
            "fields": [
                {
                    "name": "Timestamp (UTC)",
                    "value": n.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                },
                {
                    "name": "Uploaded",
                    "value": n.uploaded.to_string(),
                },
            ],
        }],
    })
}
