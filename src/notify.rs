//! Per-subscriber notification sweep.
//!
//! For every subscriber, in address order: read their terms, run the
//! pipeline with them, summarize (falling back to plain matches), render
//! with a caller-supplied renderer, and hand the message to a [`Mailer`].
//! Every subscriber gets a [`SweepOutcome`]; one subscriber's failure never
//! stops the sweep.
//!
//! Delivery is a collaborator. [`LogMailer`] is a dry-run mailer that logs
//! and records messages instead of sending them.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::Match;
use crate::pipeline::Pipeline;
use crate::store::SubscriberStore;
use crate::summarize::{summarize_or_passthrough, Summarizer};

/// A rendered message, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message. Returns whether delivery succeeded.
    async fn send(&self, recipient: &str, message: &Message) -> bool;
}

/// Mailer that logs each message and keeps a copy instead of sending it.
#[derive(Default)]
pub struct LogMailer {
    sent: Mutex<Vec<(String, Message)>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(recipient, message)` seen so far, in send order.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, message: &Message) -> bool {
        info!(
            recipient,
            subject = %message.subject,
            bytes = message.body.len(),
            "dry run: message not sent"
        );
        match self.sent.lock() {
            Ok(mut sent) => {
                sent.push((recipient.to_string(), message.clone()));
                true
            }
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// The subscriber has no watch terms; nothing was run.
    NoTerms,
    Sent { matches: usize },
    SendFailed { matches: usize },
    /// The pipeline run failed (login).
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub email: String,
    #[serde(flatten)]
    pub outcome: SweepOutcome,
}

/// Run the sweep over every subscriber in `store`.
///
/// `render` turns a recipient and its matches into a [`Message`]; the sweep
/// never formats message bodies itself. A message is sent even when no
/// document matched.
pub async fn sweep<R>(
    store: &SubscriberStore,
    pipeline: &Pipeline,
    summarizer: &dyn Summarizer,
    mailer: &dyn Mailer,
    render: R,
) -> Vec<SweepReport>
where
    R: Fn(&str, &[Match]) -> Message,
{
    let subscribers = store.get_subscribers().await;
    info!(subscribers = subscribers.len(), "starting notification sweep");

    let mut reports = Vec::with_capacity(subscribers.len());
    for email in subscribers {
        let terms = store.get_terms(&email).await;
        let outcome = if terms.iter().all(|t| t.trim().is_empty()) {
            SweepOutcome::NoTerms
        } else {
            match pipeline.run(&terms).await {
                Ok((matches, _stats)) => {
                    let matches = summarize_or_passthrough(summarizer, matches).await;
                    let message = render(&email, &matches);
                    if mailer.send(&email, &message).await {
                        SweepOutcome::Sent {
                            matches: matches.len(),
                        }
                    } else {
                        warn!(email = %email, "delivery failed");
                        SweepOutcome::SendFailed {
                            matches: matches.len(),
                        }
                    }
                }
                Err(e) => {
                    warn!(email = %email, error = %e, "pipeline run failed");
                    SweepOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };
        reports.push(SweepReport { email, outcome });
    }

    let sent = reports
        .iter()
        .filter(|r| matches!(r.outcome, SweepOutcome::Sent { .. }))
        .count();
    info!(sent, total = reports.len(), "notification sweep complete");
    reports
}
