use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::model::{Currency, EntityKey, Location, OwnerId, Subscription, SubscriptionId};

/// When a subscriber wants to hear about a price change. Exactly one rule is
/// active per subscription.
///
/// In configuration: `rule = "always"` or `rule = { below_threshold = 98.0 }`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationRule {
    #[default]
    Always,
    BelowThreshold(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Higher,
    Lower,
}

/// Direction and size of a price move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceChange {
    pub old: f64,
    pub new: f64,
    pub direction: Direction,
    pub magnitude: f64,
}

/// Decides whether `rule` fires for a move from `old` to `new`.
///
/// Stateless: a threshold rule fires on every changed price below the
/// threshold and stays silent above it, whatever happened before.
pub fn evaluate(rule: &NotificationRule, old: f64, new: f64) -> Option<PriceChange> {
    if old == new {
        return None;
    }
    let fires = match rule {
        NotificationRule::Always => true,
        NotificationRule::BelowThreshold(threshold) => new < *threshold,
    };
    if !fires {
        return None;
    }
    Some(PriceChange {
        old,
        new,
        direction: if new > old {
            Direction::Higher
        } else {
            Direction::Lower
        },
        magnitude: (new - old).abs(),
    })
}

/// A message ready for the delivery channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationIntent {
    pub subscription: SubscriptionId,
    pub recipient: OwnerId,
    pub entity: EntityKey,
    pub entity_name: String,
    pub url: String,
    pub location: Location,
    pub old_price: f64,
    pub new_price: f64,
    pub currency: Currency,
    pub direction: Direction,
    pub magnitude: f64,
    /// HTML text as shown to the subscriber.
    pub message: String,
}

impl NotificationIntent {
    pub fn new(sub: &Subscription, entity_name: &str, change: PriceChange, currency: Currency) -> Self {
        let url = sub.entity.url(sub.location);
        let message = render_message(&url, entity_name, &change, currency);
        Self {
            subscription: sub.id,
            recipient: sub.owner,
            entity: sub.entity.key(),
            entity_name: entity_name.to_string(),
            url,
            location: sub.location,
            old_price: change.old,
            new_price: change.new,
            currency,
            direction: change.direction,
            magnitude: change.magnitude,
            message,
        }
    }
}

fn render_message(url: &str, name: &str, change: &PriceChange, currency: Currency) -> String {
    let link = format!("<a href=\"{}\">{}</a>", escape_html(url), escape_html(name.trim()));
    let price = format!("<b>{}</b>", currency.format(change.new));
    let diff = format!("<b>{}</b>", currency.format(change.magnitude));
    let line = match change.direction {
        Direction::Higher => format!("📈 {diff} more expensive"),
        Direction::Lower => format!("📉 {diff} cheaper"),
    };
    format!("The price of {link} has changed: {price}\n\n{line}")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Delivery channel for notifications. Best effort: failures are logged by
/// the caller and never undo a stored price.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, intent: &NotificationIntent) -> anyhow::Result<()>;
}

/// Logs every notification and republishes it to in-process listeners
/// (the `/notifications/stream` endpoint).
pub struct ChannelSink {
    tx: broadcast::Sender<NotificationIntent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationIntent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, intent: &NotificationIntent) -> anyhow::Result<()> {
        info!(
            recipient = %intent.recipient,
            entity = %intent.entity,
            old = intent.old_price,
            new = intent.new_price,
            "notification"
        );
        if self.tx.send(intent.clone()).is_err() {
            debug!("no notification listeners connected");
        }
        Ok(())
    }
}
