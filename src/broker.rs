//! Optional AMQP notification channel.
//!
//! The broker only advertises that claimable work exists; the job tables
//! stay authoritative and every claim still goes through the database.
//! Publish failures are logged and swallowed so a broker outage never
//! fails a user request.

use std::time::Duration;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::PayloadType;

/// Maximum delivery attempts before a notice is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 5;

/// Retry backoff ladder: 1s, 2s, 4s, 8s, 16s, capped at 30s.
pub fn retry_delay(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(5);
    Duration::from_secs(secs.min(30))
}

/// What travels on the wire: enough to prompt a claim, nothing more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNotice {
    pub job_id: Uuid,
    pub priority: i32,
    #[serde(rename = "type")]
    pub kind: PayloadType,
}

// ── Publisher ───────────────────────────────────────────────────────

pub struct Notifier {
    channel: Channel,
    queue: String,
}

impl Notifier {
    /// Connect and declare the notification queue (and its dead-letter
    /// sibling) as durable.
    pub async fn connect(url: &str, queue: &str) -> anyhow::Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        channel
            .queue_declare(&dead_letter_queue(queue), options, FieldTable::default())
            .await?;

        info!(url, queue, "broker connected");
        Ok(Self {
            channel,
            queue: queue.to_owned(),
        })
    }

    /// Advertise a freshly created job. Failures degrade to polling.
    pub async fn notify_job(&self, job_id: Uuid, priority: i32) {
        let notice = JobNotice {
            job_id,
            priority,
            kind: PayloadType::Search,
        };
        if let Err(error) = self.publish(&self.queue, &notice, 0).await {
            warn!(%job_id, %error, "job notification failed, workers will poll");
        }
    }

    async fn publish(&self, queue: &str, notice: &JobNotice, attempts: u32) -> anyhow::Result<()> {
        let body = serde_json::to_vec(notice)?;
        let mut headers = FieldTable::default();
        headers.insert("x-attempts".into(), AMQPValue::LongUInt(attempts));

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_headers(headers),
            )
            .await?
            .await?;
        Ok(())
    }
}

// ── Consumer ────────────────────────────────────────────────────────

/// Consume job notices, handing each to `handler`.
///
/// A failed delivery is re-published with an incremented attempt counter
/// after its backoff delay; once [`MAX_ATTEMPTS`] is exhausted the notice
/// moves to the dead-letter queue. Malformed payloads dead-letter
/// immediately.
pub async fn consume<F, Fut>(
    notifier: &Notifier,
    consumer_tag: &str,
    handler: F,
) -> anyhow::Result<()>
where
    F: Fn(JobNotice) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut consumer = notifier
        .channel
        .basic_consume(
            &notifier.queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        let attempts = delivery
            .properties
            .headers()
            .as_ref()
            .and_then(|h| h.inner().get("x-attempts"))
            .and_then(|v| match v {
                AMQPValue::LongUInt(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0);

        let notice: JobNotice = match serde_json::from_slice(&delivery.data) {
            Ok(notice) => notice,
            Err(error) => {
                error!(%error, "undecodable job notice, dead-lettering");
                let raw = String::from_utf8_lossy(&delivery.data).into_owned();
                let _ = notifier
                    .channel
                    .basic_publish(
                        "",
                        &dead_letter_queue(&notifier.queue),
                        BasicPublishOptions::default(),
                        raw.as_bytes(),
                        BasicProperties::default(),
                    )
                    .await;
                delivery.ack(BasicAckOptions::default()).await?;
                continue;
            }
        };

        match handler(notice.clone()).await {
            Ok(()) => {}
            Err(error) if attempts + 1 >= MAX_ATTEMPTS => {
                error!(job_id = %notice.job_id, %error, attempts, "notice exhausted retries, dead-lettering");
                notifier
                    .publish(&dead_letter_queue(&notifier.queue), &notice, attempts + 1)
                    .await?;
            }
            Err(error) => {
                let delay = retry_delay(attempts);
                warn!(job_id = %notice.job_id, %error, attempts, ?delay, "notice handler failed, requeueing");
                tokio::time::sleep(delay).await;
                notifier.publish(&notifier.queue, &notice, attempts + 1).await?;
            }
        }
        delivery.ack(BasicAckOptions::default()).await?;
    }

    Ok(())
}

fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dead")
}
