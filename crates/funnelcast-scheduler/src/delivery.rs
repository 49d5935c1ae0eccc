//! Delivery orchestration: one broadcast to many recipients.
//!
//! Sends are strictly sequential with a fixed pacing delay, a deliberate
//! throughput cap for the platform's per-bot rate limit rather than a
//! correctness mechanism. One recipient failing (blocked bot, dead account, timeout)
//! never aborts the batch; an `Err` from this module means the batch never
//! reached the sending stage at all.

use std::time::Duration;

use funnelcast_core::error::{FunnelcastError, Result};
use funnelcast_core::traits::Transport;
use funnelcast_db::Broadcast;

/// Per-batch tuning.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Delay between individual sends.
    pub pacing: Duration,
    /// Cap on a single send; expiry counts as that recipient failing so one
    /// hung call cannot stall the whole process.
    pub send_timeout: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(100),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome counters for one delivery run. Informational: failed recipients
/// are not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Send `broadcast` to every recipient in order.
pub async fn deliver<T: Transport>(
    transport: &T,
    broadcast: &Broadcast,
    recipients: &[i64],
    opts: &DeliveryOptions,
) -> Result<DeliveryReport> {
    if broadcast.body.text.trim().is_empty() {
        return Err(FunnelcastError::Schedule(format!(
            "broadcast '{}' ({}) has an empty body",
            broadcast.name, broadcast.id
        )));
    }

    let mut report = DeliveryReport::default();
    for &recipient in recipients {
        report.attempted += 1;
        match tokio::time::timeout(
            opts.send_timeout,
            transport.send_broadcast(recipient, &broadcast.body),
        )
        .await
        {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
                report.failed += 1;
                tracing::warn!(
                    "Send to {recipient} failed for broadcast '{}' ({}): {e}",
                    broadcast.name,
                    broadcast.id
                );
            }
            Err(_) => {
                report.failed += 1;
                tracing::warn!(
                    "Send to {recipient} timed out for broadcast '{}' ({})",
                    broadcast.name,
                    broadcast.id
                );
            }
        }

        if !opts.pacing.is_zero() {
            tokio::time::sleep(opts.pacing).await;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use funnelcast_core::types::{AudienceRule, BroadcastBody};
    use funnelcast_db::BotDb;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MockTransport {
        fail_for: HashSet<i64>,
        hang_for: HashSet<i64>,
        sent_to: Mutex<Vec<i64>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                fail_for: HashSet::new(),
                hang_for: HashSet::new(),
                sent_to: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_broadcast(&self, recipient_id: i64, _body: &BroadcastBody) -> Result<()> {
            if self.hang_for.contains(&recipient_id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_for.contains(&recipient_id) {
                return Err(FunnelcastError::Channel("bot was blocked by the user".into()));
            }
            self.sent_to.lock().unwrap().push(recipient_id);
            Ok(())
        }

        async fn check_membership(&self, _recipient_id: i64, _channel: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn make_broadcast(text: &str) -> Broadcast {
        let db = BotDb::open_in_memory().unwrap();
        let id = db
            .create_broadcast("t", &BroadcastBody::text(text), &AudienceRule::All)
            .unwrap();
        db.get_broadcast(id).unwrap().unwrap()
    }

    fn fast() -> DeliveryOptions {
        DeliveryOptions {
            pacing: Duration::ZERO,
            send_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let mut transport = MockTransport::new();
        transport.fail_for.insert(3);
        let broadcast = make_broadcast("hello");

        let report = deliver(&transport, &broadcast, &[1, 2, 3, 4, 5], &fast())
            .await
            .unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 4);
        assert_eq!(report.failed, 1);
        // Recipients after the failing one were still attempted, in order
        assert_eq!(*transport.sent_to.lock().unwrap(), vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn test_hung_send_counts_as_recipient_failure() {
        let mut transport = MockTransport::new();
        transport.hang_for.insert(2);
        let broadcast = make_broadcast("hello");

        let report = deliver(&transport, &broadcast, &[1, 2, 3], &fast())
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_empty_body_never_reaches_the_transport() {
        let transport = MockTransport::new();
        let broadcast = make_broadcast("hello");
        let mut blank = broadcast.clone();
        blank.body.text = "   ".into();

        assert!(deliver(&transport, &blank, &[1, 2], &fast()).await.is_err());
        assert!(transport.sent_to.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_audience_is_a_vacuous_success() {
        let transport = MockTransport::new();
        let broadcast = make_broadcast("hello");
        let report = deliver(&transport, &broadcast, &[], &fast()).await.unwrap();
        assert_eq!(report, DeliveryReport::default());
    }
}
