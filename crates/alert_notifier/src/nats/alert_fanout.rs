use crate::domain::AlertHandler;
use anyhow::{bail, Context};
use common::domain::AlertEvent;
use common::nats::{CoreMessage, QueueSubscriber};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Queue-group subscriber delivering each alert to exactly one group member.
///
/// Delivery is fire-and-forget: undecodable alerts and handler failures are logged and
/// the alert is dropped.
pub struct AlertFanout {
    subscriber: Arc<dyn QueueSubscriber>,
    handler: Arc<dyn AlertHandler>,
    subject: String,
    queue_group: String,
}

impl AlertFanout {
    pub fn new(
        subscriber: Arc<dyn QueueSubscriber>,
        handler: Arc<dyn AlertHandler>,
        subject: impl Into<String>,
        queue_group: impl Into<String>,
    ) -> Self {
        Self {
            subscriber,
            handler,
            subject: subject.into(),
            queue_group: queue_group.into(),
        }
    }

    /// Runs until cancelled. An alert already being handled is finished before the
    /// subscription is dropped.
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let mut messages = self
            .subscriber
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .context("failed to subscribe to alerts")?;

        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "alert fan-out subscribed"
        );

        loop {
            let message = tokio::select! {
                _ = ctx.cancelled() => break,
                message = messages.next() => message,
            };

            match message {
                Some(message) => self.dispatch(message).await,
                None => bail!("alert subscription on {} closed", self.subject),
            }
        }

        info!(subject = %self.subject, "alert fan-out stopped");
        Ok(())
    }

    async fn dispatch(&self, message: CoreMessage) {
        let alert = match AlertEvent::decode(&message.payload) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "dropping undecodable alert");
                return;
            }
        };

        if alert.subject() != message.subject {
            warn!(
                subject = %message.subject,
                organization_id = %alert.organization_id,
                device_id = %alert.device_id,
                "dropping alert that does not match its subject"
            );
            return;
        }

        match self.handler.handle(&alert).await {
            Ok(()) => debug!(subject = %message.subject, "alert handled"),
            Err(e) => error!(
                subject = %message.subject,
                error = %format!("{:#}", e),
                "alert handler failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockAlertHandler;
    use bytes::Bytes;
    use common::nats::MockQueueSubscriber;
    use std::time::Duration;

    fn message(subject: &str, payload: &str) -> CoreMessage {
        CoreMessage {
            subject: subject.to_string(),
            payload: Bytes::from(payload.to_string()),
            reply: None,
        }
    }

    const ALERT: &str = r#"{"organization_id":"acme","device_id":"machine-123","sensor_name":"temp1","condition":"Consecutive Temp Threshold Breach"}"#;

    /// Subscriber that yields `messages` and then stays open
    fn subscriber_with(messages: Vec<CoreMessage>) -> MockQueueSubscriber {
        let mut subscriber = MockQueueSubscriber::new();
        let mut messages = Some(messages);
        subscriber
            .expect_queue_subscribe()
            .withf(|subject, group| subject == "notifications.>" && group == "notification-group")
            .times(1)
            .returning(move |_, _| {
                let items = messages.take().unwrap_or_default();
                Ok(futures::stream::iter(items)
                    .chain(futures::stream::pending())
                    .boxed())
            });
        subscriber
    }

    async fn run_briefly(fanout: AlertFanout) -> anyhow::Result<()> {
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(fanout.run(ctx.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_alerts_are_handled() {
        let mut handler = MockAlertHandler::new();
        handler
            .expect_handle()
            .withf(|alert| alert.device_id == "machine-123" && alert.sensor_name == "temp1")
            .times(1)
            .returning(|_| Ok(()));

        let fanout = AlertFanout::new(
            Arc::new(subscriber_with(vec![message(
                "notifications.acme.machine-123",
                ALERT,
            )])),
            Arc::new(handler),
            "notifications.>",
            "notification-group",
        );

        assert!(run_briefly(fanout).await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_alerts_are_dropped_and_later_ones_still_handled() {
        let mut handler = MockAlertHandler::new();
        let mut calls = 0;
        handler.expect_handle().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(anyhow::anyhow!("smtp unreachable"))
            } else {
                Ok(())
            }
        });

        let fanout = AlertFanout::new(
            Arc::new(subscriber_with(vec![
                message("notifications.acme.machine-123", "not json"),
                message("notifications.globex.machine-123", ALERT),
                message("notifications.acme.machine-123", ALERT),
                message("notifications.acme.machine-123", ALERT),
            ])),
            Arc::new(handler),
            "notifications.>",
            "notification-group",
        );

        assert!(run_briefly(fanout).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_an_error() {
        let mut subscriber = MockQueueSubscriber::new();
        subscriber
            .expect_queue_subscribe()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("not connected")));

        let fanout = AlertFanout::new(
            Arc::new(subscriber),
            Arc::new(MockAlertHandler::new()),
            "notifications.>",
            "notification-group",
        );

        let err = fanout.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to subscribe to alerts"));
    }

    #[tokio::test]
    async fn test_closed_subscription_is_an_error() {
        let mut subscriber = MockQueueSubscriber::new();
        subscriber
            .expect_queue_subscribe()
            .times(1)
            .returning(|_, _| Ok(futures::stream::empty().boxed()));

        let fanout = AlertFanout::new(
            Arc::new(subscriber),
            Arc::new(MockAlertHandler::new()),
            "notifications.>",
            "notification-group",
        );

        assert!(fanout.run(CancellationToken::new()).await.is_err());
    }
}
