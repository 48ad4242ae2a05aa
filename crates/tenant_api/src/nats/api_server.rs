use crate::nats::TenantApiHandler;
use anyhow::{anyhow, Context};
use common::nats::{CoreMessage, CorePublisher, QueueSubscriber};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Request-reply API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Endpoints are served under `<subject_prefix>.<endpoint>`
    pub subject_prefix: String,
    pub queue_group: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "vigil.api".to_string(),
            queue_group: "tenant-api".to_string(),
        }
    }
}

/// Serves the tenant API over NATS request-reply.
///
/// Every replica joins the same queue group, so each request is answered once.
pub struct TenantApiServer {
    subscriber: Arc<dyn QueueSubscriber>,
    replier: Arc<dyn CorePublisher>,
    config: ApiServerConfig,
}

impl TenantApiServer {
    pub fn new(
        subscriber: Arc<dyn QueueSubscriber>,
        replier: Arc<dyn CorePublisher>,
        config: ApiServerConfig,
    ) -> Self {
        Self {
            subscriber,
            replier,
            config,
        }
    }

    /// Answer requests until cancelled, then finish the ones in flight
    pub async fn run(self, handler: TenantApiHandler, ctx: CancellationToken) -> anyhow::Result<()> {
        let subject = format!("{}.>", self.config.subject_prefix);
        let mut requests = self
            .subscriber
            .queue_subscribe(subject.clone(), self.config.queue_group.clone())
            .await
            .context("failed to subscribe to api requests")?;

        info!(
            subject = %subject,
            queue_group = %self.config.queue_group,
            "tenant api listening"
        );

        let endpoint_prefix = format!("{}.", self.config.subject_prefix);
        let mut in_flight = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = ctx.cancelled() => break Ok(()),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "api request task panicked");
                    }
                }
                request = requests.next() => match request {
                    Some(request) => {
                        let handler = handler.clone();
                        let replier = Arc::clone(&self.replier);
                        let endpoint_prefix = endpoint_prefix.clone();
                        in_flight.spawn(async move {
                            answer(&handler, replier.as_ref(), &endpoint_prefix, request).await
                        });
                    }
                    None => break Err(anyhow!("api subscription on {} closed", subject)),
                },
            }
        };

        if !in_flight.is_empty() {
            info!(requests = in_flight.len(), "finishing in-flight api requests");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "api request task panicked");
            }
        }

        result?;
        info!("tenant api stopped");
        Ok(())
    }
}

async fn answer(
    handler: &TenantApiHandler,
    replier: &dyn CorePublisher,
    endpoint_prefix: &str,
    request: CoreMessage,
) {
    let endpoint = request
        .subject
        .strip_prefix(endpoint_prefix)
        .unwrap_or_default();
    let reply = handler.dispatch(endpoint, &request.payload).await;

    let Some(inbox) = request.reply else {
        debug!(subject = %request.subject, "request without reply inbox, answer dropped");
        return;
    };

    if let Err(e) = replier.publish(inbox, reply).await {
        warn!(subject = %request.subject, error = %e, "failed to send api reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceService, IngestionService, OrganizationService, TenantProvisioner};
    use bytes::Bytes;
    use common::auth::MockDeviceCredentialProvider;
    use common::domain::{InMemoryTenantRegistry, MockTelemetryProducer, TenantRegistry};
    use common::nats::{MockCorePublisher, MockQueueSubscriber, MockStreamManager, StreamCreateOutcome};
    use std::sync::Mutex;
    use std::time::Duration;

    fn handler(streams: MockStreamManager) -> TenantApiHandler {
        let registry: Arc<dyn TenantRegistry> = Arc::new(InMemoryTenantRegistry::new());
        let credentials = Arc::new(MockDeviceCredentialProvider::new());
        let provisioner = Arc::new(TenantProvisioner::new(Arc::new(streams), registry.clone()));

        TenantApiHandler::new(
            Arc::new(OrganizationService::new(provisioner, registry.clone())),
            Arc::new(DeviceService::new(
                registry.clone(),
                credentials.clone(),
                Duration::from_secs(3600),
            )),
            Arc::new(IngestionService::new(
                credentials,
                registry,
                Arc::new(MockTelemetryProducer::new()),
            )),
        )
    }

    fn request(subject: &str, payload: &str, reply: Option<&str>) -> CoreMessage {
        CoreMessage {
            subject: subject.to_string(),
            payload: Bytes::from(payload.to_string()),
            reply: reply.map(str::to_string),
        }
    }

    /// Subscriber that yields `messages` and then stays open
    fn subscriber_with(messages: Vec<CoreMessage>) -> MockQueueSubscriber {
        let mut subscriber = MockQueueSubscriber::new();
        let mut messages = Some(messages);
        subscriber
            .expect_queue_subscribe()
            .withf(|subject, group| subject == "vigil.api.>" && group == "tenant-api")
            .times(1)
            .returning(move |_, _| {
                let items = messages.take().unwrap_or_default();
                Ok(futures::stream::iter(items)
                    .chain(futures::stream::pending())
                    .boxed())
            });
        subscriber
    }

    #[tokio::test]
    async fn test_requests_are_answered_on_their_inbox() {
        let mut streams = MockStreamManager::new();
        streams.expect_stream_exists().returning(|_| Ok(false));
        streams
            .expect_create_stream()
            .times(1)
            .returning(|_| Ok(StreamCreateOutcome::Created));

        let replies = Arc::new(Mutex::new(Vec::new()));
        let sent = replies.clone();
        let mut replier = MockCorePublisher::new();
        replier.expect_publish().returning(move |subject, payload| {
            sent.lock().unwrap().push((subject, payload));
            Ok(())
        });

        let server = TenantApiServer::new(
            Arc::new(subscriber_with(vec![
                request(
                    "vigil.api.organizations.create",
                    r#"{"id":"acme","name":"Acme"}"#,
                    Some("_INBOX.1"),
                ),
                request("vigil.api.organizations.get", r#"{"id":"ghost"}"#, Some("_INBOX.2")),
                // fire-and-forget: handled, nothing to answer
                request("vigil.api.organizations.list", "", None),
            ])),
            Arc::new(replier),
            ApiServerConfig::default(),
        );

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(server.run(handler(streams), ctx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());

        let mut replies = replies.lock().unwrap().clone();
        replies.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(replies.len(), 2);

        let created: serde_json::Value = serde_json::from_slice(&replies[0].1).unwrap();
        assert_eq!(replies[0].0, "_INBOX.1");
        assert_eq!(created["ok"]["organization"]["stream_name"], "ORG_acme_STREAM");

        let missing: serde_json::Value = serde_json::from_slice(&replies[1].1).unwrap();
        assert_eq!(replies[1].0, "_INBOX.2");
        assert_eq!(missing["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_an_error() {
        let mut subscriber = MockQueueSubscriber::new();
        subscriber
            .expect_queue_subscribe()
            .returning(|_, _| Err(anyhow::anyhow!("not connected")));

        let server = TenantApiServer::new(
            Arc::new(subscriber),
            Arc::new(MockCorePublisher::new()),
            ApiServerConfig::default(),
        );

        let err = server
            .run(handler(MockStreamManager::new()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to subscribe to api requests"));
    }

    #[tokio::test]
    async fn test_closed_subscription_is_an_error() {
        let mut subscriber = MockQueueSubscriber::new();
        subscriber
            .expect_queue_subscribe()
            .returning(|_, _| Ok(futures::stream::empty().boxed()));

        let server = TenantApiServer::new(
            Arc::new(subscriber),
            Arc::new(MockCorePublisher::new()),
            ApiServerConfig::default(),
        );

        assert!(server
            .run(handler(MockStreamManager::new()), CancellationToken::new())
            .await
            .is_err());
    }
}
