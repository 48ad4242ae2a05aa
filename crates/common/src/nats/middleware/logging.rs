use std::task::{Context, Poll};
use std::time::Instant;

use super::types::{PublishRequest, PublishResponse};
use crate::namespace::subject_organization;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, error, Instrument};

/// Logs every JetStream publish with its owning organization, size and latency
#[derive(Clone, Copy, Debug, Default)]
pub struct NatsPublishLoggingLayer;

impl NatsPublishLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsPublishLoggingLayer {
    type Service = NatsPublishLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NatsPublishLoggingService { inner }
    }
}

#[derive(Clone)]
pub struct NatsPublishLoggingService<S> {
    inner: S,
}

impl<S> Service<PublishRequest> for NatsPublishLoggingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse>,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = PublishResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<PublishResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let organization_id = subject_organization(&req.subject)
            .unwrap_or_default()
            .to_string();
        let subject = req.subject.clone();
        let payload_bytes = req.payload.len();
        let started = Instant::now();
        let publish = self.inner.call(req);

        Box::pin(
            async move {
                let result = publish.await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                if let Err(e) = &result {
                    error!(
                        subject = %subject,
                        organization_id = %organization_id,
                        payload_bytes,
                        elapsed_ms,
                        error = %e,
                        "publish failed"
                    );
                } else {
                    debug!(
                        subject = %subject,
                        organization_id = %organization_id,
                        payload_bytes,
                        elapsed_ms,
                        "published"
                    );
                }

                result
            }
            .in_current_span(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    #[tokio::test]
    async fn test_passes_response_and_error_through() {
        let ok = ServiceBuilder::new()
            .layer(NatsPublishLoggingLayer::new())
            .service(service_fn(|req: PublishRequest| async move {
                Ok::<_, anyhow::Error>(PublishResponse {
                    subject: req.subject,
                })
            }));
        let response = ok
            .oneshot(PublishRequest::new("notifications.orgA.d1", b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.subject, "notifications.orgA.d1");

        let failing = ServiceBuilder::new()
            .layer(NatsPublishLoggingLayer::new())
            .service(service_fn(|_: PublishRequest| async move {
                Err::<PublishResponse, _>(anyhow::anyhow!("no responders"))
            }));
        let err = failing
            .oneshot(PublishRequest::new("notifications.orgA.d1", b"{}".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no responders");
    }
}
