use std::task::{Context, Poll};
use std::time::Instant;

use crate::namespace::subject_organization;
use crate::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument};

/// Logs the outcome of every consumed message, tagged with the owning organization
/// and the delivery attempt
#[derive(Clone, Copy, Debug, Default)]
pub struct NatsConsumeLoggingLayer;

impl NatsConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsConsumeLoggingLayer {
    type Service = NatsConsumeLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NatsConsumeLoggingService { inner }
    }
}

#[derive(Clone)]
pub struct NatsConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for NatsConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse>,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = ConsumeResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let organization_id = subject_organization(&req.subject)
            .unwrap_or_default()
            .to_string();
        let subject = req.subject.clone();
        let message_id = req.message_id.clone().unwrap_or_default();
        let delivered = req.delivered;
        let started = Instant::now();
        let handled = self.inner.call(req);

        Box::pin(
            async move {
                let result = handled.await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(ConsumeResponse::Ack) => debug!(
                        subject = %subject,
                        organization_id = %organization_id,
                        message_id = %message_id,
                        delivered,
                        elapsed_ms,
                        "message acked"
                    ),
                    Ok(ConsumeResponse::Nak(reason)) => warn!(
                        subject = %subject,
                        organization_id = %organization_id,
                        message_id = %message_id,
                        delivered,
                        elapsed_ms,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "message naked"
                    ),
                    Ok(ConsumeResponse::Reject(reason)) => error!(
                        subject = %subject,
                        organization_id = %organization_id,
                        message_id = %message_id,
                        delivered,
                        elapsed_ms,
                        reason = %reason,
                        "message rejected"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        organization_id = %organization_id,
                        message_id = %message_id,
                        delivered,
                        elapsed_ms,
                        error = %e,
                        "message handler failed"
                    ),
                }

                result
            }
            .in_current_span(),
        )
    }
}
