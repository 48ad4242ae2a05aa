use crate::domain::AlertHandler;
use crate::nats::AlertFanout;
use common::nats::QueueSubscriber;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct AlertNotifierConfig {
    pub subject: String,
    pub queue_group: String,
}

pub struct AlertNotifier {
    fanout: AlertFanout,
}

impl AlertNotifier {
    pub fn new(
        subscriber: Arc<dyn QueueSubscriber>,
        handler: Arc<dyn AlertHandler>,
        config: AlertNotifierConfig,
    ) -> Self {
        debug!(
            subject = %config.subject,
            queue_group = %config.queue_group,
            "initializing alert notifier module"
        );
        Self {
            fanout: AlertFanout::new(subscriber, handler, config.subject, config.queue_group),
        }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { self.fanout.run(ctx).await })
    }
}
