pub mod auth;
pub mod domain;
pub mod namespace;
pub mod nats;
pub mod redis;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use auth::MockDeviceCredentialProvider;
#[cfg(any(test, feature = "testing"))]
pub use domain::{
    InMemoryBreachCounterStore, MockAlertProducer, MockBreachCounterStore,
    MockTelemetryProducer, MockTenantRegistry,
};
#[cfg(any(test, feature = "testing"))]
pub use nats::{
    MockCorePublisher, MockJetStreamConsumer, MockJetStreamPublisher, MockMessageAcker,
    MockPullConsumer, MockQueueSubscriber, MockStreamManager,
};
