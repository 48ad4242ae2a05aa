mod alert_producer;
mod telemetry_consumer_service;

pub use alert_producer::*;
pub use telemetry_consumer_service::*;
