pub mod alert_notifier;
pub mod domain;
pub mod nats;

pub use alert_notifier::*;
pub use domain::*;
pub use nats::*;
