pub mod domain;
pub mod nats;
pub mod tenant_api;

pub use domain::*;
pub use nats::*;
pub use tenant_api::*;
