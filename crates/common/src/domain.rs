mod counter_store;
mod organization;
mod producer;
mod result;
mod telemetry;
mod tenant_registry;

pub use counter_store::*;
pub use organization::*;
pub use producer::*;
pub use result::*;
pub use telemetry::*;
pub use tenant_registry::*;
