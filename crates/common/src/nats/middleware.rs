mod consumer_logging;
mod consumer_types;
mod logging;
mod publisher;
mod types;

pub use consumer_logging::*;
pub use consumer_types::*;
pub use logging::*;
pub use publisher::*;
pub use types::*;
