mod api_handler;
mod api_server;
mod api_types;
mod telemetry_producer;

pub use api_handler::*;
pub use api_server::*;
pub use api_types::*;
pub use telemetry_producer::*;
