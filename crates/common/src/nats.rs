mod client;
mod durable_consumer;
mod message;
mod middleware;
mod traits;

pub use client::*;
pub use durable_consumer::*;
pub use message::*;
pub use middleware::*;
pub use traits::*;
