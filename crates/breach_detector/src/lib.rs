pub mod breach_detector;
pub mod domain;
pub mod nats;
pub mod supervisor;

pub use breach_detector::*;
pub use domain::*;
pub use nats::*;
pub use supervisor::*;
