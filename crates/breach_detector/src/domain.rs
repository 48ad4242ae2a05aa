mod breach_detector_service;
mod breach_rule;

pub use breach_detector_service::*;
pub use breach_rule::*;
