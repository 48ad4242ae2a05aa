mod alert_fanout;

pub use alert_fanout::*;
