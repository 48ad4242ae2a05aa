mod config;
mod jwt;
mod traits;

pub use config::*;
pub use jwt::*;
pub use traits::*;
