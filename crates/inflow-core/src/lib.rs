pub mod config;
pub mod cookie;
pub mod header;
pub mod types;

pub use config::{InflowConfig, ResponseConfig};
pub use cookie::set_cookies;
pub use header::{Header, HeaderMap};
pub use types::{canonical_reason, HttpFrame, HttpVersion, StreamPriority};
