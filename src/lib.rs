pub mod api;
pub mod config;
pub mod files;
pub mod serdes;
pub mod store;
pub mod types;
pub mod worker;

pub use config::Config;
pub use types::ProxyConfig;
pub use types::request::{ConfigRequest, Mode};
