pub mod schema;

pub use schema::{chartdesk_home, ApiConfig, Config, StorageConfig, DEFAULT_LOG_LEVEL};
