pub mod loader;
pub mod schema;

pub use loader::{config_from_env, load_config, load_config_from_str, load_default_config};
pub use schema::{ClaimConfig, FetchConfig, OcrConfig, PollConfig, StoreConfig, WorkerConfig};
