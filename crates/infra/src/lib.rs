//! Infrastructure layer: config, database, provider gateways, stores and the
//! concrete background tasks.

pub mod config;
pub mod db;
pub mod gateway;
pub mod store;
pub mod tasks;

mod integration_tests;

pub use config::{AppConfig, ConfigError};
pub use store::{StoreError, WorkItemStore};
pub use tasks::BackgroundTask;
