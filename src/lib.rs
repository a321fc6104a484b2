pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod listings;
pub mod logging;
pub mod retry;
pub mod reviews;
pub mod storage;
pub mod types;
