pub mod apply;
pub mod audit;
pub mod backup;
pub mod config;
pub mod diff;
pub mod errors;
pub mod init;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod ratelimit;
pub mod store;
pub mod util;
pub mod validate;
