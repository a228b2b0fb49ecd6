pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod poller;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod submit;
pub mod task;
