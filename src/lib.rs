pub mod api;
pub mod app;
pub mod config;
pub mod deploy;
pub mod error;
pub mod middleware;
pub mod shutdown;
pub mod state;
