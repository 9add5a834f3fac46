pub mod app;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod plugin;

pub use app::{router, AppContext};
pub use error::GatewayError;
