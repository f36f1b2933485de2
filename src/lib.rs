pub mod accounts;
pub mod billing;
pub mod config;
pub mod error;
pub mod identity;
pub mod routing;
pub mod server;
pub mod store;
pub mod support;
