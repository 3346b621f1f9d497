pub mod actor;
pub mod cli;
pub mod config;
pub mod env;
pub mod http;
pub mod notifier;
pub mod poller;
