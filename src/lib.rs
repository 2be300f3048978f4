pub mod aggregate;
pub mod alert;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod model;
pub mod monitor;
pub mod resolver;
