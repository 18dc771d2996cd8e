//! Alert evaluation server: wires the query engine, the credential store,
//! the dispatcher and the cron scheduler around [`runner::AlertRunner`].

pub mod compose;
pub mod config;
pub mod query_client;
pub mod render;
pub mod runner;
pub mod scheduler;
pub mod settings;
