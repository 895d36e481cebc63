pub mod agent;
pub mod branching;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod model;
pub mod store;
