pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod gate;
pub mod limits;
pub mod params;
pub mod pipeline;
pub mod server;
pub mod vars;
