pub mod api;
pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod cors;
pub mod state;
pub mod telemetry;
