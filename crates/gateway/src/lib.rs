pub mod api;
pub mod app;
pub mod cli;
pub mod state;
pub mod transports;
