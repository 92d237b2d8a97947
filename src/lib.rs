pub mod client;
pub mod config;
pub mod relay;
pub mod upstream;
