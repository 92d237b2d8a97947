// Relay service module

pub mod classifier;
pub mod envelope;
pub mod handlers;
pub mod server;

pub use server::RelayServer;
