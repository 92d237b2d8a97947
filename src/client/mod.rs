// Relay client module

pub mod key_store;
pub mod render;
pub mod session;

pub use key_store::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use render::Rendered;
pub use session::{ImageUpload, RelaySession, SessionError, SessionState, SubmitOutcome};
