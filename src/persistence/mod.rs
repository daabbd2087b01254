pub mod autosave;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod persist;
pub mod settings;
