//! Story graph model and its persistence: JSON codec, optional passphrase
//! encryption, and the service that swaps a loaded document into the model.

pub mod graph_utils;
pub mod persistence;

pub use graph_utils::graph::{GraphModel, NodeId, Position, ReplaceReport, StoryNode};
pub use persistence::codec::SerializedDocument;
pub use persistence::crypto::{CryptoBox, EncryptedEnvelope, KeyDerivation, Sha256KeyDerivation};
pub use persistence::error::{Result, StoryError};
pub use persistence::persist::PersistenceService;
