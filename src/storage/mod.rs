//! JSON storage for recorded interactions
//!
//! Layout: `<recording_dir>/<sequence>/<storage key><suffix>`, one file per
//! distinct request path, each a JSON array of interactions.

mod format;
mod key;
mod reader;
mod store;
mod writer;

pub use format::{
    HeaderValues, Headers, Interaction, RecordedRequest, RecordedResponse, StoredBody,
};
pub use key::{Generation, StorageKey, CURRENT_SUFFIX, LEGACY_SUFFIX};
pub use reader::{inventory, read_interactions, FileInventory, Resolution, SequenceInventory};
pub use store::RecordStore;
pub use writer::{WriteJob, WritePipeline, WriterStats};
