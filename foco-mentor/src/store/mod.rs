//! Local persistence for chat sessions.

mod blob;
mod sessions;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use sessions::SessionStore;
#[cfg(test)]
pub use sessions::SESSIONS_KEY;
