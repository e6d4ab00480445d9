//! Cache entries
//!
//! A cache entry is a directory holding the image id marker, the image
//! manifest and the blobs the manifest references. Local and remote
//! backends share this layout; the remote backend mirrors each file to an
//! object keyed `<key>/<relative path>`.

pub mod layout;
pub mod manifest;

pub use layout::{EntryDir, EntryLayout, BLOBS_DIR, IMAGE_ID_FILENAME, MANIFEST_FILENAME};
pub use manifest::{blob_name, image_blob_name, ConfigRef, Descriptor, Manifest, SchemaVersion};
