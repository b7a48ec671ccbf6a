//! Artifact Codec: packs/unpacks the steganographic `.fastshot` body
//! format (§4.2) and derives the metadata-index rows the cache layer
//! persists.

mod codec;
mod collage;
mod error;
mod session;
mod xor;

pub use codec::{decode, derive_index, derive_legacy_index, encode, ImageFiles};
pub use collage::{grid_dims, thumbnail_collage};
pub use error::Error;
pub use session::{Geometry, ImagePayload, Session, WindowCapture};
pub use xor::{find_sentinel, xor_keystream};
