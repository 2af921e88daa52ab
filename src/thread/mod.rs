//! Thread-level views: message ordering and composer ownership.

pub mod registry;
pub mod sequence;

pub use registry::ComposerRegistry;
pub use sequence::{LiveEntry, ThreadEntry, ThreadMessageSequence};
