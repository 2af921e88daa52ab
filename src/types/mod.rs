//! Core types for threadline.

pub mod message;
pub mod stream;

pub use message::*;
pub use stream::*;
