//! nodulyx-common — Shared types, errors, and the XML tree used across all Nodulyx crates.

pub mod error;
pub mod value;
pub mod xml;

// Re-export commonly used types
pub use error::{NodulyxError, Result};
pub use value::{ScalarValue, TaggedValue};
pub use xml::{XmlDocument, XmlElement};
