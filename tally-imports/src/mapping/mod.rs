//! Canonical field mapping
//!
//! Folding ([`normalize`]), locale-aware value parsing ([`values`]),
//! built-in alias tables ([`aliases`]) and the mapper itself ([`mapper`]).

pub mod aliases;
pub mod mapper;
pub mod normalize;
pub mod values;

pub use mapper::{CanonicalMapper, MappingResult};
