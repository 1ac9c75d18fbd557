//! Data sources: read-only lookups that never change remote state.

pub mod image;
