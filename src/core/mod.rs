//! Foundational value-identity types shared across the engine.

pub mod properties;
pub mod requirement;
pub mod specification;
pub mod target;
pub mod value;
