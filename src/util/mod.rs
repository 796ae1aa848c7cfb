//! Small shared helpers kept dependency-light.
pub mod time;
