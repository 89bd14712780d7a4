//! Small shared utilities.

pub mod collections;
pub mod id_generator;
