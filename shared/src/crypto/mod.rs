//! Content hashing used to key submissions

pub mod hashing;

pub use hashing::*;
