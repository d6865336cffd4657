//! Wire and domain types shared between the console and its core.
pub mod domain;
pub mod error;
pub mod protocol;
