//! Extracting Microsoft Windows fonts from an installation ISO.

pub mod error;
pub mod extract;

pub use error::{Error, Result};
