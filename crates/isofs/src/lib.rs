//! Reading ISO 9660 filesystem images, with Joliet support.

pub mod error;
pub mod path;
pub mod reader;
pub mod spec;

pub use error::{Error, Result};
pub use reader::{DirEntry, Extent, ExtentReader, IsoReader};
