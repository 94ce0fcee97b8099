//! Reading Windows Imaging Format (WIM) archives.

pub mod error;
pub mod lzx;
pub mod reader;
pub mod resource;
pub mod spec;
pub mod xmldata;

pub use error::{Error, Result};
pub use reader::{DirEntry, Image, Metadata, WimReader};
pub use resource::Resource;
