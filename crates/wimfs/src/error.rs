use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  /// The bytes do not describe a WIM archive.
  #[error("invalid WIM: {0}")]
  Format(&'static str),
  /// A well-formed archive using a capability this reader does not have,
  /// such as spanned sets or XPRESS compression.
  #[error("unsupported WIM: {0}")]
  Unsupported(&'static str),
  /// Structurally damaged archive contents.
  #[error("corrupt WIM: {0}")]
  Corrupt(&'static str),
  #[error("invalid image XML data: {0}")]
  Xml(String),
  /// A directory entry whose hash has no lookup table resource.
  #[error("resource missing from lookup table")]
  MissingResource,
  #[error("not a directory: {0}")]
  NotADirectory(String),
  #[error("is a directory: {0}")]
  IsADirectory(String),
}

pub type Result<T> = std::result::Result<T, Error>;
