#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid volume descriptor: {0}")]
  InvalidVolumeDescriptor(&'static str),
  #[error("no primary volume descriptor found")]
  MissingPrimaryVolume,
  #[error("invalid directory record: {0}")]
  InvalidDirectoryRecord(&'static str),
  #[error("invalid file identifier")]
  InvalidIdentifier,
  #[error("no such file or directory: {0}")]
  NotFound(String),
  #[error("not a directory: {0}")]
  NotADirectory(String),
  #[error("is a directory: {0}")]
  IsADirectory(String),
}

pub type Result<T> = std::result::Result<T, Error>;
