use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Iso(#[from] isofs::Error),
  #[error(transparent)]
  Wim(#[from] wimfs::Error),
  #[error("unable to compile {pattern:?}: {source}")]
  Pattern {
    pattern: String,
    source: regex::Error,
  },
  #[error("unable to determine home directory")]
  HomeNotFound,
  #[error("unable to find sources directory")]
  SourcesNotFound,
  #[error("unable to find install.wim")]
  InstallWimNotFound,
  #[error("unable to find windows edition {0:?}")]
  EditionNotFound(String),
  #[error("fc-cache exited unsuccessfully: {0}")]
  FontCache(ExitStatus),
}

pub type Result<T> = std::result::Result<T, Error>;
