use clap::*;
use std::path::PathBuf;

use msfontextract::extract::Options;

/// msfontextract, the Microsoft Windows ISO font extraction tool.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
  /// Windows installation ISO to read.
  pub iso: PathBuf,

  /// Destination directory for extracted fonts.
  #[clap(long, default_value = "~/.fonts/msfonts")]
  pub dest: PathBuf,

  /// Refresh the font cache after extracting.
  #[clap(
    long,
    default_value_t = true,
    action = ArgAction::Set,
    num_args = 0..=1,
    require_equals = true,
    default_missing_value = "true"
  )]
  pub refresh: bool,

  /// Regular expression selecting the windows edition image.
  #[clap(long, default_value = "^Windows [0-9]+ Pro$")]
  pub edition: String,

  /// Regular expression selecting the file paths to extract.
  #[clap(long = "regexp", default_value = r"(?i)^windows/fonts/[^.]+\.tt[fc]$")]
  pub pattern: String,
}

impl Cli {
  pub fn into_options(self) -> Options {
    Options {
      iso: self.iso,
      dest: self.dest,
      edition: self.edition,
      pattern: self.pattern,
      refresh: self.refresh,
    }
  }
}

pub fn parse() -> Cli {
  Cli::parse()
}
