//! The extraction pipeline: locate `sources/install.wim` on the disc,
//! pick the requested Windows edition and copy every matching font file
//! out of its image tree into one flat destination directory.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use regex::Regex;

use isofs::IsoReader;
use wimfs::WimReader;

use crate::error::{Error, Result};

/// Everything one extraction run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct Options {
  pub iso: PathBuf,
  pub dest: PathBuf,
  pub edition: String,
  pub pattern: String,
  pub refresh: bool,
}

/// Run the pipeline described by `options`.
///
/// Both patterns are compiled before anything touches the filesystem, so
/// a configuration mistake never leaves a half-made destination behind.
/// Everything after that is fail-fast: the first error aborts the run and
/// already extracted files stay where they are.
pub fn run(options: &Options) -> Result<()> {
  let edition = compile(&options.edition)?;
  let pattern = compile(&options.pattern)?;

  let dest = expand(&options.dest, home::home_dir())?;
  fs::create_dir_all(&dest)?;

  let file = File::open(&options.iso)?;
  let mut iso = IsoReader::new(BufReader::new(file))?;

  let root = iso.root().clone();
  let sources = find_sources(&mut iso, &root)?;
  let install = find_install_wim(&mut iso, &sources)?;

  let mut wim = WimReader::new(iso.open(&install)?)?;

  let image = select_image(wim.images(), &edition)?.clone();
  log::debug!("selected image {:?} (index {})", image.name(), image.index());

  let metadata = wim.read_metadata(&image)?;
  let tree_root = wim.root(&metadata)?;

  let mut tree = WimTree { wim, metadata };
  extract_tree(&mut tree, &tree_root, "", &pattern, &dest)?;

  if options.refresh {
    refresh_font_cache()?;
  }

  Ok(())
}

/// Expand a leading `~` to the given home directory.
///
/// Exactly `~` and `~/...` are expanded; anything else (including
/// `~user/...`) passes through unchanged. The home directory is only
/// required when the path actually begins with the shorthand.
pub fn expand(path: &Path, home: Option<PathBuf>) -> Result<PathBuf> {
  match path.strip_prefix("~") {
    Ok(rest) => {
      let home = home.ok_or(Error::HomeNotFound)?;
      if rest.as_os_str().is_empty() {
        Ok(home)
      } else {
        Ok(home.join(rest))
      }
    }
    Err(_) => Ok(path.to_owned()),
  }
}

fn compile(pattern: &str) -> Result<Regex> {
  Regex::new(pattern).map_err(|source| Error::Pattern {
    pattern: pattern.to_owned(),
    source,
  })
}

fn find_sources<Storage>(
  iso: &mut IsoReader<Storage>,
  root: &isofs::DirEntry,
) -> Result<isofs::DirEntry>
where
  Storage: Read + Seek,
{
  iso
    .read_dir(root)?
    .into_iter()
    .find(|entry| entry.is_dir() && entry.name().eq_ignore_ascii_case("sources"))
    .ok_or(Error::SourcesNotFound)
}

fn find_install_wim<Storage>(
  iso: &mut IsoReader<Storage>,
  sources: &isofs::DirEntry,
) -> Result<isofs::DirEntry>
where
  Storage: Read + Seek,
{
  iso
    .read_dir(sources)?
    .into_iter()
    .find(|entry| !entry.is_dir() && entry.name().eq_ignore_ascii_case("install.wim"))
    .ok_or(Error::InstallWimNotFound)
}

fn select_image<'a>(images: &'a [wimfs::Image], edition: &Regex) -> Result<&'a wimfs::Image> {
  images
    .iter()
    .find(|image| edition.is_match(image.name()))
    .ok_or_else(|| Error::EditionNotFound(edition.as_str().to_owned()))
}

/// A directory tree that can be walked and read from.
///
/// The WIM image tree is the one that matters in production; tests walk
/// an in-memory one.
pub trait Tree {
  type Node;

  fn name<'a>(&self, node: &'a Self::Node) -> &'a str;
  fn is_dir(&self, node: &Self::Node) -> bool;
  fn children(&mut self, node: &Self::Node) -> Result<Vec<Self::Node>>;
  fn open<'a>(&'a mut self, node: &Self::Node) -> Result<Box<dyn Read + 'a>>;
}

struct WimTree<Storage> {
  wim: WimReader<Storage>,
  metadata: wimfs::Metadata,
}

impl<Storage> Tree for WimTree<Storage>
where
  Storage: Read + Seek,
{
  type Node = wimfs::DirEntry;

  fn name<'a>(&self, node: &'a wimfs::DirEntry) -> &'a str {
    node.name()
  }

  fn is_dir(&self, node: &wimfs::DirEntry) -> bool {
    node.is_dir()
  }

  fn children(&mut self, node: &wimfs::DirEntry) -> Result<Vec<wimfs::DirEntry>> {
    Ok(self.wim.read_dir(&self.metadata, node)?)
  }

  fn open<'a>(&'a mut self, node: &wimfs::DirEntry) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(self.wim.open(node)?))
  }
}

/// Walk `directory` depth-first in listing order, copying every file whose
/// accumulated `/`-joined path matches `pattern` into `dest` under its
/// base name. Later matches overwrite earlier ones of the same name.
fn extract_tree<T>(
  tree: &mut T,
  directory: &T::Node,
  prefix: &str,
  pattern: &Regex,
  dest: &Path,
) -> Result<()>
where
  T: Tree,
{
  for child in tree.children(directory)? {
    let path = join_path(prefix, tree.name(&child));

    if tree.is_dir(&child) {
      extract_tree(tree, &child, &path, pattern, dest)?;
      continue;
    }

    if !pattern.is_match(&path) {
      continue;
    }

    log::info!("extracting {path}");

    // The source is opened first so an unreadable entry never truncates
    // or creates anything under dest.
    let target = dest.join(tree.name(&child));
    let mut input = tree.open(&child)?;
    let mut output = File::create(target)?;
    io::copy(&mut input, &mut output)?;
  }

  Ok(())
}

fn join_path(prefix: &str, name: &str) -> String {
  if prefix.is_empty() {
    name.to_owned()
  } else {
    format!("{prefix}/{name}")
  }
}

fn refresh_font_cache() -> Result<()> {
  log::debug!("refreshing font cache");

  let status = Command::new("fc-cache")
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status()?;

  if !status.success() {
    return Err(Error::FontCache(status));
  }

  Ok(())
}
