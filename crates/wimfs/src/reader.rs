//! Read-only access to WIM archives.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};
use crate::resource::{read_resource_vec, Resource};
use crate::spec::{
  self, Attributes, Compression, Dirent, Filetime, Hash, LookupEntry, ResourceFlags,
  ResourceHeader, WimHeader, HEADER_SIZE, LOOKUP_ENTRY_SIZE, ZERO_HASH,
};
use crate::xmldata;

/// One image of an archive, in metadata resource order.
#[derive(Debug, Clone)]
pub struct Image {
  index: u32,
  name: String,
  description: Option<String>,
  metadata: ResourceHeader,
}

impl Image {
  pub fn index(&self) -> u32 {
    self.index
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn description(&self) -> Option<&str> {
    self.description.as_deref()
  }
}

/// An image's directory tree, held in memory while it is walked.
pub struct Metadata {
  buffer: Vec<u8>,
  root_offset: u64,
}

/// A file or directory of an image.
#[derive(Debug, Clone)]
pub struct DirEntry {
  name: String,
  attributes: Attributes,
  hash: Hash,
  subdir_offset: u64,
  len: u64,
  last_write_time: Filetime,
}

impl DirEntry {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_dir(&self) -> bool {
    self.attributes.contains(Attributes::DIRECTORY)
  }

  pub fn is_reparse_point(&self) -> bool {
    self.attributes.contains(Attributes::REPARSE_POINT)
  }

  pub fn attributes(&self) -> Attributes {
    self.attributes
  }

  /// Uncompressed size of the file's contents.
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn last_write_time(&self) -> Filetime {
    self.last_write_time
  }
}

/// A mounted WIM archive.
pub struct WimReader<Storage> {
  storage: Storage,
  header: WimHeader,
  compression: Compression,
  images: Vec<Image>,
  resources: HashMap<Hash, ResourceHeader>,
}

impl<Storage> WimReader<Storage>
where
  Storage: Read + Seek,
{
  /// Mount the archive: validate the header, load the lookup table and
  /// pair its metadata entries with the XML data image descriptions.
  pub fn new(mut storage: Storage) -> Result<Self> {
    let mut buf = [0u8; HEADER_SIZE];
    storage.seek(SeekFrom::Start(0))?;
    storage.read_exact(&mut buf)?;

    let header = WimHeader::parse(&buf)?;
    if header.total_parts != 1 || header.part_number != 1 {
      return Err(Error::Unsupported("spanned archive set"));
    }

    let compression = header.compression()?;
    let chunk_size = header.chunk_size as u64;

    let table = read_resource_vec(&mut storage, &header.offset_table, compression, chunk_size)?;

    let mut metadata_entries = Vec::new();
    let mut resources = HashMap::new();
    for entry in table.chunks_exact(LOOKUP_ENTRY_SIZE) {
      let entry = LookupEntry::parse(entry)?;
      if entry.resource.flags.contains(ResourceFlags::FREE) {
        continue;
      }

      if entry.resource.is_metadata() {
        metadata_entries.push(entry.resource);
      } else {
        resources.insert(entry.hash, entry.resource);
      }
    }

    let info = if header.xml_data.original_size > 0 {
      let xml = read_resource_vec(&mut storage, &header.xml_data, compression, chunk_size)?;
      xmldata::parse_image_info(&xmldata::decode_xml(&xml)?)?
    } else {
      Vec::new()
    };

    if info.len() != metadata_entries.len() {
      log::warn!(
        "XML data describes {} images, archive has {}",
        info.len(),
        metadata_entries.len()
      );
    }

    let images = metadata_entries
      .into_iter()
      .enumerate()
      .map(|(position, metadata)| {
        let info = info.get(position);

        Image {
          index: info.map(|info| info.index).unwrap_or(position as u32 + 1),
          name: info.map(|info| info.name.clone()).unwrap_or_default(),
          description: info.and_then(|info| info.description.clone()),
          metadata,
        }
      })
      .collect::<Vec<_>>();

    log::debug!(
      "mounted WIM with {} images ({} resources, {:?})",
      images.len(),
      resources.len(),
      compression
    );

    Ok(Self {
      storage,
      header,
      compression,
      images,
      resources,
    })
  }

  pub fn images(&self) -> &[Image] {
    &self.images
  }

  /// Load the directory tree of `image` into memory.
  pub fn read_metadata(&mut self, image: &Image) -> Result<Metadata> {
    let buffer = read_resource_vec(
      &mut self.storage,
      &image.metadata,
      self.compression,
      self.header.chunk_size as u64,
    )?;
    let root_offset = spec::root_dirent_offset(&buffer)?;

    Ok(Metadata {
      buffer,
      root_offset,
    })
  }

  /// The root directory of an image.
  pub fn root(&self, metadata: &Metadata) -> Result<DirEntry> {
    let dirent = Dirent::parse(&metadata.buffer, metadata.root_offset)?
      .ok_or(Error::Corrupt("missing root directory entry"))?;

    Ok(self.entry_from_dirent(dirent))
  }

  /// The children of `entry`, in metadata order.
  pub fn read_dir(&self, metadata: &Metadata, entry: &DirEntry) -> Result<Vec<DirEntry>> {
    if !entry.is_dir() {
      return Err(Error::NotADirectory(entry.name.clone()));
    }

    let mut entries = Vec::new();
    let mut offset = entry.subdir_offset;

    while let Some(dirent) = Dirent::parse(&metadata.buffer, offset)? {
      offset = dirent.next_offset(&metadata.buffer, offset)?;
      entries.push(self.entry_from_dirent(dirent));
    }

    Ok(entries)
  }

  /// Open the contents of a file entry.
  pub fn open(&mut self, entry: &DirEntry) -> Result<Resource<'_, Storage>> {
    if entry.is_dir() {
      return Err(Error::IsADirectory(entry.name.clone()));
    }

    if entry.hash == ZERO_HASH {
      return Ok(Resource::empty(&mut self.storage));
    }

    let header = match self.resources.get(&entry.hash) {
      Some(header) => *header,
      None => return Err(Error::MissingResource),
    };

    log::debug!("opening {} ({} bytes)", entry.name, header.original_size);

    Resource::new(
      &mut self.storage,
      &header,
      self.compression,
      self.header.chunk_size as u64,
    )
  }

  fn entry_from_dirent(&self, dirent: Dirent) -> DirEntry {
    let len = if dirent.hash == ZERO_HASH {
      0
    } else {
      self
        .resources
        .get(&dirent.hash)
        .map(|resource| resource.original_size)
        .unwrap_or(0)
    };

    DirEntry {
      name: dirent.file_name,
      attributes: dirent.attributes,
      hash: dirent.hash,
      subdir_offset: dirent.subdir_offset,
      len,
      last_write_time: dirent.last_write_time,
    }
  }
}
