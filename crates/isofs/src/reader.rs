//! Read-only access to ISO 9660 volumes.
//!
//! [`IsoReader`] mounts a volume over any [`Read`] + [`Seek`] storage,
//! preferring a Joliet supplementary descriptor over the primary one when
//! present so that long mixed-case names survive.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};
use crate::path::IsoPath;
use crate::spec::{
  self, DirectoryRecord, FileFlags, JolietLevel, RecordingDate, VolumeDescriptor,
  VolumeDescriptorType, SECTOR_SIZE, VOLUME_DESCRIPTOR_SET_LBA,
};

/// Upper bound on the number of sectors scanned for the volume descriptor
/// set terminator.
const VOLUME_DESCRIPTOR_SET_LIMIT: u64 = 100;

/// A contiguous run of logical blocks holding file or directory data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
  pub location: u32,
  pub length: u32,
}

/// A named entry of a directory, with its data extents already resolved.
///
/// Files recorded across several directory records (the multi extent case)
/// appear as a single entry whose extents are in recording order.
#[derive(Debug, Clone)]
pub struct DirEntry {
  name: String,
  flags: FileFlags,
  extents: Vec<Extent>,
  recorded: RecordingDate,
}

impl DirEntry {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_dir(&self) -> bool {
    self.flags.contains(FileFlags::DIRECTORY)
  }

  /// Total data length across all extents.
  pub fn len(&self) -> u64 {
    self.extents.iter().map(|extent| extent.length as u64).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn extents(&self) -> &[Extent] {
    &self.extents
  }

  pub fn recording_date(&self) -> RecordingDate {
    self.recorded
  }
}

/// A mounted ISO 9660 volume.
pub struct IsoReader<Storage> {
  storage: Storage,
  block_size: u64,
  joliet: Option<JolietLevel>,
  volume_identifier: String,
  root: DirEntry,
}

impl<Storage> IsoReader<Storage>
where
  Storage: Read + Seek,
{
  /// Mount the volume, scanning the descriptor set at sector 16.
  ///
  /// The first supplementary descriptor announcing a Joliet level wins over
  /// the primary descriptor; without either the volume is rejected.
  pub fn new(mut storage: Storage) -> Result<Self> {
    let mut primary: Option<VolumeDescriptor> = None;
    let mut supplementary: Option<VolumeDescriptor> = None;
    let mut terminated = false;

    let mut sector = vec![0u8; SECTOR_SIZE];
    for index in 0..VOLUME_DESCRIPTOR_SET_LIMIT {
      storage.seek(SeekFrom::Start(
        (VOLUME_DESCRIPTOR_SET_LBA + index) * SECTOR_SIZE as u64,
      ))?;
      storage.read_exact(&mut sector)?;

      match VolumeDescriptorType::from_u8(sector[0]) {
        VolumeDescriptorType::Terminator => {
          terminated = true;
          break;
        }
        VolumeDescriptorType::Primary => {
          let descriptor = VolumeDescriptor::parse(&sector)?;
          primary.get_or_insert(descriptor);
        }
        VolumeDescriptorType::Supplementary => {
          let descriptor = VolumeDescriptor::parse(&sector)?;
          if descriptor.joliet_level().is_some() && supplementary.is_none() {
            supplementary = Some(descriptor);
          }
        }
        _ => {}
      }
    }

    if !terminated {
      return Err(Error::InvalidVolumeDescriptor("descriptor set terminator not found"));
    }

    let descriptor = supplementary
      .or(primary)
      .ok_or(Error::MissingPrimaryVolume)?;
    let joliet = descriptor.joliet_level();

    log::debug!(
      "mounted volume {:?} (block size {}, joliet {:?})",
      descriptor.volume_identifier,
      descriptor.logical_block_size,
      joliet
    );

    let root = DirEntry {
      name: String::new(),
      flags: descriptor.root_directory_record.file_flags,
      extents: vec![Extent {
        location: descriptor.root_directory_record.extent_location,
        length: descriptor.root_directory_record.data_length,
      }],
      recorded: descriptor.root_directory_record.recording_date,
    };

    Ok(Self {
      storage,
      block_size: descriptor.logical_block_size as u64,
      joliet,
      volume_identifier: descriptor.volume_identifier,
      root,
    })
  }

  pub fn volume_identifier(&self) -> &str {
    &self.volume_identifier
  }

  pub fn joliet_level(&self) -> Option<JolietLevel> {
    self.joliet
  }

  /// The root directory of the selected descriptor.
  pub fn root(&self) -> &DirEntry {
    &self.root
  }

  /// Read all entries of `directory` in recording order, excluding the
  /// `.` and `..` entries.
  pub fn read_dir(&mut self, directory: &DirEntry) -> Result<Vec<DirEntry>> {
    if !directory.is_dir() {
      return Err(Error::NotADirectory(directory.name.clone()));
    }

    let mut entries = Vec::new();
    let mut pending: Option<DirEntry> = None;
    let block = self.block_size as usize;

    for extent in &directory.extents {
      let mut buf = vec![0u8; extent.length as usize];
      self
        .storage
        .seek(SeekFrom::Start(extent.location as u64 * self.block_size))?;
      self.storage.read_exact(&mut buf)?;

      let mut offset = 0;
      while offset < buf.len() {
        if buf[offset] == 0 {
          // Records never cross a logical block boundary; a zero length
          // byte pads out the remainder of the block.
          offset = (offset / block + 1) * block;
          continue;
        }

        let record = DirectoryRecord::parse(&buf[offset..])?;
        offset += record.length as usize;

        if record.is_current_directory() || record.is_parent_directory() {
          continue;
        }

        self.push_record(&mut entries, &mut pending, record)?;
      }
    }

    if let Some(entry) = pending.take() {
      entries.push(entry);
    }

    Ok(entries)
  }

  fn push_record(
    &self,
    entries: &mut Vec<DirEntry>,
    pending: &mut Option<DirEntry>,
    record: DirectoryRecord,
  ) -> Result<()> {
    let name = self.decode_name(&record.file_identifier)?;
    let extent = Extent {
      location: record.extent_location,
      length: record.data_length,
    };

    if let Some(entry) = pending.as_mut() {
      if entry.name == name {
        entry.extents.push(extent);

        if !record.file_flags.contains(FileFlags::MULTI_EXTENT) {
          if let Some(entry) = pending.take() {
            entries.push(entry);
          }
        }

        return Ok(());
      }

      // Broken extent chain; keep what we have and start over.
      if let Some(entry) = pending.take() {
        entries.push(entry);
      }
    }

    let entry = DirEntry {
      name,
      flags: record.file_flags,
      extents: vec![extent],
      recorded: record.recording_date,
    };

    if record.file_flags.contains(FileFlags::MULTI_EXTENT) {
      *pending = Some(entry);
    } else {
      entries.push(entry);
    }

    Ok(())
  }

  fn decode_name(&self, identifier: &[u8]) -> Result<String> {
    let decoded = match self.joliet {
      Some(_) => spec::decode_joliet_identifier(identifier)?,
      None => spec::decode_standard_identifier(identifier)?,
    };

    Ok(spec::strip_version_suffix(&decoded).to_owned())
  }

  /// Resolve `path` component by component, matching names case
  /// insensitively. Both `/` and `\` separate components.
  pub fn lookup(&mut self, path: impl AsRef<IsoPath>) -> Result<DirEntry> {
    let mut current = self.root.clone();

    for component in path.as_ref().components() {
      if !current.is_dir() {
        return Err(Error::NotADirectory(current.name.clone()));
      }

      current = self
        .read_dir(&current)?
        .into_iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(component))
        .ok_or_else(|| Error::NotFound(component.to_owned()))?;
    }

    Ok(current)
  }

  /// Open `entry` for reading. Directories cannot be opened.
  pub fn open(&mut self, entry: &DirEntry) -> Result<ExtentReader<'_, Storage>> {
    if entry.is_dir() {
      return Err(Error::IsADirectory(entry.name.clone()));
    }

    Ok(ExtentReader {
      storage: &mut self.storage,
      block_size: self.block_size,
      extents: entry.extents.clone(),
      len: entry.len(),
      position: 0,
    })
  }
}

/// Reader over a file's extents, presenting them as one contiguous stream.
pub struct ExtentReader<'a, Storage> {
  storage: &'a mut Storage,
  block_size: u64,
  extents: Vec<Extent>,
  len: u64,
  position: u64,
}

impl<Storage> ExtentReader<'_, Storage> {
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl<Storage> Read for ExtentReader<'_, Storage>
where
  Storage: Read + Seek,
{
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    if self.position >= self.len || buf.is_empty() {
      return Ok(0);
    }

    // Locate the extent containing the current position.
    let mut start = 0u64;
    for extent in &self.extents {
      let end = start + extent.length as u64;
      if self.position < end {
        let within = self.position - start;
        let available = (end - self.position).min(buf.len() as u64) as usize;

        self.storage.seek(SeekFrom::Start(
          extent.location as u64 * self.block_size + within,
        ))?;
        let read = self.storage.read(&mut buf[..available])?;
        self.position += read as u64;

        return Ok(read);
      }

      start = end;
    }

    Ok(0)
  }
}

impl<Storage> Seek for ExtentReader<'_, Storage> {
  fn seek(&mut self, from: SeekFrom) -> std::io::Result<u64> {
    let target = match from {
      SeekFrom::Start(offset) => offset as i64,
      SeekFrom::Current(delta) => self.position as i64 + delta,
      SeekFrom::End(delta) => self.len as i64 + delta,
    };

    if target < 0 {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "invalid seek to a negative position",
      ));
    }

    self.position = target as u64;
    Ok(self.position)
  }
}
