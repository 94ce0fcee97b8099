//! On-disk structures of the Windows Imaging Format, version 1 (as written
//! by the Windows 8 era imagex and later).
//!
//! A WIM archive is a 208-byte header followed by resources. The lookup
//! table resource indexes every other resource by SHA-1 hash; entries
//! flagged as metadata each describe one image, containing a security
//! block followed by the directory entry tree.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Archive signature, "MSWIM\0\0\0".
pub const MAGIC: [u8; 8] = *b"MSWIM\0\0\0";

/// Size of the archive header.
pub const HEADER_SIZE: usize = 208;

/// The single on-disk version this reader understands, 1.13.
pub const VERSION: u32 = 0x10d00;

/// Uncompressed chunk size used by LZX-compressed resources.
pub const LZX_CHUNK_SIZE: u32 = 32768;

/// Size of a lookup table entry.
pub const LOOKUP_ENTRY_SIZE: usize = 50;

/// Fixed part of a directory entry, before the file name.
pub const DIRENT_SIZE: u64 = 102;

/// Fixed part of an alternate stream entry.
pub const STREAM_ENTRY_SIZE: u64 = 38;

/// SHA-1 digest identifying a resource.
pub type Hash = [u8; 20];

/// The hash recorded for zero-length files, which have no resource.
pub const ZERO_HASH: Hash = [0u8; 20];

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct HeaderFlags: u32 {
    const READ_ONLY = 1 << 0;
    const COMPRESSION = 1 << 1;
    const SPANNED = 1 << 3;
    const RESOURCE_ONLY = 1 << 4;
    const METADATA_ONLY = 1 << 5;
    const WRITE_IN_PROGRESS = 1 << 6;
    const RP_FIX = 1 << 7;
    const COMPRESS_RESERVED = 1 << 16;
    const COMPRESS_XPRESS = 1 << 17;
    const COMPRESS_LZX = 1 << 18;
  }
}

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct ResourceFlags: u8 {
    const FREE = 1 << 0;
    /// The resource is an image's metadata tree rather than file contents.
    const METADATA = 1 << 1;
    const COMPRESSED = 1 << 2;
    const SPANNED = 1 << 3;
  }
}

bitflags::bitflags! {
  /// Windows file attributes as recorded in directory entries.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Attributes: u32 {
    const READONLY = 0x1;
    const HIDDEN = 0x2;
    const SYSTEM = 0x4;
    const DIRECTORY = 0x10;
    const ARCHIVE = 0x20;
    const DEVICE = 0x40;
    const NORMAL = 0x80;
    const TEMPORARY = 0x100;
    const SPARSE_FILE = 0x200;
    const REPARSE_POINT = 0x400;
    const COMPRESSED = 0x800;
    const OFFLINE = 0x1000;
    const NOT_CONTENT_INDEXED = 0x2000;
    const ENCRYPTED = 0x4000;
    const INTEGRITY_STREAM = 0x8000;
    const VIRTUAL = 0x10000;
    const NO_SCRUB_DATA = 0x20000;
  }
}

/// Compression scheme applied to flagged resources of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  None,
  Lzx,
}

/// A Windows timestamp: 100-nanosecond ticks since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filetime(pub u64);

/// Seconds between the Windows and Unix epochs.
#[cfg(feature = "chrono")]
const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

#[cfg(feature = "chrono")]
impl Filetime {
  pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
    let seconds = (self.0 / 10_000_000) as i64 - EPOCH_DELTA_SECONDS;
    let nanoseconds = (self.0 % 10_000_000) as u32 * 100;

    chrono::DateTime::from_timestamp(seconds, nanoseconds)
  }
}

/// Location and size of a resource. The first word packs a 56-bit
/// compressed size under a flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHeader {
  pub size_in_wim: u64,
  pub flags: ResourceFlags,
  pub offset: u64,
  pub original_size: u64,
}

impl ResourceHeader {
  pub const SIZE: usize = 24;

  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < Self::SIZE {
      return Err(Error::Format("resource header too small"));
    }

    let packed = LittleEndian::read_u64(&buf[0..8]);

    Ok(Self {
      size_in_wim: packed & 0x00ff_ffff_ffff_ffff,
      flags: ResourceFlags::from_bits_retain((packed >> 56) as u8),
      offset: LittleEndian::read_u64(&buf[8..16]),
      original_size: LittleEndian::read_u64(&buf[16..24]),
    })
  }

  pub fn is_metadata(&self) -> bool {
    self.flags.contains(ResourceFlags::METADATA)
  }

  pub fn is_compressed(&self) -> bool {
    self.flags.contains(ResourceFlags::COMPRESSED)
  }
}

/// The archive header.
#[derive(Debug, Clone)]
pub struct WimHeader {
  pub size: u32,
  pub version: u32,
  pub flags: HeaderFlags,
  pub chunk_size: u32,
  pub guid: [u8; 16],
  pub part_number: u16,
  pub total_parts: u16,
  pub image_count: u32,
  pub offset_table: ResourceHeader,
  pub xml_data: ResourceHeader,
  pub boot_metadata: ResourceHeader,
  pub boot_index: u32,
  pub integrity: ResourceHeader,
}

impl WimHeader {
  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < HEADER_SIZE {
      return Err(Error::Format("header too small"));
    }

    if buf[0..8] != MAGIC {
      return Err(Error::Format("bad magic"));
    }

    let size = LittleEndian::read_u32(&buf[8..12]);
    if (size as usize) < HEADER_SIZE {
      return Err(Error::Format("implausible header size"));
    }

    let version = LittleEndian::read_u32(&buf[12..16]);
    if version != VERSION {
      return Err(Error::Unsupported("archive version"));
    }

    let mut guid = [0u8; 16];
    guid.copy_from_slice(&buf[24..40]);

    Ok(Self {
      size,
      version,
      flags: HeaderFlags::from_bits_retain(LittleEndian::read_u32(&buf[16..20])),
      chunk_size: LittleEndian::read_u32(&buf[20..24]),
      guid,
      part_number: LittleEndian::read_u16(&buf[40..42]),
      total_parts: LittleEndian::read_u16(&buf[42..44]),
      image_count: LittleEndian::read_u32(&buf[44..48]),
      offset_table: ResourceHeader::parse(&buf[48..72])?,
      xml_data: ResourceHeader::parse(&buf[72..96])?,
      boot_metadata: ResourceHeader::parse(&buf[96..120])?,
      boot_index: LittleEndian::read_u32(&buf[120..124]),
      integrity: ResourceHeader::parse(&buf[124..148])?,
    })
  }

  /// The compression scheme of this archive.
  ///
  /// XPRESS and any compression flag combination other than plain LZX are
  /// rejected as unsupported rather than misread.
  pub fn compression(&self) -> Result<Compression> {
    if !self.flags.contains(HeaderFlags::COMPRESSION) {
      return Ok(Compression::None);
    }

    if self.flags.contains(HeaderFlags::COMPRESS_XPRESS) {
      return Err(Error::Unsupported("XPRESS compression"));
    }

    if !self.flags.contains(HeaderFlags::COMPRESS_LZX) {
      return Err(Error::Unsupported("unknown compression scheme"));
    }

    if self.chunk_size != LZX_CHUNK_SIZE {
      return Err(Error::Format("bad LZX chunk size"));
    }

    Ok(Compression::Lzx)
  }
}

/// One entry of the lookup table resource.
#[derive(Debug, Clone, Copy)]
pub struct LookupEntry {
  pub resource: ResourceHeader,
  pub part_number: u16,
  pub ref_count: u32,
  pub hash: Hash,
}

impl LookupEntry {
  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < LOOKUP_ENTRY_SIZE {
      return Err(Error::Format("lookup table entry too small"));
    }

    let mut hash = ZERO_HASH;
    hash.copy_from_slice(&buf[30..50]);

    Ok(Self {
      resource: ResourceHeader::parse(&buf[0..24])?,
      part_number: LittleEndian::read_u16(&buf[24..26]),
      ref_count: LittleEndian::read_u32(&buf[26..30]),
      hash,
    })
  }
}

/// A directory entry within an image's metadata resource.
///
/// Entries of one directory are laid out as a run terminated by a zero
/// length word; each entry is followed by its alternate stream entries,
/// which this reader skips over.
#[derive(Debug, Clone)]
pub struct Dirent {
  pub length: u64,
  pub attributes: Attributes,
  pub security_id: u32,
  pub subdir_offset: u64,
  pub creation_time: Filetime,
  pub last_access_time: Filetime,
  pub last_write_time: Filetime,
  pub hash: Hash,
  pub stream_count: u16,
  pub short_name_length: u16,
  pub file_name: String,
}

impl Dirent {
  /// Parse the entry starting at `offset`, or `None` at the terminator
  /// ending a sibling run.
  pub fn parse(buf: &[u8], offset: u64) -> Result<Option<Self>> {
    // Checked before the cast; a hostile offset must not wrap.
    if (buf.len() as u64).saturating_sub(offset) < 8 {
      return Err(Error::Corrupt("truncated directory entry"));
    }

    let offset = offset as usize;
    let length = LittleEndian::read_u64(&buf[offset..offset + 8]);
    if length == 0 {
      return Ok(None);
    }

    if length < DIRENT_SIZE {
      return Err(Error::Corrupt("directory entry too small"));
    }

    if length > (buf.len() - offset) as u64 {
      return Err(Error::Corrupt("truncated directory entry"));
    }

    let entry = &buf[offset..offset + length as usize];

    let file_name_length = LittleEndian::read_u16(&entry[100..102]) as u64;
    if file_name_length % 2 != 0 {
      return Err(Error::Corrupt("odd file name length"));
    }

    if DIRENT_SIZE + file_name_length > length {
      return Err(Error::Corrupt("file name exceeds entry"));
    }

    let mut hash = ZERO_HASH;
    hash.copy_from_slice(&entry[64..84]);

    let name_start = DIRENT_SIZE as usize;
    let file_name = decode_utf16le(&entry[name_start..name_start + file_name_length as usize])?;

    Ok(Some(Self {
      length,
      attributes: Attributes::from_bits_retain(LittleEndian::read_u32(&entry[8..12])),
      security_id: LittleEndian::read_u32(&entry[12..16]),
      subdir_offset: LittleEndian::read_u64(&entry[16..24]),
      creation_time: Filetime(LittleEndian::read_u64(&entry[40..48])),
      last_access_time: Filetime(LittleEndian::read_u64(&entry[48..56])),
      last_write_time: Filetime(LittleEndian::read_u64(&entry[56..64])),
      hash,
      stream_count: LittleEndian::read_u16(&entry[96..98]),
      short_name_length: LittleEndian::read_u16(&entry[98..100]),
      file_name,
    }))
  }

  /// Offset of the next sibling, past this entry and its stream entries.
  pub fn next_offset(&self, buf: &[u8], offset: u64) -> Result<u64> {
    let mut next = offset + align8(self.length);

    for _ in 0..self.stream_count {
      if (buf.len() as u64).saturating_sub(next) < 8 {
        return Err(Error::Corrupt("truncated stream entry"));
      }

      let position = next as usize;
      let length = LittleEndian::read_u64(&buf[position..position + 8]);
      if length < STREAM_ENTRY_SIZE {
        return Err(Error::Corrupt("stream entry too small"));
      }

      if length > buf.len() as u64 - next {
        return Err(Error::Corrupt("truncated stream entry"));
      }

      next += align8(length);
    }

    Ok(next)
  }

  pub fn is_directory(&self) -> bool {
    self.attributes.contains(Attributes::DIRECTORY)
  }

  pub fn is_reparse_point(&self) -> bool {
    self.attributes.contains(Attributes::REPARSE_POINT)
  }
}

/// Offset of the root directory entry within a metadata resource, which
/// starts with the security descriptor block.
pub fn root_dirent_offset(metadata: &[u8]) -> Result<u64> {
  if metadata.len() < 8 {
    return Err(Error::Corrupt("metadata resource too small"));
  }

  let total_length = LittleEndian::read_u32(&metadata[0..4]) as u64;

  // An empty security block still occupies its two length words.
  Ok(align8(total_length.max(8)))
}

pub(crate) fn align8(value: u64) -> u64 {
  (value + 7) & !7
}

pub(crate) fn decode_utf16le(bytes: &[u8]) -> Result<String> {
  let units: Vec<u16> = bytes
    .chunks_exact(2)
    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    .collect();

  char::decode_utf16(units)
    .collect::<std::result::Result<String, _>>()
    .map_err(|_| Error::Corrupt("invalid UTF-16 name"))
}
