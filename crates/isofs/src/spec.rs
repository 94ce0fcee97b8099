//! ISO 9660 on-disk structures and their decoding, including the Joliet
//! supplementary volume extension.
//!
//! Multi-byte numeric fields in the volume descriptors and directory
//! records are stored in both byte orders (least significant part first);
//! the helpers here read the little-endian half.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Size of a volume descriptor sector. Logical blocks may be smaller, but
/// the descriptor set is always laid out in 2048-byte sectors.
pub const SECTOR_SIZE: usize = 2048;

/// First sector of the volume descriptor set.
pub const VOLUME_DESCRIPTOR_SET_LBA: u64 = 16;

/// Byte offset of the root directory record within a primary or
/// supplementary volume descriptor.
pub const ROOT_DIRECTORY_RECORD_OFFSET: usize = 156;

/// Fixed part of a directory record, before the file identifier.
pub const DIRECTORY_RECORD_SIZE: usize = 33;

pub(crate) fn both_u16(buf: &[u8]) -> u16 {
  LittleEndian::read_u16(&buf[..2])
}

pub(crate) fn both_u32(buf: &[u8]) -> u32 {
  LittleEndian::read_u32(&buf[..4])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardIdentifier {
  /// Standard ISO 9660 identifier; "CD001"
  Cd001,
  /// Denotes the beginning of the extended descriptor section; "BEA01"
  Bea01,
  /// Indicates that this volume contains a UDF filesystem; "NSR02"
  Nsr02,
  /// Indicates that this volume contains a UDF filesystem; "NSR03"
  Nsr03,
  /// Includes information concerning boot loader location and entry point address; "BOOT2"
  Boot2,
  /// Indicates the end of the extended descriptor section; "TEA01"
  Tea01,
  /// Any other identifier not covered by the above variants.
  Other([u8; 5]),
}

impl StandardIdentifier {
  pub fn from_bytes(bytes: [u8; 5]) -> Self {
    match &bytes {
      b"CD001" => StandardIdentifier::Cd001,
      b"BEA01" => StandardIdentifier::Bea01,
      b"NSR02" => StandardIdentifier::Nsr02,
      b"NSR03" => StandardIdentifier::Nsr03,
      b"BOOT2" => StandardIdentifier::Boot2,
      b"TEA01" => StandardIdentifier::Tea01,
      _ => StandardIdentifier::Other(bytes),
    }
  }

  pub fn as_bytes(&self) -> &[u8; 5] {
    match self {
      StandardIdentifier::Cd001 => b"CD001",
      StandardIdentifier::Bea01 => b"BEA01",
      StandardIdentifier::Nsr02 => b"NSR02",
      StandardIdentifier::Nsr03 => b"NSR03",
      StandardIdentifier::Boot2 => b"BOOT2",
      StandardIdentifier::Tea01 => b"TEA01",
      StandardIdentifier::Other(v) => v,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDescriptorType {
  BootRecord,
  Primary,
  Supplementary,
  Partition,
  Other(u8),
  Terminator,
}

impl VolumeDescriptorType {
  pub fn from_u8(value: u8) -> Self {
    match value {
      0 => VolumeDescriptorType::BootRecord,
      1 => VolumeDescriptorType::Primary,
      2 => VolumeDescriptorType::Supplementary,
      3 => VolumeDescriptorType::Partition,
      255 => VolumeDescriptorType::Terminator,
      v => VolumeDescriptorType::Other(v),
    }
  }
}

impl Into<u8> for VolumeDescriptorType {
  fn into(self) -> u8 {
    match self {
      VolumeDescriptorType::BootRecord => 0,
      VolumeDescriptorType::Primary => 1,
      VolumeDescriptorType::Supplementary => 2,
      VolumeDescriptorType::Partition => 3,
      VolumeDescriptorType::Other(v) => v,
      VolumeDescriptorType::Terminator => 255,
    }
  }
}

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct FileFlags: u8 {
    const EXISTENCE = 1 << 0;
    const DIRECTORY = 1 << 1;
    const ASSOCIATED_FILE = 1 << 2;
    const RECORD = 1 << 3;
    const PROTECTION = 1 << 4;
    const RESERVED_5 = 1 << 5;
    const RESERVED_6 = 1 << 6;
    /// Set on every record of a file's extent chain except the last.
    const MULTI_EXTENT = 1 << 7;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JolietLevel {
  /// UCS-2 Level 1
  Level1,
  /// UCS-2 Level 2
  Level2,
  /// UCS-2 Level 3
  Level3,
}

/// Escape sequences field of a supplementary volume descriptor, conforming
/// to ISO/IEC 2022. Joliet volumes announce their UCS-2 level here.
#[derive(Debug, Clone, Copy)]
pub struct EscapeSequences(pub [u8; 32]);

impl EscapeSequences {
  /// The UCS-2 level announced by this field, if any.
  ///
  /// Joliet records `%/@`, `%/C` or `%/E` for levels 1 through 3.
  pub fn joliet_level(&self) -> Option<JolietLevel> {
    for window in self.0.windows(3) {
      match window {
        [0x25, 0x2f, 0x40] => return Some(JolietLevel::Level1),
        [0x25, 0x2f, 0x43] => return Some(JolietLevel::Level2),
        [0x25, 0x2f, 0x45] => return Some(JolietLevel::Level3),
        _ => {}
      }
    }

    None
  }
}

/// Recording date and time of a directory record: seven one-byte fields
/// plus a GMT offset in quarter hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingDate {
  pub years_since_1900: u8,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  pub gmt_offset: i8,
}

impl RecordingDate {
  pub fn from_bytes(buf: &[u8]) -> Self {
    Self {
      years_since_1900: buf[0],
      month: buf[1],
      day: buf[2],
      hour: buf[3],
      minute: buf[4],
      second: buf[5],
      gmt_offset: buf[6] as i8,
    }
  }
}

#[cfg(feature = "chrono")]
impl RecordingDate {
  /// Convert to a timezone-aware timestamp.
  ///
  /// Returns `None` for the all-zero "not recorded" value and for
  /// out-of-range fields.
  pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    use chrono::TimeZone;

    let offset = chrono::FixedOffset::east_opt(self.gmt_offset as i32 * 15 * 60)?;

    offset
      .with_ymd_and_hms(
        1900 + self.years_since_1900 as i32,
        self.month as u32,
        self.day as u32,
        self.hour as u32,
        self.minute as u32,
        self.second as u32,
      )
      .single()
  }
}

/// Common fields of every volume descriptor sector.
#[derive(Debug, Clone, Copy)]
pub struct VolumeDescriptorHeader {
  pub descriptor_type: VolumeDescriptorType,
  pub standard_identifier: StandardIdentifier,
  pub version: u8,
}

impl VolumeDescriptorHeader {
  pub fn parse(sector: &[u8]) -> Result<Self> {
    if sector.len() < 7 {
      return Err(Error::InvalidVolumeDescriptor("sector too small"));
    }

    let mut identifier = [0u8; 5];
    identifier.copy_from_slice(&sector[1..6]);

    let header = Self {
      descriptor_type: VolumeDescriptorType::from_u8(sector[0]),
      standard_identifier: StandardIdentifier::from_bytes(identifier),
      version: sector[6],
    };

    if header.standard_identifier != StandardIdentifier::Cd001 {
      return Err(Error::InvalidVolumeDescriptor("unrecognized standard identifier"));
    }

    Ok(header)
  }
}

/// The fields of a primary or supplementary volume descriptor acted on by
/// the reader. The supplementary form additionally carries the escape
/// sequences announcing Joliet.
#[derive(Debug)]
pub struct VolumeDescriptor {
  pub descriptor_type: VolumeDescriptorType,
  pub version: u8,
  pub volume_identifier: String,
  pub volume_space_size: u32,
  pub escape_sequences: EscapeSequences,
  pub volume_set_size: u16,
  pub volume_sequence_number: u16,
  pub logical_block_size: u16,
  pub root_directory_record: DirectoryRecord,
}

impl VolumeDescriptor {
  pub fn parse(sector: &[u8]) -> Result<Self> {
    if sector.len() < SECTOR_SIZE {
      return Err(Error::InvalidVolumeDescriptor("sector too small"));
    }

    let header = VolumeDescriptorHeader::parse(sector)?;

    let mut escapes = [0u8; 32];
    escapes.copy_from_slice(&sector[88..120]);
    let escape_sequences = EscapeSequences(escapes);

    let volume_identifier = match escape_sequences.joliet_level() {
      Some(_) => decode_joliet_identifier(&sector[40..72])?,
      None => decode_standard_identifier(&sector[40..72])?,
    };

    let logical_block_size = both_u16(&sector[128..]);
    match logical_block_size {
      512 | 1024 | 2048 => {}
      _ => return Err(Error::InvalidVolumeDescriptor("unsupported logical block size")),
    }

    let root_directory_record =
      DirectoryRecord::parse(&sector[ROOT_DIRECTORY_RECORD_OFFSET..ROOT_DIRECTORY_RECORD_OFFSET + 34])?;

    Ok(Self {
      descriptor_type: header.descriptor_type,
      version: header.version,
      volume_identifier: volume_identifier.trim_end_matches([' ', '\0']).to_owned(),
      volume_space_size: both_u32(&sector[80..]),
      escape_sequences,
      volume_set_size: both_u16(&sector[120..]),
      volume_sequence_number: both_u16(&sector[124..]),
      logical_block_size,
      root_directory_record,
    })
  }

  pub fn joliet_level(&self) -> Option<JolietLevel> {
    match self.descriptor_type {
      VolumeDescriptorType::Supplementary => self.escape_sequences.joliet_level(),
      _ => None,
    }
  }
}

/// A directory record as stored in a directory extent: a 33-byte fixed part
/// followed by the file identifier and an optional pad byte keeping the
/// record length even.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
  pub length: u8,
  pub extended_attribute_length: u8,
  pub extent_location: u32,
  pub data_length: u32,
  pub recording_date: RecordingDate,
  pub file_flags: FileFlags,
  pub file_unit_size: u8,
  pub interleave_gap_size: u8,
  pub volume_sequence_number: u16,
  pub file_identifier: Vec<u8>,
}

impl DirectoryRecord {
  /// Parse the record at the start of `buf`. The caller is responsible for
  /// skipping zero length bytes, which terminate a sector's record run
  /// rather than starting a record.
  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.is_empty() {
      return Err(Error::InvalidDirectoryRecord("empty buffer"));
    }

    let length = buf[0];
    if (length as usize) < DIRECTORY_RECORD_SIZE + 1 || buf.len() < length as usize {
      return Err(Error::InvalidDirectoryRecord("bad record length"));
    }

    let identifier_length = buf[32] as usize;
    if DIRECTORY_RECORD_SIZE + identifier_length > length as usize {
      return Err(Error::InvalidDirectoryRecord("identifier exceeds record"));
    }

    Ok(Self {
      length,
      extended_attribute_length: buf[1],
      extent_location: both_u32(&buf[2..]),
      data_length: both_u32(&buf[10..]),
      recording_date: RecordingDate::from_bytes(&buf[18..25]),
      file_flags: FileFlags::from_bits_retain(buf[25]),
      file_unit_size: buf[26],
      interleave_gap_size: buf[27],
      volume_sequence_number: both_u16(&buf[28..]),
      file_identifier: buf[DIRECTORY_RECORD_SIZE..DIRECTORY_RECORD_SIZE + identifier_length].to_vec(),
    })
  }

  pub fn is_directory(&self) -> bool {
    self.file_flags.contains(FileFlags::DIRECTORY)
  }

  /// The `.` entry of a directory extent.
  pub fn is_current_directory(&self) -> bool {
    self.file_identifier == [0x00]
  }

  /// The `..` entry of a directory extent.
  pub fn is_parent_directory(&self) -> bool {
    self.file_identifier == [0x01]
  }
}

/// Decode a primary-volume file identifier (d-characters, ASCII).
pub fn decode_standard_identifier(identifier: &[u8]) -> Result<String> {
  std::str::from_utf8(identifier)
    .map(str::to_owned)
    .map_err(|_| Error::InvalidIdentifier)
}

/// Decode a Joliet file identifier: UCS-2, big-endian.
pub fn decode_joliet_identifier(identifier: &[u8]) -> Result<String> {
  if identifier.len() % 2 != 0 {
    return Err(Error::InvalidIdentifier);
  }

  let units: Vec<u16> = identifier
    .chunks_exact(2)
    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    .collect();

  let mut utf8 = vec![0u8; units.len() * 3];
  let length = ucs2::decode(&units, &mut utf8).map_err(|_| Error::InvalidIdentifier)?;
  utf8.truncate(length);

  String::from_utf8(utf8).map_err(|_| Error::InvalidIdentifier)
}

/// Strip the `;NN` version suffix and a trailing extension separator from a
/// decoded file identifier. `README.TXT;1` becomes `README.TXT`, and the
/// extension-less `NOTES.;1` becomes `NOTES`.
pub fn strip_version_suffix(name: &str) -> &str {
  let name = match name.rfind(';') {
    Some(position) => &name[..position],
    None => name,
  };

  match name.strip_suffix('.') {
    Some(stripped) if !stripped.is_empty() => stripped,
    _ => name,
  }
}
