//! A small ISO 9660 image builder.
//!
//! Produces images laid out the way mastering tools do: system area,
//! volume descriptor set at sector 16, directory extents, then file
//! data. Primary identifiers are uppercased with a `;1` version suffix,
//! Joliet identifiers are recorded verbatim as UCS-2.

const SECTOR_SIZE: usize = 2048;

const DIRECTORY: u8 = 0x02;
const MULTI_EXTENT: u8 = 0x80;

pub struct IsoBuilder {
  joliet: bool,
  volume_identifier: String,
  directories: Vec<Directory>,
  files: Vec<File>,
}

struct Directory {
  name: String,
  parent: usize,
  children: Vec<Child>,
}

#[derive(Clone, Copy)]
enum Child {
  Directory(usize),
  File(usize),
}

struct File {
  name: String,
  pieces: Vec<Vec<u8>>,
}

impl IsoBuilder {
  pub fn new() -> Self {
    Self {
      joliet: false,
      volume_identifier: "TESTVOL".to_owned(),
      directories: vec![Directory {
        name: String::new(),
        parent: 0,
        children: Vec::new(),
      }],
      files: Vec::new(),
    }
  }

  /// Adds a supplementary Joliet descriptor alongside the primary one.
  pub fn joliet(mut self) -> Self {
    self.joliet = true;
    self
  }

  pub fn volume_identifier(mut self, identifier: &str) -> Self {
    self.volume_identifier = identifier.to_owned();
    self
  }

  pub fn add_dir(&mut self, path: &str) -> &mut Self {
    self.ensure_dir(path);
    self
  }

  pub fn add_file(&mut self, path: &str, data: &[u8]) -> &mut Self {
    self.add_pieces(path, vec![data.to_vec()])
  }

  /// Records `pieces` as a chain of extents sharing one identifier, with
  /// the multi-extent flag set on every record but the last.
  pub fn add_file_multi_extent(&mut self, path: &str, pieces: &[&[u8]]) -> &mut Self {
    self.add_pieces(path, pieces.iter().map(|piece| piece.to_vec()).collect())
  }

  fn add_pieces(&mut self, path: &str, pieces: Vec<Vec<u8>>) -> &mut Self {
    let (directory, name) = match path.rfind('/') {
      Some(split) => (self.ensure_dir(&path[..split]), &path[split + 1..]),
      None => (0, path),
    };
    let index = self.files.len();
    self.files.push(File {
      name: name.to_owned(),
      pieces,
    });
    self.directories[directory].children.push(Child::File(index));
    self
  }

  fn ensure_dir(&mut self, path: &str) -> usize {
    let mut current = 0;
    for component in path.split('/').filter(|component| !component.is_empty()) {
      let existing = self.directories[current]
        .children
        .iter()
        .find_map(|child| match *child {
          Child::Directory(index) if self.directories[index].name == component => Some(index),
          _ => None,
        });
      current = match existing {
        Some(index) => index,
        None => {
          let index = self.directories.len();
          self.directories.push(Directory {
            name: component.to_owned(),
            parent: current,
            children: Vec::new(),
          });
          self.directories[current].children.push(Child::Directory(index));
          index
        }
      };
    }
    current
  }

  pub fn build(&self) -> Vec<u8> {
    // Record lengths depend only on identifiers, so sizing runs with
    // placeholder extents and the real pass reuses the same layout.
    let placeholder_dirs = vec![(0u32, 0u32); self.directories.len()];
    let placeholder_files: Vec<Vec<(u32, u32)>> = self
      .files
      .iter()
      .map(|file| vec![(0, 0); file.pieces.len()])
      .collect();

    let mut next_lba = 16 + 1 + u32::from(self.joliet) + 1;

    let mut primary_extents = vec![(0u32, 0u32); self.directories.len()];
    for index in 0..self.directories.len() {
      let records = self.directory_records(index, false, &placeholder_dirs, &placeholder_files);
      let size = pack(&records).len();
      primary_extents[index] = (next_lba, size as u32);
      next_lba += (size / SECTOR_SIZE) as u32;
    }

    let mut joliet_extents = vec![(0u32, 0u32); self.directories.len()];
    if self.joliet {
      for index in 0..self.directories.len() {
        let records = self.directory_records(index, true, &placeholder_dirs, &placeholder_files);
        let size = pack(&records).len();
        joliet_extents[index] = (next_lba, size as u32);
        next_lba += (size / SECTOR_SIZE) as u32;
      }
    }

    let mut file_extents: Vec<Vec<(u32, u32)>> = Vec::with_capacity(self.files.len());
    for file in &self.files {
      let mut extents = Vec::with_capacity(file.pieces.len());
      for piece in &file.pieces {
        extents.push((next_lba, piece.len() as u32));
        next_lba += piece.len().div_ceil(SECTOR_SIZE) as u32;
      }
      file_extents.push(extents);
    }

    let mut image = vec![0u8; next_lba as usize * SECTOR_SIZE];

    self.write_volume_descriptor(&mut image, 16, false, next_lba, &primary_extents);
    if self.joliet {
      self.write_volume_descriptor(&mut image, 17, true, next_lba, &joliet_extents);
    }
    let terminator = (16 + 1 + usize::from(self.joliet)) * SECTOR_SIZE;
    image[terminator] = 255;
    image[terminator + 1..terminator + 6].copy_from_slice(b"CD001");
    image[terminator + 6] = 1;

    for index in 0..self.directories.len() {
      let records = self.directory_records(index, false, &primary_extents, &file_extents);
      let bytes = pack(&records);
      let offset = primary_extents[index].0 as usize * SECTOR_SIZE;
      image[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }
    if self.joliet {
      for index in 0..self.directories.len() {
        let records = self.directory_records(index, true, &joliet_extents, &file_extents);
        let bytes = pack(&records);
        let offset = joliet_extents[index].0 as usize * SECTOR_SIZE;
        image[offset..offset + bytes.len()].copy_from_slice(&bytes);
      }
    }
    for (file, extents) in self.files.iter().zip(&file_extents) {
      for (piece, &(lba, _)) in file.pieces.iter().zip(extents) {
        let offset = lba as usize * SECTOR_SIZE;
        image[offset..offset + piece.len()].copy_from_slice(piece);
      }
    }

    image
  }

  fn write_volume_descriptor(
    &self,
    image: &mut [u8],
    sector: usize,
    joliet: bool,
    total_sectors: u32,
    dir_extents: &[(u32, u32)],
  ) {
    let base = sector * SECTOR_SIZE;
    let descriptor = &mut image[base..base + SECTOR_SIZE];
    descriptor[0] = if joliet { 2 } else { 1 };
    descriptor[1..6].copy_from_slice(b"CD001");
    descriptor[6] = 1;

    let identifier = if joliet {
      let mut bytes = Vec::new();
      for unit in self.volume_identifier.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
      }
      while bytes.len() < 32 {
        bytes.extend_from_slice(&[0x00, 0x20]);
      }
      bytes.truncate(32);
      bytes
    } else {
      let mut bytes = self.volume_identifier.clone().into_bytes();
      bytes.resize(32, b' ');
      bytes
    };
    descriptor[40..72].copy_from_slice(&identifier);

    descriptor[80..84].copy_from_slice(&total_sectors.to_le_bytes());
    descriptor[84..88].copy_from_slice(&total_sectors.to_be_bytes());
    if joliet {
      // UCS-2 level 3 escape sequence.
      descriptor[88..91].copy_from_slice(&[0x25, 0x2f, 0x45]);
    }
    descriptor[120..122].copy_from_slice(&1u16.to_le_bytes());
    descriptor[122..124].copy_from_slice(&1u16.to_be_bytes());
    descriptor[124..126].copy_from_slice(&1u16.to_le_bytes());
    descriptor[126..128].copy_from_slice(&1u16.to_be_bytes());
    descriptor[128..130].copy_from_slice(&2048u16.to_le_bytes());
    descriptor[130..132].copy_from_slice(&2048u16.to_be_bytes());

    let (root_lba, root_length) = dir_extents[0];
    let root = record(&[0x00], root_lba, root_length, DIRECTORY);
    descriptor[156..156 + root.len()].copy_from_slice(&root);
  }

  fn directory_records(
    &self,
    index: usize,
    joliet: bool,
    dir_extents: &[(u32, u32)],
    file_extents: &[Vec<(u32, u32)>],
  ) -> Vec<Vec<u8>> {
    let directory = &self.directories[index];
    let (self_lba, self_length) = dir_extents[index];
    let (parent_lba, parent_length) = dir_extents[directory.parent];
    let mut records = vec![
      record(&[0x00], self_lba, self_length, DIRECTORY),
      record(&[0x01], parent_lba, parent_length, DIRECTORY),
    ];
    for child in &directory.children {
      match *child {
        Child::Directory(child_index) => {
          let identifier = encode_identifier(&self.directories[child_index].name, true, joliet);
          let (lba, length) = dir_extents[child_index];
          records.push(record(&identifier, lba, length, DIRECTORY));
        }
        Child::File(file_index) => {
          let file = &self.files[file_index];
          let identifier = encode_identifier(&file.name, false, joliet);
          let extents = &file_extents[file_index];
          for (piece, &(lba, length)) in extents.iter().enumerate() {
            let flags = if piece + 1 < extents.len() {
              MULTI_EXTENT
            } else {
              0
            };
            records.push(record(&identifier, lba, length, flags));
          }
        }
      }
    }
    records
  }
}

fn encode_identifier(name: &str, directory: bool, joliet: bool) -> Vec<u8> {
  if joliet {
    let mut identifier = name.to_owned();
    if !directory {
      identifier.push_str(";1");
    }
    identifier
      .encode_utf16()
      .flat_map(|unit| unit.to_be_bytes())
      .collect()
  } else {
    let mut identifier = name.to_uppercase();
    if !directory {
      identifier.push_str(";1");
    }
    identifier.into_bytes()
  }
}

fn record(identifier: &[u8], extent: u32, length: u32, flags: u8) -> Vec<u8> {
  let mut record_length = 33 + identifier.len();
  if record_length % 2 == 1 {
    record_length += 1;
  }
  let mut buf = vec![0u8; record_length];
  buf[0] = record_length as u8;
  buf[2..6].copy_from_slice(&extent.to_le_bytes());
  buf[6..10].copy_from_slice(&extent.to_be_bytes());
  buf[10..14].copy_from_slice(&length.to_le_bytes());
  buf[14..18].copy_from_slice(&length.to_be_bytes());
  buf[18..25].copy_from_slice(&[120, 5, 15, 10, 30, 0, 0]);
  buf[25] = flags;
  buf[28..30].copy_from_slice(&1u16.to_le_bytes());
  buf[30..32].copy_from_slice(&1u16.to_be_bytes());
  buf[32] = identifier.len() as u8;
  buf[33..33 + identifier.len()].copy_from_slice(identifier);
  buf
}

/// Lays records out the way directory extents are recorded: a record
/// never crosses a sector boundary, gaps and the extent tail are zero
/// filled.
fn pack(records: &[Vec<u8>]) -> Vec<u8> {
  let mut out = Vec::new();
  for record in records {
    let used = out.len() % SECTOR_SIZE;
    if used + record.len() > SECTOR_SIZE {
      out.resize(out.len() + SECTOR_SIZE - used, 0);
    }
    out.extend_from_slice(record);
  }
  let tail = out.len() % SECTOR_SIZE;
  if tail != 0 {
    out.resize(out.len() + SECTOR_SIZE - tail, 0);
  }
  out
}
