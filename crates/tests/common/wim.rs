//! A small WIM archive builder.
//!
//! Produces version 1.13 archives: header, file resources, one metadata
//! resource per image, the lookup table and the UTF-16 XML data. In LZX
//! mode the file and metadata resources are emitted as chunked resources
//! whose chunks are all stored raw, which is a form real writers produce
//! for incompressible data.

const CHUNK_SIZE: usize = 32768;

const ATTRIBUTE_DIRECTORY: u32 = 0x10;
const ATTRIBUTE_ARCHIVE: u32 = 0x20;

pub struct WimBuilder {
  lzx: bool,
  images: Vec<ImageTree>,
}

struct ImageTree {
  name: String,
  directories: Vec<Directory>,
  files: Vec<File>,
}

struct Directory {
  name: String,
  children: Vec<Child>,
}

#[derive(Clone, Copy)]
enum Child {
  Directory(usize),
  File(usize),
}

struct File {
  name: String,
  /// `None` leaves the entry's hash dangling with no backing resource.
  data: Option<Vec<u8>>,
}

impl WimBuilder {
  pub fn new() -> Self {
    Self {
      lzx: false,
      images: Vec::new(),
    }
  }

  /// Flags the archive as LZX compressed and emits chunked resources.
  pub fn lzx(mut self) -> Self {
    self.lzx = true;
    self
  }

  pub fn add_image(&mut self, name: &str) -> usize {
    self.images.push(ImageTree {
      name: name.to_owned(),
      directories: vec![Directory {
        name: String::new(),
        children: Vec::new(),
      }],
      files: Vec::new(),
    });
    self.images.len() - 1
  }

  pub fn add_dir(&mut self, image: usize, path: &str) -> &mut Self {
    self.images[image].ensure_dir(path);
    self
  }

  pub fn add_file(&mut self, image: usize, path: &str, data: &[u8]) -> &mut Self {
    self.images[image].add_file(path, Some(data.to_vec()));
    self
  }

  /// Adds a file entry whose hash has no lookup table entry.
  pub fn add_orphan_file(&mut self, image: usize, path: &str) -> &mut Self {
    self.images[image].add_file(path, None);
    self
  }

  pub fn build(&self) -> Vec<u8> {
    let mut out = vec![0u8; 208];
    let mut counter = 0u32;

    let mut metadata_entries: Vec<(ResourceSpec, [u8; 20])> = Vec::new();
    let mut file_entries: Vec<(ResourceSpec, [u8; 20])> = Vec::new();

    for image in &self.images {
      let mut hashes = Vec::with_capacity(image.files.len());
      for file in &image.files {
        let hash = match &file.data {
          Some(data) if data.is_empty() => [0u8; 20],
          _ => counter_hash(&mut counter),
        };
        if let Some(data) = &file.data {
          if !data.is_empty() {
            let resource = emit(&mut out, data, self.lzx, false);
            file_entries.push((resource, hash));
          }
        }
        hashes.push(hash);
      }

      let metadata = metadata_buffer(image, &hashes);
      let resource = emit(&mut out, &metadata, self.lzx, true);
      metadata_entries.push((resource, counter_hash(&mut counter)));
    }

    // Metadata entries come first so their table order matches image
    // order.
    let mut table = Vec::new();
    for (resource, hash) in metadata_entries.iter().chain(&file_entries) {
      table.extend_from_slice(&lookup_entry(*resource, hash));
    }
    let offset_table = emit(&mut out, &table, false, false);

    let xml = xml_data(&self.images);
    let xml_data = emit(&mut out, &xml, false, false);

    out[0..8].copy_from_slice(b"MSWIM\0\0\0");
    out[8..12].copy_from_slice(&208u32.to_le_bytes());
    out[12..16].copy_from_slice(&0x10d00u32.to_le_bytes());
    let flags: u32 = if self.lzx { 0x2 | 0x40000 } else { 0 };
    out[16..20].copy_from_slice(&flags.to_le_bytes());
    let chunk_size: u32 = if self.lzx { CHUNK_SIZE as u32 } else { 0 };
    out[20..24].copy_from_slice(&chunk_size.to_le_bytes());
    out[24..40].copy_from_slice(&[0x42; 16]);
    out[40..42].copy_from_slice(&1u16.to_le_bytes());
    out[42..44].copy_from_slice(&1u16.to_le_bytes());
    out[44..48].copy_from_slice(&(self.images.len() as u32).to_le_bytes());
    offset_table.write(&mut out[48..72]);
    xml_data.write(&mut out[72..96]);

    out
  }
}

impl ImageTree {
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
            children: Vec::new(),
          });
          self.directories[current].children.push(Child::Directory(index));
          index
        }
      };
    }
    current
  }

  fn add_file(&mut self, path: &str, data: Option<Vec<u8>>) {
    let (directory, name) = match path.rfind('/') {
      Some(split) => (self.ensure_dir(&path[..split]), &path[split + 1..]),
      None => (0, path),
    };
    let index = self.files.len();
    self.files.push(File {
      name: name.to_owned(),
      data,
    });
    self.directories[directory].children.push(Child::File(index));
  }
}

#[derive(Clone, Copy, Default)]
struct ResourceSpec {
  size_in_wim: u64,
  flags: u8,
  offset: u64,
  original_size: u64,
}

impl ResourceSpec {
  fn write(&self, buf: &mut [u8]) {
    let packed = self.size_in_wim | (self.flags as u64) << 56;
    buf[0..8].copy_from_slice(&packed.to_le_bytes());
    buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
    buf[16..24].copy_from_slice(&self.original_size.to_le_bytes());
  }
}

fn emit(out: &mut Vec<u8>, data: &[u8], lzx: bool, metadata: bool) -> ResourceSpec {
  let offset = out.len() as u64;
  let mut flags = if metadata { 0x02 } else { 0x00 };

  if lzx {
    flags |= 0x04;
    let chunks: Vec<&[u8]> = data.chunks(CHUNK_SIZE).collect();
    // Chunk offsets relative to the end of the table; the first chunk's
    // zero offset is implicit.
    let mut relative = 0u32;
    for chunk in chunks.iter().take(chunks.len().saturating_sub(1)) {
      relative += chunk.len() as u32;
      out.extend_from_slice(&relative.to_le_bytes());
    }
    for chunk in &chunks {
      out.extend_from_slice(chunk);
    }
  } else {
    out.extend_from_slice(data);
  }

  ResourceSpec {
    size_in_wim: out.len() as u64 - offset,
    flags,
    offset,
    original_size: data.len() as u64,
  }
}

fn lookup_entry(resource: ResourceSpec, hash: &[u8; 20]) -> [u8; 50] {
  let mut buf = [0u8; 50];
  resource.write(&mut buf[0..24]);
  buf[24..26].copy_from_slice(&1u16.to_le_bytes());
  buf[26..30].copy_from_slice(&1u32.to_le_bytes());
  buf[30..50].copy_from_slice(hash);
  buf
}

fn counter_hash(counter: &mut u32) -> [u8; 20] {
  *counter += 1;
  let mut hash = [0u8; 20];
  hash[0..4].copy_from_slice(&counter.to_le_bytes());
  hash
}

fn metadata_buffer(image: &ImageTree, hashes: &[[u8; 20]]) -> Vec<u8> {
  // Sibling runs are laid out in breadth-first order after the root
  // entry, each terminated by a zero length word.
  let mut order = vec![0usize];
  let mut head = 0;
  while head < order.len() {
    for child in &image.directories[order[head]].children {
      if let Child::Directory(index) = *child {
        order.push(index);
      }
    }
    head += 1;
  }

  let mut run_offset = vec![0u64; image.directories.len()];
  let mut cursor = 8 + align8(102);
  for &directory in &order {
    run_offset[directory] = cursor;
    cursor += run_size(image, directory);
  }

  let mut buf = vec![0u8; cursor as usize];
  buf[0..4].copy_from_slice(&8u32.to_le_bytes());

  write_dirent(&mut buf, 8, "", ATTRIBUTE_DIRECTORY, &[0u8; 20], run_offset[0]);

  for &directory in &order {
    let mut at = run_offset[directory];
    for child in &image.directories[directory].children {
      at += match *child {
        Child::Directory(index) => write_dirent(
          &mut buf,
          at,
          &image.directories[index].name,
          ATTRIBUTE_DIRECTORY,
          &[0u8; 20],
          run_offset[index],
        ),
        Child::File(index) => write_dirent(
          &mut buf,
          at,
          &image.files[index].name,
          ATTRIBUTE_ARCHIVE,
          &hashes[index],
          0,
        ),
      };
    }
  }

  buf
}

fn run_size(image: &ImageTree, directory: usize) -> u64 {
  let mut size = 8;
  for child in &image.directories[directory].children {
    let name = match *child {
      Child::Directory(index) => &image.directories[index].name,
      Child::File(index) => &image.files[index].name,
    };
    size += align8(102 + name.encode_utf16().count() as u64 * 2);
  }
  size
}

fn write_dirent(
  buf: &mut [u8],
  offset: u64,
  name: &str,
  attributes: u32,
  hash: &[u8; 20],
  subdir_offset: u64,
) -> u64 {
  let offset = offset as usize;
  let encoded: Vec<u8> = name
    .encode_utf16()
    .flat_map(|unit| unit.to_le_bytes())
    .collect();
  let length = 102 + encoded.len() as u64;

  buf[offset..offset + 8].copy_from_slice(&length.to_le_bytes());
  buf[offset + 8..offset + 12].copy_from_slice(&attributes.to_le_bytes());
  buf[offset + 16..offset + 24].copy_from_slice(&subdir_offset.to_le_bytes());
  let filetime = 133_500_000_000_000_000u64.to_le_bytes();
  buf[offset + 40..offset + 48].copy_from_slice(&filetime);
  buf[offset + 48..offset + 56].copy_from_slice(&filetime);
  buf[offset + 56..offset + 64].copy_from_slice(&filetime);
  buf[offset + 64..offset + 84].copy_from_slice(hash);
  buf[offset + 100..offset + 102].copy_from_slice(&(encoded.len() as u16).to_le_bytes());
  buf[offset + 102..offset + 102 + encoded.len()].copy_from_slice(&encoded);

  align8(length)
}

fn align8(value: u64) -> u64 {
  (value + 7) & !7
}

fn xml_data(images: &[ImageTree]) -> Vec<u8> {
  let mut document = String::from("<WIM>");
  for (position, image) in images.iter().enumerate() {
    document.push_str(&format!(
      "<IMAGE INDEX=\"{}\"><NAME>{}</NAME></IMAGE>",
      position + 1,
      image.name
    ));
  }
  document.push_str("</WIM>");

  let mut bytes = vec![0xff, 0xfe];
  for unit in document.encode_utf16() {
    bytes.extend_from_slice(&unit.to_le_bytes());
  }
  bytes
}
