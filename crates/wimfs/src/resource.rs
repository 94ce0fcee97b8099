//! Streaming access to archive resources.
//!
//! Uncompressed resources are read straight from their extent. Compressed
//! ones are split into fixed-size chunks, each LZX-compressed on its own
//! and preceded by a table of chunk offsets; a chunk whose stored size
//! equals its uncompressed size was left raw by the writer.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::lzx;
use crate::spec::{Compression, ResourceHeader};

/// Reader over one resource's uncompressed contents.
pub struct Resource<'a, Storage> {
  storage: &'a mut Storage,
  len: u64,
  state: State,
}

enum State {
  Raw { offset: u64, remaining: u64 },
  Chunked(Box<Chunked>),
}

struct Chunked {
  /// Absolute offsets of each chunk plus an end sentinel.
  chunks: Vec<u64>,
  original_size: u64,
  chunk_size: u64,
  current: usize,
  buffer: Vec<u8>,
  buffer_position: usize,
}

impl<'a, Storage> Resource<'a, Storage>
where
  Storage: Read + Seek,
{
  pub(crate) fn new(
    storage: &'a mut Storage,
    header: &ResourceHeader,
    compression: Compression,
    chunk_size: u64,
  ) -> Result<Self> {
    if !header.is_compressed() || header.original_size == 0 {
      return Ok(Self {
        storage,
        len: header.original_size,
        state: State::Raw {
          offset: header.offset,
          remaining: header.original_size,
        },
      });
    }

    if compression == Compression::None {
      return Err(Error::Corrupt("compressed resource in uncompressed archive"));
    }

    if chunk_size == 0 {
      return Err(Error::Corrupt("zero chunk size"));
    }

    let chunk_count = header.original_size.div_ceil(chunk_size);
    let entry_size: u64 = if header.original_size > u32::MAX as u64 { 8 } else { 4 };
    let table_size = (chunk_count - 1) * entry_size;

    if table_size >= header.size_in_wim {
      return Err(Error::Corrupt("chunk table exceeds resource"));
    }

    let data_start = header.offset + table_size;
    let end = header.offset + header.size_in_wim;

    let mut table = vec![0u8; table_size as usize];
    storage.seek(SeekFrom::Start(header.offset))?;
    storage.read_exact(&mut table)?;

    let mut chunks = Vec::with_capacity(chunk_count as usize + 1);
    chunks.push(data_start);

    for entry in table.chunks_exact(entry_size as usize) {
      let relative = if entry_size == 8 {
        LittleEndian::read_u64(entry)
      } else {
        LittleEndian::read_u32(entry) as u64
      };

      let absolute = data_start + relative;
      if absolute < *chunks.last().unwrap_or(&data_start) || absolute > end {
        return Err(Error::Corrupt("chunk table not monotonic"));
      }

      chunks.push(absolute);
    }

    chunks.push(end);

    Ok(Self {
      storage,
      len: header.original_size,
      state: State::Chunked(Box::new(Chunked {
        chunks,
        original_size: header.original_size,
        chunk_size,
        current: 0,
        buffer: Vec::new(),
        buffer_position: 0,
      })),
    })
  }

  /// A resource with no contents, as recorded for zero-length files.
  pub(crate) fn empty(storage: &'a mut Storage) -> Self {
    Self {
      storage,
      len: 0,
      state: State::Raw {
        offset: 0,
        remaining: 0,
      },
    }
  }

  /// Uncompressed size of the resource.
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl<Storage> Read for Resource<'_, Storage>
where
  Storage: Read + Seek,
{
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }

    match &mut self.state {
      State::Raw { offset, remaining } => {
        if *remaining == 0 {
          return Ok(0);
        }

        let wanted = (*remaining).min(buf.len() as u64) as usize;
        self.storage.seek(SeekFrom::Start(*offset))?;
        let read = self.storage.read(&mut buf[..wanted])?;

        if read == 0 {
          return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "resource truncated",
          ));
        }

        *offset += read as u64;
        *remaining -= read as u64;
        Ok(read)
      }
      State::Chunked(chunked) => {
        if chunked.buffer_position >= chunked.buffer.len() {
          if chunked.current + 1 >= chunked.chunks.len() {
            return Ok(0);
          }

          let start = chunked.chunks[chunked.current];
          let compressed_size = chunked.chunks[chunked.current + 1] - start;
          let expected = chunked
            .chunk_size
            .min(chunked.original_size - chunked.current as u64 * chunked.chunk_size)
            as usize;

          let mut compressed = vec![0u8; compressed_size as usize];
          self.storage.seek(SeekFrom::Start(start))?;
          self.storage.read_exact(&mut compressed)?;

          let decoded = if compressed_size == expected as u64 {
            compressed
          } else {
            lzx::decompress(&compressed, expected)
              .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?
          };

          if decoded.len() != expected {
            return Err(std::io::Error::new(
              std::io::ErrorKind::InvalidData,
              "short chunk",
            ));
          }

          chunked.buffer = decoded;
          chunked.buffer_position = 0;
          chunked.current += 1;
        }

        let available = chunked.buffer.len() - chunked.buffer_position;
        let wanted = available.min(buf.len());
        buf[..wanted]
          .copy_from_slice(&chunked.buffer[chunked.buffer_position..chunked.buffer_position + wanted]);
        chunked.buffer_position += wanted;
        Ok(wanted)
      }
    }
  }
}

/// Read a whole resource into memory. Used for the bounded bookkeeping
/// resources (lookup table, XML data, image metadata).
pub(crate) fn read_resource_vec<Storage>(
  storage: &mut Storage,
  header: &ResourceHeader,
  compression: Compression,
  chunk_size: u64,
) -> Result<Vec<u8>>
where
  Storage: Read + Seek,
{
  let mut resource = Resource::new(storage, header, compression, chunk_size)?;
  let mut data = Vec::with_capacity(resource.len().min(1 << 20) as usize);
  resource.read_to_end(&mut data)?;
  Ok(data)
}
