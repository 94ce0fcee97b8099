//! LZX decompression as used by WIM resources.
//!
//! The WIM flavour fixes the window at 32 KiB and compresses each chunk
//! independently, so the decompressor state (recent offsets, code length
//! baselines) resets per chunk. The bitstream is a sequence of 16-bit
//! little-endian units consumed most significant bit first. Every chunk
//! ends with the E8 call-translation filter undone over its output.

use crate::error::{Error, Result};

/// Window and maximum chunk size.
pub const WINDOW_SIZE: usize = 32768;

const VERBATIM_BLOCK: u32 = 1;
const ALIGNED_OFFSET_BLOCK: u32 = 2;
const UNCOMPRESSED_BLOCK: u32 = 3;

const NUM_CHARS: usize = 256;
const POSITION_SLOTS: usize = 30;
const MAIN_TREE_SYMBOLS: usize = NUM_CHARS + POSITION_SLOTS * 8;
const LENGTH_TREE_SYMBOLS: usize = 249;
const ALIGNED_TREE_SYMBOLS: usize = 8;
const PRETREE_SYMBOLS: usize = 20;
const MAX_CODE_LENGTH: usize = 16;

/// Translation size constant of the E8 filter.
const E8_FILE_SIZE: i32 = 12_000_000;

const POSITION_BASE: [u32; POSITION_SLOTS] = [
  0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536,
  2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576,
];

const EXTRA_BITS: [u8; POSITION_SLOTS] = [
  0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
  13,
];

struct BitReader<'a> {
  data: &'a [u8],
  position: usize,
  buffer: u32,
  nbits: u32,
}

impl<'a> BitReader<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self {
      data,
      position: 0,
      buffer: 0,
      nbits: 0,
    }
  }

  /// Top up the buffer to at least `count` bits, feeding zero bits past
  /// the end of the input.
  fn ensure(&mut self, count: u32) {
    while self.nbits < count {
      let unit = if self.position + 2 <= self.data.len() {
        let unit = u16::from_le_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        unit
      } else {
        0
      };

      self.buffer |= (unit as u32) << (16 - self.nbits);
      self.nbits += 16;
    }
  }

  fn read_bits(&mut self, count: u32) -> u32 {
    if count == 0 {
      return 0;
    }

    self.ensure(count);
    let value = self.buffer >> (32 - count);
    self.buffer <<= count;
    self.nbits -= count;
    value
  }

  /// Discard bits up to the next 16-bit unit boundary. A stream already on
  /// a boundary carries a full unit of padding here.
  fn align(&mut self) {
    if self.nbits == 0 {
      self.ensure(16);
    }

    self.buffer = 0;
    self.nbits = 0;
  }

  fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
    if self.position + count > self.data.len() {
      return Err(Error::Corrupt("unexpected end of compressed data"));
    }

    let bytes = &self.data[self.position..self.position + count];
    self.position += count;
    Ok(bytes)
  }
}

/// A canonical Huffman code, decoded one bit at a time.
struct Huffman {
  counts: [u16; MAX_CODE_LENGTH + 1],
  symbols: Vec<u16>,
}

impl Huffman {
  fn new(lengths: &[u8]) -> Result<Self> {
    let mut counts = [0u16; MAX_CODE_LENGTH + 1];
    for &length in lengths {
      counts[length as usize] += 1;
    }
    counts[0] = 0;

    // Incomplete codes are allowed (unused trees are all zero), but an
    // over-subscribed one cannot be decoded.
    let mut remaining = 1i32;
    for length in 1..=MAX_CODE_LENGTH {
      remaining <<= 1;
      remaining -= counts[length] as i32;
      if remaining < 0 {
        return Err(Error::Corrupt("over-subscribed Huffman code"));
      }
    }

    let mut offsets = [0usize; MAX_CODE_LENGTH + 2];
    for length in 1..=MAX_CODE_LENGTH {
      offsets[length + 1] = offsets[length] + counts[length] as usize;
    }

    let mut symbols = vec![0u16; offsets[MAX_CODE_LENGTH + 1]];
    for (symbol, &length) in lengths.iter().enumerate() {
      if length > 0 {
        symbols[offsets[length as usize]] = symbol as u16;
        offsets[length as usize] += 1;
      }
    }

    Ok(Self { counts, symbols })
  }

  fn decode(&self, bits: &mut BitReader) -> Result<u16> {
    let mut code = 0u32;
    let mut first = 0u32;
    let mut index = 0u32;

    for length in 1..=MAX_CODE_LENGTH {
      code |= bits.read_bits(1);
      let count = self.counts[length] as u32;

      if code < first + count {
        return Ok(self.symbols[(index + code - first) as usize]);
      }

      index += count;
      first = (first + count) << 1;
      code <<= 1;
    }

    Err(Error::Corrupt("invalid Huffman code"))
  }
}

/// Read a delta-coded code length array. Lengths carry over from the
/// previous block of the chunk as the delta baseline.
fn read_lengths(bits: &mut BitReader, lengths: &mut [u8]) -> Result<()> {
  let mut pretree_lengths = [0u8; PRETREE_SYMBOLS];
  for length in &mut pretree_lengths {
    *length = bits.read_bits(4) as u8;
  }
  let pretree = Huffman::new(&pretree_lengths)?;

  let mut index = 0;
  while index < lengths.len() {
    let code = pretree.decode(bits)?;
    match code {
      0..=16 => {
        lengths[index] = ((lengths[index] as u32 + 17 - code as u32) % 17) as u8;
        index += 1;
      }
      17 | 18 => {
        let run = if code == 17 {
          bits.read_bits(4) as usize + 4
        } else {
          bits.read_bits(5) as usize + 20
        };

        if index + run > lengths.len() {
          return Err(Error::Corrupt("code length run overflow"));
        }

        lengths[index..index + run].fill(0);
        index += run;
      }
      19 => {
        let run = bits.read_bits(1) as usize + 4;
        if index + run > lengths.len() {
          return Err(Error::Corrupt("code length run overflow"));
        }

        let code = pretree.decode(bits)?;
        if code > 16 {
          return Err(Error::Corrupt("invalid code length delta"));
        }

        let value = ((lengths[index] as u32 + 17 - code as u32) % 17) as u8;
        lengths[index..index + run].fill(value);
        index += run;
      }
      _ => return Err(Error::Corrupt("invalid pretree code")),
    }
  }

  Ok(())
}

fn decode_block(
  bits: &mut BitReader,
  output: &mut Vec<u8>,
  end: usize,
  main_tree: &Huffman,
  length_tree: &Huffman,
  aligned_tree: Option<&Huffman>,
  lru: &mut [u32; 3],
) -> Result<()> {
  while output.len() < end {
    let symbol = main_tree.decode(bits)?;
    if (symbol as usize) < NUM_CHARS {
      output.push(symbol as u8);
      continue;
    }

    let symbol = symbol as usize - NUM_CHARS;
    let slot = symbol >> 3;
    let header = symbol & 7;

    let length = if header == 7 {
      length_tree.decode(bits)? as usize + 9
    } else {
      header + 2
    };

    let offset = match slot {
      0 => lru[0],
      1 => {
        lru.swap(0, 1);
        lru[0]
      }
      2 => {
        lru.swap(0, 2);
        lru[0]
      }
      _ => {
        let extra = EXTRA_BITS[slot] as u32;
        let formatted = match aligned_tree {
          Some(aligned) if extra >= 3 => {
            let high = bits.read_bits(extra - 3) << 3;
            POSITION_BASE[slot] + high + aligned.decode(bits)? as u32
          }
          _ => POSITION_BASE[slot] + bits.read_bits(extra),
        };

        let offset = formatted - 2;
        lru[2] = lru[1];
        lru[1] = lru[0];
        lru[0] = offset;
        offset
      }
    } as usize;

    if offset == 0 || offset > output.len() {
      return Err(Error::Corrupt("match offset out of range"));
    }

    if output.len() + length > end {
      return Err(Error::Corrupt("match exceeds block"));
    }

    // Matches may overlap their own output.
    for _ in 0..length {
      let byte = output[output.len() - offset];
      output.push(byte);
    }
  }

  Ok(())
}

/// Undo the E8 call translation filter applied over each chunk.
fn undo_e8(data: &mut [u8]) {
  if data.len() <= 10 {
    return;
  }

  let mut index = 0;
  while index < data.len() - 10 {
    if data[index] != 0xe8 {
      index += 1;
      continue;
    }

    let absolute = i32::from_le_bytes([
      data[index + 1],
      data[index + 2],
      data[index + 3],
      data[index + 4],
    ]);
    let position = index as i32;

    if absolute >= -position && absolute < E8_FILE_SIZE {
      let relative = if absolute >= 0 {
        absolute - position
      } else {
        absolute + E8_FILE_SIZE
      };
      data[index + 1..index + 5].copy_from_slice(&relative.to_le_bytes());
    }

    index += 5;
  }
}

/// Decompress one chunk of `expected` uncompressed bytes.
pub fn decompress(input: &[u8], expected: usize) -> Result<Vec<u8>> {
  if expected > WINDOW_SIZE {
    return Err(Error::Corrupt("chunk larger than window"));
  }

  let mut bits = BitReader::new(input);
  let mut output = Vec::with_capacity(expected);
  let mut lru = [1u32; 3];
  let mut main_lengths = [0u8; MAIN_TREE_SYMBOLS];
  let mut length_lengths = [0u8; LENGTH_TREE_SYMBOLS];

  while output.len() < expected {
    let block_type = bits.read_bits(3);
    let block_size = if bits.read_bits(1) == 1 {
      WINDOW_SIZE
    } else {
      bits.read_bits(16) as usize
    };

    if block_size == 0 {
      return Err(Error::Corrupt("empty block"));
    }

    let end = output.len() + block_size;
    if end > expected {
      return Err(Error::Corrupt("block exceeds chunk size"));
    }

    match block_type {
      UNCOMPRESSED_BLOCK => {
        bits.align();

        let stored = bits.read_bytes(12)?;
        for (index, offset) in lru.iter_mut().enumerate() {
          *offset = u32::from_le_bytes([
            stored[index * 4],
            stored[index * 4 + 1],
            stored[index * 4 + 2],
            stored[index * 4 + 3],
          ]);
        }

        let data = bits.read_bytes(block_size)?;
        output.extend_from_slice(data);

        // Odd-sized stored data is padded back to a unit boundary.
        if block_size % 2 == 1 {
          let _ = bits.read_bytes(1);
        }
      }
      VERBATIM_BLOCK | ALIGNED_OFFSET_BLOCK => {
        let aligned_tree = if block_type == ALIGNED_OFFSET_BLOCK {
          let mut lengths = [0u8; ALIGNED_TREE_SYMBOLS];
          for length in &mut lengths {
            *length = bits.read_bits(3) as u8;
          }
          Some(Huffman::new(&lengths)?)
        } else {
          None
        };

        read_lengths(&mut bits, &mut main_lengths[..NUM_CHARS])?;
        read_lengths(&mut bits, &mut main_lengths[NUM_CHARS..])?;
        let main_tree = Huffman::new(&main_lengths)?;

        read_lengths(&mut bits, &mut length_lengths)?;
        let length_tree = Huffman::new(&length_lengths)?;

        decode_block(
          &mut bits,
          &mut output,
          end,
          &main_tree,
          &length_tree,
          aligned_tree.as_ref(),
          &mut lru,
        )?;
      }
      _ => return Err(Error::Corrupt("invalid block type")),
    }
  }

  undo_e8(&mut output);
  Ok(output)
}
