//! The XML data resource describing an archive's images.
//!
//! The document is UTF-16 with a byte order mark and holds one `IMAGE`
//! element per image, in metadata resource order. Only the fields the
//! reader surfaces are pulled out; everything else (sizes, the nested
//! `WINDOWS` block) is skipped structurally.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Descriptive fields of one `IMAGE` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
  pub index: u32,
  pub name: String,
  pub description: Option<String>,
  pub display_name: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
  Name,
  Description,
  DisplayName,
}

/// Decode the raw XML data resource into text.
pub fn decode_xml(bytes: &[u8]) -> Result<String> {
  let (bytes, big_endian) = match bytes {
    [0xff, 0xfe, rest @ ..] => (rest, false),
    [0xfe, 0xff, rest @ ..] => (rest, true),
    rest => (rest, false),
  };

  if bytes.len() % 2 != 0 {
    return Err(Error::Xml("odd UTF-16 data length".into()));
  }

  let units: Vec<u16> = bytes
    .chunks_exact(2)
    .map(|pair| {
      if big_endian {
        u16::from_be_bytes([pair[0], pair[1]])
      } else {
        u16::from_le_bytes([pair[0], pair[1]])
      }
    })
    .collect();

  char::decode_utf16(units)
    .collect::<std::result::Result<String, _>>()
    .map_err(|err| Error::Xml(err.to_string()))
}

/// Parse the `IMAGE` elements of the XML data document, in document order.
pub fn parse_image_info(xml: &str) -> Result<Vec<ImageInfo>> {
  let mut reader = Reader::from_str(xml);
  let mut images = Vec::new();
  let mut current: Option<ImageInfo> = None;
  let mut depth = 0usize;
  let mut field: Option<Field> = None;

  loop {
    match reader.read_event().map_err(|err| Error::Xml(err.to_string()))? {
      Event::Eof => break,
      Event::Start(start) => match current.as_mut() {
        None => {
          if start.name().as_ref() == b"IMAGE" {
            current = Some(ImageInfo {
              index: image_index(&start)?,
              ..ImageInfo::default()
            });
            depth = 0;
            field = None;
          }
        }
        Some(_) => {
          depth += 1;
          // Only direct children of IMAGE are captured; the nested
          // WINDOWS block repeats some of these names.
          if depth == 1 {
            field = match start.name().as_ref() {
              b"NAME" => Some(Field::Name),
              b"DESCRIPTION" => Some(Field::Description),
              b"DISPLAYNAME" => Some(Field::DisplayName),
              _ => None,
            };
          }
        }
      },
      Event::Text(text) => {
        if let (Some(image), Some(field)) = (current.as_mut(), field) {
          let value = text
            .unescape()
            .map_err(|err| Error::Xml(err.to_string()))?
            .into_owned();

          match field {
            Field::Name => image.name = value,
            Field::Description => image.description = Some(value),
            Field::DisplayName => image.display_name = Some(value),
          }
        }
      }
      Event::End(_) => {
        if current.is_some() {
          if depth == 0 {
            if let Some(image) = current.take() {
              images.push(image);
            }
          } else {
            if depth == 1 {
              field = None;
            }
            depth -= 1;
          }
        }
      }
      Event::Empty(empty) => {
        if current.is_none() && empty.name().as_ref() == b"IMAGE" {
          images.push(ImageInfo {
            index: image_index(&empty)?,
            ..ImageInfo::default()
          });
        }
      }
      _ => {}
    }
  }

  Ok(images)
}

fn image_index(element: &quick_xml::events::BytesStart) -> Result<u32> {
  for attribute in element.attributes() {
    let attribute = attribute.map_err(|err| Error::Xml(err.to_string()))?;
    if attribute.key.as_ref() == b"INDEX" {
      let value = attribute
        .unescape_value()
        .map_err(|err| Error::Xml(err.to_string()))?;

      return value
        .parse()
        .map_err(|_| Error::Xml(format!("bad image index {value:?}")));
    }
  }

  Err(Error::Xml("IMAGE element without INDEX".into()))
}
