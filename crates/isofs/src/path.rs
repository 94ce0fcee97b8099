/// A borrowed path within an ISO 9660 volume.
///
/// Components are separated by `/` or `\`; empty components (leading,
/// trailing or repeated separators) carry no meaning and are skipped
/// during iteration.
#[derive(Debug)]
#[repr(transparent)]
pub struct IsoPath(str);

impl IsoPath {
  pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Self {
    unsafe { &*(s.as_ref() as *const str as *const IsoPath) }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns the components of this path as an iterator.
  pub fn components<'a>(&'a self) -> Components<'a> {
    Components { path: &self.0 }
  }
}

impl AsRef<IsoPath> for str {
  fn as_ref(&self) -> &IsoPath {
    IsoPath::new(self)
  }
}

impl AsRef<IsoPath> for String {
  fn as_ref(&self) -> &IsoPath {
    IsoPath::new(self.as_str())
  }
}

pub struct Components<'a> {
  path: &'a str,
}

impl<'a> Iterator for Components<'a> {
  type Item = &'a str;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.path.is_empty() {
        return None;
      }

      let part = if let Some(pos) = self.path.find(['/', '\\']) {
        let part = &self.path[..pos];
        self.path = &self.path[pos + 1..];
        part
      } else {
        let part = self.path;
        self.path = "";
        part
      };

      if !part.is_empty() {
        return Some(part);
      }
    }
  }
}
