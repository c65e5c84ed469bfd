//! Input abstraction over mod assemblies and their companion symbol files.
//!
//! A [`File`] owns its bytes through a [`Backend`], a read-only memory mapping of the file on
//! disk ([`physical::Physical`]) with bounds-checked slice access. Mods handed over in memory
//! skip this layer and go straight to [`crate::ModLoader::load_bytes`]. The submodules [`io`],
//! [`parser`] and [`writer`] provide the byte-level encoding helpers shared by the module image
//! codec and the symbol readers.

pub mod io;
pub mod parser;
pub mod writer;

mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use physical::Physical;

/// Byte storage behind a [`File`].
pub trait Backend: Send + Sync {
    /// Bounds-checked access to `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully inside the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// The complete data.
    fn data(&self) -> &[u8];

    /// Length of the data in bytes.
    fn len(&self) -> usize;
}

/// An opened input file.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-map a file on disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] for zero-length files.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        Ok(File {
            data: Box::new(data),
        })
    }

    /// Length of the file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Bounds-checked access to a range of the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully inside the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        file.flush().unwrap();

        let input = File::from_file(file.path()).unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input.data_slice(1, 2).unwrap(), &[2, 3]);
        assert!(input.data_slice(2, 2).is_err());
    }

    #[test]
    fn empty_input() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(File::from_file(file.path()), Err(Error::Empty)));
    }
}
