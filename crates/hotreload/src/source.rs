use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Fragment source text loaded from disk for a single compile attempt.
///
/// A `ShaderSource` is created fresh for every attempt and moved into the
/// compile step, which drops it on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    path: PathBuf,
    text: String,
}

impl ShaderSource {
    /// Reads the whole file. Never yields a partially filled buffer.
    ///
    /// Files with an interior NUL byte are rejected with
    /// [`io::ErrorKind::InvalidData`], since graphics drivers treat NUL as the
    /// end of the source text.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        if text.contains('\0') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} contains a NUL byte", path.display()),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    /// Wraps in-memory text, e.g. a built-in fallback shader.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn len(&self) -> usize {
        self.text.len()
    }
}
