//! Byte resources that session payloads are persisted to and loaded from

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Opaque byte sink/source addressed by an identifier
pub trait Resource: Send + Sync {
    /// Identifier used in diagnostics
    fn id(&self) -> String;

    /// Open the resource for reading
    fn open_read(&self) -> io::Result<Box<dyn Read + '_>>;

    /// Open the resource for writing, truncating previous content
    fn open_write(&self) -> io::Result<Box<dyn Write + '_>>;
}

/// Resource backed by a file
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    /// Resource for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for FileResource {
    fn id(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn open_write(&self) -> io::Result<Box<dyn Write + '_>> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(BufWriter::new(File::create(&self.path)?)))
    }
}

/// Resource held in memory; clones share the same buffer
#[derive(Clone, Default)]
pub struct MemoryResource {
    name: String,
    data: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryResource {
    /// Empty (not yet written) resource
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Arc::default(),
        }
    }

    /// Resource pre-filled with bytes
    pub fn with_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let resource = Self::new(name);
        if let Ok(mut data) = resource.data.lock() {
            *data = Some(bytes);
        }
        resource
    }

    /// Current content, if written
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.data.lock().ok().and_then(|d| d.clone())
    }
}

impl fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("name", &self.name)
            .field("len", &self.bytes().map(|b| b.len()))
            .finish()
    }
}

impl Resource for MemoryResource {
    fn id(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + '_>> {
        match self.bytes() {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was never written", self.id()),
            )),
        }
    }

    fn open_write(&self) -> io::Result<Box<dyn Write + '_>> {
        Ok(Box::new(MemoryWriter {
            target: &self.data,
            buffer: Vec::new(),
        }))
    }
}

/// Publishes its buffer into the shared slot on flush
struct MemoryWriter<'a> {
    target: &'a Mutex<Option<Vec<u8>>>,
    buffer: Vec<u8>,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut data = self
            .target
            .lock()
            .map_err(|_| io::Error::other("memory resource lock poisoned"))?;
        *data = Some(self.buffer.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_resource_roundtrip() {
        let resource = MemoryResource::new("session");
        assert!(resource.open_read().is_err());

        {
            let mut writer = resource.open_write().unwrap();
            writer.write_all(b"hello").unwrap();
            writer.flush().unwrap();
        }

        let mut content = String::new();
        let _ = resource.open_read().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
        assert_eq!(resource.clone().bytes().unwrap(), b"hello");
    }

    #[test]
    fn test_file_resource_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let resource = FileResource::new(dir.path().join("reports/session.json"));
        {
            let mut writer = resource.open_write().unwrap();
            writer.write_all(b"{}").unwrap();
            writer.flush().unwrap();
        }
        assert!(resource.path().exists());
        assert!(resource.id().starts_with("file:"));
    }
}
