// Read + Seek window over a region of a container
//
// Filesystem drivers get one of these instead of the container itself, so
// byte 0 for the driver is the first byte of its partition.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::EvidenceContainer;

#[derive(Clone, Debug)]
pub struct VolumeReader {
    container: Arc<EvidenceContainer>,
    start: u64,
    len: u64,
    pos: u64,
}

impl VolumeReader {
    /// Window from `start` to the end of the container
    pub fn new(container: Arc<EvidenceContainer>, start: u64) -> Self {
        let len = container.size().saturating_sub(start);
        Self::with_len(container, start, len)
    }

    /// Window of `len` bytes at `start`, clamped to the container
    pub fn with_len(container: Arc<EvidenceContainer>, start: u64, len: u64) -> Self {
        let len = len.min(container.size().saturating_sub(start));
        Self {
            container,
            start,
            len,
            pos: 0,
        }
    }

    /// Byte offset of the window within the container
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn container(&self) -> &Arc<EvidenceContainer> {
        &self.container
    }
}

impl Read for VolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let n = buf.len().min((self.len - self.pos) as usize);
        let read = self
            .container
            .read_at(self.start + self.pos, &mut buf[..n])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for VolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
