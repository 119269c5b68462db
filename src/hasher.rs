use std::fmt;
use std::io::{self, Read, Write};

use crc::{Crc, Digest, CRC_32_ISCSI};

/// CRC-32C, used for every checksum the keeper writes to disk.
pub(crate) static CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Incremental checksum over everything fed to it.
#[derive(Clone)]
pub(crate) struct Hasher {
    digest: Digest<'static, u32>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub(crate) fn new() -> Self {
        Self {
            digest: CRC32C.digest(),
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub(crate) fn checksum(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// A writer that checksums everything passing through it.
pub(crate) struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> HashingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub(crate) fn checksum(&self) -> u32 {
        self.hasher.checksum()
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.write(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A reader that checksums everything read through it.
pub(crate) struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        HashingReader {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub(crate) fn checksum(&self) -> u32 {
        self.hasher.checksum()
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.write(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_oneshot() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello ");
        hasher.write(b"world");
        assert_eq!(hasher.checksum(), CRC32C.checksum(b"hello world"));
        // checksum does not consume the running state
        hasher.write(b"!");
        assert_eq!(hasher.checksum(), CRC32C.checksum(b"hello world!"));
    }

    #[test]
    fn writer_and_reader_agree() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"SnapHead").unwrap();
        w.write_all(&[1, 2, 3, 4]).unwrap();
        let written = w.checksum();
        let bytes = w.into_inner();

        let mut r = HashingReader::new(&bytes[..]);
        let mut sink = Vec::new();
        r.read_to_end(&mut sink).unwrap();
        assert_eq!(sink, bytes);
        assert_eq!(r.checksum(), written);
        assert_ne!(written, CRC32C.checksum(b"SnapHead"));
    }
}
