//! Segment files.
//!
//! ```text
//! +-----------+-------------+-----------------+
//! | magic:u32 | version:u16 | prev_zxid:u64   |   header
//! +---------+-------------+-------------+---------------+
//! | len:u32 | len_crc:u32 | crc32c:u32  | payload (len) |   one record per entry
//! +---------+-------------+-------------+---------------+
//! ```
//!
//! `prev_zxid` is the zxid the first record follows, so even an empty segment knows where the
//! log continues from. The file name carries the same value.
//!
//! `len_crc` covers the length field alone. A record only counts as torn when its header is cut
//! short, or when a verified header is followed by a short payload.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::{sync_dir, LogEntry};
use crate::hasher::CRC32C;
use crate::{error, Zxid};

const MAGIC: u32 = 0x5a4b_4c47; // "ZKLG"
const VERSION: u16 = 1;
pub(super) const HEADER_SIZE: u64 = 4 + 2 + 8;
const RECORD_HEADER_SIZE: usize = 4 + 4 + 4;

pub(super) fn file_name(prev: Zxid) -> String {
    format!("log_{:016x}.log", prev.raw())
}

pub(super) fn parse_file_name(name: &str) -> Option<Zxid> {
    let hex = name.strip_prefix("log_")?.strip_suffix(".log")?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok().map(Zxid::from_raw)
}

/// Bookkeeping for one segment file.
#[derive(Debug, Clone)]
pub(super) struct Segment {
    pub(super) path: PathBuf,
    /// The zxid the first entry follows.
    pub(super) prev: Zxid,
    /// The last entry in the segment, or `prev` while it is empty.
    pub(super) last: Zxid,
    pub(super) entries: usize,
    /// Length of the valid prefix of the file.
    pub(super) len: u64,
}

impl Segment {
    /// Creates an empty, durable segment continuing from `prev`.
    pub(super) fn create(dir: &Path, prev: Zxid) -> io::Result<Segment> {
        let path = dir.join(file_name(prev));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_u32::<BigEndian>(MAGIC)?;
        file.write_u16::<BigEndian>(VERSION)?;
        file.write_u64::<BigEndian>(prev.raw())?;
        file.sync_all()?;
        sync_dir(dir)?;

        Ok(Segment {
            path,
            prev,
            last: prev,
            entries: 0,
            len: HEADER_SIZE,
        })
    }

    pub(super) fn open_for_append(&self) -> io::Result<File> {
        OpenOptions::new().append(true).open(&self.path)
    }

    pub(super) fn display(&self) -> String {
        self.path.display().to_string()
    }
}

/// Frames one entry as a record.
pub(super) fn encode_record(entry: &LogEntry) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    entry.encode(&mut payload)?;
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    let len = payload.len() as u32;
    record.write_u32::<BigEndian>(len)?;
    record.write_u32::<BigEndian>(CRC32C.checksum(&len.to_be_bytes()))?;
    record.write_u32::<BigEndian>(CRC32C.checksum(&payload))?;
    record.extend_from_slice(&payload);
    Ok(record)
}

/// What the next read from a segment turned up.
pub(super) enum Record {
    /// A complete, verified entry, and the offset just past it.
    Entry(LogEntry, u64),
    /// Clean end of file.
    End,
    /// The file ends partway through a record that starts at the given offset.
    Torn(u64),
}

/// Sequential reader over the records of one segment.
pub(super) struct SegmentReader {
    reader: BufReader<File>,
    file: String,
    offset: u64,
    prev: Zxid,
}

impl SegmentReader {
    /// Opens a segment and checks its header. Returns `Ok(None)` if the file is too short to hold
    /// a header at all.
    pub(super) fn open(path: &Path) -> Result<Option<Self>, failure::Error> {
        let file = File::open(path)?;
        if file.metadata()?.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut reader = BufReader::new(file);
        let name = path.display().to_string();

        let magic = reader.read_u32::<BigEndian>()?;
        let version = reader.read_u16::<BigEndian>()?;
        let prev = Zxid::from_raw(reader.read_u64::<BigEndian>()?);
        if magic != MAGIC || version != VERSION {
            return Err(error::Recovery::LogCorrupt {
                file: name,
                offset: 0,
                reason: format!("bad header (magic {:#x}, version {})", magic, version),
            }
            .into());
        }

        Ok(Some(SegmentReader {
            reader,
            file: name,
            offset: HEADER_SIZE,
            prev,
        }))
    }

    pub(super) fn prev(&self) -> Zxid {
        self.prev
    }

    pub(super) fn next_record(&mut self) -> Result<Record, failure::Error> {
        let start = self.offset;

        let mut header = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(Record::End),
            n if n < RECORD_HEADER_SIZE => return Ok(Record::Torn(start)),
            _ => {}
        }
        let mut h = &header[..];
        let len = h.read_u32::<BigEndian>()?;
        let len_crc = h.read_u32::<BigEndian>()?;
        let crc = h.read_u32::<BigEndian>()?;
        if CRC32C.checksum(&len.to_be_bytes()) != len_crc {
            return Err(self.corrupt(start, "record length checksum mismatch".to_owned()));
        }
        let len = u64::from(len);

        let mut payload = Vec::new();
        (&mut self.reader).take(len).read_to_end(&mut payload)?;
        if (payload.len() as u64) < len {
            return Ok(Record::Torn(start));
        }

        if CRC32C.checksum(&payload) != crc {
            return Err(self.corrupt(start, "checksum mismatch".to_owned()));
        }
        let entry = LogEntry::decode(&payload).map_err(|e| self.corrupt(start, e.to_string()))?;

        self.offset = start + RECORD_HEADER_SIZE as u64 + len;
        Ok(Record::Entry(entry, self.offset))
    }

    fn corrupt(&self, offset: u64, reason: String) -> failure::Error {
        error::Recovery::LogCorrupt {
            file: self.file.clone(),
            offset,
            reason,
        }
        .into()
    }
}

/// Like `read_exact`, but reports how much was read before end of file instead of failing.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Lists segment files in `dir`, ordered by the zxid they continue from.
pub(super) fn list(dir: &Path) -> io::Result<Vec<(Zxid, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(prev) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_file_name)
        {
            segments.push((prev, path));
        }
    }
    segments.sort_by_key(|(prev, _)| *prev);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        let z = Zxid::new(2, 0x1f);
        assert_eq!(file_name(z), "log_000000020000001f.log");
        assert_eq!(parse_file_name(&file_name(z)), Some(z));
        assert_eq!(parse_file_name("log_1.log"), None);
        assert_eq!(parse_file_name("snapshot_000000020000001f.snap"), None);
    }
}
