//! On-disk snapshot format.
//!
//! ```text
//! "SnapHead" | version:u8 | last_zxid:u64 | node_count:u64 | session_count:u64
//! batch*     : type:u8 | count:u32 | len:u32 | crc32c:u32 | payload (len)
//! end        : type:u8 = 0
//! "SnapTail" | crc32c:u32 over everything before the tail
//! ```
//!
//! A node record is `path | data | stat`, a session record `id:i64 | timeout:i32`, and the
//! single meta record `next_session_id:i64`. Child sets are not stored; they are rebuilt from
//! the paths on load and checked against the stored `num_children`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::data_tree::{DataTree, Node, TreeView};
use crate::hasher::{HashingReader, HashingWriter, CRC32C};
use crate::proto::{BufferReader, ReadFrom, StringReader, WriteTo};
use crate::{Stat, Zxid};

const HEAD: &[u8; 8] = b"SnapHead";
const TAIL: &[u8; 8] = b"SnapTail";
const VERSION: u8 = 1;

const BATCH_END: u8 = 0;
const BATCH_NODES: u8 = 1;
const BATCH_SESSIONS: u8 = 2;
const BATCH_META: u8 = 3;

/// Serializes a view. Returns the underlying writer once the tail is written.
pub(crate) fn encode<W: Write>(view: &TreeView, batch_size: usize, writer: W) -> io::Result<W> {
    let mut w = HashingWriter::new(writer);
    w.write_all(HEAD)?;
    w.write_u8(VERSION)?;
    w.write_u64::<BigEndian>(view.last_zxid().raw())?;
    w.write_u64::<BigEndian>(view.len() as u64)?;
    w.write_u64::<BigEndian>(view.sessions().count() as u64)?;

    let mut batch = Vec::new();
    let mut count = 0;
    for (path, node) in view.iter() {
        path.write_to(&mut batch)?;
        node.data().write_to(&mut batch)?;
        node.stat().write_to(&mut batch)?;
        count += 1;
        if count == batch_size {
            write_batch(&mut w, BATCH_NODES, count, &batch)?;
            batch.clear();
            count = 0;
        }
    }
    if count > 0 {
        write_batch(&mut w, BATCH_NODES, count, &batch)?;
        batch.clear();
    }

    count = 0;
    for (id, timeout) in view.sessions() {
        batch.write_i64::<BigEndian>(id)?;
        batch.write_i32::<BigEndian>(timeout)?;
        count += 1;
    }
    if count > 0 {
        write_batch(&mut w, BATCH_SESSIONS, count, &batch)?;
        batch.clear();
    }

    batch.write_i64::<BigEndian>(view.next_session_id())?;
    write_batch(&mut w, BATCH_META, 1, &batch)?;
    w.write_u8(BATCH_END)?;

    let checksum = w.checksum();
    let mut writer = w.into_inner();
    writer.write_all(TAIL)?;
    writer.write_u32::<BigEndian>(checksum)?;
    Ok(writer)
}

fn write_batch<W: Write>(w: &mut W, kind: u8, count: usize, payload: &[u8]) -> io::Result<()> {
    w.write_u8(kind)?;
    w.write_u32::<BigEndian>(count as u32)?;
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_u32::<BigEndian>(CRC32C.checksum(payload))?;
    w.write_all(payload)
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Parses and verifies a snapshot, rebuilding the tree it describes.
pub(crate) fn decode<R: Read>(reader: R) -> io::Result<DataTree> {
    let mut r = HashingReader::new(reader);

    let mut head = [0u8; 8];
    r.read_exact(&mut head)?;
    if &head != HEAD {
        return Err(invalid("bad head magic"));
    }
    let version = r.read_u8()?;
    if version != VERSION {
        return Err(invalid(format!("unsupported version {}", version)));
    }
    let last_zxid = Zxid::from_raw(r.read_u64::<BigEndian>()?);
    let node_count = r.read_u64::<BigEndian>()?;
    let session_count = r.read_u64::<BigEndian>()?;

    let mut nodes = BTreeMap::new();
    let mut stored_children = Vec::new();
    let mut sessions = BTreeMap::new();
    let mut next_session_id = None;

    loop {
        let kind = r.read_u8()?;
        if kind == BATCH_END {
            break;
        }
        let count = r.read_u32::<BigEndian>()?;
        let len = r.read_u32::<BigEndian>()? as u64;
        let crc = r.read_u32::<BigEndian>()?;
        let mut payload = Vec::new();
        (&mut r).take(len).read_to_end(&mut payload)?;
        if payload.len() as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "batch cut short",
            ));
        }
        if CRC32C.checksum(&payload) != crc {
            return Err(invalid(format!("batch checksum mismatch (type {})", kind)));
        }

        let mut p = &payload[..];
        for _ in 0..count {
            match kind {
                BATCH_NODES => {
                    let path = p.read_string()?;
                    let data = p.read_buffer()?;
                    let stat = Stat::read_from(&mut p)?;
                    if stat.data_length as usize != data.len() {
                        return Err(invalid(format!("{} has inconsistent data length", path)));
                    }
                    stored_children.push((path.clone(), stat.num_children));
                    if nodes.insert(path, Node::from_stat(data, &stat)).is_some() {
                        return Err(invalid("duplicate node"));
                    }
                }
                BATCH_SESSIONS => {
                    let id = p.read_i64::<BigEndian>()?;
                    let timeout = p.read_i32::<BigEndian>()?;
                    sessions.insert(id, timeout);
                }
                BATCH_META => next_session_id = Some(p.read_i64::<BigEndian>()?),
                other => return Err(invalid(format!("unknown batch type {}", other))),
            }
        }
        if !p.is_empty() {
            return Err(invalid("trailing bytes in batch"));
        }
    }

    let checksum = r.checksum();
    let mut r = r.into_inner();
    let mut tail = [0u8; 8];
    r.read_exact(&mut tail)?;
    if &tail != TAIL {
        return Err(invalid("bad tail magic"));
    }
    if r.read_u32::<BigEndian>()? != checksum {
        return Err(invalid("file checksum mismatch"));
    }
    if r.read(&mut [0u8; 1])? != 0 {
        return Err(invalid("trailing bytes after tail"));
    }

    if nodes.len() as u64 != node_count || sessions.len() as u64 != session_count {
        return Err(invalid("record count does not match header"));
    }
    let next_session_id = next_session_id.ok_or_else(|| invalid("missing meta batch"))?;

    let tree = DataTree::from_parts(nodes, sessions, next_session_id, last_zxid).map_err(invalid)?;
    for (path, num_children) in stored_children {
        let rebuilt = tree.stat(&path).map(|s| s.num_children);
        if rebuilt != Some(num_children) {
            return Err(invalid(format!("{} has inconsistent child count", path)));
        }
    }
    Ok(tree)
}
