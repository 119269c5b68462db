use super::ZkError;
use crate::Stat;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

/// The outcome of applying a [`Request`](super::Request) that did not fail as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// The node's metadata after the operation.
    Stat(Stat),
    /// A path, such as the one actually created.
    String(String),
    /// No payload.
    Empty,
    /// Per-member results of a `multi` batch.
    Multi(Vec<Result<Response, ZkError>>),
    /// A freshly opened session.
    Session {
        /// The id allocated to the session.
        session_id: i64,
    },
}

pub trait ReadFrom: Sized {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Self>;
}

impl ReadFrom for Stat {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Stat> {
        Ok(Stat {
            czxid: read.read_i64::<BigEndian>()?,
            mzxid: read.read_i64::<BigEndian>()?,
            ctime: read.read_i64::<BigEndian>()?,
            mtime: read.read_i64::<BigEndian>()?,
            version: read.read_i32::<BigEndian>()?,
            cversion: read.read_i32::<BigEndian>()?,
            aversion: read.read_i32::<BigEndian>()?,
            ephemeral_owner: read.read_i64::<BigEndian>()?,
            data_length: read.read_i32::<BigEndian>()?,
            num_children: read.read_i32::<BigEndian>()?,
            pzxid: read.read_i64::<BigEndian>()?,
        })
    }
}

pub trait BufferReader: Read {
    fn read_buffer(&mut self) -> io::Result<Vec<u8>>;
}

impl<R: Read> BufferReader for R {
    fn read_buffer(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_i32::<BigEndian>()?;
        let len = if len < 0 { 0 } else { len as usize };
        let mut buf = Vec::new();
        // a corrupt length must not turn into a huge up-front allocation
        self.take(len as u64).read_to_end(&mut buf)?;
        if buf.len() == len {
            Ok(buf)
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read_buffer failed",
            ))
        }
    }
}

pub trait StringReader: Read {
    fn read_string(&mut self) -> io::Result<String>;
}

impl<R: Read> StringReader for R {
    fn read_string(&mut self) -> io::Result<String> {
        let raw = self.read_buffer()?;
        String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
