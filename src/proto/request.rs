use super::response::{BufferReader, StringReader};
use crate::{CreateMode, Stat};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A mutating operation, as ordered by consensus and stored in the transaction log.
///
/// Everything the applier needs to reproduce the outcome travels inside the request or the
/// enclosing [`LogEntry`](crate::LogEntry). Sequential suffixes and session ids are derived from
/// replicated state, never from the local replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Create a node.
    Create {
        /// Requested path. For sequential modes the suffix is appended on apply.
        path: String,
        /// Initial payload.
        data: Vec<u8>,
        /// How the node is created.
        mode: CreateMode,
    },
    /// Delete a node. A `version` of -1 matches any version.
    Delete {
        /// Target path.
        path: String,
        /// Expected data version, or -1.
        version: i32,
    },
    /// Replace the payload of a node. A `version` of -1 matches any version.
    SetData {
        /// Target path.
        path: String,
        /// New payload.
        data: Vec<u8>,
        /// Expected data version, or -1.
        version: i32,
    },
    /// Assert that a node exists with the given version. Only meaningful inside a `multi`.
    Check {
        /// Target path.
        path: String,
        /// Expected data version, or -1.
        version: i32,
    },
    /// Apply a batch of operations atomically.
    Multi(Vec<Request>),
    /// Open a new session. The id is allocated by the applier.
    CreateSession {
        /// Negotiated session timeout in milliseconds.
        timeout: i32,
    },
    /// End the session carried by the enclosing log entry and drop its ephemeral nodes.
    CloseSession,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(i32)]
pub(crate) enum OpCode {
    Create = 1,
    Delete = 2,
    SetData = 5,
    Check = 13,
    Multi = 14,
    CreateSession = -10,
    CloseSession = -11,
}

impl OpCode {
    pub(crate) fn from_code(code: i32) -> io::Result<Self> {
        Ok(match code {
            1 => OpCode::Create,
            2 => OpCode::Delete,
            5 => OpCode::SetData,
            13 => OpCode::Check,
            14 => OpCode::Multi,
            -10 => OpCode::CreateSession,
            -11 => OpCode::CloseSession,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown opcode {}", code),
                ))
            }
        })
    }
}

pub(super) enum MultiHeader {
    NextOk(OpCode),
    Done,
}

pub trait WriteTo {
    fn write_to<W: Write>(&self, writer: W) -> io::Result<()>;
}

impl WriteTo for MultiHeader {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        match *self {
            MultiHeader::NextOk(opcode) => {
                writer.write_i32::<BigEndian>(opcode as i32)?;
                writer.write_u8(false as u8)?;
                writer.write_i32::<BigEndian>(-1)
            }
            MultiHeader::Done => {
                writer.write_i32::<BigEndian>(-1)?;
                writer.write_u8(true as u8)?;
                writer.write_i32::<BigEndian>(-1)
            }
        }
    }
}

impl MultiHeader {
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let opcode = reader.read_i32::<BigEndian>()?;
        let done = reader.read_u8()? != 0;
        let err = reader.read_i32::<BigEndian>()?;
        if done {
            Ok(MultiHeader::Done)
        } else if opcode == -1 {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected multi error header (code {})", err),
            ))
        } else {
            Ok(MultiHeader::NextOk(OpCode::from_code(opcode)?))
        }
    }
}

impl WriteTo for str {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.len() as i32)?;
        writer.write_all(self.as_ref())
    }
}

impl WriteTo for [u8] {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.len() as i32)?;
        writer.write_all(self.as_ref())
    }
}

impl WriteTo for Stat {
    fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i64::<BigEndian>(self.czxid)?;
        writer.write_i64::<BigEndian>(self.mzxid)?;
        writer.write_i64::<BigEndian>(self.ctime)?;
        writer.write_i64::<BigEndian>(self.mtime)?;
        writer.write_i32::<BigEndian>(self.version)?;
        writer.write_i32::<BigEndian>(self.cversion)?;
        writer.write_i32::<BigEndian>(self.aversion)?;
        writer.write_i64::<BigEndian>(self.ephemeral_owner)?;
        writer.write_i32::<BigEndian>(self.data_length)?;
        writer.write_i32::<BigEndian>(self.num_children)?;
        writer.write_i64::<BigEndian>(self.pzxid)
    }
}

impl Request {
    pub(crate) fn serialize_into<W: Write>(&self, buffer: &mut W) -> Result<(), io::Error> {
        match *self {
            Request::Delete { ref path, version } | Request::Check { ref path, version } => {
                path.write_to(&mut *buffer)?;
                buffer.write_i32::<BigEndian>(version)?;
            }
            Request::SetData {
                ref path,
                ref data,
                version,
            } => {
                path.write_to(&mut *buffer)?;
                data.write_to(&mut *buffer)?;
                buffer.write_i32::<BigEndian>(version)?;
            }
            Request::Create {
                ref path,
                ref data,
                mode,
            } => {
                path.write_to(&mut *buffer)?;
                data.write_to(&mut *buffer)?;
                buffer.write_i32::<BigEndian>(mode as i32)?;
            }
            Request::Multi(ref requests) => {
                for r in requests {
                    MultiHeader::NextOk(r.opcode()).write_to(&mut *buffer)?;
                    r.serialize_into(&mut *buffer)?;
                }
                MultiHeader::Done.write_to(&mut *buffer)?;
            }
            Request::CreateSession { timeout } => {
                buffer.write_i32::<BigEndian>(timeout)?;
            }
            Request::CloseSession => {}
        }
        Ok(())
    }

    pub(crate) fn parse<R: Read>(opcode: OpCode, reader: &mut R) -> io::Result<Self> {
        Ok(match opcode {
            OpCode::Create => {
                let path = reader.read_string()?;
                let data = reader.read_buffer()?;
                let code = reader.read_i32::<BigEndian>()?;
                let mode = CreateMode::from_code(code).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown create mode {}", code),
                    )
                })?;
                Request::Create { path, data, mode }
            }
            OpCode::Delete => Request::Delete {
                path: reader.read_string()?,
                version: reader.read_i32::<BigEndian>()?,
            },
            OpCode::SetData => Request::SetData {
                path: reader.read_string()?,
                data: reader.read_buffer()?,
                version: reader.read_i32::<BigEndian>()?,
            },
            OpCode::Check => Request::Check {
                path: reader.read_string()?,
                version: reader.read_i32::<BigEndian>()?,
            },
            OpCode::Multi => {
                let mut requests = Vec::new();
                loop {
                    match MultiHeader::read_from(reader)? {
                        MultiHeader::Done => break,
                        MultiHeader::NextOk(OpCode::Multi) => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "nested multi request",
                            ))
                        }
                        MultiHeader::NextOk(op) => requests.push(Request::parse(op, reader)?),
                    }
                }
                Request::Multi(requests)
            }
            OpCode::CreateSession => Request::CreateSession {
                timeout: reader.read_i32::<BigEndian>()?,
            },
            OpCode::CloseSession => Request::CloseSession,
        })
    }

    pub(crate) fn opcode(&self) -> OpCode {
        match *self {
            Request::Delete { .. } => OpCode::Delete,
            Request::Create { .. } => OpCode::Create,
            Request::SetData { .. } => OpCode::SetData,
            Request::Multi { .. } => OpCode::Multi,
            Request::Check { .. } => OpCode::Check,
            Request::CreateSession { .. } => OpCode::CreateSession,
            Request::CloseSession => OpCode::CloseSession,
        }
    }
}
