use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

use crate::proto::{OpCode, Request};
use crate::Zxid;

/// One committed operation, exactly as it is replicated and stored.
///
/// `time` is the leader's wall clock when the entry was proposed, in milliseconds since the
/// epoch. It becomes `ctime`/`mtime` on apply, so replay never consults the local clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of the entry in the global order.
    pub zxid: Zxid,
    /// The session that issued the request, or 0.
    pub session_id: i64,
    /// Leader-assigned timestamp.
    pub time: i64,
    /// The operation itself.
    pub request: Request,
}

impl LogEntry {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.write_u64::<BigEndian>(self.zxid.raw())?;
        buf.write_i64::<BigEndian>(self.session_id)?;
        buf.write_i64::<BigEndian>(self.time)?;
        buf.write_i32::<BigEndian>(self.request.opcode() as i32)?;
        self.request.serialize_into(buf)
    }

    pub(crate) fn decode(mut buf: &[u8]) -> io::Result<Self> {
        let zxid = Zxid::from_raw(buf.read_u64::<BigEndian>()?);
        let session_id = buf.read_i64::<BigEndian>()?;
        let time = buf.read_i64::<BigEndian>()?;
        let opcode = OpCode::from_code(buf.read_i32::<BigEndian>()?)?;
        let request = Request::parse(opcode, &mut buf)?;
        if !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after entry {}", buf.len(), zxid),
            ));
        }
        Ok(LogEntry {
            zxid,
            session_id,
            time,
            request,
        })
    }
}
