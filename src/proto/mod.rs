mod error;
mod request;
mod response;

pub use self::error::ZkError;
pub use self::request::{Request, WriteTo};
pub use self::response::{ReadFrom, Response};

pub(crate) use self::request::OpCode;
pub(crate) use self::response::{BufferReader, StringReader};
