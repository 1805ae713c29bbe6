//! Primitive read / write support on top of the `bytes` crate, and the length-prefix framing
//!  convention that all variable-length wire structures use.
//!
//! Reading is cursor based on `&[u8]` (or any other `Buf`), writing appends to a `BytesMut`.
//!  All read operations are fallible and never read beyond the end of the buffer, so a
//!  truncated or malformed datagram surfaces as an `Err` that callers treat as "discard this
//!  datagram".

pub mod buf_ext;
pub mod frame;

pub use buf_ext::{BufExt, BufMutExt, Vec2, Vec3};
pub use frame::{put_framed, try_get_frame, LengthPrefix};
