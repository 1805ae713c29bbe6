use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use crate::safe_converter::SafeCast;

/// A reserved `u16` length field in a write buffer. The length is unknown when the body starts,
///  so the field is written as a placeholder and patched by [LengthPrefix::finalize_length]
///  after the body is complete.
#[must_use]
pub struct LengthPrefix {
    offset: usize,
}

impl LengthPrefix {
    pub const SERIALIZED_LEN: usize = size_of::<u16>();

    pub fn reserve(buf: &mut BytesMut) -> LengthPrefix {
        let offset = buf.len();
        buf.put_u16(0);
        LengthPrefix { offset }
    }

    /// Patch the body length, i.e. everything written after the reserved field, into the
    ///  reserved field. Fails if the body does not fit into a `u16`.
    pub fn finalize_length(self, buf: &mut BytesMut) -> anyhow::Result<()> {
        let body_len = buf.len() - self.offset - Self::SERIALIZED_LEN;
        let body_len: u16 = body_len.try_into()
            .map_err(|_| anyhow!("body of {} bytes exceeds the maximum framed length of {}", body_len, u16::MAX))?;

        buf[self.offset..self.offset + Self::SERIALIZED_LEN].copy_from_slice(&body_len.to_be_bytes());
        Ok(())
    }
}

/// Write a length-prefixed body
pub fn put_framed(buf: &mut BytesMut, ser_body: impl FnOnce(&mut BytesMut)) -> anyhow::Result<()> {
    let prefix = LengthPrefix::reserve(buf);
    ser_body(buf);
    prefix.finalize_length(buf)
}

/// Read a length prefix and return the body it declares, advancing the cursor past the body.
///  Reads from the returned slice can not go beyond the declared length.
pub fn try_get_frame<'a>(buf: &mut &'a [u8]) -> anyhow::Result<&'a [u8]> {
    let len: usize = buf.try_get_u16()?.safe_cast();
    if buf.remaining() < len {
        bail!("declared length {} exceeds remaining buffer of {} bytes", len, buf.remaining());
    }

    let (body, rest) = buf.split_at(len);
    *buf = rest;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_finalize_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(99);
        let prefix = LengthPrefix::reserve(&mut buf);
        buf.put_slice(&[1, 2, 3]);
        prefix.finalize_length(&mut buf).unwrap();

        assert_eq!(buf.as_ref(), &[99, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_finalize_length_nested() {
        let mut buf = BytesMut::new();
        let outer = LengthPrefix::reserve(&mut buf);
        buf.put_u8(7);
        put_framed(&mut buf, |b| b.put_slice(&[8, 9])).unwrap();
        outer.finalize_length(&mut buf).unwrap();

        assert_eq!(buf.as_ref(), &[0, 5, 7, 0, 2, 8, 9]);
    }

    #[test]
    fn test_finalize_length_overflow() {
        let mut buf = BytesMut::new();
        let prefix = LengthPrefix::reserve(&mut buf);
        buf.put_slice(&vec![0u8; u16::MAX as usize + 1]);
        assert!(prefix.finalize_length(&mut buf).is_err());
    }

    #[rstest]
    #[case::empty_body(vec![0,0, 5], Some(vec![]), vec![5])]
    #[case::exact(vec![0,2, 1,2], Some(vec![1,2]), vec![])]
    #[case::trailing(vec![0,1, 1,2,3], Some(vec![1]), vec![2,3])]
    #[case::truncated_body(vec![0,3, 1,2], None, vec![])]
    #[case::truncated_len(vec![0], None, vec![])]
    fn test_try_get_frame(#[case] buf: Vec<u8>, #[case] expected_body: Option<Vec<u8>>, #[case] expected_rest: Vec<u8>) {
        let mut parse_buf: &[u8] = &buf;
        match try_get_frame(&mut parse_buf) {
            Ok(body) => {
                assert_eq!(Some(body.to_vec()), expected_body);
                assert_eq!(parse_buf, expected_rest.as_slice());
            }
            Err(_) => assert!(expected_body.is_none()),
        }
    }

    #[test]
    fn test_read_beyond_frame_fails() {
        let buf = vec![0,2, 1,2, 3,4];
        let mut parse_buf: &[u8] = &buf;
        let mut body = try_get_frame(&mut parse_buf).unwrap();
        assert_eq!(body.try_get_u16().unwrap(), 0x0102);
        assert!(body.try_get_u8().is_err());
    }
}
