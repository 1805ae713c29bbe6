use anyhow::bail;
use bit_set::BitSet;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::safe_converter::SafeCast;

/// One fragment of a chunk.
///
/// ```ascii
/// 0: chunk id (u8)
/// 1: slice id (u8)
/// 2: number of slices in the chunk (u8)
/// 3: slice data - the rest of the surrounding frame
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceMessage {
    pub chunk_id: u8,
    pub slice_id: u8,
    pub num_slices: u8,
    pub data: Bytes,
}

impl SliceMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.chunk_id);
        buf.put_u8(self.slice_id);
        buf.put_u8(self.num_slices);
        buf.put_slice(&self.data);
    }

    /// consumes the entire buffer
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SliceMessage> {
        let chunk_id = buf.try_get_u8()?;
        let slice_id = buf.try_get_u8()?;
        let num_slices = buf.try_get_u8()?;
        let data_len = buf.remaining();
        let data = buf.copy_to_bytes(data_len);
        Ok(SliceMessage {
            chunk_id,
            slice_id,
            num_slices,
            data,
        })
    }
}

/// The receiver's complete acknowledgement state for a chunk.
///
/// ```ascii
/// 0: chunk id (u8)
/// 1: number of slices minus one (u8)
/// 2: acked slices as a bit set, one bit per slice, LSB first
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceAckMessage {
    pub chunk_id: u8,
    pub num_slices_minus_one: u8,
    pub acked: BitSet,
}

impl SliceAckMessage {
    pub fn num_slices(&self) -> usize {
        self.num_slices_minus_one.safe_cast() + 1
    }

    fn bit_set_len(num_slices: usize) -> usize {
        num_slices.div_ceil(8)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.chunk_id);
        buf.put_u8(self.num_slices_minus_one);

        let mut bits = vec![0u8; Self::bit_set_len(self.num_slices())];
        for slice_id in self.acked.iter().filter(|&i| i < self.num_slices()) {
            bits[slice_id / 8] |= 1 << (slice_id % 8);
        }
        buf.put_slice(&bits);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SliceAckMessage> {
        let chunk_id = buf.try_get_u8()?;
        let num_slices_minus_one = buf.try_get_u8()?;
        let num_slices = num_slices_minus_one.safe_cast() + 1;

        let bit_set_len = Self::bit_set_len(num_slices);
        if buf.remaining() < bit_set_len {
            bail!("slice ack for {} slices requires {} bytes of bit set, only {} remaining", num_slices, bit_set_len, buf.remaining());
        }

        let mut acked = BitSet::with_capacity(num_slices);
        for byte_idx in 0..bit_set_len {
            let bits = buf.get_u8();
            for bit in 0..8 {
                let slice_id = byte_idx * 8 + bit;
                if slice_id < num_slices && bits & (1 << bit) != 0 {
                    acked.insert(slice_id);
                }
            }
        }

        Ok(SliceAckMessage {
            chunk_id,
            num_slices_minus_one,
            acked,
        })
    }
}
