//! Chunk transfer: payloads that are too big for the update channel's per-tick slots are
//!  split into slices of at most `max_slice_size` bytes, and each slice is acknowledged
//!  individually. The sender re-sends unacknowledged slices on a timer, so slice and slice
//!  ack messages can travel unreliably.
//!
//! Only one chunk per direction is in flight at any time. Chunk ids are a `u8` that wraps
//!  around, and the receiver only accepts the chunk id it expects next.

pub mod messages;
pub mod outbox;
pub mod receiver;
pub mod sender;
pub mod sink;

pub use messages::{SliceAckMessage, SliceMessage};
pub use outbox::ChunkOutbox;
pub use receiver::ChunkReceiver;
pub use sender::ChunkSender;
pub use sink::{ChunkHandler, SliceAckSink, SliceSink};

use crate::safe_converter::PrecheckedCast;

/// The number of slices for a payload of the given length. An empty payload is transferred
///  as a single empty slice.
///
/// NB: The caller must ensure that the payload does not exceed the maximum chunk size
pub(crate) fn num_slices_for(len: usize, max_slice_size: usize) -> u8 {
    len.div_ceil(max_slice_size).max(1).prechecked_cast()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(0, 512, 1)]
    #[case::one_byte(1, 512, 1)]
    #[case::exact(512, 512, 1)]
    #[case::one_more(513, 512, 2)]
    #[case::scenario(1300, 512, 3)]
    #[case::max(255 * 1024, 1024, 255)]
    fn test_num_slices_for(#[case] len: usize, #[case] max_slice_size: usize, #[case] expected: u8) {
        assert_eq!(num_slices_for(len, max_slice_size), expected);
    }
}
