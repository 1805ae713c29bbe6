//! The contract between the reliability layer and the application's payload types.
//!
//! A protocol defines a closed set of payload kinds per direction (see [PayloadKind]), each
//!  with reliability flags that describe the protocol behavior of that kind of message. The
//!  flags are fixed per kind rather than per instance.
//!
//! Payloads are placed into [Slot]s keyed by their kind. A scalar slot holds a single value
//!  that is overwritten by later values, a collection slot holds an ordered list of values
//!  that later values are appended to.

pub mod addon;
pub mod map;
pub mod slot;

use std::fmt::Debug;
use std::hash::Hash;
use anyhow::anyhow;
use bytes::BytesMut;

pub use addon::{AddonKey, AddonMap, AddonPayload, ADDON_PAYLOAD_ID};
pub use map::{put_payload, PayloadMap};
pub use slot::Slot;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadFlags {
    /// Reliable payloads are re-embedded in later packets if the packet carrying them is lost
    pub is_reliable: bool,
    /// Reliable payloads with this flag are not re-sent if a newer value for the same kind was
    ///  sent after them: the newer value supersedes the lost one
    pub drop_reliable_data_if_newer_exists: bool,
    /// Collection kinds batch many values in one slot; they are appended rather than replaced
    pub is_collection: bool,
}

impl PayloadFlags {
    pub const UNRELIABLE: PayloadFlags = PayloadFlags {
        is_reliable: false,
        drop_reliable_data_if_newer_exists: false,
        is_collection: false,
    };

    pub const RELIABLE: PayloadFlags = PayloadFlags {
        is_reliable: true,
        drop_reliable_data_if_newer_exists: false,
        is_collection: false,
    };

    /// reliable, but only the latest value matters
    pub const RELIABLE_LATEST: PayloadFlags = PayloadFlags {
        is_reliable: true,
        drop_reliable_data_if_newer_exists: true,
        is_collection: false,
    };

    pub const fn collection(self) -> PayloadFlags {
        PayloadFlags {
            is_collection: true,
            ..self
        }
    }
}


/// The closed set of payload kinds for one direction of a protocol. Each kind has a fixed
///  one-byte id on the wire, typically derived with `num_enum`.
pub trait PayloadKind: Copy + Eq + Ord + Hash + Debug + Into<u8> + TryFrom<u8> + Send + Sync + 'static {
    /// All kinds of the protocol, in wire order. This must contain every kind exactly once,
    ///  and no kind may use [ADDON_PAYLOAD_ID] as its id.
    const ALL: &'static [Self];

    fn flags(self) -> PayloadFlags;

    fn id(self) -> u8 {
        self.into()
    }

    fn from_id(id: u8) -> anyhow::Result<Self> {
        Self::try_from(id)
            .map_err(|_| anyhow!("unknown payload id {}", id))
    }
}


/// A typed unit of application data
pub trait Payload: Clone + Debug + Send + Sync + 'static {
    type Kind: PayloadKind;

    fn kind(&self) -> Self::Kind;

    fn ser(&self, buf: &mut BytesMut);

    /// Decode a payload of the given kind. The buffer is bounded by the payload's length
    ///  prefix, so reading past its end fails rather than reading into the next payload.
    fn deser(kind: Self::Kind, buf: &mut &[u8]) -> anyhow::Result<Self>;

    fn is_reliable(&self) -> bool {
        self.kind().flags().is_reliable
    }

    fn drop_reliable_data_if_newer_exists(&self) -> bool {
        self.kind().flags().drop_reliable_data_if_newer_exists
    }
}


#[cfg(test)]
pub(crate) mod test_payload {
    //! a minimal protocol for testing payload handling independently of the real protocol

    use super::*;
    use bytes::BufMut;
    use num_enum::{IntoPrimitive, TryFromPrimitive};

    #[repr(u8)]
    #[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
    pub enum TestKind {
        Unreliable = 1,
        Reliable = 2,
        Latest = 3,
        Events = 4,
    }

    impl PayloadKind for TestKind {
        const ALL: &'static [Self] = &[TestKind::Unreliable, TestKind::Reliable, TestKind::Latest, TestKind::Events];

        fn flags(self) -> PayloadFlags {
            match self {
                TestKind::Unreliable => PayloadFlags::UNRELIABLE,
                TestKind::Reliable => PayloadFlags::RELIABLE,
                TestKind::Latest => PayloadFlags::RELIABLE_LATEST,
                TestKind::Events => PayloadFlags::RELIABLE.collection(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TestPayload {
        pub kind: TestKind,
        pub value: u32,
    }

    impl TestPayload {
        pub fn new(kind: TestKind, value: u32) -> TestPayload {
            TestPayload { kind, value }
        }
    }

    impl Payload for TestPayload {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            self.kind
        }

        fn ser(&self, buf: &mut BytesMut) {
            buf.put_u32(self.value);
        }

        fn deser(kind: TestKind, buf: &mut &[u8]) -> anyhow::Result<Self> {
            use bytes::Buf;
            Ok(TestPayload { kind, value: buf.try_get_u32()? })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_payload::*;
    use rstest::rstest;

    #[rstest]
    #[case::unreliable(TestKind::Unreliable, false, false, false)]
    #[case::reliable(TestKind::Reliable, true, false, false)]
    #[case::latest(TestKind::Latest, true, true, false)]
    #[case::events(TestKind::Events, true, false, true)]
    fn test_flags_per_kind(#[case] kind: TestKind, #[case] reliable: bool, #[case] drop_if_newer: bool, #[case] collection: bool) {
        let payload = TestPayload::new(kind, 1);
        assert_eq!(payload.is_reliable(), reliable);
        assert_eq!(payload.drop_reliable_data_if_newer_exists(), drop_if_newer);
        assert_eq!(kind.flags().is_collection, collection);
    }

    #[rstest]
    #[case::known(2, Some(TestKind::Reliable))]
    #[case::unknown(9, None)]
    #[case::addon(ADDON_PAYLOAD_ID, None)]
    fn test_from_id(#[case] id: u8, #[case] expected: Option<TestKind>) {
        assert_eq!(TestKind::from_id(id).ok(), expected);
    }

    #[test]
    fn test_id_round_trip() {
        for &kind in TestKind::ALL {
            assert_eq!(TestKind::from_id(kind.id()).unwrap(), kind);
        }
    }
}
