use std::fmt::{Display, Formatter};

/// Per-direction packet sequence number. Sequence numbers wrap around at 2^16, and ordering
///  between them is defined relative to each other: `a` is newer than `b` if it is less than
///  half the number space ahead of `b`.
///
/// NB: The derived `Ord` is the ordering of the raw values, which is useful for map keys but
///      does *not* reflect age. Use [SequenceNumber::is_newer_than] for that.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SequenceNumber(u16);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    const HALF_RANGE: u16 = 1 << 15;

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1))
    }

    pub fn is_newer_than(&self, other: SequenceNumber) -> bool {
        let diff = self.0.wrapping_sub(other.0);
        diff != 0 && diff < Self::HALF_RANGE
    }

    /// The number of steps from `older` to `self`, assuming that `self` is not older
    pub fn distance_from(&self, older: SequenceNumber) -> u16 {
        self.0.wrapping_sub(older.0)
    }

    pub fn minus(&self, offset: u16) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_sub(offset))
    }

    /// Age comparison for sorting sequence numbers that are known to be close to each other,
    ///  oldest first
    pub fn cmp_age(&self, other: &SequenceNumber) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        if self == other {
            Ordering::Equal
        }
        else if self.is_newer_than(*other) {
            Ordering::Greater
        }
        else {
            Ordering::Less
        }
    }
}
