use std::fmt::{Debug, Formatter};
use crate::channel::sequence::SequenceNumber;
use crate::channel::ACK_WINDOW_WIDTH;

/// Bit `i` is set iff sequence number `ack - i` was received, where `ack` is the sequence number
///  transmitted alongside the field. Offsets outside the ack window can not be represented.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct AckField(u64);

impl Debug for AckField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AckField({:#018x})", self.0)
    }
}

impl AckField {
    pub const EMPTY: AckField = AckField(0);

    pub fn from_raw(bits: u64) -> AckField {
        AckField(bits)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn from_offsets(offsets: impl IntoIterator<Item = u16>) -> AckField {
        let mut result = AckField::EMPTY;
        for offset in offsets {
            result.set(offset);
        }
        result
    }

    /// offsets outside the ack window are silently ignored
    pub fn set(&mut self, offset: u16) {
        if offset < ACK_WINDOW_WIDTH {
            self.0 |= 1 << offset;
        }
    }

    pub fn is_set(&self, offset: u16) -> bool {
        offset < ACK_WINDOW_WIDTH && self.0 & (1 << offset) != 0
    }

    pub fn offsets(&self) -> impl Iterator<Item = u16> + '_ {
        (0..ACK_WINDOW_WIDTH).filter(|&offset| self.is_set(offset))
    }

    /// the field for an ack that moved `by` sequence numbers ahead
    fn shifted(&self, by: u16) -> AckField {
        if by >= ACK_WINDOW_WIDTH {
            AckField::EMPTY
        }
        else {
            AckField(self.0 << by)
        }
    }
}

/// Keeps track of the sequence numbers received from the peer, providing the `ack` and
///  `ack field` values for outgoing packets
#[derive(Debug, Default)]
pub struct ReceiveHistory {
    latest: Option<SequenceNumber>,
    field: AckField,
}

impl ReceiveHistory {
    pub fn on_received(&mut self, sequence: SequenceNumber) {
        match self.latest {
            None => {
                self.latest = Some(sequence);
                self.field = AckField::from_offsets([0]);
            }
            Some(latest) if sequence.is_newer_than(latest) => {
                self.field = self.field.shifted(sequence.distance_from(latest));
                self.field.set(0);
                self.latest = Some(sequence);
            }
            Some(latest) => {
                // reordered or duplicate: this is a no-op if it is outside the window
                self.field.set(latest.distance_from(sequence));
            }
        }
    }

    /// The values to put into the next outgoing packet. Before anything was received, this
    ///  is sequence number 0 with an empty field, i.e. nothing is acknowledged.
    pub fn ack(&self) -> (SequenceNumber, AckField) {
        match self.latest {
            Some(latest) => (latest, self.field),
            None => (SequenceNumber::ZERO, AckField::EMPTY),
        }
    }
}
