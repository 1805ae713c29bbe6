//! The update channel: one packet per tick and direction, carrying the live payloads for that
//!  tick plus re-embedded reliable payloads from earlier packets that were lost.
//!
//! There is no handshake-based retransmission. Each packet acknowledges the peer's latest
//!  sequence number plus a 64 bit field of older ones, and the sender derives loss from that.
//!  Reliable data of a lost packet is put into a *resend bucket* of a later packet, keyed by
//!  the lost packet's sequence number, so the receiver can recognize and drop data it already
//!  applied.
//!
//! Packet format (all inside a `u16` length prefix):
//!
//! ```ascii
//! 0: sequence number (u16)
//! 2: ack (u16)
//! 4: ack field (u64) - bit i: 'ack - i' was received
//! 12: live payloads (id-keyed payload map, live addon payloads under id 0xFF)
//! *: number of resend buckets (u16)
//!    per bucket: origin sequence number (u16), id-keyed payload map
//! *: number of addon resend buckets (u16)
//!    per bucket: origin sequence number (u16), addon map
//! ```

pub mod ack_field;
pub mod packet;
pub mod sequence;
pub mod update_channel;

pub use ack_field::AckField;
pub use packet::{ChannelPacket, EffectiveData, SlotKey};
pub use sequence::SequenceNumber;
pub use update_channel::UpdateChannel;

/// The number of sequence numbers covered by an ack and its ack field
pub const ACK_WINDOW_WIDTH: u16 = 64;
