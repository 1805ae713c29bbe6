//! Reliability layer for a real-time client / server game protocol on top of an unreliable
//!  datagram transport.
//!
//! There are two mechanisms:
//! * The *update channel* ([channel]) sends one packet per tick and direction. Each packet
//!   acknowledges the peer's packets, and reliable payloads of packets that turn out to be
//!   lost are re-embedded into later packets rather than retransmitted on their own.
//! * *Chunk transfer* ([chunk]) moves payloads that are too big for a single packet as a
//!   sequence of individually acknowledged slices.
//!
//! Both are agnostic of the actual socket I/O: the update channel works on byte buffers, and
//!  chunk transfer sends through injected sinks.

pub mod channel;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod payload;
pub mod protocol;
pub mod safe_converter;
