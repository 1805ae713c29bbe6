use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;
use crate::chunk::messages::{SliceAckMessage, SliceMessage};
use crate::chunk::sink::{SliceAckSink, SliceSink};
use crate::payload::{put_payload, Payload, PayloadMap};

/// Sink for chunk traffic that travels inside update channel packets: slices and slice acks
///  are buffered until the next outgoing packet is assembled.
#[derive(Default)]
pub struct ChunkOutbox {
    slices: RwLock<Vec<SliceMessage>>,
    /// acks are cumulative, so only the latest one is relevant
    latest_ack: RwLock<Option<SliceAckMessage>>,
}

#[async_trait]
impl SliceSink for ChunkOutbox {
    async fn send_slice(&self, slice: SliceMessage) {
        self.slices.write().await
            .push(slice);
    }
}

#[async_trait]
impl SliceAckSink for ChunkOutbox {
    async fn send_slice_ack(&self, ack: SliceAckMessage) {
        if let Some(replaced) = self.latest_ack.write().await.replace(ack) {
            trace!("slice ack for chunk {} superseded before it was sent", replaced.chunk_id);
        }
    }
}

impl ChunkOutbox {
    pub fn new() -> ChunkOutbox {
        ChunkOutbox::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.slices.read().await.is_empty() && self.latest_ack.read().await.is_none()
    }

    /// Moves all buffered messages into the live payloads of the next outgoing packet
    pub async fn drain_into<P>(&self, live: &mut PayloadMap<P>)
    where P: Payload + From<SliceMessage> + From<SliceAckMessage>
    {
        for slice in std::mem::take(&mut *self.slices.write().await) {
            put_payload(live, P::from(slice));
        }
        if let Some(ack) = self.latest_ack.write().await.take() {
            put_payload(live, P::from(ack));
        }
    }
}
