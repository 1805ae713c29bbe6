use std::sync::Arc;
use bit_set::BitSet;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use crate::chunk::messages::{SliceAckMessage, SliceMessage};
use crate::chunk::sink::{ChunkHandler, SliceAckSink};
use crate::config::ChunkConfig;
use crate::safe_converter::SafeCast;

struct ReceiverInner {
    config: Arc<ChunkConfig>,
    expected_chunk_id: u8,
    /// learned from the first slice of a chunk
    num_slices: Option<u8>,
    received: BitSet,
    reassembly_buf: Vec<u8>,
    /// known once the highest-indexed slice arrived
    total_len: Option<usize>,
    /// (chunk id, number of slices) of the most recently completed chunk
    last_completed: Option<(u8, u8)>,
}

impl ReceiverInner {
    fn is_valid(&self, slice: &SliceMessage) -> bool {
        let num_slices: usize = slice.num_slices.safe_cast();
        let slice_id: usize = slice.slice_id.safe_cast();

        if num_slices == 0 || num_slices > self.config.max_slices_per_chunk {
            debug!("slice with invalid number of slices {} - ignoring", num_slices);
            return false;
        }
        if slice_id >= num_slices {
            debug!("slice id {} out of range for {} slices - ignoring", slice_id, num_slices);
            return false;
        }
        if slice.data.len() > self.config.max_slice_size {
            debug!("slice with {} bytes exceeds the maximum slice size of {} - ignoring", slice.data.len(), self.config.max_slice_size);
            return false;
        }
        if slice_id + 1 < num_slices && slice.data.len() != self.config.max_slice_size {
            debug!("non-final slice {} with {} bytes instead of {} - ignoring", slice_id, slice.data.len(), self.config.max_slice_size);
            return false;
        }
        true
    }

    /// returns the ack to send (if any) and the completed chunk (if any)
    fn on_slice(&mut self, slice: SliceMessage) -> (Option<SliceAckMessage>, Option<Bytes>) {
        if !self.is_valid(&slice) {
            return (None, None);
        }

        if slice.chunk_id != self.expected_chunk_id {
            if self.last_completed == Some((slice.chunk_id, slice.num_slices)) {
                trace!("slice {} of already completed chunk {} - re-sending full ack", slice.slice_id, slice.chunk_id);
                let num_slices: usize = slice.num_slices.safe_cast();
                return (Some(Self::ack_message(slice.chunk_id, slice.num_slices, (0..num_slices).collect())), None);
            }
            debug!("slice for chunk {} while expecting chunk {} - ignoring", slice.chunk_id, self.expected_chunk_id);
            return (None, None);
        }

        let num_slices: usize = slice.num_slices.safe_cast();
        match self.num_slices {
            None => {
                self.num_slices = Some(slice.num_slices);
                self.reassembly_buf.resize(num_slices * self.config.max_slice_size, 0);
            }
            Some(n) if n != slice.num_slices => {
                debug!("slice of chunk {} reports {} slices, expected {} - ignoring", slice.chunk_id, slice.num_slices, n);
                return (None, None);
            }
            Some(_) => {}
        }

        let slice_id: usize = slice.slice_id.safe_cast();
        if self.received.contains(slice_id) {
            trace!("duplicate slice {} of chunk {}", slice_id, slice.chunk_id);
        }
        else {
            let offset = slice_id * self.config.max_slice_size;
            self.reassembly_buf[offset..offset + slice.data.len()].copy_from_slice(&slice.data);
            self.received.insert(slice_id);

            if slice.slice_id + 1 == slice.num_slices {
                self.total_len = Some(offset + slice.data.len());
            }
        }

        let ack = Self::ack_message(slice.chunk_id, slice.num_slices, self.received.clone());

        if self.received.len() < num_slices {
            return (Some(ack), None);
        }

        let total_len = self.total_len.unwrap_or(self.reassembly_buf.len());
        self.reassembly_buf.truncate(total_len);
        let chunk = Bytes::from(std::mem::take(&mut self.reassembly_buf));

        debug!("received chunk {} with {} bytes", slice.chunk_id, chunk.len());
        self.last_completed = Some((slice.chunk_id, slice.num_slices));
        self.expected_chunk_id = self.expected_chunk_id.wrapping_add(1);
        self.num_slices = None;
        self.received.clear();
        self.total_len = None;

        (Some(ack), Some(chunk))
    }

    fn ack_message(chunk_id: u8, num_slices: u8, acked: BitSet) -> SliceAckMessage {
        SliceAckMessage {
            chunk_id,
            num_slices_minus_one: num_slices - 1,
            acked,
        }
    }
}


/// Reassembles chunks from slices, acknowledging every slice it processes.
///
/// Slices for anything but the expected chunk are ignored, except for slices of the most
///  recently completed chunk: those are answered with a full ack so that a sender whose
///  final acks got lost can finish.
pub struct ChunkReceiver {
    inner: RwLock<ReceiverInner>,
    ack_sink: Arc<dyn SliceAckSink>,
    handler: Arc<dyn ChunkHandler>,
}

impl ChunkReceiver {
    pub fn new(config: Arc<ChunkConfig>, ack_sink: Arc<dyn SliceAckSink>, handler: Arc<dyn ChunkHandler>) -> anyhow::Result<ChunkReceiver> {
        config.validate()?;

        Ok(ChunkReceiver {
            inner: RwLock::new(ReceiverInner {
                config,
                expected_chunk_id: 0,
                num_slices: None,
                received: BitSet::new(),
                reassembly_buf: Vec::new(),
                total_len: None,
                last_completed: None,
            }),
            ack_sink,
            handler,
        })
    }

    pub async fn expected_chunk_id(&self) -> u8 {
        self.inner.read().await.expected_chunk_id
    }

    pub async fn on_slice(&self, slice: SliceMessage) {
        trace!("received slice {}/{} of chunk {}", slice.slice_id, slice.num_slices, slice.chunk_id);

        let (ack, chunk) = self.inner.write().await
            .on_slice(slice);

        if let Some(ack) = ack {
            self.ack_sink.send_slice_ack(ack).await;
        }
        if let Some(chunk) = chunk {
            self.handler.on_chunk_received(chunk).await;
        }
    }
}
