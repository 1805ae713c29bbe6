use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use bit_set::BitSet;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, trace};
use crate::chunk::messages::{SliceAckMessage, SliceMessage};
use crate::chunk::num_slices_for;
use crate::chunk::sink::SliceSink;
use crate::config::ChunkConfig;
use crate::safe_converter::{PrecheckedCast, SafeCast};

pub type DrainedCallback = Arc<dyn Fn() + Send + Sync>;

struct InFlightChunk {
    chunk_id: u8,
    payload: Bytes,
    num_slices: u8,
    acked: BitSet,
    cursor: usize,
    last_sent: Vec<Option<Instant>>,
}

impl InFlightChunk {
    fn new(chunk_id: u8, payload: Bytes, max_slice_size: usize) -> InFlightChunk {
        let num_slices = num_slices_for(payload.len(), max_slice_size);
        InFlightChunk {
            chunk_id,
            payload,
            num_slices,
            acked: BitSet::with_capacity(num_slices.safe_cast()),
            cursor: 0,
            last_sent: vec![None; num_slices.safe_cast()],
        }
    }

    fn num_slices(&self) -> usize {
        self.num_slices.safe_cast()
    }

    /// scanning forward from `start` (inclusive) and wrapping around
    fn next_unacked_from(&self, start: usize) -> Option<usize> {
        (0..self.num_slices())
            .map(|i| (start + i) % self.num_slices())
            .find(|&slice_id| !self.acked.contains(slice_id))
    }

    fn slice_message(&self, slice_id: usize, max_slice_size: usize) -> SliceMessage {
        let start = slice_id * max_slice_size;
        let end = (start + max_slice_size).min(self.payload.len());
        SliceMessage {
            chunk_id: self.chunk_id,
            slice_id: slice_id.prechecked_cast(),
            num_slices: self.num_slices,
            data: self.payload.slice(start..end),
        }
    }
}

enum Step {
    Send { slice: SliceMessage, wait: Duration },
    Drained,
    Idle,
}

struct SenderInner {
    config: Arc<ChunkConfig>,
    queue: VecDeque<Bytes>,
    /// the id of the in-flight chunk, or of the next chunk if none is in flight
    chunk_id: u8,
    in_flight: Option<InFlightChunk>,
    on_drained: Option<DrainedCallback>,
}

impl SenderInner {
    /// The returned wait paces the loop until the *next* unacked slice is due, i.e. it is based on
    ///  that slice's last send time rather than on the slice that is sent now.
    fn next_step(&mut self, now: Instant) -> Step {
        loop {
            if self.in_flight.is_none() {
                match self.queue.pop_front() {
                    Some(payload) => {
                        debug!("starting transfer of chunk {} with {} bytes", self.chunk_id, payload.len());
                        self.in_flight = Some(InFlightChunk::new(self.chunk_id, payload, self.config.max_slice_size));
                    }
                    None => return Step::Idle,
                }
            }

            let Some(chunk) = self.in_flight.as_mut() else {
                continue;
            };

            let Some(slice_id) = chunk.next_unacked_from(chunk.cursor) else {
                debug!("chunk {} was fully acknowledged", chunk.chunk_id);
                self.in_flight = None;
                self.chunk_id = self.chunk_id.wrapping_add(1);
                if self.queue.is_empty() {
                    return Step::Drained;
                }
                continue;
            };

            let slice = chunk.slice_message(slice_id, self.config.max_slice_size);
            chunk.last_sent[slice_id] = Some(now);
            chunk.cursor = (slice_id + 1) % chunk.num_slices();

            let wait = match chunk.next_unacked_from(chunk.cursor) {
                None => Duration::ZERO,
                Some(next) => match chunk.last_sent[next] {
                    None => self.config.min_resend_wait,
                    Some(sent) => self.config.resend_interval
                        .saturating_sub(now - sent)
                        .max(self.config.min_resend_wait),
                },
            };

            return Step::Send { slice, wait };
        }
    }

    fn on_slice_ack(&mut self, ack: &SliceAckMessage) {
        let Some(chunk) = self.in_flight.as_mut() else {
            debug!("slice ack for chunk {} while no chunk is in flight - ignoring", ack.chunk_id);
            return;
        };

        if ack.chunk_id != chunk.chunk_id || ack.num_slices() != chunk.num_slices() {
            debug!("slice ack for chunk {} with {} slices does not match in-flight chunk {} with {} slices - ignoring", ack.chunk_id, ack.num_slices(), chunk.chunk_id, chunk.num_slices());
            return;
        }

        let num_slices = chunk.num_slices();
        for slice_id in ack.acked.iter().filter(|&i| i < num_slices) {
            chunk.acked.insert(slice_id);
        }
        trace!("chunk {}: {} of {} slices acknowledged", chunk.chunk_id, chunk.acked.len(), num_slices);
    }
}


/// Transfers payloads that are too big for a single packet as a sequence of chunks, one at a
///  time: each chunk is split into slices that are re-sent on a timer until the receiver
///  acknowledged all of them.
///
/// The transmit loop runs in a spawned task between [ChunkSender::start] and
///  [ChunkSender::stop].
pub struct ChunkSender {
    config: Arc<ChunkConfig>,
    inner: Arc<RwLock<SenderInner>>,
    sink: Arc<dyn SliceSink>,
    queue_notify: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ChunkSender {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl ChunkSender {
    pub fn new(config: Arc<ChunkConfig>, sink: Arc<dyn SliceSink>) -> anyhow::Result<ChunkSender> {
        config.validate()?;

        let inner = SenderInner {
            config: config.clone(),
            queue: VecDeque::new(),
            chunk_id: 0,
            in_flight: None,
            on_drained: None,
        };

        Ok(ChunkSender {
            config,
            inner: Arc::new(RwLock::new(inner)),
            sink,
            queue_notify: Arc::new(Notify::new()),
            loop_handle: Mutex::new(None),
        })
    }

    /// Rejects payloads that exceed the maximum chunk size rather than truncating them
    pub async fn enqueue(&self, payload: Bytes) -> anyhow::Result<()> {
        let max_chunk_size = self.config.max_chunk_size();
        if payload.len() > max_chunk_size {
            error!("payload of {} bytes exceeds the maximum chunk size of {} - dropping it", payload.len(), max_chunk_size);
            bail!("payload of {} bytes exceeds the maximum chunk size of {}", payload.len(), max_chunk_size);
        }

        self.inner.write().await
            .queue.push_back(payload);
        self.queue_notify.notify_one();
        Ok(())
    }

    /// The callback is called whenever the last queued chunk was fully acknowledged
    pub async fn on_queue_drained(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.write().await
            .on_drained = Some(Arc::new(callback));
    }

    pub async fn on_slice_ack(&self, ack: SliceAckMessage) {
        self.inner.write().await
            .on_slice_ack(&ack);
    }

    /// the number of payloads waiting for transfer, excluding the one in flight
    pub async fn queue_len(&self) -> usize {
        self.inner.read().await.queue.len()
    }

    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.read().await;
        inner.in_flight.is_none() && inner.queue.is_empty()
    }

    pub async fn start(&self) {
        let mut loop_handle = self.loop_handle.lock().await;
        if loop_handle.is_some() {
            debug!("chunk sender is already running");
            return;
        }

        *loop_handle = Some(tokio::spawn(Self::transmit_loop(
            self.inner.clone(),
            self.sink.clone(),
            self.queue_notify.clone(),
        )));
    }

    /// Stops the transmit loop. An interrupted transfer starts over from scratch with the same
    ///  chunk id on the next start.
    pub async fn stop(&self) {
        let Some(handle) = self.loop_handle.lock().await.take() else {
            return;
        };

        handle.abort();
        // wait for the loop to actually terminate so it can not touch the state afterwards
        let _ = handle.await;

        let mut inner = self.inner.write().await;
        if let Some(chunk) = inner.in_flight.take() {
            debug!("transfer of chunk {} interrupted - re-queueing its payload", chunk.chunk_id);
            inner.queue.push_front(chunk.payload);
        }
    }

    async fn transmit_loop(inner: Arc<RwLock<SenderInner>>, sink: Arc<dyn SliceSink>, queue_notify: Arc<Notify>) {
        loop {
            let step = inner.write().await
                .next_step(Instant::now());

            match step {
                Step::Send { slice, wait } => {
                    trace!("sending slice {}/{} of chunk {}", slice.slice_id, slice.num_slices, slice.chunk_id);
                    sink.send_slice(slice).await;
                    sleep(wait).await;
                }
                Step::Drained => {
                    let on_drained = inner.read().await.on_drained.clone();
                    if let Some(on_drained) = on_drained {
                        on_drained();
                    }
                }
                Step::Idle => queue_notify.notified().await,
            }
        }
    }
}
