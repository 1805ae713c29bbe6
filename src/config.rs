use std::time::Duration;
use anyhow::bail;
use crate::channel::ACK_WINDOW_WIDTH;

#[derive(Debug, Clone, Default)]
pub struct ProtocolConfig {
    pub channel: ChannelConfig,
    pub chunk: ChunkConfig,
}

impl ProtocolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.channel.validate()?;
        self.chunk.validate()
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// A sent packet is considered lost if the peer's latest ack is at least this many
    ///  sequence numbers ahead of it without acknowledging it. This leaves a grace period for
    ///  packets that are merely reordered on the wire.
    ///
    /// Packets that fall out of the ack window are always considered lost.
    pub loss_threshold: u16,

    /// The number of fully applied sequence numbers that are remembered for suppressing
    ///  duplicate resend buckets. Must be big enough to cover the time a resend bucket can
    ///  travel around in re-embedded form.
    pub processed_history_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            loss_threshold: 3,
            processed_history_len: 1024,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.loss_threshold == 0 || self.loss_threshold >= ACK_WINDOW_WIDTH {
            bail!("loss threshold must be in the range 1..{}", ACK_WINDOW_WIDTH);
        }
        if self.processed_history_len < ACK_WINDOW_WIDTH as usize {
            bail!("processed history must cover at least the ack window of {} packets", ACK_WINDOW_WIDTH);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// This is the maximum number of payload bytes per slice. All slices of a chunk except
    ///  the highest-indexed one have exactly this size.
    pub max_slice_size: usize,

    /// Slice ids and slice counts are transmitted as `u8`, so this can not exceed 255
    pub max_slices_per_chunk: usize,

    /// The minimum time between two transmissions of the same slice
    pub resend_interval: Duration,

    /// The minimum pause between two slice transmissions of the sender's loop
    pub min_resend_wait: Duration,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            max_slice_size: 1024,
            max_slices_per_chunk: 255,
            resend_interval: Duration::from_millis(100),
            min_resend_wait: Duration::from_millis(50),
        }
    }
}

impl ChunkConfig {
    pub fn max_chunk_size(&self) -> usize {
        self.max_slice_size * self.max_slices_per_chunk
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_slice_size == 0 || self.max_slice_size > u16::MAX as usize {
            bail!("slice size must be in the range 1..={}", u16::MAX);
        }
        if self.max_slices_per_chunk == 0 || self.max_slices_per_chunk > u8::MAX as usize {
            bail!("number of slices per chunk must be in the range 1..={}", u8::MAX);
        }
        if self.min_resend_wait.is_zero() {
            bail!("minimum resend wait must not be zero");
        }
        Ok(())
    }
}
