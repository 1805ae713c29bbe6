use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use bytes::Bytes;
use crate::chunk::messages::{SliceAckMessage, SliceMessage};

/// The transport's send primitive for slices, injected into a [crate::chunk::ChunkSender]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SliceSink: Send + Sync + 'static {
    async fn send_slice(&self, slice: SliceMessage);
}

/// The transport's send primitive for slice acks, injected into a [crate::chunk::ChunkReceiver]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SliceAckSink: Send + Sync + 'static {
    async fn send_slice_ack(&self, ack: SliceAckMessage);
}

/// Application callback for completely reassembled chunks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChunkHandler: Send + Sync + 'static {
    async fn on_chunk_received(&self, chunk: Bytes);
}
