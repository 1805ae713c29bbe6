use std::collections::VecDeque;
use std::sync::Arc;
use bytes::{Buf, BytesMut};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, trace, warn};
use crate::channel::ack_field::{AckField, ReceiveHistory};
use crate::channel::packet::{ChannelPacket, EffectiveData, SlotKey};
use crate::channel::sequence::SequenceNumber;
use crate::channel::ACK_WINDOW_WIDTH;
use crate::config::ChannelConfig;
use crate::payload::{AddonMap, Payload, PayloadMap};

/// Sent packets older than this are forgotten even if the peer never acknowledged them
const MAX_SENT_HISTORY_AGE: u16 = 1 << 14;

/// Bounded FIFO set of sequence numbers whose data was applied
struct ProcessedHistory {
    capacity: usize,
    set: FxHashSet<SequenceNumber>,
    order: VecDeque<SequenceNumber>,
}

impl ProcessedHistory {
    fn new(capacity: usize) -> ProcessedHistory {
        ProcessedHistory {
            capacity,
            set: FxHashSet::default(),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn contains(&self, sequence: SequenceNumber) -> bool {
        self.set.contains(&sequence)
    }

    fn insert(&mut self, sequence: SequenceNumber) {
        if !self.set.insert(sequence) {
            return;
        }
        self.order.push_back(sequence);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}


/// The per-connection state of the update channel in both directions: it numbers outgoing
///  packets, acknowledges incoming packets, detects lost outgoing packets from the peer's
///  acks and re-embeds their reliable data into subsequent packets.
///
/// This is a synchronous state machine that is driven once per tick by the owning transport
///  loop, so there is no internal synchronization.
pub struct UpdateChannel<P: Payload> {
    config: Arc<ChannelConfig>,

    next_sequence: SequenceNumber,
    /// sent packets with reliable data that were neither acknowledged nor declared lost, oldest first
    unacked: VecDeque<ChannelPacket<P>>,
    /// packets declared lost whose data goes into the next outgoing packet
    lost: Vec<ChannelPacket<P>>,
    latest_live_sent: FxHashMap<SlotKey<P::Kind>, SequenceNumber>,

    receive_history: ReceiveHistory,
    processed: ProcessedHistory,
}

impl <P: Payload> UpdateChannel<P> {
    pub fn new(config: Arc<ChannelConfig>) -> anyhow::Result<UpdateChannel<P>> {
        config.validate()?;

        let processed = ProcessedHistory::new(config.processed_history_len);
        Ok(UpdateChannel {
            config,
            next_sequence: SequenceNumber::ZERO,
            unacked: VecDeque::new(),
            lost: Vec::new(),
            latest_live_sent: FxHashMap::default(),
            receive_history: ReceiveHistory::default(),
            processed,
        })
    }

    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    pub fn num_unacked(&self) -> usize {
        self.unacked.len()
    }

    /// true if reliable data is waiting to be re-embedded in the next outgoing packet
    pub fn has_lost_data(&self) -> bool {
        !self.lost.is_empty()
    }

    /// Build and encode the next outgoing packet with the given live data, re-embedding the
    ///  reliable data of packets that were declared lost since the previous call. On success,
    ///  the live maps are moved into the packet.
    ///
    /// Lost packets are re-embedded oldest first for as long as the encoded packet fits into a
    ///  frame, and the rest stays pending for the next packet. If the live data alone does not
    ///  fit, an error is returned and both the live maps and the channel's state are left
    ///  unchanged.
    pub fn build_packet(&mut self, live: &mut PayloadMap<P>, addon_live: &mut AddonMap) -> anyhow::Result<(ChannelPacket<P>, BytesMut)> {
        let (ack, ack_field) = self.receive_history.ack();

        let mut packet = ChannelPacket::new(self.next_sequence, ack, ack_field);
        packet.live = std::mem::take(live);
        packet.addon_live = std::mem::take(addon_live);

        let mut buf = BytesMut::new();
        if let Err(e) = packet.ser(&mut buf) {
            *live = packet.live;
            *addon_live = packet.addon_live;
            return Err(e);
        }

        let num_embedded = self.embed_lost_data(&mut packet, &mut buf);
        if num_embedded < self.lost.len() {
            if num_embedded == 0 && packet.live.is_empty() && packet.addon_live.is_empty() {
                error!("reliable data of lost packet {} does not fit into a packet - dropping it", self.lost[0].sequence);
                self.lost.remove(0);
            }
            else {
                debug!("{} lost packets do not fit into packet {} - deferring them", self.lost.len() - num_embedded, packet.sequence);
            }
        }
        self.lost.drain(..num_embedded);

        trace!("built packet {} (ack {}, {:?}) with {} live entries and resend buckets {:?}", packet.sequence, ack, ack_field, packet.live.len() + packet.addon_live.len(), packet.resend_origins());

        self.next_sequence = self.next_sequence.next();

        for &kind in packet.live.keys() {
            self.latest_live_sent.insert(SlotKey::Payload(kind), packet.sequence);
        }
        for &key in packet.addon_live.keys() {
            self.latest_live_sent.insert(SlotKey::Addon(key), packet.sequence);
        }

        while let Some(oldest) = self.unacked.front() {
            if packet.sequence.distance_from(oldest.sequence) < MAX_SENT_HISTORY_AGE {
                break;
            }
            debug!("packet {} was never acknowledged or reported lost - forgetting it", oldest.sequence);
            self.unacked.pop_front();
        }
        if packet.contains_reliable_data() {
            self.unacked.push_back(packet.clone());
        }

        Ok((packet, buf))
    }

    /// Re-embeds lost packets oldest first until the next one would not fit, returning the number
    ///  of lost packets that were embedded. `buf` always holds the encoded `packet`.
    fn embed_lost_data(&self, packet: &mut ChannelPacket<P>, buf: &mut BytesMut) -> usize {
        let latest_live_sent = &self.latest_live_sent;

        for (idx, lost) in self.lost.iter().enumerate() {
            let mut candidate = packet.clone();
            candidate.set_lost_reliable_data_superseded_by(lost, |key, origin| {
                latest_live_sent.get(&key)
                    .is_some_and(|sent| sent.is_newer_than(origin))
            });

            let mut candidate_buf = BytesMut::new();
            if candidate.ser(&mut candidate_buf).is_err() {
                return idx;
            }
            *packet = candidate;
            *buf = candidate_buf;
        }
        self.lost.len()
    }

    /// Process a received datagram, returning the data that is effective for this tick. A
    ///  malformed datagram is discarded without affecting the channel's state.
    pub fn receive(&mut self, datagram: &[u8]) -> Option<EffectiveData<P>> {
        let mut parse_buf = datagram;
        let mut packet = match ChannelPacket::<P>::deser(&mut parse_buf) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("discarding malformed packet: {}", e);
                return None;
            }
        };
        if parse_buf.has_remaining() {
            warn!("discarding packet {} with {} bytes after the packet frame", packet.sequence, parse_buf.remaining());
            return None;
        }

        trace!("received packet {} (ack {}, {:?})", packet.sequence, packet.ack, packet.ack_field);

        self.receive_history.on_received(packet.sequence);
        self.on_peer_ack(packet.ack, packet.ack_field);

        let processed = &self.processed;
        packet.drop_duplicate_resend_data(|origin| processed.contains(origin));

        if self.processed.contains(packet.sequence) {
            debug!("received packet {} more than once - ignoring its live data", packet.sequence);
            packet.live.clear();
            packet.addon_live.clear();
        }

        let sequence = packet.sequence;
        let origins = packet.resend_origins();
        let effective = packet.merge_effective();

        self.processed.insert(sequence);
        for origin in origins {
            self.processed.insert(origin);
        }

        Some(effective)
    }

    fn on_peer_ack(&mut self, ack: SequenceNumber, ack_field: AckField) {
        let loss_threshold = self.config.loss_threshold;
        let mut still_unacked = VecDeque::with_capacity(self.unacked.len());

        for packet in self.unacked.drain(..) {
            if packet.sequence.is_newer_than(ack) {
                still_unacked.push_back(packet);
                continue;
            }

            let offset = ack.distance_from(packet.sequence);
            if ack_field.is_set(offset) {
                trace!("packet {} was acknowledged", packet.sequence);
            }
            else if offset >= loss_threshold || offset >= ACK_WINDOW_WIDTH {
                debug!("packet {} was lost - re-embedding its reliable data", packet.sequence);
                self.lost.push(packet);
            }
            else {
                still_unacked.push_back(packet);
            }
        }

        self.unacked = still_unacked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::put_payload;
    use crate::payload::test_payload::{TestKind, TestPayload};
    use crate::payload::{AddonPayload, PayloadFlags, Slot};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn channel(loss_threshold: u16) -> UpdateChannel<TestPayload> {
        UpdateChannel::new(Arc::new(ChannelConfig {
            loss_threshold,
            ..ChannelConfig::default()
        })).unwrap()
    }

    fn live(payloads: Vec<(TestKind, u32)>) -> PayloadMap<TestPayload> {
        let mut result = PayloadMap::new();
        for (kind, value) in payloads {
            put_payload(&mut result, TestPayload::new(kind, value));
        }
        result
    }

    fn send(from: &mut UpdateChannel<TestPayload>, payloads: Vec<(TestKind, u32)>) -> (ChannelPacket<TestPayload>, BytesMut) {
        from.build_packet(&mut live(payloads), &mut AddonMap::new()).unwrap()
    }

    fn values(effective: &EffectiveData<TestPayload>, kind: TestKind) -> Vec<u32> {
        effective.get(kind)
            .map(|slot| slot.items().iter().map(|p| p.value).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_sequence_and_ack() {
        let mut a = channel(3);
        let mut b = channel(3);

        let (p0, _) = send(&mut a, vec![]);
        let (p1, buf1) = send(&mut a, vec![]);
        assert_eq!(p0.sequence, SequenceNumber::from_raw(0));
        assert_eq!(p1.sequence, SequenceNumber::from_raw(1));

        b.receive(&buf1).unwrap();
        let (reply, _) = send(&mut b, vec![]);
        assert_eq!(reply.ack, SequenceNumber::from_raw(1));
        assert_eq!(reply.ack_field.offsets().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_delivery_and_ack() {
        let mut a = channel(3);
        let mut b = channel(3);

        let (packet, buf) = send(&mut a, vec![(TestKind::Reliable, 1), (TestKind::Unreliable, 2)]);
        assert!(packet.contains_reliable_data());
        assert_eq!(a.num_unacked(), 1);

        let effective = b.receive(&buf).unwrap();
        assert_eq!(values(&effective, TestKind::Reliable), vec![1]);
        assert_eq!(values(&effective, TestKind::Unreliable), vec![2]);

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();
        assert_eq!(a.num_unacked(), 0);
        assert!(!a.has_lost_data());
    }

    #[test]
    fn test_unreliable_packets_not_tracked() {
        let mut a = channel(3);
        send(&mut a, vec![(TestKind::Unreliable, 1)]);
        assert_eq!(a.num_unacked(), 0);
    }

    #[test]
    fn test_lost_reliable_data_is_resent() {
        let mut a = channel(3);
        let mut b = channel(3);

        send(&mut a, vec![(TestKind::Reliable, 1), (TestKind::Unreliable, 2)]);
        for _ in 0..3 {
            let (_, buf) = send(&mut a, vec![]);
            b.receive(&buf).unwrap();
        }

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();
        assert!(a.has_lost_data());

        let (packet, buf) = send(&mut a, vec![]);
        assert_eq!(packet.resend_origins(), vec![SequenceNumber::ZERO]);

        let effective = b.receive(&buf).unwrap();
        assert_eq!(values(&effective, TestKind::Reliable), vec![1]);
        assert!(values(&effective, TestKind::Unreliable).is_empty());
    }

    #[test]
    fn test_loss_threshold_tolerates_reordering() {
        let mut a = channel(3);
        let mut b = channel(3);

        send(&mut a, vec![(TestKind::Reliable, 1)]);
        let (_, buf) = send(&mut a, vec![]);
        b.receive(&buf).unwrap();

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();
        assert!(!a.has_lost_data());
        assert_eq!(a.num_unacked(), 1);
    }

    #[test]
    fn test_superseded_lost_data_is_dropped() {
        let mut a = channel(1);
        let mut b = channel(1);

        send(&mut a, vec![(TestKind::Latest, 1), (TestKind::Reliable, 1)]);
        let (_, buf) = send(&mut a, vec![(TestKind::Latest, 2)]);
        b.receive(&buf).unwrap();

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();
        assert!(a.has_lost_data());

        let (packet, _) = send(&mut a, vec![]);
        let bucket = &packet.resend[&SequenceNumber::ZERO];
        assert!(!bucket.contains_key(&TestKind::Latest));
        assert_eq!(bucket[&TestKind::Reliable], Slot::Scalar(TestPayload::new(TestKind::Reliable, 1)));
    }

    #[test]
    fn test_superseded_by_current_live() {
        let mut a = channel(1);
        let mut b = channel(1);

        send(&mut a, vec![(TestKind::Latest, 1)]);
        let (_, buf) = send(&mut a, vec![]);
        b.receive(&buf).unwrap();

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();

        let (packet, _) = send(&mut a, vec![(TestKind::Latest, 3)]);
        assert!(packet.resend.is_empty());
    }

    #[test]
    fn test_duplicate_datagram_is_not_reapplied() {
        let mut a = channel(3);
        let mut b = channel(3);

        let (_, buf) = send(&mut a, vec![(TestKind::Events, 1)]);
        assert_eq!(values(&b.receive(&buf).unwrap(), TestKind::Events), vec![1]);

        let duplicate = b.receive(&buf).unwrap();
        assert!(duplicate.is_empty());
    }

    #[test]
    fn test_duplicate_resend_bucket_is_dropped() {
        let mut b = channel(3);

        let mut first = ChannelPacket::<TestPayload>::new(SequenceNumber::from_raw(6), SequenceNumber::ZERO, AckField::EMPTY);
        put_payload(first.resend.entry(SequenceNumber::from_raw(5)).or_default(), TestPayload::new(TestKind::Events, 5));
        let mut second = first.clone();
        second.sequence = SequenceNumber::from_raw(7);
        second.put(TestPayload::new(TestKind::Events, 7));

        let mut buf = BytesMut::new();
        first.ser(&mut buf).unwrap();
        assert_eq!(values(&b.receive(&buf).unwrap(), TestKind::Events), vec![5]);

        let mut buf = BytesMut::new();
        second.ser(&mut buf).unwrap();
        assert_eq!(values(&b.receive(&buf).unwrap(), TestKind::Events), vec![7]);
    }

    #[test]
    fn test_bucket_for_processed_sequence_is_dropped() {
        let mut a = channel(3);
        let mut b = channel(3);

        // packet 0 arrives, but its ack gets lost and the sender considers it lost
        let (_, buf) = send(&mut a, vec![(TestKind::Reliable, 1)]);
        b.receive(&buf).unwrap();

        let mut reply = ChannelPacket::<TestPayload>::new(SequenceNumber::ZERO, SequenceNumber::from_raw(3), AckField::from_offsets([0]));
        reply.put(TestPayload::new(TestKind::Unreliable, 0));
        let mut reply_buf = BytesMut::new();
        reply.ser(&mut reply_buf).unwrap();
        for _ in 0..3 {
            send(&mut a, vec![]);
        }
        a.receive(&reply_buf).unwrap();
        assert!(a.has_lost_data());

        let (packet, buf) = send(&mut a, vec![]);
        assert!(!packet.resend.is_empty());
        assert!(b.receive(&buf).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_datagram_leaves_state_untouched() {
        let mut a = channel(3);
        let mut b = channel(3);

        let (_, buf) = send(&mut a, vec![(TestKind::Reliable, 1)]);
        b.receive(&buf).unwrap();

        assert!(b.receive(&buf[..buf.len() - 1]).is_none());
        assert!(b.receive(&[]).is_none());

        let mut with_trailing = buf.clone();
        with_trailing.extend_from_slice(&[1]);
        assert!(b.receive(&with_trailing).is_none());

        let (reply, _) = send(&mut b, vec![]);
        assert_eq!(reply.ack, SequenceNumber::ZERO);
        assert_eq!(reply.ack_field.offsets().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_out_of_window_packets_are_lost() {
        let mut a = channel(60);
        let mut b = channel(60);

        send(&mut a, vec![(TestKind::Reliable, 1)]);
        let mut last = BytesMut::new();
        for _ in 0..ACK_WINDOW_WIDTH {
            last = send(&mut a, vec![]).1;
        }
        b.receive(&last).unwrap();

        let (_, reply) = send(&mut b, vec![]);
        a.receive(&reply).unwrap();
        assert!(a.has_lost_data());
    }

    #[test]
    fn test_addon_payloads() {
        let mut a = channel(3);
        let mut b = channel(3);

        let mut addons = AddonMap::new();
        addons.insert(7, AddonPayload::new(PayloadFlags::RELIABLE, vec![1, 2, 3]));
        let (packet, buf) = a.build_packet(&mut PayloadMap::new(), &mut addons).unwrap();
        assert!(addons.is_empty());
        assert!(packet.contains_reliable_data());

        let effective = b.receive(&buf).unwrap();
        assert_eq!(effective.addons[&7].data.as_ref(), &[1, 2, 3]);
    }

    #[rstest]
    #[case::zero_threshold(0, 1024)]
    #[case::threshold_beyond_window(64, 1024)]
    #[case::no_processed_history(3, 0)]
    fn test_invalid_config_is_rejected(#[case] loss_threshold: u16, #[case] processed_history_len: usize) {
        let config = ChannelConfig {
            loss_threshold,
            processed_history_len,
        };
        assert!(UpdateChannel::<TestPayload>::new(Arc::new(config)).is_err());
    }

    fn events(first: u32, n: u32) -> Vec<(TestKind, u32)> {
        (first..first + n)
            .map(|value| (TestKind::Events, value))
            .collect()
    }

    #[test]
    fn test_oversized_lost_data_is_spread_over_several_packets() {
        let mut a = channel(3);
        let mut b = channel(3);

        // 4 packets with 18 KB of reliable events each; they do not all fit into one frame
        for i in 0..4 {
            send(&mut a, events(i * 3000, 3000));
        }
        for _ in 0..4 {
            send(&mut a, vec![]);
        }

        let mut reply = ChannelPacket::<TestPayload>::new(SequenceNumber::ZERO, SequenceNumber::from_raw(7), AckField::from_offsets([0]));
        reply.put(TestPayload::new(TestKind::Unreliable, 0));
        let mut reply_buf = BytesMut::new();
        reply.ser(&mut reply_buf).unwrap();
        a.receive(&reply_buf).unwrap();
        assert!(a.has_lost_data());

        let mut delivered = Vec::new();
        let mut num_packets = 0;
        while a.has_lost_data() {
            let (packet, buf) = send(&mut a, vec![(TestKind::Reliable, num_packets)]);
            assert!(buf.len() <= u16::MAX as usize + 2);
            assert!(!packet.resend.is_empty());
            delivered.extend(values(&b.receive(&buf).unwrap(), TestKind::Events));

            num_packets += 1;
            assert!(num_packets <= 4);
        }
        assert_eq!(num_packets, 2);

        assert_eq!(delivered, (0..12000).collect::<Vec<_>>());
        assert_eq!(a.next_sequence(), SequenceNumber::from_raw(10));
    }

    #[test]
    fn test_oversized_live_data_is_returned() {
        let mut a = channel(3);

        let mut oversized = live(events(0, 12000));
        assert!(a.build_packet(&mut oversized, &mut AddonMap::new()).is_err());
        assert_eq!(oversized[&TestKind::Events].items().len(), 12000);
        assert_eq!(a.next_sequence(), SequenceNumber::ZERO);
        assert_eq!(a.num_unacked(), 0);

        let (packet, _) = send(&mut a, vec![(TestKind::Reliable, 1)]);
        assert_eq!(packet.sequence, SequenceNumber::ZERO);
    }

    #[test]
    fn test_lost_packet_that_never_fits_is_dropped() {
        let mut a = channel(3);

        let mut lost = ChannelPacket::<TestPayload>::new(SequenceNumber::ZERO, SequenceNumber::ZERO, AckField::EMPTY);
        let bucket = lost.resend.entry(SequenceNumber::from_raw(60000)).or_default();
        for value in 0..12000 {
            put_payload(bucket, TestPayload::new(TestKind::Events, value));
        }
        a.lost.push(lost);

        let (packet, _) = send(&mut a, vec![(TestKind::Unreliable, 1)]);
        assert!(packet.resend.is_empty());
        assert!(a.has_lost_data());

        let (packet, _) = send(&mut a, vec![]);
        assert!(packet.resend.is_empty());
        assert!(!a.has_lost_data());
    }

    #[test]
    fn test_lossy_link_delivers_events_exactly_once() {
        let mut rng = StdRng::seed_from_u64(4711);
        let mut a = channel(3);
        let mut b = channel(3);

        let mut delivered = Vec::new();
        for tick in 0..300u32 {
            let lossy = tick < 200;

            let payloads = if tick < 200 { vec![(TestKind::Events, tick)] } else { vec![] };
            let (_, buf) = send(&mut a, payloads);
            if !lossy || rng.gen_bool(0.7) {
                let effective = b.receive(&buf).unwrap();
                delivered.extend(values(&effective, TestKind::Events));
            }

            let (_, buf) = send(&mut b, vec![]);
            if !lossy || rng.gen_bool(0.7) {
                a.receive(&buf).unwrap();
            }
        }

        delivered.sort();
        assert_eq!(delivered, (0..200).collect::<Vec<_>>());
        assert_eq!(a.num_unacked(), 0);
    }
}
