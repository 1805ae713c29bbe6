use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use tracing::error;
use crate::channel::ack_field::AckField;
use crate::channel::sequence::SequenceNumber;
use crate::codec::{try_get_frame, LengthPrefix};
use crate::payload::addon::{deser_addon_map, ser_addon_map};
use crate::payload::map::{deser_payload_map, ser_payload_map};
use crate::payload::{put_payload, AddonKey, AddonMap, AddonPayload, Payload, PayloadKind, PayloadMap, Slot};
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// Identifies a slot across the two payload namespaces of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey<K> {
    Payload(K),
    Addon(AddonKey),
}

/// One update channel packet, built fresh per tick in each direction.
///
/// Resend buckets hold reliable payloads from earlier packets that were reported lost, keyed
///  by the sequence number of the packet that originally carried them.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPacket<P: Payload> {
    pub sequence: SequenceNumber,
    pub ack: SequenceNumber,
    pub ack_field: AckField,
    pub live: PayloadMap<P>,
    pub addon_live: AddonMap,
    pub resend: BTreeMap<SequenceNumber, PayloadMap<P>>,
    pub addon_resend: BTreeMap<SequenceNumber, AddonMap>,
}

impl <P: Payload> ChannelPacket<P> {
    pub fn new(sequence: SequenceNumber, ack: SequenceNumber, ack_field: AckField) -> ChannelPacket<P> {
        ChannelPacket {
            sequence,
            ack,
            ack_field,
            live: PayloadMap::new(),
            addon_live: AddonMap::new(),
            resend: BTreeMap::new(),
            addon_resend: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, payload: P) {
        put_payload(&mut self.live, payload);
    }

    pub fn put_addon(&mut self, key: AddonKey, payload: AddonPayload) {
        self.addon_live.insert(key, payload);
    }

    /// Packets without reliable data need not be tracked for loss by the sender
    pub fn contains_reliable_data(&self) -> bool {
        self.live.values().any(|slot| slot.is_reliable())
            || self.addon_live.values().any(|p| p.is_reliable())
            || self.resend.values().flat_map(|bucket| bucket.values()).any(|slot| slot.is_reliable())
            || self.addon_resend.values().any(|bucket| !bucket.is_empty())
    }

    pub fn ser(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        let prefix = LengthPrefix::reserve(buf);

        buf.put_u16(self.sequence.to_raw());
        buf.put_u16(self.ack.to_raw());
        buf.put_u64(self.ack_field.to_raw());

        ser_payload_map(&self.live, &self.addon_live, buf)?;

        let num_buckets = clamped_bucket_count(self.resend.len(), self.sequence);
        buf.put_u16(num_buckets);
        for (origin, bucket) in self.resend.iter().take(num_buckets.safe_cast()) {
            buf.put_u16(origin.to_raw());
            ser_payload_map(bucket, &AddonMap::new(), buf)?;
        }

        let num_addon_buckets = clamped_bucket_count(self.addon_resend.len(), self.sequence);
        buf.put_u16(num_addon_buckets);
        for (origin, bucket) in self.addon_resend.iter().take(num_addon_buckets.safe_cast()) {
            buf.put_u16(origin.to_raw());
            ser_addon_map(bucket, buf)?;
        }

        prefix.finalize_length(buf)
    }

    /// Decodes a complete packet or fails as a whole
    pub fn deser(buf: &mut &[u8]) -> anyhow::Result<ChannelPacket<P>> {
        let mut body = try_get_frame(buf)?;

        let sequence = SequenceNumber::from_raw(body.try_get_u16()?);
        let ack = SequenceNumber::from_raw(body.try_get_u16()?);
        let ack_field = AckField::from_raw(body.try_get_u64()?);

        let (live, addon_live) = deser_payload_map::<P>(&mut body)?;

        let mut resend = BTreeMap::new();
        for _ in 0..body.try_get_u16()? {
            let origin = SequenceNumber::from_raw(body.try_get_u16()?);
            let (bucket, addons) = deser_payload_map::<P>(&mut body)?;
            if !addons.is_empty() {
                bail!("addon payloads inside resend bucket {}", origin);
            }
            if resend.insert(origin, bucket).is_some() {
                bail!("duplicate resend bucket {}", origin);
            }
        }

        let mut addon_resend = BTreeMap::new();
        for _ in 0..body.try_get_u16()? {
            let origin = SequenceNumber::from_raw(body.try_get_u16()?);
            if addon_resend.insert(origin, deser_addon_map(&mut body)?).is_some() {
                bail!("duplicate addon resend bucket {}", origin);
            }
        }

        if body.has_remaining() {
            bail!("{} unexpected trailing bytes in packet {}", body.remaining(), sequence);
        }

        Ok(ChannelPacket {
            sequence,
            ack,
            ack_field,
            live,
            addon_live,
            resend,
            addon_resend,
        })
    }

    /// Re-embed the reliable data of a lost packet into this (outgoing) packet. A value that
    ///  is flagged `drop_reliable_data_if_newer_exists` is dropped if this packet's live
    ///  section carries a value for the same slot.
    pub fn set_lost_reliable_data(&mut self, lost: &ChannelPacket<P>) {
        self.set_lost_reliable_data_superseded_by(lost, |_, _| false);
    }

    /// Like [ChannelPacket::set_lost_reliable_data], with an additional check whether a value
    ///  for a slot was sent after the given origin sequence in some other packet.
    ///
    /// The lost packet's own resend buckets are carried forward under their original origin
    ///  sequence.
    pub fn set_lost_reliable_data_superseded_by(&mut self, lost: &ChannelPacket<P>, newer_sent: impl Fn(SlotKey<P::Kind>, SequenceNumber) -> bool) {
        self.add_lost_payloads(lost.sequence, &lost.live, &newer_sent);
        for (&origin, bucket) in &lost.resend {
            self.add_lost_payloads(origin, bucket, &newer_sent);
        }

        self.add_lost_addons(lost.sequence, &lost.addon_live, &newer_sent);
        for (&origin, bucket) in &lost.addon_resend {
            self.add_lost_addons(origin, bucket, &newer_sent);
        }
    }

    fn add_lost_payloads(&mut self, origin: SequenceNumber, lost: &PayloadMap<P>, newer_sent: &impl Fn(SlotKey<P::Kind>, SequenceNumber) -> bool) {
        for (&kind, slot) in lost {
            if !slot.is_reliable() {
                continue;
            }

            // collection items are independent events, they are never superseded
            if !slot.is_collection()
                && slot.drop_reliable_data_if_newer_exists()
                && (self.live.contains_key(&kind) || newer_sent(SlotKey::Payload(kind), origin))
            {
                continue;
            }

            match self.resend.entry(origin).or_default().entry(kind) {
                Entry::Vacant(e) => {
                    e.insert(slot.clone());
                }
                Entry::Occupied(mut e) => e.get_mut().append(slot.clone()),
            }
        }
    }

    fn add_lost_addons(&mut self, origin: SequenceNumber, lost: &AddonMap, newer_sent: &impl Fn(SlotKey<P::Kind>, SequenceNumber) -> bool) {
        for (&key, payload) in lost {
            if !payload.is_reliable() {
                continue;
            }
            if payload.drop_reliable_data_if_newer_exists()
                && (self.addon_live.contains_key(&key) || newer_sent(SlotKey::Addon(key), origin))
            {
                continue;
            }

            self.addon_resend.entry(origin).or_default()
                .entry(key)
                .or_insert_with(|| payload.clone());
        }
    }

    /// Remove all resend buckets whose origin sequence was already applied on the receiving
    ///  side
    pub fn drop_duplicate_resend_data(&mut self, is_processed: impl Fn(SequenceNumber) -> bool) {
        self.resend.retain(|origin, _| !is_processed(*origin));
        self.addon_resend.retain(|origin, _| !is_processed(*origin));
    }

    /// The origin sequences of all resend buckets, oldest first
    pub fn resend_origins(&self) -> Vec<SequenceNumber> {
        let mut result = self.resend.keys()
            .chain(self.addon_resend.keys())
            .cloned()
            .collect::<Vec<_>>();
        result.sort_by(SequenceNumber::cmp_age);
        result.dedup();
        result
    }

    /// Fold the live section and all resend buckets into the data that is effective for this
    ///  tick.
    ///
    /// For scalar slots, the live value takes precedence over resent values, and newer resent
    ///  values take precedence over older ones. Collection slots are concatenated oldest first,
    ///  with the live items last.
    pub fn merge_effective(self) -> EffectiveData<P> {
        let mut buckets = self.resend.into_iter().collect::<Vec<_>>();
        buckets.sort_by(|a, b| a.0.cmp_age(&b.0));

        let mut payloads = PayloadMap::<P>::new();

        for (_, bucket) in &buckets {
            for (kind, slot) in bucket {
                if slot.is_collection() {
                    append_collection(&mut payloads, *kind, slot.clone());
                }
            }
        }

        let mut scalars = Vec::new();
        for (kind, slot) in self.live {
            if slot.is_collection() {
                append_collection(&mut payloads, kind, slot);
            }
            else {
                scalars.push((kind, slot));
            }
        }
        for (_, bucket) in buckets.into_iter().rev() {
            scalars.extend(bucket.into_iter().filter(|(_, slot)| !slot.is_collection()));
        }
        for (kind, slot) in scalars {
            payloads.entry(kind).or_insert(slot);
        }

        let mut addon_buckets = self.addon_resend.into_iter().collect::<Vec<_>>();
        addon_buckets.sort_by(|a, b| b.0.cmp_age(&a.0));

        let mut addons = self.addon_live;
        for (_, bucket) in addon_buckets {
            for (key, payload) in bucket {
                addons.entry(key).or_insert(payload);
            }
        }

        EffectiveData {
            sequence: self.sequence,
            payloads,
            addons,
        }
    }
}

fn append_collection<P: Payload>(payloads: &mut PayloadMap<P>, kind: P::Kind, slot: Slot<P>) {
    match payloads.entry(kind) {
        Entry::Vacant(e) => {
            e.insert(slot);
        }
        Entry::Occupied(mut e) => e.get_mut().append(slot),
    }
}

fn clamped_bucket_count(num_buckets: usize, sequence: SequenceNumber) -> u16 {
    if num_buckets > u16::MAX as usize {
        error!("packet {} has {} resend buckets, exceeding the maximum of {} - dropping the surplus", sequence, num_buckets, u16::MAX);
        return u16::MAX;
    }
    num_buckets.prechecked_cast()
}


/// The payloads of a received packet that the application applies for this tick
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveData<P: Payload> {
    pub sequence: SequenceNumber,
    pub payloads: PayloadMap<P>,
    pub addons: AddonMap,
}

impl <P: Payload> EffectiveData<P> {
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty() && self.addons.is_empty()
    }

    pub fn get(&self, kind: P::Kind) -> Option<&Slot<P>> {
        self.payloads.get(&kind)
    }

    /// All payloads in the protocol's kind order, collection items in merge order
    pub fn iter(&self) -> impl Iterator<Item = &P> {
        P::Kind::ALL.iter()
            .filter_map(|kind| self.payloads.get(kind))
            .flat_map(|slot| slot.items())
    }
}
