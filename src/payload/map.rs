use std::collections::BTreeMap;
use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use crate::payload::addon::{deser_addon_map, ser_addon_map};
use crate::payload::{AddonMap, Payload, PayloadKind, Slot, ADDON_PAYLOAD_ID};
use crate::safe_converter::PrecheckedCast;

/// Payload slots keyed by payload kind
pub type PayloadMap<P> = BTreeMap<<P as Payload>::Kind, Slot<P>>;

/// Place a payload into a map, overwriting or appending depending on its kind
pub fn put_payload<P: Payload>(map: &mut PayloadMap<P>, payload: P) {
    match map.get_mut(&payload.kind()) {
        Some(slot) => slot.push(payload),
        None => {
            map.insert(payload.kind(), Slot::new(payload));
        }
    }
}

/// The id-keyed encoding: a `u8` count of present entries, followed by `u8 payload id` and the
///  encoded slot for each entry in the protocol's wire order. Addon payloads (if any) are
///  appended as a single entry with the reserved [ADDON_PAYLOAD_ID].
pub fn ser_payload_map<P: Payload>(map: &PayloadMap<P>, addons: &AddonMap, buf: &mut BytesMut) -> anyhow::Result<()> {
    let entries = P::Kind::ALL.iter()
        .filter_map(|kind| map.get(kind).map(|slot| (*kind, slot)))
        .collect::<Vec<_>>();

    debug_assert_eq!(entries.len(), map.len(), "payload kind missing from PayloadKind::ALL");

    let num_entries = entries.len() + if addons.is_empty() { 0 } else { 1 };
    if num_entries > u8::MAX as usize {
        bail!("{} payload entries exceed the maximum of {}", num_entries, u8::MAX);
    }
    buf.put_u8(num_entries.prechecked_cast());

    for (kind, slot) in entries {
        buf.put_u8(kind.id());
        slot.ser(buf)?;
    }

    if !addons.is_empty() {
        buf.put_u8(ADDON_PAYLOAD_ID);
        ser_addon_map(addons, buf)?;
    }
    Ok(())
}

pub fn deser_payload_map<P: Payload>(buf: &mut &[u8]) -> anyhow::Result<(PayloadMap<P>, AddonMap)> {
    let num_entries = buf.try_get_u8()?;

    let mut map = PayloadMap::<P>::new();
    let mut addons = None;

    for _ in 0..num_entries {
        let id = buf.try_get_u8()?;
        if id == ADDON_PAYLOAD_ID {
            if addons.is_some() {
                bail!("duplicate addon entry");
            }
            addons = Some(deser_addon_map(buf)?);
            continue;
        }

        let kind = P::Kind::from_id(id)?;
        let slot = Slot::deser(kind, buf)?;
        if map.insert(kind, slot).is_some() {
            bail!("duplicate entry for payload kind {:?}", kind);
        }
    }

    Ok((map, addons.unwrap_or_default()))
}
