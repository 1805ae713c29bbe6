//! Addons multiplex their own payloads over the update channel in a namespace that is
//!  separate from the protocol's payload kinds. The channel treats them as opaque bytes
//!  keyed by a `u16` addon key.

use std::collections::BTreeMap;
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::codec::{put_framed, try_get_frame};
use crate::payload::PayloadFlags;
use crate::safe_converter::PrecheckedCast;

pub type AddonKey = u16;

/// Payload id under which live addon payloads travel in the live section of a packet. No
///  protocol payload kind may use this id.
pub const ADDON_PAYLOAD_ID: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonPayload {
    /// The flags are sender-side metadata provided by the addon and are not transmitted:
    ///  received addon payloads carry default flags. Addon payloads are always scalar.
    pub flags: PayloadFlags,
    pub data: Bytes,
}

impl AddonPayload {
    pub fn new(flags: PayloadFlags, data: impl Into<Bytes>) -> AddonPayload {
        AddonPayload {
            flags: PayloadFlags {
                is_collection: false,
                ..flags
            },
            data: data.into(),
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.is_reliable
    }

    pub fn drop_reliable_data_if_newer_exists(&self) -> bool {
        self.flags.drop_reliable_data_if_newer_exists
    }
}

pub type AddonMap = BTreeMap<AddonKey, AddonPayload>;

/// `u16` count, then per entry the `u16` addon key and the length-prefixed data
pub fn ser_addon_map(map: &AddonMap, buf: &mut BytesMut) -> anyhow::Result<()> {
    if map.len() > u16::MAX as usize {
        bail!("{} addon payloads exceed the maximum of {}", map.len(), u16::MAX);
    }

    buf.put_u16(map.len().prechecked_cast());
    for (&key, payload) in map {
        buf.put_u16(key);
        put_framed(buf, |b| b.put_slice(&payload.data))?;
    }
    Ok(())
}

pub fn deser_addon_map(buf: &mut &[u8]) -> anyhow::Result<AddonMap> {
    let num_entries = buf.try_get_u16()?;

    let mut result = AddonMap::new();
    for _ in 0..num_entries {
        let key = buf.try_get_u16()?;
        let data = try_get_frame(buf)?;
        if result.insert(key, AddonPayload::new(PayloadFlags::default(), Bytes::copy_from_slice(data))).is_some() {
            bail!("duplicate addon key {}", key);
        }
    }
    Ok(result)
}
