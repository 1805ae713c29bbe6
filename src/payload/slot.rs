use anyhow::bail;
use bytes::{BufMut, BytesMut};
use crate::codec::{put_framed, try_get_frame};
use crate::payload::{Payload, PayloadKind};
use crate::safe_converter::PrecheckedCast;

/// The value(s) stored for one payload kind in a packet
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<P> {
    Scalar(P),
    Collection(Vec<P>),
}

impl <P: Payload> Slot<P> {
    pub fn new(payload: P) -> Slot<P> {
        if payload.kind().flags().is_collection {
            Slot::Collection(vec![payload])
        }
        else {
            Slot::Scalar(payload)
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Slot::Collection(_))
    }

    pub fn items(&self) -> &[P] {
        match self {
            Slot::Scalar(p) => std::slice::from_ref(p),
            Slot::Collection(items) => items,
        }
    }

    pub fn into_items(self) -> Vec<P> {
        match self {
            Slot::Scalar(p) => vec![p],
            Slot::Collection(items) => items,
        }
    }

    /// for a collection, this is the logical OR over its items
    pub fn is_reliable(&self) -> bool {
        self.items().iter().any(|p| p.is_reliable())
    }

    /// for a collection, this is the logical OR over its items
    pub fn drop_reliable_data_if_newer_exists(&self) -> bool {
        self.items().iter().any(|p| p.drop_reliable_data_if_newer_exists())
    }

    /// Add a value that is newer than the slot's current content: a scalar is overwritten,
    ///  a collection is appended to
    pub fn push(&mut self, payload: P) {
        match self {
            Slot::Scalar(p) => *p = payload,
            Slot::Collection(items) => items.push(payload),
        }
    }

    /// Append the items of another collection slot. For a scalar slot, the existing value
    ///  is kept.
    pub fn append(&mut self, other: Slot<P>) {
        if let Slot::Collection(items) = self {
            items.extend(other.into_items());
        }
    }

    /// A scalar slot is a single length-prefixed body, a collection slot is a `u16` item
    ///  count followed by that many length-prefixed bodies.
    pub fn ser(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        match self {
            Slot::Scalar(p) => put_framed(buf, |b| p.ser(b)),
            Slot::Collection(items) => {
                if items.len() > u16::MAX as usize {
                    bail!("collection of {} items exceeds the maximum of {}", items.len(), u16::MAX);
                }
                buf.put_u16(items.len().prechecked_cast());
                for item in items {
                    put_framed(buf, |b| item.ser(b))?;
                }
                Ok(())
            }
        }
    }

    pub fn deser(kind: P::Kind, buf: &mut &[u8]) -> anyhow::Result<Slot<P>> {
        if kind.flags().is_collection {
            let num_items = bytes::Buf::try_get_u16(buf)?;
            let mut items = Vec::new();
            for _ in 0..num_items {
                let mut body = try_get_frame(buf)?;
                items.push(P::deser(kind, &mut body)?);
            }
            Ok(Slot::Collection(items))
        }
        else {
            let mut body = try_get_frame(buf)?;
            Ok(Slot::Scalar(P::deser(kind, &mut body)?))
        }
    }
}
