//! Chunk codecs: how a slice of items becomes one message and back.
//!
//! [`PlainCodec`] ships items as they are. [`PropertyCodec`] implements the
//! extra-property side channel: the bulk items travel with their property
//! handles stripped, and each property kind present in the chunk travels as
//! a [`PropertyBlock`] of chunk-local indices plus values packed in schema
//! order. Decoding first clears the handle of every item in the chunk, then
//! rebuilds properties only for the listed indices from a clean state.

use haloweave_core::{CarriesProperties, CommError, ExtraProperties, PropertyKind, PropertySchema};
use std::marker::PhantomData;
use std::mem;

/// Converts between a chunk of items and its wire form.
pub trait ChunkCodec {
    /// Element type handed to and returned by the transport.
    type Item;
    /// Message payload for one chunk.
    type Wire: Send + 'static;

    /// Approximate size of one item on the wire, used to size chunks.
    fn unit_bytes(&self) -> usize;

    /// Encode a chunk.
    fn encode(&self, items: &[Self::Item]) -> Self::Wire;

    /// Decode a chunk, appending to `out`. Returns the number of items.
    fn decode(&self, wire: Self::Wire, out: &mut Vec<Self::Item>) -> Result<usize, CommError>;
}

/// Ships items by value.
#[derive(Clone, Copy, Debug)]
pub struct PlainCodec<T>(PhantomData<fn() -> T>);

impl<T> PlainCodec<T> {
    /// Codec for `T`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for PlainCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> ChunkCodec for PlainCodec<T> {
    type Item = T;
    type Wire = Vec<T>;

    fn unit_bytes(&self) -> usize {
        mem::size_of::<T>()
    }

    fn encode(&self, items: &[T]) -> Vec<T> {
        items.to_vec()
    }

    fn decode(&self, wire: Vec<T>, out: &mut Vec<T>) -> Result<usize, CommError> {
        let n = wire.len();
        out.extend(wire);
        Ok(n)
    }
}

/// Values of one property kind for the items of a chunk that carry it.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyBlock {
    /// Property kind of every listed item.
    pub kind: PropertyKind,
    /// Chunk-local item indices, ascending.
    pub indices: Vec<u32>,
    /// `indices.len() * field_count(kind)` values, item-major, schema order.
    pub values: Vec<f32>,
}

/// Wire form of a [`PropertyCodec`] chunk.
#[derive(Clone, Debug)]
pub struct PropertyChunk<T> {
    /// Items with property handles stripped.
    pub items: Vec<T>,
    /// One block per property kind present.
    pub blocks: Vec<PropertyBlock>,
    /// Fingerprint of the sender's schema.
    pub schema_fingerprint: u64,
}

/// Ships items together with their extra properties.
#[derive(Clone, Copy, Debug)]
pub struct PropertyCodec<'s, T> {
    schema: &'s PropertySchema,
    _item: PhantomData<fn() -> T>,
}

impl<'s, T> PropertyCodec<'s, T> {
    /// Codec packing properties by `schema`.
    pub fn new(schema: &'s PropertySchema) -> Self {
        Self {
            schema,
            _item: PhantomData,
        }
    }

    fn mismatch(kind: PropertyKind, reason: String) -> CommError {
        CommError::SchemaMismatch { kind, reason }
    }
}

impl<T> ChunkCodec for PropertyCodec<'_, T>
where
    T: CarriesProperties + Clone + Send + 'static,
{
    type Item = T;
    type Wire = PropertyChunk<T>;

    fn unit_bytes(&self) -> usize {
        let widest = PropertyKind::ALL
            .iter()
            .map(|&k| self.schema.field_count(k))
            .max()
            .unwrap_or(0);
        mem::size_of::<T>() + widest * mem::size_of::<f32>()
    }

    fn encode(&self, items: &[T]) -> PropertyChunk<T> {
        let mut bulk = Vec::with_capacity(items.len());
        let mut blocks: Vec<PropertyBlock> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let mut stripped = item.clone();
            if let Some(props) = stripped.take_properties() {
                let kind = props.kind();
                if self.schema.field_count(kind) > 0 {
                    let pos = match blocks.iter().position(|b| b.kind == kind) {
                        Some(pos) => pos,
                        None => {
                            blocks.push(PropertyBlock {
                                kind,
                                indices: Vec::new(),
                                values: Vec::new(),
                            });
                            blocks.len() - 1
                        }
                    };
                    let block = &mut blocks[pos];
                    block.indices.push(i as u32);
                    props.pack_into(self.schema, &mut block.values);
                }
            }
            bulk.push(stripped);
        }
        PropertyChunk {
            items: bulk,
            blocks,
            schema_fingerprint: self.schema.fingerprint(),
        }
    }

    fn decode(&self, wire: PropertyChunk<T>, out: &mut Vec<T>) -> Result<usize, CommError> {
        if wire.schema_fingerprint != self.schema.fingerprint() {
            let kind = wire
                .blocks
                .first()
                .map_or(PropertyKind::Hydro, |b| b.kind);
            return Err(Self::mismatch(
                kind,
                format!(
                    "sender fingerprint {:#x}, receiver {:#x}",
                    wire.schema_fingerprint,
                    self.schema.fingerprint()
                ),
            ));
        }
        let base = out.len();
        let n = wire.items.len();
        out.extend(wire.items.into_iter().map(|mut item| {
            item.set_properties(None);
            item
        }));
        for block in wire.blocks {
            let fields = self.schema.field_count(block.kind);
            if fields == 0 || block.values.len() != block.indices.len() * fields {
                return Err(Self::mismatch(
                    block.kind,
                    format!(
                        "{} values for {} items of {} fields",
                        block.values.len(),
                        block.indices.len(),
                        fields
                    ),
                ));
            }
            for (&slot, values) in block.indices.iter().zip(block.values.chunks(fields)) {
                let slot = slot as usize;
                if slot >= n {
                    return Err(Self::mismatch(
                        block.kind,
                        format!("index {slot} outside chunk of {n}"),
                    ));
                }
                out[base + slot].set_properties(Some(ExtraProperties::unpack(
                    block.kind,
                    self.schema,
                    values,
                )));
            }
        }
        Ok(n)
    }
}
