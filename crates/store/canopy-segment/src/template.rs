//! Template records.
//!
//! A template captures the shared shape of a node: its primary type, mixin types, child-node
//! mode and property layout. Nodes with the same shape share one template record, so the
//! encoding is deliberately compact: a 32-bit big-endian header packing four flag bits, a
//! 10-bit mixin count and an 18-bit property count, followed by record ids and property-type
//! bytes in a fixed order.
//!
//! Header bit assignment, from the most significant bit down: `has_primary_type` (bit 31),
//! `has_mixins` (bit 30), `no_children` (bit 29), `many_children` (bit 28), mixin count
//! (bits 27..18), property count (bits 17..0). When neither `no_children` nor `many_children`
//! is set the node has exactly one child and the child's name record id is part of the
//! encoding. At most one of the three child-node modes holds.


use crate::RecordFormatError;
use crate::record_id::{RECORD_ID_BYTES, RawRecordId};
use alloc::vec::Vec;
use derive_more::{Display, From, Into};

/// Largest mixin count the 10-bit header field can carry.
pub const MAX_MIXIN_COUNT: usize = (1 << 10) - 1;

/// Largest property count the 18-bit header field can carry.
pub const MAX_PROPERTY_COUNT: usize = (1 << 18) - 1;

const HAS_PRIMARY_TYPE: u32 = 1 << 31;
const HAS_MIXINS: u32 = 1 << 30;
const NO_CHILDREN: u32 = 1 << 29;
const MANY_CHILDREN: u32 = 1 << 28;

/// Opaque property-type byte.
///
/// The node-type system assigns meaning to the values; the segment store treats them as opaque
/// tags.
#[derive(
    Debug, Display, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, From, Into,
)]
#[repr(transparent)]
pub struct PropertyTypeTag(u8);

impl PropertyTypeTag {
    /// Create new instance
    #[inline]
    pub const fn new(tag: u8) -> Self {
        Self(tag)
    }
}

/// Child-node mode of a template.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChildNodes<R> {
    /// The node has no child nodes
    None,
    /// The node has more than one child node
    Many,
    /// The node has exactly one child node, whose name is behind the record id
    One(R),
}

/// Template of a node, generic over the record id representation.
///
/// The codec operates on [`Template<RawRecordId>`]; resolving reference-table indices into full
/// record identifiers happens in the layer above via [`Template::try_map`].
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Template<R> {
    /// Record id of the primary type name, if any
    pub primary_type: Option<R>,
    /// Record ids of the mixin type names
    pub mixin_types: Vec<R>,
    /// Child-node mode
    pub children: ChildNodes<R>,
    /// Record id of the property-name list; present exactly when properties exist
    pub property_names: Option<R>,
    /// Property-type tags, one per property
    pub property_types: Vec<PropertyTypeTag>,
}

impl<R> Template<R> {
    /// Map the record id representation, short-circuiting on the first error.
    pub fn try_map<T, E>(self, mut f: impl FnMut(R) -> Result<T, E>) -> Result<Template<T>, E> {
        Ok(Template {
            primary_type: self.primary_type.map(&mut f).transpose()?,
            mixin_types: self
                .mixin_types
                .into_iter()
                .map(&mut f)
                .collect::<Result<_, _>>()?,
            children: match self.children {
                ChildNodes::None => ChildNodes::None,
                ChildNodes::Many => ChildNodes::Many,
                ChildNodes::One(id) => ChildNodes::One(f(id)?),
            },
            property_names: self.property_names.map(&mut f).transpose()?,
            property_types: self.property_types,
        })
    }

    /// Pack the 32-bit header for this template.
    ///
    /// Validates the count fields and the property-name consistency; the child-mode invariant
    /// holds by construction.
    pub fn header(&self) -> Result<u32, RecordFormatError> {
        if self.mixin_types.len() > MAX_MIXIN_COUNT {
            return Err(RecordFormatError::TooManyMixins {
                count: self.mixin_types.len(),
            });
        }
        if self.property_types.len() > MAX_PROPERTY_COUNT {
            return Err(RecordFormatError::TooManyProperties {
                count: self.property_types.len(),
            });
        }
        if self.property_names.is_some() != !self.property_types.is_empty() {
            return Err(RecordFormatError::InconsistentTemplate);
        }

        let mut head = self.property_types.len() as u32;
        head |= (self.mixin_types.len() as u32) << 18;
        if self.primary_type.is_some() {
            head |= HAS_PRIMARY_TYPE;
        }
        if !self.mixin_types.is_empty() {
            head |= HAS_MIXINS;
        }
        match &self.children {
            ChildNodes::None => head |= NO_CHILDREN,
            ChildNodes::Many => head |= MANY_CHILDREN,
            ChildNodes::One(_) => {}
        }
        Ok(head)
    }

    /// Record ids of the encoding in their fixed field order.
    pub fn record_ids(&self) -> impl Iterator<Item = &R> {
        self.primary_type
            .iter()
            .chain(&self.mixin_types)
            .chain(match &self.children {
                ChildNodes::One(child_name) => Some(child_name),
                ChildNodes::None | ChildNodes::Many => None,
            })
            .chain(&self.property_names)
    }

    /// Number of record ids in the encoding.
    pub fn record_id_count(&self) -> usize {
        usize::from(self.primary_type.is_some())
            + self.mixin_types.len()
            + usize::from(matches!(&self.children, ChildNodes::One(_)))
            + usize::from(self.property_names.is_some())
    }

    /// Size of the encoding in bytes.
    pub fn encoded_size(&self) -> usize {
        4 + self.record_id_count() * RECORD_ID_BYTES + self.property_types.len()
    }
}

impl Template<RawRecordId> {
    /// Append the encoding to `out`.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), RecordFormatError> {
        let head = self.header()?;
        out.extend_from_slice(&head.to_be_bytes());

        for record_id in self.record_ids() {
            record_id.write(out);
        }
        for property_type in &self.property_types {
            out.push(u8::from(*property_type));
        }

        Ok(())
    }

    /// Decode a template from the start of `bytes`.
    ///
    /// Returns the template together with the number of bytes consumed.
    pub fn read(bytes: &[u8]) -> Result<(Self, usize), RecordFormatError> {
        let raw: [u8; 4] = bytes
            .get(..4)
            .ok_or(RecordFormatError::UnexpectedEnd {
                offset: bytes.len(),
            })?
            .try_into()
            .expect("Slice of exactly 4 bytes; qed");
        let head = u32::from_be_bytes(raw);

        let has_primary_type = head & HAS_PRIMARY_TYPE != 0;
        let has_mixins = head & HAS_MIXINS != 0;
        let no_children = head & NO_CHILDREN != 0;
        let many_children = head & MANY_CHILDREN != 0;
        let mixin_count = ((head >> 18) & 0x3FF) as usize;
        let property_count = (head & 0x3FFFF) as usize;

        if no_children && many_children {
            return Err(RecordFormatError::InvalidTemplateHeader { header: head });
        }
        if has_mixins != (mixin_count > 0) {
            return Err(RecordFormatError::InvalidTemplateHeader { header: head });
        }

        let mut offset = 4;
        let mut read_id = |offset: &mut usize| -> Result<RawRecordId, RecordFormatError> {
            let id = RawRecordId::from_bytes(&bytes[(*offset).min(bytes.len())..])?;
            *offset += RECORD_ID_BYTES;
            Ok(id)
        };

        let primary_type = has_primary_type.then(|| read_id(&mut offset)).transpose()?;
        let mixin_types = (0..mixin_count)
            .map(|_| read_id(&mut offset))
            .collect::<Result<Vec<_>, _>>()?;
        let children = if no_children {
            ChildNodes::None
        } else if many_children {
            ChildNodes::Many
        } else {
            ChildNodes::One(read_id(&mut offset)?)
        };
        let property_names = (property_count > 0).then(|| read_id(&mut offset)).transpose()?;
        let property_types = bytes
            .get(offset..offset + property_count)
            .ok_or(RecordFormatError::UnexpectedEnd { offset })?
            .iter()
            .copied()
            .map(PropertyTypeTag::new)
            .collect();
        offset += property_count;

        Ok((
            Self {
                primary_type,
                mixin_types,
                children,
                property_names,
                property_types,
            },
            offset,
        ))
    }
}
