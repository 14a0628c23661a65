//! The SDP data element grammar.
//!
//! Every SDP value is a self-describing *data element*: one descriptor byte, an optional length
//! field, and the payload. The high 5 bits of the descriptor select the element class, the low 3
//! bits a size index. Size indices 0–4 denote fixed widths of 1, 2, 4, 8 and 16 bytes; indices
//! 5–7 announce an explicit 1-, 2- or 4-byte big-endian length field.
//!
//! [`DataElementHeader`] is the single bottleneck through which the decoder learns element
//! extents; its `FromBytes` impl refuses headers whose length field or declared payload would
//! reach past the end of the input. Everything downstream can then consume `len` bytes without
//! further bounds arithmetic.
//!
//! [`DataElementHeader`]: struct.DataElementHeader.html

use crate::{
    bytes::*,
    uuid::Uuid,
    Error,
};

enum_with_unknown! {
    /// The element class carried in the high 5 bits of a descriptor byte.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
    pub enum ElementType(u8) {
        Nil = 0,
        UnsignedInt = 1,
        SignedInt = 2,
        Uuid = 3,
        TextString = 4,
        Boolean = 5,
        Sequence = 6,
        Alternative = 7,
        Url = 8,
    }
}

impl ElementType {
    /// Returns the class folded into the 4 bits a stored attribute descriptor keeps.
    pub(crate) fn class_bits(&self) -> u8 {
        u8::from(*self) & 0x0f
    }
}

pub(crate) const SIZE_TWO_BYTES: u8 = 1;
pub(crate) const SIZE_FOUR_BYTES: u8 = 2;
pub(crate) const SIZE_SIXTEEN_BYTES: u8 = 4;
pub(crate) const SIZE_IN_NEXT_BYTE: u8 = 5;

/// Builds a descriptor byte from an element class and a size index.
pub(crate) fn desc(ty: ElementType, size: u8) -> u8 {
    (u8::from(ty) << 3) | size
}

/// A decoded element descriptor: class plus payload length in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataElementHeader {
    pub ty: ElementType,
    pub len: u32,
}

impl<'a> FromBytes<'a> for DataElementHeader {
    /// Decodes a descriptor byte and its length field.
    ///
    /// Fails with `Error::Eof` when the length field itself is truncated and with
    /// `Error::InvalidLength` when the declared payload reaches past the end of `bytes`. On
    /// success the reader is positioned at the first payload byte and is guaranteed to hold at
    /// least `len` more bytes.
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let desc = bytes.read_u8()?;
        let ty = ElementType::from(desc >> 3);
        let len = match desc & 0x07 {
            0 => 1,
            1 => 2,
            2 => 4,
            3 => 8,
            4 => 16,
            5 => bytes.read_u8()?.into(),
            6 => bytes.read_u16_be()?.into(),
            _ => bytes.read_u32_be()?,
        };

        if len as usize > bytes.bytes_left() {
            return Err(Error::InvalidLength);
        }
        Ok(Self { ty, len })
    }
}

/// Builds the UUID filter sequence of a search request.
///
/// Emits a sequence element with a 1-byte length field, containing one UUID element per filter.
/// `bytes_left` is the request budget for the sequence; when the header does not fit nothing is
/// written, and filters that do not fit are dropped with a log line. The writer is never
/// advanced past the budget.
pub(crate) fn build_uuid_seq(
    writer: &mut ByteWriter<'_>,
    uuids: &[Uuid],
    mut bytes_left: u16,
) -> Result<(), Error> {
    if bytes_left < 2 {
        error!("SDP: no space for UUID sequence header");
        return Ok(());
    }

    writer.write_u8(desc(ElementType::Sequence, SIZE_IN_NEXT_BYTE))?;
    // The length field is patched once the filters are in.
    let len_at = writer.gap(1)?;
    bytes_left -= 2;

    let seq_start = writer.pos();
    for uuid in uuids {
        let elem_len = uuid.len() as u16 + 1;
        if elem_len > bytes_left {
            error!("SDP: too many UUID filters for request buffer");
            break;
        }
        bytes_left -= elem_len;

        match uuid {
            Uuid::Uuid16(u) => {
                writer.write_u8(desc(ElementType::Uuid, SIZE_TWO_BYTES))?;
                u.to_bytes(writer)?;
            }
            Uuid::Uuid32(u) => {
                writer.write_u8(desc(ElementType::Uuid, SIZE_FOUR_BYTES))?;
                u.to_bytes(writer)?;
            }
            Uuid::Uuid128(u) => {
                writer.write_u8(desc(ElementType::Uuid, SIZE_SIXTEEN_BYTES))?;
                u.to_bytes(writer)?;
            }
        }
    }

    writer.patch_u8(len_at, (writer.pos() - seq_start) as u8);
    Ok(())
}

/// Builds the attribute-ID filter sequence of an attribute request.
///
/// An empty `ids` list produces the wildcard range element covering every attribute ID;
/// otherwise each ID becomes a 2-byte unsigned int element.
pub(crate) fn build_attrib_seq(writer: &mut ByteWriter<'_>, ids: &[u16]) -> Result<(), Error> {
    writer.write_u8(desc(ElementType::Sequence, SIZE_IN_NEXT_BYTE))?;

    if ids.is_empty() {
        writer.write_u8(5)?;
        writer.write_u8(desc(ElementType::UnsignedInt, SIZE_FOUR_BYTES))?;
        writer.write_u32_be(0x0000_ffff)?;
    } else {
        writer.write_u8(ids.len() as u8 * 3)?;
        for id in ids {
            writer.write_u8(desc(ElementType::UnsignedInt, SIZE_TWO_BYTES))?;
            writer.write_u16_be(*id)?;
        }
    }
    Ok(())
}
