//! Decoding of reassembled attribute lists into the discovery database.
//!
//! A complete attribute response is one data element sequence per record, each containing
//! `(attribute ID, value)` element pairs. Values can themselves be sequences, so decoding is
//! recursive; the nesting depth is capped at [`MAX_NEST_LEVELS`], past which a subtree is
//! dropped (but the stream position stays consistent).
//!
//! [`MAX_NEST_LEVELS`]: ../constant.MAX_NEST_LEVELS.html

use super::data_element::{DataElementHeader, ElementType};
use super::db::{self, DiscoveryDb};
use super::{
    ATTR_ID_ADDITIONAL_PROTO_DESC_LISTS, ATTR_ID_PROTOCOL_DESC_LIST, ATTR_LEN_MASK,
    MAX_NEST_LEVELS,
};
use crate::bytes::{ByteReader, FromBytes};
use crate::device_address::DeviceAddress;
use crate::uuid::Uuid128;
use crate::Error;

/// Nesting position of the element currently being decoded.
///
/// Besides the depth, this carries whether the element sits below an
/// AdditionalProtocolDescriptorLists attribute, which changes how nested 2-byte unsigned ints
/// are interpreted (see [`add_attr`]).
#[derive(Copy, Clone)]
struct NestLevel {
    depth: u8,
    in_additional_list: bool,
}

impl NestLevel {
    fn root() -> Self {
        NestLevel {
            depth: 0,
            in_additional_list: false,
        }
    }

    fn too_deep(self) -> bool {
        self.depth >= MAX_NEST_LEVELS
    }

    fn deeper(self) -> Self {
        NestLevel {
            depth: self.depth + 1,
            ..self
        }
    }
}

/// Decodes one record's attribute sequence from `r` into a fresh record in `db`.
///
/// On success the reader is positioned just past the sequence. On any failure (a malformed
/// element stream or an exhausted database) the partially decoded record stays linked and
/// readable, and the caller terminates the discovery.
pub(crate) fn save_attr_seq(
    db: &mut DiscoveryDb<'_>,
    bda: &DeviceAddress,
    r: &mut ByteReader<'_>,
) -> Result<(), Error> {
    let hdr = DataElementHeader::from_bytes(r)?;
    if hdr.ty != ElementType::Sequence {
        warn!("SDP - wrong type 0x{:02x} in attr rsp", u8::from(hdr.ty));
        return Err(Error::InvalidValue);
    }
    let mut seq = r.take(hdr.len as usize)?;

    let rec = db.add_record(bda).ok_or(Error::DbFull)?;

    while !seq.is_empty() {
        // First get the attribute ID.
        let id_hdr = DataElementHeader::from_bytes(&mut seq)?;
        if id_hdr.ty != ElementType::UnsignedInt || id_hdr.len != 2 {
            warn!(
                "SDP - bad attr ID element: type 0x{:02x}, len {}",
                u8::from(id_hdr.ty),
                id_hdr.len
            );
            return Err(Error::InvalidValue);
        }
        let attr_id = seq.read_u16_be()?;

        // Now, add the attribute value.
        add_attr(&mut seq, db, rec, attr_id, None, NestLevel::root())?;
    }

    Ok(())
}

/// Decodes one value element into an attribute node linked under `parent` (or under the record
/// when `parent` is `None`), recursing into container elements.
///
/// The element's wire extent is consumed even when its value is dropped (bad UUID or boolean
/// width, nesting past the cap). A depth-capped container keeps its already-allocated node
/// unlinked; the arena never rewinds.
fn add_attr(
    r: &mut ByteReader<'_>,
    db: &mut DiscoveryDb<'_>,
    rec: u32,
    attr_id: u16,
    parent: Option<u32>,
    nest: NestLevel,
) -> Result<(), Error> {
    let hdr = DataElementHeader::from_bytes(r)?;
    let attr_len = (hdr.len & u32::from(ATTR_LEN_MASK)) as usize;
    let len_type = attr_len as u16 | (u16::from(hdr.ty.class_bits()) << 12);
    // Bytes that must remain in `r` once this element's extent is consumed.
    let end_left = r.bytes_left() - attr_len;

    // Sized for an inline value even when the element is a container that will only take a
    // node header.
    if db.free_bytes() < db::attr_alloc_size(attr_len) {
        return Err(Error::DbFull);
    }

    match hdr.ty {
        ElementType::UnsignedInt if nest.in_additional_list && attr_len == 2 => {
            let id = r.read_u16_be()?;
            if id == ATTR_ID_PROTOCOL_DESC_LIST {
                // Inside an additional-lists subtree, a protocol descriptor list announces
                // itself as a bare 16-bit integer. Re-tag it: synthesize a container and decode
                // the following element as the list it introduces. The re-tag applies once; the
                // list's own elements decode normally.
                let seq_len_type = u16::from(ElementType::Sequence.class_bits()) << 12;
                let node = db.alloc_attr(attr_id, seq_len_type, 0).ok_or(Error::DbFull)?;
                db.begin_child_list(node);
                if nest.too_deep() {
                    error!("SDP - attr nesting too deep");
                    skip_to(r, end_left);
                    return Ok(());
                }
                let child_nest = NestLevel {
                    depth: nest.depth + 1,
                    in_additional_list: false,
                };
                add_attr(r, db, rec, ATTR_ID_PROTOCOL_DESC_LIST, Some(node), child_nest)?;
                db.link_attr(rec, parent, node);
            } else {
                // A plain 16-bit integer after all.
                let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
                db.set_value_u16(node, id);
                db.link_attr(rec, parent, node);
            }
        }

        ElementType::UnsignedInt | ElementType::SignedInt => {
            let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
            match attr_len {
                1 => db.set_value_u8(node, r.read_u8()?),
                2 => db.set_value_u16(node, r.read_u16_be()?),
                4 => db.set_value_u32(node, r.read_u32_be()?),
                n => db.set_value_bytes(node, r.read_slice(n)?),
            }
            db.link_attr(rec, parent, node);
        }

        ElementType::Uuid => match attr_len {
            2 => {
                let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
                db.set_value_u16(node, r.read_u16_be()?);
                db.link_attr(rec, parent, node);
            }
            4 => {
                let value = r.read_u32_be()?;
                let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
                if value < 0x10000 {
                    db.set_len_type(node, 2 | (u16::from(hdr.ty.class_bits()) << 12));
                    db.set_value_u16(node, value as u16);
                } else {
                    db.set_value_u32(node, value);
                }
                db.link_attr(rec, parent, node);
            }
            16 => {
                let bytes = r.read_bytes::<16>()?;
                let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
                if Uuid128::from_bytes(bytes).is_base_alias() {
                    // Normalize a Base UUID alias down to its 16- or 32-bit form.
                    if bytes[0] == 0 && bytes[1] == 0 {
                        db.set_len_type(node, 2 | (u16::from(hdr.ty.class_bits()) << 12));
                        db.set_value_u16(node, u16::from_be_bytes([bytes[2], bytes[3]]));
                    } else {
                        db.set_len_type(node, 4 | (u16::from(hdr.ty.class_bits()) << 12));
                        db.set_value_u32(node, u32::from_be_bytes([
                            bytes[0], bytes[1], bytes[2], bytes[3],
                        ]));
                    }
                } else {
                    db.set_value_bytes(node, &bytes);
                }
                db.link_attr(rec, parent, node);
            }
            n => {
                warn!("SDP - bad len in UUID attr: {}", n);
                skip_to(r, end_left);
            }
        },

        ElementType::Boolean => match attr_len {
            1 => {
                let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
                db.set_value_u8(node, r.read_u8()?);
                db.link_attr(rec, parent, node);
            }
            n => {
                warn!("SDP - bad len in boolean attr: {}", n);
                skip_to(r, end_left);
            }
        },

        ElementType::TextString | ElementType::Url => {
            let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
            db.set_value_bytes(node, r.read_slice(attr_len)?);
            db.link_attr(rec, parent, node);
        }

        ElementType::Sequence | ElementType::Alternative => {
            let node = db.alloc_attr(attr_id, len_type, 0).ok_or(Error::DbFull)?;
            db.begin_child_list(node);
            if nest.too_deep() {
                error!("SDP - attr nesting too deep");
                skip_to(r, end_left);
                return Ok(());
            }
            let mut child_nest = nest.deeper();
            if nest.in_additional_list || attr_id == ATTR_ID_ADDITIONAL_PROTO_DESC_LISTS {
                child_nest.in_additional_list = true;
            }
            while r.bytes_left() > end_left {
                add_attr(r, db, rec, 0, Some(node), child_nest)?;
            }
            db.link_attr(rec, parent, node);
        }

        _ => {
            // Nil or an unassigned element class: keep the node, skip the value bytes.
            let node = db.alloc_attr(attr_id, len_type, attr_len).ok_or(Error::DbFull)?;
            skip_to(r, end_left);
            db.link_attr(rec, parent, node);
        }
    }

    Ok(())
}

/// Advances `r` until `end_left` bytes remain, ie. to the end of the current element's extent.
///
/// Does nothing if a nested decode already consumed past that point.
fn skip_to(r: &mut ByteReader<'_>, end_left: usize) {
    let left = r.bytes_left();
    if left > end_left {
        // Cannot fail, `end_left` was derived from an in-bounds length.
        let _ = r.skip(left - end_left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::db::{AttrValue, Attribute, ATTR_SIZE, REC_SIZE};
    use crate::uuid::{Uuid16, Uuid32};
    use std::vec::Vec;

    fn bda() -> DeviceAddress {
        DeviceAddress::new([0x5a, 0x92, 0x04, 0x26, 0xc6, 0x88])
    }

    fn decode<'a>(db: &mut DiscoveryDb<'a>, bytes: &[u8]) -> Result<(), Error> {
        let mut r = ByteReader::new(bytes);
        save_attr_seq(db, &bda(), &mut r)
    }

    /// Wraps attribute pairs into a record sequence element.
    fn record_seq(body: &[u8]) -> Vec<u8> {
        let mut seq = vec![0x35, body.len() as u8];
        seq.extend_from_slice(body);
        seq
    }

    #[test]
    fn single_attribute_record() {
        let mut mem = [0; 64];
        let mut db = DiscoveryDb::new(&mut mem);
        // ServiceClassIDList = UUID16 0x1101
        decode(&mut db, &record_seq(&[0x09, 0x00, 0x01, 0x19, 0x11, 0x01])).unwrap();

        let rec = db.records().next().unwrap();
        assert_eq!(rec.remote_address(), bda());
        let attr = rec.attribute(0x0001).unwrap();
        assert_eq!(attr.elem_type(), ElementType::Uuid);
        assert!(matches!(attr.value(), AttrValue::Uuid16(Uuid16(0x1101))));
    }

    #[test]
    fn rejects_non_sequence_payload() {
        let mut mem = [0; 64];
        let mut db = DiscoveryDb::new(&mut mem);
        assert_eq!(decode(&mut db, &[0x09, 0x00, 0x01]), Err(Error::InvalidValue));
        assert_eq!(db.records().count(), 0);
    }

    #[test]
    fn rejects_bad_attr_id_element() {
        let mut mem = [0; 64];
        let mut db = DiscoveryDb::new(&mut mem);
        // The ID element must be a 2-byte unsigned int; this one is 1 byte.
        assert_eq!(
            decode(&mut db, &record_seq(&[0x08, 0x01, 0x19, 0x11, 0x01])),
            Err(Error::InvalidValue)
        );
    }

    #[test]
    fn wide_integers_are_stored_as_bytes() {
        let mut mem = [0; 64];
        let mut db = DiscoveryDb::new(&mut mem);
        decode(
            &mut db,
            &record_seq(&[0x09, 0x03, 0x00, 0x0b, 1, 2, 3, 4, 5, 6, 7, 8]),
        )
        .unwrap();

        let attr = db.records().next().unwrap().attribute(0x0300).unwrap();
        assert_eq!(attr.value_len(), 8);
        assert!(matches!(attr.value(), AttrValue::Bytes(&[1, 2, 3, 4, 5, 6, 7, 8])));
    }

    #[test]
    fn uuid_normalization() {
        let mut mem = [0; 256];
        let mut db = DiscoveryDb::new(&mut mem);

        let mut body = vec![];
        // 32-bit UUID that fits in 16 bits.
        body.extend_from_slice(&[0x09, 0x00, 0x01, 0x1a, 0x00, 0x00, 0x11, 0x0b]);
        // 128-bit Base UUID alias of 0x1101.
        body.extend_from_slice(&[0x09, 0x00, 0x02, 0x1c]);
        body.extend_from_slice(Uuid128::from(Uuid16(0x1101)).as_bytes());
        // 128-bit Base UUID alias needing 32 bits.
        body.extend_from_slice(&[0x09, 0x00, 0x03, 0x1c]);
        body.extend_from_slice(Uuid128::from(Uuid32(0x0012_3456)).as_bytes());
        // 128-bit UUID that is no alias.
        let custom = [
            0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        body.extend_from_slice(&[0x09, 0x00, 0x04, 0x1c]);
        body.extend_from_slice(&custom);

        decode(&mut db, &record_seq(&body)).unwrap();
        let rec = db.records().next().unwrap();

        assert!(matches!(
            rec.attribute(0x0001).unwrap().value(),
            AttrValue::Uuid16(Uuid16(0x110b))
        ));
        assert!(matches!(
            rec.attribute(0x0002).unwrap().value(),
            AttrValue::Uuid16(Uuid16(0x1101))
        ));
        assert!(matches!(
            rec.attribute(0x0003).unwrap().value(),
            AttrValue::Uuid32(Uuid32(0x0012_3456))
        ));
        match rec.attribute(0x0004).unwrap().value() {
            AttrValue::Uuid128(u) => assert_eq!(*u.as_bytes(), custom),
            _ => panic!("expected full-width UUID"),
        }
    }

    #[test]
    fn invalid_value_widths_drop_the_node_only() {
        let mut mem = [0; 128];
        let mut db = DiscoveryDb::new(&mut mem);
        let mut body = vec![];
        // Boolean of length 2 (invalid), then a valid u8 attribute.
        body.extend_from_slice(&[0x09, 0x00, 0x05, 0x29, 0x01, 0x00]);
        body.extend_from_slice(&[0x09, 0x00, 0x08, 0x08, 0x2a]);

        decode(&mut db, &record_seq(&body)).unwrap();
        let rec = db.records().next().unwrap();
        assert!(rec.attribute(0x0005).is_none());
        assert!(matches!(rec.attribute(0x0008).unwrap().value(), AttrValue::U8(0x2a)));
    }

    #[test]
    fn nesting_is_capped_at_five_levels() {
        let mut mem = [0; 512];
        let mut db = DiscoveryDb::new(&mut mem);

        // Seven nested sequences; the innermost two levels must be dropped.
        let mut seq = vec![0x35, 0x00];
        for _ in 0..6 {
            let mut outer = vec![0x35, seq.len() as u8];
            outer.extend_from_slice(&seq);
            seq = outer;
        }
        let mut body = vec![0x09, 0x01, 0x00];
        body.extend_from_slice(&seq);
        decode(&mut db, &record_seq(&body)).unwrap();

        let rec = db.records().next().unwrap();
        let mut depth = 0;
        let mut attr: Option<Attribute<'_, '_>> = rec.attribute(0x0100);
        while let Some(a) = attr {
            assert_eq!(a.elem_type(), ElementType::Sequence);
            depth += 1;
            attr = match a.value() {
                AttrValue::Sequence(mut children) => children.next(),
                _ => None,
            };
        }
        assert_eq!(depth, 5);
    }

    #[test]
    fn additional_protocol_lists_retag() {
        let mut mem = [0; 256];
        let mut db = DiscoveryDb::new(&mut mem);

        // AdditionalProtocolDescriptorLists = SEQ{ SEQ{ UINT16 0x0004, UUID16 0x0100 } }
        let body = [
            0x09, 0x00, 0x0d, // attr ID 0x000D
            0x35, 0x08, // outer list-of-lists
            0x35, 0x06, // one protocol descriptor list
            0x09, 0x00, 0x04, // announces itself as UINT16 0x0004
            0x19, 0x01, 0x00, // L2CAP
        ];
        decode(&mut db, &record_seq(&body)).unwrap();

        let rec = db.records().next().unwrap();
        let lists = rec.attribute(0x000d).unwrap();
        assert_eq!(lists.elem_type(), ElementType::Sequence);

        let inner = match lists.value() {
            AttrValue::Sequence(mut c) => c.next().unwrap(),
            _ => panic!("expected list-of-lists"),
        };
        assert_eq!(inner.id(), 0);

        // The bare UINT16 was consumed as a re-tag: the synthetic container's child carries
        // the ProtocolDescriptorList attribute ID.
        let container = match inner.value() {
            AttrValue::Sequence(mut c) => c.next().unwrap(),
            _ => panic!("expected container"),
        };
        assert_eq!(container.elem_type(), ElementType::Sequence);
        let retagged = match container.value() {
            AttrValue::Sequence(mut c) => c.next().unwrap(),
            _ => panic!("expected re-tagged child"),
        };
        assert_eq!(retagged.id(), ATTR_ID_PROTOCOL_DESC_LIST);
        assert!(matches!(retagged.value(), AttrValue::Uuid16(Uuid16(0x0100))));
    }

    #[test]
    fn plain_u16_below_additional_lists_is_kept() {
        let mut mem = [0; 256];
        let mut db = DiscoveryDb::new(&mut mem);

        // Same shape, but the nested integer is not 0x0004.
        let body = [
            0x09, 0x00, 0x0d, 0x35, 0x05, 0x35, 0x03, 0x09, 0x12, 0x34,
        ];
        decode(&mut db, &record_seq(&body)).unwrap();

        let rec = db.records().next().unwrap();
        let lists = rec.attribute(0x000d).unwrap();
        let inner = match lists.value() {
            AttrValue::Sequence(mut c) => c.next().unwrap(),
            _ => panic!("expected list-of-lists"),
        };
        let child = match inner.value() {
            AttrValue::Sequence(mut c) => c.next().unwrap(),
            _ => panic!("expected child"),
        };
        assert!(matches!(child.value(), AttrValue::U16(0x1234)));
    }

    #[test]
    fn db_overflow_keeps_partial_record() {
        let mut mem = [0; REC_SIZE + 2 * ATTR_SIZE];
        let mut db = DiscoveryDb::new(&mut mem);

        let mut body = vec![];
        for id in 1u8..=5 {
            body.extend_from_slice(&[0x09, 0x00, id, 0x08, id]);
        }
        assert_eq!(decode(&mut db, &record_seq(&body)), Err(Error::DbFull));

        // The first record and two attributes remain readable and well-linked.
        let rec = db.records().next().unwrap();
        let attrs: Vec<_> = rec.attributes().collect();
        assert_eq!(attrs.len(), 2);
        assert!(matches!(attrs[0].value(), AttrValue::U8(1)));
        assert!(matches!(attrs[1].value(), AttrValue::U8(2)));
        assert_eq!(db.free_bytes(), 0);
    }

    #[test]
    fn truncated_element_is_an_error() {
        let mut mem = [0; 64];
        let mut db = DiscoveryDb::new(&mut mem);
        // Value element declares 4 bytes but the sequence only holds 1.
        assert_eq!(
            decode(&mut db, &record_seq(&[0x09, 0x00, 0x01, 0x0a, 0xff])),
            Err(Error::InvalidLength)
        );
    }
}
