//! Service and protocol UUIDs.
//!
//! SDP transmits UUIDs in three widths. The 16- and 32-bit forms are aliases: placing one in
//! the leading four bytes of the Bluetooth Base UUID (`00000000-0000-1000-8000-00805F9B34FB`)
//! yields its canonical 128-bit value, with a 16-bit alias zero-extended to 32 bits first.
//! Well-known services and protocols fit in 16 bits; the full width only shows up for
//! vendor-defined services.
//!
//! The discovery decoder normalizes in the opposite direction: a received 128-bit UUID whose
//! tail matches the Base UUID is stored as its shortest alias. This is one-way; the width a
//! value had on the wire is not recoverable afterwards.

use crate::{bytes::*, Error};
use core::fmt;

const BASE_UUID: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34,
    0xfb,
];

/// A 16-bit alias of a Base UUID entry.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid16(pub u16);

/// A 32-bit alias of a Base UUID entry.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid32(pub u32);

/// A UUID in its full 128-bit form.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid128([u8; 16]);

impl Uuid128 {
    /// Wraps 16 bytes in transmission (big-endian) order.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The bytes of this UUID in transmission order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns whether this UUID is an alias of the Bluetooth Base UUID.
    ///
    /// A Base UUID alias carries all its information in the leading 4 bytes; the trailing 12
    /// bytes equal the Base UUID's. Such a UUID can be stored as a [`Uuid16`] or [`Uuid32`]
    /// without loss.
    ///
    /// [`Uuid16`]: struct.Uuid16.html
    /// [`Uuid32`]: struct.Uuid32.html
    pub fn is_base_alias(&self) -> bool {
        self.0[4..] == BASE_UUID[4..]
    }
}

impl From<Uuid16> for Uuid32 {
    fn from(smol: Uuid16) -> Self {
        Uuid32(smol.0.into())
    }
}

impl From<Uuid16> for Uuid128 {
    fn from(uuid: Uuid16) -> Self {
        Uuid32::from(uuid).into()
    }
}

impl From<Uuid32> for Uuid128 {
    fn from(uuid: Uuid32) -> Self {
        let mut buf = BASE_UUID;
        buf[..4].copy_from_slice(&uuid.0.to_be_bytes());
        Uuid128(buf)
    }
}

impl ToBytes for Uuid16 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_u16_be(self.0)
    }
}

impl ToBytes for Uuid32 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_u32_be(self.0)
    }
}

impl ToBytes for Uuid128 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_slice(&self.0)
    }
}

impl FromBytes<'_> for Uuid16 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Uuid16(bytes.read_u16_be()?))
    }
}

impl FromBytes<'_> for Uuid32 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Uuid32(bytes.read_u32_be()?))
    }
}

impl FromBytes<'_> for Uuid128 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Uuid128(bytes.read_bytes()?))
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({:04x})", self.0)
    }
}

impl fmt::Debug for Uuid32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid32({:08x})", self.0)
    }
}

impl fmt::Debug for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical 8-4-4-4-12 grouping; a dash goes in front of bytes 4, 6, 8 and 10.
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl defmt::Format for Uuid16 {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "Uuid16({=u16:04x})", self.0);
    }
}

impl defmt::Format for Uuid32 {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "Uuid32({=u32:08x})", self.0);
    }
}

impl defmt::Format for Uuid128 {
    fn format(&self, f: defmt::Formatter<'_>) {
        // Same canonical grouping as the Debug impl, carved out of two 64-bit halves.
        let mut half = [0; 8];
        half.copy_from_slice(&self.0[..8]);
        let hi = u64::from_be_bytes(half);
        half.copy_from_slice(&self.0[8..]);
        let lo = u64::from_be_bytes(half);

        defmt::write!(
            f,
            "{=u32:08x}-{=u16:04x}-{=u16:04x}-{=u16:04x}-{=u64:012x}",
            (hi >> 32) as u32,
            (hi >> 16) as u16,
            hi as u16,
            (lo >> 48) as u16,
            lo & 0x0000_ffff_ffff_ffff,
        );
    }
}

/// A UUID of any of the supported widths, as used in discovery request filters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum Uuid {
    Uuid16(Uuid16),
    Uuid32(Uuid32),
    Uuid128(Uuid128),
}

impl Uuid {
    /// Returns the encoded length of this UUID in bytes (2, 4 or 16).
    pub fn len(&self) -> usize {
        match self {
            Uuid::Uuid16(_) => 2,
            Uuid::Uuid32(_) => 4,
            Uuid::Uuid128(_) => 16,
        }
    }
}

impl From<Uuid16> for Uuid {
    fn from(uuid: Uuid16) -> Self {
        Uuid::Uuid16(uuid)
    }
}

impl From<Uuid32> for Uuid {
    fn from(uuid: Uuid32) -> Self {
        Uuid::Uuid32(uuid)
    }
}

impl From<Uuid128> for Uuid {
    fn from(uuid: Uuid128) -> Self {
        Uuid::Uuid128(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt() {
        // Check that all leading 0s are printed.
        let uuid = Uuid128::from_bytes([
            0x02, 0x3e, 0x45, 0x67, 0x08, 0x9b, 0x02, 0xd3, 0x04, 0x56, 0x00, 0x66, 0x14, 0x17,
            0x40, 0x00,
        ]);

        assert_eq!(
            format!("{:?}", uuid),
            "023e4567-089b-02d3-0456-006614174000"
        );
    }

    #[test]
    fn convert() {
        let uuid = 0x1101; // Serial Port Profile
        let uuid = Uuid128::from(Uuid16(uuid));

        assert_eq!(
            format!("{:?}", uuid),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn base_alias() {
        assert!(Uuid128::from(Uuid16(0x110b)).is_base_alias());
        assert!(Uuid128::from(Uuid32(0x12345678)).is_base_alias());

        let mut bytes = *Uuid128::from(Uuid16(0x110b)).as_bytes();
        bytes[15] ^= 0x01;
        assert!(!Uuid128::from_bytes(bytes).is_base_alias());
    }

    #[test]
    fn wire_roundtrip() {
        let mut buf = [0; 2];
        Uuid16(0x1101).to_bytes(&mut ByteWriter::new(&mut buf)).unwrap();
        assert_eq!(buf, [0x11, 0x01]);
        assert_eq!(
            Uuid16::from_bytes(&mut ByteReader::new(&buf)),
            Ok(Uuid16(0x1101))
        );
    }
}
