use core::fmt;

/// A 48-bit Bluetooth device address (BD_ADDR).
///
/// Every discovery record stores the address of the remote device it was read from, so a
/// database that outlives its L2CAP channel still identifies the peer.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Wraps 6 address bytes in HCI order (least significant byte first).
    pub fn new(bytes: [u8; 6]) -> Self {
        DeviceAddress(bytes)
    }

    /// The address bytes, least significant first.
    pub fn raw(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printed most significant byte first, the way address labels show the OUI prefix.
        let [b0, b1, b2, b3, b4, b5] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b5, b4, b3, b2, b1, b0
        )
    }
}

impl defmt::Format for DeviceAddress {
    fn format(&self, f: defmt::Formatter<'_>) {
        let [b0, b1, b2, b3, b4, b5] = self.0;
        defmt::write!(
            f,
            "{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}",
            b5,
            b4,
            b3,
            b2,
            b1,
            b0
        );
    }
}
