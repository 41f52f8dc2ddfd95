
use core::fmt;

/// Fixed OUI-style prefix shared by all emulated stations
pub const ADDRESS_PREFIX: [u8; 5] = [0x00, 0x50, 0xc2, 0x85, 0x33];

/// 48-bit MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Derive the address of a node from its identifier
    pub fn from_node(node: u8) -> Self {
        let mut a = [0u8; 6];
        a[..5].copy_from_slice(&ADDRESS_PREFIX);
        a[5] = node;
        MacAddress(a)
    }

    /// Read an address from the first six bytes of a buffer
    pub(crate) fn read(buf: &[u8]) -> Self {
        let mut a = [0u8; 6];
        a.copy_from_slice(&buf[..6]);
        MacAddress(a)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a[0], a[1], a[2], a[3], a[4], a[5])
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
