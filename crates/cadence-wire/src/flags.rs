//! Frame flags for the Cadence wire protocol

/// Frame flags (1 byte)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);

    // Flag bits
    /// Rows include the address column
    pub const ADDRESS_IN_BAND: u8 = 0b0000_0001;
    pub const RESERVED: u8 = 0b1111_1110;

    #[inline]
    pub fn new(bits: u8) -> Self {
        FrameFlags(bits)
    }

    #[inline]
    pub fn address_in_band(self) -> bool {
        self.0 & Self::ADDRESS_IN_BAND != 0
    }

    #[inline]
    pub fn set_address_in_band(&mut self, value: bool) {
        if value {
            self.0 |= Self::ADDRESS_IN_BAND;
        } else {
            self.0 &= !Self::ADDRESS_IN_BAND;
        }
    }

    /// Reserved bits must be zero on the wire.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 & Self::RESERVED == 0
    }
}
