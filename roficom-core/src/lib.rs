//! RoFICoM core data types
//!
//! This crate provides basic data type definitions shared by the RoFICoM crates.
//! Stack users should not depend on this crate directly. Use `roficom::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Relative rotation of two mated connectors
///
/// The type has explicit numeric encoding matching the orientation field of the connector
/// status word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Orientation {
    North = 0,
    South = 1,
    East = 2,
    West = 3,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::North,
        Orientation::South,
        Orientation::East,
        Orientation::West,
    ];

    pub const fn try_from_u8(code: u8) -> Option<Orientation> {
        if code <= Orientation::West.into_u8() {
            Some(Orientation::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> Orientation {
        match code & 0x3 {
            0 => Orientation::North,
            1 => Orientation::South,
            2 => Orientation::East,
            3 => Orientation::West,
            _ => unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Orientation> for u8 {
    fn from(value: Orientation) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Orientation {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Application-defined tag carried with every packet
///
/// The stack does not interpret the value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContentType(u16);

impl ContentType {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for ContentType {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ContentType> for u16 {
    fn from(value: ContentType) -> Self {
        value.0
    }
}

/// Mechanical position of the connector slider
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorPosition {
    Retracted,
    Extended,
}

/// Power line routed through the connector
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorLine {
    Internal,
    External,
}

/// Connector status word
///
/// Bit layout:
/// * 0: slider expanded
/// * 1: internal power line connected
/// * 2: external power line connected
/// * 8: mating side connected
/// * 9..=10: orientation, valid only with the mating side bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusFlags(u16);

impl StatusFlags {
    pub const NONE: Self = Self(0);
    pub const POSITION_EXPANDED: Self = Self(1 << 0);
    pub const INTERNAL_CONNECTED: Self = Self(1 << 1);
    pub const EXTERNAL_CONNECTED: Self = Self(1 << 2);
    pub const MATING_SIDE: Self = Self(1 << 8);

    const ORIENTATION_SHIFT: u32 = 9;
    const ORIENTATION_MASK: u16 = 0b11 << Self::ORIENTATION_SHIFT;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub const fn position(&self) -> ConnectorPosition {
        if self.contains(Self::POSITION_EXPANDED) {
            ConnectorPosition::Extended
        } else {
            ConnectorPosition::Retracted
        }
    }

    /// Returns the orientation if the mating side is connected.
    pub const fn orientation(&self) -> Option<Orientation> {
        if self.contains(Self::MATING_SIDE) {
            let code = (self.0 & Self::ORIENTATION_MASK) >> Self::ORIENTATION_SHIFT;
            Some(Orientation::from_u8_truncating(code as u8))
        } else {
            None
        }
    }

    /// Sets the mating side bit and the orientation field together.
    pub const fn set_orientation(&mut self, orientation: Option<Orientation>) {
        self.0 &= !Self::ORIENTATION_MASK;
        match orientation {
            Some(orientation) => {
                self.0 |= (orientation.into_u8() as u16) << Self::ORIENTATION_SHIFT;
                self.insert(Self::MATING_SIDE);
            }
            None => self.remove(Self::MATING_SIDE),
        }
    }

    /// Applies `bits` to the positions selected by `mask`
    pub const fn masked_update(&mut self, bits: Self, mask: Self) {
        self.0 = (self.0 & !mask.0) | (bits.0 & mask.0);
    }
}

impl core::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for StatusFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

/// Reasons the connector interrupts the main controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptFlags(u16);

impl InterruptFlags {
    pub const NONE: Self = Self(0);
    pub const CONNECT: Self = Self(1 << 0);
    pub const NEW_BLOB: Self = Self(1 << 1);
    pub const ALL: Self = Self(Self::CONNECT.0 | Self::NEW_BLOB.0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for InterruptFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for InterruptFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_codes() {
        for orientation in Orientation::ALL {
            assert_eq!(
                Orientation::try_from(orientation.into_u8()).ok(),
                Some(orientation)
            );
        }
        assert!(Orientation::try_from(4).is_err());
        assert_eq!(Orientation::from_u8_truncating(6), Orientation::East);
    }

    #[test]
    fn test_status_orientation() {
        let mut flags = StatusFlags::POSITION_EXPANDED;
        assert_eq!(flags.orientation(), None);

        flags.set_orientation(Some(Orientation::West));
        assert_eq!(flags.into_bits(), 0b0111_0000_0001);
        assert_eq!(flags.orientation(), Some(Orientation::West));
        assert_eq!(flags.position(), ConnectorPosition::Extended);

        flags.set_orientation(None);
        assert_eq!(flags, StatusFlags::POSITION_EXPANDED);
    }

    #[test]
    fn test_masked_update() {
        let mut flags = StatusFlags::INTERNAL_CONNECTED;
        flags.masked_update(
            StatusFlags::POSITION_EXPANDED,
            StatusFlags::POSITION_EXPANDED | StatusFlags::INTERNAL_CONNECTED,
        );
        assert_eq!(flags, StatusFlags::POSITION_EXPANDED);

        flags.masked_update(StatusFlags::EXTERNAL_CONNECTED, StatusFlags::NONE);
        assert_eq!(flags, StatusFlags::POSITION_EXPANDED);
    }
}
