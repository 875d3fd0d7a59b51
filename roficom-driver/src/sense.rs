//! Orientation sensing

use roficom_core::Orientation;

/// Level of a sense pin sampled with alternating pull resistors
///
/// A pin that follows both the pull-up and the pull-down floats. Otherwise the mating
/// connector drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinState {
    Float,
    High,
    Low,
}

impl PinState {
    /// Classifies a pin from its readings under pull-up and pull-down.
    pub fn from_readings(with_pull_up: bool, with_pull_down: bool) -> Self {
        match (with_pull_up, with_pull_down) {
            (false, _) => PinState::Low,
            (true, true) => PinState::High,
            (true, false) => PinState::Float,
        }
    }
}

/// Decodes the relative orientation from the two sense pins.
///
/// Pin A takes precedence. Both pins floating means no mating connector.
pub fn detect_orientation(sense_a: PinState, sense_b: PinState) -> Option<Orientation> {
    match (sense_a, sense_b) {
        (PinState::High, _) => Some(Orientation::North),
        (PinState::Low, _) => Some(Orientation::West),
        (PinState::Float, PinState::High) => Some(Orientation::South),
        (PinState::Float, PinState::Low) => Some(Orientation::East),
        (PinState::Float, PinState::Float) => None,
    }
}
