//! Channel position mapping
//!
//! Senders describe their layout with a speaker bitmask (bit 0 front-left up
//! to bit 10 side-right). Wire channel N plays on the Nth set bit, scanned
//! from the least significant end.

/// Highest mask bit that names a speaker position
const LAST_POSITION_BIT: usize = 10;

/// Logical speaker position of a wire channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelRole {
    FrontLeft = 0,
    FrontRight = 1,
    FrontCenter = 2,
    LowFrequency = 3,
    RearLeft = 4,
    RearRight = 5,
    FrontLeftOfCenter = 6,
    FrontRightOfCenter = 7,
    RearCenter = 8,
    SideLeft = 9,
    SideRight = 10,
    Mono = 11,
    /// No mask bit left for this channel; played as center
    CenterFallback = 12,
}

const POSITIONS: [ChannelRole; LAST_POSITION_BIT + 1] = [
    ChannelRole::FrontLeft,
    ChannelRole::FrontRight,
    ChannelRole::FrontCenter,
    ChannelRole::LowFrequency,
    ChannelRole::RearLeft,
    ChannelRole::RearRight,
    ChannelRole::FrontLeftOfCenter,
    ChannelRole::FrontRightOfCenter,
    ChannelRole::RearCenter,
    ChannelRole::SideLeft,
    ChannelRole::SideRight,
];

const NAMES: [&str; 13] = [
    "Front Left",
    "Front Right",
    "Front Center",
    "LFE / Subwoofer",
    "Rear Left",
    "Rear Right",
    "Front-Left Center",
    "Front-Right Center",
    "Rear Center",
    "Side Left",
    "Side Right",
    "Mono",
    "Unknown (center)",
];

/// Short port-style names
const PORT_NAMES: [&str; 13] = [
    "FL", "FR", "FC", "LFE", "RL", "RR", "FLC", "FRC", "RC", "SL", "SR", "MONO", "FC",
];

impl ChannelRole {
    /// Role for a mask bit, if the bit names a position
    pub fn from_bit(bit: usize) -> Option<Self> {
        POSITIONS.get(bit).copied()
    }

    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    pub fn port_name(self) -> &'static str {
        PORT_NAMES[self as usize]
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Assign a role to each of `channels` wire channels from `channel_mask`.
///
/// The scan cursor only moves forward, so roles come out in mask bit order.
/// Once the mask runs out every remaining channel gets
/// [`ChannelRole::CenterFallback`]. Two masks can therefore produce the same
/// assignment.
pub fn map_channels(channels: u8, channel_mask: u16) -> Vec<ChannelRole> {
    if channels == 1 {
        return vec![ChannelRole::Mono];
    }

    let mut roles = Vec::with_capacity(channels as usize);
    let mut next_bit = 0usize;
    for _ in 0..channels {
        let found = (next_bit..=LAST_POSITION_BIT).find(|&bit| channel_mask & (1 << bit) != 0);
        match found {
            Some(bit) => {
                roles.push(POSITIONS[bit]);
                next_bit = bit + 1;
            }
            None => {
                roles.push(ChannelRole::CenterFallback);
                next_bit = LAST_POSITION_BIT + 1;
            }
        }
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mono_ignores_mask() {
        assert_eq!(map_channels(1, 0), vec![ChannelRole::Mono]);
        assert_eq!(map_channels(1, 0x0003), vec![ChannelRole::Mono]);
        assert_eq!(map_channels(1, 0xffff), vec![ChannelRole::Mono]);
    }

    #[test]
    fn test_stereo() {
        assert_eq!(
            map_channels(2, 0x0003),
            vec![ChannelRole::FrontLeft, ChannelRole::FrontRight]
        );
    }

    #[test]
    fn test_eight_channels_in_bit_order() {
        let roles = map_channels(8, 0b0000_0000_1111_1111);
        assert_eq!(
            roles,
            vec![
                ChannelRole::FrontLeft,
                ChannelRole::FrontRight,
                ChannelRole::FrontCenter,
                ChannelRole::LowFrequency,
                ChannelRole::RearLeft,
                ChannelRole::RearRight,
                ChannelRole::FrontLeftOfCenter,
                ChannelRole::FrontRightOfCenter,
            ]
        );
    }

    #[test]
    fn test_mask_exhaustion_falls_back_to_center() {
        assert_eq!(
            map_channels(3, 0b101),
            vec![
                ChannelRole::FrontLeft,
                ChannelRole::FrontCenter,
                ChannelRole::CenterFallback,
            ]
        );
    }

    #[test]
    fn test_fallback_is_sticky() {
        // Bit 2 is never reached again once the cursor ran off the end
        assert_eq!(
            map_channels(4, 0b1),
            vec![
                ChannelRole::FrontLeft,
                ChannelRole::CenterFallback,
                ChannelRole::CenterFallback,
                ChannelRole::CenterFallback,
            ]
        );
    }

    #[test]
    fn test_bits_above_side_right_are_ignored() {
        // 5.1 side layout plus top speakers (bits 11+)
        let roles = map_channels(6, 0x060f | 0xf800);
        assert_eq!(
            roles,
            vec![
                ChannelRole::FrontLeft,
                ChannelRole::FrontRight,
                ChannelRole::FrontCenter,
                ChannelRole::LowFrequency,
                ChannelRole::SideLeft,
                ChannelRole::SideRight,
            ]
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(ChannelRole::LowFrequency.name(), "LFE / Subwoofer");
        assert_eq!(ChannelRole::CenterFallback.port_name(), "FC");
        assert_eq!(ChannelRole::from_bit(10), Some(ChannelRole::SideRight));
        assert_eq!(ChannelRole::from_bit(11), None);
    }

    proptest! {
        #[test]
        fn prop_one_role_per_channel(channels in 0u8..=8, mask in any::<u16>()) {
            prop_assert_eq!(map_channels(channels, mask).len(), channels as usize);
        }

        #[test]
        fn prop_positions_strictly_increase(channels in 2u8..=8, mask in any::<u16>()) {
            let positions: Vec<u8> = map_channels(channels, mask)
                .into_iter()
                .filter(|r| *r != ChannelRole::CenterFallback)
                .map(|r| r as u8)
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
            for p in positions {
                prop_assert!(mask & (1 << p) != 0);
            }
        }
    }
}
