use crate::region::RegionId;

/// A walkable span of a [`CompactHeightfield`](crate::CompactHeightfield).
///
/// The four neighbour links and the clearance share one packed word:
/// bits `0..24` hold a 6-bit layer index per direction, bits `24..32` the height.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// Floor of the span, in cells above the field's base.
    pub y: u16,
    /// Region the span was assigned to, [`RegionId::NONE`] until partitioned.
    pub region: RegionId,
    /// Packed neighbour links and height.
    pub data: u32,
}

const LINK_BITS: u32 = 6;
const LINKS_MASK: u32 = 0x00FF_FFFF;
const HEIGHT_SHIFT: u32 = 24;

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            region: RegionId::NONE,
            data: LINKS_MASK,
        }
    }
}

impl CompactSpan {
    pub(crate) const NOT_CONNECTED: u8 = 0x3f;

    #[inline]
    fn link_shift(direction: u8) -> u32 {
        u32::from(direction & 0x3) * LINK_BITS
    }

    /// Links the span to a layer of the neighbouring column in `direction`, or unlinks it.
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = Self::link_shift(direction);
        let layer = neighbor.into().map_or(Self::NOT_CONNECTED, |layer| {
            layer & Self::NOT_CONNECTED
        });
        let mask = u32::from(Self::NOT_CONNECTED) << shift;
        self.data = (self.data & !mask) | (u32::from(layer) << shift);
    }

    /// Layer index of the neighbour in `direction`, if any.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let layer = (self.data >> Self::link_shift(direction)) as u8 & Self::NOT_CONNECTED;
        (layer != Self::NOT_CONNECTED).then_some(layer)
    }

    /// Free space above the span, in cells.
    #[inline]
    pub fn height(&self) -> u8 {
        (self.data >> HEIGHT_SHIFT) as u8
    }

    /// Stores the free space above the span.
    pub fn set_height(&mut self, height: u8) {
        self.data = (self.data & LINKS_MASK) | (u32::from(height) << HEIGHT_SHIFT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_span_has_no_neighbours() {
        let span = CompactSpan::default();
        assert!((0..4).all(|dir| span.con(dir).is_none()));
        assert_eq!(span.height(), 0);
    }

    #[test]
    fn links_and_height_do_not_overlap() {
        let mut span = CompactSpan::default();
        for (dir, layer) in [(0, 1u8), (1, 3), (2, 5), (3, 0)] {
            span.set_con(dir, Some(layer));
        }
        span.set_height(u8::MAX);
        span.set_con(1, None);
        span.set_con(0, Some(2));

        assert_eq!(span.con(0), Some(2));
        assert_eq!(span.con(1), None);
        assert_eq!(span.con(2), Some(5));
        assert_eq!(span.con(3), Some(0));
        assert_eq!(span.height(), u8::MAX);
    }
}
