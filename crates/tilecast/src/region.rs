bitflags::bitflags! {
    /// The id of the region a [`CompactSpan`](crate::CompactSpan) belongs to.
    ///
    /// Region ids are plain numbers except for the [`RegionId::BORDER_REGION`] bit,
    /// which tags regions painted along the tile border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region.
        const NONE = 0;

        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;

        /// The largest representable region id.
        const MAX = u16::MAX;
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

impl RegionId {
    /// Whether the id is neither [`RegionId::NONE`] nor a border region.
    #[inline]
    pub fn is_walkable_region(&self) -> bool {
        *self != Self::NONE && !self.contains(Self::BORDER_REGION)
    }

    /// Whether the id carries the [`RegionId::BORDER_REGION`] bit.
    #[inline]
    pub fn is_border(&self) -> bool {
        self.contains(Self::BORDER_REGION)
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.bits() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_bit_is_not_a_walkable_region() {
        let border = RegionId::from(3) | RegionId::BORDER_REGION;
        assert!(border.is_border());
        assert!(!border.is_walkable_region());
        assert!(RegionId::from(3).is_walkable_region());
        assert!(!RegionId::NONE.is_walkable_region());
    }
}
