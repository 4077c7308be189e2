//! EDRAM geometry.

/// Size of the EDRAM in bytes.
pub const EDRAM_SIZE_BYTES: u32 = 10 * 1024 * 1024;
/// Number of 1x-scale tiles in EDRAM.
pub const EDRAM_TILE_COUNT: u32 = 2048;
/// Tile width in samples at 1x resolution scale.
pub const TILE_WIDTH_SAMPLES: u32 = 80;
/// Tile height in samples at 1x resolution scale.
pub const TILE_HEIGHT_SAMPLES: u32 = 16;
/// Dwords in one 1x-scale tile.
pub const TILE_DWORDS: u32 = TILE_WIDTH_SAMPLES * TILE_HEIGHT_SAMPLES;
/// Dwords in the whole EDRAM at 1x resolution scale.
pub const EDRAM_DWORDS: u32 = EDRAM_TILE_COUNT * TILE_DWORDS;

const _: () = assert!(EDRAM_DWORDS * 4 == EDRAM_SIZE_BYTES);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MsaaSamples {
    #[default]
    X1,
    X2,
    X4,
}

impl MsaaSamples {
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            4 => Some(Self::X4),
            _ => None,
        }
    }

    pub fn count(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }

    /// Horizontal sample-grid shift: only 4x doubles the width.
    pub fn log2_x(self) -> u32 {
        u32::from(self == Self::X4)
    }

    /// Vertical sample-grid shift: 2x and 4x double the height.
    pub fn log2_y(self) -> u32 {
        u32::from(self != Self::X1)
    }

    /// Dword offset of `sample` from sample 0; `row_dwords` is the scaled tile width.
    pub fn sample_offset(self, sample: u32, row_dwords: u32) -> u32 {
        match self {
            Self::X1 => 0,
            Self::X2 => sample * row_dwords,
            Self::X4 => (sample & 1) + (sample >> 1) * row_dwords,
        }
    }
}

/// Supersampling factor applied to both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolutionScale {
    #[default]
    X1,
    X2,
}

impl ResolutionScale {
    pub fn factor(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
        }
    }

    pub fn log2(self) -> u32 {
        match self {
            Self::X1 => 0,
            Self::X2 => 1,
        }
    }

    /// Scaled tile width in samples (and dwords per tile row).
    pub fn tile_width(self) -> u32 {
        TILE_WIDTH_SAMPLES * self.factor()
    }

    pub fn tile_height(self) -> u32 {
        TILE_HEIGHT_SAMPLES * self.factor()
    }

    pub fn tile_dwords(self) -> u32 {
        TILE_DWORDS * self.factor() * self.factor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_tiles_grow_quadratically() {
        assert_eq!(ResolutionScale::X1.tile_dwords(), 1280);
        assert_eq!(ResolutionScale::X2.tile_dwords(), 5120);
        assert_eq!(ResolutionScale::X2.tile_width(), 160);
    }

    #[test]
    fn sample_offsets_follow_the_sample_grid() {
        let offsets: Vec<u32> = (0..4).map(|i| MsaaSamples::X4.sample_offset(i, 80)).collect();
        assert_eq!(offsets, vec![0, 1, 80, 81]);
        assert_eq!(MsaaSamples::X2.sample_offset(1, 160), 160);
        assert_eq!(MsaaSamples::from_count(3), None);
    }
}
