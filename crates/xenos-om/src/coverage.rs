//! Host sample coverage to Xenos sample coverage.
//!
//! 4x swaps host samples 1 and 2. 2x is rasterized as host 4x, using host samples 0 and 3.

use xenos_shader_ir::{InputRegister, Lane, Operand, ShaderBuilder, Swizzle, Temp};

use crate::edram::MsaaSamples;

/// Lanes of the per-pixel state register shared by all output-merger stages.
pub mod state_lanes {
    use xenos_shader_ir::Lane;

    /// Bits 0..3: live samples. Bits 4..7: samples with a deferred depth/stencil write.
    pub const COVERAGE: Lane = Lane::X;
    /// Color offset of sample 0, without target base or 64bpp scaling.
    pub const COLOR_OFFSET: Lane = Lane::Y;
    /// Depth/stencil address of sample 0.
    pub const DEPTH_ADDRESS: Lane = Lane::Z;
}

pub const COVERAGE_MASK: u32 = 0xF;
pub const PENDING_SHIFT: u32 = 4;

pub fn resolve_coverage(msaa: MsaaSamples, host_mask: u32) -> u32 {
    match msaa {
        MsaaSamples::X1 => 0b0001,
        MsaaSamples::X2 => (host_mask & 1) | ((host_mask >> 2) & 2),
        MsaaSamples::X4 => (host_mask & 0b1001) | ((host_mask << 1) & 4) | ((host_mask >> 1) & 2),
    }
}

/// Writes the resolved coverage of the current pixel to `out.lane`.
pub fn emit_resolve_coverage(b: &mut ShaderBuilder, msaa: MsaaSamples, out: &Temp, lane: Lane) {
    let mask = Operand::input(InputRegister::SampleMask, Swizzle::XXXX);
    match msaa {
        MsaaSamples::X1 => b.mov(out.dst_lane(lane), Operand::u32(0b0001)),
        MsaaSamples::X2 => {
            let t = b.alloc_temp();
            b.ushr(t.dst_x(), mask, Operand::u32(2));
            b.and(t.dst_x(), t.x(), Operand::u32(2));
            b.and(out.dst_lane(lane), mask, Operand::u32(1));
            b.or(out.dst_lane(lane), out.lane(lane), t.x());
        }
        MsaaSamples::X4 => {
            let t = b.alloc_temp();
            b.ishl(t.dst_x(), mask, Operand::u32(1));
            b.and(t.dst_x(), t.x(), Operand::u32(4));
            b.ushr(t.dst_y(), mask, Operand::u32(1));
            b.and(t.dst_y(), t.y(), Operand::u32(2));
            b.and(out.dst_lane(lane), mask, Operand::u32(0b1001));
            b.or(out.dst_lane(lane), out.lane(lane), t.x());
            b.or(out.dst_lane(lane), out.lane(lane), t.y());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_samples_swap_the_middle_pair() {
        assert_eq!(resolve_coverage(MsaaSamples::X4, 0b0010), 0b0100);
        assert_eq!(resolve_coverage(MsaaSamples::X4, 0b0100), 0b0010);
        assert_eq!(resolve_coverage(MsaaSamples::X4, 0b1001), 0b1001);
        assert_eq!(resolve_coverage(MsaaSamples::X4, 0b1111), 0b1111);
    }

    #[test]
    fn two_samples_use_host_corners() {
        assert_eq!(resolve_coverage(MsaaSamples::X2, 0b1000), 0b10);
        assert_eq!(resolve_coverage(MsaaSamples::X2, 0b0110), 0);
        assert_eq!(resolve_coverage(MsaaSamples::X2, 0b1111), 0b11);
    }

    #[test]
    fn single_sample_is_always_covered() {
        assert_eq!(resolve_coverage(MsaaSamples::X1, 0), 1);
    }

    #[test]
    fn resolved_mask_never_grows() {
        for msaa in [MsaaSamples::X2, MsaaSamples::X4] {
            for mask in 0..16u32 {
                let resolved = resolve_coverage(msaa, mask);
                assert!(resolved.count_ones() <= mask.count_ones());
                assert!(resolved < (1 << msaa.count()));
            }
        }
    }
}
