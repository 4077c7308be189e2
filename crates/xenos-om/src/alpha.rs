//! Alpha test and dithered alpha to coverage.

use xenos_shader_ir::{InputRegister, Lane, Operand, ShaderBuilder, Swizzle, Temp, WriteMask};

use crate::constants::{reg, OmFlags, ALPHA_TO_MASK_ENABLE, REG_ALPHA_VIEWPORT, REG_GLOBAL};
use crate::coverage::{state_lanes, COVERAGE_MASK, PENDING_SHIFT};
use crate::edram::{MsaaSamples, ResolutionScale};
use crate::state::CompareFunction;

/// Per-sample thresholds of one MSAA mode: sample `i` survives when
/// `alpha >= base[i] + dither_offset * step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DitherThresholds {
    pub base: [f32; 4],
    pub step: f32,
}

impl DitherThresholds {
    pub fn threshold(&self, sample: u32, dither_offset: u32) -> f32 {
        dither_offset as f32 * self.step + self.base[sample as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaToCoveragePolicy {
    pub x1: DitherThresholds,
    pub x2: DitherThresholds,
    pub x4: DitherThresholds,
}

impl AlphaToCoveragePolicy {
    pub const XENOS: Self = Self {
        x1: DitherThresholds {
            base: [0.5, 0.0, 0.0, 0.0],
            step: 0.125,
        },
        x2: DitherThresholds {
            base: [0.25, 0.75, 0.0, 0.0],
            step: 0.0625,
        },
        x4: DitherThresholds {
            base: [0.625, 0.375, 0.125, 0.875],
            step: 0.03125,
        },
    };

    pub fn thresholds(&self, msaa: MsaaSamples) -> &DitherThresholds {
        match msaa {
            MsaaSamples::X1 => &self.x1,
            MsaaSamples::X2 => &self.x2,
            MsaaSamples::X4 => &self.x4,
        }
    }

    /// Samples of a pixel with `alpha` that survive. NaN alpha drops every sample.
    pub fn coverage(&self, msaa: MsaaSamples, alpha: f32, dither_offset: u32) -> u32 {
        let thresholds = self.thresholds(msaa);
        (0..msaa.count())
            .filter(|&sample| alpha >= thresholds.threshold(sample, dither_offset))
            .fold(0, |mask, sample| mask | (1 << sample))
    }
}

impl Default for AlphaToCoveragePolicy {
    fn default() -> Self {
        Self::XENOS
    }
}

/// Dither offset of an (unscaled) pixel from the alpha-to-mask word.
pub fn dither_offset(alpha_to_mask: u32, x: u32, y: u32) -> u32 {
    let index = (y & 1) * 2 + (x & 1);
    (alpha_to_mask >> (index * 2)) & 3
}

pub fn alpha_test_passes(func: CompareFunction, alpha: f32, reference: f32) -> bool {
    func.passes(alpha, reference)
}

/// Clears coverage and pending writes when the alpha of color output 0 fails the test.
pub fn emit_alpha_test(b: &mut ShaderBuilder, state: &Temp) {
    let flags = Operand::constant(REG_GLOBAL, reg::FLAGS);
    let alpha = Operand::input(InputRegister::Color(0), Swizzle::WWWW);
    let reference = Operand::constant(REG_ALPHA_VIEWPORT, reg::ALPHA_REF);
    let t = b.alloc_temp();
    b.ubfe(
        t.dst_x(),
        Operand::u32(3),
        Operand::u32(OmFlags::ALPHA_TEST_SHIFT),
        flags,
    );
    b.ine(t.dst_y(), t.x(), Operand::u32(CompareFunction::Always.bits()));
    b.if_nz(t.y(), |b| {
        let bits = b.alloc_temp();
        b.lt(bits.dst_x(), alpha, reference);
        b.eq(bits.dst_y(), alpha, reference);
        b.lt(bits.dst_z(), reference, alpha);
        b.and(
            bits.dst(WriteMask::XYZ),
            bits.op(),
            Operand::u32x4([1, 2, 4, 0]),
        );
        b.or(bits.dst_x(), bits.x(), bits.y());
        b.or(bits.dst_x(), bits.x(), bits.z());
        b.and(bits.dst_x(), bits.x(), t.x());
        b.if_z(bits.x(), |b| {
            b.and(
                state.dst_lane(state_lanes::COVERAGE),
                state.lane(state_lanes::COVERAGE),
                Operand::u32(!(COVERAGE_MASK | (COVERAGE_MASK << PENDING_SHIFT))),
            );
        });
    });
}

/// Drops samples whose dithered threshold exceeds the alpha of color output 0, together with
/// their pending depth/stencil writes.
pub fn emit_alpha_to_coverage(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    policy: &AlphaToCoveragePolicy,
    state: &Temp,
) {
    let alpha_to_mask = Operand::constant(REG_GLOBAL, reg::ALPHA_TO_MASK);
    let t = b.alloc_temp();
    b.and(t.dst_x(), alpha_to_mask, Operand::u32(ALPHA_TO_MASK_ENABLE));
    b.if_nz(t.x(), |b| {
        let thresholds = policy.thresholds(msaa);
        let lanes = sample_lanes(msaa);

        // Dither offset of the pixel in the 2x2 pattern, in unscaled pixels.
        b.ftou(
            t.dst(WriteMask::XY),
            Operand::input(InputRegister::Position, Swizzle::XYZW),
        );
        b.ushr(t.dst(WriteMask::XY), t.op(), Operand::u32(scale.log2()));
        b.and(t.dst(WriteMask::XY), t.op(), Operand::u32(1));
        b.ishl(t.dst_y(), t.y(), Operand::u32(1));
        b.or(t.dst_x(), t.x(), t.y());
        b.ishl(t.dst_x(), t.x(), Operand::u32(1));
        b.ubfe(t.dst_x(), Operand::u32(2), t.x(), alpha_to_mask);
        b.utof(t.dst_x(), t.x());

        let threshold = b.alloc_temp();
        b.mul(
            threshold.dst(lanes),
            t.swz(Swizzle::XXXX),
            Operand::f32(thresholds.step),
        );
        b.add(
            threshold.dst(lanes),
            threshold.op(),
            Operand::f32x4(thresholds.base),
        );
        b.ge(
            threshold.dst(lanes),
            Operand::input(InputRegister::Color(0), Swizzle::WWWW),
            threshold.op(),
        );
        for sample in 0..msaa.count() {
            let bits = (1 << sample) | (1 << (PENDING_SHIFT + sample));
            b.movc(
                t.dst_y(),
                threshold.lane(Lane::from_index(sample as usize)),
                Operand::u32(u32::MAX),
                Operand::u32(!bits),
            );
            b.and(
                state.dst_lane(state_lanes::COVERAGE),
                state.lane(state_lanes::COVERAGE),
                t.y(),
            );
        }
    });
}

fn sample_lanes(msaa: MsaaSamples) -> WriteMask {
    match msaa {
        MsaaSamples::X1 => WriteMask::X,
        MsaaSamples::X2 => WriteMask::XY,
        MsaaSamples::X4 => WriteMask::XYZW,
    }
}
