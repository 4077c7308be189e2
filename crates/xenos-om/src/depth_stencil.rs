//! Per-sample depth and stencil testing against the depth/stencil dword in EDRAM.

use xenos_shader_ir::{InputRegister, Lane, Operand, ShaderBuilder, Swizzle, Temp, Test, WriteMask};

use crate::address::emit_depth_sample_address;
use crate::codec::{emit_f32_to_float20e4, emit_f32_to_unorm};
use crate::constants::{
    reg, OmFlags, REG_ALPHA_VIEWPORT, REG_GLOBAL, REG_POLYGON_OFFSET, REG_STENCIL_BACK,
    REG_STENCIL_FRONT,
};
use crate::coverage::{state_lanes, PENDING_SHIFT};
use crate::edram::{MsaaSamples, ResolutionScale};
use crate::formats::{pack_depth_stencil, saturate, DepthRenderTargetFormat};
use crate::state::{OutputMergerState, PolygonOffset, StencilOp};

/// Xenos sample positions in sixteenths of a pixel, in Xenos sample order.
pub fn sample_position(msaa: MsaaSamples, sample: u32) -> [i32; 2] {
    const X2: [[i32; 2]; 2] = [[-2, -6], [2, 6]];
    const X4: [[i32; 2]; 4] = [[-2, -6], [-6, 2], [6, -2], [2, 6]];
    match msaa {
        MsaaSamples::X1 => [0, 0],
        MsaaSamples::X2 => X2[sample as usize & 1],
        MsaaSamples::X4 => X4[sample as usize & 3],
    }
}

/// When the depth/stencil dword produced by a test may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Late testing: nothing can discard the sample any more.
    Immediate,
    /// Early testing: written at once only under [`OmFlags::EARLY_WRITE`], otherwise kept in the
    /// pending register until alpha test and alpha to coverage have run.
    Deferrable,
}

/// Where the depth of the current pixel comes from.
#[derive(Clone, Copy)]
pub enum DepthSource<'a> {
    /// Rasterized depth; `derivatives.xy` holds the screen-space derivatives of z.
    Interpolated { derivatives: &'a Temp },
    /// Depth written by the shader body, the same for every sample.
    ShaderOutput,
}

/// `out.x = ddx(z)`, `out.y = ddy(z)`. Must run in uniform control flow.
pub fn emit_depth_derivatives(b: &mut ShaderBuilder, out: &Temp) {
    let z = Operand::input(InputRegister::Position, Swizzle::ZZZZ);
    b.deriv_x(out.dst_x(), z);
    b.deriv_y(out.dst_y(), z);
}

/// Writes the encoded 24-bit depth of each sample to the matching lane of `out`.
pub fn emit_sample_depths(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    format: DepthRenderTargetFormat,
    source: DepthSource<'_>,
    out: &Temp,
) {
    match source {
        DepthSource::ShaderOutput => {
            b.mov(out.dst_all(), Operand::input(InputRegister::Depth, Swizzle::XXXX));
        }
        DepthSource::Interpolated { derivatives } => {
            let t = b.alloc_temp();
            b.mov(
                out.dst_all(),
                Operand::input(InputRegister::Position, Swizzle::ZZZZ),
            );
            if msaa != MsaaSamples::X1 {
                let mut dx = [0.0f32; 4];
                let mut dy = [0.0f32; 4];
                for sample in 0..msaa.count() {
                    let [x, y] = sample_position(msaa, sample);
                    dx[sample as usize] = x as f32 / 16.0;
                    dy[sample as usize] = y as f32 / 16.0;
                }
                b.mul(t.dst_all(), derivatives.swz(Swizzle::XXXX), Operand::f32x4(dx));
                b.add(out.dst_all(), out.op(), t.op());
                b.mul(t.dst_all(), derivatives.swz(Swizzle::YYYY), Operand::f32x4(dy));
                b.add(out.dst_all(), out.op(), t.op());
            }

            // Polygon offset: scale * max(|ddx|, |ddy|) + offset of the facing side.
            let front = Operand::input(InputRegister::FrontFacing, Swizzle::XXXX);
            b.movc(
                t.dst(WriteMask::XY),
                front,
                Operand::constant_vec(REG_POLYGON_OFFSET),
                Operand::constant_vec(REG_POLYGON_OFFSET)
                    .swizzled(Swizzle([Lane::Z, Lane::W, Lane::W, Lane::W])),
            );
            b.max(t.dst_z(), derivatives.x().abs(), derivatives.y().abs());
            b.mul(t.dst_z(), t.z(), t.x());
            b.add(t.dst_z(), t.z(), t.y());
            b.add(out.dst_all(), out.op(), t.swz(Swizzle::ZZZZ));
        }
    }

    b.max(
        out.dst_all(),
        out.op(),
        Operand::constant(REG_ALPHA_VIEWPORT, reg::VIEWPORT_Z_MIN),
    );
    b.min(
        out.dst_all(),
        out.op(),
        Operand::constant(REG_ALPHA_VIEWPORT, reg::VIEWPORT_Z_MAX),
    );
    b.mov_sat(out.dst_all(), out.op());
    match format {
        DepthRenderTargetFormat::D24S8 => {
            emit_f32_to_unorm(b, out, out.op(), WriteMask::XYZW, [16_777_215.0; 4])
        }
        DepthRenderTargetFormat::D24FS8 => {
            emit_f32_to_float20e4(b, out, out.op(), WriteMask::XYZW)
        }
    }
}

/// Tests every live sample, clearing failed samples from the coverage and writing or deferring
/// changed depth/stencil dwords.
#[allow(clippy::too_many_arguments)]
pub fn emit_depth_stencil_test(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    state: &Temp,
    pending: &Temp,
    new_depth: &Temp,
    policy: WritePolicy,
) {
    let flags = Operand::constant(REG_GLOBAL, reg::FLAGS);
    let enabled = b.alloc_temp();
    b.and(
        enabled.dst_x(),
        flags,
        Operand::u32(OmFlags::DEPTH_STENCIL.bits()),
    );
    b.if_nz(enabled.x(), |b| {
        let stencil = b.alloc_temp();
        b.movc(
            stencil.dst_all(),
            Operand::input(InputRegister::FrontFacing, Swizzle::XXXX),
            Operand::constant_vec(REG_STENCIL_FRONT),
            Operand::constant_vec(REG_STENCIL_BACK),
        );
        for sample in 0..msaa.count() {
            b.and(
                enabled.dst_y(),
                state.lane(state_lanes::COVERAGE),
                Operand::u32(1 << sample),
            );
            b.if_nz(enabled.y(), |b| {
                b.comment(format!("depth/stencil sample {sample}"));
                emit_sample_test(b, msaa, scale, state, pending, new_depth, &stencil, sample, policy);
            });
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn emit_sample_test(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    state: &Temp,
    pending: &Temp,
    new_depth: &Temp,
    stencil: &Temp,
    sample: u32,
    policy: WritePolicy,
) {
    let flags = Operand::constant(REG_GLOBAL, reg::FLAGS);
    let lane = Lane::from_index(sample as usize);
    let address = b.alloc_temp();
    // x: old dword, y: old depth, z: old stencil.
    let old = b.alloc_temp();
    // x: new dword, y: passed.
    let word = b.alloc_temp();
    let t = b.alloc_temp();

    emit_depth_sample_address(
        b,
        msaa,
        scale,
        &address,
        Lane::X,
        state.lane(state_lanes::DEPTH_ADDRESS),
        sample,
    );
    b.load_edram(old.dst_x(), address.x());
    b.ushr(old.dst_y(), old.x(), Operand::u32(8));
    b.and(old.dst_z(), old.x(), Operand::u32(0xFF));

    // Less, equal or greater from the sign of the difference, masked with the pass bits.
    b.iadd(t.dst_x(), new_depth.lane(lane), old.y().neg());
    b.ilt(t.dst_y(), t.x(), Operand::i32(0));
    b.ieq(t.dst_z(), t.x(), Operand::u32(0));
    b.movc(t.dst_z(), t.z(), Operand::u32(2), Operand::u32(4));
    b.movc(t.dst_x(), t.y(), Operand::u32(1), t.z());
    b.ushr(t.dst_y(), flags, Operand::u32(OmFlags::DEPTH_FUNC_SHIFT));
    b.and(word.dst_y(), t.x(), t.y());

    b.and(t.dst_y(), flags, Operand::u32(OmFlags::DEPTH_WRITE.bits()));
    b.movc(t.dst_y(), word.y(), t.y(), Operand::u32(0));
    b.bfi(
        t.dst_z(),
        Operand::u32(24),
        Operand::u32(8),
        new_depth.lane(lane),
        old.x(),
    );
    b.movc(word.dst_x(), t.y(), t.z(), old.x());

    b.and(t.dst_x(), flags, Operand::u32(OmFlags::STENCIL_TEST.bits()));
    b.if_nz(t.x(), |b| emit_stencil(b, stencil, &old, &word));

    b.movc(
        t.dst_x(),
        word.y(),
        Operand::u32(u32::MAX),
        Operand::u32(!(1 << sample)),
    );
    b.and(
        state.dst_lane(state_lanes::COVERAGE),
        state.lane(state_lanes::COVERAGE),
        t.x(),
    );

    b.ine(t.dst_x(), word.x(), old.x());
    b.if_nz(t.x(), |b| match policy {
        WritePolicy::Immediate => b.store_edram(address.x(), word.x()),
        WritePolicy::Deferrable => {
            b.and(t.dst_y(), flags, Operand::u32(OmFlags::EARLY_WRITE.bits()));
            b.begin_if(t.y(), Test::NonZero);
            b.store_edram(address.x(), word.x());
            b.begin_else();
            b.mov(pending.dst_lane(lane), word.x());
            b.or(
                state.dst_lane(state_lanes::COVERAGE),
                state.lane(state_lanes::COVERAGE),
                Operand::u32(1 << (PENDING_SHIFT + sample)),
            );
            b.end_if();
        }
    });
}

/// Stencil test and operation; updates the stencil byte of `word.x` and folds the result into
/// the pass flag in `word.y`.
fn emit_stencil(b: &mut ShaderBuilder, stencil: &Temp, old: &Temp, word: &Temp) {
    let reference = stencil.lane(reg::STENCIL_REF);
    let read_mask = stencil.lane(reg::STENCIL_READ_MASK);
    let write_mask = stencil.lane(reg::STENCIL_WRITE_MASK);
    let func_ops = stencil.lane(reg::STENCIL_FUNC_OPS);
    let s = b.alloc_temp();

    b.and(s.dst_x(), reference, read_mask);
    b.and(s.dst_y(), old.z(), read_mask);
    b.ult(s.dst_z(), s.x(), s.y());
    b.ieq(s.dst_w(), s.x(), s.y());
    b.movc(s.dst_w(), s.w(), Operand::u32(2), Operand::u32(4));
    b.movc(s.dst_z(), s.z(), Operand::u32(1), s.w());
    b.and(s.dst_z(), s.z(), func_ops);

    // Stencil fail, then depth fail, then pass.
    b.movc(s.dst_x(), word.y(), Operand::u32(6), Operand::u32(9));
    b.movc(s.dst_x(), s.z(), s.x(), Operand::u32(3));
    b.ubfe(s.dst_x(), Operand::u32(3), s.x(), func_ops);

    b.mov(s.dst_y(), old.z());
    b.begin_switch(s.x());
    b.case(&[StencilOp::Zero as u32]);
    b.mov(s.dst_y(), Operand::u32(0));
    b.case(&[StencilOp::Replace as u32]);
    b.mov(s.dst_y(), reference);
    b.case(&[StencilOp::IncrementClamp as u32]);
    b.iadd(s.dst_y(), old.z(), Operand::u32(1));
    b.umin(s.dst_y(), s.y(), Operand::u32(0xFF));
    b.case(&[StencilOp::DecrementClamp as u32]);
    b.umax(s.dst_y(), old.z(), Operand::u32(1));
    b.iadd(s.dst_y(), s.y(), Operand::u32(1).neg());
    b.case(&[StencilOp::Invert as u32]);
    b.not(s.dst_y(), old.z());
    b.case(&[StencilOp::IncrementWrap as u32]);
    b.iadd(s.dst_y(), old.z(), Operand::u32(1));
    b.case(&[StencilOp::DecrementWrap as u32]);
    b.iadd(s.dst_y(), old.z(), Operand::u32(1).neg());
    b.end_switch();

    b.xor(s.dst_y(), s.y(), old.z());
    b.and(s.dst_y(), s.y(), write_mask);
    b.xor(s.dst_y(), s.y(), old.z());
    b.bfi(word.dst_x(), Operand::u32(8), Operand::u32(0), s.y(), word.x());
    b.movc(word.dst_y(), s.z(), word.y(), Operand::u32(0));
}

/// Stores the dwords deferred by an early [`WritePolicy::Deferrable`] test for samples whose
/// pending bit survived.
pub fn emit_flush_pending(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    state: &Temp,
    pending: &Temp,
) {
    let t = b.alloc_temp();
    for sample in 0..msaa.count() {
        b.and(
            t.dst_x(),
            state.lane(state_lanes::COVERAGE),
            Operand::u32(1 << (PENDING_SHIFT + sample)),
        );
        b.if_nz(t.x(), |b| {
            emit_depth_sample_address(
                b,
                msaa,
                scale,
                &t,
                Lane::Y,
                state.lane(state_lanes::DEPTH_ADDRESS),
                sample,
            );
            b.store_edram(t.y(), pending.lane(Lane::from_index(sample as usize)));
        });
    }
}

/// Interpolated depth of `sample` with polygon offset, before clamping.
pub fn sample_depth(
    msaa: MsaaSamples,
    sample: u32,
    z: f32,
    derivatives: [f32; 2],
    polygon_offset: PolygonOffset,
) -> f32 {
    let [ddx, ddy] = derivatives;
    let mut depth = z;
    if msaa != MsaaSamples::X1 {
        let [x, y] = sample_position(msaa, sample);
        depth += ddx * (x as f32 / 16.0);
        depth += ddy * (y as f32 / 16.0);
    }
    let slope = ddx.abs().max(ddy.abs());
    depth + (slope * polygon_offset.scale + polygon_offset.offset)
}

/// Clamps to the viewport depth range and encodes 24-bit depth.
pub fn encode_sample_depth(
    format: DepthRenderTargetFormat,
    depth: f32,
    z_min: f32,
    z_max: f32,
) -> u32 {
    format.encode_depth(saturate(depth.max(z_min).min(z_max)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilOutcome {
    /// Whether the sample survives the depth and stencil tests.
    pub passed: bool,
    pub word: u32,
}

/// Host reference of one sample's test and update.
pub fn evaluate_depth_stencil(
    state: &OutputMergerState,
    front_facing: bool,
    old_word: u32,
    new_depth24: u32,
) -> DepthStencilOutcome {
    let old_depth = old_word >> 8;
    let old_stencil = (old_word & 0xFF) as u8;
    let depth_passed = state.depth_func.passes(new_depth24, old_depth);
    let depth = if depth_passed && state.depth_write {
        new_depth24 & 0xFF_FFFF
    } else {
        old_depth
    };
    let (stencil, stencil_passed) = match &state.stencil {
        Some((front, back)) => {
            let face = if front_facing { front } else { back };
            let reference = face.reference & face.read_mask;
            let value = old_stencil & face.read_mask;
            let passed = face.func.passes(reference, value);
            let op = if !passed {
                face.fail_op
            } else if !depth_passed {
                face.depth_fail_op
            } else {
                face.pass_op
            };
            let updated = op.apply(old_stencil, face.reference);
            let merged = old_stencil ^ ((updated ^ old_stencil) & face.write_mask);
            (merged, passed)
        }
        None => (old_stencil, true),
    };
    DepthStencilOutcome {
        passed: depth_passed && stencil_passed,
        word: pack_depth_stencil(depth, stencil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CompareFunction, StencilFaceState};

    fn less_state() -> OutputMergerState {
        OutputMergerState {
            depth_func: CompareFunction::Less,
            depth_write: true,
            ..Default::default()
        }
    }

    #[test]
    fn depth_less_passes_and_writes_closer_depth() {
        let outcome = evaluate_depth_stencil(&less_state(), true, 0x4000_0000, 0x30_0000);
        assert!(outcome.passed);
        assert_eq!(outcome.word, 0x3000_0000);
    }

    #[test]
    fn depth_fail_still_runs_the_stencil_op() {
        let mut state = less_state();
        let face = StencilFaceState {
            depth_fail_op: StencilOp::IncrementClamp,
            ..Default::default()
        };
        state.stencil = Some((face, face));
        let outcome = evaluate_depth_stencil(&state, true, 0x4000_0003, 0x50_0000);
        assert!(!outcome.passed);
        assert_eq!(outcome.word, 0x4000_0004);
    }

    #[test]
    fn stencil_write_mask_limits_the_update() {
        let mut state = OutputMergerState::default();
        let front = StencilFaceState {
            pass_op: StencilOp::Replace,
            reference: 0xAB,
            write_mask: 0x0F,
            ..Default::default()
        };
        let back = StencilFaceState {
            func: CompareFunction::Never,
            fail_op: StencilOp::Zero,
            ..Default::default()
        };
        state.stencil = Some((front, back));
        assert_eq!(evaluate_depth_stencil(&state, true, 0x10, 0).word, 0x1B);
        let outcome = evaluate_depth_stencil(&state, false, 0x10, 0);
        assert!(!outcome.passed);
        assert_eq!(outcome.word, 0);
    }

    #[test]
    fn sample_positions_match_the_coverage_order() {
        assert_eq!(sample_position(MsaaSamples::X4, 1), [-6, 2]);
        assert_eq!(sample_position(MsaaSamples::X4, 2), [6, -2]);
        assert_eq!(sample_position(MsaaSamples::X2, 1), [2, 6]);
        assert_eq!(
            sample_depth(
                MsaaSamples::X4,
                3,
                0.5,
                [0.016, 0.0],
                PolygonOffset::default()
            ),
            0.5 + 0.016 * 0.125
        );
    }

    #[test]
    fn depth_is_clamped_to_the_viewport_range() {
        let format = DepthRenderTargetFormat::D24S8;
        assert_eq!(encode_sample_depth(format, 2.0, 0.0, 0.5), 0x80_0000);
        assert_eq!(encode_sample_depth(format, -1.0, 0.0, 1.0), 0);
    }
}
