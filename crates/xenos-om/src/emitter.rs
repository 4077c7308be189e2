//! Assembles the full output-merger program of one configuration.

use xenos_shader_ir::{
    InputRegister, Lane, Operand, Program, ShaderBuilder, Swizzle, Temp, WriteMask,
    MAX_COLOR_OUTPUTS,
};

use crate::address::{emit_color_sample_address, emit_sample0_addresses};
use crate::alpha::{emit_alpha_test, emit_alpha_to_coverage, AlphaToCoveragePolicy};
use crate::blend::{emit_blend, emit_fixed_point_clamp};
use crate::codec::{emit_pack, emit_pack_dynamic, emit_unpack, emit_unpack_dynamic};
use crate::constants::{
    REG_RT_BLEND, REG_RT_EXP_BIAS, REG_RT_FORMAT_FLAGS, REG_RT_KEEP0, REG_RT_KEEP1,
};
use crate::coverage::{emit_resolve_coverage, state_lanes, COVERAGE_MASK, PENDING_SHIFT};
use crate::depth_stencil::{
    emit_depth_derivatives, emit_depth_stencil_test, emit_flush_pending, emit_sample_depths,
    DepthSource, WritePolicy,
};
use crate::edram::{MsaaSamples, ResolutionScale};
use crate::error::OmError;
use crate::formats::{format_flags, DepthRenderTargetFormat, FormatBinding};
use crate::state::{resolve_render_target_aliasing, BlendControl, OutputMergerState, MAX_COLOR_TARGETS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: FormatBinding,
    /// Whether the destination load and blend code is compiled in.
    pub blend: bool,
}

/// What the translated pixel shader does that affects output merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelShaderTraits {
    pub writes_depth: bool,
    pub kills: bool,
    pub memexport: bool,
    /// Bit `i` set when color output `i` is written.
    pub color_outputs_written: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputMergerKey {
    pub msaa: MsaaSamples,
    pub resolution_scale: ResolutionScale,
    pub color_targets: [Option<ColorTargetKey>; MAX_COLOR_TARGETS],
    pub depth: Option<DepthRenderTargetFormat>,
    pub traits: PixelShaderTraits,
}

impl Default for OutputMergerKey {
    fn default() -> Self {
        Self {
            msaa: MsaaSamples::X1,
            resolution_scale: ResolutionScale::X1,
            color_targets: [None; MAX_COLOR_TARGETS],
            depth: None,
            traits: PixelShaderTraits::default(),
        }
    }
}

impl OutputMergerKey {
    /// Key of a draw with statically known formats. Blending is compiled in only for targets
    /// whose blend control is not the identity.
    pub fn from_state(state: &OutputMergerState, traits: PixelShaderTraits) -> Self {
        let mut targets = state.color_targets;
        resolve_render_target_aliasing(&mut targets);
        Self {
            msaa: state.msaa,
            resolution_scale: state.resolution_scale,
            color_targets: targets.map(|target| {
                target.enabled.then_some(ColorTargetKey {
                    format: FormatBinding::Static(target.format),
                    blend: !target.blend.is_identity(),
                })
            }),
            depth: state.depth_stencil.map(|depth| depth.format),
            traits,
        }
    }

    /// Depth/stencil can be tested before the shader body: nothing in the body can drop the
    /// pixel, change its depth or have side effects.
    pub fn early_depth_stencil(&self) -> bool {
        self.depth.is_some()
            && !self.traits.writes_depth
            && !self.traits.kills
            && !self.traits.memexport
    }

    fn writes_color(&self, target: usize) -> bool {
        target < usize::from(MAX_COLOR_OUTPUTS) && self.traits.color_outputs_written & (1 << target) != 0
    }
}

/// Generates the output-merger program for `key`.
pub fn generate_output_merger(
    key: &OutputMergerKey,
    alpha_to_coverage: &AlphaToCoveragePolicy,
) -> Result<Program, OmError> {
    let mut b = ShaderBuilder::new();
    let early = key.early_depth_stencil();
    let state = b.alloc_temp();
    let pending = b.alloc_temp();

    b.comment("coverage and sample 0 addresses");
    emit_resolve_coverage(&mut b, key.msaa, &state, state_lanes::COVERAGE);
    emit_sample0_addresses(
        &mut b,
        key.msaa,
        key.resolution_scale,
        &state,
        state_lanes::COLOR_OFFSET,
        key.depth.map(|_| state_lanes::DEPTH_ADDRESS),
    );
    let derivatives = if key.depth.is_some() && !key.traits.writes_depth {
        let derivatives = b.alloc_temp();
        emit_depth_derivatives(&mut b, &derivatives);
        Some(derivatives)
    } else {
        None
    };
    let depth_source = match &derivatives {
        Some(derivatives) => DepthSource::Interpolated { derivatives },
        None => DepthSource::ShaderOutput,
    };

    if let (true, Some(format)) = (early, key.depth) {
        b.comment("early depth/stencil");
        let new_depth = b.alloc_temp();
        emit_sample_depths(&mut b, key.msaa, format, depth_source, &new_depth);
        emit_depth_stencil_test(
            &mut b,
            key.msaa,
            key.resolution_scale,
            &state,
            &pending,
            &new_depth,
            WritePolicy::Deferrable,
        );
        emit_quad_bail_out(&mut b, &state);
    }

    b.shader_body();

    if early {
        emit_alpha_test(&mut b, &state);
        emit_alpha_to_coverage(&mut b, key.msaa, key.resolution_scale, alpha_to_coverage, &state);
        b.comment("deferred depth/stencil writes");
        emit_flush_pending(&mut b, key.msaa, key.resolution_scale, &state, &pending);
    } else {
        if key.traits.kills {
            b.if_nz(
                Operand::input(InputRegister::Killed, Swizzle::XXXX),
                ShaderBuilder::ret,
            );
        }
        emit_alpha_test(&mut b, &state);
        emit_alpha_to_coverage(&mut b, key.msaa, key.resolution_scale, alpha_to_coverage, &state);
        if let Some(format) = key.depth {
            b.comment("late depth/stencil");
            let new_depth = b.alloc_temp();
            emit_sample_depths(&mut b, key.msaa, format, depth_source, &new_depth);
            emit_depth_stencil_test(
                &mut b,
                key.msaa,
                key.resolution_scale,
                &state,
                &pending,
                &new_depth,
                WritePolicy::Immediate,
            );
        }
    }

    for (target, color_key) in key.color_targets.iter().enumerate() {
        let Some(color_key) = *color_key else {
            continue;
        };
        if !key.writes_color(target) {
            tracing::trace!(render_target = target, "color output not written, skipping render target");
            continue;
        }
        tracing::trace!(render_target = target, format = ?color_key.format, blend = color_key.blend, "render target");
        b.comment(format!("render target {target}"));
        emit_color_target(&mut b, key, target, color_key, &state);
    }

    let program = b.finish()?;
    tracing::debug!(
        ?key,
        instructions = program.count_insts(|_| true),
        temps = program.temp_count,
        "generated output merger"
    );
    Ok(program)
}

/// Returns from the whole quad when no invocation has a live sample or a pending write. The
/// derivative of the absolute sums spreads any nonzero value to all four invocations.
fn emit_quad_bail_out(b: &mut ShaderBuilder, state: &Temp) {
    let t = b.alloc_temp();
    b.and(
        t.dst_x(),
        state.lane(state_lanes::COVERAGE),
        Operand::u32(COVERAGE_MASK | (COVERAGE_MASK << PENDING_SHIFT)),
    );
    b.utof(t.dst_x(), t.x());
    b.deriv_x(t.dst_y(), t.x());
    b.add(t.dst_x(), t.x(), t.y().abs());
    b.deriv_y(t.dst_y(), t.x());
    b.add(t.dst_x(), t.x(), t.y().abs());
    b.if_z(t.x(), ShaderBuilder::ret);
}

struct TargetContext<'a> {
    key: &'a OutputMergerKey,
    target: usize,
    color_key: ColorTargetKey,
    state: &'a Temp,
    /// Prepared shader color.
    color: &'a Temp,
    /// x: keep mask of dword 0, y: of dword 1, z: is 64bpp (dynamic formats), w: raw format
    /// (dynamic formats).
    info: &'a Temp,
}

impl TargetContext<'_> {
    fn lane(&self) -> Lane {
        Lane::from_index(self.target)
    }

    fn static_64bpp(&self) -> Option<bool> {
        self.color_key
            .format
            .static_format()
            .map(|format| format.is_64bpp())
    }
}

fn emit_color_target(
    b: &mut ShaderBuilder,
    key: &OutputMergerKey,
    target: usize,
    color_key: ColorTargetKey,
    state: &Temp,
) {
    let lane = Lane::from_index(target);
    let info = b.alloc_temp();
    b.mov(info.dst_x(), Operand::constant(REG_RT_KEEP0, lane));
    b.mov(info.dst_y(), Operand::constant(REG_RT_KEEP1, lane));
    let t = b.alloc_temp();
    b.and(t.dst_x(), info.x(), info.y());
    b.ine(t.dst_x(), t.x(), Operand::u32(u32::MAX));
    b.if_nz(t.x(), |b| {
        let color = b.alloc_temp();
        b.mul(
            color.dst_all(),
            Operand::input(InputRegister::Color(target as u8), Swizzle::XYZW),
            Operand::constant(REG_RT_EXP_BIAS, lane),
        );
        if color_key.format == FormatBinding::Dynamic {
            let flags = Operand::constant(REG_RT_FORMAT_FLAGS, lane);
            b.ubfe(
                info.dst_z(),
                Operand::u32(1),
                Operand::u32(format_flags::IS_64BPP_SHIFT),
                flags,
            );
            b.and(info.dst_w(), flags, Operand::u32(format_flags::FORMAT_MASK));
        }
        emit_fixed_point_clamp(b, color_key.format, target, &color, WriteMask::XYZW);

        let context = TargetContext {
            key,
            target,
            color_key,
            state,
            color: &color,
            info: &info,
        };
        for sample in 0..key.msaa.count() {
            b.and(
                t.dst_y(),
                state.lane(state_lanes::COVERAGE),
                Operand::u32(1 << sample),
            );
            b.if_nz(t.y(), |b| emit_color_sample(b, &context, sample));
        }
    });
}

fn emit_color_sample(b: &mut ShaderBuilder, context: &TargetContext<'_>, sample: u32) {
    let lane = context.lane();
    let info = context.info;
    let wide = context.static_64bpp();
    let blend_word = Operand::constant(REG_RT_BLEND, lane);
    let address = b.alloc_temp();
    let old = b.alloc_temp();
    let flags = b.alloc_temp();

    emit_color_sample_address(
        b,
        context.key.msaa,
        context.key.resolution_scale,
        &address,
        Lane::X,
        context.state.lane(state_lanes::COLOR_OFFSET),
        sample,
        context.target,
        wide,
    );
    b.iadd(address.dst_y(), address.x(), Operand::u32(1));

    // flags.x: load needed, flags.y: second dword kept, flags.z: blending.
    b.mov(old.dst(WriteMask::XY), Operand::u32(0));
    b.ine(flags.dst(WriteMask::XY), info.op(), Operand::u32(0));
    match wide {
        Some(false) => {}
        Some(true) => b.or(flags.dst_x(), flags.x(), flags.y()),
        None => {
            b.movc(flags.dst_y(), info.z(), flags.y(), Operand::u32(0));
            b.or(flags.dst_x(), flags.x(), flags.y());
        }
    }
    if context.color_key.blend {
        b.ine(
            flags.dst_z(),
            blend_word,
            Operand::u32(BlendControl::IDENTITY_WORD),
        );
        b.or(flags.dst_x(), flags.x(), flags.z());
    }
    b.if_nz(flags.x(), |b| {
        b.load_edram(old.dst_x(), address.x());
        match wide {
            Some(false) => {}
            Some(true) => b.load_edram(old.dst_y(), address.y()),
            None => b.if_nz(info.z(), |b| b.load_edram(old.dst_y(), address.y())),
        }
    });

    let color = b.alloc_temp();
    b.mov(color.dst_all(), context.color.op());
    if context.color_key.blend {
        b.if_nz(flags.z(), |b| {
            let dst = b.alloc_temp();
            match context.color_key.format {
                FormatBinding::Static(format) => emit_unpack(b, format, &old, &dst),
                FormatBinding::Dynamic => emit_unpack_dynamic(b, info.w(), &old, &dst),
            }
            emit_blend(b, context.color_key.format, context.target, &color, &dst);
        });
    }

    let packed = b.alloc_temp();
    match context.color_key.format {
        FormatBinding::Static(format) => emit_pack(b, format, &color, &packed),
        FormatBinding::Dynamic => emit_pack_dynamic(b, info.w(), &color, &packed, &flags),
    }

    // Channels outside the write mask keep their EDRAM bits.
    b.xor(color.dst(WriteMask::XY), packed.op(), old.op());
    b.and(color.dst(WriteMask::XY), color.op(), info.op());
    b.xor(packed.dst(WriteMask::XY), packed.op(), color.op());

    let store = |b: &mut ShaderBuilder| {
        b.store_edram(address.x(), packed.x());
        match wide {
            Some(false) => {}
            Some(true) => b.store_edram(address.y(), packed.y()),
            None => b.if_nz(info.z(), |b| b.store_edram(address.y(), packed.y())),
        }
    };
    match context.color_key.format {
        FormatBinding::Static(_) => store(b),
        FormatBinding::Dynamic => b.if_nz(flags.x(), store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ColorRenderTargetFormat;

    fn rgba8_key() -> OutputMergerKey {
        let mut key = OutputMergerKey::default();
        key.color_targets[0] = Some(ColorTargetKey {
            format: FormatBinding::Static(ColorRenderTargetFormat::Rgba8),
            blend: false,
        });
        key.traits.color_outputs_written = 0b1;
        key
    }

    #[test]
    fn unblended_target_stores_once_per_sample() {
        let program = generate_output_merger(&rgba8_key(), &AlphaToCoveragePolicy::XENOS)
            .expect("generate");
        assert_eq!(program.edram_store_count(), 1);
        assert_eq!(program.edram_load_count(), 1);
        assert!(program.has_shader_body());

        let mut key = rgba8_key();
        key.msaa = MsaaSamples::X4;
        let program = generate_output_merger(&key, &AlphaToCoveragePolicy::XENOS).expect("generate");
        assert_eq!(program.edram_store_count(), 4);
    }

    #[test]
    fn unwritten_outputs_are_skipped() {
        let mut key = rgba8_key();
        key.traits.color_outputs_written = 0;
        let program = generate_output_merger(&key, &AlphaToCoveragePolicy::XENOS).expect("generate");
        assert_eq!(program.edram_store_count(), 0);
    }

    #[test]
    fn early_depth_needs_a_side_effect_free_body() {
        let mut key = rgba8_key();
        assert!(!key.early_depth_stencil());
        key.depth = Some(DepthRenderTargetFormat::D24S8);
        assert!(key.early_depth_stencil());
        for traits in [
            PixelShaderTraits {
                writes_depth: true,
                ..key.traits
            },
            PixelShaderTraits {
                kills: true,
                ..key.traits
            },
            PixelShaderTraits {
                memexport: true,
                ..key.traits
            },
        ] {
            assert!(!OutputMergerKey { traits, ..key }.early_depth_stencil());
        }
    }

    #[test]
    fn key_from_state_drops_aliases_and_identity_blend() {
        let mut state = OutputMergerState::default();
        for target in &mut state.color_targets[..2] {
            target.enabled = true;
            target.format = ColorRenderTargetFormat::Rgba16Float;
        }
        state.color_targets[0].blend = BlendControl::from_word(0x0001_0706);
        let key = OutputMergerKey::from_state(&state, PixelShaderTraits::default());
        assert_eq!(
            key.color_targets[0],
            Some(ColorTargetKey {
                format: FormatBinding::Static(ColorRenderTargetFormat::Rgba16Float),
                blend: true,
            })
        );
        assert_eq!(key.color_targets[1], None);
    }
}
