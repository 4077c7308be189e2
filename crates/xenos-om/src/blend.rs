//! Blending of the shader color with the color already in EDRAM.
//!
//! Factors and operations come from the `RB_BLENDCONTROL` word in the system constants, so one
//! generated program serves every blend state; only whether blending is compiled in at all is
//! part of the key.

use xenos_shader_ir::{Lane, Operand, ShaderBuilder, Swizzle, Temp, WriteMask};

use crate::constants::{
    REG_BLEND_CONSTANT, REG_RT_BLEND, REG_RT_CLAMP_ALPHA_HIGH, REG_RT_CLAMP_ALPHA_LOW,
    REG_RT_CLAMP_COLOR_HIGH, REG_RT_CLAMP_COLOR_LOW, REG_RT_FORMAT_FLAGS,
};
use crate::formats::{format_flags, ColorClamp, ColorRenderTargetFormat, FormatBinding};
use crate::state::{BlendComponent, BlendControl, BlendFactor, BlendOp};

const RGB: WriteMask = WriteMask::XYZ;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Color,
    Alpha,
}

impl Group {
    fn lanes(self) -> WriteMask {
        match self {
            Self::Color => RGB,
            Self::Alpha => WriteMask::W,
        }
    }

    /// Bit offset of the group in the blend control word.
    fn shift(self) -> u32 {
        match self {
            Self::Color => 0,
            Self::Alpha => 16,
        }
    }
}

fn emit_clamp(b: &mut ShaderBuilder, value: &Temp, lanes: WriteMask, low: Operand, high: Operand) {
    b.max(value.dst(lanes), value.op(), low);
    b.min(value.dst(lanes), value.op(), high);
}

/// Clamps the fixed-point components among `lanes` of `value` to the target's range.
pub fn emit_fixed_point_clamp(
    b: &mut ShaderBuilder,
    binding: FormatBinding,
    target: usize,
    value: &Temp,
    lanes: WriteMask,
) {
    let target_lane = Lane::from_index(target);
    let color_lanes = lanes & RGB;
    let alpha_lanes = lanes & WriteMask::W;
    let color_clamp = |b: &mut ShaderBuilder| {
        emit_clamp(
            b,
            value,
            color_lanes,
            Operand::constant(REG_RT_CLAMP_COLOR_LOW, target_lane),
            Operand::constant(REG_RT_CLAMP_COLOR_HIGH, target_lane),
        )
    };
    let alpha_clamp = |b: &mut ShaderBuilder| {
        emit_clamp(
            b,
            value,
            alpha_lanes,
            Operand::constant(REG_RT_CLAMP_ALPHA_LOW, target_lane),
            Operand::constant(REG_RT_CLAMP_ALPHA_HIGH, target_lane),
        )
    };
    match binding {
        FormatBinding::Static(format) => {
            if format.color_is_fixed_point() && !color_lanes.is_empty() {
                color_clamp(b);
            }
            if format.alpha_is_fixed_point() && !alpha_lanes.is_empty() {
                alpha_clamp(b);
            }
        }
        FormatBinding::Dynamic => {
            let flags = Operand::constant(REG_RT_FORMAT_FLAGS, target_lane);
            let t = b.alloc_temp();
            if !color_lanes.is_empty() {
                b.and(t.dst_x(), flags, Operand::u32(format_flags::COLOR_FIXED_POINT));
                b.if_nz(t.x(), color_clamp);
            }
            if !alpha_lanes.is_empty() {
                b.and(t.dst_x(), flags, Operand::u32(format_flags::ALPHA_FIXED_POINT));
                b.if_nz(t.x(), alpha_clamp);
            }
        }
    }
}

/// `out.lanes = factor` for the 5-bit factor in `selector`; unknown factors give zero.
fn emit_factor(
    b: &mut ShaderBuilder,
    group: Group,
    selector: Operand,
    src: &Temp,
    dst: &Temp,
    out: &Temp,
) {
    let lanes = group.lanes();
    let constant = Operand::constant_vec(REG_BLEND_CONSTANT);
    let one = Operand::f32(1.0);
    let direct = [
        (BlendFactor::SrcColor, src.op()),
        (BlendFactor::SrcAlpha, src.swz(Swizzle::WWWW)),
        (BlendFactor::DstColor, dst.op()),
        (BlendFactor::DstAlpha, dst.swz(Swizzle::WWWW)),
        (BlendFactor::ConstantColor, constant),
        (BlendFactor::ConstantAlpha, constant.swizzled(Swizzle::WWWW)),
    ];

    b.mov(out.dst(lanes), Operand::f32(0.0));
    b.begin_switch(selector);
    b.case(&[BlendFactor::One as u32]);
    b.mov(out.dst(lanes), one);
    for (factor, value) in direct {
        b.case(&[factor as u32]);
        b.mov(out.dst(lanes), value);
        // Every direct factor is followed by its one-minus form.
        b.case(&[factor as u32 + 1]);
        b.add(out.dst(lanes), value.neg(), one);
    }
    b.case(&[BlendFactor::SrcAlphaSaturate as u32]);
    match group {
        Group::Color => {
            b.add(out.dst(lanes), dst.swz(Swizzle::WWWW).neg(), one);
            b.min(out.dst(lanes), src.swz(Swizzle::WWWW), out.op());
        }
        Group::Alpha => b.mov(out.dst(lanes), one),
    }
    b.end_switch();
}

fn emit_group(
    b: &mut ShaderBuilder,
    group: Group,
    binding: FormatBinding,
    target: usize,
    src: &Temp,
    dst: &Temp,
    result: &Temp,
) {
    let lanes = group.lanes();
    let word = Operand::constant(REG_RT_BLEND, Lane::from_index(target));
    let selectors = b.alloc_temp();
    b.ubfe(
        selectors.dst(WriteMask::XYZ),
        Operand::u32x4([5, 5, 3, 0]),
        Operand::u32x4([group.shift(), group.shift() + 8, group.shift() + 5, 0]),
        word,
    );

    let src_term = b.alloc_temp();
    let dst_term = b.alloc_temp();
    emit_factor(b, group, selectors.x(), src, dst, &src_term);
    emit_factor(b, group, selectors.y(), src, dst, &dst_term);
    emit_fixed_point_clamp(b, binding, target, &src_term, lanes);
    emit_fixed_point_clamp(b, binding, target, &dst_term, lanes);
    b.mul_legacy(src_term.dst(lanes), src.op(), src_term.op());
    b.mul_legacy(dst_term.dst(lanes), dst.op(), dst_term.op());

    b.add(result.dst(lanes), src_term.op(), dst_term.op());
    b.begin_switch(selectors.z());
    b.case(&[BlendOp::Subtract as u32]);
    b.add(result.dst(lanes), src_term.op(), dst_term.op().neg());
    b.case(&[BlendOp::Min as u32]);
    b.min(result.dst(lanes), src.op(), dst.op());
    b.case(&[BlendOp::Max as u32]);
    b.max(result.dst(lanes), src.op(), dst.op());
    b.case(&[BlendOp::ReverseSubtract as u32]);
    b.add(result.dst(lanes), dst_term.op(), src_term.op().neg());
    b.end_switch();
}

/// Blends `color` (the prepared shader color) with `dst` (the unpacked EDRAM color) in place,
/// using the blend control word of `target`.
pub fn emit_blend(
    b: &mut ShaderBuilder,
    binding: FormatBinding,
    target: usize,
    color: &Temp,
    dst: &Temp,
) {
    let result = b.alloc_temp();
    emit_group(b, Group::Color, binding, target, color, dst, &result);
    emit_group(b, Group::Alpha, binding, target, color, dst, &result);
    b.mov(color.dst_all(), result.op());
}

fn mul_legacy(a: f32, b: f32) -> f32 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

fn clamp_range(value: f32, low: f32, high: f32) -> f32 {
    value.max(low).min(high)
}

fn reference_factor(
    factor: BlendFactor,
    lane: usize,
    src: [f32; 4],
    dst: [f32; 4],
    constant: [f32; 4],
) -> f32 {
    match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcColor => src[lane],
        BlendFactor::OneMinusSrcColor => -src[lane] + 1.0,
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => -src[3] + 1.0,
        BlendFactor::DstColor => dst[lane],
        BlendFactor::OneMinusDstColor => -dst[lane] + 1.0,
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => -dst[3] + 1.0,
        BlendFactor::ConstantColor => constant[lane],
        BlendFactor::OneMinusConstantColor => -constant[lane] + 1.0,
        BlendFactor::ConstantAlpha => constant[3],
        BlendFactor::OneMinusConstantAlpha => -constant[3] + 1.0,
        BlendFactor::SrcAlphaSaturate if lane == 3 => 1.0,
        BlendFactor::SrcAlphaSaturate => src[3].min(-dst[3] + 1.0),
    }
}

fn reference_component(
    component: BlendComponent,
    lane: usize,
    clamp: Option<(f32, f32)>,
    src: [f32; 4],
    dst: [f32; 4],
    constant: [f32; 4],
) -> f32 {
    let factor = |f| {
        let value = reference_factor(f, lane, src, dst, constant);
        match clamp {
            Some((low, high)) => clamp_range(value, low, high),
            None => value,
        }
    };
    let src_term = mul_legacy(src[lane], factor(component.src));
    let dst_term = mul_legacy(dst[lane], factor(component.dst));
    match component.op {
        BlendOp::Add => src_term + dst_term,
        BlendOp::Subtract => src_term - dst_term,
        BlendOp::ReverseSubtract => dst_term - src_term,
        BlendOp::Min => src[lane].min(dst[lane]),
        BlendOp::Max => src[lane].max(dst[lane]),
    }
}

/// Host reference of [`emit_blend`] for a target of `format`.
pub fn reference_blend(
    format: ColorRenderTargetFormat,
    control: BlendControl,
    src: [f32; 4],
    dst: [f32; 4],
    constant: [f32; 4],
) -> [f32; 4] {
    let ColorClamp {
        color_low,
        alpha_low,
        color_high,
        alpha_high,
    } = format.clamp();
    let color_clamp = format
        .color_is_fixed_point()
        .then_some((color_low, color_high));
    let alpha_clamp = format
        .alpha_is_fixed_point()
        .then_some((alpha_low, alpha_high));
    std::array::from_fn(|lane| {
        if lane == 3 {
            reference_component(control.alpha, lane, alpha_clamp, src, dst, constant)
        } else {
            reference_component(control.color, lane, color_clamp, src, dst, constant)
        }
    })
}

/// Host reference of the shader color preparation before blending: exponent bias, then the
/// fixed-point clamp. Colors stay linear until packing.
pub fn reference_source_color(
    format: ColorRenderTargetFormat,
    color: [f32; 4],
    exp_bias_multiplier: f32,
) -> [f32; 4] {
    let clamp = format.clamp();
    std::array::from_fn(|lane| {
        let mut value = color[lane] * exp_bias_multiplier;
        if lane < 3 && format.color_is_fixed_point() {
            value = clamp_range(value, clamp.color_low, clamp.color_high);
        }
        if lane == 3 && format.alpha_is_fixed_point() {
            value = clamp_range(value, clamp.alpha_low, clamp.alpha_high);
        }
        value
    })
}
