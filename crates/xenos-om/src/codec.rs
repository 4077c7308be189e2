//! Emitted pack/unpack code for render target formats.
//!
//! Every routine mirrors the host reference in [`crate::formats`] operation for operation.
//! Colors are four `f32` lanes; packed pixels use lane x for the first dword and lane y for the
//! second dword of 64bpp formats.

use xenos_shader_ir::{Lane, Operand, ShaderBuilder, Swizzle, Temp, WriteMask};

use crate::formats::{
    ColorRenderTargetFormat, FIXED16_MAX, FIXED16_SCALE, FLOAT20E4_MAX_BITS, FLOAT7E3_MAX_BITS,
    HALF_MAX,
};

const XXYY: Swizzle = Swizzle([Lane::X, Lane::X, Lane::Y, Lane::Y]);
const XZ: WriteMask = WriteMask::X.union(WriteMask::Z);
const YW: WriteMask = WriteMask::Y.union(WriteMask::W);
const ZW: WriteMask = WriteMask::Z.union(WriteMask::W);
const YZW: WriteMask = WriteMask::Y.union(ZW);

struct SmallFloat {
    mantissa_bits: u32,
    max_bits: u32,
    min_normal_bits: u32,
    pack_rebias: u32,
    denormal_base: u32,
    unpack_rebias: u32,
}

const FLOAT7E3: SmallFloat = SmallFloat {
    mantissa_bits: 7,
    max_bits: FLOAT7E3_MAX_BITS,
    min_normal_bits: 0x3E80_0000,
    pack_rebias: 0xC200_0000,
    denormal_base: 125,
    unpack_rebias: 124,
};

const FLOAT20E4: SmallFloat = SmallFloat {
    mantissa_bits: 20,
    max_bits: FLOAT20E4_MAX_BITS,
    min_normal_bits: 0x3880_0000,
    pack_rebias: 0xC800_0000,
    denormal_base: 113,
    unpack_rebias: 112,
};

impl SmallFloat {
    fn total_bits(&self) -> u32 {
        self.mantissa_bits + if self.mantissa_bits == 7 { 3 } else { 4 }
    }

    fn dropped_bits(&self) -> u32 {
        23 - self.mantissa_bits
    }
}

/// `out.lanes = umin(ftou(saturate(src) * max + 0.5), max)`.
pub fn emit_f32_to_unorm(
    b: &mut ShaderBuilder,
    out: &Temp,
    src: Operand,
    lanes: WriteMask,
    max: [f32; 4],
) {
    b.mov_sat(out.dst(lanes), src);
    b.mul(out.dst(lanes), out.op(), Operand::f32x4(max));
    b.add(out.dst(lanes), out.op(), Operand::f32(0.5));
    b.ftou(out.dst(lanes), out.op());
    b.umin(out.dst(lanes), out.op(), Operand::u32x4(max.map(|m| m as u32)));
}

/// `out.lanes = utof(src) * (1 / max)`.
pub fn emit_unorm_to_f32(
    b: &mut ShaderBuilder,
    out: &Temp,
    src: Operand,
    lanes: WriteMask,
    max: [f32; 4],
) {
    b.utof(out.dst(lanes), src);
    b.mul(out.dst(lanes), out.op(), Operand::f32x4(max.map(|m| 1.0 / m)));
}

fn emit_f32_to_small_float(
    b: &mut ShaderBuilder,
    out: &Temp,
    src: Operand,
    lanes: WriteMask,
    format: &SmallFloat,
) {
    let denormal = b.alloc_temp();
    let normal = b.alloc_temp();
    let is_denormal = b.alloc_temp();
    b.max(out.dst(lanes), src, Operand::f32(0.0));
    b.min(out.dst(lanes), out.op(), Operand::u32(format.max_bits));
    // Drop the sign of -0.
    b.and(out.dst(lanes), out.op(), Operand::u32(0x7FFF_FFFF));

    b.ushr(denormal.dst(lanes), out.op(), Operand::u32(23));
    b.iadd(
        denormal.dst(lanes),
        Operand::u32(format.denormal_base),
        denormal.op().neg(),
    );
    b.umin(denormal.dst(lanes), denormal.op(), Operand::u32(24));
    b.and(normal.dst(lanes), out.op(), Operand::u32(0x7F_FFFF));
    b.or(normal.dst(lanes), normal.op(), Operand::u32(0x80_0000));
    b.ushr(denormal.dst(lanes), normal.op(), denormal.op());

    b.iadd(normal.dst(lanes), out.op(), Operand::u32(format.pack_rebias));
    b.ult(
        is_denormal.dst(lanes),
        out.op(),
        Operand::u32(format.min_normal_bits),
    );
    b.movc(out.dst(lanes), is_denormal.op(), denormal.op(), normal.op());

    let drop = format.dropped_bits();
    b.ushr(normal.dst(lanes), out.op(), Operand::u32(drop));
    b.and(normal.dst(lanes), normal.op(), Operand::u32(1));
    b.iadd(out.dst(lanes), out.op(), Operand::u32((1 << (drop - 1)) - 1));
    b.iadd(out.dst(lanes), out.op(), normal.op());
    b.ushr(out.dst(lanes), out.op(), Operand::u32(drop));
    b.and(
        out.dst(lanes),
        out.op(),
        Operand::u32((1 << format.total_bits()) - 1),
    );
}

fn emit_small_float_to_f32(
    b: &mut ShaderBuilder,
    out: &Temp,
    src: Operand,
    lanes: WriteMask,
    format: &SmallFloat,
) {
    let mbits = format.mantissa_bits;
    let mantissa_mask = (1u32 << mbits) - 1;
    let exponent = b.alloc_temp();
    let mantissa = b.alloc_temp();
    let scratch = b.alloc_temp();
    let value = b.alloc_temp();

    b.and(
        value.dst(lanes),
        src,
        Operand::u32((1 << format.total_bits()) - 1),
    );
    b.ushr(exponent.dst(lanes), value.op(), Operand::u32(mbits));
    b.and(mantissa.dst(lanes), value.op(), Operand::u32(mantissa_mask));

    // Denormals: normalize around the most significant mantissa bit.
    b.firstbit_hi(scratch.dst(lanes), mantissa.op());
    b.iadd(out.dst(lanes), scratch.op(), Operand::u32(mbits - 1).neg());
    b.iadd(scratch.dst(lanes), Operand::u32(mbits), scratch.op().neg());
    b.ishl(scratch.dst(lanes), mantissa.op(), scratch.op());
    b.and(scratch.dst(lanes), scratch.op(), Operand::u32(mantissa_mask));
    let is_denormal = b.alloc_temp();
    b.ieq(is_denormal.dst(lanes), exponent.op(), Operand::u32(0));
    b.movc(exponent.dst(lanes), is_denormal.op(), out.op(), exponent.op());
    b.movc(mantissa.dst(lanes), is_denormal.op(), scratch.op(), mantissa.op());

    b.iadd(
        exponent.dst(lanes),
        exponent.op(),
        Operand::u32(format.unpack_rebias),
    );
    b.ishl(exponent.dst(lanes), exponent.op(), Operand::u32(23));
    b.ishl(
        mantissa.dst(lanes),
        mantissa.op(),
        Operand::u32(format.dropped_bits()),
    );
    b.or(exponent.dst(lanes), exponent.op(), mantissa.op());
    b.movc(out.dst(lanes), value.op(), exponent.op(), Operand::u32(0));
}

/// Converts `f32` lanes to unsigned 7e3 in the low 10 bits.
pub fn emit_f32_to_float7e3(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    emit_f32_to_small_float(b, out, src, lanes, &FLOAT7E3);
}

pub fn emit_float7e3_to_f32(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    emit_small_float_to_f32(b, out, src, lanes, &FLOAT7E3);
}

/// Converts `f32` lanes to unsigned 20e4 in the low 24 bits.
pub fn emit_f32_to_float20e4(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    emit_f32_to_small_float(b, out, src, lanes, &FLOAT20E4);
}

pub fn emit_float20e4_to_f32(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    emit_small_float_to_f32(b, out, src, lanes, &FLOAT20E4);
}

fn emit_f32_to_fixed16(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    b.max(out.dst(lanes), src, Operand::f32(-FIXED16_MAX));
    b.min(out.dst(lanes), out.op(), Operand::f32(FIXED16_MAX));
    b.mul(out.dst(lanes), out.op(), Operand::f32(FIXED16_SCALE));
    b.round_ne(out.dst(lanes), out.op());
    b.ftoi(out.dst(lanes), out.op());
    b.imin(out.dst(lanes), out.op(), Operand::i32(32767));
    b.imax(out.dst(lanes), out.op(), Operand::i32(-32768));
    b.and(out.dst(lanes), out.op(), Operand::u32(0xFFFF));
}

fn emit_f32_to_half(b: &mut ShaderBuilder, out: &Temp, src: Operand, lanes: WriteMask) {
    b.max(out.dst(lanes), src, Operand::f32(-HALF_MAX));
    b.min(out.dst(lanes), out.op(), Operand::f32(HALF_MAX));
    b.f32_to_f16(out.dst(lanes), out.op());
}

/// `packed.x = t.x | t.y | t.z | t.w` after shifting each lane by `shifts`.
fn emit_merge_lanes(b: &mut ShaderBuilder, packed: &Temp, t: &Temp, shifts: [u32; 4]) {
    b.ishl(t.dst_all(), t.op(), Operand::u32x4(shifts));
    b.or(packed.dst_x(), t.x(), t.y());
    b.or(packed.dst_x(), packed.x(), t.z());
    b.or(packed.dst_x(), packed.x(), t.w());
}

/// Packs the linear `f32` color in `color` into `packed.xy`. `packed.y` is zero for 32bpp
/// formats. `color` is not modified.
pub fn emit_pack(
    b: &mut ShaderBuilder,
    format: ColorRenderTargetFormat,
    color: &Temp,
    packed: &Temp,
) {
    if format.is_gamma() {
        let gamma = b.alloc_temp();
        b.mov(gamma.dst_all(), color.op());
        emit_linear_to_pwl_gamma(b, &gamma, WriteMask::XYZ);
        emit_pack(b, format.storage_format(), &gamma, packed);
        return;
    }
    let t = b.alloc_temp();
    match format.storage_format() {
        ColorRenderTargetFormat::Rgba8 => {
            emit_f32_to_unorm(b, &t, color.op(), WriteMask::XYZW, [255.0; 4]);
            emit_merge_lanes(b, packed, &t, [0, 8, 16, 24]);
            b.mov(packed.dst_y(), Operand::u32(0));
        }
        ColorRenderTargetFormat::Rgb10A2 => {
            emit_f32_to_unorm(
                b,
                &t,
                color.op(),
                WriteMask::XYZW,
                [1023.0, 1023.0, 1023.0, 3.0],
            );
            emit_merge_lanes(b, packed, &t, [0, 10, 20, 30]);
            b.mov(packed.dst_y(), Operand::u32(0));
        }
        ColorRenderTargetFormat::Rgb10A2Float => {
            emit_f32_to_float7e3(b, &t, color.op(), WriteMask::XYZ);
            emit_f32_to_unorm(b, &t, color.op(), WriteMask::W, [3.0; 4]);
            emit_merge_lanes(b, packed, &t, [0, 10, 20, 30]);
            b.mov(packed.dst_y(), Operand::u32(0));
        }
        ColorRenderTargetFormat::Rg16 | ColorRenderTargetFormat::Rg16Float => {
            if format.storage_format() == ColorRenderTargetFormat::Rg16 {
                emit_f32_to_fixed16(b, &t, color.op(), WriteMask::XY);
            } else {
                emit_f32_to_half(b, &t, color.op(), WriteMask::XY);
            }
            b.ishl(t.dst_y(), t.y(), Operand::u32(16));
            b.or(packed.dst_x(), t.x(), t.y());
            b.mov(packed.dst_y(), Operand::u32(0));
        }
        ColorRenderTargetFormat::Rgba16 | ColorRenderTargetFormat::Rgba16Float => {
            if format.storage_format() == ColorRenderTargetFormat::Rgba16 {
                emit_f32_to_fixed16(b, &t, color.op(), WriteMask::XYZW);
            } else {
                emit_f32_to_half(b, &t, color.op(), WriteMask::XYZW);
            }
            b.ishl(t.dst(YW), t.op(), Operand::u32(16));
            b.or(
                packed.dst(WriteMask::XY),
                t.swz(Swizzle([Lane::X, Lane::Z, Lane::Z, Lane::Z])),
                t.swz(Swizzle([Lane::Y, Lane::W, Lane::W, Lane::W])),
            );
        }
        ColorRenderTargetFormat::R32Float => {
            b.mov(packed.dst_x(), color.x());
            b.mov(packed.dst_y(), Operand::u32(0));
        }
        _ => b.mov(packed.dst(WriteMask::XY), color.op()),
    }
}

/// Unpacks `packed.xy` into four linear `f32` lanes of `color`; missing channels read
/// `(0, 0, 0, 1)`.
pub fn emit_unpack(
    b: &mut ShaderBuilder,
    format: ColorRenderTargetFormat,
    packed: &Temp,
    color: &Temp,
) {
    let t = b.alloc_temp();
    match format.storage_format() {
        ColorRenderTargetFormat::Rgba8 => {
            b.ubfe(
                t.dst_all(),
                Operand::u32(8),
                Operand::u32x4([0, 8, 16, 24]),
                packed.x(),
            );
            emit_unorm_to_f32(b, color, t.op(), WriteMask::XYZW, [255.0; 4]);
            if format.is_gamma() {
                emit_pwl_gamma_to_linear(b, color, WriteMask::XYZ);
            }
        }
        ColorRenderTargetFormat::Rgb10A2 | ColorRenderTargetFormat::Rgb10A2Float => {
            b.ubfe(
                t.dst_all(),
                Operand::u32x4([10, 10, 10, 2]),
                Operand::u32x4([0, 10, 20, 30]),
                packed.x(),
            );
            if format.storage_format() == ColorRenderTargetFormat::Rgb10A2 {
                emit_unorm_to_f32(
                    b,
                    color,
                    t.op(),
                    WriteMask::XYZW,
                    [1023.0, 1023.0, 1023.0, 3.0],
                );
            } else {
                emit_float7e3_to_f32(b, color, t.op(), WriteMask::XYZ);
                emit_unorm_to_f32(b, color, t.op(), WriteMask::W, [3.0; 4]);
            }
        }
        ColorRenderTargetFormat::Rg16 => {
            b.ishl(t.dst_x(), packed.x(), Operand::u32(16));
            b.mov(t.dst_y(), packed.x());
            b.ishr(t.dst(WriteMask::XY), t.op(), Operand::u32(16));
            b.itof(color.dst(WriteMask::XY), t.op());
            b.mul(
                color.dst(WriteMask::XY),
                color.op(),
                Operand::f32(1.0 / FIXED16_SCALE),
            );
            b.mov(color.dst(ZW), Operand::f32x4([0.0, 0.0, 0.0, 1.0]));
        }
        ColorRenderTargetFormat::Rgba16 => {
            b.ishl(t.dst(XZ), packed.swz(XXYY), Operand::u32(16));
            b.mov(t.dst(YW), packed.swz(XXYY));
            b.ishr(t.dst_all(), t.op(), Operand::u32(16));
            b.itof(color.dst_all(), t.op());
            b.mul(
                color.dst_all(),
                color.op(),
                Operand::f32(1.0 / FIXED16_SCALE),
            );
        }
        ColorRenderTargetFormat::Rg16Float => {
            b.mov(t.dst_x(), packed.x());
            b.ushr(t.dst_y(), packed.x(), Operand::u32(16));
            b.f16_to_f32(color.dst(WriteMask::XY), t.op());
            b.mov(color.dst(ZW), Operand::f32x4([0.0, 0.0, 0.0, 1.0]));
        }
        ColorRenderTargetFormat::Rgba16Float => {
            b.mov(t.dst(XZ), packed.swz(XXYY));
            b.ushr(t.dst(YW), packed.swz(XXYY), Operand::u32(16));
            b.f16_to_f32(color.dst_all(), t.op());
        }
        ColorRenderTargetFormat::R32Float => {
            b.mov(color.dst_x(), packed.x());
            b.mov(color.dst(YZW), Operand::f32x4([0.0, 0.0, 0.0, 1.0]));
        }
        _ => {
            b.mov(color.dst(WriteMask::XY), packed.op());
            b.mov(color.dst(ZW), Operand::f32x4([0.0, 0.0, 0.0, 1.0]));
        }
    }
}

/// Converts linear lanes of `color` to piecewise-linear gamma in place.
pub fn emit_linear_to_pwl_gamma(b: &mut ShaderBuilder, color: &Temp, lanes: WriteMask) {
    let gamma = b.alloc_temp();
    let candidate = b.alloc_temp();
    let below = b.alloc_temp();
    b.mov_sat(color.dst(lanes), color.op());
    b.mul(gamma.dst(lanes), color.op(), Operand::f32(0.5));
    b.add(gamma.dst(lanes), gamma.op(), Operand::f32(0.5));
    b.add(candidate.dst(lanes), color.op(), Operand::f32(0.25));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.5));
    b.movc(gamma.dst(lanes), below.op(), candidate.op(), gamma.op());
    b.mul(candidate.dst(lanes), color.op(), Operand::f32(2.0));
    b.add(candidate.dst(lanes), candidate.op(), Operand::f32(0.125));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.125));
    b.movc(gamma.dst(lanes), below.op(), candidate.op(), gamma.op());
    b.mul(candidate.dst(lanes), color.op(), Operand::f32(4.0));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.0625));
    b.movc(color.dst(lanes), below.op(), candidate.op(), gamma.op());
}

/// Converts piecewise-linear gamma lanes of `color` back to linear in place.
pub fn emit_pwl_gamma_to_linear(b: &mut ShaderBuilder, color: &Temp, lanes: WriteMask) {
    let linear = b.alloc_temp();
    let candidate = b.alloc_temp();
    let below = b.alloc_temp();
    b.mov_sat(color.dst(lanes), color.op());
    b.add(linear.dst(lanes), color.op(), Operand::f32(-0.5));
    b.mul(linear.dst(lanes), linear.op(), Operand::f32(2.0));
    b.add(candidate.dst(lanes), color.op(), Operand::f32(-0.25));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.75));
    b.movc(linear.dst(lanes), below.op(), candidate.op(), linear.op());
    b.add(candidate.dst(lanes), color.op(), Operand::f32(-0.125));
    b.mul(candidate.dst(lanes), candidate.op(), Operand::f32(0.5));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.375));
    b.movc(linear.dst(lanes), below.op(), candidate.op(), linear.op());
    b.mul(candidate.dst(lanes), color.op(), Operand::f32(0.25));
    b.lt(below.dst(lanes), color.op(), Operand::f32(0.25));
    b.movc(color.dst(lanes), below.op(), candidate.op(), linear.op());
}

/// `out.x = umin(ftou(saturate(depth.x) * 0xFFFFFF + 0.5), 0xFFFFFF)`.
pub fn emit_f32_to_unorm24(b: &mut ShaderBuilder, out: &Temp, depth: Operand) {
    emit_f32_to_unorm(b, out, depth, WriteMask::X, [16_777_215.0; 4]);
}

/// Formats sharing each conversion, as switch cases on the raw format value. Gamma shares the
/// `k_8_8_8_8` bit layout but not its conversion.
fn storage_groups() -> Vec<(ColorRenderTargetFormat, Vec<u32>)> {
    let mut groups: Vec<(ColorRenderTargetFormat, Vec<u32>)> = Vec::new();
    for format in ColorRenderTargetFormat::ALL {
        let storage = if format.is_gamma() {
            format
        } else {
            format.storage_format()
        };
        match groups.iter_mut().find(|(layout, _)| *layout == storage) {
            Some((_, raws)) => raws.push(format.raw()),
            None => groups.push((storage, vec![format.raw()])),
        }
    }
    groups
}

/// [`emit_pack`] dispatched on the raw format in `selector`. `written.x` is cleared for unknown
/// formats, which must then not be stored.
pub fn emit_pack_dynamic(
    b: &mut ShaderBuilder,
    selector: Operand,
    color: &Temp,
    packed: &Temp,
    written: &Temp,
) {
    b.mov(written.dst_x(), Operand::u32(u32::MAX));
    b.mov(packed.dst(WriteMask::XY), Operand::u32(0));
    b.begin_switch(selector);
    for (storage, raws) in storage_groups() {
        b.case(&raws);
        emit_pack(b, storage, color, packed);
    }
    b.default_case();
    b.mov(written.dst_x(), Operand::u32(0));
    b.end_switch();
}

/// [`emit_unpack`] dispatched on the raw format in `selector`; unknown formats unpack to zero.
pub fn emit_unpack_dynamic(b: &mut ShaderBuilder, selector: Operand, packed: &Temp, color: &Temp) {
    b.mov(color.dst_all(), Operand::f32(0.0));
    b.begin_switch(selector);
    for (storage, raws) in storage_groups() {
        b.case(&raws);
        emit_unpack(b, storage, packed, color);
    }
    b.end_switch();
}
