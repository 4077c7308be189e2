//! Render target formats and host-side reference codecs.
//!
//! The host codecs perform the same sequence of `f32` operations as the code emitted by
//! [`crate::codec`], so they can be used to predict EDRAM contents bit for bit.

use bitflags::bitflags;
use half::f16;

/// Xenos `ColorRenderTargetFormat` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ColorRenderTargetFormat {
    /// `k_8_8_8_8`
    Rgba8 = 0,
    /// `k_8_8_8_8_GAMMA`: `k_8_8_8_8` bits holding piecewise-linear gamma. Blending is linear.
    Rgba8Gamma = 1,
    /// `k_2_10_10_10`
    Rgb10A2 = 2,
    /// `k_2_10_10_10_FLOAT`: 7e3 RGB, 2-bit unorm alpha.
    Rgb10A2Float = 3,
    /// `k_16_16`: signed fixed point, range -32 to 32.
    Rg16 = 4,
    /// `k_16_16_16_16`
    Rgba16 = 5,
    /// `k_16_16_FLOAT`
    Rg16Float = 6,
    /// `k_16_16_16_16_FLOAT`
    Rgba16Float = 7,
    /// `k_2_10_10_10_AS_10_10_10_10`
    Rgb10A2AsRgba10 = 10,
    /// `k_2_10_10_10_FLOAT_AS_16_16_16_16`
    Rgb10A2FloatAsRgba16 = 12,
    /// `k_32_FLOAT`
    R32Float = 14,
    /// `k_32_32_FLOAT`
    Rg32Float = 15,
}

/// Clamp applied to color before blending and to blend factors, for fixed-point components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorClamp {
    pub color_low: f32,
    pub alpha_low: f32,
    pub color_high: f32,
    pub alpha_high: f32,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ColorWriteMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const RGB = Self::R.bits() | Self::G.bits() | Self::B.bits();
        const RGBA = Self::RGB.bits() | Self::A.bits();
    }
}

/// Bits of the per-target format flags word in the system constants.
pub mod format_flags {
    /// Raw [`super::ColorRenderTargetFormat`] value.
    pub const FORMAT_MASK: u32 = 0xF;
    pub const IS_64BPP_SHIFT: u32 = 4;
    pub const IS_64BPP: u32 = 1 << IS_64BPP_SHIFT;
    pub const COLOR_FIXED_POINT: u32 = 1 << 5;
    pub const ALPHA_FIXED_POINT: u32 = 1 << 6;
}

pub const FIXED16_MAX: f32 = 32.0;
/// Steps per unit of the 16-bit fixed-point formats.
pub const FIXED16_SCALE: f32 = 1024.0;
pub const HALF_MAX: f32 = 65504.0;
pub const FLOAT7E3_MAX: f32 = 31.875;
pub const FLOAT7E3_MAX_BITS: u32 = 0x41FF_0000;
/// Largest value representable in 20e4.
pub const FLOAT20E4_MAX_BITS: u32 = 0x3FFF_FFF8;

impl ColorRenderTargetFormat {
    pub const ALL: [ColorRenderTargetFormat; 12] = [
        Self::Rgba8,
        Self::Rgba8Gamma,
        Self::Rgb10A2,
        Self::Rgb10A2Float,
        Self::Rg16,
        Self::Rgba16,
        Self::Rg16Float,
        Self::Rgba16Float,
        Self::Rgb10A2AsRgba10,
        Self::Rgb10A2FloatAsRgba16,
        Self::R32Float,
        Self::Rg32Float,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.raw() == raw)
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn is_64bpp(self) -> bool {
        matches!(self, Self::Rgba16 | Self::Rgba16Float | Self::Rg32Float)
    }

    pub fn is_gamma(self) -> bool {
        self == Self::Rgba8Gamma
    }

    /// Format whose bit layout is used in EDRAM. Gamma and the `_AS_` reinterpretations share
    /// the layout of their base format.
    pub fn storage_format(self) -> Self {
        match self {
            Self::Rgba8Gamma => Self::Rgba8,
            Self::Rgb10A2AsRgba10 => Self::Rgb10A2,
            Self::Rgb10A2FloatAsRgba16 => Self::Rgb10A2Float,
            other => other,
        }
    }

    pub fn color_is_fixed_point(self) -> bool {
        matches!(
            self.storage_format(),
            Self::Rgba8 | Self::Rgb10A2 | Self::Rg16 | Self::Rgba16
        )
    }

    pub fn alpha_is_fixed_point(self) -> bool {
        self.color_is_fixed_point() || self.storage_format() == Self::Rgb10A2Float
    }

    pub fn clamp(self) -> ColorClamp {
        let (color_low, color_high) = match self.storage_format() {
            Self::Rgba8 | Self::Rgb10A2 => (0.0, 1.0),
            Self::Rgb10A2Float => (0.0, FLOAT7E3_MAX),
            Self::Rg16 | Self::Rgba16 => (-FIXED16_MAX, FIXED16_MAX),
            Self::Rg16Float | Self::Rgba16Float => (-HALF_MAX, HALF_MAX),
            _ => (f32::NEG_INFINITY, f32::INFINITY),
        };
        let (alpha_low, alpha_high) = match self.storage_format() {
            Self::Rgb10A2Float => (0.0, 1.0),
            _ => (color_low, color_high),
        };
        ColorClamp {
            color_low,
            alpha_low,
            color_high,
            alpha_high,
        }
    }

    pub fn format_flags(self) -> u32 {
        let mut flags = self.raw();
        if self.is_64bpp() {
            flags |= format_flags::IS_64BPP;
        }
        if self.color_is_fixed_point() {
            flags |= format_flags::COLOR_FIXED_POINT;
        }
        if self.alpha_is_fixed_point() {
            flags |= format_flags::ALPHA_FIXED_POINT;
        }
        flags
    }

    /// Bits of the packed pixel preserved from EDRAM for channels outside `write_mask`. The second
    /// dword of 32bpp formats is always fully kept.
    pub fn keep_mask(self, write_mask: ColorWriteMask) -> [u32; 2] {
        let channel_bits: [(usize, u32); 4] = match self.storage_format() {
            Self::Rgba8 => [
                (0, 0x0000_00FF),
                (0, 0x0000_FF00),
                (0, 0x00FF_0000),
                (0, 0xFF00_0000),
            ],
            Self::Rgb10A2 | Self::Rgb10A2Float => [
                (0, 0x0000_03FF),
                (0, 0x000F_FC00),
                (0, 0x3FF0_0000),
                (0, 0xC000_0000),
            ],
            Self::Rg16 | Self::Rg16Float => [(0, 0x0000_FFFF), (0, 0xFFFF_0000), (0, 0), (0, 0)],
            Self::Rgba16 | Self::Rgba16Float => [
                (0, 0x0000_FFFF),
                (0, 0xFFFF_0000),
                (1, 0x0000_FFFF),
                (1, 0xFFFF_0000),
            ],
            Self::R32Float => [(0, u32::MAX), (0, 0), (0, 0), (0, 0)],
            _ => [(0, u32::MAX), (1, u32::MAX), (0, 0), (0, 0)],
        };
        let mut keep = [0u32, if self.is_64bpp() { 0 } else { u32::MAX }];
        let channels = [
            ColorWriteMask::R,
            ColorWriteMask::G,
            ColorWriteMask::B,
            ColorWriteMask::A,
        ];
        for (channel, (dword, bits)) in channels.into_iter().zip(channel_bits) {
            if !write_mask.contains(channel) {
                keep[dword] |= bits;
            }
        }
        keep
    }
}

/// How the generated code learns a color target's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatBinding {
    /// Known when the output merger is generated; conversions are emitted for this format only.
    Static(ColorRenderTargetFormat),
    /// Read from the format flags in the system constants, dispatched with a runtime switch.
    Dynamic,
}

impl FormatBinding {
    pub fn static_format(self) -> Option<ColorRenderTargetFormat> {
        match self {
            Self::Static(format) => Some(format),
            Self::Dynamic => None,
        }
    }
}

/// Xenos `DepthRenderTargetFormat` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum DepthRenderTargetFormat {
    /// 24-bit unorm depth, 8-bit stencil.
    #[default]
    D24S8 = 0,
    /// 20e4 float depth, 8-bit stencil.
    D24FS8 = 1,
}

impl DepthRenderTargetFormat {
    pub fn encode_depth(self, depth: f32) -> u32 {
        match self {
            Self::D24S8 => f32_to_unorm24(depth),
            Self::D24FS8 => f32_to_float20e4(depth),
        }
    }

    pub fn decode_depth(self, depth24: u32) -> f32 {
        match self {
            Self::D24S8 => unorm24_to_f32(depth24),
            Self::D24FS8 => float20e4_to_f32(depth24),
        }
    }
}

/// Packs a depth/stencil dword: depth in bits 8..31, stencil in bits 0..7.
pub fn pack_depth_stencil(depth24: u32, stencil: u8) -> u32 {
    (depth24 << 8) | u32::from(stencil)
}

pub(crate) fn saturate(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `max + 0.5` can round up to the next integer for 24-bit maxima, hence the final clamp.
pub fn f32_to_unorm(value: f32, max: f32) -> u32 {
    let scaled = saturate(value) * max;
    ((scaled + 0.5) as u32).min(max as u32)
}

pub fn unorm_to_f32(value: u32, max: f32) -> f32 {
    value as f32 * (1.0 / max)
}

pub fn f32_to_unorm24(value: f32) -> u32 {
    f32_to_unorm(value, 16_777_215.0)
}

pub fn unorm24_to_f32(value: u32) -> f32 {
    unorm_to_f32(value & 0xFF_FFFF, 16_777_215.0)
}

/// Shared float-to-small-float step: rebias normals, shift denormals, round to nearest even.
fn pack_small_float(bits: u32, min_normal_bits: u32, rebias: u32, denormal_base: u32, drop: u32, mask: u32) -> u32 {
    let biased = if bits < min_normal_bits {
        let shift = denormal_base.wrapping_sub(bits >> 23).min(24);
        ((bits & 0x7F_FFFF) | 0x80_0000) >> shift
    } else {
        bits.wrapping_add(rebias)
    };
    let half_ulp = (1u32 << (drop - 1)) - 1;
    let rounded = biased
        .wrapping_add(half_ulp)
        .wrapping_add((biased >> drop) & 1);
    (rounded >> drop) & mask
}

/// Unsigned 7e3 (7-bit mantissa, 3-bit exponent) in the low 10 bits.
pub fn f32_to_float7e3(value: f32) -> u32 {
    let clamped = value.max(0.0).min(FLOAT7E3_MAX);
    let bits = clamped.to_bits() & 0x7FFF_FFFF;
    pack_small_float(bits, 0x3E80_0000, 0xC200_0000, 125, 16, 0x3FF)
}

pub fn float7e3_to_f32(value: u32) -> f32 {
    unpack_small_float(value & 0x3FF, 7, 124)
}

/// Unsigned 20e4 (20-bit mantissa, 4-bit exponent) in the low 24 bits.
pub fn f32_to_float20e4(value: f32) -> u32 {
    let clamped = value.max(0.0).min(f32::from_bits(FLOAT20E4_MAX_BITS));
    let bits = clamped.to_bits() & 0x7FFF_FFFF;
    pack_small_float(bits, 0x3880_0000, 0xC800_0000, 113, 3, 0xFF_FFFF)
}

pub fn float20e4_to_f32(value: u32) -> f32 {
    unpack_small_float(value & 0xFF_FFFF, 20, 112)
}

fn unpack_small_float(value: u32, mantissa_bits: u32, rebias: u32) -> f32 {
    if value == 0 {
        return 0.0;
    }
    let mantissa_mask = (1u32 << mantissa_bits) - 1;
    let mut exponent = (value >> mantissa_bits) as i32;
    let mut mantissa = value & mantissa_mask;
    if exponent == 0 {
        let msb = 31 - mantissa.leading_zeros();
        exponent = msb as i32 - (mantissa_bits as i32 - 1);
        mantissa = (mantissa << (mantissa_bits - msb)) & mantissa_mask;
    }
    let exponent = (exponent + rebias as i32) as u32;
    f32::from_bits((exponent << 23) | (mantissa << (23 - mantissa_bits)))
}

pub fn f32_to_fixed16(value: f32) -> u32 {
    let clamped = value.max(-FIXED16_MAX).min(FIXED16_MAX);
    let steps = (clamped * FIXED16_SCALE).round_ties_even() as i32;
    (steps.clamp(-32768, 32767) as u32) & 0xFFFF
}

pub fn fixed16_to_f32(value: u32) -> f32 {
    (value as u16 as i16) as f32 * (1.0 / FIXED16_SCALE)
}

pub fn f32_to_half(value: f32) -> u32 {
    u32::from(f16::from_f32(value.max(-HALF_MAX).min(HALF_MAX)).to_bits())
}

pub fn half_to_f32(value: u32) -> f32 {
    f16::from_bits(value as u16).to_f32()
}

/// Piecewise-linear approximation of the sRGB curve used by `k_8_8_8_8_GAMMA`.
pub fn linear_to_pwl_gamma(linear: f32) -> f32 {
    let l = saturate(linear);
    if l < 0.0625 {
        l * 4.0
    } else if l < 0.125 {
        l * 2.0 + 0.125
    } else if l < 0.5 {
        l + 0.25
    } else {
        l * 0.5 + 0.5
    }
}

pub fn pwl_gamma_to_linear(gamma: f32) -> f32 {
    let g = saturate(gamma);
    if g < 0.25 {
        g * 0.25
    } else if g < 0.375 {
        (g - 0.125) * 0.5
    } else if g < 0.75 {
        g - 0.25
    } else {
        (g - 0.5) * 2.0
    }
}

/// Packs `color` into one (32bpp) or two (64bpp) dwords. Unused dwords are zero.
pub fn pack_color(format: ColorRenderTargetFormat, color: [f32; 4]) -> [u32; 2] {
    let [mut r, mut g, mut b, a] = color;
    if format.is_gamma() {
        [r, g, b] = [r, g, b].map(linear_to_pwl_gamma);
    }
    match format.storage_format() {
        ColorRenderTargetFormat::Rgba8 => [
            f32_to_unorm(r, 255.0)
                | (f32_to_unorm(g, 255.0) << 8)
                | (f32_to_unorm(b, 255.0) << 16)
                | (f32_to_unorm(a, 255.0) << 24),
            0,
        ],
        ColorRenderTargetFormat::Rgb10A2 => [
            f32_to_unorm(r, 1023.0)
                | (f32_to_unorm(g, 1023.0) << 10)
                | (f32_to_unorm(b, 1023.0) << 20)
                | (f32_to_unorm(a, 3.0) << 30),
            0,
        ],
        ColorRenderTargetFormat::Rgb10A2Float => [
            f32_to_float7e3(r)
                | (f32_to_float7e3(g) << 10)
                | (f32_to_float7e3(b) << 20)
                | (f32_to_unorm(a, 3.0) << 30),
            0,
        ],
        ColorRenderTargetFormat::Rg16 => [f32_to_fixed16(r) | (f32_to_fixed16(g) << 16), 0],
        ColorRenderTargetFormat::Rgba16 => [
            f32_to_fixed16(r) | (f32_to_fixed16(g) << 16),
            f32_to_fixed16(b) | (f32_to_fixed16(a) << 16),
        ],
        ColorRenderTargetFormat::Rg16Float => [f32_to_half(r) | (f32_to_half(g) << 16), 0],
        ColorRenderTargetFormat::Rgba16Float => [
            f32_to_half(r) | (f32_to_half(g) << 16),
            f32_to_half(b) | (f32_to_half(a) << 16),
        ],
        ColorRenderTargetFormat::R32Float => [r.to_bits(), 0],
        _ => [r.to_bits(), g.to_bits()],
    }
}

/// Unpacks a pixel to linear values; channels the format lacks read as `(0, 0, 0, 1)`.
pub fn unpack_color(format: ColorRenderTargetFormat, packed: [u32; 2]) -> [f32; 4] {
    let [p0, p1] = packed;
    match format.storage_format() {
        ColorRenderTargetFormat::Rgba8 => std::array::from_fn(|i| {
            let value = unorm_to_f32((p0 >> (8 * i)) & 0xFF, 255.0);
            if format.is_gamma() && i < 3 {
                pwl_gamma_to_linear(value)
            } else {
                value
            }
        }),
        ColorRenderTargetFormat::Rgb10A2 => [
            unorm_to_f32(p0 & 0x3FF, 1023.0),
            unorm_to_f32((p0 >> 10) & 0x3FF, 1023.0),
            unorm_to_f32((p0 >> 20) & 0x3FF, 1023.0),
            unorm_to_f32(p0 >> 30, 3.0),
        ],
        ColorRenderTargetFormat::Rgb10A2Float => [
            float7e3_to_f32(p0),
            float7e3_to_f32(p0 >> 10),
            float7e3_to_f32(p0 >> 20),
            unorm_to_f32(p0 >> 30, 3.0),
        ],
        ColorRenderTargetFormat::Rg16 => [fixed16_to_f32(p0), fixed16_to_f32(p0 >> 16), 0.0, 1.0],
        ColorRenderTargetFormat::Rgba16 => [
            fixed16_to_f32(p0),
            fixed16_to_f32(p0 >> 16),
            fixed16_to_f32(p1),
            fixed16_to_f32(p1 >> 16),
        ],
        ColorRenderTargetFormat::Rg16Float => [half_to_f32(p0), half_to_f32(p0 >> 16), 0.0, 1.0],
        ColorRenderTargetFormat::Rgba16Float => [
            half_to_f32(p0),
            half_to_f32(p0 >> 16),
            half_to_f32(p1),
            half_to_f32(p1 >> 16),
        ],
        ColorRenderTargetFormat::R32Float => [f32::from_bits(p0), 0.0, 0.0, 1.0],
        _ => [f32::from_bits(p0), f32::from_bits(p1), 0.0, 1.0],
    }
}
