//! Tiled EDRAM addressing.
//!
//! Samples, not pixels, are tiled: a pixel position is first shifted into the sample grid of the
//! MSAA mode, then split into a tile coordinate and an offset inside the 80x16 (times the
//! resolution scale) tile. Depth/stencil tiles store their left and right 40-sample halves
//! swapped relative to color tiles.

use xenos_shader_ir::{InputRegister, Lane, Operand, ShaderBuilder, Swizzle, Temp, WriteMask};

use crate::constants::{reg, REG_GLOBAL, REG_RT_BASE, REG_RT_FORMAT_FLAGS};
use crate::edram::{MsaaSamples, ResolutionScale};
use crate::formats::format_flags;

/// Reciprocal of 80 for `(x * 0xCCCD) >> 22`, exact for every sample coordinate EDRAM can hold.
const DIV_80_MULTIPLIER: u32 = 0xCCCD;
const DIV_80_SHIFT: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdramSurface {
    Color { is_64bpp: bool },
    DepthStencil,
}

/// Addressing parameters shared by every target bound to a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdramLayout {
    pub msaa: MsaaSamples,
    pub resolution_scale: ResolutionScale,
    pub pitch_tiles: u32,
}

impl EdramLayout {
    /// Dword offset of a base tile at this resolution scale.
    pub fn base_dwords(&self, base_tile: u32) -> u32 {
        base_tile.wrapping_mul(self.resolution_scale.tile_dwords())
    }

    /// Offset of sample 0 of pixel `(x, y)` relative to the surface base, in 32bpp units.
    pub fn sample0_offset(&self, x: u32, y: u32, depth_swap: bool) -> u32 {
        let scale = self.resolution_scale;
        let sx = x << self.msaa.log2_x();
        let sy = y << self.msaa.log2_y();
        let tile_x = sx.wrapping_mul(DIV_80_MULTIPLIER) >> (DIV_80_SHIFT + scale.log2());
        let tile_y = sy >> (4 + scale.log2());
        let mut in_x = sx.wrapping_sub(tile_x.wrapping_mul(scale.tile_width()));
        let in_y = sy & (scale.tile_height() - 1);
        if depth_swap {
            in_x += scale.tile_width() / 2;
            if in_x >= scale.tile_width() {
                in_x -= scale.tile_width();
            }
        }
        tile_y
            .wrapping_mul(self.pitch_tiles)
            .wrapping_add(tile_x)
            .wrapping_mul(scale.tile_dwords())
            .wrapping_add(in_y * scale.tile_width())
            .wrapping_add(in_x)
    }

    /// Dword address of `sample` of pixel `(x, y)` (resolution-scaled pixel coordinates).
    /// Nothing is bounds checked.
    pub fn address(&self, surface: EdramSurface, base_tile: u32, x: u32, y: u32, sample: u32) -> u32 {
        let sample_offset = self
            .msaa
            .sample_offset(sample, self.resolution_scale.tile_width());
        match surface {
            EdramSurface::Color { is_64bpp } => {
                let offset = self.sample0_offset(x, y, false).wrapping_add(sample_offset);
                self.base_dwords(base_tile)
                    .wrapping_add(offset << u32::from(is_64bpp))
            }
            EdramSurface::DepthStencil => self
                .base_dwords(base_tile)
                .wrapping_add(self.sample0_offset(x, y, true))
                .wrapping_add(sample_offset),
        }
    }
}

/// Computes the sample-0 offsets of the current pixel.
///
/// `out.color` receives the unbased color offset in 32bpp units, `out.depth` (when requested)
/// the full depth/stencil address including the depth base from the constants.
pub fn emit_sample0_addresses(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    out: &Temp,
    color: Lane,
    depth: Option<Lane>,
) {
    let tile_width = scale.tile_width();
    let t = b.alloc_temp();
    let row = b.alloc_temp();

    b.ftou(t.dst(WriteMask::XY), Operand::input(InputRegister::Position, Swizzle::XYZW));
    b.ishl(
        t.dst(WriteMask::XY),
        t.op(),
        Operand::u32x4([msaa.log2_x(), msaa.log2_y(), 0, 0]),
    );
    b.imul(t.dst_z(), t.x(), Operand::u32(DIV_80_MULTIPLIER));
    b.ushr(t.dst_z(), t.z(), Operand::u32(DIV_80_SHIFT + scale.log2()));
    b.ushr(t.dst_w(), t.y(), Operand::u32(4 + scale.log2()));
    b.imul(row.dst_x(), t.z(), Operand::u32(tile_width));
    b.iadd(t.dst_x(), t.x(), row.x().neg());
    b.and(t.dst_y(), t.y(), Operand::u32(scale.tile_height() - 1));

    // Tile start, then the row inside the tile.
    b.imul(t.dst_w(), t.w(), Operand::constant(REG_GLOBAL, reg::PITCH));
    b.iadd(t.dst_w(), t.w(), t.z());
    b.imul(t.dst_w(), t.w(), Operand::u32(scale.tile_dwords()));
    b.imul(row.dst_x(), t.y(), Operand::u32(tile_width));
    b.iadd(t.dst_w(), t.w(), row.x());

    b.iadd(out.dst_lane(color), t.w(), t.x());

    if let Some(depth) = depth {
        b.iadd(t.dst_x(), t.x(), Operand::u32(tile_width / 2));
        b.uge(row.dst_y(), t.x(), Operand::u32(tile_width));
        b.iadd(row.dst_z(), t.x(), Operand::u32(tile_width).neg());
        b.movc(t.dst_x(), row.y(), row.z(), t.x());
        b.iadd(out.dst_lane(depth), t.w(), t.x());
        b.iadd(
            out.dst_lane(depth),
            out.lane(depth),
            Operand::constant(REG_GLOBAL, reg::DEPTH_BASE),
        );
    }
}

/// `dst = depth_address + sample offset`.
pub fn emit_depth_sample_address(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    dst: &Temp,
    lane: Lane,
    depth_address: Operand,
    sample: u32,
) {
    let offset = msaa.sample_offset(sample, scale.tile_width());
    b.iadd(dst.dst_lane(lane), depth_address, Operand::u32(offset));
}

/// `dst = rt_base[target] + ((color_offset + sample offset) << is_64bpp)`.
///
/// `is_64bpp` of `None` reads the width from the target's runtime format flags.
#[allow(clippy::too_many_arguments)]
pub fn emit_color_sample_address(
    b: &mut ShaderBuilder,
    msaa: MsaaSamples,
    scale: ResolutionScale,
    dst: &Temp,
    lane: Lane,
    color_offset: Operand,
    sample: u32,
    target: usize,
    is_64bpp: Option<bool>,
) {
    let offset = msaa.sample_offset(sample, scale.tile_width());
    let target_lane = Lane::from_index(target);
    b.iadd(dst.dst_lane(lane), color_offset, Operand::u32(offset));
    match is_64bpp {
        Some(false) => {}
        Some(true) => b.ishl(dst.dst_lane(lane), dst.lane(lane), Operand::u32(1)),
        None => {
            let shift = b.alloc_temp();
            b.ubfe(
                shift.dst_x(),
                Operand::u32(1),
                Operand::u32(format_flags::IS_64BPP_SHIFT),
                Operand::constant(REG_RT_FORMAT_FLAGS, target_lane),
            );
            b.ishl(dst.dst_lane(lane), dst.lane(lane), shift.x());
        }
    }
    b.iadd(
        dst.dst_lane(lane),
        dst.lane(lane),
        Operand::constant(REG_RT_BASE, target_lane),
    );
}
