//! The system constants buffer read by the generated output merger.
//!
//! Sixteen `vec4<u32>` registers; floats are stored as their bits. Per-target values use the
//! target index as the lane.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use xenos_shader_ir::Lane;

use crate::state::{
    resolve_render_target_aliasing, CompareFunction, OutputMergerState, StencilFaceState,
};

/// Flags, pitch, depth base, alpha-to-mask.
pub const REG_GLOBAL: u32 = 0;
/// Alpha reference, viewport z min, viewport z max.
pub const REG_ALPHA_VIEWPORT: u32 = 1;
/// Front scale, front offset, back scale, back offset.
pub const REG_POLYGON_OFFSET: u32 = 2;
/// Reference, read mask, write mask, [`StencilFaceState::func_ops`].
pub const REG_STENCIL_FRONT: u32 = 3;
pub const REG_STENCIL_BACK: u32 = 4;
pub const REG_RT_BASE: u32 = 5;
pub const REG_RT_FORMAT_FLAGS: u32 = 6;
pub const REG_RT_BLEND: u32 = 7;
pub const REG_RT_EXP_BIAS: u32 = 8;
pub const REG_RT_CLAMP_COLOR_LOW: u32 = 9;
pub const REG_RT_CLAMP_ALPHA_LOW: u32 = 10;
pub const REG_RT_CLAMP_COLOR_HIGH: u32 = 11;
pub const REG_RT_CLAMP_ALPHA_HIGH: u32 = 12;
pub const REG_RT_KEEP0: u32 = 13;
pub const REG_RT_KEEP1: u32 = 14;
pub const REG_BLEND_CONSTANT: u32 = 15;

pub const SYSTEM_CONSTANT_REGISTERS: usize = 16;

/// Lanes of the scalar registers.
pub mod reg {
    use xenos_shader_ir::Lane;

    pub const FLAGS: Lane = Lane::X;
    pub const PITCH: Lane = Lane::Y;
    pub const DEPTH_BASE: Lane = Lane::Z;
    /// Bits 0..7: 2-bit dither offset per quad pixel. Bit 8: alpha to coverage enabled.
    pub const ALPHA_TO_MASK: Lane = Lane::W;

    pub const ALPHA_REF: Lane = Lane::X;
    pub const VIEWPORT_Z_MIN: Lane = Lane::Y;
    pub const VIEWPORT_Z_MAX: Lane = Lane::Z;

    pub const STENCIL_REF: Lane = Lane::X;
    pub const STENCIL_READ_MASK: Lane = Lane::Y;
    pub const STENCIL_WRITE_MASK: Lane = Lane::Z;
    pub const STENCIL_FUNC_OPS: Lane = Lane::W;
}

pub const ALPHA_TO_MASK_ENABLE: u32 = 1 << 8;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct OmFlags: u32 {
        const DEPTH_STENCIL = 1 << 0;
        const DEPTH_PASS_IF_LESS = 1 << 2;
        const DEPTH_PASS_IF_EQUAL = 1 << 3;
        const DEPTH_PASS_IF_GREATER = 1 << 4;
        const DEPTH_WRITE = 1 << 5;
        const STENCIL_TEST = 1 << 6;
        /// Early depth/stencil results may be written immediately: nothing after the shader
        /// body can drop a sample.
        const EARLY_WRITE = 1 << 7;
        const ALPHA_TEST_LESS = 1 << 8;
        const ALPHA_TEST_EQUAL = 1 << 9;
        const ALPHA_TEST_GREATER = 1 << 10;
        const RT0_GAMMA = 1 << 12;
        const RT1_GAMMA = 1 << 13;
        const RT2_GAMMA = 1 << 14;
        const RT3_GAMMA = 1 << 15;
    }
}

impl OmFlags {
    pub const DEPTH_FUNC_SHIFT: u32 = 2;
    pub const ALPHA_TEST_SHIFT: u32 = 8;
    pub const RT_GAMMA_SHIFT: u32 = 12;

    pub fn depth_func(func: CompareFunction) -> Self {
        Self::from_bits_truncate(func.bits() << Self::DEPTH_FUNC_SHIFT)
    }

    pub fn alpha_test(func: CompareFunction) -> Self {
        Self::from_bits_truncate(func.bits() << Self::ALPHA_TEST_SHIFT)
    }

    pub fn rt_gamma(target: usize) -> Self {
        Self::from_bits_truncate(1 << (Self::RT_GAMMA_SHIFT + target as u32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SystemConstants {
    pub registers: [[u32; 4]; SYSTEM_CONSTANT_REGISTERS],
}

impl Default for SystemConstants {
    fn default() -> Self {
        Self::zeroed()
    }
}

fn stencil_register(face: &StencilFaceState) -> [u32; 4] {
    [
        u32::from(face.reference),
        u32::from(face.read_mask),
        u32::from(face.write_mask),
        face.func_ops(),
    ]
}

impl SystemConstants {
    /// Builds the constants of a draw. Aliased color targets are demoted first, so the buffer
    /// never describes two enabled targets sharing a base tile.
    pub fn from_state(state: &OutputMergerState) -> Self {
        let mut targets = state.color_targets;
        resolve_render_target_aliasing(&mut targets);

        let layout_scale = state.resolution_scale.tile_dwords();
        let mut flags = OmFlags::empty();
        let mut depth_base = 0;
        if let Some(depth) = &state.depth_stencil {
            flags |= OmFlags::DEPTH_STENCIL | OmFlags::depth_func(state.depth_func);
            if state.depth_write {
                flags |= OmFlags::DEPTH_WRITE;
            }
            if state.stencil.is_some() {
                flags |= OmFlags::STENCIL_TEST;
            }
            depth_base = depth.base_tile.wrapping_mul(layout_scale);
        }
        if !state.late_discard_possible() {
            flags |= OmFlags::EARLY_WRITE;
        }
        flags |= OmFlags::alpha_test(state.alpha_test);
        for (index, target) in targets.iter().enumerate() {
            if target.enabled && target.format.is_gamma() {
                flags |= OmFlags::rt_gamma(index);
            }
        }

        let mut registers = [[0u32; 4]; SYSTEM_CONSTANT_REGISTERS];
        let alpha_to_mask = if state.alpha_to_coverage {
            ALPHA_TO_MASK_ENABLE | u32::from(state.alpha_to_coverage_offsets)
        } else {
            0
        };
        registers[REG_GLOBAL as usize] = [flags.bits(), state.pitch_tiles, depth_base, alpha_to_mask];
        registers[REG_ALPHA_VIEWPORT as usize] = [
            state.alpha_ref.to_bits(),
            state.viewport_z_min.to_bits(),
            state.viewport_z_max.to_bits(),
            0,
        ];
        registers[REG_POLYGON_OFFSET as usize] = [
            state.polygon_offset_front.scale.to_bits(),
            state.polygon_offset_front.offset.to_bits(),
            state.polygon_offset_back.scale.to_bits(),
            state.polygon_offset_back.offset.to_bits(),
        ];
        let (front, back) = state.stencil.unwrap_or_default();
        registers[REG_STENCIL_FRONT as usize] = stencil_register(&front);
        registers[REG_STENCIL_BACK as usize] = stencil_register(&back);

        for (index, target) in targets.iter().enumerate() {
            let clamp = target.format.clamp();
            let [keep0, keep1] = target.keep_mask();
            let per_target = [
                (REG_RT_BASE, target.base_tile.wrapping_mul(layout_scale)),
                (REG_RT_FORMAT_FLAGS, target.format.format_flags()),
                (REG_RT_BLEND, target.blend.to_word()),
                (REG_RT_EXP_BIAS, target.exp_bias_multiplier().to_bits()),
                (REG_RT_CLAMP_COLOR_LOW, clamp.color_low.to_bits()),
                (REG_RT_CLAMP_ALPHA_LOW, clamp.alpha_low.to_bits()),
                (REG_RT_CLAMP_COLOR_HIGH, clamp.color_high.to_bits()),
                (REG_RT_CLAMP_ALPHA_HIGH, clamp.alpha_high.to_bits()),
                (REG_RT_KEEP0, keep0),
                (REG_RT_KEEP1, keep1),
            ];
            for (register, value) in per_target {
                registers[register as usize][index] = value;
            }
        }
        registers[REG_BLEND_CONSTANT as usize] = state.blend_constant.map(f32::to_bits);

        tracing::trace!(flags = ?flags, "built output-merger system constants");
        Self { registers }
    }

    pub fn flags(&self) -> OmFlags {
        OmFlags::from_bits_retain(self.registers[REG_GLOBAL as usize][reg::FLAGS.index()])
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Value of `register.lane`, as the generated code reads it.
    pub fn get(&self, register: u32, lane: Lane) -> u32 {
        self.registers[register as usize][lane.index()]
    }
}
