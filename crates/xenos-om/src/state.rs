//! Host-side render state of a draw, as supplied by the render target cache.

use crate::edram::{MsaaSamples, ResolutionScale};
use crate::formats::{ColorRenderTargetFormat, ColorWriteMask, DepthRenderTargetFormat};

pub const MAX_COLOR_TARGETS: usize = 4;

/// Xenos compare function. Bit 0 passes on less, bit 1 on equal, bit 2 on greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum CompareFunction {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    #[default]
    Always = 7,
}

impl CompareFunction {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Unordered comparisons (NaN) only pass `Always`.
    pub fn passes<T: PartialOrd>(self, value: T, reference: T) -> bool {
        if self == Self::Always {
            return true;
        }
        let bit = if value < reference {
            1
        } else if value == reference {
            2
        } else if value > reference {
            4
        } else {
            0
        };
        self.bits() & bit != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum StencilOp {
    #[default]
    Keep = 0,
    Zero = 1,
    Replace = 2,
    IncrementClamp = 3,
    DecrementClamp = 4,
    Invert = 5,
    IncrementWrap = 6,
    DecrementWrap = 7,
}

impl StencilOp {
    pub fn apply(self, stencil: u8, reference: u8) -> u8 {
        match self {
            Self::Keep => stencil,
            Self::Zero => 0,
            Self::Replace => reference,
            Self::IncrementClamp => stencil.saturating_add(1),
            Self::DecrementClamp => stencil.saturating_sub(1),
            Self::Invert => !stencil,
            Self::IncrementWrap => stencil.wrapping_add(1),
            Self::DecrementWrap => stencil.wrapping_sub(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub func: CompareFunction,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub reference: u8,
    pub read_mask: u8,
    pub write_mask: u8,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            func: CompareFunction::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            reference: 0,
            read_mask: 0xFF,
            write_mask: 0xFF,
        }
    }
}

impl StencilFaceState {
    /// Function in bits 0..2, then fail, depth-pass and depth-fail ops, 3 bits each.
    pub fn func_ops(&self) -> u32 {
        self.func.bits()
            | ((self.fail_op as u32) << 3)
            | ((self.pass_op as u32) << 6)
            | ((self.depth_fail_op as u32) << 9)
    }
}

/// Xenos blend factor encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlendFactor {
    Zero = 0,
    One = 1,
    SrcColor = 4,
    OneMinusSrcColor = 5,
    SrcAlpha = 6,
    OneMinusSrcAlpha = 7,
    DstColor = 8,
    OneMinusDstColor = 9,
    DstAlpha = 10,
    OneMinusDstAlpha = 11,
    ConstantColor = 12,
    OneMinusConstantColor = 13,
    ConstantAlpha = 14,
    OneMinusConstantAlpha = 15,
    SrcAlphaSaturate = 16,
}

impl BlendFactor {
    pub const ALL: [BlendFactor; 15] = [
        Self::Zero,
        Self::One,
        Self::SrcColor,
        Self::OneMinusSrcColor,
        Self::SrcAlpha,
        Self::OneMinusSrcAlpha,
        Self::DstColor,
        Self::OneMinusDstColor,
        Self::DstAlpha,
        Self::OneMinusDstAlpha,
        Self::ConstantColor,
        Self::OneMinusConstantColor,
        Self::ConstantAlpha,
        Self::OneMinusConstantAlpha,
        Self::SrcAlphaSaturate,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|factor| *factor as u32 == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlendOp {
    Add = 0,
    Subtract = 1,
    Min = 2,
    Max = 3,
    ReverseSubtract = 4,
}

impl BlendOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Add),
            1 => Some(Self::Subtract),
            2 => Some(Self::Min),
            3 => Some(Self::Max),
            4 => Some(Self::ReverseSubtract),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
        op: BlendOp::Add,
    };

    fn bits(self) -> u32 {
        (self.src as u32) | ((self.op as u32) << 5) | ((self.dst as u32) << 8)
    }

    fn from_bits(bits: u32) -> Self {
        Self {
            src: BlendFactor::from_raw(bits & 0x1F).unwrap_or(BlendFactor::Zero),
            op: BlendOp::from_raw((bits >> 5) & 0x7).unwrap_or(BlendOp::Add),
            dst: BlendFactor::from_raw((bits >> 8) & 0x1F).unwrap_or(BlendFactor::Zero),
        }
    }
}

/// `RB_BLENDCONTROL`: color in the low half, alpha in the high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendControl {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl Default for BlendControl {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BlendControl {
    pub const IDENTITY: Self = Self {
        color: BlendComponent::REPLACE,
        alpha: BlendComponent::REPLACE,
    };
    pub const IDENTITY_WORD: u32 = 0x0001_0001;

    pub fn to_word(self) -> u32 {
        self.color.bits() | (self.alpha.bits() << 16)
    }

    /// Unknown factors decode as zero and unknown ops as add.
    pub fn from_word(word: u32) -> Self {
        Self {
            color: BlendComponent::from_bits(word & 0xFFFF),
            alpha: BlendComponent::from_bits(word >> 16),
        }
    }

    pub fn is_identity(self) -> bool {
        self.to_word() == Self::IDENTITY_WORD
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargetDescriptor {
    pub format: ColorRenderTargetFormat,
    pub base_tile: u32,
    pub write_mask: ColorWriteMask,
    pub enabled: bool,
    pub blend: BlendControl,
    /// Power of two applied to the shader color before blending.
    pub exp_bias: i32,
}

impl Default for RenderTargetDescriptor {
    fn default() -> Self {
        Self {
            format: ColorRenderTargetFormat::Rgba8,
            base_tile: 0,
            write_mask: ColorWriteMask::RGBA,
            enabled: false,
            blend: BlendControl::IDENTITY,
            exp_bias: 0,
        }
    }
}

impl RenderTargetDescriptor {
    pub fn is_64bpp(&self) -> bool {
        self.format.is_64bpp()
    }

    pub fn exp_bias_multiplier(&self) -> f32 {
        2f32.powi(self.exp_bias)
    }

    /// Keep mask as written to the system constants; disabled targets keep everything.
    pub fn keep_mask(&self) -> [u32; 2] {
        if self.enabled {
            self.format.keep_mask(self.write_mask)
        } else {
            [u32::MAX; 2]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthStencilDescriptor {
    pub format: DepthRenderTargetFormat,
    pub base_tile: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolygonOffset {
    pub scale: f32,
    pub offset: f32,
}

/// Everything the output merger reads at draw time.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMergerState {
    pub msaa: MsaaSamples,
    pub resolution_scale: ResolutionScale,
    /// Surface pitch in 80-sample tiles, shared by all bound targets.
    pub pitch_tiles: u32,
    pub color_targets: [RenderTargetDescriptor; MAX_COLOR_TARGETS],
    pub depth_stencil: Option<DepthStencilDescriptor>,
    pub depth_func: CompareFunction,
    pub depth_write: bool,
    pub stencil: Option<(StencilFaceState, StencilFaceState)>,
    pub alpha_test: CompareFunction,
    pub alpha_ref: f32,
    pub alpha_to_coverage: bool,
    /// 2-bit dither offsets of the four quad pixels, pixel `(y & 1) * 2 + (x & 1)` at bit
    /// `2 * index`.
    pub alpha_to_coverage_offsets: u8,
    pub viewport_z_min: f32,
    pub viewport_z_max: f32,
    pub polygon_offset_front: PolygonOffset,
    pub polygon_offset_back: PolygonOffset,
    pub blend_constant: [f32; 4],
}

impl Default for OutputMergerState {
    fn default() -> Self {
        Self {
            msaa: MsaaSamples::X1,
            resolution_scale: ResolutionScale::X1,
            pitch_tiles: 1,
            color_targets: [RenderTargetDescriptor::default(); MAX_COLOR_TARGETS],
            depth_stencil: None,
            depth_func: CompareFunction::Always,
            depth_write: false,
            stencil: None,
            alpha_test: CompareFunction::Always,
            alpha_ref: 0.0,
            alpha_to_coverage: false,
            alpha_to_coverage_offsets: 0,
            viewport_z_min: 0.0,
            viewport_z_max: 1.0,
            polygon_offset_front: PolygonOffset::default(),
            polygon_offset_back: PolygonOffset::default(),
            blend_constant: [0.0; 4],
        }
    }
}

impl OutputMergerState {
    /// Whether anything after the shader body can still drop samples.
    pub fn late_discard_possible(&self) -> bool {
        self.alpha_test != CompareFunction::Always || self.alpha_to_coverage
    }
}

/// Disables any enabled target whose base tile is already owned by an earlier enabled target.
/// Returns the indices that were demoted.
pub fn resolve_render_target_aliasing(
    targets: &mut [RenderTargetDescriptor; MAX_COLOR_TARGETS],
) -> Vec<usize> {
    let mut demoted = Vec::new();
    for index in 1..MAX_COLOR_TARGETS {
        if !targets[index].enabled {
            continue;
        }
        let base = targets[index].base_tile;
        if let Some(owner) = (0..index).find(|&i| targets[i].enabled && targets[i].base_tile == base)
        {
            tracing::warn!(
                render_target = index,
                owner,
                base_tile = base,
                "render target aliases an earlier one, disabling it"
            );
            targets[index].enabled = false;
            demoted.push(index);
        }
    }
    demoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_control_layout() {
        assert_eq!(BlendControl::IDENTITY.to_word(), BlendControl::IDENTITY_WORD);
        let alpha_blend = BlendControl {
            color: BlendComponent {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::OneMinusSrcAlpha,
                op: BlendOp::Add,
            },
            alpha: BlendComponent {
                src: BlendFactor::One,
                dst: BlendFactor::Zero,
                op: BlendOp::ReverseSubtract,
            },
        };
        assert_eq!(alpha_blend.to_word(), 0x0081_0706);
        assert_eq!(BlendControl::from_word(alpha_blend.to_word()), alpha_blend);
        assert_eq!(
            BlendControl::from_word(0x0000_0003).color.src,
            BlendFactor::Zero
        );
    }

    #[test]
    fn aliased_targets_are_demoted() {
        let mut targets = [RenderTargetDescriptor::default(); MAX_COLOR_TARGETS];
        for (i, target) in targets.iter_mut().enumerate() {
            target.enabled = true;
            target.base_tile = [10, 20, 10, 20][i];
        }
        targets[1].enabled = false;
        let demoted = resolve_render_target_aliasing(&mut targets);
        assert_eq!(demoted, vec![2]);
        let enabled: Vec<bool> = targets.iter().map(|t| t.enabled).collect();
        assert_eq!(enabled, vec![true, false, false, true]);
    }

    #[test]
    fn stencil_ops_and_compare() {
        assert_eq!(StencilOp::IncrementClamp.apply(255, 0), 255);
        assert_eq!(StencilOp::IncrementWrap.apply(255, 0), 0);
        assert_eq!(StencilOp::DecrementClamp.apply(0, 0), 0);
        assert_eq!(StencilOp::DecrementWrap.apply(0, 0), 255);
        assert_eq!(StencilOp::Invert.apply(0x0F, 0), 0xF0);
        assert_eq!(StencilOp::Replace.apply(1, 7), 7);
        assert!(CompareFunction::Less.passes(1, 2));
        assert!(!CompareFunction::NotEqual.passes(f32::NAN, 1.0));
        assert!(CompareFunction::Always.passes(f32::NAN, 1.0));
    }
}
