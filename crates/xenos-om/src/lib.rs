//! Output-merger code generation for Xenos EDRAM emulation.
//!
//! The host GPU's blending and depth/stencil hardware can't reproduce the Xenos EDRAM: its tiled
//! layout, depth and stencil interleaved in one dword, and packed formats such as 7e3 floats and
//! ±32 fixed point. Instead, every pixel shader gets an output-merger epilogue (and prologue, when
//! depth/stencil can run early) that performs these operations itself against EDRAM bound as a
//! raw storage buffer.
//!
//! [`generate_output_merger`] turns an [`OutputMergerKey`] into a [`xenos_shader_ir::Program`];
//! [`OutputMergerCache`] memoizes programs together with their WGSL. Everything that varies per
//! draw without changing the key is read from the [`SystemConstants`] buffer.

pub mod address;
pub mod alpha;
pub mod blend;
pub mod cache;
pub mod codec;
pub mod constants;
pub mod coverage;
pub mod depth_stencil;
pub mod edram;
pub mod emitter;
mod error;
pub mod formats;
pub mod state;

pub use address::{EdramLayout, EdramSurface};
pub use alpha::{AlphaToCoveragePolicy, DitherThresholds};
pub use cache::{GeneratedOutputMerger, OutputMergerCache};
pub use constants::{OmFlags, SystemConstants};
pub use coverage::resolve_coverage;
pub use edram::{MsaaSamples, ResolutionScale};
pub use emitter::{generate_output_merger, ColorTargetKey, OutputMergerKey, PixelShaderTraits};
pub use error::OmError;
pub use formats::{
    ColorRenderTargetFormat, ColorWriteMask, DepthRenderTargetFormat, FormatBinding,
};
pub use state::{
    resolve_render_target_aliasing, BlendComponent, BlendControl, BlendFactor, BlendOp,
    CompareFunction, DepthStencilDescriptor, OutputMergerState, PolygonOffset,
    RenderTargetDescriptor, StencilFaceState, StencilOp,
};
