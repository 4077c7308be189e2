//! Register-level shader IR used to emit render-output code for Xenos EDRAM emulation.
//!
//! [`ShaderBuilder`] records a tree of instructions and structured control flow, [`Program::walk`]
//! drives any [`IsaBackend`], and [`wgsl::generate_wgsl`] lowers a program to a WGSL fragment
//! shader. [`interp::Interpreter`] executes programs on the host with GPU quad semantics, which is
//! what the tests of the code generators are built on.

pub mod backend;
pub mod builder;
pub mod interp;
pub mod ir;
mod temp;
pub mod wgsl;

pub use backend::{Disassembler, EmissionStats, IsaBackend};
pub use builder::{BuilderError, ShaderBuilder};
pub use interp::{EdramMemory, Interpreter, Invocation, PixelBodyOutput, QuadOutcome};
pub use ir::{
    AluOp, Dst, Inst, InputRegister, Lane, Modifier, Node, Operand, Program, ScalarType, Source,
    Swizzle, SwitchCase, Test, WriteMask, MAX_COLOR_OUTPUTS,
};
pub use temp::Temp;
pub use wgsl::{generate_wgsl, WgslError, WgslOptions, WgslOutput};
