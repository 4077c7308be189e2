//! Register-level model of the emitted pixel-stage code.
//!
//! Every register is four untyped 32-bit lanes. Instructions decide how lanes are interpreted
//! (`f32`, `u32` or `i32`), which keeps bit-exact packing code free of implicit conversions.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::X, Lane::Y, Lane::Z, Lane::W];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Lane {
        Lane::ALL[index & 3]
    }

    pub fn mask(self) -> WriteMask {
        WriteMask::from_bits_truncate(1 << self as u8)
    }

    pub fn letter(self) -> char {
        match self {
            Lane::X => 'x',
            Lane::Y => 'y',
            Lane::Z => 'z',
            Lane::W => 'w',
        }
    }
}

/// Source lane selection, indexed by destination lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Swizzle(pub [Lane; 4]);

impl Swizzle {
    pub const XYZW: Swizzle = Swizzle([Lane::X, Lane::Y, Lane::Z, Lane::W]);
    pub const XXXX: Swizzle = Swizzle::splat(Lane::X);
    pub const YYYY: Swizzle = Swizzle::splat(Lane::Y);
    pub const ZZZZ: Swizzle = Swizzle::splat(Lane::Z);
    pub const WWWW: Swizzle = Swizzle::splat(Lane::W);

    pub const fn splat(lane: Lane) -> Swizzle {
        Swizzle([lane; 4])
    }

    /// Applies `inner` first, then `self` (`src.inner.self`).
    pub fn compose(self, inner: Swizzle) -> Swizzle {
        Swizzle(self.0.map(|lane| inner.0[lane.index()]))
    }

    pub fn is_identity(self) -> bool {
        self == Swizzle::XYZW
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct WriteMask: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const W = 1 << 3;
        const XY = Self::X.bits() | Self::Y.bits();
        const XYZ = Self::X.bits() | Self::Y.bits() | Self::Z.bits();
        const XYZW = Self::X.bits() | Self::Y.bits() | Self::Z.bits() | Self::W.bits();
    }
}

impl WriteMask {
    pub fn lanes(self) -> impl Iterator<Item = Lane> {
        Lane::ALL
            .into_iter()
            .filter(move |lane| self.contains(lane.mask()))
    }
}

/// Values the host rasterizer and the translated shader body provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRegister {
    /// `@builtin(position)`: x/y are the resolution-scaled pixel center, z is depth, w is 1/w.
    Position,
    /// All lanes `!0` for front-facing primitives, `0` otherwise.
    FrontFacing,
    /// Host rasterizer sample coverage, in host sample order.
    SampleMask,
    /// Color output `n` of the shader body (only meaningful after [`Node::ShaderBody`]).
    Color(u8),
    /// Depth output of the shader body in every lane.
    Depth,
    /// `!0` in every lane when the shader body killed the pixel.
    Killed,
}

pub const MAX_COLOR_OUTPUTS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Temp(u32),
    Input(InputRegister),
    /// vec4 register of the constants buffer.
    Constant(u32),
    Immediate([u32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modifier {
    #[default]
    None,
    Neg,
    Abs,
    NegAbs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub source: Source,
    pub swizzle: Swizzle,
    pub modifier: Modifier,
}

impl Operand {
    pub fn new(source: Source, swizzle: Swizzle) -> Self {
        Self {
            source,
            swizzle,
            modifier: Modifier::None,
        }
    }

    pub fn temp(index: u32, swizzle: Swizzle) -> Self {
        Self::new(Source::Temp(index), swizzle)
    }

    pub fn input(register: InputRegister, swizzle: Swizzle) -> Self {
        Self::new(Source::Input(register), swizzle)
    }

    pub fn constant(register: u32, lane: Lane) -> Self {
        Self::new(Source::Constant(register), Swizzle::splat(lane))
    }

    pub fn constant_vec(register: u32) -> Self {
        Self::new(Source::Constant(register), Swizzle::XYZW)
    }

    pub fn u32(value: u32) -> Self {
        Self::new(Source::Immediate([value; 4]), Swizzle::XYZW)
    }

    pub fn i32(value: i32) -> Self {
        Self::u32(value as u32)
    }

    pub fn f32(value: f32) -> Self {
        Self::u32(value.to_bits())
    }

    pub fn u32x4(values: [u32; 4]) -> Self {
        Self::new(Source::Immediate(values), Swizzle::XYZW)
    }

    pub fn f32x4(values: [f32; 4]) -> Self {
        Self::u32x4(values.map(f32::to_bits))
    }

    /// Re-swizzles an operand; `swizzle` indexes the operand's current lanes.
    pub fn swizzled(mut self, swizzle: Swizzle) -> Self {
        self.swizzle = swizzle.compose(self.swizzle);
        self
    }

    /// Replicates one lane of the operand.
    pub fn lane(self, lane: Lane) -> Self {
        self.swizzled(Swizzle::splat(lane))
    }

    pub fn neg(mut self) -> Self {
        self.modifier = match self.modifier {
            Modifier::None => Modifier::Neg,
            Modifier::Neg => Modifier::None,
            Modifier::Abs => Modifier::NegAbs,
            Modifier::NegAbs => Modifier::Abs,
        };
        self
    }

    pub fn abs(mut self) -> Self {
        self.modifier = Modifier::Abs;
        self
    }

    /// Lane of the underlying register read for destination lane `lane`.
    pub fn source_lane(&self, lane: Lane) -> Lane {
        self.swizzle.0[lane.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dst {
    pub temp: u32,
    pub mask: WriteMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    U32,
    I32,
    /// Raw bits; modifiers (if any) are applied as `f32`.
    Untyped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Mov,
    /// `src0 != 0 ? src1 : src2`.
    Movc,

    Add,
    Mul,
    Min,
    Max,
    /// Round to nearest, ties to even.
    RoundNe,
    /// Round toward zero.
    RoundZ,
    /// Round toward negative infinity.
    RoundNi,
    DerivXFine,
    DerivYFine,

    /// Float compares, producing `!0` or `0`. Ordered: NaN fails all of them except `Ne`.
    Eq,
    Ne,
    Lt,
    Ge,

    FtoU,
    FtoI,
    UtoF,
    ItoF,
    /// `f32` to IEEE half bits in the low 16 bits, round to nearest even.
    F32toF16,
    /// IEEE half bits in the low 16 bits to `f32`.
    F16toF32,

    IAdd,
    IMul,
    IEq,
    INe,
    ILt,
    IGe,
    ULt,
    UGe,
    IMin,
    IMax,
    UMin,
    UMax,
    And,
    Or,
    Xor,
    Not,
    IShl,
    UShr,
    IShr,
    /// `ubfe width, offset, value`.
    UBfe,
    /// `bfi width, offset, insert, base`.
    Bfi,
    /// Index of the most significant set bit, `!0` for zero.
    FirstBitHi,
}

impl AluOp {
    pub fn arity(self) -> usize {
        use AluOp::*;
        match self {
            Mov | RoundNe | RoundZ | RoundNi | DerivXFine | DerivYFine | FtoU | FtoI | UtoF
            | ItoF | F32toF16 | F16toF32 | Not | FirstBitHi => 1,
            Add | Mul | Min | Max | Eq | Ne | Lt | Ge | IAdd | IMul | IEq | INe | ILt | IGe
            | ULt | UGe | IMin | IMax | UMin | UMax | And | Or | Xor | IShl | UShr | IShr => 2,
            Movc | UBfe => 3,
            Bfi => 4,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use AluOp::*;
        match self {
            Mov => "mov",
            Movc => "movc",
            Add => "add",
            Mul => "mul",
            Min => "min",
            Max => "max",
            RoundNe => "round_ne",
            RoundZ => "round_z",
            RoundNi => "round_ni",
            DerivXFine => "deriv_rtx_fine",
            DerivYFine => "deriv_rty_fine",
            Eq => "eq",
            Ne => "ne",
            Lt => "lt",
            Ge => "ge",
            FtoU => "ftou",
            FtoI => "ftoi",
            UtoF => "utof",
            ItoF => "itof",
            F32toF16 => "f32tof16",
            F16toF32 => "f16tof32",
            IAdd => "iadd",
            IMul => "imul",
            IEq => "ieq",
            INe => "ine",
            ILt => "ilt",
            IGe => "ige",
            ULt => "ult",
            UGe => "uge",
            IMin => "imin",
            IMax => "imax",
            UMin => "umin",
            UMax => "umax",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            IShl => "ishl",
            UShr => "ushr",
            IShr => "ishr",
            UBfe => "ubfe",
            Bfi => "bfi",
            FirstBitHi => "firstbit_hi",
        }
    }

    /// How source `index` is interpreted.
    pub fn source_type(self, index: usize) -> ScalarType {
        use AluOp::*;
        match self {
            Mov => ScalarType::Untyped,
            Movc => {
                if index == 0 {
                    ScalarType::U32
                } else {
                    ScalarType::Untyped
                }
            }
            Add | Mul | Min | Max | RoundNe | RoundZ | RoundNi | DerivXFine | DerivYFine | Eq
            | Ne | Lt | Ge | FtoU | FtoI | F32toF16 => ScalarType::F32,
            ItoF | ILt | IGe | IMin | IMax => ScalarType::I32,
            IShr => {
                if index == 0 {
                    ScalarType::I32
                } else {
                    ScalarType::U32
                }
            }
            // Two's complement add, multiply and equality don't depend on signedness.
            IAdd | IMul | IEq | INe | UtoF | F16toF32 | ULt | UGe | UMin | UMax | And | Or
            | Xor | Not | IShl | UShr | UBfe | Bfi | FirstBitHi => ScalarType::U32,
        }
    }

    /// Whether `saturate` is meaningful: float results, and `mov`, which clamps its source as a
    /// float when saturating.
    pub fn accepts_saturate(self) -> bool {
        self == AluOp::Mov || self.produces_float()
    }

    pub fn produces_float(self) -> bool {
        use AluOp::*;
        matches!(
            self,
            Add | Mul
                | Min
                | Max
                | RoundNe
                | RoundZ
                | RoundNi
                | DerivXFine
                | DerivYFine
                | UtoF
                | ItoF
                | F16toF32
        )
    }

    pub fn is_derivative(self) -> bool {
        matches!(self, AluOp::DerivXFine | AluOp::DerivYFine)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Alu {
        op: AluOp,
        dst: Dst,
        srcs: Vec<Operand>,
        saturate: bool,
    },
    /// Loads `edram[address]` into every lane of `dst.mask`, using the matching address lane.
    LoadEdram { dst: Dst, address: Operand },
    /// Stores lane x of `value` to `edram[address.x]`.
    StoreEdram { address: Operand, value: Operand },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Test {
    NonZero,
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<u32>,
    pub body: Vec<Node>,
}

/// Control-node tree. Conditions and selectors read lane x of their operand. Switch cases
/// never fall through.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Inst(Inst),
    Comment(String),
    If {
        cond: Operand,
        test: Test,
        then_block: Vec<Node>,
        else_block: Option<Vec<Node>>,
    },
    Switch {
        selector: Operand,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Node>>,
    },
    /// Where the translated pixel shader body runs. Only valid at the top level.
    ShaderBody,
    Return,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub nodes: Vec<Node>,
    pub temp_count: u32,
}

impl Program {
    /// Visits every instruction, including those nested in control flow.
    pub fn for_each_inst(&self, mut f: impl FnMut(&Inst)) {
        fn visit(nodes: &[Node], f: &mut dyn FnMut(&Inst)) {
            for node in nodes {
                match node {
                    Node::Inst(inst) => f(inst),
                    Node::If {
                        then_block,
                        else_block,
                        ..
                    } => {
                        visit(then_block, f);
                        if let Some(else_block) = else_block {
                            visit(else_block, f);
                        }
                    }
                    Node::Switch { cases, default, .. } => {
                        for case in cases {
                            visit(&case.body, f);
                        }
                        if let Some(default) = default {
                            visit(default, f);
                        }
                    }
                    Node::Comment(_) | Node::ShaderBody | Node::Return => {}
                }
            }
        }
        visit(&self.nodes, &mut f);
    }

    pub fn count_insts(&self, mut pred: impl FnMut(&Inst) -> bool) -> usize {
        let mut count = 0;
        self.for_each_inst(|inst| {
            if pred(inst) {
                count += 1;
            }
        });
        count
    }

    pub fn edram_load_count(&self) -> usize {
        self.count_insts(|inst| matches!(inst, Inst::LoadEdram { .. }))
    }

    pub fn edram_store_count(&self) -> usize {
        self.count_insts(|inst| matches!(inst, Inst::StoreEdram { .. }))
    }

    pub fn has_shader_body(&self) -> bool {
        self.nodes.iter().any(|node| matches!(node, Node::ShaderBody))
    }
}
