use std::rc::Rc;

use thiserror::Error;

use crate::ir::{AluOp, Dst, Inst, Node, Operand, Program, SwitchCase, Test};
use crate::temp::{Temp, TempPool};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("`else` emitted outside of an `if` block")]
    ElseWithoutIf,
    #[error("`else` emitted twice for the same `if` block")]
    DuplicateElse,
    #[error("`end_if` emitted while the innermost block is not an `if`")]
    UnbalancedEndIf,
    #[error("`case` emitted outside of a `switch` block")]
    CaseWithoutSwitch,
    #[error("`default` emitted twice in one `switch` block")]
    DuplicateDefault,
    #[error("`end_switch` emitted while the innermost block is not a `switch`")]
    UnbalancedEndSwitch,
    #[error("node emitted inside a `switch` before its first `case`")]
    NodeOutsideCase,
    #[error("the shader body placeholder must be at the top level")]
    NestedShaderBody,
    #[error("the shader body placeholder was emitted more than once")]
    DuplicateShaderBody,
    #[error("{0} control-flow block(s) left open")]
    UnclosedBlocks(usize),
    #[error("`{op}` expects {expected} source operand(s), got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
}

enum OpenCase {
    Case(Vec<u32>),
    Default,
}

enum Frame {
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
        open: Option<(OpenCase, Vec<Node>)>,
    },
}

/// Emission API for the output-merger code generator.
///
/// Misuse of the block structure does not panic: the first error is recorded, later calls keep
/// going, and [`ShaderBuilder::finish`] reports it.
pub struct ShaderBuilder {
    pool: Rc<TempPool>,
    root: Vec<Node>,
    stack: Vec<Frame>,
    has_shader_body: bool,
    error: Option<BuilderError>,
}

impl Default for ShaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! unary_ops {
    ($($(#[$meta:meta])* $name:ident => $op:ident,)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, dst: Dst, a: Operand) {
                self.alu(AluOp::$op, dst, &[a]);
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$meta:meta])* $name:ident => $op:ident,)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, dst: Dst, a: Operand, b: Operand) {
                self.alu(AluOp::$op, dst, &[a, b]);
            }
        )*
    };
}

impl ShaderBuilder {
    pub fn new() -> Self {
        Self {
            pool: Rc::new(TempPool::default()),
            root: Vec::new(),
            stack: Vec::new(),
            has_shader_body: false,
            error: None,
        }
    }

    pub fn alloc_temp(&self) -> Temp {
        self.pool.acquire()
    }

    /// Number of temporaries currently held by live [`Temp`] handles.
    pub fn live_temps(&self) -> usize {
        self.pool.live_count()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn fail(&mut self, error: BuilderError) {
        if self.error.is_none() {
            tracing::debug!(%error, "shader builder misuse");
            self.error = Some(error);
        }
    }

    fn current_block(&mut self) -> Option<&mut Vec<Node>> {
        match self.stack.last_mut() {
            None => Some(&mut self.root),
            Some(Frame::If {
                then_block,
                else_block,
                ..
            }) => Some(match else_block {
                Some(else_block) => else_block,
                None => then_block,
            }),
            Some(Frame::Switch { open, .. }) => open.as_mut().map(|(_, body)| body),
        }
    }

    pub fn push(&mut self, node: Node) {
        match self.current_block() {
            Some(block) => block.push(node),
            None => self.fail(BuilderError::NodeOutsideCase),
        }
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.push(Node::Comment(text.into()));
    }

    fn alu_inner(&mut self, op: AluOp, dst: Dst, srcs: &[Operand], saturate: bool) {
        if srcs.len() != op.arity() {
            self.fail(BuilderError::Arity {
                op: op.mnemonic(),
                expected: op.arity(),
                actual: srcs.len(),
            });
            return;
        }
        self.push(Node::Inst(Inst::Alu {
            op,
            dst,
            srcs: srcs.to_vec(),
            saturate: saturate && op.accepts_saturate(),
        }));
    }

    pub fn alu(&mut self, op: AluOp, dst: Dst, srcs: &[Operand]) {
        self.alu_inner(op, dst, srcs, false);
    }

    pub fn alu_sat(&mut self, op: AluOp, dst: Dst, srcs: &[Operand]) {
        self.alu_inner(op, dst, srcs, true);
    }

    unary_ops! {
        mov => Mov,
        round_ne => RoundNe,
        round_z => RoundZ,
        round_ni => RoundNi,
        deriv_x => DerivXFine,
        deriv_y => DerivYFine,
        ftou => FtoU,
        ftoi => FtoI,
        utof => UtoF,
        itof => ItoF,
        f32_to_f16 => F32toF16,
        f16_to_f32 => F16toF32,
        not => Not,
        firstbit_hi => FirstBitHi,
    }

    binary_ops! {
        add => Add,
        mul => Mul,
        min => Min,
        max => Max,
        eq => Eq,
        ne => Ne,
        lt => Lt,
        ge => Ge,
        iadd => IAdd,
        imul => IMul,
        ieq => IEq,
        ine => INe,
        ilt => ILt,
        ige => IGe,
        ult => ULt,
        uge => UGe,
        imin => IMin,
        imax => IMax,
        umin => UMin,
        umax => UMax,
        and => And,
        or => Or,
        xor => Xor,
        ishl => IShl,
        ushr => UShr,
        ishr => IShr,
    }

    pub fn mov_sat(&mut self, dst: Dst, a: Operand) {
        self.alu_sat(AluOp::Mov, dst, &[a]);
    }

    pub fn add_sat(&mut self, dst: Dst, a: Operand, b: Operand) {
        self.alu_sat(AluOp::Add, dst, &[a, b]);
    }

    pub fn movc(&mut self, dst: Dst, cond: Operand, if_true: Operand, if_false: Operand) {
        self.alu(AluOp::Movc, dst, &[cond, if_true, if_false]);
    }

    pub fn ubfe(&mut self, dst: Dst, width: Operand, offset: Operand, value: Operand) {
        self.alu(AluOp::UBfe, dst, &[width, offset, value]);
    }

    pub fn bfi(&mut self, dst: Dst, width: Operand, offset: Operand, insert: Operand, base: Operand) {
        self.alu(AluOp::Bfi, dst, &[width, offset, insert, base]);
    }

    /// `dst = a * b`, except that a zero in either factor yields `+0` even when the other
    /// factor is infinite or NaN. Never fused with a following add.
    pub fn mul_legacy(&mut self, dst: Dst, a: Operand, b: Operand) {
        let a_zero = self.alloc_temp();
        let b_zero = self.alloc_temp();
        let lanes = dst.mask;
        self.eq(a_zero.dst(lanes), a, Operand::f32(0.0));
        self.eq(b_zero.dst(lanes), b, Operand::f32(0.0));
        self.or(a_zero.dst(lanes), a_zero.op(), b_zero.op());
        self.mul(dst, a, b);
        self.movc(
            dst,
            a_zero.op(),
            Operand::f32(0.0),
            Operand::temp(dst.temp, crate::ir::Swizzle::XYZW),
        );
    }

    pub fn load_edram(&mut self, dst: Dst, address: Operand) {
        self.push(Node::Inst(Inst::LoadEdram { dst, address }));
    }

    pub fn store_edram(&mut self, address: Operand, value: Operand) {
        self.push(Node::Inst(Inst::StoreEdram { address, value }));
    }

    pub fn begin_if(&mut self, cond: Operand, test: Test) {
        self.stack.push(Frame::If {
            cond,
            test,
            then_block: Vec::new(),
            else_block: None,
        });
    }

    pub fn begin_else(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::If { else_block, .. }) => {
                if else_block.is_some() {
                    self.fail(BuilderError::DuplicateElse);
                } else {
                    *else_block = Some(Vec::new());
                }
            }
            _ => self.fail(BuilderError::ElseWithoutIf),
        }
    }

    pub fn end_if(&mut self) {
        match self.stack.pop() {
            Some(Frame::If {
                cond,
                test,
                then_block,
                else_block,
            }) => self.push(Node::If {
                cond,
                test,
                then_block,
                else_block,
            }),
            Some(other) => {
                self.stack.push(other);
                self.fail(BuilderError::UnbalancedEndIf);
            }
            None => self.fail(BuilderError::UnbalancedEndIf),
        }
    }

    /// Emits `if (cond.x != 0) { f }`.
    pub fn if_nz(&mut self, cond: Operand, f: impl FnOnce(&mut Self)) {
        self.begin_if(cond, Test::NonZero);
        f(self);
        self.end_if();
    }

    /// Emits `if (cond.x == 0) { f }`.
    pub fn if_z(&mut self, cond: Operand, f: impl FnOnce(&mut Self)) {
        self.begin_if(cond, Test::Zero);
        f(self);
        self.end_if();
    }

    pub fn begin_switch(&mut self, selector: Operand) {
        self.stack.push(Frame::Switch {
            selector,
            cases: Vec::new(),
            default: None,
            open: None,
        });
    }

    fn close_open_case(&mut self) {
        if let Some(Frame::Switch {
            cases,
            default,
            open,
            ..
        }) = self.stack.last_mut()
        {
            match open.take() {
                Some((OpenCase::Case(values), body)) => cases.push(SwitchCase { values, body }),
                Some((OpenCase::Default, body)) => *default = Some(body),
                None => {}
            }
        }
    }

    /// Opens a case; the previous case (if any) ends without falling through.
    pub fn case(&mut self, values: &[u32]) {
        if !matches!(self.stack.last(), Some(Frame::Switch { .. })) {
            self.fail(BuilderError::CaseWithoutSwitch);
            return;
        }
        self.close_open_case();
        if let Some(Frame::Switch { open, .. }) = self.stack.last_mut() {
            *open = Some((OpenCase::Case(values.to_vec()), Vec::new()));
        }
    }

    pub fn default_case(&mut self) {
        match self.stack.last() {
            Some(Frame::Switch { default, open, .. }) => {
                let duplicate =
                    default.is_some() || matches!(open, Some((OpenCase::Default, _)));
                if duplicate {
                    self.fail(BuilderError::DuplicateDefault);
                    return;
                }
            }
            _ => {
                self.fail(BuilderError::CaseWithoutSwitch);
                return;
            }
        }
        self.close_open_case();
        if let Some(Frame::Switch { open, .. }) = self.stack.last_mut() {
            *open = Some((OpenCase::Default, Vec::new()));
        }
    }

    pub fn end_switch(&mut self) {
        if !matches!(self.stack.last(), Some(Frame::Switch { .. })) {
            self.fail(BuilderError::UnbalancedEndSwitch);
            return;
        }
        self.close_open_case();
        if let Some(Frame::Switch {
            selector,
            cases,
            default,
            ..
        }) = self.stack.pop()
        {
            self.push(Node::Switch {
                selector,
                cases,
                default,
            });
        }
    }

    pub fn shader_body(&mut self) {
        if !self.stack.is_empty() {
            self.fail(BuilderError::NestedShaderBody);
            return;
        }
        if self.has_shader_body {
            self.fail(BuilderError::DuplicateShaderBody);
            return;
        }
        self.has_shader_body = true;
        self.root.push(Node::ShaderBody);
    }

    /// Early return from the whole program for the current invocation.
    pub fn ret(&mut self) {
        self.push(Node::Return);
    }

    pub fn finish(self) -> Result<Program, BuilderError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !self.stack.is_empty() {
            return Err(BuilderError::UnclosedBlocks(self.stack.len()));
        }
        Ok(Program {
            nodes: self.root,
            temp_count: self.pool.high_water(),
        })
    }
}
