//! Reference interpreter for [`Program`]s.
//!
//! A 2x2 quad executes in lockstep with per-invocation execution masks, so fine derivatives see
//! their neighbors the way they do on a GPU. Helper invocations run the program but their EDRAM
//! stores are dropped.

use half::f16;

use crate::ir::{
    AluOp, Dst, Inst, InputRegister, Lane, Modifier, Node, Operand, Program, ScalarType, Source,
    Test, MAX_COLOR_OUTPUTS,
};

/// Raw dword store the interpreted program reads and writes.
pub trait EdramMemory {
    fn load(&mut self, address: u32) -> u32;
    fn store(&mut self, address: u32, value: u32);
}

/// Out-of-range accesses read zero and drop writes.
impl EdramMemory for Vec<u32> {
    fn load(&mut self, address: u32) -> u32 {
        self.get(address as usize).copied().unwrap_or(0)
    }

    fn store(&mut self, address: u32, value: u32) {
        if let Some(slot) = self.get_mut(address as usize) {
            *slot = value;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Invocation {
    pub position: [f32; 4],
    pub front_facing: bool,
    pub sample_mask: u32,
    /// Helper invocations only exist to feed derivatives.
    pub helper: bool,
}

impl Invocation {
    /// Covered pixel at integer coordinates `(x, y)`, sampled at the pixel center.
    pub fn pixel(x: u32, y: u32, z: f32, sample_mask: u32) -> Self {
        Self {
            position: [x as f32 + 0.5, y as f32 + 0.5, z, 1.0],
            front_facing: true,
            sample_mask,
            helper: false,
        }
    }

    pub fn helper(x: u32, y: u32, z: f32) -> Self {
        Self {
            helper: true,
            sample_mask: 0,
            ..Self::pixel(x, y, z, 0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelBodyOutput {
    pub colors: [[f32; 4]; MAX_COLOR_OUTPUTS as usize],
    pub depth: f32,
    pub killed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuadOutcome {
    pub temps: [Vec<[u32; 4]>; 4],
    pub returned: [bool; 4],
    pub body_ran: [bool; 4],
}

pub struct Interpreter<'a> {
    program: &'a Program,
    constants: &'a [[u32; 4]],
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program, constants: &'a [[u32; 4]]) -> Self {
        Self { program, constants }
    }

    /// Runs the program for a quad; invocation `i` sits at quad position `(i & 1, i >> 1)`.
    pub fn run_quad<M: EdramMemory + ?Sized>(
        &self,
        quad: &[Invocation; 4],
        body: &mut dyn FnMut(usize) -> PixelBodyOutput,
        memory: &mut M,
    ) -> QuadOutcome {
        let temp_count = self.program.temp_count as usize;
        let mut state = ExecState {
            constants: self.constants,
            quad,
            temps: std::array::from_fn(|_| vec![[0u32; 4]; temp_count]),
            outputs: [PixelBodyOutput::default(); 4],
            returned: 0,
            body_ran: 0,
            memory,
            body,
        };
        state.exec_block(&self.program.nodes, 0b1111);
        QuadOutcome {
            returned: std::array::from_fn(|i| state.returned & (1 << i) != 0),
            body_ran: std::array::from_fn(|i| state.body_ran & (1 << i) != 0),
            temps: state.temps,
        }
    }

    /// Runs one covered pixel whose quad neighbors are helpers at the same depth.
    pub fn run_pixel<M: EdramMemory + ?Sized>(
        &self,
        pixel: Invocation,
        body: PixelBodyOutput,
        memory: &mut M,
    ) -> QuadOutcome {
        let x = pixel.position[0].max(0.0) as u32;
        let y = pixel.position[1].max(0.0) as u32;
        let (qx, qy) = (x & !1, y & !1);
        let own = ((y & 1) * 2 + (x & 1)) as usize;
        let quad = std::array::from_fn(|i| {
            if i == own {
                pixel
            } else {
                Invocation::helper(qx + (i as u32 & 1), qy + (i as u32 >> 1), pixel.position[2])
            }
        });
        self.run_quad(&quad, &mut |_| body, memory)
    }
}

struct ExecState<'s, M: ?Sized> {
    constants: &'s [[u32; 4]],
    quad: &'s [Invocation; 4],
    temps: [Vec<[u32; 4]>; 4],
    outputs: [PixelBodyOutput; 4],
    returned: u8,
    body_ran: u8,
    memory: &'s mut M,
    body: &'s mut dyn FnMut(usize) -> PixelBodyOutput,
}

const ALL_ONES: u32 = u32::MAX;

fn bool_mask(value: bool) -> u32 {
    if value {
        ALL_ONES
    } else {
        0
    }
}

impl<M: EdramMemory + ?Sized> ExecState<'_, M> {
    fn exec_block(&mut self, nodes: &[Node], mask: u8) {
        for node in nodes {
            let active = mask & !self.returned;
            if active == 0 {
                return;
            }
            match node {
                Node::Inst(inst) => self.exec_inst(inst, active),
                Node::Comment(_) => {}
                Node::If {
                    cond,
                    test,
                    then_block,
                    else_block,
                } => {
                    let mut taken = 0u8;
                    for inv in invocations(active) {
                        let value = self.read(inv, cond, Lane::X);
                        let pass = match test {
                            Test::NonZero => value != 0,
                            Test::Zero => value == 0,
                        };
                        if pass {
                            taken |= 1 << inv;
                        }
                    }
                    self.exec_block(then_block, taken);
                    if let Some(else_block) = else_block {
                        self.exec_block(else_block, active & !taken);
                    }
                }
                Node::Switch {
                    selector,
                    cases,
                    default,
                } => {
                    let mut case_masks = vec![0u8; cases.len()];
                    let mut default_mask = 0u8;
                    for inv in invocations(active) {
                        let value = self.read(inv, selector, Lane::X);
                        match cases.iter().position(|case| case.values.contains(&value)) {
                            Some(index) => case_masks[index] |= 1 << inv,
                            None => default_mask |= 1 << inv,
                        }
                    }
                    for (case, case_mask) in cases.iter().zip(case_masks) {
                        self.exec_block(&case.body, case_mask);
                    }
                    if let Some(default) = default {
                        self.exec_block(default, default_mask);
                    }
                }
                Node::ShaderBody => {
                    for inv in invocations(active) {
                        self.outputs[inv] = (self.body)(inv);
                        self.body_ran |= 1 << inv;
                    }
                }
                Node::Return => self.returned |= active,
            }
        }
    }

    fn read(&self, inv: usize, operand: &Operand, lane: Lane) -> u32 {
        let lane = operand.source_lane(lane).index();
        match operand.source {
            Source::Temp(index) => self.temps[inv]
                .get(index as usize)
                .map(|reg| reg[lane])
                .unwrap_or(0),
            Source::Constant(index) => self
                .constants
                .get(index as usize)
                .map(|reg| reg[lane])
                .unwrap_or(0),
            Source::Immediate(values) => values[lane],
            Source::Input(register) => {
                let invocation = &self.quad[inv];
                let output = &self.outputs[inv];
                match register {
                    InputRegister::Position => invocation.position[lane].to_bits(),
                    InputRegister::FrontFacing => bool_mask(invocation.front_facing),
                    InputRegister::SampleMask => invocation.sample_mask,
                    InputRegister::Color(index) => output
                        .colors
                        .get(index as usize)
                        .map(|color| color[lane].to_bits())
                        .unwrap_or(0),
                    InputRegister::Depth => output.depth.to_bits(),
                    InputRegister::Killed => bool_mask(output.killed),
                }
            }
        }
    }

    fn write(&mut self, inv: usize, dst: Dst, values: [Option<u32>; 4]) {
        if let Some(reg) = self.temps[inv].get_mut(dst.temp as usize) {
            for (slot, value) in reg.iter_mut().zip(values) {
                if let Some(value) = value {
                    *slot = value;
                }
            }
        }
    }

    fn exec_inst(&mut self, inst: &Inst, active: u8) {
        match inst {
            Inst::Alu {
                op,
                dst,
                srcs,
                saturate,
            } => {
                let mut results = [[None; 4]; 4];
                for inv in invocations(active) {
                    for lane in dst.mask.lanes() {
                        let value = if op.is_derivative() {
                            let neighbors: [f32; 4] = std::array::from_fn(|q| {
                                f32::from_bits(apply_modifier(
                                    self.read(q, &srcs[0], lane),
                                    ScalarType::F32,
                                    srcs[0].modifier,
                                ))
                            });
                            let delta = if *op == AluOp::DerivXFine {
                                neighbors[inv | 1] - neighbors[inv & !1]
                            } else {
                                neighbors[inv | 2] - neighbors[inv & !2]
                            };
                            float_result(delta, *saturate)
                        } else {
                            let values: Vec<u32> = srcs
                                .iter()
                                .enumerate()
                                .map(|(i, src)| {
                                    apply_modifier(
                                        self.read(inv, src, lane),
                                        op.source_type(i),
                                        src.modifier,
                                    )
                                })
                                .collect();
                            eval_alu(*op, &values, *saturate)
                        };
                        results[inv][lane.index()] = Some(value);
                    }
                }
                for inv in invocations(active) {
                    self.write(inv, *dst, results[inv]);
                }
            }
            Inst::LoadEdram { dst, address } => {
                for inv in invocations(active) {
                    let mut values = [None; 4];
                    for lane in dst.mask.lanes() {
                        let address = self.read(inv, address, lane);
                        values[lane.index()] = Some(self.memory.load(address));
                    }
                    self.write(inv, *dst, values);
                }
            }
            Inst::StoreEdram { address, value } => {
                for inv in invocations(active) {
                    if self.quad[inv].helper {
                        continue;
                    }
                    let address = self.read(inv, address, Lane::X);
                    let value = self.read(inv, value, Lane::X);
                    self.memory.store(address, value);
                }
            }
        }
    }
}

fn invocations(mask: u8) -> impl Iterator<Item = usize> {
    (0..4).filter(move |inv| mask & (1 << inv) != 0)
}

pub(crate) fn apply_modifier(value: u32, ty: ScalarType, modifier: Modifier) -> u32 {
    match (ty, modifier) {
        (_, Modifier::None) => value,
        (ScalarType::F32 | ScalarType::Untyped, Modifier::Neg) => value ^ 0x8000_0000,
        (ScalarType::F32 | ScalarType::Untyped, Modifier::Abs) => value & 0x7FFF_FFFF,
        (ScalarType::F32 | ScalarType::Untyped, Modifier::NegAbs) => value | 0x8000_0000,
        (ScalarType::U32, Modifier::Neg | Modifier::NegAbs) => 0u32.wrapping_sub(value),
        (ScalarType::U32, Modifier::Abs) => value,
        (ScalarType::I32, Modifier::Neg) => (value as i32).wrapping_neg() as u32,
        (ScalarType::I32, Modifier::Abs) => (value as i32).wrapping_abs() as u32,
        (ScalarType::I32, Modifier::NegAbs) => (value as i32).wrapping_abs().wrapping_neg() as u32,
    }
}

fn float_result(value: f32, saturate: bool) -> u32 {
    let value = if saturate {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    } else {
        value
    };
    value.to_bits()
}

/// Evaluates one lane of a non-derivative ALU op on already-modified sources.
pub(crate) fn eval_alu(op: AluOp, srcs: &[u32], saturate: bool) -> u32 {
    let f = |i: usize| f32::from_bits(srcs[i]);
    let u = |i: usize| srcs[i];
    let s = |i: usize| srcs[i] as i32;
    match op {
        AluOp::Mov => {
            if saturate {
                float_result(f(0), true)
            } else {
                u(0)
            }
        }
        AluOp::Movc => {
            if u(0) != 0 {
                u(1)
            } else {
                u(2)
            }
        }
        AluOp::Add => float_result(f(0) + f(1), saturate),
        AluOp::Mul => float_result(f(0) * f(1), saturate),
        AluOp::Min => float_result(f(0).min(f(1)), saturate),
        AluOp::Max => float_result(f(0).max(f(1)), saturate),
        AluOp::RoundNe => float_result(f(0).round_ties_even(), saturate),
        AluOp::RoundZ => float_result(f(0).trunc(), saturate),
        AluOp::RoundNi => float_result(f(0).floor(), saturate),
        AluOp::DerivXFine | AluOp::DerivYFine => 0,
        AluOp::Eq => bool_mask(f(0) == f(1)),
        AluOp::Ne => bool_mask(f(0) != f(1)),
        AluOp::Lt => bool_mask(f(0) < f(1)),
        AluOp::Ge => bool_mask(f(0) >= f(1)),
        AluOp::FtoU => f(0) as u32,
        AluOp::FtoI => f(0) as i32 as u32,
        AluOp::UtoF => float_result(u(0) as f32, saturate),
        AluOp::ItoF => float_result(s(0) as f32, saturate),
        AluOp::F32toF16 => u32::from(f16::from_f32(f(0)).to_bits()),
        AluOp::F16toF32 => float_result(f16::from_bits(u(0) as u16).to_f32(), saturate),
        AluOp::IAdd => u(0).wrapping_add(u(1)),
        AluOp::IMul => u(0).wrapping_mul(u(1)),
        AluOp::IEq => bool_mask(u(0) == u(1)),
        AluOp::INe => bool_mask(u(0) != u(1)),
        AluOp::ILt => bool_mask(s(0) < s(1)),
        AluOp::IGe => bool_mask(s(0) >= s(1)),
        AluOp::ULt => bool_mask(u(0) < u(1)),
        AluOp::UGe => bool_mask(u(0) >= u(1)),
        AluOp::IMin => s(0).min(s(1)) as u32,
        AluOp::IMax => s(0).max(s(1)) as u32,
        AluOp::UMin => u(0).min(u(1)),
        AluOp::UMax => u(0).max(u(1)),
        AluOp::And => u(0) & u(1),
        AluOp::Or => u(0) | u(1),
        AluOp::Xor => u(0) ^ u(1),
        AluOp::Not => !u(0),
        AluOp::IShl => u(0) << (u(1) & 31),
        AluOp::UShr => u(0) >> (u(1) & 31),
        AluOp::IShr => (s(0) >> (u(1) & 31)) as u32,
        AluOp::UBfe => {
            let width = u(0) & 31;
            let offset = u(1) & 31;
            if width == 0 {
                0
            } else {
                let width = width.min(32 - offset);
                (u(2) >> offset) & low_bits(width)
            }
        }
        AluOp::Bfi => {
            let width = u(0) & 31;
            let offset = u(1) & 31;
            let width = width.min(32 - offset);
            let mask = low_bits(width) << offset;
            ((u(2) << offset) & mask) | (u(3) & !mask)
        }
        AluOp::FirstBitHi => {
            if u(0) == 0 {
                ALL_ONES
            } else {
                31 - u(0).leading_zeros()
            }
        }
    }
}

fn low_bits(count: u32) -> u32 {
    if count >= 32 {
        ALL_ONES
    } else {
        (1u32 << count) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_ops_match_dxbc_semantics() {
        assert_eq!(eval_alu(AluOp::UBfe, &[8, 8, 0xAABB_CCDD], false), 0xCC);
        assert_eq!(eval_alu(AluOp::UBfe, &[0, 4, 0xFFFF_FFFF], false), 0);
        assert_eq!(eval_alu(AluOp::UBfe, &[8, 28, 0xF000_0000], false), 0xF);
        assert_eq!(
            eval_alu(AluOp::Bfi, &[8, 8, 0x12, 0xFFFF_FFFF], false),
            0xFFFF_12FF
        );
        assert_eq!(eval_alu(AluOp::FirstBitHi, &[0], false), u32::MAX);
        assert_eq!(eval_alu(AluOp::FirstBitHi, &[0x40], false), 6);
    }

    #[test]
    fn float_compares_fail_on_nan_except_ne() {
        let nan = f32::NAN.to_bits();
        let one = 1.0f32.to_bits();
        assert_eq!(eval_alu(AluOp::Lt, &[nan, one], false), 0);
        assert_eq!(eval_alu(AluOp::Ge, &[nan, one], false), 0);
        assert_eq!(eval_alu(AluOp::Eq, &[nan, nan], false), 0);
        assert_eq!(eval_alu(AluOp::Ne, &[nan, one], false), u32::MAX);
    }

    #[test]
    fn saturate_flushes_nan_to_zero() {
        let nan = f32::NAN.to_bits();
        assert_eq!(eval_alu(AluOp::Mov, &[nan], true), 0);
        assert_eq!(
            eval_alu(AluOp::Add, &[2.0f32.to_bits(), 0], true),
            1.0f32.to_bits()
        );
    }

    #[test]
    fn modifiers_follow_operand_type() {
        assert_eq!(
            apply_modifier(1.0f32.to_bits(), ScalarType::F32, Modifier::Neg),
            (-1.0f32).to_bits()
        );
        assert_eq!(apply_modifier(5, ScalarType::U32, Modifier::Neg), 5u32.wrapping_neg());
        assert_eq!(
            apply_modifier((-7i32) as u32, ScalarType::I32, Modifier::Abs),
            7
        );
    }
}
