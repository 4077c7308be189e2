use std::fmt;

use crate::ir::{Inst, InputRegister, Modifier, Node, Operand, Program, Source, Swizzle, Test};

/// Target ISA emission interface driven by [`Program::walk`].
pub trait IsaBackend {
    fn declare_temps(&mut self, count: u32);
    fn inst(&mut self, inst: &Inst);
    fn comment(&mut self, _text: &str) {}
    fn begin_if(&mut self, cond: &Operand, test: Test);
    fn begin_else(&mut self);
    fn end_if(&mut self);
    fn begin_switch(&mut self, selector: &Operand);
    fn begin_case(&mut self, values: &[u32]);
    fn begin_default(&mut self);
    fn end_case(&mut self);
    fn end_switch(&mut self);
    fn shader_body(&mut self);
    fn ret(&mut self);
}

impl Program {
    pub fn walk<B: IsaBackend + ?Sized>(&self, backend: &mut B) {
        backend.declare_temps(self.temp_count);
        walk_block(&self.nodes, backend);
    }
}

fn walk_block<B: IsaBackend + ?Sized>(nodes: &[Node], backend: &mut B) {
    for node in nodes {
        match node {
            Node::Inst(inst) => backend.inst(inst),
            Node::Comment(text) => backend.comment(text),
            Node::If {
                cond,
                test,
                then_block,
                else_block,
            } => {
                backend.begin_if(cond, *test);
                walk_block(then_block, backend);
                if let Some(else_block) = else_block {
                    backend.begin_else();
                    walk_block(else_block, backend);
                }
                backend.end_if();
            }
            Node::Switch {
                selector,
                cases,
                default,
            } => {
                backend.begin_switch(selector);
                for case in cases {
                    backend.begin_case(&case.values);
                    walk_block(&case.body, backend);
                    backend.end_case();
                }
                if let Some(default) = default {
                    backend.begin_default();
                    walk_block(default, backend);
                    backend.end_case();
                }
                backend.end_switch();
            }
            Node::ShaderBody => backend.shader_body(),
            Node::Return => backend.ret(),
        }
    }
}

/// DXBC-flavored listing, used for debugging and structural tests.
#[derive(Default)]
pub struct Disassembler {
    out: String,
    indent: usize,
}

impl Disassembler {
    pub fn into_string(self) -> String {
        self.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

fn swizzle_suffix(swizzle: Swizzle) -> String {
    if swizzle.is_identity() {
        return String::new();
    }
    let letters: String = swizzle.0.iter().map(|lane| lane.letter()).collect();
    if letters.chars().all(|c| Some(c) == letters.chars().next()) {
        format!(".{}", &letters[..1])
    } else {
        format!(".{letters}")
    }
}

pub(crate) fn input_name(register: InputRegister) -> String {
    match register {
        InputRegister::Position => "v_position".to_owned(),
        InputRegister::FrontFacing => "v_front_facing".to_owned(),
        InputRegister::SampleMask => "v_sample_mask".to_owned(),
        InputRegister::Color(index) => format!("o_color{index}"),
        InputRegister::Depth => "o_depth".to_owned(),
        InputRegister::Killed => "o_killed".to_owned(),
    }
}

fn operand_text(operand: &Operand) -> String {
    let base = match operand.source {
        Source::Temp(index) => format!("r{index}{}", swizzle_suffix(operand.swizzle)),
        Source::Input(register) => {
            format!("{}{}", input_name(register), swizzle_suffix(operand.swizzle))
        }
        Source::Constant(register) => {
            format!("c{register}{}", swizzle_suffix(operand.swizzle))
        }
        Source::Immediate(values) => {
            let lanes = operand.swizzle.0.map(|lane| values[lane.index()]);
            if lanes.iter().all(|v| *v == lanes[0]) {
                format!("l({:#x})", lanes[0])
            } else {
                format!(
                    "l({:#x}, {:#x}, {:#x}, {:#x})",
                    lanes[0], lanes[1], lanes[2], lanes[3]
                )
            }
        }
    };
    match operand.modifier {
        Modifier::None => base,
        Modifier::Neg => format!("-{base}"),
        Modifier::Abs => format!("|{base}|"),
        Modifier::NegAbs => format!("-|{base}|"),
    }
}

fn mask_suffix(mask: crate::ir::WriteMask) -> String {
    let letters: String = mask.lanes().map(|lane| lane.letter()).collect();
    format!(".{letters}")
}

impl IsaBackend for Disassembler {
    fn declare_temps(&mut self, count: u32) {
        self.line(&format!("dcl_temps {count}"));
    }

    fn inst(&mut self, inst: &Inst) {
        let text = match inst {
            Inst::Alu {
                op,
                dst,
                srcs,
                saturate,
            } => {
                let srcs: Vec<String> = srcs.iter().map(operand_text).collect();
                format!(
                    "{}{} r{}{}, {}",
                    op.mnemonic(),
                    if *saturate { "_sat" } else { "" },
                    dst.temp,
                    mask_suffix(dst.mask),
                    srcs.join(", ")
                )
            }
            Inst::LoadEdram { dst, address } => format!(
                "ld_edram r{}{}, {}",
                dst.temp,
                mask_suffix(dst.mask),
                operand_text(address)
            ),
            Inst::StoreEdram { address, value } => format!(
                "store_edram {}, {}",
                operand_text(address),
                operand_text(value)
            ),
        };
        self.line(&text);
    }

    fn comment(&mut self, text: &str) {
        self.line(&format!("// {text}"));
    }

    fn begin_if(&mut self, cond: &Operand, test: Test) {
        let keyword = match test {
            Test::NonZero => "if_nz",
            Test::Zero => "if_z",
        };
        self.line(&format!("{keyword} {}", operand_text(cond)));
        self.indent += 1;
    }

    fn begin_else(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("else");
        self.indent += 1;
    }

    fn end_if(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("endif");
    }

    fn begin_switch(&mut self, selector: &Operand) {
        self.line(&format!("switch {}", operand_text(selector)));
        self.indent += 1;
    }

    fn begin_case(&mut self, values: &[u32]) {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.line(&format!("case {}", values.join(", ")));
        self.indent += 1;
    }

    fn begin_default(&mut self) {
        self.line("default");
        self.indent += 1;
    }

    fn end_case(&mut self) {
        self.line("break");
        self.indent = self.indent.saturating_sub(1);
    }

    fn end_switch(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("endswitch");
    }

    fn shader_body(&mut self) {
        self.line("call pixel_body");
    }

    fn ret(&mut self) {
        self.line("ret");
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut disassembler = Disassembler::default();
        self.walk(&mut disassembler);
        f.write_str(&disassembler.into_string())
    }
}

/// Counts what a backend is asked to emit. Useful for structural assertions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmissionStats {
    pub temps: u32,
    pub alu: usize,
    pub edram_loads: usize,
    pub edram_stores: usize,
    pub ifs: usize,
    pub switches: usize,
    pub cases: usize,
    pub returns: usize,
    pub shader_bodies: usize,
}

impl IsaBackend for EmissionStats {
    fn declare_temps(&mut self, count: u32) {
        self.temps = count;
    }

    fn inst(&mut self, inst: &Inst) {
        match inst {
            Inst::Alu { .. } => self.alu += 1,
            Inst::LoadEdram { .. } => self.edram_loads += 1,
            Inst::StoreEdram { .. } => self.edram_stores += 1,
        }
    }

    fn begin_if(&mut self, _cond: &Operand, _test: Test) {
        self.ifs += 1;
    }

    fn begin_else(&mut self) {}

    fn end_if(&mut self) {}

    fn begin_switch(&mut self, _selector: &Operand) {
        self.switches += 1;
    }

    fn begin_case(&mut self, _values: &[u32]) {
        self.cases += 1;
    }

    fn begin_default(&mut self) {
        self.cases += 1;
    }

    fn end_case(&mut self) {}

    fn end_switch(&mut self) {}

    fn shader_body(&mut self) {
        self.shader_bodies += 1;
    }

    fn ret(&mut self) {
        self.returns += 1;
    }
}

impl Program {
    pub fn stats(&self) -> EmissionStats {
        let mut stats = EmissionStats::default();
        self.walk(&mut stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::builder::ShaderBuilder;

    fn sample_program() -> Program {
        let mut b = ShaderBuilder::new();
        let t = b.alloc_temp();
        b.comment("prologue");
        b.mov(t.dst_x(), Operand::input(InputRegister::Position, Swizzle::XXXX));
        b.if_nz(t.x(), |b| b.ret());
        b.shader_body();
        b.begin_switch(t.x());
        b.case(&[1, 2]);
        b.load_edram(t.dst_y(), t.x());
        b.default_case();
        b.store_edram(Operand::u32(4), t.y().neg());
        b.end_switch();
        drop(t);
        b.finish().unwrap()
    }

    #[test]
    fn disassembly_lists_the_control_tree() {
        let listing = sample_program().to_string();
        let expected = "\
dcl_temps 1
// prologue
mov r0.x, v_position.x
if_nz r0.x
  ret
endif
call pixel_body
switch r0.x
  case 1, 2
    ld_edram r0.y, r0.x
    break
  default
    store_edram l(0x4), -r0.y
    break
endswitch
";
        assert_eq!(listing, expected);
    }

    #[test]
    fn stats_count_emitted_nodes() {
        let stats = sample_program().stats();
        assert_eq!(
            stats,
            EmissionStats {
                temps: 1,
                alu: 1,
                edram_loads: 1,
                edram_stores: 1,
                ifs: 1,
                switches: 1,
                cases: 2,
                returns: 1,
                shader_bodies: 1,
            }
        );
    }
}
