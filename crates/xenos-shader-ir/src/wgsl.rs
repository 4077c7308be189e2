//! WGSL lowering of [`Program`]s.
//!
//! Registers lower to `vec4<u32>` variables and every instruction lowers lane by lane, with
//! `bitcast` at each float boundary. Instructions whose sources are all immediates are folded on
//! the host so the output never contains a constant expression that could overflow.

use std::fmt::Write;

use thiserror::Error;

use crate::backend::IsaBackend;
use crate::interp::{apply_modifier, eval_alu};
use crate::ir::{
    AluOp, Dst, Inst, InputRegister, Lane, Modifier, Operand, Program, ScalarType, Source, Test,
    MAX_COLOR_OUTPUTS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("WGSL generation error: {message}")]
pub struct WgslError {
    pub message: String,
}

fn err(message: impl Into<String>) -> WgslError {
    WgslError {
        message: message.into(),
    }
}

/// Resource layout and naming of the generated module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgslOptions {
    pub bind_group: u32,
    pub constants_binding: u32,
    pub edram_binding: u32,
    /// Length of the `array<vec4<u32>, N>` constants uniform.
    pub constant_registers: u32,
    pub entry_point: String,
    /// Name of the translated shader body function, `fn(vec4<f32>) -> PixelBodyOutput`.
    pub body_function: String,
    /// Source of the body function. When `None` a stub writing zero colors and the rasterized
    /// depth is emitted.
    pub body_source: Option<String>,
}

impl Default for WgslOptions {
    fn default() -> Self {
        Self {
            bind_group: 0,
            constants_binding: 0,
            edram_binding: 1,
            constant_registers: 16,
            entry_point: "main".to_owned(),
            body_function: "pixel_body".to_owned(),
            body_source: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WgslOutput {
    pub wgsl: String,
    pub entry_point: String,
}

const TRUE_MASK: &str = "0xffffffffu";

struct WgslBackend<'a> {
    options: &'a WgslOptions,
    out: String,
    indent: usize,
    temp_count: u32,
    switch_has_default: Vec<bool>,
    error: Option<WgslError>,
}

fn lane_name(lane: Lane) -> char {
    lane.letter()
}

fn literal(value: u32) -> String {
    format!("{value:#x}u")
}

impl WgslBackend<'_> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn fail(&mut self, error: WgslError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Raw `u32` expression for the register lane an operand reads for `lane`.
    fn raw_lane(&mut self, operand: &Operand, lane: Lane) -> String {
        let c = lane_name(operand.source_lane(lane));
        match operand.source {
            Source::Temp(index) => {
                if index >= self.temp_count {
                    self.fail(err(format!(
                        "temp r{index} is outside the {} declared temporaries",
                        self.temp_count
                    )));
                }
                format!("r{index}.{c}")
            }
            Source::Constant(index) => {
                if index >= self.options.constant_registers {
                    self.fail(err(format!(
                        "constant register c{index} is outside the {}-register buffer",
                        self.options.constant_registers
                    )));
                }
                format!("om_constants[{index}].{c}")
            }
            Source::Immediate(values) => literal(values[operand.source_lane(lane).index()]),
            Source::Input(register) => match register {
                InputRegister::Position => format!("in_position.{c}"),
                InputRegister::FrontFacing => "in_front_facing".to_owned(),
                InputRegister::SampleMask => "sample_mask".to_owned(),
                InputRegister::Color(index) => {
                    if index >= MAX_COLOR_OUTPUTS {
                        self.fail(err(format!("shader color output {index} does not exist")));
                    }
                    format!("bitcast<u32>(body.color{index}.{c})")
                }
                InputRegister::Depth => "bitcast<u32>(body.depth)".to_owned(),
                InputRegister::Killed => format!("select(0u, {TRUE_MASK}, body.killed)"),
            },
        }
    }

    /// Operand lane as an expression of type `ty` (`Untyped` yields `u32`), modifier applied.
    fn typed_lane(&mut self, operand: &Operand, lane: Lane, ty: ScalarType) -> String {
        if let Source::Immediate(values) = operand.source {
            let bits = apply_modifier(
                values[operand.source_lane(lane).index()],
                ty,
                operand.modifier,
            );
            return match ty {
                ScalarType::F32 => format!("bitcast<f32>({})", literal(bits)),
                ScalarType::I32 => format!("bitcast<i32>({})", literal(bits)),
                ScalarType::U32 | ScalarType::Untyped => literal(bits),
            };
        }
        let raw = self.raw_lane(operand, lane);
        match ty {
            ScalarType::F32 => float_modifier(format!("bitcast<f32>({raw})"), operand.modifier),
            ScalarType::Untyped => match operand.modifier {
                Modifier::None => raw,
                modifier => format!(
                    "bitcast<u32>({})",
                    float_modifier(format!("bitcast<f32>({raw})"), modifier)
                ),
            },
            ScalarType::U32 => match operand.modifier {
                Modifier::None | Modifier::Abs => raw,
                Modifier::Neg | Modifier::NegAbs => format!("(0u - {raw})"),
            },
            ScalarType::I32 => {
                let value = format!("bitcast<i32>({raw})");
                match operand.modifier {
                    Modifier::None => value,
                    Modifier::Neg => format!("(-{value})"),
                    Modifier::Abs => format!("abs({value})"),
                    Modifier::NegAbs => format!("(-abs({value}))"),
                }
            }
        }
    }

    fn alu_lane(&mut self, op: AluOp, srcs: &[Operand], lane: Lane, saturate: bool) -> String {
        if srcs
            .iter()
            .all(|src| matches!(src.source, Source::Immediate(_)))
        {
            let values: Vec<u32> = srcs
                .iter()
                .enumerate()
                .map(|(i, src)| {
                    let Source::Immediate(values) = src.source else {
                        return 0;
                    };
                    apply_modifier(
                        values[src.source_lane(lane).index()],
                        op.source_type(i),
                        src.modifier,
                    )
                })
                .collect();
            return literal(eval_alu(op, &values, saturate));
        }

        let s: Vec<String> = srcs
            .iter()
            .enumerate()
            .map(|(i, src)| self.typed_lane(src, lane, op.source_type(i)))
            .collect();
        let float = |expr: String| {
            let expr = if saturate {
                format!("clamp({expr}, 0.0, 1.0)")
            } else {
                expr
            };
            format!("bitcast<u32>({expr})")
        };
        let compare = |expr: String| format!("select(0u, {TRUE_MASK}, {expr})");
        match op {
            AluOp::Mov => {
                if saturate {
                    float(format!("bitcast<f32>({})", s[0]))
                } else {
                    s[0].clone()
                }
            }
            AluOp::Movc => format!("select({}, {}, {} != 0u)", s[2], s[1], s[0]),
            AluOp::Add => float(format!("({} + {})", s[0], s[1])),
            AluOp::Mul => float(format!("({} * {})", s[0], s[1])),
            AluOp::Min => float(format!("min({}, {})", s[0], s[1])),
            AluOp::Max => float(format!("max({}, {})", s[0], s[1])),
            AluOp::RoundNe => float(format!("round({})", s[0])),
            AluOp::RoundZ => float(format!("trunc({})", s[0])),
            AluOp::RoundNi => float(format!("floor({})", s[0])),
            AluOp::DerivXFine => float(format!("dpdxFine({})", s[0])),
            AluOp::DerivYFine => float(format!("dpdyFine({})", s[0])),
            AluOp::Eq => compare(format!("{} == {}", s[0], s[1])),
            AluOp::Ne => compare(format!("{} != {}", s[0], s[1])),
            AluOp::Lt => compare(format!("{} < {}", s[0], s[1])),
            AluOp::Ge => compare(format!("{} >= {}", s[0], s[1])),
            AluOp::FtoU => format!("u32({})", s[0]),
            AluOp::FtoI => format!("bitcast<u32>(i32({}))", s[0]),
            AluOp::UtoF | AluOp::ItoF => float(format!("f32({})", s[0])),
            AluOp::F32toF16 => format!("(pack2x16float(vec2<f32>({}, 0.0)) & 0xffffu)", s[0]),
            AluOp::F16toF32 => float(format!("unpack2x16float({}).x", s[0])),
            AluOp::IAdd => format!("({} + {})", s[0], s[1]),
            AluOp::IMul => format!("({} * {})", s[0], s[1]),
            AluOp::IEq => compare(format!("{} == {}", s[0], s[1])),
            AluOp::INe => compare(format!("{} != {}", s[0], s[1])),
            AluOp::ILt | AluOp::ULt => compare(format!("{} < {}", s[0], s[1])),
            AluOp::IGe | AluOp::UGe => compare(format!("{} >= {}", s[0], s[1])),
            AluOp::IMin => format!("bitcast<u32>(min({}, {}))", s[0], s[1]),
            AluOp::IMax => format!("bitcast<u32>(max({}, {}))", s[0], s[1]),
            AluOp::UMin => format!("min({}, {})", s[0], s[1]),
            AluOp::UMax => format!("max({}, {})", s[0], s[1]),
            AluOp::And => format!("({} & {})", s[0], s[1]),
            AluOp::Or => format!("({} | {})", s[0], s[1]),
            AluOp::Xor => format!("({} ^ {})", s[0], s[1]),
            AluOp::Not => format!("(~{})", s[0]),
            AluOp::IShl => format!("({} << ({} & 31u))", s[0], s[1]),
            AluOp::UShr => format!("({} >> ({} & 31u))", s[0], s[1]),
            AluOp::IShr => format!("bitcast<u32>({} >> ({} & 31u))", s[0], s[1]),
            AluOp::UBfe => format!(
                "extractBits({}, {} & 31u, {} & 31u)",
                s[2], s[1], s[0]
            ),
            AluOp::Bfi => format!(
                "insertBits({}, {}, {} & 31u, {} & 31u)",
                s[3], s[2], s[1], s[0]
            ),
            AluOp::FirstBitHi => format!("firstLeadingBit({})", s[0]),
        }
    }

    /// Writes per-lane values. Multi-lane writes read every source before the first store.
    fn assign(&mut self, dst: Dst, values: Vec<(Lane, String)>) {
        if dst.temp >= self.temp_count {
            self.fail(err(format!(
                "destination r{} is outside the {} declared temporaries",
                dst.temp, self.temp_count
            )));
        }
        if values.len() == 1 {
            let (lane, value) = &values[0];
            self.line(&format!("r{}.{} = {value};", dst.temp, lane_name(*lane)));
            return;
        }
        self.line("{");
        self.indent += 1;
        for (lane, value) in &values {
            self.line(&format!("let v_{} = {value};", lane_name(*lane)));
        }
        for (lane, _) in &values {
            let c = lane_name(*lane);
            self.line(&format!("r{}.{c} = v_{c};", dst.temp));
        }
        self.indent -= 1;
        self.line("}");
    }
}

fn float_modifier(value: String, modifier: Modifier) -> String {
    match modifier {
        Modifier::None => value,
        Modifier::Neg => format!("(-{value})"),
        Modifier::Abs => format!("abs({value})"),
        Modifier::NegAbs => format!("(-abs({value}))"),
    }
}

impl IsaBackend for WgslBackend<'_> {
    fn declare_temps(&mut self, count: u32) {
        self.temp_count = count;
        for index in 0..count {
            self.line(&format!("var r{index}: vec4<u32>;"));
        }
    }

    fn inst(&mut self, inst: &Inst) {
        match inst {
            Inst::Alu {
                op,
                dst,
                srcs,
                saturate,
            } => {
                let values = dst
                    .mask
                    .lanes()
                    .map(|lane| (lane, self.alu_lane(*op, srcs, lane, *saturate)))
                    .collect();
                self.assign(*dst, values);
            }
            Inst::LoadEdram { dst, address } => {
                let values = dst
                    .mask
                    .lanes()
                    .map(|lane| (lane, format!("edram[{}]", self.raw_lane(address, lane))))
                    .collect();
                self.assign(*dst, values);
            }
            Inst::StoreEdram { address, value } => {
                let address = self.raw_lane(address, Lane::X);
                let value = self.typed_lane(value, Lane::X, ScalarType::Untyped);
                self.line(&format!("edram[{address}] = {value};"));
            }
        }
    }

    fn comment(&mut self, text: &str) {
        for line in text.lines() {
            self.line(&format!("// {line}"));
        }
    }

    fn begin_if(&mut self, cond: &Operand, test: Test) {
        let cond = self.typed_lane(cond, Lane::X, ScalarType::U32);
        let op = match test {
            Test::NonZero => "!=",
            Test::Zero => "==",
        };
        self.line(&format!("if ({cond} {op} 0u) {{"));
        self.indent += 1;
    }

    fn begin_else(&mut self) {
        self.indent -= 1;
        self.line("} else {");
        self.indent += 1;
    }

    fn end_if(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    fn begin_switch(&mut self, selector: &Operand) {
        let selector = self.typed_lane(selector, Lane::X, ScalarType::U32);
        self.line(&format!("switch ({selector}) {{"));
        self.indent += 1;
        self.switch_has_default.push(false);
    }

    fn begin_case(&mut self, values: &[u32]) {
        let values: Vec<String> = values.iter().map(|v| format!("{v}u")).collect();
        self.line(&format!("case {}: {{", values.join(", ")));
        self.indent += 1;
    }

    fn begin_default(&mut self) {
        if let Some(has_default) = self.switch_has_default.last_mut() {
            *has_default = true;
        }
        self.line("default: {");
        self.indent += 1;
    }

    fn end_case(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    fn end_switch(&mut self) {
        // WGSL requires exactly one default clause.
        if self.switch_has_default.pop() == Some(false) {
            self.line("default: {}");
        }
        self.indent -= 1;
        self.line("}");
    }

    fn shader_body(&mut self) {
        let call = format!("body = {}(position);", self.options.body_function);
        self.line(&call);
    }

    fn ret(&mut self) {
        self.line("return;");
    }
}

/// Pass-through body used when no translated body is supplied.
fn stub_body(name: &str) -> String {
    format!(
        "fn {name}(position: vec4<f32>) -> PixelBodyOutput {{\n    \
         var out: PixelBodyOutput;\n    \
         out.depth = position.z;\n    \
         return out;\n\
         }}\n"
    )
}

/// Lowers `program` to a WGSL fragment shader module.
pub fn generate_wgsl(program: &Program, options: &WgslOptions) -> Result<WgslOutput, WgslError> {
    if let Some(value) = duplicate_case_values(program).first() {
        return Err(err(format!("duplicate switch case value {value}")));
    }

    let mut backend = WgslBackend {
        options,
        out: String::new(),
        indent: 1,
        temp_count: 0,
        switch_has_default: Vec::new(),
        error: None,
    };
    program.walk(&mut backend);
    if let Some(error) = backend.error {
        return Err(error);
    }

    let mut wgsl = String::new();
    let _ = writeln!(wgsl, "struct PixelBodyOutput {{");
    for index in 0..MAX_COLOR_OUTPUTS {
        let _ = writeln!(wgsl, "    color{index}: vec4<f32>,");
    }
    let _ = writeln!(wgsl, "    depth: f32,");
    let _ = writeln!(wgsl, "    killed: bool,");
    let _ = writeln!(wgsl, "}}");
    let _ = writeln!(wgsl);
    let _ = writeln!(
        wgsl,
        "@group({}) @binding({}) var<uniform> om_constants: array<vec4<u32>, {}>;",
        options.bind_group, options.constants_binding, options.constant_registers
    );
    let _ = writeln!(
        wgsl,
        "@group({}) @binding({}) var<storage, read_write> edram: array<u32>;",
        options.bind_group, options.edram_binding
    );
    let _ = writeln!(wgsl);
    match &options.body_source {
        Some(source) => {
            let _ = writeln!(wgsl, "{}", source.trim_end());
        }
        None => wgsl.push_str(&stub_body(&options.body_function)),
    }
    let _ = writeln!(wgsl);
    let _ = writeln!(wgsl, "@fragment");
    let _ = writeln!(
        wgsl,
        "fn {}(@builtin(position) position: vec4<f32>, @builtin(front_facing) front_facing: bool, @builtin(sample_mask) sample_mask: u32) {{",
        options.entry_point
    );
    let _ = writeln!(wgsl, "    let in_position = bitcast<vec4<u32>>(position);");
    let _ = writeln!(
        wgsl,
        "    let in_front_facing = select(0u, {TRUE_MASK}, front_facing);"
    );
    let _ = writeln!(wgsl, "    var body: PixelBodyOutput;");
    wgsl.push_str(&backend.out);
    let _ = writeln!(wgsl, "}}");

    Ok(WgslOutput {
        wgsl,
        entry_point: options.entry_point.clone(),
    })
}

fn duplicate_case_values(program: &Program) -> Vec<u32> {
    use crate::ir::Node;

    fn visit(nodes: &[Node], duplicates: &mut Vec<u32>) {
        for node in nodes {
            match node {
                Node::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    visit(then_block, duplicates);
                    if let Some(else_block) = else_block {
                        visit(else_block, duplicates);
                    }
                }
                Node::Switch { cases, default, .. } => {
                    let mut seen = std::collections::BTreeSet::new();
                    for case in cases {
                        for value in &case.values {
                            if !seen.insert(*value) {
                                duplicates.push(*value);
                            }
                        }
                        visit(&case.body, duplicates);
                    }
                    if let Some(default) = default {
                        visit(default, duplicates);
                    }
                }
                Node::Inst(_) | Node::Comment(_) | Node::ShaderBody | Node::Return => {}
            }
        }
    }

    let mut duplicates = Vec::new();
    visit(&program.nodes, &mut duplicates);
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ShaderBuilder;

    #[test]
    fn all_immediate_instructions_are_folded() {
        let mut b = ShaderBuilder::new();
        let t = b.alloc_temp();
        b.iadd(t.dst_x(), Operand::u32(u32::MAX), Operand::u32(2));
        drop(t);
        let program = b.finish().unwrap();
        let out = generate_wgsl(&program, &WgslOptions::default()).unwrap();
        assert!(out.wgsl.contains("r0.x = 0x1u;"), "{}", out.wgsl);
    }

    #[test]
    fn multi_lane_writes_read_sources_first() {
        let mut b = ShaderBuilder::new();
        let t = b.alloc_temp();
        b.mov(
            t.dst(crate::ir::WriteMask::XY),
            t.swz(crate::ir::Swizzle([Lane::Y, Lane::X, Lane::Z, Lane::W])),
        );
        drop(t);
        let program = b.finish().unwrap();
        let out = generate_wgsl(&program, &WgslOptions::default()).unwrap();
        let let_x = out.wgsl.find("let v_x = r0.y;").unwrap();
        let store_x = out.wgsl.find("r0.x = v_x;").unwrap();
        assert!(let_x < store_x);
        assert!(out.wgsl.contains("let v_y = r0.x;"));
    }

    #[test]
    fn out_of_range_operands_are_rejected() {
        let program = Program {
            nodes: vec![crate::ir::Node::Inst(Inst::StoreEdram {
                address: Operand::constant(40, Lane::X),
                value: Operand::u32(0),
            })],
            temp_count: 0,
        };
        let error = generate_wgsl(&program, &WgslOptions::default()).unwrap_err();
        assert!(error.message.contains("c40"), "{error}");
    }

    #[test]
    fn switch_without_default_gets_an_empty_one() {
        let mut b = ShaderBuilder::new();
        let t = b.alloc_temp();
        b.begin_switch(Operand::constant(0, Lane::X));
        b.case(&[1, 2]);
        b.mov(t.dst_x(), Operand::u32(1));
        b.end_switch();
        drop(t);
        let program = b.finish().unwrap();
        let out = generate_wgsl(&program, &WgslOptions::default()).unwrap();
        assert!(out.wgsl.contains("case 1u, 2u: {"));
        assert!(out.wgsl.contains("default: {}"));
    }
}
