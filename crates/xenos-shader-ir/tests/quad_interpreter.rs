use pretty_assertions::assert_eq;
use xenos_shader_ir::{
    InputRegister, Interpreter, Invocation, Operand, PixelBodyOutput, ShaderBuilder, Swizzle,
};

fn quad(z: [f32; 4]) -> [Invocation; 4] {
    std::array::from_fn(|i| Invocation::pixel(10 + (i as u32 & 1), 20 + (i as u32 >> 1), z[i], 1))
}

#[test]
fn fine_derivatives_use_quad_neighbors() {
    let mut b = ShaderBuilder::new();
    let t = b.alloc_temp();
    let position = Operand::input(InputRegister::Position, Swizzle::ZZZZ);
    b.deriv_x(t.dst_x(), position);
    b.deriv_y(t.dst_y(), position);
    drop(t);
    let program = b.finish().unwrap();

    let mut memory = vec![0u32; 4];
    let outcome = Interpreter::new(&program, &[]).run_quad(
        &quad([0.0, 0.25, 0.5, 1.0]),
        &mut |_| PixelBodyOutput::default(),
        &mut memory,
    );
    let ddx: Vec<f32> = outcome.temps.iter().map(|t| f32::from_bits(t[0][0])).collect();
    let ddy: Vec<f32> = outcome.temps.iter().map(|t| f32::from_bits(t[0][1])).collect();
    assert_eq!(ddx, vec![0.25, 0.25, 0.5, 0.5]);
    assert_eq!(ddy, vec![0.5, 0.75, 0.5, 0.75]);
}

#[test]
fn divergent_control_flow_masks_invocations() {
    let mut b = ShaderBuilder::new();
    let t = b.alloc_temp();
    b.ftou(t.dst_x(), Operand::input(InputRegister::Position, Swizzle::XXXX));
    b.and(t.dst_x(), t.x(), Operand::u32(1));
    b.if_nz(t.x(), |b| b.ret());
    b.shader_body();
    b.store_edram(Operand::u32(0), Operand::input(InputRegister::Color(0), Swizzle::XXXX));
    drop(t);
    let program = b.finish().unwrap();

    let mut memory = vec![0u32; 1];
    let outcome = Interpreter::new(&program, &[]).run_quad(
        &quad([0.0; 4]),
        &mut |i| PixelBodyOutput {
            colors: [[i as f32, 0.0, 0.0, 0.0]; 4],
            ..PixelBodyOutput::default()
        },
        &mut memory,
    );
    assert_eq!(outcome.returned, [false, true, false, true]);
    assert_eq!(outcome.body_ran, [true, false, true, false]);
    // Invocations run in order, so the last surviving one wins.
    assert_eq!(f32::from_bits(memory[0]), 2.0);
}

#[test]
fn helper_invocations_do_not_store() {
    let mut b = ShaderBuilder::new();
    let t = b.alloc_temp();
    b.ftou(t.dst_x(), Operand::input(InputRegister::Position, Swizzle::XXXX));
    b.store_edram(t.x(), Operand::u32(0xABCD));
    drop(t);
    let program = b.finish().unwrap();

    let mut memory = vec![0u32; 16];
    Interpreter::new(&program, &[]).run_pixel(
        Invocation::pixel(5, 3, 0.5, 1),
        PixelBodyOutput::default(),
        &mut memory,
    );
    let written: Vec<usize> = (0..16).filter(|&i| memory[i] != 0).collect();
    assert_eq!(written, vec![5]);
}

#[test]
fn switch_routes_each_invocation_to_one_case() {
    let mut b = ShaderBuilder::new();
    let t = b.alloc_temp();
    b.ftou(t.dst_x(), Operand::input(InputRegister::Position, Swizzle::YYYY));
    b.begin_switch(t.x());
    b.case(&[20]);
    b.mov(t.dst_y(), Operand::u32(1));
    b.default_case();
    b.mov(t.dst_y(), Operand::u32(2));
    b.end_switch();
    drop(t);
    let program = b.finish().unwrap();

    let mut memory = Vec::new();
    let outcome = Interpreter::new(&program, &[]).run_quad(
        &quad([0.0; 4]),
        &mut |_| PixelBodyOutput::default(),
        &mut memory,
    );
    let picked: Vec<u32> = outcome.temps.iter().map(|t| t[0][1]).collect();
    assert_eq!(picked, vec![1, 1, 2, 2]);
}
