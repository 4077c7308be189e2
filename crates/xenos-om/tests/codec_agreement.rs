//! Emitted format conversions against the host reference codecs.

mod common;

use pretty_assertions::assert_eq;
use xenos_om::codec::{
    emit_f32_to_unorm24, emit_f32_to_float20e4, emit_linear_to_pwl_gamma, emit_pack,
    emit_pack_dynamic, emit_pwl_gamma_to_linear, emit_unpack,
};
use xenos_om::formats::{
    f32_to_float20e4, f32_to_unorm24, linear_to_pwl_gamma, pack_color, pwl_gamma_to_linear,
    unpack_color,
};
use xenos_om::ColorRenderTargetFormat;
use xenos_shader_ir::{
    InputRegister, Interpreter, Invocation, Operand, PixelBodyOutput, Program, ShaderBuilder,
    Swizzle, WriteMask,
};

const SAMPLE_COLORS: [[f32; 4]; 8] = [
    [0.0, 0.0, 0.0, 0.0],
    [1.0, 0.5, 0.25, 1.0],
    [0.2, 0.4, 0.6, 0.8],
    [-0.5, 2.0, 0.001, 0.33],
    [31.0, -31.0, 15.5, 0.75],
    [40.0, -40.0, 100_000.0, -100_000.0],
    [0.0078125, 0.015625, 0.9999, 0.5],
    [-0.0, 3.5, 7.25, 1.5],
];

fn run(program: &Program, color: [f32; 4], memory: &mut Vec<u32>) {
    Interpreter::new(program, &[]).run_quad(
        &std::array::from_fn(|i| Invocation::pixel(i as u32 & 1, i as u32 >> 1, 0.5, 1)),
        &mut |_| PixelBodyOutput {
            colors: [color; 4],
            ..PixelBodyOutput::default()
        },
        memory,
    );
}

fn body_color(b: &mut ShaderBuilder) -> xenos_shader_ir::Temp {
    b.shader_body();
    let color = b.alloc_temp();
    b.mov(
        color.dst_all(),
        Operand::input(InputRegister::Color(0), Swizzle::XYZW),
    );
    color
}

/// Stores the packed dwords at 0 and 1 and the unpacked lanes at 2..6.
fn pack_unpack_program(format: ColorRenderTargetFormat) -> Program {
    let mut b = ShaderBuilder::new();
    let color = body_color(&mut b);
    let packed = b.alloc_temp();
    let unpacked = b.alloc_temp();
    emit_pack(&mut b, format, &color, &packed);
    b.store_edram(Operand::u32(0), packed.x());
    b.store_edram(Operand::u32(1), packed.y());
    emit_unpack(&mut b, format, &packed, &unpacked);
    for (address, lane) in [unpacked.x(), unpacked.y(), unpacked.z(), unpacked.w()]
        .into_iter()
        .enumerate()
    {
        b.store_edram(Operand::u32(2 + address as u32), lane);
    }
    drop((color, packed, unpacked));
    b.finish().unwrap()
}

#[test]
fn emitted_pack_and_unpack_match_host_codecs() {
    common::init_tracing();
    for format in ColorRenderTargetFormat::ALL {
        let program = pack_unpack_program(format);
        for color in SAMPLE_COLORS {
            let mut memory = vec![0u32; 6];
            run(&program, color, &mut memory);

            let expected_packed = pack_color(format, color);
            assert_eq!(
                [memory[0], memory[1]],
                expected_packed,
                "{format:?} pack of {color:?}"
            );
            let expected_unpacked = unpack_color(format, expected_packed).map(f32::to_bits);
            assert_eq!(
                &memory[2..6],
                &expected_unpacked[..],
                "{format:?} unpack of {expected_packed:x?}"
            );
        }
    }
}

#[test]
fn emitted_small_floats_round_to_nearest_even() {
    let program = pack_unpack_program(ColorRenderTargetFormat::Rgb10A2Float);
    let mut memory = vec![0u32; 6];
    run(&program, [1.0078125, 2f32.powi(-9), 31.875, 1.0], &mut memory);
    // 7e3 0x181, 0x001 and 0x3FF with alpha 3.
    assert_eq!(memory[0], 0xFFF0_0581);
    assert_eq!(f32::from_bits(memory[2]), 1.0078125);
    assert_eq!(f32::from_bits(memory[3]), 2f32.powi(-9));

    // Ties go to the even code: 0x180, 0x182, then 0x080 and alpha 0.
    let mut memory = vec![0u32; 6];
    run(&program, [1.00390625, 1.01171875, 0.25, 0.0], &mut memory);
    assert_eq!(memory[0], 0x0806_0980);
}

#[test]
fn dynamic_pack_matches_static_pack_and_rejects_unknown_formats() {
    let mut b = ShaderBuilder::new();
    let color = body_color(&mut b);
    let packed = b.alloc_temp();
    let written = b.alloc_temp();
    emit_pack_dynamic(&mut b, Operand::constant(0, xenos_shader_ir::Lane::X), &color, &packed, &written);
    b.store_edram(Operand::u32(0), packed.x());
    b.store_edram(Operand::u32(1), packed.y());
    b.store_edram(Operand::u32(2), written.x());
    drop((color, packed, written));
    let program = b.finish().unwrap();

    let color = [0.2, 0.4, 0.6, 0.8];
    for format in ColorRenderTargetFormat::ALL {
        let constants = [[format.raw(), 0, 0, 0]];
        let mut memory = vec![0u32; 3];
        Interpreter::new(&program, &constants).run_pixel(
            Invocation::pixel(0, 0, 0.5, 1),
            PixelBodyOutput {
                colors: [color; 4],
                ..PixelBodyOutput::default()
            },
            &mut memory,
        );
        assert_eq!(&memory[..2], &pack_color(format, color)[..], "{format:?}");
        assert_eq!(memory[2], u32::MAX, "{format:?}");
    }

    for raw in [8, 9, 11, 13] {
        let constants = [[raw, 0, 0, 0]];
        let mut memory = vec![0xDEAD_BEEF; 3];
        Interpreter::new(&program, &constants).run_pixel(
            Invocation::pixel(0, 0, 0.5, 1),
            PixelBodyOutput::default(),
            &mut memory,
        );
        assert_eq!(memory[2], 0, "raw format {raw} must not be written");
    }
}

#[test]
fn emitted_gamma_matches_host_curve() {
    let mut b = ShaderBuilder::new();
    let color = body_color(&mut b);
    emit_linear_to_pwl_gamma(&mut b, &color, WriteMask::XYZW);
    for (address, lane) in [color.x(), color.y(), color.z(), color.w()]
        .into_iter()
        .enumerate()
    {
        b.store_edram(Operand::u32(address as u32), lane);
    }
    drop(color);
    let program = b.finish().unwrap();

    let inputs = [
        [0.0, 0.03, 0.0625, 0.1],
        [0.125, 0.2, 0.25, 0.3],
        [0.375, 0.5, 0.625, 0.75],
        [0.9, 1.0, 1.5, -0.25],
    ];
    for input in inputs {
        let mut memory = vec![0u32; 4];
        run(&program, input, &mut memory);
        let got: Vec<f32> = memory.iter().copied().map(f32::from_bits).collect();
        for (lane, linear) in input.into_iter().enumerate() {
            let expected = linear_to_pwl_gamma(linear);
            assert!(
                (got[lane] - expected).abs() <= 1.0e-6,
                "gamma({linear}) = {}, expected {expected}",
                got[lane]
            );
        }
    }
}

#[test]
fn emitted_gamma_to_linear_matches_host_curve() {
    let mut b = ShaderBuilder::new();
    let color = body_color(&mut b);
    emit_pwl_gamma_to_linear(&mut b, &color, WriteMask::XYZW);
    for (address, lane) in [color.x(), color.y(), color.z(), color.w()]
        .into_iter()
        .enumerate()
    {
        b.store_edram(Operand::u32(address as u32), lane);
    }
    drop(color);
    let program = b.finish().unwrap();

    let inputs = [
        [0.0, 0.1, 0.25, 0.3],
        [0.375, 0.5, 128.0 / 255.0, 0.7],
        [0.75, 0.8, 1.0, 1.25],
    ];
    for input in inputs {
        let mut memory = vec![0u32; 4];
        run(&program, input, &mut memory);
        let expected = input.map(|gamma| pwl_gamma_to_linear(gamma).to_bits());
        assert_eq!(memory, expected.to_vec(), "{input:?}");
    }
}

#[test]
fn emitted_depth_encodings_match_host() {
    let mut b = ShaderBuilder::new();
    let depth = body_color(&mut b);
    let encoded = b.alloc_temp();
    emit_f32_to_unorm24(&mut b, &encoded, depth.x());
    b.store_edram(Operand::u32(0), encoded.x());
    emit_f32_to_float20e4(&mut b, &encoded, depth.op(), WriteMask::X);
    b.store_edram(Operand::u32(1), encoded.x());
    drop((depth, encoded));
    let program = b.finish().unwrap();

    for z in [0.0, 1.0e-7, 0.0001, 0.25, 0.3, 0.5, 0.75, 0.999_999, 1.0] {
        let mut memory = vec![0u32; 2];
        run(&program, [z, 0.0, 0.0, 0.0], &mut memory);
        assert_eq!(memory[0], f32_to_unorm24(z), "unorm24 of {z}");
        assert_eq!(memory[1], f32_to_float20e4(z), "20e4 of {z}");
    }

    for (z, expected) in [(0.5, 0xE0_0000), (2f32.powi(-34), 0x00_0001), (1.0 + 2f32.powi(-21), 0xF0_0000)] {
        let mut memory = vec![0u32; 2];
        run(&program, [z, 0.0, 0.0, 0.0], &mut memory);
        assert_eq!(memory[1], expected, "20e4 of {z}");
    }
}
