use pretty_assertions::assert_eq;
use xenos_shader_ir::{
    generate_wgsl, InputRegister, Lane, Operand, ShaderBuilder, Swizzle, WgslOptions, WriteMask,
};

fn validate_wgsl_module(wgsl: &str) {
    let module = match naga::front::wgsl::parse_str(wgsl) {
        Ok(module) => module,
        Err(e) => panic!("wgsl parse: {}\n{wgsl}", e.emit_to_string(wgsl)),
    };
    // Derivatives after per-pixel early returns are intentional; the quad stays resident.
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all() - naga::valid::ValidationFlags::CONTROL_FLOW_UNIFORMITY,
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|e| panic!("wgsl validate: {e:?}\n{wgsl}"));
}

#[test]
fn every_alu_op_lowers_to_valid_wgsl() {
    let mut b = ShaderBuilder::new();
    let a = b.alloc_temp();
    let t = b.alloc_temp();
    b.mov(a.dst_all(), Operand::input(InputRegister::Position, Swizzle::XYZW));
    b.add_sat(t.dst_x(), a.x(), Operand::f32(0.5).neg());
    b.mov_sat(t.dst_w(), a.w());
    b.mul(t.dst_y(), a.y().abs(), a.x());
    b.min(t.dst_z(), a.z(), Operand::f32(1.0));
    b.max(t.dst_w(), a.w(), Operand::constant(1, Lane::Y));
    b.round_ne(t.dst_x(), t.x());
    b.round_z(t.dst_y(), t.y());
    b.round_ni(t.dst_z(), t.z());
    b.deriv_x(t.dst_x(), a.z());
    b.deriv_y(t.dst_y(), a.z());
    b.eq(t.dst_x(), a.x(), a.y());
    b.ne(t.dst_y(), a.x(), a.y());
    b.lt(t.dst_z(), a.x(), a.y());
    b.ge(t.dst_w(), a.x(), a.y());
    b.ftou(t.dst_x(), a.x());
    b.ftoi(t.dst_y(), a.y());
    b.utof(t.dst_z(), t.x());
    b.itof(t.dst_w(), t.y());
    b.f32_to_f16(t.dst_x(), a.x());
    b.f16_to_f32(t.dst_y(), t.x());
    b.iadd(t.dst_x(), t.x(), Operand::u32(3).neg());
    b.imul(t.dst_y(), t.y(), Operand::u32(1280));
    b.ieq(t.dst_z(), t.x(), Operand::u32(0));
    b.ine(t.dst_w(), t.x(), Operand::u32(0));
    b.ilt(t.dst_x(), t.x(), Operand::i32(-1));
    b.ige(t.dst_y(), t.x(), t.y());
    b.ult(t.dst_z(), t.x(), t.y());
    b.uge(t.dst_w(), t.x(), t.y());
    b.imin(t.dst_x(), t.x(), Operand::i32(-32768));
    b.imax(t.dst_y(), t.y(), Operand::i32(32767));
    b.umin(t.dst_z(), t.z(), Operand::u32(24));
    b.umax(t.dst_w(), t.w(), t.x());
    b.and(t.dst_x(), t.x(), Operand::u32(0xFF));
    b.or(t.dst_y(), t.y(), Operand::constant(0, Lane::X));
    b.xor(t.dst_z(), t.z(), t.w());
    b.not(t.dst_w(), t.w());
    b.ishl(t.dst_x(), t.x(), Operand::u32(8));
    b.ushr(t.dst_y(), t.y(), t.x());
    b.ishr(t.dst_z(), t.z(), Operand::u32(31));
    b.ubfe(t.dst_w(), Operand::u32(8), Operand::u32(16), t.w());
    b.bfi(t.dst_x(), Operand::u32(10), Operand::u32(10), t.y(), t.x());
    b.firstbit_hi(t.dst_y(), t.y());
    b.movc(t.dst_all(), t.x(), a.op(), Operand::f32x4([0.0, 0.25, 0.5, 1.0]));
    b.mul_legacy(t.dst(WriteMask::XYZ), t.op(), Operand::input(InputRegister::Color(0), Swizzle::XYZW));
    drop((a, t));
    let program = b.finish().unwrap();

    let out = generate_wgsl(&program, &WgslOptions::default()).unwrap();
    validate_wgsl_module(&out.wgsl);
    assert_eq!(out.entry_point, "main");
}

#[test]
fn control_flow_and_edram_access_lower_to_valid_wgsl() {
    let mut b = ShaderBuilder::new();
    let address = b.alloc_temp();
    let value = b.alloc_temp();
    b.ftou(address.dst(WriteMask::XY), Operand::input(InputRegister::Position, Swizzle::XYZW));
    b.load_edram(value.dst(WriteMask::XY), address.op());
    b.if_nz(Operand::input(InputRegister::Killed, Swizzle::XXXX), |b| b.ret());
    b.shader_body();
    b.begin_switch(Operand::constant(6, Lane::X));
    b.case(&[0, 1]);
    b.iadd(value.dst_x(), value.x(), Operand::u32(1));
    b.case(&[14]);
    b.if_z(value.y(), |b| {
        b.store_edram(address.y(), Operand::input(InputRegister::Depth, Swizzle::XXXX));
    });
    b.default_case();
    b.ret();
    b.end_switch();
    b.begin_if(Operand::input(InputRegister::FrontFacing, Swizzle::XXXX), xenos_shader_ir::Test::NonZero);
    b.store_edram(address.x(), value.x());
    b.begin_else();
    b.store_edram(address.x(), value.y());
    b.end_if();
    drop((address, value));
    let program = b.finish().unwrap();

    let out = generate_wgsl(&program, &WgslOptions::default()).unwrap();
    validate_wgsl_module(&out.wgsl);
    assert!(out.wgsl.contains("body = pixel_body(position);"));
    assert!(out.wgsl.contains("var<storage, read_write> edram: array<u32>;"));
}

#[test]
fn options_rename_resources_and_body() {
    let mut b = ShaderBuilder::new();
    b.shader_body();
    let program = b.finish().unwrap();
    let options = WgslOptions {
        bind_group: 2,
        constants_binding: 3,
        edram_binding: 4,
        entry_point: "om_main".to_owned(),
        body_function: "translated_ps".to_owned(),
        body_source: Some(
            "fn translated_ps(position: vec4<f32>) -> PixelBodyOutput {\n    \
             var out: PixelBodyOutput;\n    \
             out.color0 = vec4<f32>(1.0, 0.0, 0.0, 1.0);\n    \
             out.depth = position.z;\n    \
             return out;\n}"
                .to_owned(),
        ),
        ..WgslOptions::default()
    };
    let out = generate_wgsl(&program, &options).unwrap();
    validate_wgsl_module(&out.wgsl);
    assert!(out
        .wgsl
        .contains("@group(2) @binding(3) var<uniform> om_constants"));
    assert!(out.wgsl.contains("@group(2) @binding(4) var<storage"));
    assert!(out.wgsl.contains("fn om_main("));
    assert!(out.wgsl.contains("body = translated_ps(position);"));
}

#[test]
fn duplicate_case_values_are_rejected() {
    let mut b = ShaderBuilder::new();
    b.begin_switch(Operand::constant(0, Lane::X));
    b.case(&[1]);
    b.case(&[1]);
    b.end_switch();
    let program = b.finish().unwrap();
    let error = generate_wgsl(&program, &WgslOptions::default()).unwrap_err();
    assert_eq!(error.message, "duplicate switch case value 1");
}
