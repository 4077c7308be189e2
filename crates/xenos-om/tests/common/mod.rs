#![allow(dead_code)]

use xenos_om::{
    generate_output_merger, AlphaToCoveragePolicy, OutputMergerKey, OutputMergerState,
    PixelShaderTraits, SystemConstants,
};
use xenos_shader_ir::{EdramMemory, Interpreter, Invocation, PixelBodyOutput, Program, QuadOutcome};

/// Tiles allocated by [`CountingEdram::new`]; enough for 2x resolution scale tests.
pub const TEST_EDRAM_TILES: usize = 64;

/// EDRAM that counts accesses.
#[derive(Debug, Clone)]
pub struct CountingEdram {
    pub dwords: Vec<u32>,
    pub loads: usize,
    pub stores: usize,
}

impl CountingEdram {
    pub fn new() -> Self {
        Self::filled(0)
    }

    pub fn filled(value: u32) -> Self {
        Self {
            dwords: vec![value; TEST_EDRAM_TILES * 5120],
            loads: 0,
            stores: 0,
        }
    }
}

impl EdramMemory for CountingEdram {
    fn load(&mut self, address: u32) -> u32 {
        self.loads += 1;
        self.dwords.load(address)
    }

    fn store(&mut self, address: u32, value: u32) {
        self.stores += 1;
        self.dwords.store(address, value);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn body_color(color: [f32; 4]) -> PixelBodyOutput {
    PixelBodyOutput {
        colors: [color; 4],
        ..PixelBodyOutput::default()
    }
}

pub fn program_for(state: &OutputMergerState, traits: PixelShaderTraits) -> Program {
    let key = OutputMergerKey::from_state(state, traits);
    generate_output_merger(&key, &AlphaToCoveragePolicy::XENOS).expect("generate output merger")
}

pub fn color_traits() -> PixelShaderTraits {
    PixelShaderTraits {
        color_outputs_written: 0b1111,
        ..PixelShaderTraits::default()
    }
}

/// Runs one covered pixel with helper neighbors.
pub fn run_pixel(
    program: &Program,
    constants: &SystemConstants,
    pixel: Invocation,
    body: PixelBodyOutput,
    memory: &mut CountingEdram,
) -> QuadOutcome {
    Interpreter::new(program, &constants.registers).run_pixel(pixel, body, memory)
}

/// Index of `pixel` within its quad.
pub fn quad_index(x: u32, y: u32) -> usize {
    ((y & 1) * 2 + (x & 1)) as usize
}

/// Coverage and pending bits left in the state register of invocation `index`.
pub fn final_coverage(outcome: &QuadOutcome, index: usize) -> u32 {
    outcome.temps[index][0][0] & 0xFF
}
