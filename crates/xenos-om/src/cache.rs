use std::collections::HashMap;
use std::sync::Arc;

use xenos_shader_ir::{generate_wgsl, Program, WgslOptions, WgslOutput};

use crate::alpha::AlphaToCoveragePolicy;
use crate::emitter::{generate_output_merger, OutputMergerKey};
use crate::error::OmError;

#[derive(Debug, Clone)]
pub struct GeneratedOutputMerger {
    pub program: Program,
    pub wgsl: WgslOutput,
}

/// Generated output mergers keyed by configuration.
#[derive(Debug, Default)]
pub struct OutputMergerCache {
    options: WgslOptions,
    alpha_to_coverage: AlphaToCoveragePolicy,
    programs: HashMap<OutputMergerKey, Arc<GeneratedOutputMerger>>,
    hits: u64,
    misses: u64,
}

impl OutputMergerCache {
    pub fn new(options: WgslOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn with_alpha_to_coverage(mut self, policy: AlphaToCoveragePolicy) -> Self {
        self.alpha_to_coverage = policy;
        self.programs.clear();
        self
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get_or_create(
        &mut self,
        key: &OutputMergerKey,
    ) -> Result<Arc<GeneratedOutputMerger>, OmError> {
        if let Some(existing) = self.programs.get(key) {
            self.hits += 1;
            return Ok(Arc::clone(existing));
        }

        let program = generate_output_merger(key, &self.alpha_to_coverage)?;
        let wgsl = generate_wgsl(&program, &self.options)?;
        let generated = Arc::new(GeneratedOutputMerger { program, wgsl });
        self.programs.insert(*key, Arc::clone(&generated));
        self.misses += 1;
        tracing::debug!(misses = self.misses, cached = self.programs.len(), "output merger cache miss");
        Ok(generated)
    }
}
