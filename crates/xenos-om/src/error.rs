use thiserror::Error;
use xenos_shader_ir::{BuilderError, WgslError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OmError {
    #[error("failed to build the output-merger program: {0}")]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Wgsl(#[from] WgslError),
}
