//! Error types for the GPU renderer's init-time fallible operations.
//!
//! Every other renderer entry point is infallible by contract: out-of-range
//! register addresses are silently ignored and GPU draw errors are logged,
//! not propagated (see `renderer::diagnostics`).

#[derive(Debug, Clone, thiserror::Error)]
pub enum RendererError {
    #[error("failed to compile {stage} shader for {program}: {log}")]
    ShaderCompile {
        program: &'static str,
        stage: &'static str,
        log: String,
    },

    #[error("failed to link program {program}: {log}")]
    ProgramLink { program: &'static str, log: String },

    #[error("failed to allocate GPU resource: {resource}")]
    ResourceAlloc { resource: &'static str },
}
