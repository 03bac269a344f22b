use thiserror::Error;
use wasm_bindgen::JsValue;

/// Errors raised by the layer rendering engine
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("shader compile error in '{program}': {log}")]
    ShaderCompile { program: String, log: String },

    #[error("shader link error in '{program}': {log}")]
    ShaderLink { program: String, log: String },

    /// Generated shader IR referenced a variable that is illegal in its stage
    #[error("invalid shader program '{program}': {reason}")]
    ShaderValidation { program: String, reason: String },

    #[error("failed to create GPU resource: {0}")]
    ResourceCreation(&'static str),

    #[error("layer is already finalized")]
    AlreadyFinalized,

    #[error("layer is not finalized yet")]
    NotFinalized,

    #[error("layer capacity exceeded ({positions} positions, {indices} indices)")]
    CapacityExceeded { positions: usize, indices: usize },

    #[error("unknown portion id: {0}")]
    UnknownPortion(usize),

    #[error("unknown layer id: {0}")]
    UnknownLayer(usize),

    #[error("unknown mesh id: {0}")]
    UnknownMesh(usize),

    /// A model whose finalize failed part way; its layers were released
    #[error("model '{0}' failed to finalize")]
    FinalizeFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

impl From<RenderError> for JsValue {
    fn from(err: RenderError) -> JsValue {
        JsValue::from_str(&err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> RenderError {
        RenderError::InvalidConfig(err.to_string())
    }
}
