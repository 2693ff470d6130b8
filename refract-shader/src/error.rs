use std::path::PathBuf;
use thiserror::Error;
use crate::reflection::PassPhase;
use crate::stage::ShaderStage;
use crate::layout::DescriptorKind;

pub type Result<T> = std::result::Result<T, ReflectError>;

/// Failure of a reflection pass. No partial result is ever produced alongside one of these.
#[derive(Debug, Error)]
pub enum ReflectError {
    #[error("{stage} shader `{file}` failed to compile:\n{diagnostic}")]
    Compile {
        stage: ShaderStage,
        file: String,
        diagnostic: String,
    },

    #[error("`{file}` is a second {stage} stage, `{previous}` already provides it")]
    DuplicateStage {
        stage: ShaderStage,
        file: String,
        previous: String,
    },

    #[error("cannot infer the shader stage of `{file}` from its extension")]
    UnknownStageKind { file: String },

    #[error("program link failed: {diagnostic}")]
    Link { diagnostic: String },

    #[error("unsupported binding shape for `{name}`: {reason}")]
    UnsupportedBindingShape { name: String, reason: String },

    #[error("set {set} binding {binding} is declared as both {existing} and {incoming}")]
    ConflictingBinding {
        set: u32,
        binding: u32,
        existing: DescriptorKind,
        incoming: DescriptorKind,
    },

    #[error("descriptor set numbers must be contiguous from 0, found {sets:?}")]
    NonContiguousSets { sets: Vec<u32> },

    #[error("vertex input locations must be contiguous from 0, found {locations:?}")]
    NonContiguousLocations { locations: Vec<u32> },

    #[error("failed to emit {stage} bytecode: {reason}")]
    Emit { stage: ShaderStage, reason: String },

    #[error("failed to read shader source `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader compiler unavailable: {0}")]
    CompilerUnavailable(String),
}

impl ReflectError {
    pub(crate) fn link(diagnostic: impl Into<String>) -> Self {
        ReflectError::Link { diagnostic: diagnostic.into() }
    }

    pub(crate) fn unsupported(name: &str, reason: impl Into<String>) -> Self {
        ReflectError::UnsupportedBindingShape {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    /// The pass phase this failure belongs to.
    pub fn phase(&self) -> PassPhase {
        match self {
            ReflectError::Compile { .. }
            | ReflectError::DuplicateStage { .. }
            | ReflectError::UnknownStageKind { .. }
            | ReflectError::Io { .. }
            | ReflectError::CompilerUnavailable(_) => PassPhase::Compiling,
            ReflectError::Link { .. } => PassPhase::Linking,
            ReflectError::UnsupportedBindingShape { .. }
            | ReflectError::ConflictingBinding { .. } => PassPhase::Classifying,
            ReflectError::NonContiguousSets { .. }
            | ReflectError::NonContiguousLocations { .. } => PassPhase::Validating,
            ReflectError::Emit { .. } => PassPhase::Emitting,
        }
    }

    /// The stage a failure is attributed to, `None` for program-wide failures.
    pub fn stage(&self) -> Option<ShaderStage> {
        match self {
            ReflectError::Compile { stage, .. }
            | ReflectError::DuplicateStage { stage, .. }
            | ReflectError::Emit { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
