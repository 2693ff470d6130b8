use std::path::PathBuf;
use derive_builder::Builder;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OptimizationLevel {
    #[default]
    None,
    Size,
    Performance,
}

impl OptimizationLevel {
    pub(crate) fn to_shaderc(self) -> shaderc::OptimizationLevel {
        match self {
            OptimizationLevel::None => shaderc::OptimizationLevel::Zero,
            OptimizationLevel::Size => shaderc::OptimizationLevel::Size,
            OptimizationLevel::Performance => shaderc::OptimizationLevel::Performance,
        }
    }
}

/// Per-session reflection and compilation options.
///
/// The target environment (GLSL 460, Vulkan 1.2, SPIR-V 1.5) is fixed and not part of these.
#[derive(Clone, Debug, Default, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct ReflectOptions {
    /// Reject separate `texture*` / `sampler` objects, only combined samplers are accepted.
    #[builder(default)]
    pub combined_samplers_only: bool,
    /// Drop names, source text and line info from the emitted bytecode.
    #[builder(default)]
    pub strip_debug_info: bool,
    #[builder(default)]
    pub generate_debug_info: bool,
    #[builder(default)]
    pub optimization: OptimizationLevel,
    /// Preprocessor macros as `(name, value)`; a `None` value defines the name empty.
    #[builder(default)]
    pub definitions: Vec<(String, Option<String>)>,
    /// Searched in order for `#include` after the including file's directory.
    #[builder(default)]
    pub include_dirs: Vec<PathBuf>,
    #[builder(default)]
    pub warnings_as_errors: bool,
}

impl ReflectOptions {
    pub fn builder() -> ReflectOptionsBuilder {
        ReflectOptionsBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default() {
        let built = ReflectOptions::builder().build().unwrap();
        assert_eq!(built, ReflectOptions::default());
        assert_eq!(built.optimization, OptimizationLevel::None);
        assert!(built.definitions.is_empty());
    }

    #[test]
    fn builder_accepts_into_values() {
        let options = ReflectOptions::builder()
            .combined_samplers_only(true)
            .include_dirs(vec![PathBuf::from("shaders/include")])
            .definitions(vec![("USE_SHADOWS".to_owned(), Some("1".to_owned()))])
            .build()
            .unwrap();
        assert!(options.combined_samplers_only);
        assert!(!options.strip_debug_info);
        assert_eq!(options.include_dirs.len(), 1);
    }
}
