//! GLSL to SPIR-V compilation through shaderc.

use std::path::{Path, PathBuf};
use std::time::Instant;
use shaderc::{IncludeType, ResolvedInclude};
use refract_core::collections::SmallVec;
use refract_core::log;
use crate::error::{ReflectError, Result};
use crate::options::ReflectOptions;
use crate::spirv::{self, SpirvModule};
use crate::stage::{ShaderStage, StageSource};

/// Every source is compiled as GLSL 460, core profile.
pub const GLSL_VERSION: u32 = 460;
/// SPIR-V version word every emitted module carries (1.5).
pub const TARGET_SPIRV_VERSION: u32 = 0x0001_0500;

const MAX_INCLUDE_DEPTH: usize = 32;

/// One compiled stage: SPIR-V words plus the parsed module view.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub(crate) stage: ShaderStage,
    pub(crate) file: String,
    pub(crate) entry_point: String,
    pub(crate) words: Vec<u32>,
    pub(crate) module: SpirvModule,
}

impl CompiledStage {
    /// Wrap precompiled SPIR-V words.
    pub fn from_spirv(
        stage: ShaderStage,
        file: impl Into<String>,
        entry_point: impl Into<String>,
        words: Vec<u32>,
    ) -> Result<Self> {
        let file = file.into();
        let module = SpirvModule::parse(&words).map_err(|e| ReflectError::Compile {
            stage,
            file: file.clone(),
            diagnostic: format!("invalid SPIR-V: {e}"),
        })?;

        Ok(Self {
            stage,
            file,
            entry_point: entry_point.into(),
            words,
            module,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage { self.stage }

    #[inline]
    pub fn file_name(&self) -> &str { &self.file }

    #[inline]
    pub fn entry_point(&self) -> &str { &self.entry_point }

    #[inline]
    pub fn words(&self) -> &[u32] { &self.words }

    #[inline]
    pub fn module(&self) -> &SpirvModule { &self.module }
}

/// A compiler session. Owns the shaderc instance for its whole lifetime.
///
/// Calls take `&self` but the session is not `Sync`; give each thread its own session.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    compile_options: shaderc::CompileOptions<'static>,
    options: ReflectOptions,
}

impl ShaderCompiler {
    pub fn new(options: ReflectOptions) -> Result<Self> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| ReflectError::CompilerUnavailable("failed to create a shaderc compiler".into()))?;
        let compile_options = build_compile_options(&options)?;

        log::debug!(
            "shader compiler session started: GLSL {}, Vulkan 1.2, SPIR-V {}",
            GLSL_VERSION,
            spirv::version_string(TARGET_SPIRV_VERSION)
        );

        Ok(Self {
            compiler,
            compile_options,
            options,
        })
    }

    #[inline]
    pub fn options(&self) -> &ReflectOptions { &self.options }

    /// End the session and release the toolchain.
    pub fn shutdown(self) {
        drop(self);
    }

    /// Compile one stage.
    #[profiling::function]
    pub fn compile_stage(&self, source: &StageSource) -> Result<CompiledStage> {
        let stage = source.stage();
        let file = source.file_name();
        if source.source().trim().is_empty() {
            return Err(ReflectError::Compile {
                stage,
                file: file.to_owned(),
                diagnostic: "source is empty".into(),
            });
        }

        let start = Instant::now();
        let artifact = self
            .compiler
            .compile_into_spirv(
                source.source(),
                shader_kind(stage),
                file,
                source.entry_point(),
                Some(&self.compile_options),
            )
            .map_err(|e| ReflectError::Compile {
                stage,
                file: file.to_owned(),
                diagnostic: diagnostic_text(e),
            })?;

        if artifact.get_num_warnings() > 0 {
            log::warn!("{} shader `{}`: {}", stage, file, artifact.get_warning_messages().trim_end());
        }

        let words = artifact.as_binary().to_vec();
        log::trace!("compiled {} shader `{}` into {} words in {:.2?}", stage, file, words.len(), start.elapsed());
        CompiledStage::from_spirv(stage, file, source.entry_point(), words)
    }

    /// Compile every source. All sources are checked for duplicate stages before anything compiles.
    pub fn compile_all(&self, sources: &[StageSource]) -> Result<Vec<CompiledStage>> {
        check_unique_stages(sources)?;
        sources.iter().map(|source| self.compile_stage(source)).collect()
    }
}

impl Drop for ShaderCompiler {
    fn drop(&mut self) {
        log::debug!("shader compiler session closed");
    }
}

/// Reject a request that names the same stage twice.
pub fn check_unique_stages(sources: &[StageSource]) -> Result<()> {
    let mut seen: SmallVec<[&StageSource; 6]> = SmallVec::new();
    for source in sources {
        if let Some(previous) = seen.iter().find(|s| s.stage() == source.stage()) {
            return Err(ReflectError::DuplicateStage {
                stage: source.stage(),
                file: source.file_name().to_owned(),
                previous: previous.file_name().to_owned(),
            });
        }
        seen.push(source);
    }
    Ok(())
}

fn build_compile_options(options: &ReflectOptions) -> Result<shaderc::CompileOptions<'static>> {
    let mut compile_options = shaderc::CompileOptions::new()
        .ok_or_else(|| ReflectError::CompilerUnavailable("failed to create shaderc compile options".into()))?;

    compile_options.set_source_language(shaderc::SourceLanguage::GLSL);
    compile_options.set_forced_version_profile(GLSL_VERSION, shaderc::GlslProfile::Core);
    compile_options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
    compile_options.set_target_spirv(shaderc::SpirvVersion::V1_5);
    compile_options.set_optimization_level(options.optimization.to_shaderc());
    if options.generate_debug_info {
        compile_options.set_generate_debug_info();
    }
    if options.warnings_as_errors {
        compile_options.set_warnings_as_errors();
    }
    for (name, value) in &options.definitions {
        compile_options.add_macro_definition(name, value.as_deref());
    }

    let include_dirs = options.include_dirs.clone();
    compile_options.set_include_callback(move |requested, include_type, requesting, depth| {
        resolve_include(&include_dirs, requested, include_type, requesting, depth)
    });

    Ok(compile_options)
}

fn resolve_include(
    include_dirs: &[PathBuf],
    requested: &str,
    include_type: IncludeType,
    requesting: &str,
    depth: usize,
) -> std::result::Result<ResolvedInclude, String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!("`{requested}` exceeds the include depth limit of {MAX_INCLUDE_DEPTH}"));
    }

    let mut candidates = Vec::with_capacity(include_dirs.len() + 1);
    if matches!(include_type, IncludeType::Relative) {
        if let Some(parent) = Path::new(requesting).parent() {
            candidates.push(parent.join(requested));
        }
    }
    candidates.extend(include_dirs.iter().map(|dir| dir.join(requested)));

    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(&path) {
            log::trace!("resolved include `{}` from `{}` to {}", requested, requesting, path.display());
            return Ok(ResolvedInclude {
                resolved_name: path.to_string_lossy().into_owned(),
                content,
            });
        }
    }
    Err(format!("cannot find `{requested}` included from `{requesting}`"))
}

fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
    match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::TessControl => shaderc::ShaderKind::TessControl,
        ShaderStage::TessEvaluation => shaderc::ShaderKind::TessEvaluation,
        ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    }
}

fn diagnostic_text(error: shaderc::Error) -> String {
    match error {
        shaderc::Error::CompilationError(_, message) => message.trim_end().to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_stage_names_both_files() {
        let sources = [
            StageSource::from_named("a.frag", "void main() {}").unwrap(),
            StageSource::from_named("mesh.vert", "void main() {}").unwrap(),
            StageSource::from_named("b.frag", "void main() {}").unwrap(),
        ];
        let err = check_unique_stages(&sources).unwrap_err();
        match err {
            ReflectError::DuplicateStage { stage, file, previous } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert_eq!(file, "b.frag");
                assert_eq!(previous, "a.frag");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check_unique_stages(&sources[..2]).is_ok());
    }

    #[test]
    fn includes_resolve_relative_then_search_dirs() {
        let root = std::env::temp_dir().join(format!("refract-include-{}", std::process::id()));
        let local = root.join("local");
        let shared = root.join("shared");
        std::fs::create_dir_all(&local).unwrap();
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(local.join("common.glsl"), "// local").unwrap();
        std::fs::write(shared.join("common.glsl"), "// shared").unwrap();
        std::fs::write(shared.join("lights.glsl"), "// lights").unwrap();

        let requesting = local.join("lit.frag").to_string_lossy().into_owned();
        let dirs = vec![shared.clone()];

        let hit = resolve_include(&dirs, "common.glsl", IncludeType::Relative, &requesting, 1).unwrap();
        assert_eq!(hit.content, "// local");
        let hit = resolve_include(&dirs, "common.glsl", IncludeType::Standard, &requesting, 1).unwrap();
        assert_eq!(hit.content, "// shared");
        let hit = resolve_include(&dirs, "lights.glsl", IncludeType::Relative, &requesting, 1).unwrap();
        assert_eq!(hit.content, "// lights");

        assert!(resolve_include(&dirs, "missing.glsl", IncludeType::Relative, &requesting, 1).is_err());
        assert!(resolve_include(&dirs, "common.glsl", IncludeType::Relative, &requesting, MAX_INCLUDE_DEPTH + 1).is_err());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn precompiled_words_are_parsed() {
        let err = CompiledStage::from_spirv(ShaderStage::Vertex, "broken.spv", "main", vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, ReflectError::Compile { stage: ShaderStage::Vertex, .. }));
    }
}
