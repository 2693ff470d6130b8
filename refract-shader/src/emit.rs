//! Final SPIR-V serialization of linked stages.

use rspirv::binary::Assemble;
use rspirv::dr::{self, Operand};
use rspirv::spirv as spv;
use refract_core::log;
use crate::compiler::{CompiledStage, TARGET_SPIRV_VERSION};
use crate::error::{ReflectError, Result};
use crate::options::ReflectOptions;
use crate::spirv;
use crate::stage::ShaderStage;

/// Emitted bytecode of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpirv {
    pub stage: ShaderStage,
    pub words: Vec<u32>,
}

impl StageSpirv {
    /// Little-endian byte view, as handed to `vkCreateShaderModule`.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpirvEmitter {
    strip_debug_info: bool,
}

impl SpirvEmitter {
    pub fn new(options: &ReflectOptions) -> Self {
        Self {
            strip_debug_info: options.strip_debug_info,
        }
    }

    #[profiling::function]
    pub fn emit(&self, stage: &CompiledStage) -> Result<StageSpirv> {
        let words = emit_words(stage.words(), self.strip_debug_info).map_err(|reason| ReflectError::Emit {
            stage: stage.stage(),
            reason,
        })?;
        log::trace!("emitted {} stage: {} words", stage.stage(), words.len());
        Ok(StageSpirv {
            stage: stage.stage(),
            words,
        })
    }
}

fn emit_words(words: &[u32], strip_debug_info: bool) -> std::result::Result<Vec<u32>, String> {
    let mut module = dr::load_words(words).map_err(|e| format!("malformed module: {e:?}"))?;
    let header = module.header.as_ref().ok_or("module has no header")?;
    if header.version != TARGET_SPIRV_VERSION {
        return Err(format!(
            "module targets SPIR-V {}, expected {}",
            spirv::version_string(header.version),
            spirv::version_string(TARGET_SPIRV_VERSION)
        ));
    }
    if header.bound == 0 {
        return Err("module id bound is zero".into());
    }

    if !strip_debug_info {
        return Ok(words.to_vec());
    }
    strip_debug_info_from(&mut module);
    Ok(module.assemble())
}

fn is_line(inst: &dr::Instruction) -> bool {
    matches!(inst.class.opcode, spv::Op::Line | spv::Op::NoLine)
}

/// Drop names, sources, line info and processing records. Semantics are untouched.
fn strip_debug_info_from(module: &mut dr::Module) {
    // Non-semantic debug info refers to OpString ids.
    let keep_strings = module.ext_inst_imports.iter().any(|inst| {
        matches!(inst.operands.first(), Some(Operand::LiteralString(set)) if set.starts_with("NonSemantic."))
    });

    module
        .debug_string_source
        .retain(|inst| keep_strings && inst.class.opcode == spv::Op::String);
    module.debug_names.clear();
    module.debug_module_processed.clear();
    module.types_global_values.retain(|inst| !is_line(inst));
    for function in &mut module.functions {
        for block in &mut function.blocks {
            block.instructions.retain(|inst| !is_line(inst));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spirv::testing::{self, VERSION_1_5};
    use crate::spirv::{ExecutionModel, SpirvModule};

    fn fragment_module(major: u8, minor: u8) -> Vec<u32> {
        let mut b = testing::builder_with_version(major, minor);
        let file = b.string("lit.frag");
        b.source(spv::SourceLanguage::GLSL, 460, Some(file), None::<String>);

        let void = b.type_void();
        let function_type = b.type_function(void, vec![]);
        let main = b
            .begin_function(void, None, spv::FunctionControl::NONE, function_type)
            .unwrap();
        b.begin_block(None).unwrap();
        b.ret().unwrap();
        b.end_function().unwrap();

        b.entry_point(ExecutionModel::Fragment, main, "main", Vec::<spv::Word>::new());
        b.name(main, "main");
        testing::assemble(b)
    }

    fn compiled(words: Vec<u32>) -> CompiledStage {
        CompiledStage::from_spirv(ShaderStage::Fragment, "lit.frag", "main", words).unwrap()
    }

    #[test]
    fn passes_module_through_unchanged() {
        let words = fragment_module(1, 5);
        let emitted = SpirvEmitter::default().emit(&compiled(words.clone())).unwrap();
        assert_eq!(emitted.stage, ShaderStage::Fragment);
        assert_eq!(emitted.words, words);
        assert_eq!(emitted.words[1], VERSION_1_5);
        assert_eq!(emitted.bytes().len(), words.len() * 4);
        assert_eq!(&emitted.bytes()[..4], &spirv::MAGIC.to_le_bytes());
    }

    #[test]
    fn strips_debug_instructions() {
        let words = fragment_module(1, 5);
        let emitter = SpirvEmitter::new(&ReflectOptions {
            strip_debug_info: true,
            ..Default::default()
        });
        let emitted = emitter.emit(&compiled(words.clone())).unwrap();
        assert!(emitted.words.len() < words.len());

        let stripped = dr::load_words(&emitted.words).unwrap();
        assert!(stripped.debug_string_source.is_empty());
        assert!(stripped.debug_names.is_empty());
        assert_eq!(stripped.functions.len(), 1);

        let module = SpirvModule::parse(&emitted.words).unwrap();
        let main = module.entry_point("main", ExecutionModel::Fragment).unwrap();
        assert_eq!(module.name(main.function), None);
    }

    #[test]
    fn rejects_other_spirv_versions() {
        let err = SpirvEmitter::default().emit(&compiled(fragment_module(1, 0))).unwrap_err();
        match err {
            ReflectError::Emit { stage, reason } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(reason.contains("1.0"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
