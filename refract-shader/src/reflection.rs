//! The reflection pass and its immutable result.

use std::time::Instant;
use ash::vk;
use derive_more::Display;
use refract_core::log;
use crate::classify::BindingClassifier;
use crate::compiler::ShaderCompiler;
use crate::emit::{SpirvEmitter, StageSpirv};
use crate::error::Result;
use crate::layout::{LayoutAggregator, LayoutSet, PushConstantRange, VertexInputLocation};
use crate::linker::{link, LinkedProgram};
use crate::options::ReflectOptions;
use crate::stage::{ShaderStage, ShaderStages, StageSource};

/// Phases of one reflection pass, in order.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassPhase {
    #[display("idle")]
    Idle,
    #[display("compiling")]
    Compiling,
    #[display("linking")]
    Linking,
    #[display("classifying")]
    Classifying,
    #[display("validating")]
    Validating,
    #[display("emitting")]
    Emitting,
    #[display("done")]
    Done,
}

struct Pass {
    phase: PassPhase,
}

impl Pass {
    fn new() -> Self {
        Self { phase: PassPhase::Idle }
    }

    fn enter(&mut self, phase: PassPhase) {
        log::debug!("reflection pass: {} -> {}", self.phase, phase);
        self.phase = phase;
    }
}

/// Derived binding layout and bytecode of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionResult {
    layout_sets: Vec<LayoutSet>,
    push_constants: Vec<PushConstantRange>,
    vertex_inputs: Vec<VertexInputLocation>,
    bytecode: Vec<StageSpirv>,
    workgroup_size: Option<[u32; 3]>,
}

impl ReflectionResult {
    /// Classify, aggregate and emit an already linked program.
    #[profiling::function]
    pub fn from_program(program: &LinkedProgram, options: &ReflectOptions) -> Result<Self> {
        let mut pass = Pass::new();
        pass.enter(PassPhase::Linking);
        derive(&mut pass, program, options)
    }

    /// Descriptor sets ordered by set number, bindings ordered by binding number.
    #[inline]
    pub fn layout_sets(&self) -> &[LayoutSet] { &self.layout_sets }

    #[inline]
    pub fn push_constants(&self) -> &[PushConstantRange] { &self.push_constants }

    /// Vertex input locations, ascending and free of duplicates.
    #[inline]
    pub fn vertex_inputs(&self) -> &[VertexInputLocation] { &self.vertex_inputs }

    #[inline]
    pub fn workgroup_size(&self) -> Option<[u32; 3]> { self.workgroup_size }

    /// Every stage of the program.
    pub fn stages(&self) -> ShaderStages {
        self.bytecode.iter().map(|b| b.stage).collect()
    }

    pub fn layout_set(&self, set: u32) -> Option<&LayoutSet> {
        self.layout_sets.iter().find(|s| s.set == set)
    }

    /// SPIR-V of one stage as bytes. Empty if the program has no such stage.
    pub fn stage_bytecode(&self, stage: ShaderStage) -> &[u8] {
        self.stage_spirv(stage).map(StageSpirv::bytes).unwrap_or_default()
    }

    /// SPIR-V of one stage as words. Empty if the program has no such stage.
    pub fn stage_words(&self, stage: ShaderStage) -> &[u32] {
        self.stage_spirv(stage).map(|b| b.words.as_slice()).unwrap_or_default()
    }

    pub fn stage_spirv(&self, stage: ShaderStage) -> Option<&StageSpirv> {
        self.bytecode.iter().find(|b| b.stage == stage)
    }

    /// Bindings of one set, ready for `vk::DescriptorSetLayoutCreateInfo`. Empty for unknown sets.
    pub fn descriptor_set_layout_bindings(&self, set: u32) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.layout_set(set).map(LayoutSet::to_vk).unwrap_or_default()
    }

    pub fn vk_push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants.iter().map(PushConstantRange::to_vk).collect()
    }
}

impl ShaderCompiler {
    /// Run a full reflection pass over one program's stage sources.
    ///
    /// Either the whole result is produced or nothing is; there is no partial output.
    #[profiling::function]
    pub fn reflect(&self, sources: &[StageSource]) -> Result<ReflectionResult> {
        let start = Instant::now();
        let mut pass = Pass::new();
        let result = self.run_pass(&mut pass, sources);

        match &result {
            Ok(result) => log::info!(
                "reflected {} program: {} sets, {} push constant ranges, {} vertex inputs in {:.2?}",
                result.stages(),
                result.layout_sets.len(),
                result.push_constants.len(),
                result.vertex_inputs.len(),
                start.elapsed()
            ),
            Err(err) => log::debug!("reflection pass failed while {}: {}", pass.phase, err),
        }
        result
    }

    fn run_pass(&self, pass: &mut Pass, sources: &[StageSource]) -> Result<ReflectionResult> {
        pass.enter(PassPhase::Compiling);
        let compiled = self.compile_all(sources)?;

        pass.enter(PassPhase::Linking);
        let program = link(compiled)?;

        derive(pass, &program, self.options())
    }
}

fn derive(pass: &mut Pass, program: &LinkedProgram, options: &ReflectOptions) -> Result<ReflectionResult> {
    pass.enter(PassPhase::Classifying);
    let classifier = BindingClassifier::new(options);
    let mut aggregator = LayoutAggregator::new();
    for object in program.objects() {
        aggregator.add(classifier.classify(object)?)?;
    }

    pass.enter(PassPhase::Validating);
    let layout = aggregator.finish()?;
    for set in &layout.sets {
        for binding in &set.bindings {
            log::trace!(
                "set {} binding {}: {} x{} `{}` ({})",
                set.set, binding.binding, binding.kind, binding.count, binding.name, binding.stages
            );
        }
    }

    pass.enter(PassPhase::Emitting);
    let emitter = SpirvEmitter::new(options);
    let bytecode = program
        .stages()
        .iter()
        .map(|stage| emitter.emit(stage))
        .collect::<Result<Vec<_>>>()?;

    pass.enter(PassPhase::Done);
    Ok(ReflectionResult {
        layout_sets: layout.sets,
        push_constants: layout.push_constants,
        vertex_inputs: layout.vertex_inputs,
        bytecode,
        workgroup_size: program.workgroup_size(),
    })
}
