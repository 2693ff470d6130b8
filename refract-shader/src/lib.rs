//! Refract shader - GLSL program reflection.
//!
//! Compiles per-stage GLSL into a linked program and derives its Vulkan resource binding
//! layout: descriptor sets, push constant ranges and vertex input locations, plus the
//! SPIR-V of every stage.

pub mod classify;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod layout;
pub mod linker;
pub mod object;
pub mod options;
pub mod reflection;
pub mod spirv;
pub mod stage;

pub use ash::vk;
pub use classify::{BindingClassifier, Classification};
pub use compiler::{CompiledStage, ShaderCompiler, GLSL_VERSION, TARGET_SPIRV_VERSION};
pub use emit::{SpirvEmitter, StageSpirv};
pub use error::{ReflectError, Result};
pub use layout::{
    AggregatedLayout, BindingEntry, DescriptorKind, LayoutAggregator, LayoutSet,
    PushConstantRange, VertexFormat, VertexInputLocation,
};
pub use linker::{link, LinkedProgram};
pub use object::{ObjectKind, OpaqueType, Qualifiers, ReflectedObject, UniformType};
pub use options::{OptimizationLevel, ReflectOptions, ReflectOptionsBuilder, ReflectOptionsBuilderError};
pub use reflection::{PassPhase, ReflectionResult};
pub use spirv::ArraySize;
pub use stage::{infer_stage, ShaderStage, ShaderStages, StageSource, DEFAULT_ENTRY_POINT};

/// Compile and reflect a program in a one-off compiler session.
pub fn reflect(sources: &[StageSource], options: ReflectOptions) -> Result<ReflectionResult> {
    let compiler = ShaderCompiler::new(options)?;
    let result = compiler.reflect(sources);
    compiler.shutdown();
    result
}
