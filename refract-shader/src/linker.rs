//! Cross-stage linking and whole-program reflection.

use std::collections::BTreeMap;
use ash::vk;
use rspirv_reflect::{BindingCount, DescriptorInfo, Reflection};
use refract_core::collections::hashmap::HashMap;
use refract_core::collections::SmallVec;
use refract_core::log;
use crate::compiler::CompiledStage;
use crate::error::{ReflectError, Result};
use crate::object::{ObjectKind, OpaqueType, Qualifiers, ReflectedObject, UniformType};
use crate::spirv::{ArraySize, Decorations, ExecutionModel, InterfaceSlot, StorageClass, Variable};
use crate::stage::{ShaderStage, ShaderStages};

/// A linked program: its stages in pipeline order and every reflected object.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    stages: Vec<CompiledStage>,
    objects: Vec<ReflectedObject>,
    workgroup_size: Option<[u32; 3]>,
}

impl LinkedProgram {
    #[inline]
    pub fn stages(&self) -> &[CompiledStage] { &self.stages }

    #[inline]
    pub fn objects(&self) -> &[ReflectedObject] { &self.objects }

    #[inline]
    pub fn workgroup_size(&self) -> Option<[u32; 3]> { self.workgroup_size }

    pub fn stage_mask(&self) -> ShaderStages {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// First object with this name. Stages declaring different slices of it add more.
    pub fn find_object(&self, name: &str) -> Option<&ReflectedObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn find_objects<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ReflectedObject> + 'a {
        self.objects.iter().filter(move |o| o.name == name)
    }
}

/// Link compiled stages into one program and reflect its objects.
#[profiling::function]
pub fn link(mut stages: Vec<CompiledStage>) -> Result<LinkedProgram> {
    if stages.is_empty() {
        return Err(ReflectError::link("no shader stages to link"));
    }
    stages.sort_by_key(|s| s.stage);
    if let Some(pair) = stages.windows(2).find(|w| w[0].stage == w[1].stage) {
        return Err(ReflectError::link(format!(
            "`{}` and `{}` are both {} stages",
            pair[0].file, pair[1].file, pair[0].stage
        )));
    }

    let mask: ShaderStages = stages.iter().map(|s| s.stage).collect();
    check_stage_combination(mask)?;
    for stage in &stages {
        check_entry_point(stage)?;
    }
    for pair in stages.windows(2) {
        check_interface(&pair[0], &pair[1])?;
    }

    let mut table = ObjectTable::default();
    for stage in &stages {
        reflect_stage(stage, &mut table)?;
    }

    let workgroup_size = stages
        .iter()
        .find(|s| s.stage == ShaderStage::Compute)
        .and_then(|s| {
            let ep = s.module.entry_point(&s.entry_point, ExecutionModel::GLCompute)?;
            s.module.local_size(ep)
        });

    log::trace!("linked {} program with {} objects", mask, table.objects.len());
    Ok(LinkedProgram {
        stages,
        objects: table.objects,
        workgroup_size,
    })
}

fn execution_model_of(stage: ShaderStage) -> ExecutionModel {
    match stage {
        ShaderStage::Vertex => ExecutionModel::Vertex,
        ShaderStage::TessControl => ExecutionModel::TessellationControl,
        ShaderStage::TessEvaluation => ExecutionModel::TessellationEvaluation,
        ShaderStage::Geometry => ExecutionModel::Geometry,
        ShaderStage::Fragment => ExecutionModel::Fragment,
        ShaderStage::Compute => ExecutionModel::GLCompute,
    }
}

fn check_stage_combination(mask: ShaderStages) -> Result<()> {
    if mask.contains(ShaderStage::Compute) {
        if mask.len() > 1 {
            return Err(ReflectError::link(format!("compute cannot be linked with graphics stages ({mask})")));
        }
        return Ok(());
    }
    if mask.contains(ShaderStage::TessControl) != mask.contains(ShaderStage::TessEvaluation) {
        return Err(ReflectError::link("tessellation control and evaluation stages must be linked together"));
    }
    Ok(())
}

fn check_entry_point(stage: &CompiledStage) -> Result<()> {
    if stage.module.entry_point(&stage.entry_point, execution_model_of(stage.stage)).is_none() {
        return Err(ReflectError::link(format!(
            "{} shader `{}` has no entry point `{}`",
            stage.stage, stage.file, stage.entry_point
        )));
    }
    Ok(())
}

/// A user-defined interface variable of one stage.
struct InterfaceVariable<'a> {
    name: &'a str,
    slot: InterfaceSlot,
}

fn interface_variables(stage: &CompiledStage, storage: StorageClass) -> Vec<InterfaceVariable<'_>> {
    let per_vertex = match storage {
        StorageClass::Input => matches!(
            stage.stage,
            ShaderStage::TessControl | ShaderStage::TessEvaluation | ShaderStage::Geometry
        ),
        _ => stage.stage == ShaderStage::TessControl,
    };

    let module = &stage.module;
    let mut out = Vec::new();
    for var in module.variables().iter().filter(|v| v.storage_class == storage) {
        if module.decorations(var.id).is_some_and(|d| d.patch) {
            continue;
        }
        let name = module.name(var.id).unwrap_or("<unnamed>");
        out.extend(
            module
                .interface_slots(var, per_vertex)
                .into_iter()
                .map(|slot| InterfaceVariable { name, slot }),
        );
    }
    out
}

/// Every input of `consumer` must be written by `producer` with the same shape.
fn check_interface(producer: &CompiledStage, consumer: &CompiledStage) -> Result<()> {
    if !producer.stage.is_graphics() || !consumer.stage.is_graphics() {
        return Ok(());
    }

    let outputs = interface_variables(producer, StorageClass::Output);
    for input in interface_variables(consumer, StorageClass::Input) {
        let written = outputs
            .iter()
            .find(|o| o.slot.location == input.slot.location && o.slot.component == input.slot.component);
        let Some(output) = written else {
            return Err(ReflectError::link(format!(
                "{} input `{}` at location {} component {} is not written by the {} stage",
                consumer.stage, input.name, input.slot.location, input.slot.component, producer.stage
            )));
        };
        if let (Some(written), Some(read)) = (output.slot.format, input.slot.format) {
            if written != read {
                return Err(ReflectError::link(format!(
                    "location {}: {} output `{}` is {:?} but {} input `{}` is {:?}",
                    input.slot.location, producer.stage, output.name, written, consumer.stage, input.name, read
                )));
            }
        }
    }
    Ok(())
}

/// Objects keyed by name, in first-appearance order.
///
/// Identical declarations of a name merge into one object. A name keeps several objects when
/// stages declare different slices of it (array lengths, push constant ranges).
#[derive(Default)]
struct ObjectTable {
    objects: Vec<ReflectedObject>,
    index: HashMap<String, SmallVec<[usize; 2]>>,
}

impl ObjectTable {
    fn merge(&mut self, object: ReflectedObject) -> Result<()> {
        let slices = self.index.entry(object.name.clone()).or_default();
        for &i in slices.iter() {
            let existing = &mut self.objects[i];
            if existing.kind.conflicts_with(&object.kind) {
                return Err(ReflectError::link(format!(
                    "`{}` is a {} in the {} stages but a {} in the {} stages",
                    object.name,
                    existing.kind.describe(),
                    existing.stages,
                    object.kind.describe(),
                    object.stages
                )));
            }
            if existing.qualifiers != object.qualifiers {
                return Err(ReflectError::link(format!(
                    "`{}` has layout {:?} in the {} stages but {:?} in the {} stages",
                    object.name, existing.qualifiers, existing.stages, object.qualifiers, object.stages
                )));
            }
            if existing.kind == object.kind && existing.array == object.array {
                existing.stages |= object.stages;
                return Ok(());
            }
        }

        log::trace!("`{}` gets a new {} slice in the {} stages", object.name, object.kind.describe(), object.stages);
        slices.push(self.objects.len());
        self.objects.push(object);
        Ok(())
    }
}

/// `rspirv-reflect`'s reading of one stage: push constant ranges and descriptor bindings.
struct StageReflection<'a> {
    stage: &'a CompiledStage,
    reflection: Reflection,
    descriptor_sets: Option<BTreeMap<u32, BTreeMap<u32, DescriptorInfo>>>,
}

impl<'a> StageReflection<'a> {
    fn new(stage: &'a CompiledStage) -> Result<Self> {
        let reflection = Reflection::new_from_spirv(bytemuck::cast_slice(&stage.words))
            .map_err(|e| reflection_failure(stage, e))?;
        // Only modules with explicit coordinates on every descriptor reflect here.
        let descriptor_sets = match reflection.get_descriptor_sets() {
            Ok(sets) => Some(sets),
            Err(e) => {
                log::debug!("{} shader `{}`: descriptor sets not cross-checked: {:?}", stage.stage, stage.file, e);
                None
            }
        };
        Ok(Self { stage, reflection, descriptor_sets })
    }

    fn push_constant_range(&self) -> Result<(u32, u32)> {
        let range = self
            .reflection
            .get_push_constant_range()
            .map_err(|e| reflection_failure(self.stage, e))?;
        Ok(range.map(|info| (info.offset, info.size)).unwrap_or_default())
    }

    /// The descriptor type and count decoded from the type graph must agree with `rspirv-reflect`.
    fn check_descriptor(&self, object: &ReflectedObject) -> Result<()> {
        let (Some(sets), Some(kind)) = (&self.descriptor_sets, object.kind.descriptor_kind()) else {
            return Ok(());
        };
        let (Some(set), Some(binding)) = (object.qualifiers.set, object.qualifiers.binding) else {
            return Ok(());
        };
        let Some(info) = sets.get(&set).and_then(|bindings| bindings.get(&binding)) else {
            return Ok(());
        };

        let reflected_type = vk::DescriptorType::from_raw(info.ty.0 as i32);
        let reflected_array = match info.binding_count {
            BindingCount::One => ArraySize::Single,
            BindingCount::StaticSized(n) => ArraySize::Fixed(n as u32),
            BindingCount::Unbounded => ArraySize::Runtime,
        };
        if reflected_type != kind.to_vk() || reflected_array != object.array {
            return Err(ReflectError::link(format!(
                "{} shader `{}`: `{}` at set {} binding {} is {} {:?}, but reflects as {:?} {:?}",
                self.stage.stage, self.stage.file, object.name, set, binding, kind, object.array, reflected_type, reflected_array
            )));
        }
        Ok(())
    }
}

fn reflect_stage(stage: &CompiledStage, table: &mut ObjectTable) -> Result<()> {
    let reflection = StageReflection::new(stage)?;
    for var in stage.module.variables() {
        let kind = match var.storage_class {
            StorageClass::UniformConstant | StorageClass::Uniform | StorageClass::StorageBuffer => None,
            StorageClass::PushConstant => {
                let (offset, size) = reflection.push_constant_range()?;
                Some(ObjectKind::PushConstantBlock { offset, size })
            }
            StorageClass::Input if stage.stage == ShaderStage::Vertex => {
                let slots = stage.module.interface_slots(var, false);
                if slots.is_empty() {
                    continue;
                }
                Some(ObjectKind::PipeInput { slots })
            }
            _ => continue,
        };
        if let Some(object) = reflect_variable(stage, var, kind) {
            reflection.check_descriptor(&object)?;
            table.merge(object)?;
        }
    }
    Ok(())
}

fn reflect_variable(stage: &CompiledStage, var: &Variable, kind: Option<ObjectKind>) -> Option<ReflectedObject> {
    let module = &stage.module;
    let (base, array) = module.unwrap_arrays(module.pointee(var)?);
    let decos = module.decorations(var.id).cloned().unwrap_or_default();
    let base_decos = module.decorations(base).cloned().unwrap_or_default();

    let kind = match kind {
        Some(kind) => kind,
        None => match var.storage_class {
            StorageClass::UniformConstant => match OpaqueType::of(module, base) {
                Some(opaque) => ObjectKind::UniformVariable(UniformType::Opaque(opaque)),
                None => ObjectKind::UniformVariable(UniformType::Plain),
            },
            StorageClass::StorageBuffer => ObjectKind::BufferBlock,
            _ if base_decos.buffer_block => ObjectKind::BufferBlock,
            _ => ObjectKind::UniformBlock,
        },
    };

    // Blocks are known by their type name, everything else by the variable name.
    let name = match kind {
        ObjectKind::UniformBlock | ObjectKind::BufferBlock | ObjectKind::PushConstantBlock { .. } => {
            module.name(base).or_else(|| module.name(var.id))
        }
        _ => module.name(var.id),
    };
    let name = name
        .map(str::to_owned)
        .unwrap_or_else(|| anonymous_name(&kind, &decos));

    let array = match kind {
        ObjectKind::PipeInput { .. } => ArraySize::Single,
        _ => array,
    };

    Some(ReflectedObject {
        name,
        kind,
        qualifiers: Qualifiers {
            set: decos.set,
            binding: decos.binding,
            location: decos.location,
            input_attachment_index: decos.input_attachment_index,
        },
        array,
        stages: ShaderStages::from(stage.stage),
    })
}

/// Name of an object whose debug names were stripped. Built from what every stage agrees on,
/// so the same resource still merges across stages.
fn anonymous_name(kind: &ObjectKind, decos: &Decorations) -> String {
    match kind {
        ObjectKind::PushConstantBlock { .. } => "push_constants".to_owned(),
        ObjectKind::PipeInput { slots } => format!("location_{}", slots.first().map_or(0, |s| s.location)),
        _ => format!("set{}_binding{}", decos.set.unwrap_or(0), decos.binding.unwrap_or(0)),
    }
}

fn reflection_failure(stage: &CompiledStage, error: impl std::fmt::Debug) -> ReflectError {
    ReflectError::link(format!(
        "{} shader `{}`: reflection failed: {:?}",
        stage.stage, stage.file, error
    ))
}
