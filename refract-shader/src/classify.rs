//! Reflected object to descriptor kind and binding coordinate.

use crate::error::{ReflectError, Result};
use crate::layout::{BindingEntry, DescriptorKind, PushConstantRange, VertexInputLocation};
use crate::object::{ObjectKind, OpaqueType, ReflectedObject, UniformType};
use crate::options::ReflectOptions;
use crate::spirv::InterfaceSlot;

/// Where a reflected object lands in the pipeline layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Descriptor(BindingEntry),
    PushConstant(PushConstantRange),
    VertexInput(Vec<VertexInputLocation>),
    /// Not binding-relevant.
    Skipped,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BindingClassifier {
    combined_samplers_only: bool,
}

impl BindingClassifier {
    pub fn new(options: &ReflectOptions) -> Self {
        Self {
            combined_samplers_only: options.combined_samplers_only,
        }
    }

    /// Classify one object. Depends on nothing but the object and the options.
    pub fn classify(&self, object: &ReflectedObject) -> Result<Classification> {
        let kind = match &object.kind {
            ObjectKind::UniformVariable(UniformType::Plain) => return Ok(Classification::Skipped),
            ObjectKind::UniformVariable(UniformType::Opaque(opaque)) => self.opaque_kind(object, *opaque)?,
            ObjectKind::UniformBlock => DescriptorKind::UniformBuffer,
            ObjectKind::BufferBlock => DescriptorKind::StorageBuffer,
            ObjectKind::PushConstantBlock { offset, size } => {
                return Ok(Classification::PushConstant(PushConstantRange {
                    stages: object.stages,
                    size: *size,
                    offset: *offset,
                }));
            }
            ObjectKind::PipeInput { slots } => return vertex_inputs(object, slots),
        };

        let count = object
            .array
            .count()
            .ok_or_else(|| ReflectError::unsupported(&object.name, "runtime-sized descriptor arrays are not supported"))?;

        Ok(Classification::Descriptor(BindingEntry {
            set: object.qualifiers.set.unwrap_or(0),
            binding: object.qualifiers.binding.unwrap_or(0),
            kind,
            count,
            stages: object.stages,
            name: object.name.clone(),
        }))
    }

    fn opaque_kind(&self, object: &ReflectedObject, opaque: OpaqueType) -> Result<DescriptorKind> {
        if self.combined_samplers_only && matches!(opaque, OpaqueType::SampledImage | OpaqueType::Sampler) {
            return Err(ReflectError::unsupported(
                &object.name,
                "separate samplers and textures are disabled, use a combined sampler",
            ));
        }
        opaque
            .descriptor_kind()
            .ok_or_else(|| ReflectError::unsupported(&object.name, "acceleration structures are not supported"))
    }
}

fn vertex_inputs(object: &ReflectedObject, slots: &[InterfaceSlot]) -> Result<Classification> {
    slots
        .iter()
        .map(|slot| {
            let format = slot.format.ok_or_else(|| {
                ReflectError::unsupported(
                    &object.name,
                    format!("location {} has no 32-bit vertex format", slot.location),
                )
            })?;
            Ok(VertexInputLocation {
                location: slot.location,
                format,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Classification::VertexInput)
}
