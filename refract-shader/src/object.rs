//! Objects discovered by whole-program reflection.

use crate::layout::DescriptorKind;
use crate::spirv::{ArraySize, Dim, Id, InterfaceSlot, SpirvModule, SpirvType};
use crate::stage::ShaderStages;

/// Opaque (handle) uniform types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpaqueType {
    /// `sampler2D` and friends.
    CombinedImageSampler,
    /// `texture2D`, an image without a sampler.
    SampledImage,
    /// `sampler` / `samplerShadow`.
    Sampler,
    /// `subpassInput`.
    SubpassInput,
    /// `image2D`, readable and writable.
    StorageImage,
    /// `samplerBuffer` / `textureBuffer`.
    UniformTexelBuffer,
    /// `imageBuffer`.
    StorageTexelBuffer,
    /// `accelerationStructureEXT`.
    AccelerationStructure,
}

impl OpaqueType {
    /// Opaque type of a SPIR-V type, `None` for non-opaque types.
    pub fn of(module: &SpirvModule, ty: Id) -> Option<Self> {
        match module.ty(ty)? {
            SpirvType::SampledImage { image } => match module.ty(*image)? {
                SpirvType::Image { dim: Dim::DimBuffer, .. } => Some(OpaqueType::UniformTexelBuffer),
                _ => Some(OpaqueType::CombinedImageSampler),
            },
            SpirvType::Image { dim: image_dim, sampled, .. } => Some(match (*image_dim, *sampled) {
                (Dim::DimSubpassData, _) => OpaqueType::SubpassInput,
                (Dim::DimBuffer, 2) => OpaqueType::StorageTexelBuffer,
                (Dim::DimBuffer, _) => OpaqueType::UniformTexelBuffer,
                (_, 2) => OpaqueType::StorageImage,
                _ => OpaqueType::SampledImage,
            }),
            SpirvType::Sampler => Some(OpaqueType::Sampler),
            SpirvType::AccelerationStructure => Some(OpaqueType::AccelerationStructure),
            _ => None,
        }
    }

    /// Descriptor type of the handle, `None` for acceleration structures.
    pub fn descriptor_kind(self) -> Option<DescriptorKind> {
        Some(match self {
            OpaqueType::CombinedImageSampler => DescriptorKind::CombinedImageSampler,
            OpaqueType::SampledImage => DescriptorKind::SampledImage,
            OpaqueType::Sampler => DescriptorKind::Sampler,
            OpaqueType::SubpassInput => DescriptorKind::InputAttachment,
            OpaqueType::StorageImage => DescriptorKind::StorageImage,
            OpaqueType::UniformTexelBuffer => DescriptorKind::UniformTexelBuffer,
            OpaqueType::StorageTexelBuffer => DescriptorKind::StorageTexelBuffer,
            OpaqueType::AccelerationStructure => return None,
        })
    }
}

/// Type of a uniform declared outside a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Opaque(OpaqueType),
    /// A non-opaque value (`uniform float x;`), only legal outside Vulkan GLSL.
    Plain,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    UniformVariable(UniformType),
    UniformBlock,
    BufferBlock,
    PushConstantBlock { offset: u32, size: u32 },
    /// Vertex stage input, one slot per occupied location.
    PipeInput { slots: Vec<InterfaceSlot> },
}

impl ObjectKind {
    pub fn is_sampler(&self) -> bool {
        matches!(self, ObjectKind::UniformVariable(UniformType::Opaque(_)))
    }

    pub fn is_block(&self) -> bool {
        matches!(
            self,
            ObjectKind::UniformBlock | ObjectKind::BufferBlock | ObjectKind::PushConstantBlock { .. }
        )
    }

    /// Descriptor type the object binds as, `None` for non-descriptor objects.
    pub fn descriptor_kind(&self) -> Option<DescriptorKind> {
        match self {
            ObjectKind::UniformVariable(UniformType::Opaque(opaque)) => opaque.descriptor_kind(),
            ObjectKind::UniformBlock => Some(DescriptorKind::UniformBuffer),
            ObjectKind::BufferBlock => Some(DescriptorKind::StorageBuffer),
            _ => None,
        }
    }

    /// Whether two declarations of one name disagree on what the object is.
    ///
    /// Array lengths and push constant ranges are not part of this: stages may declare
    /// different slices of the same object.
    pub fn conflicts_with(&self, other: &ObjectKind) -> bool {
        match (self, other) {
            (ObjectKind::UniformVariable(a), ObjectKind::UniformVariable(b)) => a != b,
            (ObjectKind::UniformBlock, ObjectKind::UniformBlock)
            | (ObjectKind::BufferBlock, ObjectKind::BufferBlock)
            | (ObjectKind::PushConstantBlock { .. }, ObjectKind::PushConstantBlock { .. })
            | (ObjectKind::PipeInput { .. }, ObjectKind::PipeInput { .. }) => false,
            _ => true,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ObjectKind::UniformVariable(UniformType::Opaque(_)) => "opaque uniform",
            ObjectKind::UniformVariable(UniformType::Plain) => "plain uniform",
            ObjectKind::UniformBlock => "uniform block",
            ObjectKind::BufferBlock => "buffer block",
            ObjectKind::PushConstantBlock { .. } => "push constant block",
            ObjectKind::PipeInput { .. } => "vertex input",
        }
    }
}

/// Layout qualifiers of an object. Each `Some` is an explicit qualifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Qualifiers {
    pub set: Option<u32>,
    pub binding: Option<u32>,
    pub location: Option<u32>,
    pub input_attachment_index: Option<u32>,
}

/// A named resource of a linked program, with the stages that declare it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedObject {
    pub name: String,
    pub kind: ObjectKind,
    pub qualifiers: Qualifiers,
    pub array: ArraySize,
    pub stages: ShaderStages,
}
