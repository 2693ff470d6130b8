//! Descriptor layout data model and the aggregation of classified bindings into it.

use ash::vk;
use derive_more::Display;
use refract_core::log;
use crate::classify::Classification;
use crate::error::{ReflectError, Result};
use crate::stage::ShaderStages;

/// Vulkan descriptor type of a binding.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    #[display("sampler")]
    Sampler,
    #[display("combined image sampler")]
    CombinedImageSampler,
    #[display("sampled image")]
    SampledImage,
    #[display("storage image")]
    StorageImage,
    #[display("uniform texel buffer")]
    UniformTexelBuffer,
    #[display("storage texel buffer")]
    StorageTexelBuffer,
    #[display("uniform buffer")]
    UniformBuffer,
    #[display("storage buffer")]
    StorageBuffer,
    #[display("input attachment")]
    InputAttachment,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            DescriptorKind::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }
}

/// 32-bit component shape of one vertex input location.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    #[display("float")]
    Float,
    #[display("vec2")]
    Float2,
    #[display("vec3")]
    Float3,
    #[display("vec4")]
    Float4,
    #[display("int")]
    Int,
    #[display("ivec2")]
    Int2,
    #[display("ivec3")]
    Int3,
    #[display("ivec4")]
    Int4,
    #[display("uint")]
    UInt,
    #[display("uvec2")]
    UInt2,
    #[display("uvec3")]
    UInt3,
    #[display("uvec4")]
    UInt4,
}

impl VertexFormat {
    /// Widen a scalar format to `count` components.
    pub fn with_components(self, count: u32) -> Option<Self> {
        use VertexFormat::*;
        let family = match self {
            Float | Float2 | Float3 | Float4 => [Float, Float2, Float3, Float4],
            Int | Int2 | Int3 | Int4 => [Int, Int2, Int3, Int4],
            UInt | UInt2 | UInt3 | UInt4 => [UInt, UInt2, UInt3, UInt4],
        };
        family.get((count as usize).checked_sub(1)?).copied()
    }

    pub fn components(self) -> u32 {
        use VertexFormat::*;
        match self {
            Float | Int | UInt => 1,
            Float2 | Int2 | UInt2 => 2,
            Float3 | Int3 | UInt3 => 3,
            Float4 | Int4 | UInt4 => 4,
        }
    }

    /// Size of one attribute in bytes.
    pub fn size(self) -> u32 {
        self.components() * 4
    }

    pub fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::Float => vk::Format::R32_SFLOAT,
            VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Int => vk::Format::R32_SINT,
            VertexFormat::Int2 => vk::Format::R32G32_SINT,
            VertexFormat::Int3 => vk::Format::R32G32B32_SINT,
            VertexFormat::Int4 => vk::Format::R32G32B32A32_SINT,
            VertexFormat::UInt => vk::Format::R32_UINT,
            VertexFormat::UInt2 => vk::Format::R32G32_UINT,
            VertexFormat::UInt3 => vk::Format::R32G32B32_UINT,
            VertexFormat::UInt4 => vk::Format::R32G32B32A32_UINT,
        }
    }
}

/// One descriptor binding of a program, keyed by `(set, binding)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: ShaderStages,
    /// Name of the first object that claimed this slot.
    pub name: String,
}

impl BindingEntry {
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.kind.to_vk())
            .descriptor_count(self.count)
            .stage_flags(self.stages.to_vk())
    }
}

/// Bindings of one descriptor set, sorted by binding number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSet {
    pub set: u32,
    pub bindings: Vec<BindingEntry>,
}

impl LayoutSet {
    pub fn binding(&self, binding: u32) -> Option<&BindingEntry> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn to_vk(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings.iter().map(BindingEntry::to_vk).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub size: u32,
    pub offset: u32,
}

impl PushConstantRange {
    pub fn to_vk(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages.to_vk(),
            offset: self.offset,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputLocation {
    pub location: u32,
    pub format: VertexFormat,
}

/// Validated output of a [`LayoutAggregator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedLayout {
    pub sets: Vec<LayoutSet>,
    pub push_constants: Vec<PushConstantRange>,
    pub vertex_inputs: Vec<VertexInputLocation>,
}

/// Folds classified objects into per-set layouts.
///
/// A binding whose `(set, binding)` is already present is merged into the existing entry:
/// stage masks are unioned and descriptor counts are added.
#[derive(Debug, Default)]
pub struct LayoutAggregator {
    sets: Vec<LayoutSet>,
    push_constants: Vec<PushConstantRange>,
    vertex_inputs: Vec<VertexInputLocation>,
}

impl LayoutAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, classification: Classification) -> Result<()> {
        match classification {
            Classification::Descriptor(entry) => self.add_binding(entry)?,
            Classification::PushConstant(range) => self.add_push_constant(range),
            Classification::VertexInput(inputs) => {
                for input in inputs {
                    self.add_vertex_input(input)?;
                }
            }
            Classification::Skipped => {}
        }
        Ok(())
    }

    pub fn add_binding(&mut self, entry: BindingEntry) -> Result<()> {
        let index = match self.sets.iter().position(|s| s.set == entry.set) {
            Some(index) => index,
            None => {
                self.sets.push(LayoutSet { set: entry.set, bindings: Vec::new() });
                self.sets.len() - 1
            }
        };
        let set = &mut self.sets[index];

        match set.bindings.iter_mut().find(|b| b.binding == entry.binding) {
            Some(existing) => {
                if existing.kind != entry.kind {
                    return Err(ReflectError::ConflictingBinding {
                        set: entry.set,
                        binding: entry.binding,
                        existing: existing.kind,
                        incoming: entry.kind,
                    });
                }
                log::trace!(
                    "merging `{}` into set {} binding {} (`{}`)",
                    entry.name, entry.set, entry.binding, existing.name
                );
                existing.count = existing.count.checked_add(entry.count).ok_or_else(|| {
                    ReflectError::unsupported(&entry.name, "merged descriptor count overflows u32")
                })?;
                existing.stages |= entry.stages;
            }
            None => set.bindings.push(entry),
        }
        Ok(())
    }

    /// Push constant ranges are kept as declared, never merged.
    pub fn add_push_constant(&mut self, range: PushConstantRange) {
        self.push_constants.push(range);
    }

    /// One attribute description per location, so component-packed inputs are rejected.
    pub fn add_vertex_input(&mut self, input: VertexInputLocation) -> Result<()> {
        if self.vertex_inputs.iter().any(|v| v.location == input.location) {
            return Err(ReflectError::unsupported(
                &format!("location {}", input.location),
                "vertex input location is shared by several components",
            ));
        }
        self.vertex_inputs.push(input);
        Ok(())
    }

    /// Sort and validate the folded layout.
    pub fn finish(self) -> Result<AggregatedLayout> {
        let LayoutAggregator { mut sets, push_constants, mut vertex_inputs } = self;

        sets.sort_by_key(|s| s.set);
        for set in &mut sets {
            set.bindings.sort_by_key(|b| b.binding);
        }
        let set_numbers: Vec<u32> = sets.iter().map(|s| s.set).collect();
        if !contiguous_from_zero(&set_numbers) {
            return Err(ReflectError::NonContiguousSets { sets: set_numbers });
        }

        vertex_inputs.sort_by_key(|v| v.location);
        let locations: Vec<u32> = vertex_inputs.iter().map(|v| v.location).collect();
        if !contiguous_from_zero(&locations) {
            return Err(ReflectError::NonContiguousLocations { locations });
        }

        Ok(AggregatedLayout { sets, push_constants, vertex_inputs })
    }
}

/// Whether sorted, distinct numbers start at 0 and have no gaps. An empty list qualifies.
pub fn contiguous_from_zero(sorted: &[u32]) -> bool {
    sorted.first().is_none_or(|&first| first == 0)
        && sorted.windows(2).all(|pair| pair[1] - pair[0] <= 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ShaderStage;

    fn entry(set: u32, binding: u32, kind: DescriptorKind, stage: ShaderStage) -> BindingEntry {
        BindingEntry {
            set,
            binding,
            kind,
            count: 1,
            stages: stage.into(),
            name: format!("b{set}_{binding}"),
        }
    }

    fn aggregate(entries: Vec<BindingEntry>) -> Result<AggregatedLayout> {
        let mut aggregator = LayoutAggregator::new();
        for e in entries {
            aggregator.add_binding(e)?;
        }
        aggregator.finish()
    }

    #[test]
    fn same_key_merges_stage_masks_and_counts() {
        let layout = aggregate(vec![
            entry(0, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
            entry(0, 0, DescriptorKind::UniformBuffer, ShaderStage::Fragment),
        ])
        .unwrap();

        assert_eq!(layout.sets.len(), 1);
        assert_eq!(layout.sets[0].bindings.len(), 1);
        let merged = &layout.sets[0].bindings[0];
        assert_eq!(merged.stages, ShaderStages::from(ShaderStage::Vertex) | ShaderStage::Fragment);
        assert_eq!(merged.count, 2);
    }

    #[test]
    fn sets_and_bindings_come_out_sorted() {
        let layout = aggregate(vec![
            entry(1, 3, DescriptorKind::StorageBuffer, ShaderStage::Compute),
            entry(0, 2, DescriptorKind::SampledImage, ShaderStage::Compute),
            entry(1, 0, DescriptorKind::StorageImage, ShaderStage::Compute),
            entry(0, 0, DescriptorKind::Sampler, ShaderStage::Compute),
        ])
        .unwrap();

        let shape: Vec<(u32, Vec<u32>)> = layout
            .sets
            .iter()
            .map(|s| (s.set, s.bindings.iter().map(|b| b.binding).collect()))
            .collect();
        assert_eq!(shape, vec![(0, vec![0, 2]), (1, vec![0, 3])]);
    }

    #[test]
    fn set_gap_is_rejected() {
        let err = aggregate(vec![
            entry(0, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
            entry(2, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
        ])
        .unwrap_err();
        assert!(matches!(err, ReflectError::NonContiguousSets { ref sets } if sets == &[0, 2]));

        aggregate(vec![
            entry(0, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
            entry(1, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
            entry(2, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
        ])
        .unwrap();
    }

    #[test]
    fn sets_must_start_at_zero() {
        let err = aggregate(vec![entry(1, 0, DescriptorKind::UniformBuffer, ShaderStage::Vertex)]).unwrap_err();
        assert!(matches!(err, ReflectError::NonContiguousSets { .. }));
    }

    #[test]
    fn kind_conflict_at_same_key_is_rejected() {
        let err = aggregate(vec![
            entry(0, 1, DescriptorKind::UniformBuffer, ShaderStage::Vertex),
            entry(0, 1, DescriptorKind::CombinedImageSampler, ShaderStage::Fragment),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ReflectError::ConflictingBinding {
                set: 0,
                binding: 1,
                existing: DescriptorKind::UniformBuffer,
                incoming: DescriptorKind::CombinedImageSampler,
            }
        ));
    }

    #[test]
    fn vertex_locations_must_be_contiguous() {
        let input = |location| VertexInputLocation { location, format: VertexFormat::Float4 };

        let mut aggregator = LayoutAggregator::new();
        for location in [3, 0, 1] {
            aggregator.add_vertex_input(input(location)).unwrap();
        }
        let err = aggregator.finish().unwrap_err();
        assert!(matches!(err, ReflectError::NonContiguousLocations { ref locations } if locations == &[0, 1, 3]));

        let mut aggregator = LayoutAggregator::new();
        for location in [2, 0, 1] {
            aggregator.add_vertex_input(input(location)).unwrap();
        }
        let layout = aggregator.finish().unwrap();
        let locations: Vec<_> = layout.vertex_inputs.iter().map(|v| v.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn component_aliased_locations_are_rejected() {
        let mut aggregator = LayoutAggregator::new();
        aggregator.add_vertex_input(VertexInputLocation { location: 0, format: VertexFormat::Float2 }).unwrap();
        let err = aggregator
            .add_vertex_input(VertexInputLocation { location: 0, format: VertexFormat::Float2 })
            .unwrap_err();
        assert!(matches!(
            err,
            ReflectError::UnsupportedBindingShape { ref name, .. } if name == "location 0"
        ));
    }

    #[test]
    fn descriptor_count_overflow_is_rejected() {
        let mut huge = entry(0, 0, DescriptorKind::SampledImage, ShaderStage::Vertex);
        huge.count = u32::MAX;
        let one = entry(0, 0, DescriptorKind::SampledImage, ShaderStage::Fragment);

        let err = aggregate(vec![huge, one]).unwrap_err();
        assert!(matches!(err, ReflectError::UnsupportedBindingShape { ref name, .. } if name == "b0_0"));
    }

    #[test]
    fn array_slices_sum_their_counts() {
        let mut vertex = entry(0, 0, DescriptorKind::CombinedImageSampler, ShaderStage::Vertex);
        vertex.count = 2;
        let mut fragment = entry(0, 0, DescriptorKind::CombinedImageSampler, ShaderStage::Fragment);
        fragment.count = 3;

        let layout = aggregate(vec![vertex, fragment]).unwrap();
        let merged = &layout.sets[0].bindings[0];
        assert_eq!(merged.count, 5);
        assert_eq!(merged.stages, ShaderStages::from(ShaderStage::Vertex) | ShaderStage::Fragment);
    }

    #[test]
    fn push_constants_are_additive() {
        let mut aggregator = LayoutAggregator::new();
        let range = PushConstantRange { stages: ShaderStage::Vertex.into(), size: 64, offset: 0 };
        aggregator.add_push_constant(range);
        aggregator.add_push_constant(range);
        assert_eq!(aggregator.finish().unwrap().push_constants, vec![range, range]);
    }

    #[test]
    fn empty_layout_is_valid() {
        let layout = LayoutAggregator::new().finish().unwrap();
        assert_eq!(layout, AggregatedLayout::default());
    }

    #[test]
    fn vertex_formats_widen_within_their_family() {
        assert_eq!(VertexFormat::Float.with_components(3), Some(VertexFormat::Float3));
        assert_eq!(VertexFormat::UInt.with_components(4), Some(VertexFormat::UInt4));
        assert_eq!(VertexFormat::Int.with_components(0), None);
        assert_eq!(VertexFormat::Int.with_components(5), None);
        assert_eq!(VertexFormat::Float3.size(), 12);
        assert_eq!(VertexFormat::Int2.to_vk(), vk::Format::R32G32_SINT);
    }
}
