//! Shader stages, stage masks and per-stage source inputs.

use std::fmt;
use std::path::Path;
use ash::vk;
use derive_more::Display;
use enumflags2::BitFlags;
use crate::error::{ReflectError, Result};

/// Entry point used when a source does not name one.
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// A programmable pipeline stage.
///
/// Discriminants are the `VkShaderStageFlagBits` values, and the declaration order is pipeline order.
#[enumflags2::bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    #[display("vertex")]
    Vertex = 0x01,
    #[display("tessellation control")]
    TessControl = 0x02,
    #[display("tessellation evaluation")]
    TessEvaluation = 0x04,
    #[display("geometry")]
    Geometry = 0x08,
    #[display("fragment")]
    Fragment = 0x10,
    #[display("compute")]
    Compute = 0x20,
}

impl ShaderStage {
    /// Every stage, in pipeline order.
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// Convert to Vulkan shader stage flags.
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::from_raw(self as u32)
    }

    /// Map a source file extension (without the dot) to a stage.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vert" => Some(ShaderStage::Vertex),
            "tesc" => Some(ShaderStage::TessControl),
            "tese" => Some(ShaderStage::TessEvaluation),
            "geom" => Some(ShaderStage::Geometry),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    /// The conventional file extension of this stage.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::TessControl => "tesc",
            ShaderStage::TessEvaluation => "tese",
            ShaderStage::Geometry => "geom",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }

    pub fn is_graphics(self) -> bool {
        self != ShaderStage::Compute
    }
}

/// A set of shader stages, e.g. every stage that references one binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderStages(BitFlags<ShaderStage>);

impl ShaderStages {
    pub fn empty() -> Self {
        Self(BitFlags::empty())
    }

    pub fn insert(&mut self, stage: ShaderStage) {
        self.0.insert(stage);
    }

    pub fn contains(self, stage: ShaderStage) -> bool {
        self.0.contains(stage)
    }

    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    pub fn len(self) -> usize {
        self.0.len()
    }

    /// Stages in pipeline order.
    pub fn iter(self) -> impl Iterator<Item = ShaderStage> {
        self.0.iter()
    }

    pub fn bits(self) -> u32 {
        self.0.bits()
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::from_raw(self.0.bits())
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(value: ShaderStage) -> Self {
        Self(BitFlags::from_flag(value))
    }
}

impl FromIterator<ShaderStage> for ShaderStages {
    fn from_iter<I: IntoIterator<Item = ShaderStage>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl core::ops::BitOr for ShaderStages {
    type Output = ShaderStages;
    fn bitor(self, rhs: ShaderStages) -> Self::Output {
        ShaderStages(self.0 | rhs.0)
    }
}

impl core::ops::BitOr<ShaderStage> for ShaderStages {
    type Output = ShaderStages;
    fn bitor(self, rhs: ShaderStage) -> Self::Output {
        ShaderStages(self.0 | rhs)
    }
}

impl core::ops::BitOrAssign for ShaderStages {
    fn bitor_assign(&mut self, rhs: ShaderStages) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ShaderStages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, stage) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Infer the stage of a shader file from its extension.
///
/// `lit.frag` and `lit.frag.glsl` both resolve to [`ShaderStage::Fragment`].
pub fn infer_stage(file_name: &str) -> Option<ShaderStage> {
    let path = Path::new(file_name);
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case("glsl") {
        let stem = Path::new(path.file_stem()?);
        return ShaderStage::from_extension(stem.extension()?.to_str()?);
    }
    ShaderStage::from_extension(ext)
}

/// GLSL source for one stage of a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSource {
    stage: ShaderStage,
    source: String,
    entry_point: String,
    file: String,
}

impl StageSource {
    /// Source with an explicit stage tag. The file identity defaults to `<inline>.<ext>`.
    pub fn new(stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            stage,
            source: source.into(),
            entry_point: DEFAULT_ENTRY_POINT.to_owned(),
            file: format!("<inline>.{}", stage.extension()),
        }
    }

    /// Source whose stage is inferred from `file_name`.
    pub fn from_named(file_name: &str, source: impl Into<String>) -> Result<Self> {
        let stage = infer_stage(file_name).ok_or_else(|| ReflectError::UnknownStageKind {
            file: file_name.to_owned(),
        })?;
        Ok(Self::new(stage, source).with_file_name(file_name))
    }

    /// Read a shader file, inferring its stage from the extension.
    ///
    /// The extension is checked before the file is read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = path.to_string_lossy().into_owned();
        let stage = infer_stage(&file).ok_or_else(|| ReflectError::UnknownStageKind { file: file.clone() })?;
        let source = std::fs::read_to_string(path).map_err(|source| ReflectError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::new(stage, source).with_file_name(file))
    }

    /// Override the entry point. An empty name keeps the default.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        let entry_point = entry_point.into();
        if !entry_point.is_empty() {
            self.entry_point = entry_point;
        }
        self
    }

    /// Override the file identity used in diagnostics and include resolution.
    pub fn with_file_name(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage { self.stage }

    #[inline]
    pub fn source(&self) -> &str { &self.source }

    #[inline]
    pub fn entry_point(&self) -> &str { &self.entry_point }

    #[inline]
    pub fn file_name(&self) -> &str { &self.file }
}
