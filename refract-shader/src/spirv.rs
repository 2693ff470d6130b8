//! Typed view over a SPIR-V module.
//!
//! The module is loaded with `rspirv` and only the subset that describes its resource interface
//! is indexed: entry points, names, decorations, the type graph, integer constants and global
//! variables. Function bodies are ignored.

use rspirv::dr::{self, Operand};
use rspirv::spirv as spv;
use thiserror::Error;
use refract_core::collections::hashmap::HashMap;
use crate::layout::VertexFormat;

pub use spv::{Decoration, Dim, ExecutionModel, StorageClass};

pub type Id = spv::Word;

pub const MAGIC: u32 = spv::MAGIC_NUMBER;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpirvParseError {
    #[error("malformed module: {0}")]
    Malformed(String),
    #[error("module has no header")]
    MissingHeader,
    #[error("Op{0:?} has unexpected operands")]
    Operands(spv::Op),
}

/// Render a version word as `major.minor`.
pub fn version_string(version: u32) -> String {
    format!("{}.{}", (version >> 16) & 0xFF, (version >> 8) & 0xFF)
}

fn id_at(inst: &dr::Instruction, index: usize) -> Option<Id> {
    match inst.operands.get(index)? {
        Operand::IdRef(id) => Some(*id),
        _ => None,
    }
}

fn literal_at(inst: &dr::Instruction, index: usize) -> Option<u32> {
    match inst.operands.get(index)? {
        Operand::LiteralBit32(value) => Some(*value),
        _ => None,
    }
}

fn string_at(inst: &dr::Instruction, index: usize) -> Option<&str> {
    match inst.operands.get(index)? {
        Operand::LiteralString(s) => Some(s.as_str()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpirvType {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: Id, count: u32 },
    Matrix { column: Id, count: u32 },
    Image { sampled_type: Id, dim: Dim, depth: u32, arrayed: bool, multisampled: bool, sampled: u32 },
    Sampler,
    SampledImage { image: Id },
    Array { element: Id, length: Id },
    RuntimeArray { element: Id },
    Struct { members: Vec<Id> },
    Pointer { storage_class: StorageClass, pointee: Id },
    AccelerationStructure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decorations {
    pub set: Option<u32>,
    pub binding: Option<u32>,
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub builtin: Option<spv::BuiltIn>,
    pub offset: Option<u32>,
    pub input_attachment_index: Option<u32>,
    pub block: bool,
    pub buffer_block: bool,
    pub patch: bool,
    pub non_writable: bool,
}

impl Decorations {
    /// Apply the operands of an `OpDecorate`/`OpMemberDecorate`, starting at the decoration.
    fn apply(&mut self, operands: &[Operand]) {
        let Some(Operand::Decoration(decoration)) = operands.first() else { return };
        let literal = match operands.get(1) {
            Some(Operand::LiteralBit32(value)) => Some(*value),
            _ => None,
        };
        match decoration {
            Decoration::Block => self.block = true,
            Decoration::BufferBlock => self.buffer_block = true,
            Decoration::Patch => self.patch = true,
            Decoration::NonWritable => self.non_writable = true,
            Decoration::BuiltIn => {
                if let Some(Operand::BuiltIn(builtin)) = operands.get(1) {
                    self.builtin = Some(*builtin);
                }
            }
            Decoration::Location => self.location = literal,
            Decoration::Component => self.component = literal,
            Decoration::Binding => self.binding = literal,
            Decoration::DescriptorSet => self.set = literal,
            Decoration::Offset => self.offset = literal,
            Decoration::InputAttachmentIndex => self.input_attachment_index = literal,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: ExecutionModel,
    pub function: Id,
    pub name: String,
    pub interface: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub id: Id,
    pub pointer_type: Id,
    pub storage_class: StorageClass,
}

/// Shape of a descriptor array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArraySize {
    Single,
    Fixed(u32),
    Runtime,
}

impl ArraySize {
    /// Descriptor count, `None` for runtime-sized arrays.
    pub fn count(self) -> Option<u32> {
        match self {
            ArraySize::Single => Some(1),
            ArraySize::Fixed(n) => Some(n),
            ArraySize::Runtime => None,
        }
    }
}

/// One interface location of a stage input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceSlot {
    pub location: u32,
    /// First component the slot occupies within its location, 0 unless decorated.
    pub component: u32,
    /// `None` when the component type has no 32-bit vertex format (doubles, 16-bit types).
    pub format: Option<VertexFormat>,
}

/// Interface tables of one SPIR-V module.
#[derive(Debug, Clone, Default)]
pub struct SpirvModule {
    version: u32,
    bound: u32,
    entry_points: Vec<EntryPoint>,
    local_sizes: HashMap<Id, [u32; 3]>,
    names: HashMap<Id, String>,
    member_names: HashMap<(Id, u32), String>,
    decorations: HashMap<Id, Decorations>,
    member_decorations: HashMap<(Id, u32), Decorations>,
    types: HashMap<Id, SpirvType>,
    constants: HashMap<Id, u32>,
    variables: Vec<Variable>,
}

impl SpirvModule {
    pub fn parse(words: &[u32]) -> Result<Self, SpirvParseError> {
        let module = dr::load_words(words).map_err(|e| SpirvParseError::Malformed(format!("{e:?}")))?;
        Self::from_module(&module)
    }

    pub fn from_module(module: &dr::Module) -> Result<Self, SpirvParseError> {
        let header = module.header.as_ref().ok_or(SpirvParseError::MissingHeader)?;
        let mut view = SpirvModule {
            version: header.version,
            bound: header.bound,
            ..Default::default()
        };

        let instructions = module
            .entry_points
            .iter()
            .chain(&module.execution_modes)
            .chain(&module.debug_names)
            .chain(&module.annotations)
            .chain(&module.types_global_values);
        for inst in instructions {
            view.record(inst).ok_or(SpirvParseError::Operands(inst.class.opcode))?;
        }
        Ok(view)
    }

    /// Index one module-level instruction. `None` when its operands do not fit the opcode.
    fn record(&mut self, inst: &dr::Instruction) -> Option<()> {
        match inst.class.opcode {
            spv::Op::EntryPoint => {
                let Operand::ExecutionModel(execution_model) = inst.operands.first()? else { return None };
                let entry_point = EntryPoint {
                    execution_model: *execution_model,
                    function: id_at(inst, 1)?,
                    name: string_at(inst, 2)?.to_owned(),
                    interface: (3..inst.operands.len()).map(|i| id_at(inst, i)).collect::<Option<_>>()?,
                };
                self.entry_points.push(entry_point);
            }
            spv::Op::ExecutionMode => {
                if let Some(Operand::ExecutionMode(spv::ExecutionMode::LocalSize)) = inst.operands.get(1) {
                    let size = [literal_at(inst, 2)?, literal_at(inst, 3)?, literal_at(inst, 4)?];
                    self.local_sizes.insert(id_at(inst, 0)?, size);
                }
            }
            spv::Op::Name => {
                self.names.insert(id_at(inst, 0)?, string_at(inst, 1)?.to_owned());
            }
            spv::Op::MemberName => {
                let key = (id_at(inst, 0)?, literal_at(inst, 1)?);
                self.member_names.insert(key, string_at(inst, 2)?.to_owned());
            }
            spv::Op::Decorate => {
                let target = id_at(inst, 0)?;
                self.decorations.entry(target).or_default().apply(&inst.operands[1..]);
            }
            spv::Op::MemberDecorate => {
                let key = (id_at(inst, 0)?, literal_at(inst, 1)?);
                self.member_decorations.entry(key).or_default().apply(&inst.operands[2..]);
            }
            spv::Op::Variable => {
                let Operand::StorageClass(storage_class) = inst.operands.first()? else { return None };
                self.variables.push(Variable {
                    id: inst.result_id?,
                    pointer_type: inst.result_type?,
                    storage_class: *storage_class,
                });
            }
            // Specialization constants count with their default value.
            spv::Op::Constant | spv::Op::SpecConstant => {
                let ty = inst.result_type.and_then(|ty| self.types.get(&ty));
                if let (Some(SpirvType::Int { width: 32, .. }), Some(value)) = (ty, literal_at(inst, 0)) {
                    self.constants.insert(inst.result_id?, value);
                }
            }
            spv::Op::TypeVoid => self.insert_type(inst, SpirvType::Void)?,
            spv::Op::TypeBool => self.insert_type(inst, SpirvType::Bool)?,
            spv::Op::TypeInt => {
                let ty = SpirvType::Int { width: literal_at(inst, 0)?, signed: literal_at(inst, 1)? != 0 };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeFloat => self.insert_type(inst, SpirvType::Float { width: literal_at(inst, 0)? })?,
            spv::Op::TypeVector => {
                let ty = SpirvType::Vector { component: id_at(inst, 0)?, count: literal_at(inst, 1)? };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeMatrix => {
                let ty = SpirvType::Matrix { column: id_at(inst, 0)?, count: literal_at(inst, 1)? };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeImage => {
                let Some(Operand::Dim(dim)) = inst.operands.get(1) else { return None };
                let ty = SpirvType::Image {
                    sampled_type: id_at(inst, 0)?,
                    dim: *dim,
                    depth: literal_at(inst, 2)?,
                    arrayed: literal_at(inst, 3)? != 0,
                    multisampled: literal_at(inst, 4)? != 0,
                    sampled: literal_at(inst, 5)?,
                };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeSampler => self.insert_type(inst, SpirvType::Sampler)?,
            spv::Op::TypeSampledImage => self.insert_type(inst, SpirvType::SampledImage { image: id_at(inst, 0)? })?,
            spv::Op::TypeArray => {
                let ty = SpirvType::Array { element: id_at(inst, 0)?, length: id_at(inst, 1)? };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeRuntimeArray => self.insert_type(inst, SpirvType::RuntimeArray { element: id_at(inst, 0)? })?,
            spv::Op::TypeStruct => {
                let members = (0..inst.operands.len()).map(|i| id_at(inst, i)).collect::<Option<_>>()?;
                self.insert_type(inst, SpirvType::Struct { members })?
            }
            spv::Op::TypePointer => {
                let Operand::StorageClass(storage_class) = inst.operands.first()? else { return None };
                let ty = SpirvType::Pointer { storage_class: *storage_class, pointee: id_at(inst, 1)? };
                self.insert_type(inst, ty)?
            }
            spv::Op::TypeAccelerationStructureKHR => self.insert_type(inst, SpirvType::AccelerationStructure)?,
            _ => {}
        }
        Some(())
    }

    fn insert_type(&mut self, inst: &dr::Instruction, ty: SpirvType) -> Option<()> {
        self.types.insert(inst.result_id?, ty);
        Some(())
    }

    #[inline]
    pub fn version(&self) -> u32 { self.version }

    #[inline]
    pub fn bound(&self) -> u32 { self.bound }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: &str, execution_model: ExecutionModel) -> Option<&EntryPoint> {
        self.entry_points
            .iter()
            .find(|ep| ep.name == name && ep.execution_model == execution_model)
    }

    /// `LocalSize` execution mode of an entry point.
    pub fn local_size(&self, entry_point: &EntryPoint) -> Option<[u32; 3]> {
        self.local_sizes.get(&entry_point.function).copied()
    }

    /// Global variables in declaration order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn ty(&self, id: Id) -> Option<&SpirvType> {
        self.types.get(&id)
    }

    pub fn constant(&self, id: Id) -> Option<u32> {
        self.constants.get(&id).copied()
    }

    /// Debug name of an id. Empty names count as absent.
    pub fn name(&self, id: Id) -> Option<&str> {
        self.names.get(&id).map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn member_name(&self, id: Id, member: u32) -> Option<&str> {
        self.member_names.get(&(id, member)).map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn decorations(&self, id: Id) -> Option<&Decorations> {
        self.decorations.get(&id)
    }

    pub fn member_decorations(&self, id: Id, member: u32) -> Option<&Decorations> {
        self.member_decorations.get(&(id, member))
    }

    /// Type a variable points at.
    pub fn pointee(&self, variable: &Variable) -> Option<Id> {
        match self.ty(variable.pointer_type)? {
            SpirvType::Pointer { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    /// Strip array layers off a descriptor type. Nested fixed arrays multiply.
    pub fn unwrap_arrays(&self, mut ty: Id) -> (Id, ArraySize) {
        let mut size = ArraySize::Single;
        loop {
            match self.ty(ty) {
                Some(SpirvType::Array { element, length }) => {
                    let len = self.constant(*length).unwrap_or(1);
                    size = match size {
                        ArraySize::Single => ArraySize::Fixed(len),
                        ArraySize::Fixed(n) => ArraySize::Fixed(n.saturating_mul(len)),
                        ArraySize::Runtime => ArraySize::Runtime,
                    };
                    ty = *element;
                }
                Some(SpirvType::RuntimeArray { element }) => {
                    size = ArraySize::Runtime;
                    ty = *element;
                }
                _ => return (ty, size),
            }
        }
    }

    /// Whether the type is a struct with a built-in member (e.g. `gl_PerVertex`).
    pub fn has_builtin_member(&self, ty: Id) -> bool {
        match self.ty(ty) {
            Some(SpirvType::Struct { members }) => (0..members.len() as u32)
                .any(|m| self.member_decorations(ty, m).is_some_and(|d| d.builtin.is_some())),
            _ => false,
        }
    }

    /// Locations occupied by a user-defined `Input`/`Output` variable.
    ///
    /// Built-ins yield nothing. With `per_vertex` set, one outer array layer is the
    /// per-vertex dimension and is not counted as locations.
    pub fn interface_slots(&self, variable: &Variable, per_vertex: bool) -> Vec<InterfaceSlot> {
        let mut out = Vec::new();
        let decos = self.decorations(variable.id).cloned().unwrap_or_default();
        if decos.builtin.is_some() {
            return out;
        }
        let Some(mut ty) = self.pointee(variable) else { return out };
        if per_vertex {
            if let Some(SpirvType::Array { element, .. }) = self.ty(ty) {
                ty = *element;
            }
        }
        if self.has_builtin_member(ty) {
            return out;
        }

        let component = decos.component.unwrap_or(0);
        match self.ty(ty) {
            Some(SpirvType::Struct { members }) => {
                // Interface block: members continue from the block location unless decorated.
                let mut next = decos.location;
                for (index, &member) in members.iter().enumerate() {
                    let member_decos = self.member_decorations(ty, index as u32);
                    let Some(location) = member_decos.and_then(|d| d.location).or(next) else { continue };
                    let member_component = member_decos.and_then(|d| d.component).unwrap_or(0);
                    next = Some(self.expand_locations(member, location, member_component, &mut out));
                }
            }
            _ => {
                if let Some(location) = decos.location {
                    self.expand_locations(ty, location, component, &mut out);
                }
            }
        }
        out
    }

    /// Push one slot per location occupied by `ty`, starting at `location`. Returns the next free location.
    pub fn expand_locations(&self, ty: Id, location: u32, component: u32, out: &mut Vec<InterfaceSlot>) -> u32 {
        match self.ty(ty) {
            Some(SpirvType::Matrix { column, count }) => {
                let mut next = location;
                for _ in 0..*count {
                    next = self.expand_locations(*column, next, component, out);
                }
                next
            }
            Some(SpirvType::Array { element, length }) => {
                let mut next = location;
                for _ in 0..self.constant(*length).unwrap_or(1) {
                    next = self.expand_locations(*element, next, component, out);
                }
                next
            }
            Some(SpirvType::Struct { members }) => {
                let mut next = location;
                for &member in members {
                    next = self.expand_locations(member, next, 0, out);
                }
                next
            }
            Some(SpirvType::Vector { component: scalar, count }) => {
                // 64-bit three and four component vectors take two locations.
                let wide = matches!(self.ty(*scalar), Some(SpirvType::Float { width: 64 } | SpirvType::Int { width: 64, .. }));
                let span = if wide && *count > 2 { 2 } else { 1 };
                let format = self.vertex_format(ty);
                for i in 0..span {
                    out.push(InterfaceSlot {
                        location: location + i,
                        component,
                        format: if i == 0 { format } else { None },
                    });
                }
                location + span
            }
            _ => {
                out.push(InterfaceSlot { location, component, format: self.vertex_format(ty) });
                location + 1
            }
        }
    }

    /// 32-bit vertex format of a scalar or vector type.
    pub fn vertex_format(&self, ty: Id) -> Option<VertexFormat> {
        match self.ty(ty)? {
            SpirvType::Float { width: 32 } => Some(VertexFormat::Float),
            SpirvType::Int { width: 32, signed: true } => Some(VertexFormat::Int),
            SpirvType::Int { width: 32, signed: false } => Some(VertexFormat::UInt),
            SpirvType::Vector { component, count } => {
                let scalar = self.vertex_format(*component)?;
                scalar.with_components(*count)
            }
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{self, decorate};
    use super::*;

    fn vertex_module() -> Vec<u32> {
        let mut b = testing::builder();
        let float = b.type_float(32);
        let vec2 = b.type_vector(float, 2);
        let vec3 = b.type_vector(float, 3);
        let vec4 = b.type_vector(float, 4);
        let mat4 = b.type_matrix(vec4, 4);
        let ptr_in_vec2 = b.type_pointer(None, StorageClass::Input, vec2);
        let ptr_in_vec3 = b.type_pointer(None, StorageClass::Input, vec3);
        let ptr_in_mat4 = b.type_pointer(None, StorageClass::Input, mat4);
        let position = b.variable(ptr_in_vec3, None, StorageClass::Input, None);
        let model = b.variable(ptr_in_mat4, None, StorageClass::Input, None);
        let uv = b.variable(ptr_in_vec2, None, StorageClass::Input, None);

        let uint = b.type_int(32, 0);
        let two = b.constant_bit32(uint, 2);
        let image = b.type_image(float, Dim::Dim2D, 0, 0, 0, 1, spv::ImageFormat::Unknown, None);
        let sampled = b.type_sampled_image(image);
        let array = b.type_array(sampled, two);
        let ptr_uc_array = b.type_pointer(None, StorageClass::UniformConstant, array);
        let textures = b.variable(ptr_uc_array, None, StorageClass::UniformConstant, None);

        let main = b.id();
        b.entry_point(ExecutionModel::Vertex, main, "main", vec![position, model, uv]);
        b.name(position, "in_position");
        b.name(textures, "textures");
        decorate(&mut b, position, Decoration::Location, &[0]);
        decorate(&mut b, model, Decoration::Location, &[1]);
        decorate(&mut b, uv, Decoration::Location, &[5]);
        decorate(&mut b, uv, Decoration::Component, &[2]);
        decorate(&mut b, textures, Decoration::DescriptorSet, &[2]);
        decorate(&mut b, textures, Decoration::Binding, &[3]);
        testing::assemble(b)
    }

    #[test]
    fn parses_entry_points_and_names() {
        let module = SpirvModule::parse(&vertex_module()).unwrap();
        assert_eq!(module.version(), testing::VERSION_1_5);
        assert_eq!(version_string(module.version()), "1.5");
        assert!(module.bound() > 0);

        let ep = module.entry_point("main", ExecutionModel::Vertex).unwrap();
        assert_eq!(ep.interface.len(), 3);
        assert!(module.entry_point("main", ExecutionModel::Fragment).is_none());
        assert!(module.entry_point("other", ExecutionModel::Vertex).is_none());

        let textures = module.variables().iter().find(|v| module.name(v.id) == Some("textures")).unwrap();
        assert_eq!(textures.storage_class, StorageClass::UniformConstant);
        let decos = module.decorations(textures.id).unwrap();
        assert_eq!((decos.set, decos.binding), (Some(2), Some(3)));

        let (base, size) = module.unwrap_arrays(module.pointee(textures).unwrap());
        assert_eq!(size, ArraySize::Fixed(2));
        assert!(matches!(module.ty(base), Some(SpirvType::SampledImage { .. })));
    }

    #[test]
    fn matrices_span_one_location_per_column() {
        let module = SpirvModule::parse(&vertex_module()).unwrap();
        let inputs: Vec<_> = module
            .variables()
            .iter()
            .filter(|v| v.storage_class == StorageClass::Input)
            .flat_map(|v| module.interface_slots(v, false))
            .collect();

        let locations: Vec<_> = inputs.iter().map(|s| s.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(inputs[0].format, Some(VertexFormat::Float3));
        assert!(inputs[1..5].iter().all(|s| s.format == Some(VertexFormat::Float4)));
    }

    #[test]
    fn component_decoration_is_kept() {
        let module = SpirvModule::parse(&vertex_module()).unwrap();
        let slots: Vec<_> = module
            .variables()
            .iter()
            .filter(|v| v.storage_class == StorageClass::Input)
            .flat_map(|v| module.interface_slots(v, false))
            .collect();

        let uv = slots.iter().find(|s| s.location == 5).unwrap();
        assert_eq!((uv.component, uv.format), (2, Some(VertexFormat::Float2)));
        assert!(slots.iter().filter(|s| s.location != 5).all(|s| s.component == 0));
    }

    #[test]
    fn rejects_malformed_streams() {
        assert!(matches!(SpirvModule::parse(&[MAGIC, 0, 0]), Err(SpirvParseError::Malformed(_))));
        assert!(matches!(
            SpirvModule::parse(&[0xDEAD_BEEF, 0, 0, 0, 0]),
            Err(SpirvParseError::Malformed(_))
        ));

        let mut words = vertex_module();
        // An OpNop claiming more words than remain.
        words.push(9 << 16);
        assert!(matches!(SpirvModule::parse(&words), Err(SpirvParseError::Malformed(_))));
    }
}
