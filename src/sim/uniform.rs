//! Uniform values and the ordered per-kernel uniform bag.
//!
//! Non-texture values are packed into one uniform buffer per kernel, in bag
//! insertion order, following WGSL struct layout rules; the matching WGSL
//! `Params` struct declares its fields in the same order. Grid references
//! become texture bindings with slots assigned in bag order.

use super::grid::{Grid, GridId};

/// One uniform value. Numeric variants compare element-wise; grid
/// references compare by identity.
#[derive(Clone)]
pub enum UniformValue {
    Scalar(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    Grid(Grid),
}

impl UniformValue {
    /// WGSL alignment of the value in a uniform-class struct.
    pub fn align(&self) -> u64 {
        match self {
            UniformValue::Scalar(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_)
            | UniformValue::Vec4(_)
            | UniformValue::Mat3(_)
            | UniformValue::Mat4(_) => 16,
            UniformValue::Grid(_) => 0,
        }
    }

    /// WGSL size of the value, including matrix column padding.
    pub fn size(&self) -> u64 {
        match self {
            UniformValue::Scalar(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
            UniformValue::Mat3(_) => 48,
            UniformValue::Mat4(_) => 64,
            UniformValue::Grid(_) => 0,
        }
    }

    /// GPU byte representation; mat3 columns are padded to vec4 stride.
    pub fn bytes(&self) -> Vec<u8> {
        let floats: Vec<f32> = match self {
            UniformValue::Scalar(v) => vec![*v],
            UniformValue::Vec2(v) => v.to_vec(),
            UniformValue::Vec3(v) => v.to_vec(),
            UniformValue::Vec4(v) => v.to_vec(),
            UniformValue::Mat3(m) => {
                let mut padded = Vec::with_capacity(12);
                for column in m.chunks(3) {
                    padded.extend_from_slice(column);
                    padded.push(0.0);
                }
                padded
            }
            UniformValue::Mat4(m) => m.to_vec(),
            UniformValue::Grid(_) => Vec::new(),
        };
        bytemuck::cast_slice(&floats).to_vec()
    }

    /// Whether an upload for `self` can be skipped because `previous` holds
    /// the same data: element-wise for numbers, identity for grids.
    pub fn same_as(&self, previous: &UniformValue) -> bool {
        match (self, previous) {
            (UniformValue::Scalar(a), UniformValue::Scalar(b)) => a == b,
            (UniformValue::Vec2(a), UniformValue::Vec2(b)) => a == b,
            (UniformValue::Vec3(a), UniformValue::Vec3(b)) => a == b,
            (UniformValue::Vec4(a), UniformValue::Vec4(b)) => a == b,
            (UniformValue::Mat3(a), UniformValue::Mat3(b)) => a == b,
            (UniformValue::Mat4(a), UniformValue::Mat4(b)) => a == b,
            (UniformValue::Grid(a), UniformValue::Grid(b)) => a.id() == b.id(),
            _ => false,
        }
    }

    pub fn as_grid(&self) -> Option<&Grid> {
        match self {
            UniformValue::Grid(grid) => Some(grid),
            _ => None,
        }
    }
}

/// Insertion-ordered name -> value map. Order is contractual: it defines
/// both the uniform buffer layout and texture slot assignment.
#[derive(Default)]
pub struct UniformBag {
    entries: Vec<(&'static str, UniformValue)>,
}

impl UniformBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: UniformValue) -> Self {
        self.entries.push((name, value));
        self
    }

    /// Replace an existing entry's value. The set of names is fixed after
    /// kernel construction; unknown names indicate a sequencing bug.
    pub fn set(&mut self, name: &str, value: UniformValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => panic!("unknown uniform {name:?}"),
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &UniformValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    /// Grid-valued entries, in slot order.
    pub fn grids(&self) -> impl Iterator<Item = (&'static str, &Grid)> {
        self.entries
            .iter()
            .filter_map(|(n, v)| v.as_grid().map(|g| (*n, g)))
    }

    /// Identity key of the referenced grids, in slot order.
    pub fn grid_ids(&self) -> Vec<GridId> {
        self.grids().map(|(_, g)| g.id()).collect()
    }
}

/// Resolved offset of one packed uniform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: &'static str,
    pub offset: u64,
}

/// Packed layout of a bag's non-texture values.
#[derive(Debug, Clone, Default)]
pub struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub size: u64,
}

impl UniformLayout {
    /// Resolve offsets for every non-texture entry, in insertion order,
    /// under WGSL uniform-class alignment rules. The total size is rounded
    /// up to 16 bytes, matching the WGSL struct's own alignment.
    pub fn resolve(bag: &UniformBag) -> Self {
        let mut fields = Vec::new();
        let mut cursor = 0u64;
        for (name, value) in bag.entries() {
            if value.as_grid().is_some() {
                continue;
            }
            let align = value.align();
            let offset = cursor.div_ceil(align) * align;
            fields.push(UniformField { name, offset });
            cursor = offset + value.size();
        }
        let size = cursor.div_ceil(16).max(1) * 16;
        Self { fields, size }
    }

    pub fn offset_of(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.offset)
    }
}
