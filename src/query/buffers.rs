use std::collections::HashMap;

use bitvec::prelude::*;

use super::{AttributeResultSize, ReadError};
use crate::store::{ArraySchema, CellValue, Datatype, FieldInfo};

/// Shape of a result buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferShape {
    /// One offset per cell into the data buffer.
    pub var_len: bool,
    /// Multi-valued cells: one list offset per cell into the offsets buffer.
    pub list: bool,
    /// One validity bit per cell.
    pub nullable: bool,
}

impl BufferShape {
    /// Fixed-width values.
    pub fn fixed() -> Self {
        Self::default()
    }

    /// Variable-length values.
    pub fn var() -> Self {
        Self {
            var_len: true,
            ..Self::default()
        }
    }

    /// Lists of variable-length values.
    pub fn list() -> Self {
        Self {
            var_len: true,
            list: true,
            nullable: false,
        }
    }

    /// Add a validity bitmap.
    pub fn with_nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn from_field(info: FieldInfo) -> Self {
        Self {
            var_len: info.var_len,
            list: false,
            nullable: info.nullable,
        }
    }
}

/// Result buffer for one attribute of a paginated read.
///
/// Capacities bound how much a single query step may write; reaching either
/// of them makes the step incomplete.
#[derive(Debug, Clone)]
pub struct AttributeBuffer {
    name: String,
    datatype: Datatype,
    shape: BufferShape,
    data: Vec<u8>,
    offsets: Vec<u64>,
    list_offsets: Vec<u64>,
    validity: BitVec,
    data_capacity: usize,
    cell_capacity: usize,
    cells: usize,
}

impl AttributeBuffer {
    /// Create a buffer holding at most `data_capacity` bytes of values and
    /// `cell_capacity` cells.
    pub fn new(
        name: impl Into<String>,
        datatype: Datatype,
        shape: BufferShape,
        data_capacity: usize,
        cell_capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            datatype,
            shape,
            data: Vec::with_capacity(data_capacity),
            offsets: Vec::new(),
            list_offsets: Vec::new(),
            validity: BitVec::new(),
            data_capacity,
            cell_capacity,
            cells: 0,
        }
    }

    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Buffer shape.
    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    /// Cells written by the last step.
    pub fn cells(&self) -> usize {
        self.cells
    }

    /// Value bytes written by the last step.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Value offsets written by the last step.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// List offsets written by the last step.
    pub fn list_offsets(&self) -> &[u64] {
        &self.list_offsets
    }

    /// Validity bits written by the last step.
    pub fn validity(&self) -> &BitSlice {
        self.validity.as_bitslice()
    }

    /// Maximum value bytes per step.
    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    /// Maximum cells per step.
    pub fn cell_capacity(&self) -> usize {
        self.cell_capacity
    }

    /// Bytes reserved across data, offsets, list offsets and validity buffers.
    pub fn reserved_bytes(&self) -> usize {
        let mut total = self.data_capacity;
        if self.shape.var_len {
            total += self.cell_capacity * std::mem::size_of::<u64>();
        }
        if self.shape.list {
            total += self.cell_capacity * std::mem::size_of::<u64>();
        }
        if self.shape.nullable {
            total += self.cell_capacity.div_ceil(8);
        }
        total
    }

    /// Element counts written by the last step.
    pub fn result_size(&self) -> AttributeResultSize {
        let elements = (self.data.len() / self.datatype.size()) as u64;
        if self.shape.var_len {
            AttributeResultSize::new(self.offsets.len() as u64, elements)
        } else {
            AttributeResultSize::new(0, elements)
        }
    }

    /// Forget the last step's results, keeping the allocations.
    pub fn clear(&mut self) {
        self.data.clear();
        self.offsets.clear();
        self.list_offsets.clear();
        self.validity.clear();
        self.cells = 0;
    }

    fn encoded_len(&self, value: &CellValue) -> usize {
        match value {
            CellValue::Null => {
                if self.shape.var_len {
                    0
                } else {
                    self.datatype.size()
                }
            }
            CellValue::Int(_) => self.datatype.size(),
            CellValue::Bytes(bytes) if self.shape.var_len => bytes.len(),
            CellValue::Bytes(_) => self.datatype.size(),
            CellValue::List(items) => items.iter().map(Vec::len).sum(),
        }
    }

    /// Whether one more cell holding `value` fits.
    pub fn fits(&self, value: &CellValue) -> bool {
        self.cells < self.cell_capacity
            && self.data.len() + self.encoded_len(value) <= self.data_capacity
    }

    /// Append a cell; callers check [`fits`](Self::fits) first.
    pub fn push(&mut self, value: &CellValue) {
        if self.shape.nullable {
            self.validity.push(!matches!(value, CellValue::Null));
        }
        if self.shape.list {
            self.list_offsets.push(self.offsets.len() as u64);
            match value {
                CellValue::List(items) => {
                    for item in items {
                        self.offsets.push(self.data.len() as u64);
                        self.data.extend_from_slice(item);
                    }
                }
                CellValue::Bytes(bytes) => {
                    self.offsets.push(self.data.len() as u64);
                    self.data.extend_from_slice(bytes);
                }
                CellValue::Int(_) | CellValue::Null => {}
            }
        } else if self.shape.var_len {
            self.offsets.push(self.data.len() as u64);
            match value {
                CellValue::Bytes(bytes) => self.data.extend_from_slice(bytes),
                CellValue::List(items) => items.iter().for_each(|i| self.data.extend_from_slice(i)),
                CellValue::Int(v) => self.push_fixed(*v),
                CellValue::Null => {}
            }
        } else {
            match value {
                CellValue::Int(v) => self.push_fixed(*v),
                CellValue::Bytes(bytes) => {
                    let mut padded = vec![0u8; self.datatype.size()];
                    let n = bytes.len().min(padded.len());
                    padded[..n].copy_from_slice(&bytes[..n]);
                    self.data.extend_from_slice(&padded);
                }
                CellValue::List(_) | CellValue::Null => self.push_fixed(0),
            }
        }
        self.cells += 1;
    }

    fn push_fixed(&mut self, value: i64) {
        let bytes = value.to_le_bytes();
        self.data.extend_from_slice(&bytes[..self.datatype.size()]);
    }

    /// Whether a cell of the last step is non-null.
    pub fn is_valid(&self, cell: usize) -> bool {
        if !self.shape.nullable {
            return cell < self.cells;
        }
        self.validity.get(cell).map(|bit| *bit).unwrap_or(false)
    }

    /// Fixed-width integer value of a cell.
    pub fn int_value(&self, cell: usize) -> Option<i64> {
        if self.shape.var_len || cell >= self.cells {
            return None;
        }
        let size = self.datatype.size();
        let bytes = self.data.get(cell * size..(cell + 1) * size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(bytes);
        let raw = i64::from_le_bytes(buf);
        Some(match self.datatype {
            Datatype::Int32 => raw as u32 as i32 as i64,
            _ => raw,
        })
    }

    /// Variable-length bytes of a cell.
    pub fn var_value(&self, cell: usize) -> Option<&[u8]> {
        if !self.shape.var_len || self.shape.list {
            return None;
        }
        Self::slice(&self.data, &self.offsets, cell)
    }

    /// Values of a multi-valued cell.
    pub fn list_value(&self, cell: usize) -> Option<Vec<&[u8]>> {
        if !self.shape.list {
            return None;
        }
        let first = *self.list_offsets.get(cell)? as usize;
        let last = self
            .list_offsets
            .get(cell + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.offsets.len());
        (first..last)
            .map(|idx| Self::slice(&self.data, &self.offsets, idx))
            .collect()
    }

    fn slice<'a>(data: &'a [u8], offsets: &[u64], idx: usize) -> Option<&'a [u8]> {
        let start = *offsets.get(idx)? as usize;
        let end = offsets
            .get(idx + 1)
            .map(|&o| o as usize)
            .unwrap_or(data.len());
        data.get(start..end)
    }

    /// Multiply both capacities by `factor`, failing past `limit` data bytes.
    pub fn grow(&mut self, factor: usize, limit: usize) -> Result<(), ReadError> {
        let factor = factor.max(2);
        let requested = self.data_capacity.max(1).saturating_mul(factor);
        if requested > limit {
            return Err(ReadError::BufferLimit {
                attribute: self.name.clone(),
                requested,
                limit,
            });
        }
        self.data_capacity = requested;
        self.cell_capacity = self.cell_capacity.max(1).saturating_mul(factor);
        self.data.reserve(requested.saturating_sub(self.data.capacity()));
        Ok(())
    }
}

/// Result buffers of a read query, one per requested attribute.
#[derive(Debug, Clone, Default)]
pub struct ReadBuffers {
    buffers: Vec<AttributeBuffer>,
}

impl ReadBuffers {
    /// Empty buffer set.
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }

    /// Allocate buffers for `fields`, splitting `memory_budget` bytes evenly.
    ///
    /// Variable-length fields give half of their share to offsets.
    pub fn with_budget(
        schema: &ArraySchema,
        fields: &[&str],
        memory_budget: usize,
    ) -> Result<Self, ReadError> {
        if fields.is_empty() {
            return Err(ReadError::InvalidConfiguration(
                "no attributes requested".to_string(),
            ));
        }
        let share = memory_budget / fields.len();
        let mut buffers = Self::new();
        for &field in fields {
            let info = schema
                .field_info(field)
                .ok_or_else(|| ReadError::UnknownAttribute(field.to_string()))?;
            let shape = BufferShape::from_field(info);
            let (data_capacity, cell_capacity) = if shape.var_len {
                (share / 2, (share / 2) / std::mem::size_of::<u64>())
            } else {
                (share, share / info.datatype.size())
            };
            if cell_capacity == 0 {
                return Err(ReadError::InvalidConfiguration(format!(
                    "memory budget of {memory_budget} bytes too small for {} attributes",
                    fields.len()
                )));
            }
            buffers.add(AttributeBuffer::new(
                field,
                info.datatype,
                shape,
                data_capacity,
                cell_capacity,
            ));
        }
        Ok(buffers)
    }

    /// Add (or replace) a buffer.
    pub fn add(&mut self, buffer: AttributeBuffer) {
        match self.buffers.iter_mut().find(|b| b.name == buffer.name) {
            Some(existing) => *existing = buffer,
            None => self.buffers.push(buffer),
        }
    }

    /// Buffer of an attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }

    /// Mutable buffer of an attribute.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut AttributeBuffer> {
        self.buffers.iter_mut().find(|b| b.name == name)
    }

    /// Buffers in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeBuffer> {
        self.buffers.iter()
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are attached.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Cells written by the last step (the same for every buffer).
    pub fn cells(&self) -> usize {
        self.buffers.first().map(AttributeBuffer::cells).unwrap_or(0)
    }

    /// Forget the last step's results in every buffer.
    pub fn clear_results(&mut self) {
        self.buffers.iter_mut().for_each(AttributeBuffer::clear);
    }

    /// Grow every buffer.
    pub fn grow_all(&mut self, factor: usize, limit: usize) -> Result<(), ReadError> {
        self.buffers
            .iter_mut()
            .try_for_each(|buffer| buffer.grow(factor, limit))
    }

    /// Bytes reserved across all buffers.
    pub fn reserved_bytes(&self) -> usize {
        self.buffers.iter().map(AttributeBuffer::reserved_bytes).sum()
    }

    /// Element counts of the last step, keyed by attribute name.
    pub fn result_sizes(&self) -> HashMap<String, AttributeResultSize> {
        self.buffers
            .iter()
            .map(|b| (b.name.clone(), b.result_size()))
            .collect()
    }
}
