//! Sparse array schema description handed to the storage engine.

/// Cell datatype of a dimension or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Datatype {
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// ASCII string (always variable-length).
    StringAscii,
    /// Single byte character.
    Char,
    /// Opaque bytes.
    Blob,
}

impl Datatype {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            Datatype::Int32 | Datatype::UInt32 => 4,
            Datatype::UInt64 => 8,
            Datatype::StringAscii | Datatype::Char | Datatype::Blob => 1,
        }
    }

    /// Whether values of this type are variable-length.
    pub fn is_var(self) -> bool {
        matches!(self, Datatype::StringAscii)
    }
}

/// Checksum filter appended to every filter pipeline when requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChecksumKind {
    /// MD5 checksum.
    Md5,
    /// SHA-256 checksum.
    Sha256,
}

/// One stage of a filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Gzip compression at the given level.
    Gzip {
        /// Compression level.
        level: i32,
    },
    /// Double-delta encoding.
    DoubleDelta,
    /// Checksum verification.
    Checksum(ChecksumKind),
}

/// Ordered filter pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterList(Vec<FilterKind>);

impl FilterList {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a filter.
    pub fn with(mut self, filter: FilterKind) -> Self {
        self.0.push(filter);
        self
    }

    /// Append a checksum filter when one is configured.
    pub fn with_checksum(self, checksum: Option<ChecksumKind>) -> Self {
        match checksum {
            Some(kind) => self.with(FilterKind::Checksum(kind)),
            None => self,
        }
    }

    /// Filters in pipeline order.
    pub fn filters(&self) -> &[FilterKind] {
        &self.0
    }
}

/// Sparse array dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    /// Dimension name.
    pub name: String,
    /// Coordinate datatype.
    pub datatype: Datatype,
}

impl Dimension {
    /// Construct a dimension.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }
}

/// Array attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Element datatype.
    pub datatype: Datatype,
    /// Variable number of elements per cell.
    pub var_len: bool,
    /// Cells may be null.
    pub nullable: bool,
    /// Filter pipeline for the attribute data.
    pub filters: FilterList,
}

impl Attribute {
    /// Fixed-width, non-nullable attribute.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            var_len: datatype.is_var(),
            datatype,
            nullable: false,
            filters: FilterList::new(),
        }
    }

    /// Mark the attribute variable-length.
    pub fn var(mut self) -> Self {
        self.var_len = true;
        self
    }

    /// Mark the attribute nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the attribute filter pipeline.
    pub fn with_filters(mut self, filters: FilterList) -> Self {
        self.filters = filters;
        self
    }
}

/// Layout information for a named field (dimension or attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Element datatype.
    pub datatype: Datatype,
    /// Variable number of elements per cell.
    pub var_len: bool,
    /// Cells may be null.
    pub nullable: bool,
    /// Field is a dimension.
    pub is_dimension: bool,
}

/// Sparse array schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArraySchema {
    /// Dimensions in domain order.
    pub dimensions: Vec<Dimension>,
    /// Attributes.
    pub attributes: Vec<Attribute>,
    /// Whether duplicate coordinates are allowed.
    pub allows_dups: bool,
    /// Filter pipeline for coordinates.
    pub coords_filters: FilterList,
    /// Filter pipeline for offsets of variable-length fields.
    pub offsets_filters: FilterList,
}

impl ArraySchema {
    /// Empty sparse schema.
    pub fn sparse() -> Self {
        Self::default()
    }

    /// Add a dimension.
    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Allow duplicate coordinates.
    pub fn with_allows_dups(mut self, allows_dups: bool) -> Self {
        self.allows_dups = allows_dups;
        self
    }

    /// Set the coordinate filters.
    pub fn with_coords_filters(mut self, filters: FilterList) -> Self {
        self.coords_filters = filters;
        self
    }

    /// Set the offsets filters.
    pub fn with_offsets_filters(mut self, filters: FilterList) -> Self {
        self.offsets_filters = filters;
        self
    }

    /// Field names, dimensions first.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.attributes.iter().map(|a| a.name.as_str()))
    }

    /// Layout of a field, if the schema declares it.
    pub fn field_info(&self, name: &str) -> Option<FieldInfo> {
        if let Some(dim) = self.dimensions.iter().find(|d| d.name == name) {
            return Some(FieldInfo {
                datatype: dim.datatype,
                var_len: dim.datatype.is_var(),
                nullable: false,
                is_dimension: true,
            });
        }
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|attr| FieldInfo {
                datatype: attr.datatype,
                var_len: attr.var_len,
                nullable: attr.nullable,
                is_dimension: false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_covers_dimensions_and_attributes() {
        let schema = ArraySchema::sparse()
            .with_dimension(Dimension::new("contig", Datatype::StringAscii))
            .with_dimension(Dimension::new("pos", Datatype::Int32))
            .with_attribute(Attribute::new("ac", Datatype::Int32).nullable());

        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["contig", "pos", "ac"]);
        let contig = schema.field_info("contig").unwrap();
        assert!(contig.var_len && contig.is_dimension);
        let ac = schema.field_info("ac").unwrap();
        assert!(ac.nullable && !ac.var_len && !ac.is_dimension);
        assert!(schema.field_info("missing").is_none());
    }

    #[test]
    fn checksum_is_appended_last() {
        let filters = FilterList::new()
            .with(FilterKind::DoubleDelta)
            .with(FilterKind::Gzip { level: 9 })
            .with_checksum(Some(ChecksumKind::Sha256));
        assert_eq!(filters.filters().last(), Some(&FilterKind::Checksum(ChecksumKind::Sha256)));
        assert_eq!(FilterList::new().with_checksum(None).filters().len(), 0);
    }
}
