//! The `#~` table stream.
//!
//! The stream comprises up to 45 tables adhering to the schemas of
//! ECMA-335 II.22. Column widths are not fixed: heap indices are 2 or 4
//! bytes depending on heap sizes, and table indices are 2 or 4 bytes
//! depending on the row count of the target table, so every table's
//! layout has to be computed before any row can be addressed.

use std::fmt;
use std::ops::{Index, IndexMut};

use scroll::Pread;

use super::raw;
use super::{MetadataError, MetadataErrorKind};

/// An enumeration of all ECMA-335 table types.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TableType {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    Field = 0x04,
    MethodDef = 0x06,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    Event = 0x14,
    PropertyMap = 0x15,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
    /// Placeholder for unused coded-index slots.
    DummyEmpty = 0x3F,
}

/// A column in a [`Table`].
#[derive(Debug, Default, Clone, Copy)]
struct Column {
    offset: usize,
    width: usize,
}

impl Column {
    fn end(self) -> usize {
        self.offset + self.width
    }
}

/// One table of the stream.
#[derive(Default, Clone, Copy)]
pub struct Table<'data> {
    /// The number of rows in the table.
    pub rows: usize,
    width: usize,
    columns: [Column; 6],
    contents: &'data [u8],
}

impl fmt::Debug for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .map(|c| c.width)
            .take_while(|w| *w > 0)
            .collect();
        f.debug_struct("Table")
            .field("rows", &self.rows)
            .field("schema", &widths)
            .finish()
    }
}

impl<'data> Table<'data> {
    /// Sets the table's column widths; a width of zero ends the schema.
    fn set_columns(&mut self, widths: [usize; 6]) {
        self.width = widths.iter().sum();
        let mut offset = 0;
        for (column, width) in self.columns.iter_mut().zip(widths) {
            column.offset = offset;
            column.width = width;
            offset = column.end();
        }
    }

    /// Claims the first `rows * width` bytes of `buf` as this table's
    /// contents.
    fn set_contents(&mut self, buf: &mut &'data [u8]) -> Result<(), MetadataError> {
        if self.rows == 0 {
            return Ok(());
        }
        let size = self.rows * self.width;
        if buf.len() < size {
            return Err(MetadataErrorKind::InsufficientTableData.into());
        }
        let (contents, rest) = buf.split_at(size);
        self.contents = contents;
        *buf = rest;
        Ok(())
    }

    /// Returns the bytes of the `idx`th row. Row indices are 1-based.
    pub fn row_bytes(&self, idx: usize) -> Option<&'data [u8]> {
        idx.checked_sub(1)
            .and_then(|idx| self.contents.get(idx * self.width..(idx + 1) * self.width))
    }
}

/// The sizes of the index encodings used by this stream.
///
/// Heap indices depend on the `heap_sizes` bit vector; table indices on
/// the row count of the target table; coded indices on the number of
/// target tables and the maximum row count among them.
#[derive(Debug, Clone)]
struct IndexSizes {
    string_heap: usize,
    guid_heap: usize,
    blob_heap: usize,

    assembly_ref: usize,
    event: usize,
    field: usize,
    generic_param: usize,
    method_def: usize,
    module_ref: usize,
    param: usize,
    property: usize,
    type_def: usize,

    type_def_or_ref: usize,
    has_constant: usize,
    has_custom_attribute: usize,
    has_field_marshal: usize,
    has_decl_security: usize,
    member_ref_parent: usize,
    has_semantics: usize,
    method_def_or_ref: usize,
    member_forwarded: usize,
    implementation: usize,
    custom_attribute_type: usize,
    resolution_scope: usize,
    type_or_method_def: usize,
}

/// Tables a `HasCustomAttribute` coded index can point to, in tag
/// order. ECMA-335 II.24.2.6.
pub const HAS_CUSTOM_ATTRIBUTE_TABLES: [TableType; 22] = [
    TableType::MethodDef,
    TableType::Field,
    TableType::TypeRef,
    TableType::TypeDef,
    TableType::Param,
    TableType::InterfaceImpl,
    TableType::MemberRef,
    TableType::Module,
    TableType::DeclSecurity,
    TableType::Property,
    TableType::Event,
    TableType::StandAloneSig,
    TableType::ModuleRef,
    TableType::TypeSpec,
    TableType::Assembly,
    TableType::AssemblyRef,
    TableType::File,
    TableType::ExportedType,
    TableType::ManifestResource,
    TableType::GenericParam,
    TableType::GenericParamConstraint,
    TableType::MethodSpec,
];

/// Tables a `CustomAttributeType` coded index can point to.
pub const CUSTOM_ATTRIBUTE_TYPE_TABLES: [TableType; 5] = [
    TableType::DummyEmpty,
    TableType::DummyEmpty,
    TableType::MethodDef,
    TableType::MemberRef,
    TableType::DummyEmpty,
];

/// Tables a `MemberRefParent` coded index can point to.
pub const MEMBER_REF_PARENT_TABLES: [TableType; 5] = [
    TableType::TypeDef,
    TableType::TypeRef,
    TableType::ModuleRef,
    TableType::MethodDef,
    TableType::TypeSpec,
];

/// Splits a coded index into its target table and 1-based row.
pub fn decode_coded_index(value: u32, tables: &[TableType]) -> Option<(TableType, usize)> {
    let bits = tag_bits(tables.len());
    let tag = (value & ((1 << bits) - 1)) as usize;
    let row = (value >> bits) as usize;
    let table = *tables.get(tag)?;
    if table == TableType::DummyEmpty || row == 0 {
        return None;
    }
    Some((table, row))
}

/// The number of bits necessary to distinguish `num_tables` targets,
/// equal to ceil(log₂(num_tables)).
fn tag_bits(num_tables: usize) -> u8 {
    let mut remaining = num_tables - 1;
    let mut bits = 1u8;
    loop {
        remaining >>= 1;
        if remaining == 0 {
            break;
        }
        bits += 1;
    }
    bits
}

/// The parsed `#~` stream.
#[derive(Clone)]
pub struct MetadataStream<'data> {
    #[allow(dead_code)]
    header: raw::TableStreamHeader,
    tables: [Table<'data>; 64],
}

impl fmt::Debug for MetadataStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStream")
            .field("assembly_rows", &self[TableType::Assembly].rows)
            .field(
                "custom_attribute_rows",
                &self[TableType::CustomAttribute].rows,
            )
            .finish()
    }
}

impl<'data> MetadataStream<'data> {
    /// Parses the `#~` stream.
    pub fn parse(buf: &'data [u8]) -> Result<Self, MetadataError> {
        let header: raw::TableStreamHeader = buf
            .pread_with(0, scroll::LE)
            .map_err(|e: scroll::Error| MetadataError::new(MetadataErrorKind::InvalidHeader, e))?;

        let mut offset = raw::TABLE_STREAM_HEADER_SIZE;
        let mut tables = [Table::default(); 64];
        for (i, table) in tables.iter_mut().enumerate() {
            if (header.valid_tables >> i) & 1 == 0 {
                continue;
            }
            let rows: u32 = buf.pread_with(offset, scroll::LE).map_err(
                |e: scroll::Error| MetadataError::new(MetadataErrorKind::InvalidLength, e),
            )?;
            offset += 4;
            table.rows = rows as usize;
        }

        let mut result = MetadataStream { header, tables };
        result.set_columns();

        let mut contents = buf
            .get(offset..)
            .ok_or(MetadataErrorKind::InsufficientTableData)?;
        for i in 0..result.tables.len() {
            result.tables[i].set_contents(&mut contents)?;
        }

        Ok(result)
    }

    /// Reads the `(row, col)` cell in the given table as a `u32`. Row
    /// and column indices are 1-based.
    pub fn get_cell_u32(
        &self,
        table: TableType,
        row: usize,
        col: usize,
    ) -> Result<u32, MetadataError> {
        let row_bytes = self[table]
            .row_bytes(row)
            .ok_or(MetadataErrorKind::RowIndexOutOfBounds)?;
        let column = self[table]
            .columns
            .get(col.wrapping_sub(1))
            .copied()
            .ok_or(MetadataErrorKind::ColIndexOutOfBounds)?;

        match column.width {
            1 => Ok(row_bytes[column.offset] as u32),
            2 => {
                let bytes = &row_bytes[column.offset..column.end()];
                Ok(u16::from_le_bytes(bytes.try_into().unwrap()) as u32)
            }
            4 => {
                let bytes = &row_bytes[column.offset..column.end()];
                Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            _ => Err(MetadataErrorKind::ColIndexOutOfBounds.into()),
        }
    }

    fn table_index_size(&self, table: TableType) -> usize {
        if self[table].rows >= u16::MAX as usize {
            4
        } else {
            2
        }
    }

    /// Size in bytes of an index into any of `tables`, depending on the
    /// number of tables (tag bits) and the maximum row count among them.
    fn coded_index_size(&self, tables: &[TableType]) -> usize {
        let bits = tag_bits(tables.len());
        let max_rows = tables
            .iter()
            .filter(|t| **t != TableType::DummyEmpty)
            .map(|t| self[*t].rows)
            .max()
            .unwrap_or(0);
        if (max_rows as u64) < (1u64 << (16 - bits)) {
            2
        } else {
            4
        }
    }

    fn index_sizes(&self) -> IndexSizes {
        use TableType::*;
        IndexSizes {
            string_heap: if self.header.heap_sizes & 0x1 == 0 { 2 } else { 4 },
            guid_heap: if self.header.heap_sizes & 0x2 == 0 { 2 } else { 4 },
            blob_heap: if self.header.heap_sizes & 0x4 == 0 { 2 } else { 4 },
            assembly_ref: self.table_index_size(AssemblyRef),
            event: self.table_index_size(Event),
            field: self.table_index_size(Field),
            generic_param: self.table_index_size(GenericParam),
            method_def: self.table_index_size(MethodDef),
            module_ref: self.table_index_size(ModuleRef),
            param: self.table_index_size(Param),
            property: self.table_index_size(Property),
            type_def: self.table_index_size(TypeDef),
            type_def_or_ref: self.coded_index_size(&[TypeDef, TypeRef, TypeSpec]),
            has_constant: self.coded_index_size(&[Field, Param, Property]),
            has_custom_attribute: self.coded_index_size(&HAS_CUSTOM_ATTRIBUTE_TABLES),
            has_field_marshal: self.coded_index_size(&[Field, Param]),
            has_decl_security: self.coded_index_size(&[TypeDef, MethodDef, Assembly]),
            member_ref_parent: self.coded_index_size(&MEMBER_REF_PARENT_TABLES),
            has_semantics: self.coded_index_size(&[Event, Property]),
            method_def_or_ref: self.coded_index_size(&[MethodDef, MemberRef]),
            member_forwarded: self.coded_index_size(&[Field, MethodDef]),
            implementation: self.coded_index_size(&[File, AssemblyRef, ExportedType]),
            custom_attribute_type: self.coded_index_size(&CUSTOM_ATTRIBUTE_TYPE_TABLES),
            resolution_scope: self.coded_index_size(&[Module, ModuleRef, AssemblyRef, TypeRef]),
            type_or_method_def: self.coded_index_size(&[TypeDef, MethodDef]),
        }
    }

    fn set_columns(&mut self) {
        use TableType::*;
        let sizes = self.index_sizes();

        self[Module].set_columns([
            2,
            sizes.string_heap,
            sizes.guid_heap,
            sizes.guid_heap,
            sizes.guid_heap,
            0,
        ]);
        self[TypeRef].set_columns([
            sizes.resolution_scope,
            sizes.string_heap,
            sizes.string_heap,
            0,
            0,
            0,
        ]);
        self[TypeDef].set_columns([
            4,
            sizes.string_heap,
            sizes.string_heap,
            sizes.type_def_or_ref,
            sizes.field,
            sizes.method_def,
        ]);
        self[Field].set_columns([2, sizes.string_heap, sizes.blob_heap, 0, 0, 0]);
        self[MethodDef].set_columns([
            4,
            2,
            2,
            sizes.string_heap,
            sizes.blob_heap,
            sizes.param,
        ]);
        self[Param].set_columns([2, 2, sizes.string_heap, 0, 0, 0]);
        self[InterfaceImpl].set_columns([sizes.type_def, sizes.type_def_or_ref, 0, 0, 0, 0]);
        self[MemberRef].set_columns([
            sizes.member_ref_parent,
            sizes.string_heap,
            sizes.blob_heap,
            0,
            0,
            0,
        ]);
        self[Constant].set_columns([2, sizes.has_constant, sizes.blob_heap, 0, 0, 0]);
        self[CustomAttribute].set_columns([
            sizes.has_custom_attribute,
            sizes.custom_attribute_type,
            sizes.blob_heap,
            0,
            0,
            0,
        ]);
        self[FieldMarshal].set_columns([sizes.has_field_marshal, sizes.blob_heap, 0, 0, 0, 0]);
        self[DeclSecurity].set_columns([2, sizes.has_decl_security, sizes.blob_heap, 0, 0, 0]);
        self[ClassLayout].set_columns([2, 4, sizes.type_def, 0, 0, 0]);
        self[FieldLayout].set_columns([4, sizes.field, 0, 0, 0, 0]);
        self[StandAloneSig].set_columns([sizes.blob_heap, 0, 0, 0, 0, 0]);
        self[EventMap].set_columns([sizes.type_def, sizes.event, 0, 0, 0, 0]);
        self[Event].set_columns([2, sizes.string_heap, sizes.type_def_or_ref, 0, 0, 0]);
        self[PropertyMap].set_columns([sizes.type_def, sizes.property, 0, 0, 0, 0]);
        self[Property].set_columns([2, sizes.string_heap, sizes.blob_heap, 0, 0, 0]);
        self[MethodSemantics].set_columns([2, sizes.method_def, sizes.has_semantics, 0, 0, 0]);
        self[MethodImpl].set_columns([
            sizes.type_def,
            sizes.method_def_or_ref,
            sizes.method_def_or_ref,
            0,
            0,
            0,
        ]);
        self[ModuleRef].set_columns([sizes.string_heap, 0, 0, 0, 0, 0]);
        self[TypeSpec].set_columns([sizes.blob_heap, 0, 0, 0, 0, 0]);
        self[ImplMap].set_columns([
            2,
            sizes.member_forwarded,
            sizes.string_heap,
            sizes.module_ref,
            0,
            0,
        ]);
        self[FieldRva].set_columns([4, sizes.field, 0, 0, 0, 0]);
        self[Assembly].set_columns([
            4,
            8,
            4,
            sizes.blob_heap,
            sizes.string_heap,
            sizes.string_heap,
        ]);
        self[AssemblyProcessor].set_columns([4, 0, 0, 0, 0, 0]);
        self[AssemblyOs].set_columns([4, 4, 4, 0, 0, 0]);
        self[AssemblyRef].set_columns([
            8,
            4,
            sizes.blob_heap,
            sizes.string_heap,
            sizes.string_heap,
            sizes.blob_heap,
        ]);
        self[AssemblyRefProcessor].set_columns([4, sizes.assembly_ref, 0, 0, 0, 0]);
        self[AssemblyRefOs].set_columns([4, 4, 4, sizes.assembly_ref, 0, 0]);
        self[File].set_columns([4, sizes.string_heap, sizes.blob_heap, 0, 0, 0]);
        self[ExportedType].set_columns([
            4,
            4,
            sizes.string_heap,
            sizes.string_heap,
            sizes.implementation,
            0,
        ]);
        self[ManifestResource].set_columns([
            4,
            4,
            sizes.string_heap,
            sizes.implementation,
            0,
            0,
        ]);
        self[NestedClass].set_columns([sizes.type_def, sizes.type_def, 0, 0, 0, 0]);
        self[GenericParam].set_columns([
            2,
            2,
            sizes.type_or_method_def,
            sizes.string_heap,
            0,
            0,
        ]);
        self[MethodSpec].set_columns([sizes.method_def_or_ref, sizes.blob_heap, 0, 0, 0, 0]);
        self[GenericParamConstraint].set_columns([
            sizes.generic_param,
            sizes.type_def_or_ref,
            0,
            0,
            0,
            0,
        ]);
    }
}

impl<'data> Index<TableType> for MetadataStream<'data> {
    type Output = Table<'data>;

    fn index(&self, index: TableType) -> &Self::Output {
        &self.tables[index as usize]
    }
}

impl IndexMut<TableType> for MetadataStream<'_> {
    fn index_mut(&mut self, index: TableType) -> &mut Self::Output {
        &mut self.tables[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_bits() {
        assert_eq!(tag_bits(2), 1);
        assert_eq!(tag_bits(3), 2);
        assert_eq!(tag_bits(5), 3);
        assert_eq!(tag_bits(22), 5);
    }

    #[test]
    fn test_decode_coded_index() {
        // tag 14 = Assembly, row 1, 5 tag bits
        let value = (1 << 5) | 14;
        let (table, row) = decode_coded_index(value, &HAS_CUSTOM_ATTRIBUTE_TABLES).unwrap();
        assert_eq!(table, TableType::Assembly);
        assert_eq!(row, 1);

        // tag 3 = MemberRef in CustomAttributeType, 3 tag bits
        let value = (7 << 3) | 3;
        let (table, row) = decode_coded_index(value, &CUSTOM_ATTRIBUTE_TYPE_TABLES).unwrap();
        assert_eq!(table, TableType::MemberRef);
        assert_eq!(row, 7);

        // unused tag slots decode to nothing
        assert!(decode_coded_index(1 << 3, &CUSTOM_ATTRIBUTE_TYPE_TABLES).is_none());
    }
}
