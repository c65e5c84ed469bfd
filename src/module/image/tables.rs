//! Table schema of the `#~` stream (ECMA-335 II.22, Portable PDB tables 0x30 - 0x37).
//!
//! Rows are kept as raw column values: heap offsets, 1-based row indexes and coded indexes
//! exactly as stored. Column widths depend on the row counts of the referenced tables and on
//! the heap sizes, which [`TableInfo`] computes the same way for reading and writing.

use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::Result;

/// Metadata table identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
#[repr(u8)]
pub(crate) enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
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
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
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
    Document = 0x30,
    MethodDebugInformation = 0x31,
    LocalScope = 0x32,
    LocalVariable = 0x33,
    LocalConstant = 0x34,
    ImportScope = 0x35,
    StateMachineMethod = 0x36,
    CustomDebugInformation = 0x37,
}

/// Number of bits in the `Valid` and `Sorted` masks.
pub(crate) const MAX_TABLES: usize = 64;

/// Tables that must be sorted by their primary key column.
pub(crate) const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// Indirection and edit-and-continue tables; only produced by unoptimized compilers.
pub(crate) const UNSUPPORTED_TABLES: [TableId; 7] = [
    TableId::FieldPtr,
    TableId::MethodPtr,
    TableId::ParamPtr,
    TableId::EventPtr,
    TableId::PropertyPtr,
    TableId::EncLog,
    TableId::EncMap,
];

impl TableId {
    /// The table with the given number, if it is known.
    pub fn from_number(number: usize) -> Option<TableId> {
        TableId::iter().find(|id| *id as usize == number)
    }

    /// Index of the table within [`TableId::iter`] order.
    pub fn position(self) -> usize {
        TableId::iter().position(|candidate| candidate == self).unwrap_or(0)
    }

    /// Column layout of the table's rows.
    pub fn columns(self) -> &'static [Column] {
        use Column::{Blob, Coded, Guid, Index, Str, U16, U32};
        use TableId as T;
        match self {
            // Generation, Name, Mvid, EncId, EncBaseId
            T::Module => &[U16, Str, Guid, Guid, Guid],
            // ResolutionScope, TypeName, TypeNamespace
            T::TypeRef => &[Coded(CodedIndex::ResolutionScope), Str, Str],
            // Flags, TypeName, TypeNamespace, Extends, FieldList, MethodList
            T::TypeDef => &[
                U32,
                Str,
                Str,
                Coded(CodedIndex::TypeDefOrRef),
                Index(T::Field),
                Index(T::MethodDef),
            ],
            T::FieldPtr => &[Index(T::Field)],
            // Flags, Name, Signature
            T::Field => &[U16, Str, Blob],
            T::MethodPtr => &[Index(T::MethodDef)],
            // RVA, ImplFlags, Flags, Name, Signature, ParamList
            T::MethodDef => &[U32, U16, U16, Str, Blob, Index(T::Param)],
            T::ParamPtr => &[Index(T::Param)],
            // Flags, Sequence, Name
            T::Param => &[U16, U16, Str],
            // Class, Interface
            T::InterfaceImpl => &[Index(T::TypeDef), Coded(CodedIndex::TypeDefOrRef)],
            // Class, Name, Signature
            T::MemberRef => &[Coded(CodedIndex::MemberRefParent), Str, Blob],
            // Type (plus padding byte), Parent, Value
            T::Constant => &[U16, Coded(CodedIndex::HasConstant), Blob],
            // Parent, Type, Value
            T::CustomAttribute => &[
                Coded(CodedIndex::HasCustomAttribute),
                Coded(CodedIndex::CustomAttributeType),
                Blob,
            ],
            // Parent, NativeType
            T::FieldMarshal => &[Coded(CodedIndex::HasFieldMarshal), Blob],
            // Action, Parent, PermissionSet
            T::DeclSecurity => &[U16, Coded(CodedIndex::HasDeclSecurity), Blob],
            // PackingSize, ClassSize, Parent
            T::ClassLayout => &[U16, U32, Index(T::TypeDef)],
            // Offset, Field
            T::FieldLayout => &[U32, Index(T::Field)],
            T::StandAloneSig => &[Blob],
            // Parent, EventList
            T::EventMap => &[Index(T::TypeDef), Index(T::Event)],
            T::EventPtr => &[Index(T::Event)],
            // EventFlags, Name, EventType
            T::Event => &[U16, Str, Coded(CodedIndex::TypeDefOrRef)],
            // Parent, PropertyList
            T::PropertyMap => &[Index(T::TypeDef), Index(T::Property)],
            T::PropertyPtr => &[Index(T::Property)],
            // Flags, Name, Type
            T::Property => &[U16, Str, Blob],
            // Semantics, Method, Association
            T::MethodSemantics => &[U16, Index(T::MethodDef), Coded(CodedIndex::HasSemantics)],
            // Class, MethodBody, MethodDeclaration
            T::MethodImpl => &[
                Index(T::TypeDef),
                Coded(CodedIndex::MethodDefOrRef),
                Coded(CodedIndex::MethodDefOrRef),
            ],
            T::ModuleRef => &[Str],
            T::TypeSpec => &[Blob],
            // MappingFlags, MemberForwarded, ImportName, ImportScope
            T::ImplMap => &[
                U16,
                Coded(CodedIndex::MemberForwarded),
                Str,
                Index(T::ModuleRef),
            ],
            // RVA, Field
            T::FieldRva => &[U32, Index(T::Field)],
            T::EncLog => &[U32, U32],
            T::EncMap => &[U32],
            // HashAlgId, Major, Minor, Build, Revision, Flags, PublicKey, Name, Culture
            T::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
            T::AssemblyProcessor => &[U32],
            T::AssemblyOs => &[U32, U32, U32],
            // Major, Minor, Build, Revision, Flags, PublicKeyOrToken, Name, Culture, HashValue
            T::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
            T::AssemblyRefProcessor => &[U32, Index(T::AssemblyRef)],
            T::AssemblyRefOs => &[U32, U32, U32, Index(T::AssemblyRef)],
            // Flags, Name, HashValue
            T::File => &[U32, Str, Blob],
            // Flags, TypeDefId, TypeName, TypeNamespace, Implementation
            T::ExportedType => &[U32, U32, Str, Str, Coded(CodedIndex::Implementation)],
            // Offset, Flags, Name, Implementation
            T::ManifestResource => &[U32, U32, Str, Coded(CodedIndex::Implementation)],
            // NestedClass, EnclosingClass
            T::NestedClass => &[Index(T::TypeDef), Index(T::TypeDef)],
            // Number, Flags, Owner, Name
            T::GenericParam => &[U16, U16, Coded(CodedIndex::TypeOrMethodDef), Str],
            // Method, Instantiation
            T::MethodSpec => &[Coded(CodedIndex::MethodDefOrRef), Blob],
            // Owner, Constraint
            T::GenericParamConstraint => {
                &[Index(T::GenericParam), Coded(CodedIndex::TypeDefOrRef)]
            }
            // Name, HashAlgorithm, Hash, Language
            T::Document => &[Blob, Guid, Blob, Guid],
            // Document, SequencePoints
            T::MethodDebugInformation => &[Index(T::Document), Blob],
            // Method, ImportScope, VariableList, ConstantList, StartOffset, Length
            T::LocalScope => &[
                Index(T::MethodDef),
                Index(T::ImportScope),
                Index(T::LocalVariable),
                Index(T::LocalConstant),
                U32,
                U32,
            ],
            // Attributes, Index, Name
            T::LocalVariable => &[U16, U16, Str],
            // Name, Signature
            T::LocalConstant => &[Str, Blob],
            // Parent, Imports
            T::ImportScope => &[Index(T::ImportScope), Blob],
            // MoveNextMethod, KickoffMethod
            T::StateMachineMethod => &[Index(T::MethodDef), Index(T::MethodDef)],
            // Parent, Kind, Value
            T::CustomDebugInformation => &[
                Coded(CodedIndex::HasCustomDebugInformation),
                Guid,
                Blob,
            ],
        }
    }
}

/// Storage class of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

/// Coded index kinds (ECMA-335 II.24.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
    HasCustomDebugInformation,
}

impl CodedIndex {
    /// Tables addressed by each tag value; `None` marks unused tags.
    pub fn tables(self) -> &'static [Option<TableId>] {
        use TableId as T;
        match self {
            CodedIndex::TypeDefOrRef => &[Some(T::TypeDef), Some(T::TypeRef), Some(T::TypeSpec)],
            CodedIndex::HasConstant => &[Some(T::Field), Some(T::Param), Some(T::Property)],
            CodedIndex::HasCustomAttribute => &[
                Some(T::MethodDef),
                Some(T::Field),
                Some(T::TypeRef),
                Some(T::TypeDef),
                Some(T::Param),
                Some(T::InterfaceImpl),
                Some(T::MemberRef),
                Some(T::Module),
                Some(T::DeclSecurity),
                Some(T::Property),
                Some(T::Event),
                Some(T::StandAloneSig),
                Some(T::ModuleRef),
                Some(T::TypeSpec),
                Some(T::Assembly),
                Some(T::AssemblyRef),
                Some(T::File),
                Some(T::ExportedType),
                Some(T::ManifestResource),
                Some(T::GenericParam),
                Some(T::GenericParamConstraint),
                Some(T::MethodSpec),
            ],
            CodedIndex::HasFieldMarshal => &[Some(T::Field), Some(T::Param)],
            CodedIndex::HasDeclSecurity => {
                &[Some(T::TypeDef), Some(T::MethodDef), Some(T::Assembly)]
            }
            CodedIndex::MemberRefParent => &[
                Some(T::TypeDef),
                Some(T::TypeRef),
                Some(T::ModuleRef),
                Some(T::MethodDef),
                Some(T::TypeSpec),
            ],
            CodedIndex::HasSemantics => &[Some(T::Event), Some(T::Property)],
            CodedIndex::MethodDefOrRef => &[Some(T::MethodDef), Some(T::MemberRef)],
            CodedIndex::MemberForwarded => &[Some(T::Field), Some(T::MethodDef)],
            CodedIndex::Implementation => {
                &[Some(T::File), Some(T::AssemblyRef), Some(T::ExportedType)]
            }
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(T::MethodDef), Some(T::MemberRef), None]
            }
            CodedIndex::ResolutionScope => &[
                Some(T::Module),
                Some(T::ModuleRef),
                Some(T::AssemblyRef),
                Some(T::TypeRef),
            ],
            CodedIndex::TypeOrMethodDef => &[Some(T::TypeDef), Some(T::MethodDef)],
            CodedIndex::HasCustomDebugInformation => &[
                Some(T::MethodDef),
                Some(T::Field),
                Some(T::TypeRef),
                Some(T::TypeDef),
                Some(T::Param),
                Some(T::InterfaceImpl),
                Some(T::MemberRef),
                Some(T::Module),
                Some(T::DeclSecurity),
                Some(T::Property),
                Some(T::Event),
                Some(T::StandAloneSig),
                Some(T::ModuleRef),
                Some(T::TypeSpec),
                Some(T::Assembly),
                Some(T::AssemblyRef),
                Some(T::File),
                Some(T::ExportedType),
                Some(T::ManifestResource),
                Some(T::GenericParam),
                Some(T::GenericParamConstraint),
                Some(T::MethodSpec),
                Some(T::Document),
                Some(T::LocalScope),
                Some(T::LocalVariable),
                Some(T::LocalConstant),
                Some(T::ImportScope),
            ],
        }
    }

    /// Number of low bits holding the tag.
    pub fn tag_bits(self) -> u32 {
        let count = self.tables().len() as u32;
        u32::BITS - (count - 1).leading_zeros()
    }

    /// Split a stored value into table and 1-based row; `None` for a null reference.
    pub fn decode(self, value: u32) -> Result<Option<(TableId, u32)>> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        if row == 0 {
            return Ok(None);
        }
        match self.tables().get(tag).copied().flatten() {
            Some(table) => Ok(Some((table, row))),
            None => Err(malformed_error!("Invalid {:?} tag {}", self, tag)),
        }
    }

    /// Combine a table and 1-based row into the stored value.
    pub fn encode(self, table: TableId, row: u32) -> Result<u32> {
        let tag = self
            .tables()
            .iter()
            .position(|candidate| *candidate == Some(table))
            .ok_or_else(|| malformed_error!("{:?} cannot address table {:?}", self, table))?;
        Ok((row << self.tag_bits()) | tag as u32)
    }
}

/// Heap size flags of the `#~` header.
pub(crate) const HEAP_LARGE_STRINGS: u8 = 0x01;
pub(crate) const HEAP_LARGE_GUID: u8 = 0x02;
pub(crate) const HEAP_LARGE_BLOB: u8 = 0x04;

/// Row counts and heap widths, from which every column width follows.
#[derive(Debug, Clone)]
pub(crate) struct TableInfo {
    rows: [u32; MAX_TABLES],
    heap_sizes: u8,
}

impl TableInfo {
    pub fn new(rows: [u32; MAX_TABLES], heap_sizes: u8) -> Self {
        TableInfo { rows, heap_sizes }
    }

    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    fn column_size(&self, column: Column) -> usize {
        let wide = |large: bool| if large { 4 } else { 2 };
        match column {
            Column::U16 => 2,
            Column::U32 => 4,
            Column::Str => wide(self.heap_sizes & HEAP_LARGE_STRINGS != 0),
            Column::Guid => wide(self.heap_sizes & HEAP_LARGE_GUID != 0),
            Column::Blob => wide(self.heap_sizes & HEAP_LARGE_BLOB != 0),
            Column::Index(table) => wide(self.rows(table) > 0xFFFF),
            Column::Coded(coded) => {
                let max = coded
                    .tables()
                    .iter()
                    .flatten()
                    .map(|table| self.rows(*table))
                    .max()
                    .unwrap_or(0);
                wide(max >= 1 << (16 - coded.tag_bits()))
            }
        }
    }

    /// Width of every column of a table.
    pub fn column_sizes(&self, table: TableId) -> Vec<usize> {
        table
            .columns()
            .iter()
            .map(|column| self.column_size(*column))
            .collect()
    }

    /// Size in bytes of one row.
    pub fn row_size(&self, table: TableId) -> usize {
        self.column_sizes(table).iter().sum()
    }
}

/// The rows of one table as raw column values.
#[derive(Debug, Clone)]
pub(crate) struct RawTable {
    pub id: TableId,
    width: usize,
    values: Vec<u32>,
}

impl RawTable {
    pub fn new(id: TableId) -> Self {
        RawTable {
            id,
            width: id.columns().len(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> u32 {
        (self.values.len() / self.width) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row by 1-based index.
    pub fn row(&self, row: u32) -> Result<&[u32]> {
        let index = (row as usize)
            .checked_sub(1)
            .ok_or_else(|| malformed_error!("Null row index into {:?}", self.id))?;
        self.values
            .get(index * self.width..(index + 1) * self.width)
            .ok_or_else(|| malformed_error!("Row {} of {:?} out of range", row, self.id))
    }

    /// All rows, in table order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.values.chunks_exact(self.width)
    }

    /// Append a row, returning its 1-based index.
    pub fn push(&mut self, row: &[u32]) -> u32 {
        debug_assert_eq!(row.len(), self.width);
        self.values.extend_from_slice(row);
        self.len()
    }

    /// Stable sort of the rows by the given key columns.
    pub fn sort_by_columns(&mut self, keys: &[usize]) {
        let mut rows: Vec<Vec<u32>> = self.rows().map(<[u32]>::to_vec).collect();
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|key| a[*key].cmp(&b[*key]))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.values = rows.concat();
    }
}
