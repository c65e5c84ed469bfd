//! Decoding of PE/CLI images into [`Module`]s.
//!
//! Tables are read in dependency order: identity and references first, then type shells so
//! that signatures can name local types, then member references, method specs, bodies and
//! finally the tables that only attach data to existing definitions.
//!
//! The model has no separate handle space for local types and members. A `TypeDef`,
//! `Field` or `MethodDef` row referenced from a signature or an instruction is turned into a
//! module-scoped reference on first use, which the writer maps back onto the definition.

use std::collections::HashMap;

use log::debug;

use crate::{
    file::parser::Parser,
    module::{
        assembly::{public_key_token, AssemblyDef, ExportedType, ExportedTypeScope, Resource},
        attributes::{Constant, CustomAttribute, SecurityDecl},
        image::{
            code::{decode_body, TokenResolver},
            heaps::{Blobs, Guids, Strings, UserStrings},
            metadata::{MetadataRoot, TablesStream},
            pe::PeImage,
            signature::{
                decode_field_sig, decode_locals_sig, decode_method_sig, decode_method_spec,
                decode_property_sig, decode_type, TypeRefDecoder, CALLCONV_FIELD,
            },
            tables::{CodedIndex, TableId},
            MODULE_TYPE,
        },
        instruction::Operand,
        method::{
            GenericParam, MethodAttributes, MethodDef, MethodImplAttributes, PInvoke, ParamDef,
        },
        references::{
            AssemblyRef, AssemblyRefId, AssemblyVersion, FieldRef, FieldRefId, MethodRef,
            MethodRefId, ResolutionScope, TypeRef, TypeRefId,
        },
        signature::{MethodSig, PrimitiveType, TypeSig},
        token::Token,
        types::{
            ClassLayout, EventDef, FieldAttributes, FieldDef, InterfaceImpl, MethodImpl,
            MethodSemanticsAttributes, PropertyDef, SemanticMethod, TypeAttributes, TypeDef,
        },
        Module,
    },
    Error, Result,
};

const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;
const FILE_CONTAINS_NO_METADATA: u32 = 0x0001;

#[derive(Clone, Copy)]
enum MemberRefRow {
    Field(FieldRefId),
    Method(MethodRefId),
}

#[derive(Clone, Copy)]
enum GenericOwner {
    Type(usize, usize),
    Method(usize, usize, usize),
}

/// Owner of a 1-based row in a per-row owner list.
fn owner<T: Copy>(owners: &[T], row: u32, table: TableId) -> Result<T> {
    row.checked_sub(1)
        .and_then(|index| owners.get(index as usize))
        .copied()
        .ok_or_else(|| malformed_error!("{:?} row {} out of range", table, row))
}

fn owner_of<T: Copy>(owners: &[Option<T>], row: u32, table: TableId) -> Result<T> {
    owner(owners, row, table)?
        .ok_or_else(|| malformed_error!("{:?} row {} has no owner", table, row))
}

fn primitive_size(primitive: PrimitiveType) -> Result<usize> {
    match primitive {
        PrimitiveType::Boolean | PrimitiveType::I1 | PrimitiveType::U1 => Ok(1),
        PrimitiveType::Char | PrimitiveType::I2 | PrimitiveType::U2 => Ok(2),
        PrimitiveType::I4 | PrimitiveType::U4 | PrimitiveType::R4 => Ok(4),
        PrimitiveType::I8 | PrimitiveType::U8 | PrimitiveType::R8 => Ok(8),
        _ => Err(Error::NotSupported),
    }
}

struct Reader<'a> {
    pe: &'a PeImage<'a>,
    tables: &'a TablesStream,
    strings: Strings<'a>,
    blobs: Blobs<'a>,
    guids: Guids<'a>,
    user_strings: UserStrings<'a>,
    module: Module,
    /// `TypeDef` rows in front of the first entry of `module.type_defs`
    skipped_types: u32,
    field_owners: Vec<(usize, usize)>,
    method_owners: Vec<(usize, usize)>,
    param_owners: Vec<(usize, usize, usize)>,
    interface_owners: Vec<(usize, usize)>,
    generic_owners: Vec<GenericOwner>,
    property_owners: Vec<Option<(usize, usize)>>,
    event_owners: Vec<Option<(usize, usize)>>,
    member_refs: Vec<MemberRefRow>,
    method_specs: Vec<MethodRefId>,
    type_specs: HashMap<u32, TypeSig>,
    local_types: HashMap<u32, TypeRefId>,
    local_type_indexes: HashMap<TypeRefId, usize>,
    local_fields: HashMap<u32, FieldRefId>,
    local_methods: HashMap<u32, MethodRefId>,
}

/// Decode a PE/CLI image.
pub(crate) fn read_module(data: &[u8]) -> Result<Module> {
    let pe = PeImage::parse(data)?;
    let root = MetadataRoot::parse(pe.metadata()?)?;
    if root.has_stream("#-") {
        return Err(Error::NotSupported);
    }
    let tables_stream = root
        .stream("#~")
        .ok_or_else(|| malformed_error!("Metadata has no #~ stream"))?;
    let tables = TablesStream::parse(tables_stream, None)?;

    let mut reader = Reader {
        pe: &pe,
        tables: &tables,
        strings: Strings::new(root.stream("#Strings").unwrap_or(&[])),
        blobs: Blobs::new(root.stream("#Blob").unwrap_or(&[])),
        guids: Guids::new(root.stream("#GUID").unwrap_or(&[])),
        user_strings: UserStrings::new(root.stream("#US").unwrap_or(&[])),
        module: Module::new(String::new()),
        skipped_types: 0,
        field_owners: Vec::new(),
        method_owners: Vec::new(),
        param_owners: Vec::new(),
        interface_owners: Vec::new(),
        generic_owners: Vec::new(),
        property_owners: Vec::new(),
        event_owners: Vec::new(),
        member_refs: Vec::new(),
        method_specs: Vec::new(),
        type_specs: HashMap::new(),
        local_types: HashMap::new(),
        local_type_indexes: HashMap::new(),
        local_fields: HashMap::new(),
        local_methods: HashMap::new(),
    };
    reader.module.runtime_version = root.version.clone();

    reader.read_identity()?;
    reader.read_type_refs()?;
    reader.read_type_shells()?;
    reader.read_signatures()?;
    reader.read_member_refs()?;
    reader.read_method_specs()?;
    reader.read_bodies()?;
    reader.read_params()?;
    reader.read_definition_data()?;
    reader.read_semantics()?;
    reader.read_security()?;
    reader.read_custom_attributes()?;
    reader.read_manifest()?;

    debug!(
        "Read module {} - {} types, {} type refs, {} member refs",
        reader.module.name,
        reader.module.type_defs.len(),
        reader.module.type_refs.len(),
        reader.member_refs.len()
    );
    Ok(reader.module)
}

impl<'a> Reader<'a> {
    fn string(&self, index: u32) -> Result<String> {
        Ok(self.strings.get(index)?.to_string())
    }

    fn optional_string(&self, index: u32) -> Result<Option<String>> {
        let value = self.strings.get(index)?;
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    /// `[start, end)` of the list column of every row of `owner`.
    fn list_ranges(&self, owner: TableId, column: usize, list: TableId) -> Result<Vec<(u32, u32)>> {
        let tables = self.tables;
        let count = tables.len(owner);
        let end = tables.len(list) + 1;
        let mut ranges = Vec::with_capacity(count as usize);
        for row in 1..=count {
            let start = tables.row(owner, row)?[column];
            let next = if row == count {
                end
            } else {
                tables.row(owner, row + 1)?[column]
            };
            if start == 0 || start > next || next > end {
                return Err(malformed_error!(
                    "Invalid {:?} list in {:?} row {}",
                    list,
                    owner,
                    row
                ));
            }
            ranges.push((start, next));
        }
        Ok(ranges)
    }

    fn type_index(&self, row: u32) -> Result<usize> {
        row.checked_sub(1 + self.skipped_types)
            .map(|index| index as usize)
            .filter(|index| *index < self.module.type_defs.len())
            .ok_or_else(|| malformed_error!("TypeDef row {} out of range", row))
    }

    fn type_row(&self, index: usize) -> u32 {
        index as u32 + 1 + self.skipped_types
    }

    fn type_ref_row(&self, row: u32) -> Result<TypeRefId> {
        if row == 0 || row > self.tables.len(TableId::TypeRef) {
            return Err(malformed_error!("TypeRef row {} out of range", row));
        }
        Ok(TypeRefId::new(row as usize - 1))
    }

    /// Module-scoped reference naming a local type.
    fn local_type(&mut self, row: u32) -> Result<TypeRefId> {
        self.local_type_at(row, 0)
    }

    fn local_type_at(&mut self, row: u32, depth: usize) -> Result<TypeRefId> {
        check_depth!(depth);
        if let Some(id) = self.local_types.get(&row) {
            return Ok(*id);
        }
        let index = self.type_index(row)?;
        let scope = match self.module.type_defs[index].enclosing {
            Some(outer) => {
                ResolutionScope::Nested(self.local_type_at(self.type_row(outer), depth + 1)?)
            }
            None => ResolutionScope::Module,
        };
        let type_def = &self.module.type_defs[index];
        let type_ref = TypeRef::new(type_def.namespace.clone(), type_def.name.clone(), scope);

        let id = TypeRefId::new(self.module.type_refs.len());
        self.module.type_refs.push(type_ref);
        self.local_types.insert(row, id);
        self.local_type_indexes.insert(id, index);
        Ok(id)
    }

    fn local_field(&mut self, row: u32) -> Result<FieldRefId> {
        if let Some(id) = self.local_fields.get(&row) {
            return Ok(*id);
        }
        let (type_index, field_index) = owner(&self.field_owners, row, TableId::Field)?;
        let declaring = TypeSig::Class(self.local_type(self.type_row(type_index))?);
        let field = &self.module.type_defs[type_index].fields[field_index];
        let reference = FieldRef::new(declaring, field.name.clone(), field.field_type.clone());

        let id = FieldRefId::new(self.module.field_refs.len());
        self.module.field_refs.push(reference);
        self.local_fields.insert(row, id);
        Ok(id)
    }

    fn local_method(&mut self, row: u32) -> Result<MethodRefId> {
        if let Some(id) = self.local_methods.get(&row) {
            return Ok(*id);
        }
        let (type_index, method_index) = owner(&self.method_owners, row, TableId::MethodDef)?;
        let declaring = TypeSig::Class(self.local_type(self.type_row(type_index))?);
        let method = &self.module.type_defs[type_index].methods[method_index];
        let reference = MethodRef::new(declaring, method.name.clone(), method.sig.clone());

        let id = MethodRefId::new(self.module.method_refs.len());
        self.module.method_refs.push(reference);
        self.local_methods.insert(row, id);
        Ok(id)
    }

    fn member_method(&self, row: u32) -> Result<MethodRefId> {
        match owner(&self.member_refs, row, TableId::MemberRef)? {
            MemberRefRow::Method(id) => Ok(id),
            MemberRefRow::Field(_) => {
                Err(malformed_error!("MemberRef row {} is not a method", row))
            }
        }
    }

    fn method_def_or_ref(&mut self, coded: u32) -> Result<MethodRefId> {
        match CodedIndex::MethodDefOrRef.decode(coded)? {
            Some((TableId::MethodDef, row)) => self.local_method(row),
            Some((_, row)) => self.member_method(row),
            None => Err(malformed_error!("Null method reference")),
        }
    }

    fn type_spec(&mut self, row: u32) -> Result<TypeSig> {
        if let Some(sig) = self.type_specs.get(&row) {
            return Ok(sig.clone());
        }
        let tables = self.tables;
        let blob = self.blobs.get(tables.row(TableId::TypeSpec, row)?[0])?;
        let sig = decode_type(&mut Parser::new(blob), self, 0)?;
        self.type_specs.insert(row, sig.clone());
        Ok(sig)
    }

    /// Type named by a `TypeDefOrRef` coded index; `None` for a null reference.
    fn coded_type(&mut self, coded: u32) -> Result<Option<TypeSig>> {
        Ok(match CodedIndex::TypeDefOrRef.decode(coded)? {
            Some((TableId::TypeDef, row)) => Some(TypeSig::Class(self.local_type(row)?)),
            Some((TableId::TypeRef, row)) => Some(TypeSig::Class(self.type_ref_row(row)?)),
            Some((_, row)) => Some(self.type_spec(row)?),
            None => None,
        })
    }

    fn required_type(&mut self, coded: u32) -> Result<TypeSig> {
        self.coded_type(coded)?
            .ok_or_else(|| malformed_error!("Null type reference"))
    }

    fn read_identity(&mut self) -> Result<()> {
        let tables = self.tables;
        let pe = self.pe;

        let module_row = tables.row(TableId::Module, 1)?;
        self.module.name = self.string(module_row[1])?;
        self.module.mvid = self.guids.get(module_row[2])?;

        if tables.len(TableId::Assembly) > 0 {
            // HashAlgId, Major, Minor, Build, Revision, Flags, PublicKey, Name, Culture
            let values = tables.row(TableId::Assembly, 1)?;
            let version = AssemblyVersion::new(
                values[1] as u16,
                values[2] as u16,
                values[3] as u16,
                values[4] as u16,
            );
            let mut assembly = AssemblyDef::new(self.string(values[7])?, version);
            assembly.hash_algorithm = values[0];
            assembly.flags = values[5];
            assembly.public_key = self.blobs.get(values[6])?.to_vec();
            assembly.culture = self.optional_string(values[8])?;
            self.module.assembly = Some(assembly);
        }

        for values in tables.table(TableId::AssemblyRef).rows() {
            // Major, Minor, Build, Revision, Flags, PublicKeyOrToken, Name, Culture, HashValue
            let version = AssemblyVersion::new(
                values[0] as u16,
                values[1] as u16,
                values[2] as u16,
                values[3] as u16,
            );
            let mut reference = AssemblyRef::new(self.string(values[6])?, version);
            reference.culture = self.optional_string(values[7])?;
            let key = self.blobs.get(values[5])?;
            reference.public_key_token = if key.is_empty() {
                None
            } else if values[4] & ASSEMBLY_FLAG_PUBLIC_KEY != 0 {
                Some(public_key_token(key))
            } else {
                Some(<[u8; 8]>::try_from(key).map_err(|_| {
                    malformed_error!("Invalid public key token of {}", reference.name)
                })?)
            };
            self.module.assembly_refs.push(reference);
        }

        for values in tables.table(TableId::ModuleRef).rows() {
            self.module.module_refs.push(self.string(values[0])?);
        }

        let files = tables
            .table(TableId::File)
            .rows()
            .filter(|values| values[0] & FILE_CONTAINS_NO_METADATA == 0)
            .count();
        self.module.module_count = 1 + files as u32;

        self.module.image = pe.options;
        self.module.debug = pe.debug;
        self.module.win32_resources = pe.win32_resources.clone();

        let entry = Token::new(pe.cli.entry_point);
        self.module.entry_point = match entry.table() {
            _ if entry.is_null() => None,
            Token::METHOD_DEF if entry.row() <= tables.len(TableId::MethodDef) => Some(entry),
            Token::METHOD_DEF => {
                return Err(malformed_error!("Entry point {:?} out of range", entry));
            }
            _ => return Err(Error::NotSupported),
        };
        Ok(())
    }

    fn read_type_refs(&mut self) -> Result<()> {
        let tables = self.tables;
        let count = tables.len(TableId::TypeRef);
        let assemblies = self.module.assembly_refs.len();
        for values in tables.table(TableId::TypeRef).rows() {
            let scope = match CodedIndex::ResolutionScope.decode(values[0])? {
                Some((TableId::Module, _)) => ResolutionScope::Module,
                Some((TableId::AssemblyRef, row)) if row as usize <= assemblies => {
                    ResolutionScope::Assembly(AssemblyRefId::new(row as usize - 1))
                }
                Some((TableId::TypeRef, row)) if row <= count => {
                    ResolutionScope::Nested(TypeRefId::new(row as usize - 1))
                }
                Some((TableId::ModuleRef, _)) | None => return Err(Error::NotSupported),
                Some((table, row)) => {
                    return Err(malformed_error!("Resolution scope {:?} row {}", table, row));
                }
            };
            let name = self.strings.get(values[1])?;
            let namespace = self.strings.get(values[2])?;
            self.module
                .type_refs
                .push(TypeRef::new(namespace, name, scope));
        }
        Ok(())
    }

    fn read_type_shells(&mut self) -> Result<()> {
        let tables = self.tables;
        let fields = self.list_ranges(TableId::TypeDef, 4, TableId::Field)?;
        let methods = self.list_ranges(TableId::TypeDef, 5, TableId::MethodDef)?;

        for (index, values) in tables.table(TableId::TypeDef).rows().enumerate() {
            // Flags, TypeName, TypeNamespace, Extends, FieldList, MethodList
            let name = self.strings.get(values[1])?;
            let namespace = self.strings.get(values[2])?;
            let (field_start, field_end) = fields[index];
            let (method_start, method_end) = methods[index];
            if index == 0
                && name == MODULE_TYPE
                && namespace.is_empty()
                && field_start == field_end
                && method_start == method_end
            {
                self.skipped_types = 1;
                continue;
            }

            let type_index = self.module.type_defs.len();
            let flags = TypeAttributes::from_bits_retain(values[0]);
            let mut type_def = TypeDef::new(namespace, name, flags);
            for row in field_start..field_end {
                let field = tables.row(TableId::Field, row)?;
                self.field_owners.push((type_index, type_def.fields.len()));
                type_def.fields.push(FieldDef::new(
                    self.strings.get(field[1])?,
                    FieldAttributes::from_bits_retain(field[0] as u16),
                    TypeSig::VOID,
                ));
            }
            for row in method_start..method_end {
                // RVA, ImplFlags, Flags, Name, Signature, ParamList
                let method = tables.row(TableId::MethodDef, row)?;
                self.method_owners.push((type_index, type_def.methods.len()));
                let mut method_def = MethodDef::new(
                    self.strings.get(method[3])?,
                    MethodAttributes::from_bits_retain(method[2] as u16),
                    MethodSig::static_method(TypeSig::VOID, Vec::new()),
                    None,
                );
                method_def.impl_flags = MethodImplAttributes::from_bits_retain(method[1] as u16);
                type_def.methods.push(method_def);
            }
            self.module.type_defs.push(type_def);
        }

        if self.field_owners.len() != tables.len(TableId::Field) as usize
            || self.method_owners.len() != tables.len(TableId::MethodDef) as usize
        {
            return Err(malformed_error!("Members outside of any type definition"));
        }

        for values in tables.table(TableId::NestedClass).rows() {
            let nested = self.type_index(values[0])?;
            let enclosing = self.type_index(values[1])?;
            self.module.type_defs[nested].enclosing = Some(enclosing);
        }
        Ok(())
    }

    fn read_signatures(&mut self) -> Result<()> {
        let tables = self.tables;

        for (index, values) in tables.table(TableId::TypeDef).rows().enumerate() {
            let row = index as u32 + 1;
            if row <= self.skipped_types {
                continue;
            }
            let base_type = self.coded_type(values[3])?;
            let type_index = self.type_index(row)?;
            self.module.type_defs[type_index].base_type = base_type;
        }

        for (index, values) in tables.table(TableId::Field).rows().enumerate() {
            let blob = self.blobs.get(values[2])?;
            let field_type = decode_field_sig(&mut Parser::new(blob), self)?;
            let (type_index, field_index) = self.field_owners[index];
            self.module.type_defs[type_index].fields[field_index].field_type = field_type;
        }

        for (index, values) in tables.table(TableId::MethodDef).rows().enumerate() {
            let blob = self.blobs.get(values[4])?;
            let sig = decode_method_sig(&mut Parser::new(blob), self)?;
            let (type_index, method_index) = self.method_owners[index];
            self.module.type_defs[type_index].methods[method_index].sig = sig;
        }

        for values in tables.table(TableId::InterfaceImpl).rows() {
            let type_index = self.type_index(values[0])?;
            let interface = self.required_type(values[1])?;
            let interfaces = &mut self.module.type_defs[type_index].interfaces;
            self.interface_owners.push((type_index, interfaces.len()));
            interfaces.push(InterfaceImpl {
                interface,
                custom_attributes: Vec::new(),
            });
        }

        for values in tables.table(TableId::GenericParam).rows() {
            // Number, Flags, Owner, Name
            let mut param = GenericParam::new(self.strings.get(values[3])?);
            param.flags = values[1] as u16;
            let (params, slot) = match CodedIndex::TypeOrMethodDef.decode(values[2])? {
                Some((TableId::TypeDef, row)) => {
                    let type_index = self.type_index(row)?;
                    let params = &mut self.module.type_defs[type_index].generic_params;
                    let slot = GenericOwner::Type(type_index, params.len());
                    (params, slot)
                }
                Some((_, row)) => {
                    let (type_index, method_index) =
                        owner(&self.method_owners, row, TableId::MethodDef)?;
                    let params = &mut self.module.type_defs[type_index].methods[method_index]
                        .generic_params;
                    let slot = GenericOwner::Method(type_index, method_index, params.len());
                    (params, slot)
                }
                None => return Err(malformed_error!("Generic parameter without owner")),
            };
            if values[0] as usize != params.len() {
                return Err(malformed_error!("Generic parameter {} out of order", values[0]));
            }
            params.push(param);
            self.generic_owners.push(slot);
        }

        for values in tables.table(TableId::GenericParamConstraint).rows() {
            let constraint = self.required_type(values[1])?;
            let param = match owner(&self.generic_owners, values[0], TableId::GenericParam)? {
                GenericOwner::Type(type_index, index) => {
                    &mut self.module.type_defs[type_index].generic_params[index]
                }
                GenericOwner::Method(type_index, method_index, index) => {
                    &mut self.module.type_defs[type_index].methods[method_index].generic_params
                        [index]
                }
            };
            param.constraints.push(constraint);
        }

        self.property_owners = vec![None; tables.len(TableId::Property) as usize];
        let properties = self.list_ranges(TableId::PropertyMap, 1, TableId::Property)?;
        for (index, values) in tables.table(TableId::PropertyMap).rows().enumerate() {
            let type_index = self.type_index(values[0])?;
            let (start, end) = properties[index];
            for row in start..end {
                // Flags, Name, Type
                let property = tables.row(TableId::Property, row)?;
                let blob = self.blobs.get(property[2])?;
                let sig = decode_property_sig(&mut Parser::new(blob), self)?;
                let property_def = PropertyDef {
                    name: self.string(property[1])?,
                    flags: property[0] as u16,
                    sig,
                    constant: None,
                    methods: Vec::new(),
                    custom_attributes: Vec::new(),
                };
                let list = &mut self.module.type_defs[type_index].properties;
                self.property_owners[row as usize - 1] = Some((type_index, list.len()));
                list.push(property_def);
            }
        }

        self.event_owners = vec![None; tables.len(TableId::Event) as usize];
        let events = self.list_ranges(TableId::EventMap, 1, TableId::Event)?;
        for (index, values) in tables.table(TableId::EventMap).rows().enumerate() {
            let type_index = self.type_index(values[0])?;
            let (start, end) = events[index];
            for row in start..end {
                // EventFlags, Name, EventType
                let event = tables.row(TableId::Event, row)?;
                let event_def = EventDef {
                    name: self.string(event[1])?,
                    flags: event[0] as u16,
                    event_type: self.required_type(event[2])?,
                    methods: Vec::new(),
                    custom_attributes: Vec::new(),
                };
                let list = &mut self.module.type_defs[type_index].events;
                self.event_owners[row as usize - 1] = Some((type_index, list.len()));
                list.push(event_def);
            }
        }
        Ok(())
    }

    fn read_member_refs(&mut self) -> Result<()> {
        let tables = self.tables;
        for values in tables.table(TableId::MemberRef).rows() {
            // Class, Name, Signature
            let declaring = match CodedIndex::MemberRefParent.decode(values[0])? {
                Some((TableId::TypeDef, row)) => TypeSig::Class(self.local_type(row)?),
                Some((TableId::TypeRef, row)) => TypeSig::Class(self.type_ref_row(row)?),
                Some((TableId::TypeSpec, row)) => self.type_spec(row)?,
                Some(_) => return Err(Error::NotSupported),
                None => return Err(malformed_error!("MemberRef without parent")),
            };
            let name = self.string(values[1])?;
            let blob = self.blobs.get(values[2])?;
            let mut parser = Parser::new(blob);

            let row = if blob.first() == Some(&CALLCONV_FIELD) {
                let field_type = decode_field_sig(&mut parser, self)?;
                self.module
                    .field_refs
                    .push(FieldRef::new(declaring, name, field_type));
                MemberRefRow::Field(FieldRefId::new(self.module.field_refs.len() - 1))
            } else {
                let sig = decode_method_sig(&mut parser, self)?;
                self.module
                    .method_refs
                    .push(MethodRef::new(declaring, name, sig));
                MemberRefRow::Method(MethodRefId::new(self.module.method_refs.len() - 1))
            };
            self.member_refs.push(row);
        }
        Ok(())
    }

    fn read_method_specs(&mut self) -> Result<()> {
        let tables = self.tables;
        for values in tables.table(TableId::MethodSpec).rows() {
            let base = self.method_def_or_ref(values[0])?;
            let blob = self.blobs.get(values[1])?;
            let args = decode_method_spec(&mut Parser::new(blob), self)?;

            let mut method = self.module.method_refs[base.index()].clone();
            method.generic_args = args;
            self.module.method_refs.push(method);
            self.method_specs
                .push(MethodRefId::new(self.module.method_refs.len() - 1));
        }
        Ok(())
    }

    fn read_bodies(&mut self) -> Result<()> {
        let tables = self.tables;
        let pe = self.pe;
        for (index, values) in tables.table(TableId::MethodDef).rows().enumerate() {
            let rva = values[0];
            if rva == 0 {
                continue;
            }
            if !MethodImplAttributes::from_bits_retain(values[1] as u16).is_il() {
                // native code inside a managed image
                return Err(Error::NotSupported);
            }
            let body = decode_body(pe.slice_from(rva)?, self)?;
            let (type_index, method_index) = self.method_owners[index];
            self.module.type_defs[type_index].methods[method_index].body = Some(body);
        }
        Ok(())
    }

    fn read_params(&mut self) -> Result<()> {
        let tables = self.tables;
        let ranges = self.list_ranges(TableId::MethodDef, 5, TableId::Param)?;
        for (index, (start, end)) in ranges.into_iter().enumerate() {
            let (type_index, method_index) = self.method_owners[index];
            for row in start..end {
                // Flags, Sequence, Name
                let values = tables.row(TableId::Param, row)?;
                let mut param = ParamDef::new(values[1] as u16, self.strings.get(values[2])?);
                param.flags = values[0] as u16;
                let method = &mut self.module.type_defs[type_index].methods[method_index];
                self.param_owners
                    .push((type_index, method_index, method.params.len()));
                method.params.push(param);
            }
        }
        if self.param_owners.len() != tables.len(TableId::Param) as usize {
            return Err(malformed_error!("Parameters outside of any method"));
        }
        Ok(())
    }

    fn field_mut(&mut self, row: u32) -> Result<&mut FieldDef> {
        let (type_index, field_index) = owner(&self.field_owners, row, TableId::Field)?;
        Ok(&mut self.module.type_defs[type_index].fields[field_index])
    }

    fn param_mut(&mut self, row: u32) -> Result<&mut ParamDef> {
        let (type_index, method_index, index) = owner(&self.param_owners, row, TableId::Param)?;
        Ok(&mut self.module.type_defs[type_index].methods[method_index].params[index])
    }

    fn method_mut(&mut self, row: u32) -> Result<&mut MethodDef> {
        let (type_index, method_index) = owner(&self.method_owners, row, TableId::MethodDef)?;
        Ok(&mut self.module.type_defs[type_index].methods[method_index])
    }

    /// Size of the data a `FieldRVA` row maps for a field of the given type.
    fn field_data_size(&self, field_type: &TypeSig) -> Result<usize> {
        match field_type {
            TypeSig::Primitive(primitive) => primitive_size(*primitive),
            TypeSig::Class(id) | TypeSig::ValueType(id) => {
                let index = self
                    .local_type_indexes
                    .get(id)
                    .ok_or(Error::NotSupported)?;
                self.module.type_defs[*index]
                    .layout
                    .map(|layout| layout.class_size as usize)
                    .ok_or_else(|| malformed_error!("Field data type has no explicit size"))
            }
            _ => Err(Error::NotSupported),
        }
    }

    /// Constants, marshalling, layout, field data, P/Invoke and explicit overrides.
    fn read_definition_data(&mut self) -> Result<()> {
        let tables = self.tables;
        let pe = self.pe;

        for values in tables.table(TableId::Constant).rows() {
            // Type, Parent, Value
            let constant = Constant {
                element_type: values[0] as u8,
                value: self.blobs.get(values[2])?.to_vec(),
            };
            match CodedIndex::HasConstant.decode(values[1])? {
                Some((TableId::Field, row)) => self.field_mut(row)?.constant = Some(constant),
                Some((TableId::Param, row)) => self.param_mut(row)?.constant = Some(constant),
                Some((_, row)) => {
                    let (type_index, index) =
                        owner_of(&self.property_owners, row, TableId::Property)?;
                    self.module.type_defs[type_index].properties[index].constant =
                        Some(constant);
                }
                None => return Err(malformed_error!("Constant without parent")),
            }
        }

        for values in tables.table(TableId::FieldMarshal).rows() {
            let marshal = Some(self.blobs.get(values[1])?.to_vec());
            match CodedIndex::HasFieldMarshal.decode(values[0])? {
                Some((TableId::Field, row)) => self.field_mut(row)?.marshal = marshal,
                Some((_, row)) => self.param_mut(row)?.marshal = marshal,
                None => return Err(malformed_error!("Marshalling descriptor without parent")),
            }
        }

        for values in tables.table(TableId::ClassLayout).rows() {
            // PackingSize, ClassSize, Parent
            let type_index = self.type_index(values[2])?;
            self.module.type_defs[type_index].layout = Some(ClassLayout {
                packing_size: values[0] as u16,
                class_size: values[1],
            });
        }

        for values in tables.table(TableId::FieldLayout).rows() {
            self.field_mut(values[1])?.offset = Some(values[0]);
        }

        for values in tables.table(TableId::FieldRva).rows() {
            let (rva, row) = (values[0], values[1]);
            let field_type = self.field_mut(row)?.field_type.clone();
            let size = self.field_data_size(&field_type)?;
            self.field_mut(row)?.initial_value = Some(pe.slice(rva, size)?.to_vec());
        }

        for values in tables.table(TableId::ImplMap).rows() {
            // MappingFlags, MemberForwarded, ImportName, ImportScope
            let module = (values[3] as usize)
                .checked_sub(1)
                .filter(|index| *index < self.module.module_refs.len())
                .ok_or_else(|| malformed_error!("ModuleRef row {} out of range", values[3]))?;
            let pinvoke = PInvoke {
                flags: values[0] as u16,
                name: self.string(values[2])?,
                module,
            };
            match CodedIndex::MemberForwarded.decode(values[1])? {
                Some((TableId::MethodDef, row)) => self.method_mut(row)?.pinvoke = Some(pinvoke),
                _ => return Err(Error::NotSupported),
            }
        }

        for values in tables.table(TableId::MethodImpl).rows() {
            // Class, MethodBody, MethodDeclaration
            let type_index = self.type_index(values[0])?;
            let method_impl = MethodImpl {
                body: self.method_def_or_ref(values[1])?,
                declaration: self.method_def_or_ref(values[2])?,
            };
            self.module.type_defs[type_index]
                .method_impls
                .push(method_impl);
        }
        Ok(())
    }

    fn read_semantics(&mut self) -> Result<()> {
        let tables = self.tables;
        for values in tables.table(TableId::MethodSemantics).rows() {
            // Semantics, Method, Association
            let (method_type, method) = owner(&self.method_owners, values[1], TableId::MethodDef)?;
            let semantic = SemanticMethod {
                semantics: MethodSemanticsAttributes::from_bits_retain(values[0] as u16),
                method,
            };
            let methods = match CodedIndex::HasSemantics.decode(values[2])? {
                Some((TableId::Event, row)) => {
                    let (type_index, index) = owner_of(&self.event_owners, row, TableId::Event)?;
                    if type_index != method_type {
                        return Err(Error::NotSupported);
                    }
                    &mut self.module.type_defs[type_index].events[index].methods
                }
                Some((_, row)) => {
                    let (type_index, index) =
                        owner_of(&self.property_owners, row, TableId::Property)?;
                    if type_index != method_type {
                        return Err(Error::NotSupported);
                    }
                    &mut self.module.type_defs[type_index].properties[index].methods
                }
                None => return Err(malformed_error!("Method semantics without association")),
            };
            methods.push(semantic);
        }
        Ok(())
    }

    fn read_security(&mut self) -> Result<()> {
        let tables = self.tables;
        for values in tables.table(TableId::DeclSecurity).rows() {
            // Action, Parent, PermissionSet
            let decl = SecurityDecl {
                action: values[0] as u16,
                permission_set: self.blobs.get(values[2])?.to_vec(),
            };
            match CodedIndex::HasDeclSecurity.decode(values[1])? {
                Some((TableId::TypeDef, row)) => {
                    let type_index = self.type_index(row)?;
                    self.module.type_defs[type_index].security.push(decl);
                }
                Some((TableId::MethodDef, row)) => self.method_mut(row)?.security.push(decl),
                Some(_) => match self.module.assembly.as_mut() {
                    Some(assembly) => assembly.security.push(decl),
                    None => return Err(malformed_error!("Security on a missing assembly row")),
                },
                None => return Err(malformed_error!("Security declaration without parent")),
            }
        }
        Ok(())
    }

    fn read_custom_attributes(&mut self) -> Result<()> {
        let tables = self.tables;
        for values in tables.table(TableId::CustomAttribute).rows() {
            // Parent, Type, Value
            let constructor = match CodedIndex::CustomAttributeType.decode(values[1])? {
                Some((TableId::MethodDef, row)) => self.local_method(row)?,
                Some((_, row)) => self.member_method(row)?,
                None => return Err(malformed_error!("Custom attribute without constructor")),
            };
            let attribute = CustomAttribute::new(constructor, self.blobs.get(values[2])?.to_vec());
            let Some((table, row)) = CodedIndex::HasCustomAttribute.decode(values[0])? else {
                return Err(malformed_error!("Custom attribute without parent"));
            };

            let target = match table {
                TableId::Module => Some(&mut self.module.custom_attributes),
                TableId::Assembly => self
                    .module
                    .assembly
                    .as_mut()
                    .map(|assembly| &mut assembly.custom_attributes),
                TableId::TypeDef => {
                    let type_index = self.type_index(row)?;
                    Some(&mut self.module.type_defs[type_index].custom_attributes)
                }
                TableId::Field => Some(&mut self.field_mut(row)?.custom_attributes),
                TableId::MethodDef => Some(&mut self.method_mut(row)?.custom_attributes),
                TableId::Param => Some(&mut self.param_mut(row)?.custom_attributes),
                TableId::InterfaceImpl => {
                    let (type_index, index) =
                        owner(&self.interface_owners, row, TableId::InterfaceImpl)?;
                    Some(
                        &mut self.module.type_defs[type_index].interfaces[index]
                            .custom_attributes,
                    )
                }
                TableId::Property => {
                    let (type_index, index) =
                        owner_of(&self.property_owners, row, TableId::Property)?;
                    Some(&mut self.module.type_defs[type_index].properties[index].custom_attributes)
                }
                TableId::Event => {
                    let (type_index, index) = owner_of(&self.event_owners, row, TableId::Event)?;
                    Some(&mut self.module.type_defs[type_index].events[index].custom_attributes)
                }
                TableId::GenericParam => {
                    match owner(&self.generic_owners, row, TableId::GenericParam)? {
                        GenericOwner::Type(type_index, index) => Some(
                            &mut self.module.type_defs[type_index].generic_params[index]
                                .custom_attributes,
                        ),
                        GenericOwner::Method(type_index, method_index, index) => Some(
                            &mut self.module.type_defs[type_index].methods[method_index]
                                .generic_params[index]
                                .custom_attributes,
                        ),
                    }
                }
                _ => None,
            };
            match target {
                Some(attributes) => attributes.push(attribute),
                None => debug!("Dropping custom attribute on {:?} row {}", table, row),
            }
        }
        Ok(())
    }

    fn read_manifest(&mut self) -> Result<()> {
        let tables = self.tables;
        let pe = self.pe;

        for values in tables.table(TableId::ManifestResource).rows() {
            // Offset, Flags, Name, Implementation
            if CodedIndex::Implementation.decode(values[3])?.is_some() {
                return Err(Error::NotSupported);
            }
            let rva = pe
                .cli
                .resources_rva
                .checked_add(values[0])
                .ok_or(Error::OutOfBounds)?;
            let mut parser = Parser::new(pe.slice(rva, 4)?);
            let length = parser.read_le::<u32>()? as usize;
            let start = rva.checked_add(4).ok_or(Error::OutOfBounds)?;
            let data = pe.slice(start, length)?.to_vec();
            self.module.resources.push(Resource {
                name: self.string(values[2])?,
                flags: values[1],
                data,
            });
        }

        let count = tables.len(TableId::ExportedType);
        for values in tables.table(TableId::ExportedType).rows() {
            // Flags, TypeDefId, TypeName, TypeNamespace, Implementation
            let scope = match CodedIndex::Implementation.decode(values[4])? {
                Some((TableId::AssemblyRef, row))
                    if row as usize <= self.module.assembly_refs.len() =>
                {
                    ExportedTypeScope::Assembly(AssemblyRefId::new(row as usize - 1))
                }
                Some((TableId::ExportedType, row)) if row <= count => {
                    ExportedTypeScope::Nested(row as usize - 1)
                }
                Some((TableId::File, _)) => return Err(Error::NotSupported),
                _ => return Err(malformed_error!("Invalid exported type implementation")),
            };
            self.module.exported_types.push(ExportedType {
                flags: values[0],
                type_def_id: values[1],
                namespace: self.string(values[3])?,
                name: self.string(values[2])?,
                scope,
            });
        }
        Ok(())
    }
}

impl TypeRefDecoder for Reader<'_> {
    fn type_ref(&mut self, coded: u32) -> Result<TypeRefId> {
        match CodedIndex::TypeDefOrRef.decode(coded)? {
            Some((TableId::TypeDef, row)) => self.local_type(row),
            Some((TableId::TypeRef, row)) => self.type_ref_row(row),
            _ => Err(malformed_error!("Invalid type 0x{:x} in signature", coded)),
        }
    }
}

impl TokenResolver for Reader<'_> {
    fn operand(&mut self, token: Token) -> Result<Operand> {
        let row = token.row();
        Ok(match token.table() {
            Token::FIELD => Operand::Field(self.local_field(row)?),
            Token::METHOD_DEF => Operand::Method(self.local_method(row)?),
            Token::MEMBER_REF => match owner(&self.member_refs, row, TableId::MemberRef)? {
                MemberRefRow::Field(id) => Operand::Field(id),
                MemberRefRow::Method(id) => Operand::Method(id),
            },
            Token::METHOD_SPEC => {
                Operand::Method(owner(&self.method_specs, row, TableId::MethodSpec)?)
            }
            Token::TYPE_DEF => Operand::Type(TypeSig::Class(self.local_type(row)?)),
            Token::TYPE_REF => Operand::Type(TypeSig::Class(self.type_ref_row(row)?)),
            Token::TYPE_SPEC => Operand::Type(self.type_spec(row)?),
            Token::USER_STRING => Operand::String(self.user_strings.get(row)?),
            _ => return Err(malformed_error!("Unexpected token {:?} in method body", token)),
        })
    }

    fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>> {
        if token.table() != Token::STANDALONE_SIG {
            return Err(malformed_error!("Invalid local signature token {:?}", token));
        }
        let tables = self.tables;
        let blob = self.blobs.get(tables.row(TableId::StandAloneSig, token.row())?[0])?;
        decode_locals_sig(&mut Parser::new(blob), self)
    }
}
