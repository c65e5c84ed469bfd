//! Encoding of [`Module`]s into PE/CLI images.
//!
//! Row numbers are fixed up front: `TypeDef`, `Field` and `MethodDef` rows follow model order,
//! with a `<Module>` row inserted first when the model has none. References to local types and
//! members become definition tokens; everything else gets a `TypeRef`, `MemberRef`,
//! `TypeSpec` or `MethodSpec` row, deduplicated and numbered in order of first use.

use std::collections::HashMap;

use log::debug;
use strum::IntoEnumIterator;

use crate::{
    file::writer::Writer,
    module::{
        attributes::CustomAttribute,
        image::{
            code::{encode_body, TokenEncoder},
            heaps::{BlobBuilder, GuidBuilder, StringsBuilder, UserStringBuilder},
            metadata::{write_root, write_tables},
            pe::{symbol_path, text_layout, write_image, ImageParts},
            signature::{
                blob, encode_field_sig, encode_locals_sig, encode_method_sig,
                encode_method_spec, encode_property_sig, encode_type, TypeRefEncoder,
            },
            tables::{
                CodedIndex, RawTable, TableId, HEAP_LARGE_BLOB, HEAP_LARGE_GUID,
                HEAP_LARGE_STRINGS, SORTED_TABLES,
            },
            MODULE_TYPE,
        },
        assembly::ExportedTypeScope,
        references::{FieldRefId, MethodRefId, ResolutionScope, TypeRefId},
        signature::TypeSig,
        token::Token,
        Module,
    },
    Error, Result,
};

/// Where a type reference points once written.
#[derive(Clone, Copy)]
enum TypeTarget {
    Def(usize),
    Row(u32),
}

struct ImageWriter<'m> {
    module: &'m Module,
    strings: StringsBuilder,
    blobs: BlobBuilder,
    guids: GuidBuilder,
    user_strings: UserStringBuilder,
    tables: Vec<RawTable>,
    /// 1 when a `<Module>` row precedes the model's types
    type_offset: u32,
    type_targets: Vec<TypeTarget>,
    field_starts: Vec<u32>,
    method_starts: Vec<u32>,
    field_tokens: Vec<Token>,
    method_tokens: Vec<Token>,
    member_rows: HashMap<(u32, u32, u32), u32>,
    type_specs: HashMap<u32, u32>,
    method_specs: HashMap<(u32, u32), u32>,
    standalone_sigs: HashMap<u32, u32>,
    bodies: Writer,
    field_data: Writer,
}

/// First row of each type's members when rows are handed out in model order.
fn list_starts(counts: impl Iterator<Item = usize>) -> Vec<u32> {
    let mut next = 1;
    counts
        .map(|count| {
            let start = next;
            next += count as u32;
            start
        })
        .collect()
}

/// Encode a module as a PE/CLI image.
pub(crate) fn write_module(module: &Module) -> Result<Vec<u8>> {
    if module.module_count != 1 {
        return Err(Error::MultipleModules(module.module_count));
    }

    let has_module_type = module
        .type_defs
        .first()
        .is_some_and(|type_def| type_def.name == MODULE_TYPE && type_def.namespace.is_empty());

    let mut writer = ImageWriter {
        module,
        strings: StringsBuilder::new(),
        blobs: BlobBuilder::new(),
        guids: GuidBuilder::new(),
        user_strings: UserStringBuilder::new(),
        tables: TableId::iter().map(RawTable::new).collect(),
        type_offset: u32::from(!has_module_type),
        type_targets: Vec::new(),
        field_starts: list_starts(module.type_defs.iter().map(|t| t.fields.len())),
        method_starts: list_starts(module.type_defs.iter().map(|t| t.methods.len())),
        field_tokens: Vec::new(),
        method_tokens: vec![Token::new(0); module.method_refs.len()],
        member_rows: HashMap::new(),
        type_specs: HashMap::new(),
        method_specs: HashMap::new(),
        standalone_sigs: HashMap::new(),
        bodies: Writer::new(),
        field_data: Writer::new(),
    };

    writer.write_identity()?;
    writer.resolve_type_refs()?;
    writer.write_member_refs()?;
    writer.write_definitions()?;
    writer.write_type_data()?;
    writer.write_manifest()?;
    writer.finish()
}

impl<'m> ImageWriter<'m> {
    fn table(&mut self, id: TableId) -> &mut RawTable {
        &mut self.tables[id.position()]
    }

    fn push(&mut self, id: TableId, row: &[u32]) -> u32 {
        self.table(id).push(row)
    }

    fn type_row(&self, index: usize) -> u32 {
        index as u32 + 1 + self.type_offset
    }

    fn field_row(&self, type_index: usize, field_index: usize) -> u32 {
        self.field_starts[type_index] + field_index as u32
    }

    fn method_row(&self, type_index: usize, method_index: usize) -> u32 {
        self.method_starts[type_index] + method_index as u32
    }

    fn target(&self, id: TypeRefId) -> Result<TypeTarget> {
        self.type_targets
            .get(id.index())
            .copied()
            .ok_or_else(|| malformed_error!("Type reference {} out of range", id))
    }

    /// Local type a reference names, if any.
    fn local_type(&self, sig: &TypeSig) -> Result<Option<usize>> {
        Ok(match sig {
            TypeSig::Class(id) | TypeSig::ValueType(id) => match self.target(*id)? {
                TypeTarget::Def(index) => Some(index),
                TypeTarget::Row(_) => None,
            },
            _ => None,
        })
    }

    /// Add the blob produced by a signature encoder.
    fn add_blob<F>(&mut self, encode: F) -> Result<u32>
    where
        F: FnOnce(&mut Writer, &dyn TypeRefEncoder) -> Result<()>,
    {
        let data = {
            let types: &dyn TypeRefEncoder = &*self;
            blob(|writer| encode(writer, types))?
        };
        self.blobs.add(&data)
    }

    fn type_spec(&mut self, sig: &TypeSig) -> Result<u32> {
        let index = self.add_blob(|writer, types| encode_type(writer, sig, types))?;
        if let Some(row) = self.type_specs.get(&index) {
            return Ok(*row);
        }
        let row = self.push(TableId::TypeSpec, &[index]);
        self.type_specs.insert(index, row);
        Ok(row)
    }

    /// Table and row a type is written as when it appears outside a signature.
    fn type_handle(&mut self, sig: &TypeSig) -> Result<(TableId, u32)> {
        Ok(match sig {
            TypeSig::Class(id) | TypeSig::ValueType(id) => match self.target(*id)? {
                TypeTarget::Def(index) => (TableId::TypeDef, self.type_row(index)),
                TypeTarget::Row(row) => (TableId::TypeRef, row),
            },
            _ => (TableId::TypeSpec, self.type_spec(sig)?),
        })
    }

    fn type_def_or_ref(&mut self, sig: &TypeSig) -> Result<u32> {
        let (table, row) = self.type_handle(sig)?;
        CodedIndex::TypeDefOrRef.encode(table, row)
    }

    /// `MethodDefOrRef` coded index of an already numbered method reference.
    fn method_def_or_ref(&self, id: MethodRefId) -> Result<u32> {
        let token = self.token_of_method(id)?;
        match token.table() {
            Token::METHOD_DEF => CodedIndex::MethodDefOrRef.encode(TableId::MethodDef, token.row()),
            Token::MEMBER_REF => CodedIndex::MethodDefOrRef.encode(TableId::MemberRef, token.row()),
            _ => Err(malformed_error!("Method reference {} is a generic instantiation", id)),
        }
    }

    fn token_of_method(&self, id: MethodRefId) -> Result<Token> {
        self.method_tokens
            .get(id.index())
            .copied()
            .ok_or_else(|| malformed_error!("Method reference {} out of range", id))
    }

    fn attribute_type(&self, attribute: &CustomAttribute) -> Result<u32> {
        let token = self.token_of_method(attribute.constructor)?;
        match token.table() {
            Token::METHOD_DEF => {
                CodedIndex::CustomAttributeType.encode(TableId::MethodDef, token.row())
            }
            Token::MEMBER_REF => {
                CodedIndex::CustomAttributeType.encode(TableId::MemberRef, token.row())
            }
            _ => Err(malformed_error!(
                "Attribute constructor {} is generic",
                attribute.constructor
            )),
        }
    }

    fn write_identity(&mut self) -> Result<()> {
        let module = self.module;
        let name = self.strings.add(&module.name);
        let mvid = self.guids.add(module.mvid);
        self.push(TableId::Module, &[0, name, mvid, 0, 0]);

        for reference in &module.assembly_refs {
            let version = reference.version;
            let token = match reference.public_key_token {
                Some(token) => self.blobs.add(&token)?,
                None => 0,
            };
            let name = self.strings.add(&reference.name);
            let culture = self.strings.add(reference.culture.as_deref().unwrap_or(""));
            self.push(
                TableId::AssemblyRef,
                &[
                    u32::from(version.major),
                    u32::from(version.minor),
                    u32::from(version.build),
                    u32::from(version.revision),
                    0,
                    token,
                    name,
                    culture,
                    0,
                ],
            );
        }

        for name in &module.module_refs {
            let name = self.strings.add(name);
            self.push(TableId::ModuleRef, &[name]);
        }
        Ok(())
    }

    /// Decide which type references name local types and number the others.
    fn resolve_type_refs(&mut self) -> Result<()> {
        let module = self.module;
        let mut defs: HashMap<(Option<usize>, &str, &str), usize> = HashMap::new();
        for (index, type_def) in module.type_defs.iter().enumerate() {
            let key = (
                type_def.enclosing,
                type_def.namespace.as_str(),
                type_def.name.as_str(),
            );
            defs.entry(key).or_insert(index);
        }

        let mut locals = Vec::with_capacity(module.type_refs.len());
        for index in 0..module.type_refs.len() {
            locals.push(local_definition(module, &defs, TypeRefId::new(index), 0)?);
        }

        let mut rows = 0;
        for local in locals {
            self.type_targets.push(match local {
                Some(index) => TypeTarget::Def(index),
                None => {
                    rows += 1;
                    TypeTarget::Row(rows)
                }
            });
        }

        for (index, type_ref) in module.type_refs.iter().enumerate() {
            if matches!(self.type_targets[index], TypeTarget::Def(_)) {
                continue;
            }
            let scope = match type_ref.scope {
                ResolutionScope::Module => CodedIndex::ResolutionScope.encode(TableId::Module, 1)?,
                ResolutionScope::Assembly(assembly) => {
                    if assembly.index() >= module.assembly_refs.len() {
                        return Err(malformed_error!(
                            "Assembly reference {} out of range",
                            assembly
                        ));
                    }
                    CodedIndex::ResolutionScope
                        .encode(TableId::AssemblyRef, assembly.index() as u32 + 1)?
                }
                ResolutionScope::Nested(outer) => match self.target(outer)? {
                    TypeTarget::Row(row) => {
                        CodedIndex::ResolutionScope.encode(TableId::TypeRef, row)?
                    }
                    TypeTarget::Def(_) => {
                        return Err(malformed_error!(
                            "Nested type {} of a local type is not defined",
                            type_ref.name
                        ));
                    }
                },
            };
            let name = self.strings.add(&type_ref.name);
            let namespace = self.strings.add(&type_ref.namespace);
            self.push(TableId::TypeRef, &[scope, name, namespace]);
        }
        Ok(())
    }

    fn member_ref(&mut self, declaring: &TypeSig, name: &str, signature: u32) -> Result<u32> {
        let (table, row) = self.type_handle(declaring)?;
        let parent = CodedIndex::MemberRefParent.encode(table, row)?;
        let name = self.strings.add(name);
        if let Some(row) = self.member_rows.get(&(parent, name, signature)) {
            return Ok(*row);
        }
        let row = self.push(TableId::MemberRef, &[parent, name, signature]);
        self.member_rows.insert((parent, name, signature), row);
        Ok(row)
    }

    /// `MethodDef` or `MemberRef` token of a method reference without generic arguments.
    fn method_base(&mut self, index: usize) -> Result<Token> {
        let module = self.module;
        let reference = &module.method_refs[index];
        if let Some(type_index) = self.local_type(&reference.declaring)? {
            let found = module.type_defs[type_index]
                .methods
                .iter()
                .position(|method| method.name == reference.name && method.sig == reference.sig);
            if let Some(method_index) = found {
                let row = self.method_row(type_index, method_index);
                return Ok(Token::from_parts(Token::METHOD_DEF, row));
            }
        }
        let sig = &reference.sig;
        let signature = self.add_blob(|writer, types| encode_method_sig(writer, sig, types))?;
        let row = self.member_ref(&reference.declaring, &reference.name, signature)?;
        Ok(Token::from_parts(Token::MEMBER_REF, row))
    }

    /// Fields, then plain methods, then generic instantiations.
    fn write_member_refs(&mut self) -> Result<()> {
        let module = self.module;
        for reference in &module.field_refs {
            let mut token = None;
            if let Some(type_index) = self.local_type(&reference.declaring)? {
                let found = module.type_defs[type_index].fields.iter().position(|field| {
                    field.name == reference.name && field.field_type == reference.field_type
                });
                token = found.map(|field_index| {
                    Token::from_parts(Token::FIELD, self.field_row(type_index, field_index))
                });
            }
            let token = match token {
                Some(token) => token,
                None => {
                    let field_type = &reference.field_type;
                    let signature = self
                        .add_blob(|writer, types| encode_field_sig(writer, field_type, types))?;
                    let row = self.member_ref(&reference.declaring, &reference.name, signature)?;
                    Token::from_parts(Token::MEMBER_REF, row)
                }
            };
            self.field_tokens.push(token);
        }

        for (index, reference) in module.method_refs.iter().enumerate() {
            if reference.generic_args.is_empty() {
                self.method_tokens[index] = self.method_base(index)?;
            }
        }

        for (index, reference) in module.method_refs.iter().enumerate() {
            if reference.generic_args.is_empty() {
                continue;
            }
            let base = match self.method_base(index)? {
                token if token.table() == Token::METHOD_DEF => {
                    CodedIndex::MethodDefOrRef.encode(TableId::MethodDef, token.row())?
                }
                token => CodedIndex::MethodDefOrRef.encode(TableId::MemberRef, token.row())?,
            };
            let args = &reference.generic_args;
            let instantiation =
                self.add_blob(|writer, types| encode_method_spec(writer, args, types))?;
            let row = match self.method_specs.get(&(base, instantiation)) {
                Some(row) => *row,
                None => {
                    let row = self.push(TableId::MethodSpec, &[base, instantiation]);
                    self.method_specs.insert((base, instantiation), row);
                    row
                }
            };
            self.method_tokens[index] = Token::from_parts(Token::METHOD_SPEC, row);
        }
        Ok(())
    }

    /// `TypeDef`, `Field`, `MethodDef` and `Param` rows with signatures, bodies and field data.
    fn write_definitions(&mut self) -> Result<()> {
        let module = self.module;
        let pe32_plus = module.image.pe32_plus;
        let (bodies_rva, _) = text_layout(pe32_plus, 0);
        let mut field_data = Vec::new();

        if self.type_offset == 1 {
            let name = self.strings.add(MODULE_TYPE);
            self.push(TableId::TypeDef, &[0, name, 0, 0, 1, 1]);
        }

        let mut param_row = 1;
        for (type_index, type_def) in module.type_defs.iter().enumerate() {
            let extends = match &type_def.base_type {
                Some(base) => self.type_def_or_ref(base)?,
                None => 0,
            };
            let name = self.strings.add(&type_def.name);
            let namespace = self.strings.add(&type_def.namespace);
            let row = [
                type_def.flags.bits(),
                name,
                namespace,
                extends,
                self.field_starts[type_index],
                self.method_starts[type_index],
            ];
            self.push(TableId::TypeDef, &row);

            for (field_index, field) in type_def.fields.iter().enumerate() {
                let name = self.strings.add(&field.name);
                let field_type = &field.field_type;
                let signature =
                    self.add_blob(|writer, types| encode_field_sig(writer, field_type, types))?;
                self.push(
                    TableId::Field,
                    &[u32::from(field.flags.bits()), name, signature],
                );
                if let Some(value) = &field.initial_value {
                    field_data.push((self.field_row(type_index, field_index), value));
                }
            }

            for method in &type_def.methods {
                let rva = match &method.body {
                    Some(body) => {
                        let encoded = encode_body(body, self)?;
                        self.bodies.align(4);
                        let offset = u32::try_from(self.bodies.pos())
                            .map_err(|_| malformed_error!("Method bodies exceed 4 GiB"))?;
                        self.bodies.write_bytes(&encoded);
                        bodies_rva + offset
                    }
                    None => 0,
                };
                let name = self.strings.add(&method.name);
                let sig = &method.sig;
                let signature =
                    self.add_blob(|writer, types| encode_method_sig(writer, sig, types))?;
                self.push(
                    TableId::MethodDef,
                    &[
                        rva,
                        u32::from(method.impl_flags.bits()),
                        u32::from(method.flags.bits()),
                        name,
                        signature,
                        param_row,
                    ],
                );
                for param in &method.params {
                    let name = self.strings.add(&param.name);
                    let flags = u32::from(param.flags);
                    self.push(TableId::Param, &[flags, u32::from(param.sequence), name]);
                    param_row += 1;
                }
            }
        }

        // field data follows the bodies, so its RVAs are only known now
        let (_, field_rva) = text_layout(pe32_plus, self.bodies.pos());
        for (row, value) in field_data {
            self.field_data.align(8);
            let offset = u32::try_from(self.field_data.pos())
                .map_err(|_| malformed_error!("Field data exceeds 4 GiB"))?;
            self.field_data.write_bytes(value);
            self.push(TableId::FieldRva, &[field_rva + offset, row]);
        }
        Ok(())
    }

    /// Every table that attaches data to an already numbered definition.
    fn write_type_data(&mut self) -> Result<()> {
        let module = self.module;
        let mut attributes: Vec<(u32, &CustomAttribute)> = Vec::new();
        let mut generic_params = Vec::new();
        let mut param_row = 1;

        let has_attribute = |table, row| CodedIndex::HasCustomAttribute.encode(table, row);
        for attribute in &module.custom_attributes {
            attributes.push((has_attribute(TableId::Module, 1)?, attribute));
        }
        if let Some(assembly) = &module.assembly {
            let parent = has_attribute(TableId::Assembly, 1)?;
            attributes.extend(assembly.custom_attributes.iter().map(|a| (parent, a)));
            for decl in &assembly.security {
                let parent = CodedIndex::HasDeclSecurity.encode(TableId::Assembly, 1)?;
                let permissions = self.blobs.add(&decl.permission_set)?;
                self.push(
                    TableId::DeclSecurity,
                    &[u32::from(decl.action), parent, permissions],
                );
            }
        }

        for (type_index, type_def) in module.type_defs.iter().enumerate() {
            let type_row = self.type_row(type_index);
            let parent = has_attribute(TableId::TypeDef, type_row)?;
            attributes.extend(type_def.custom_attributes.iter().map(|a| (parent, a)));

            for decl in &type_def.security {
                let parent = CodedIndex::HasDeclSecurity.encode(TableId::TypeDef, type_row)?;
                let permissions = self.blobs.add(&decl.permission_set)?;
                self.push(
                    TableId::DeclSecurity,
                    &[u32::from(decl.action), parent, permissions],
                );
            }

            if let Some(enclosing) = type_def.enclosing {
                if enclosing >= module.type_defs.len() {
                    return Err(malformed_error!("Enclosing type {} out of range", enclosing));
                }
                let enclosing = self.type_row(enclosing);
                self.push(TableId::NestedClass, &[type_row, enclosing]);
            }

            if let Some(layout) = type_def.layout {
                self.push(
                    TableId::ClassLayout,
                    &[u32::from(layout.packing_size), layout.class_size, type_row],
                );
            }

            for interface in &type_def.interfaces {
                let coded = self.type_def_or_ref(&interface.interface)?;
                let row = self.push(TableId::InterfaceImpl, &[type_row, coded]);
                let parent = has_attribute(TableId::InterfaceImpl, row)?;
                attributes.extend(interface.custom_attributes.iter().map(|a| (parent, a)));
            }

            let owner = CodedIndex::TypeOrMethodDef.encode(TableId::TypeDef, type_row)?;
            for (number, param) in type_def.generic_params.iter().enumerate() {
                generic_params.push((owner, number as u32, param));
            }

            for (field_index, field) in type_def.fields.iter().enumerate() {
                let row = self.field_row(type_index, field_index);
                let parent = has_attribute(TableId::Field, row)?;
                attributes.extend(field.custom_attributes.iter().map(|a| (parent, a)));
                if let Some(constant) = &field.constant {
                    let parent = CodedIndex::HasConstant.encode(TableId::Field, row)?;
                    let value = self.blobs.add(&constant.value)?;
                    let element_type = u32::from(constant.element_type);
                    self.push(TableId::Constant, &[element_type, parent, value]);
                }
                if let Some(marshal) = &field.marshal {
                    let parent = CodedIndex::HasFieldMarshal.encode(TableId::Field, row)?;
                    let native = self.blobs.add(marshal)?;
                    self.push(TableId::FieldMarshal, &[parent, native]);
                }
                if let Some(offset) = field.offset {
                    self.push(TableId::FieldLayout, &[offset, row]);
                }
            }

            for (method_index, method) in type_def.methods.iter().enumerate() {
                let row = self.method_row(type_index, method_index);
                let parent = has_attribute(TableId::MethodDef, row)?;
                attributes.extend(method.custom_attributes.iter().map(|a| (parent, a)));

                for decl in &method.security {
                    let parent = CodedIndex::HasDeclSecurity.encode(TableId::MethodDef, row)?;
                    let permissions = self.blobs.add(&decl.permission_set)?;
                    self.push(
                        TableId::DeclSecurity,
                        &[u32::from(decl.action), parent, permissions],
                    );
                }

                if let Some(pinvoke) = &method.pinvoke {
                    if pinvoke.module >= module.module_refs.len() {
                        return Err(malformed_error!(
                            "Module reference {} out of range",
                            pinvoke.module
                        ));
                    }
                    let forwarded = CodedIndex::MemberForwarded.encode(TableId::MethodDef, row)?;
                    let name = self.strings.add(&pinvoke.name);
                    self.push(
                        TableId::ImplMap,
                        &[
                            u32::from(pinvoke.flags),
                            forwarded,
                            name,
                            pinvoke.module as u32 + 1,
                        ],
                    );
                }

                let owner = CodedIndex::TypeOrMethodDef.encode(TableId::MethodDef, row)?;
                for (number, param) in method.generic_params.iter().enumerate() {
                    generic_params.push((owner, number as u32, param));
                }

                for param in &method.params {
                    let parent = has_attribute(TableId::Param, param_row)?;
                    attributes.extend(param.custom_attributes.iter().map(|a| (parent, a)));
                    if let Some(constant) = &param.constant {
                        let parent = CodedIndex::HasConstant.encode(TableId::Param, param_row)?;
                        let value = self.blobs.add(&constant.value)?;
                        let element_type = u32::from(constant.element_type);
                        self.push(TableId::Constant, &[element_type, parent, value]);
                    }
                    if let Some(marshal) = &param.marshal {
                        let parent = CodedIndex::HasFieldMarshal.encode(TableId::Param, param_row)?;
                        let native = self.blobs.add(marshal)?;
                        self.push(TableId::FieldMarshal, &[parent, native]);
                    }
                    param_row += 1;
                }
            }

            for method_impl in &type_def.method_impls {
                let body = self.method_def_or_ref(method_impl.body)?;
                let declaration = self.method_def_or_ref(method_impl.declaration)?;
                self.push(TableId::MethodImpl, &[type_row, body, declaration]);
            }

            if !type_def.properties.is_empty() {
                let first = self.table(TableId::Property).len() + 1;
                self.push(TableId::PropertyMap, &[type_row, first]);
            }
            for property in &type_def.properties {
                let name = self.strings.add(&property.name);
                let sig = &property.sig;
                let signature =
                    self.add_blob(|writer, types| encode_property_sig(writer, sig, types))?;
                let flags = u32::from(property.flags);
                let row = self.push(TableId::Property, &[flags, name, signature]);

                let parent = has_attribute(TableId::Property, row)?;
                attributes.extend(property.custom_attributes.iter().map(|a| (parent, a)));
                if let Some(constant) = &property.constant {
                    let parent = CodedIndex::HasConstant.encode(TableId::Property, row)?;
                    let value = self.blobs.add(&constant.value)?;
                    let element_type = u32::from(constant.element_type);
                    self.push(TableId::Constant, &[element_type, parent, value]);
                }
                let association = CodedIndex::HasSemantics.encode(TableId::Property, row)?;
                for semantic in &property.methods {
                    let method = self.semantic_method(type_index, semantic.method)?;
                    let semantics = u32::from(semantic.semantics.bits());
                    self.push(TableId::MethodSemantics, &[semantics, method, association]);
                }
            }

            if !type_def.events.is_empty() {
                let first = self.table(TableId::Event).len() + 1;
                self.push(TableId::EventMap, &[type_row, first]);
            }
            for event in &type_def.events {
                let name = self.strings.add(&event.name);
                let event_type = self.type_def_or_ref(&event.event_type)?;
                let flags = u32::from(event.flags);
                let row = self.push(TableId::Event, &[flags, name, event_type]);

                let parent = has_attribute(TableId::Event, row)?;
                attributes.extend(event.custom_attributes.iter().map(|a| (parent, a)));
                let association = CodedIndex::HasSemantics.encode(TableId::Event, row)?;
                for semantic in &event.methods {
                    let method = self.semantic_method(type_index, semantic.method)?;
                    let semantics = u32::from(semantic.semantics.bits());
                    self.push(TableId::MethodSemantics, &[semantics, method, association]);
                }
            }
        }

        // GenericParam rows are sorted by owner, which interleaves types and methods
        generic_params.sort_by_key(|(owner, number, _)| (*owner, *number));
        for (owner, number, param) in generic_params {
            let name = self.strings.add(&param.name);
            let row = self.push(
                TableId::GenericParam,
                &[number, u32::from(param.flags), owner, name],
            );
            let parent = has_attribute(TableId::GenericParam, row)?;
            attributes.extend(param.custom_attributes.iter().map(|a| (parent, a)));
            for constraint in &param.constraints {
                let constraint = self.type_def_or_ref(constraint)?;
                self.push(TableId::GenericParamConstraint, &[row, constraint]);
            }
        }

        for (parent, attribute) in attributes {
            let constructor = self.attribute_type(attribute)?;
            let value = self.blobs.add(&attribute.value)?;
            self.push(TableId::CustomAttribute, &[parent, constructor, value]);
        }

        for (id, keys) in [
            (TableId::Constant, [1]),
            (TableId::CustomAttribute, [0]),
            (TableId::FieldMarshal, [0]),
            (TableId::DeclSecurity, [1]),
            (TableId::ClassLayout, [2]),
            (TableId::FieldLayout, [1]),
            (TableId::MethodSemantics, [2]),
            (TableId::MethodImpl, [0]),
            (TableId::ImplMap, [1]),
            (TableId::FieldRva, [1]),
            (TableId::NestedClass, [0]),
        ] {
            self.table(id).sort_by_columns(&keys);
        }
        Ok(())
    }

    fn semantic_method(&self, type_index: usize, method_index: usize) -> Result<u32> {
        if method_index >= self.module.type_defs[type_index].methods.len() {
            return Err(malformed_error!("Accessor method {} out of range", method_index));
        }
        Ok(self.method_row(type_index, method_index))
    }

    fn write_manifest(&mut self) -> Result<()> {
        let module = self.module;
        if let Some(assembly) = &module.assembly {
            let version = assembly.version;
            let public_key = self.blobs.add(&assembly.public_key)?;
            let name = self.strings.add(&assembly.name);
            let culture = self.strings.add(assembly.culture.as_deref().unwrap_or(""));
            self.push(
                TableId::Assembly,
                &[
                    assembly.hash_algorithm,
                    u32::from(version.major),
                    u32::from(version.minor),
                    u32::from(version.build),
                    u32::from(version.revision),
                    assembly.flags,
                    public_key,
                    name,
                    culture,
                ],
            );
        }

        for exported in &module.exported_types {
            let implementation = match exported.scope {
                ExportedTypeScope::Assembly(assembly) => CodedIndex::Implementation
                    .encode(TableId::AssemblyRef, assembly.index() as u32 + 1)?,
                ExportedTypeScope::Nested(index) => {
                    CodedIndex::Implementation.encode(TableId::ExportedType, index as u32 + 1)?
                }
            };
            let name = self.strings.add(&exported.name);
            let namespace = self.strings.add(&exported.namespace);
            self.push(
                TableId::ExportedType,
                &[exported.flags, exported.type_def_id, name, namespace, implementation],
            );
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        let module = self.module;

        let mut resources = Writer::new();
        for resource in &module.resources {
            resources.align(8);
            let offset = u32::try_from(resources.pos())
                .map_err(|_| malformed_error!("Resources exceed 4 GiB"))?;
            let length = u32::try_from(resource.data.len())
                .map_err(|_| malformed_error!("Resource {} exceeds 4 GiB", resource.name))?;
            resources.write_le::<u32>(length);
            resources.write_bytes(&resource.data);
            let name = self.strings.add(&resource.name);
            self.push(TableId::ManifestResource, &[offset, resource.flags, name, 0]);
        }

        let mut heap_sizes = 0;
        if self.strings.is_large() {
            heap_sizes |= HEAP_LARGE_STRINGS;
        }
        if self.guids.is_large() {
            heap_sizes |= HEAP_LARGE_GUID;
        }
        if self.blobs.is_large() {
            heap_sizes |= HEAP_LARGE_BLOB;
        }
        let tables = write_tables(&self.tables, heap_sizes, None, SORTED_TABLES)?;
        let strings = self.strings.finish();
        let user_strings = self.user_strings.finish();
        let guids = self.guids.finish();
        let blobs = self.blobs.finish();
        let metadata = write_root(
            &module.runtime_version,
            &[
                ("#~", &tables),
                ("#Strings", &strings),
                ("#US", &user_strings),
                ("#GUID", &guids),
                ("#Blob", &blobs),
            ],
        )?;

        debug!(
            "Writing module {} - {} types, {} member refs, {} bytes of code",
            module.name,
            module.type_defs.len(),
            self.tables[TableId::MemberRef.position()].len(),
            self.bodies.pos()
        );
        let bodies = self.bodies.into_inner();
        let field_data = self.field_data.into_inner();
        let resources = resources.into_inner();
        write_image(&ImageParts {
            options: module.image,
            entry_point: module.entry_point.map_or(0, |token| token.value()),
            bodies: &bodies,
            field_data: &field_data,
            resources: &resources,
            metadata: &metadata,
            debug: module.debug.map(|header| (header, symbol_path(&module.name))),
            win32_resources: module.win32_resources.as_ref(),
        })
    }
}

/// Definition a type reference resolves to inside the module itself.
fn local_definition(
    module: &Module,
    defs: &HashMap<(Option<usize>, &str, &str), usize>,
    id: TypeRefId,
    depth: usize,
) -> Result<Option<usize>> {
    check_depth!(depth);
    let type_ref = module
        .type_refs
        .get(id.index())
        .ok_or_else(|| malformed_error!("Type reference {} out of range", id))?;
    let enclosing = match type_ref.scope {
        ResolutionScope::Assembly(_) => return Ok(None),
        ResolutionScope::Module => None,
        ResolutionScope::Nested(outer) => {
            let Some(outer) = local_definition(module, defs, outer, depth + 1)? else {
                return Ok(None);
            };
            Some(outer)
        }
    };
    Ok(defs
        .get(&(enclosing, type_ref.namespace.as_str(), type_ref.name.as_str()))
        .copied())
}

impl TypeRefEncoder for ImageWriter<'_> {
    fn coded_type_ref(&self, id: TypeRefId) -> Result<u32> {
        match self.target(id)? {
            TypeTarget::Def(index) => {
                CodedIndex::TypeDefOrRef.encode(TableId::TypeDef, self.type_row(index))
            }
            TypeTarget::Row(row) => CodedIndex::TypeDefOrRef.encode(TableId::TypeRef, row),
        }
    }
}

impl TokenEncoder for ImageWriter<'_> {
    fn field_token(&mut self, id: FieldRefId) -> Result<Token> {
        self.field_tokens
            .get(id.index())
            .copied()
            .ok_or_else(|| malformed_error!("Field reference {} out of range", id))
    }

    fn method_token(&mut self, id: MethodRefId) -> Result<Token> {
        self.token_of_method(id)
    }

    fn type_token(&mut self, sig: &TypeSig) -> Result<Token> {
        let (table, row) = self.type_handle(sig)?;
        Ok(Token::from_parts(table as u8, row))
    }

    fn string_token(&mut self, value: &str) -> Result<Token> {
        Ok(Token::from_parts(
            Token::USER_STRING,
            self.user_strings.add(value)?,
        ))
    }

    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token> {
        let index = self.add_blob(|writer, types| encode_locals_sig(writer, locals, types))?;
        let row = match self.standalone_sigs.get(&index) {
            Some(row) => *row,
            None => {
                let row = self.push(TableId::StandAloneSig, &[index]);
                self.standalone_sigs.insert(index, row);
                row
            }
        };
        Ok(Token::from_parts(Token::STANDALONE_SIG, row))
    }
}

#[cfg(test)]
mod tests {
    use uguid::Guid;

    use super::*;
    use crate::module::{
        assembly::Resource,
        attributes::Constant,
        builder::ModuleBuilder,
        instruction::Operand,
        method::{GenericParam, MethodAttributes, MethodBody, MethodDef, ParamDef},
        opcodes::OpCode,
        references::{AssemblyVersion, FieldRef, MethodRef, TypeRef},
        signature::MethodSig,
        types::{
            ClassLayout, FieldAttributes, MethodSemanticsAttributes, PropertyDef, SemanticMethod,
            TypeAttributes,
        },
    };

    fn void() -> MethodSig {
        MethodSig::static_method(TypeSig::VOID, Vec::new())
    }

    fn rich_module() -> Module {
        let mut builder = ModuleBuilder::new("Rich.dll");
        builder
            .assembly("Rich", AssemblyVersion::new(2, 1, 0, 0))
            .mvid(Guid::from_bytes([3; 16]));
        let corlib = builder.assembly_ref("mscorlib", AssemblyVersion::new(4, 0, 0, 0));
        let object = builder.type_ref(corlib, "System", "Object");
        let list = builder.type_ref(corlib, "System.Collections.Generic", "List`1");
        let array = builder.type_ref(corlib, "System", "Array");
        let ctor = builder.method_ref(
            TypeSig::Class(object),
            ".ctor",
            MethodSig::instance(TypeSig::VOID, Vec::new()),
        );
        let list_of_int = TypeSig::GenericInst {
            value_type: false,
            base: list,
            args: vec![TypeSig::INT32],
        };
        let count = builder.method_ref(
            list_of_int.clone(),
            "get_Count",
            MethodSig::instance(TypeSig::INT32, Vec::new()),
        );

        let holder = builder.define_type("Rich", "Holder", TypeAttributes::PUBLIC);
        builder.define_field(holder, "items", FieldAttributes::PUBLIC, list_of_int.clone());
        builder.define_field(holder, "Limit", FieldAttributes::STATIC, TypeSig::INT32);
        let mut getter = MethodDef::new(
            "get_Size",
            MethodAttributes::PUBLIC,
            MethodSig::instance(TypeSig::INT32, Vec::new()),
            None,
        );
        getter.params.push(ParamDef::new(0, "return"));
        builder.define_method(holder, getter);

        let mut generic = MethodDef::new("Make", MethodAttributes::STATIC, void(), None);
        generic.sig.generic_param_count = 1;
        generic.generic_params.push(GenericParam::new("T"));
        builder.define_method(holder, generic);

        let blob = builder.define_type("Rich", "Blob", TypeAttributes::SEALED);
        builder.define_field(blob, "Data", FieldAttributes::STATIC, TypeSig::INT32);

        let mut module = builder.build();
        let holder_ref =
            module.import_type(TypeRef::new("Rich", "Holder", ResolutionScope::Module));
        let items = module.import_field_ref(FieldRef::new(
            TypeSig::Class(holder_ref),
            "items",
            list_of_int.clone(),
        ));
        let mut empty = MethodRef::new(
            TypeSig::Class(array),
            "Empty",
            MethodSig {
                has_this: false,
                generic_param_count: 1,
                return_type: TypeSig::SzArray(Box::new(TypeSig::MVar(0))),
                params: Vec::new(),
            },
        );
        empty.generic_args = vec![TypeSig::STRING];
        let empty = module.import_method_ref(empty);

        let mut body = MethodBody::new();
        body.locals.push(list_of_int);
        body.push(OpCode::Ldarg0, Operand::None);
        body.push(OpCode::Ldfld, Operand::Field(items));
        body.push(OpCode::Stloc0, Operand::None);
        body.push(OpCode::Ldloc0, Operand::None);
        body.push(OpCode::Callvirt, Operand::Method(count));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Call, Operand::Method(empty));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ldstr, Operand::String("done".into()));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        let type_def = &mut module.type_defs[holder];
        type_def.methods[0].body = Some(body);
        type_def.base_type = Some(TypeSig::Class(object));
        type_def.generic_params.push(GenericParam::new("TKey"));
        type_def.fields[1].constant = Some(Constant {
            element_type: 0x08,
            value: vec![5, 0, 0, 0],
        });
        type_def.properties.push(PropertyDef {
            name: "Size".into(),
            flags: 0,
            sig: MethodSig::instance(TypeSig::INT32, Vec::new()),
            constant: None,
            methods: vec![SemanticMethod {
                semantics: MethodSemanticsAttributes::GETTER,
                method: 0,
            }],
            custom_attributes: vec![CustomAttribute::without_arguments(ctor)],
        });

        let type_def = &mut module.type_defs[blob];
        type_def.layout = Some(ClassLayout {
            packing_size: 1,
            class_size: 4,
        });
        type_def.fields[0].initial_value = Some(vec![1, 2, 3, 4]);

        module.resources.push(Resource {
            name: "config.json".into(),
            flags: 1,
            data: b"{}".to_vec(),
        });
        module
    }

    #[test]
    fn image_starts_with_dos_header() {
        let bytes = rich_module().to_bytes().unwrap();
        assert_eq!(&bytes[..2], b"MZ");
        assert_eq!(Module::from_bytes(&bytes).unwrap().to_bytes().unwrap(), bytes);
    }

    #[test]
    fn local_references_become_definitions() {
        let bytes = rich_module().to_bytes().unwrap();
        let decoded = Module::from_bytes(&bytes).unwrap();

        let holder = &decoded.type_defs[0];
        assert_eq!(holder.name, "Holder");
        assert_eq!(holder.generic_params[0].name, "TKey");
        assert_eq!(holder.properties[0].methods[0].method, 0);
        assert_eq!(holder.properties[0].custom_attributes.len(), 1);
        assert_eq!(holder.fields[1].constant.as_ref().unwrap().value, [5, 0, 0, 0]);
        assert_eq!(holder.methods[1].generic_params.len(), 1);
        assert_eq!(decoded.type_defs[1].fields[0].initial_value, Some(vec![1, 2, 3, 4]));
        assert_eq!(decoded.resources[0].data, b"{}");

        let body = holder.methods[0].body.as_ref().unwrap();
        let Operand::Field(items) = body.instructions[1].operand else {
            panic!("expected a field operand");
        };
        let items = &decoded.field_refs[items.index()];
        assert_eq!(items.name, "items");
        let TypeSig::Class(declaring) = items.declaring else {
            panic!("expected a class");
        };
        assert_eq!(decoded.type_refs[declaring.index()].scope, ResolutionScope::Module);

        let Operand::Method(empty) = body.instructions[6].operand else {
            panic!("expected a method operand");
        };
        assert_eq!(decoded.method_refs[empty.index()].generic_args, [TypeSig::STRING]);
        assert_eq!(
            body.instructions[8].operand,
            Operand::String("done".to_string())
        );
    }

    #[test]
    fn module_type_is_not_duplicated() {
        let mut builder = ModuleBuilder::new("Globals.dll");
        let globals = builder.define_type("", MODULE_TYPE, TypeAttributes::empty());
        builder.define_field(globals, "counter", FieldAttributes::STATIC, TypeSig::INT32);
        let bytes = builder.build().to_bytes().unwrap();

        let decoded = Module::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.type_defs.len(), 1);
        assert_eq!(decoded.type_defs[0].fields[0].name, "counter");
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn multi_module_assemblies_are_rejected() {
        let mut module = Module::new("Multi.dll");
        module.module_count = 2;
        assert!(matches!(module.to_bytes(), Err(Error::MultipleModules(2))));
    }

    #[test]
    fn undefined_local_nested_type() {
        let mut builder = ModuleBuilder::new("Nested.dll");
        builder.define_type("A", "Outer", TypeAttributes::PUBLIC);
        let mut module = builder.build();
        let outer = module.import_type(TypeRef::new("A", "Outer", ResolutionScope::Module));
        module.import_type(TypeRef::new("", "Missing", ResolutionScope::Nested(outer)));
        assert!(matches!(module.to_bytes(), Err(Error::Malformed { .. })));
    }
}
