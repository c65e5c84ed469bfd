//! Signature blobs (ECMA-335 II.23.2).
//!
//! Named types inside signatures are `TypeDefOrRef` coded indexes. Translating them to and
//! from [`TypeRefId`] handles depends on the table layout of the image being read or written,
//! so both directions go through a small trait implemented by the reader and the writer.

use crate::{
    file::{parser::Parser, writer::Writer},
    module::{
        references::TypeRefId,
        signature::{MethodSig, PrimitiveType, TypeSig},
    },
    Error, Result,
};

pub(crate) const ELEMENT_TYPE_PTR: u8 = 0x0F;
pub(crate) const ELEMENT_TYPE_BYREF: u8 = 0x10;
pub(crate) const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
pub(crate) const ELEMENT_TYPE_CLASS: u8 = 0x12;
pub(crate) const ELEMENT_TYPE_VAR: u8 = 0x13;
pub(crate) const ELEMENT_TYPE_ARRAY: u8 = 0x14;
pub(crate) const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
pub(crate) const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
pub(crate) const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
pub(crate) const ELEMENT_TYPE_MVAR: u8 = 0x1E;
pub(crate) const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
pub(crate) const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
pub(crate) const ELEMENT_TYPE_SENTINEL: u8 = 0x41;
pub(crate) const ELEMENT_TYPE_PINNED: u8 = 0x45;

pub(crate) const CALLCONV_FIELD: u8 = 0x06;
pub(crate) const CALLCONV_LOCAL_SIG: u8 = 0x07;
pub(crate) const CALLCONV_PROPERTY: u8 = 0x08;
pub(crate) const CALLCONV_GENERIC_INST: u8 = 0x0A;
pub(crate) const CALLCONV_GENERIC: u8 = 0x10;
pub(crate) const CALLCONV_HASTHIS: u8 = 0x20;
pub(crate) const CALLCONV_EXPLICIT_THIS: u8 = 0x40;

/// Resolves the `TypeDefOrRef` coded indexes of the image being read.
pub(crate) trait TypeRefDecoder {
    fn type_ref(&mut self, coded: u32) -> Result<TypeRefId>;
}

/// Produces `TypeDefOrRef` coded indexes for the image being written.
pub(crate) trait TypeRefEncoder {
    fn coded_type_ref(&self, id: TypeRefId) -> Result<u32>;
}

fn encode_type_ref(writer: &mut Writer, id: TypeRefId, types: &dyn TypeRefEncoder) -> Result<()> {
    writer.write_compressed_uint(types.coded_type_ref(id)?)
}

/// Append an encoded type.
pub(crate) fn encode_type(
    writer: &mut Writer,
    sig: &TypeSig,
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    match sig {
        TypeSig::Primitive(primitive) => writer.write_le::<u8>(primitive.element_type()),
        TypeSig::Class(id) => {
            writer.write_le::<u8>(ELEMENT_TYPE_CLASS);
            encode_type_ref(writer, *id, types)?;
        }
        TypeSig::ValueType(id) => {
            writer.write_le::<u8>(ELEMENT_TYPE_VALUETYPE);
            encode_type_ref(writer, *id, types)?;
        }
        TypeSig::GenericInst {
            value_type,
            base,
            args,
        } => {
            writer.write_le::<u8>(ELEMENT_TYPE_GENERICINST);
            writer.write_le::<u8>(if *value_type {
                ELEMENT_TYPE_VALUETYPE
            } else {
                ELEMENT_TYPE_CLASS
            });
            encode_type_ref(writer, *base, types)?;
            writer.write_compressed_usize(args.len())?;
            for arg in args {
                encode_type(writer, arg, types)?;
            }
        }
        TypeSig::SzArray(element) => {
            writer.write_le::<u8>(ELEMENT_TYPE_SZARRAY);
            encode_type(writer, element, types)?;
        }
        TypeSig::Array {
            element,
            rank,
            sizes,
            lower_bounds,
        } => {
            writer.write_le::<u8>(ELEMENT_TYPE_ARRAY);
            encode_type(writer, element, types)?;
            writer.write_compressed_uint(*rank)?;
            writer.write_compressed_usize(sizes.len())?;
            for size in sizes {
                writer.write_compressed_uint(*size)?;
            }
            writer.write_compressed_usize(lower_bounds.len())?;
            for bound in lower_bounds {
                writer.write_compressed_int(*bound)?;
            }
        }
        TypeSig::ByRef(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE_BYREF);
            encode_type(writer, inner, types)?;
        }
        TypeSig::Ptr(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE_PTR);
            encode_type(writer, inner, types)?;
        }
        TypeSig::Var(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE_VAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSig::MVar(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE_MVAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSig::Modified {
            required,
            modifier,
            inner,
        } => {
            writer.write_le::<u8>(if *required {
                ELEMENT_TYPE_CMOD_REQD
            } else {
                ELEMENT_TYPE_CMOD_OPT
            });
            encode_type_ref(writer, *modifier, types)?;
            encode_type(writer, inner, types)?;
        }
        TypeSig::Pinned(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE_PINNED);
            encode_type(writer, inner, types)?;
        }
    }
    Ok(())
}

fn read_count(parser: &mut Parser) -> Result<usize> {
    let count = parser.read_compressed_usize()?;
    if count > parser.remaining() {
        return Err(malformed_error!("Invalid signature count {}", count));
    }
    Ok(count)
}

/// Decode a type.
pub(crate) fn decode_type(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
    depth: usize,
) -> Result<TypeSig> {
    check_depth!(depth);

    let element = parser.read_le::<u8>()?;
    if let Some(primitive) = PrimitiveType::from_element_type(element) {
        return Ok(TypeSig::Primitive(primitive));
    }

    Ok(match element {
        ELEMENT_TYPE_CLASS => TypeSig::Class(types.type_ref(parser.read_compressed_uint()?)?),
        ELEMENT_TYPE_VALUETYPE => {
            TypeSig::ValueType(types.type_ref(parser.read_compressed_uint()?)?)
        }
        ELEMENT_TYPE_GENERICINST => {
            let value_type = match parser.read_le::<u8>()? {
                ELEMENT_TYPE_CLASS => false,
                ELEMENT_TYPE_VALUETYPE => true,
                other => {
                    return Err(malformed_error!(
                        "Invalid generic instantiation kind 0x{:02x}",
                        other
                    ))
                }
            };
            let base = types.type_ref(parser.read_compressed_uint()?)?;
            let count = read_count(parser)?;
            if count == 0 {
                return Err(malformed_error!("Generic instantiation without arguments"));
            }
            let mut args = Vec::with_capacity(count);
            for _ in 0..count {
                args.push(decode_type(parser, types, depth + 1)?);
            }
            TypeSig::GenericInst {
                value_type,
                base,
                args,
            }
        }
        ELEMENT_TYPE_SZARRAY => TypeSig::SzArray(Box::new(decode_type(parser, types, depth + 1)?)),
        ELEMENT_TYPE_ARRAY => {
            let element = decode_type(parser, types, depth + 1)?;
            let rank = parser.read_compressed_uint()?;
            if rank == 0 {
                return Err(malformed_error!("Array rank must not be zero"));
            }
            let mut sizes = Vec::new();
            for _ in 0..read_count(parser)? {
                sizes.push(parser.read_compressed_uint()?);
            }
            let mut lower_bounds = Vec::new();
            for _ in 0..read_count(parser)? {
                lower_bounds.push(parser.read_compressed_int()?);
            }
            TypeSig::Array {
                element: Box::new(element),
                rank,
                sizes,
                lower_bounds,
            }
        }
        ELEMENT_TYPE_BYREF => TypeSig::ByRef(Box::new(decode_type(parser, types, depth + 1)?)),
        ELEMENT_TYPE_PTR => TypeSig::Ptr(Box::new(decode_type(parser, types, depth + 1)?)),
        ELEMENT_TYPE_VAR => TypeSig::Var(parser.read_compressed_uint()?),
        ELEMENT_TYPE_MVAR => TypeSig::MVar(parser.read_compressed_uint()?),
        ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT => {
            let modifier = types.type_ref(parser.read_compressed_uint()?)?;
            TypeSig::Modified {
                required: element == ELEMENT_TYPE_CMOD_REQD,
                modifier,
                inner: Box::new(decode_type(parser, types, depth + 1)?),
            }
        }
        ELEMENT_TYPE_PINNED => TypeSig::Pinned(Box::new(decode_type(parser, types, depth + 1)?)),
        ELEMENT_TYPE_FNPTR | ELEMENT_TYPE_SENTINEL => return Err(Error::NotSupported),
        other => return Err(malformed_error!("Unknown element type 0x{:02x}", other)),
    })
}

/// Append an encoded method signature.
pub(crate) fn encode_method_sig(
    writer: &mut Writer,
    sig: &MethodSig,
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    let mut convention = 0;
    if sig.has_this {
        convention |= CALLCONV_HASTHIS;
    }
    if sig.generic_param_count > 0 {
        convention |= CALLCONV_GENERIC;
    }
    writer.write_le::<u8>(convention);
    if sig.generic_param_count > 0 {
        writer.write_compressed_uint(sig.generic_param_count)?;
    }
    encode_params(writer, sig, types)
}

fn encode_params(writer: &mut Writer, sig: &MethodSig, types: &dyn TypeRefEncoder) -> Result<()> {
    writer.write_compressed_usize(sig.params.len())?;
    encode_type(writer, &sig.return_type, types)?;
    for param in &sig.params {
        encode_type(writer, param, types)?;
    }
    Ok(())
}

/// Decode a managed method signature. Unmanaged and `vararg` calling conventions are not
/// supported.
pub(crate) fn decode_method_sig(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<MethodSig> {
    let convention = parser.read_le::<u8>()?;
    if convention & CALLCONV_EXPLICIT_THIS != 0
        || convention & !(CALLCONV_HASTHIS | CALLCONV_GENERIC) != 0
    {
        return Err(Error::NotSupported);
    }

    let generic_param_count = if convention & CALLCONV_GENERIC != 0 {
        let count = parser.read_compressed_uint()?;
        if count == 0 {
            return Err(malformed_error!("Generic method signature without parameters"));
        }
        count
    } else {
        0
    };

    let (return_type, params) = decode_params(parser, types)?;
    Ok(MethodSig {
        has_this: convention & CALLCONV_HASTHIS != 0,
        generic_param_count,
        return_type,
        params,
    })
}

fn decode_params(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<(TypeSig, Vec<TypeSig>)> {
    let count = read_count(parser)?;
    let return_type = decode_type(parser, types, 0)?;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        params.push(decode_type(parser, types, 0)?);
    }
    Ok((return_type, params))
}

/// Append an encoded property signature; the property type is the return type.
pub(crate) fn encode_property_sig(
    writer: &mut Writer,
    sig: &MethodSig,
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    let mut convention = CALLCONV_PROPERTY;
    if sig.has_this {
        convention |= CALLCONV_HASTHIS;
    }
    writer.write_le::<u8>(convention);
    encode_params(writer, sig, types)
}

/// Decode a property signature.
pub(crate) fn decode_property_sig(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<MethodSig> {
    let convention = parser.read_le::<u8>()?;
    if convention & !CALLCONV_HASTHIS != CALLCONV_PROPERTY {
        return Err(malformed_error!(
            "Invalid property signature prefix 0x{:02x}",
            convention
        ));
    }
    let (return_type, params) = decode_params(parser, types)?;
    Ok(MethodSig {
        has_this: convention & CALLCONV_HASTHIS != 0,
        generic_param_count: 0,
        return_type,
        params,
    })
}

/// Append an encoded field signature.
pub(crate) fn encode_field_sig(
    writer: &mut Writer,
    field_type: &TypeSig,
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    writer.write_le::<u8>(CALLCONV_FIELD);
    encode_type(writer, field_type, types)
}

/// Decode a field signature.
pub(crate) fn decode_field_sig(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<TypeSig> {
    let convention = parser.read_le::<u8>()?;
    if convention != CALLCONV_FIELD {
        return Err(malformed_error!(
            "Invalid field signature prefix 0x{:02x}",
            convention
        ));
    }
    decode_type(parser, types, 0)
}

/// Append a local variable signature.
pub(crate) fn encode_locals_sig(
    writer: &mut Writer,
    locals: &[TypeSig],
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    writer.write_le::<u8>(CALLCONV_LOCAL_SIG);
    writer.write_compressed_usize(locals.len())?;
    for local in locals {
        encode_type(writer, local, types)?;
    }
    Ok(())
}

/// Decode a local variable signature.
pub(crate) fn decode_locals_sig(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<Vec<TypeSig>> {
    match parser.read_le::<u8>()? {
        CALLCONV_LOCAL_SIG => {}
        CALLCONV_FIELD => return Err(Error::NotSupported),
        other => {
            return Err(malformed_error!(
                "Invalid local signature prefix 0x{:02x}",
                other
            ))
        }
    }
    let count = read_count(parser)?;
    let mut locals = Vec::with_capacity(count);
    for _ in 0..count {
        locals.push(decode_type(parser, types, 0)?);
    }
    Ok(locals)
}

/// Append the instantiation blob of a `MethodSpec` row.
pub(crate) fn encode_method_spec(
    writer: &mut Writer,
    args: &[TypeSig],
    types: &dyn TypeRefEncoder,
) -> Result<()> {
    writer.write_le::<u8>(CALLCONV_GENERIC_INST);
    writer.write_compressed_usize(args.len())?;
    for arg in args {
        encode_type(writer, arg, types)?;
    }
    Ok(())
}

/// Decode the instantiation blob of a `MethodSpec` row.
pub(crate) fn decode_method_spec(
    parser: &mut Parser,
    types: &mut dyn TypeRefDecoder,
) -> Result<Vec<TypeSig>> {
    let convention = parser.read_le::<u8>()?;
    if convention != CALLCONV_GENERIC_INST {
        return Err(malformed_error!(
            "Invalid method instantiation prefix 0x{:02x}",
            convention
        ));
    }
    let count = read_count(parser)?;
    if count == 0 {
        return Err(malformed_error!("Method instantiation without arguments"));
    }
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(decode_type(parser, types, 0)?);
    }
    Ok(args)
}

/// Encode a signature into a fresh blob.
pub(crate) fn blob<F>(encode: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut Writer) -> Result<()>,
{
    let mut writer = Writer::new();
    encode(&mut writer)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Maps handle `n` to `TypeRef` row `n + 1` and back.
    struct Rows(usize);

    impl TypeRefEncoder for Rows {
        fn coded_type_ref(&self, id: TypeRefId) -> Result<u32> {
            Ok(((id.0 + 1) << 2) | 1)
        }
    }

    impl TypeRefDecoder for Rows {
        fn type_ref(&mut self, coded: u32) -> Result<TypeRefId> {
            let row = (coded >> 2) as usize;
            if coded & 3 != 1 || row == 0 || row > self.0 {
                return Err(malformed_error!("Type reference {} out of range", coded));
            }
            Ok(TypeRefId::new(row - 1))
        }
    }

    #[test]
    fn class_encoding() {
        let mut writer = Writer::new();
        encode_type(&mut writer, &TypeSig::Class(TypeRefId::new(0)), &Rows(1)).unwrap();
        assert_eq!(writer.into_inner(), vec![ELEMENT_TYPE_CLASS, 0x05]);
    }

    #[test]
    fn generic_method_sig() {
        let sig = MethodSig {
            has_this: true,
            generic_param_count: 1,
            return_type: TypeSig::MVar(0),
            params: vec![
                TypeSig::GenericInst {
                    value_type: false,
                    base: TypeRefId::new(1),
                    args: vec![TypeSig::MVar(0)],
                },
                TypeSig::Array {
                    element: Box::new(TypeSig::INT32),
                    rank: 2,
                    sizes: vec![4],
                    lower_bounds: vec![-1, 0],
                },
            ],
        };

        let bytes = blob(|writer| encode_method_sig(writer, &sig, &Rows(2))).unwrap();
        assert_eq!(bytes[0], CALLCONV_HASTHIS | CALLCONV_GENERIC);

        let mut parser = Parser::new(&bytes);
        assert_eq!(decode_method_sig(&mut parser, &mut Rows(2)).unwrap(), sig);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn modifiers_and_pinned_locals() {
        // int32 modreq(IsVolatile), as emitted for volatile fields
        let field = [CALLCONV_FIELD, ELEMENT_TYPE_CMOD_REQD, 0x05, 0x08];
        let mut parser = Parser::new(&field);
        let decoded = decode_field_sig(&mut parser, &mut Rows(1)).unwrap();
        assert_eq!(
            decoded,
            TypeSig::Modified {
                required: true,
                modifier: TypeRefId::new(0),
                inner: Box::new(TypeSig::INT32),
            }
        );
        let encoded = blob(|writer| encode_field_sig(writer, &decoded, &Rows(1))).unwrap();
        assert_eq!(encoded, field);

        let locals = [CALLCONV_LOCAL_SIG, 2, ELEMENT_TYPE_PINNED, ELEMENT_TYPE_BYREF, 0x05, 0x0E];
        let mut parser = Parser::new(&locals);
        let decoded = decode_locals_sig(&mut parser, &mut Rows(0)).unwrap();
        assert_eq!(
            decoded,
            vec![
                TypeSig::Pinned(Box::new(TypeSig::ByRef(Box::new(TypeSig::Primitive(
                    PrimitiveType::U1
                ))))),
                TypeSig::STRING,
            ]
        );
    }

    #[test]
    fn unsupported_conventions() {
        // vararg
        let mut parser = Parser::new(&[0x05, 0x00, 0x01]);
        assert!(matches!(
            decode_method_sig(&mut parser, &mut Rows(0)),
            Err(Error::NotSupported)
        ));
        // function pointer parameter
        let mut parser = Parser::new(&[0x00, 0x01, 0x01, ELEMENT_TYPE_FNPTR]);
        assert!(matches!(
            decode_method_sig(&mut parser, &mut Rows(0)),
            Err(Error::NotSupported)
        ));
    }

    #[test]
    fn property_and_method_spec() {
        let sig = MethodSig::instance(TypeSig::INT32, vec![TypeSig::STRING]);
        let bytes = blob(|writer| encode_property_sig(writer, &sig, &Rows(0))).unwrap();
        assert_eq!(bytes, vec![0x28, 0x01, 0x08, 0x0E]);
        let mut parser = Parser::new(&bytes);
        assert_eq!(decode_property_sig(&mut parser, &mut Rows(0)).unwrap(), sig);

        let args = vec![TypeSig::Class(TypeRefId::new(0))];
        let bytes = blob(|writer| encode_method_spec(writer, &args, &Rows(1))).unwrap();
        assert_eq!(bytes, vec![0x0A, 0x01, ELEMENT_TYPE_CLASS, 0x05]);
        let mut parser = Parser::new(&bytes);
        assert_eq!(decode_method_spec(&mut parser, &mut Rows(1)).unwrap(), args);
    }

    #[test]
    fn invalid_type_ref_row() {
        let data = [ELEMENT_TYPE_CLASS, 0x09];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            decode_type(&mut parser, &mut Rows(1), 0),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn recursion_limit() {
        let mut data = vec![ELEMENT_TYPE_SZARRAY; 200];
        data.push(0x08);
        let mut parser = Parser::new(&data);
        assert!(matches!(
            decode_type(&mut parser, &mut Rows(0), 0),
            Err(Error::RecursionLimit(_))
        ));
    }

    #[test]
    fn field_prefix() {
        let data = [0x07, 0x08];
        let mut parser = Parser::new(&data);
        assert!(decode_field_sig(&mut parser, &mut Rows(0)).is_err());
    }
}
