//! Method bodies (ECMA-335 II.25.4): header, CIL instruction stream and exception sections.
//!
//! Branch operands are relative to the end of the instruction. Metadata operands are tokens;
//! turning them into [`Operand`]s and back depends on the tables of the image, so both
//! directions go through [`TokenResolver`] and [`TokenEncoder`].

use std::collections::HashMap;

use crate::{
    file::{parser::Parser, writer::Writer},
    module::{
        instruction::{InstrId, Instruction, Operand},
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        opcodes::{OpCode, OperandKind, FE_PREFIX},
        references::{FieldRefId, MethodRefId},
        signature::TypeSig,
        token::Token,
    },
    Error, Result,
};

const HEADER_TINY: u8 = 0x02;
const HEADER_FAT: u16 = 0x0003;
const HEADER_FORMAT_MASK: u8 = 0x03;
const FAT_MORE_SECTS: u16 = 0x0008;
const FAT_INIT_LOCALS: u16 = 0x0010;
/// Fat header size in dwords, stored in the top nibble of the flags.
const FAT_HEADER_DWORDS: u16 = 3;

const SECT_EH_TABLE: u8 = 0x01;
const SECT_FAT_FORMAT: u8 = 0x40;
const SECT_MORE_SECTS: u8 = 0x80;

const SMALL_CLAUSE_SIZE: usize = 12;
const FAT_CLAUSE_SIZE: usize = 24;

/// Resolves the tokens found in a body being read.
pub(crate) trait TokenResolver {
    /// Field, method, type or user string operand of a token.
    fn operand(&mut self, token: Token) -> Result<Operand>;

    /// Local variable types of a `StandAloneSig` token.
    fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>>;
}

/// Produces the tokens of a body being written.
pub(crate) trait TokenEncoder {
    fn field_token(&mut self, id: FieldRefId) -> Result<Token>;

    fn method_token(&mut self, id: MethodRefId) -> Result<Token>;

    fn type_token(&mut self, sig: &TypeSig) -> Result<Token>;

    fn string_token(&mut self, value: &str) -> Result<Token>;

    /// `StandAloneSig` token of a local variable signature.
    fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token>;
}

fn operand_token(operand: &Operand, tokens: &mut dyn TokenEncoder) -> Result<Token> {
    match operand {
        Operand::Field(id) => tokens.field_token(*id),
        Operand::Method(id) => tokens.method_token(*id),
        Operand::Type(sig) => tokens.type_token(sig),
        Operand::String(value) => tokens.string_token(value),
        _ => Err(malformed_error!("Operand is not a metadata reference")),
    }
}

fn relative_target(
    targets: &HashMap<InstrId, u32>,
    target: InstrId,
    next_offset: u32,
) -> Result<i64> {
    let Some(offset) = targets.get(&target) else {
        return Err(malformed_error!("Branch to unknown instruction {}", target));
    };
    Ok(i64::from(*offset) - i64::from(next_offset))
}

/// Encode the CIL of a body.
pub(crate) fn encode_code(body: &MethodBody, tokens: &mut dyn TokenEncoder) -> Result<Vec<u8>> {
    let offsets = body.offsets();
    let targets: HashMap<InstrId, u32> = body
        .instructions
        .iter()
        .zip(offsets.iter())
        .map(|(instr, offset)| (instr.id, *offset))
        .collect();

    let mut writer = Writer::new();
    for (instr, next_offset) in body.instructions.iter().zip(offsets.iter().skip(1)) {
        let value = instr.opcode.value();
        if value > 0xFF {
            writer.write_le::<u8>(FE_PREFIX);
        }
        writer.write_le::<u8>(value as u8);

        let mismatch = || {
            malformed_error!(
                "Operand {:?} does not fit opcode {}",
                instr.operand,
                instr.opcode
            )
        };

        match (instr.opcode.operand_kind(), &instr.operand) {
            (OperandKind::None, Operand::None) => {}
            (OperandKind::ShortInlineI, Operand::Int32(value)) => {
                writer.write_le::<i8>(i8::try_from(*value).map_err(|_| mismatch())?);
            }
            (OperandKind::InlineI, Operand::Int32(value)) => writer.write_le::<i32>(*value),
            (OperandKind::InlineI8, Operand::Int64(value)) => writer.write_le::<i64>(*value),
            (OperandKind::ShortInlineR, Operand::Float32(value)) => writer.write_le::<f32>(*value),
            (OperandKind::InlineR, Operand::Float64(value)) => writer.write_le::<f64>(*value),
            (OperandKind::ShortInlineVar, Operand::Local(index))
            | (OperandKind::ShortInlineArg, Operand::Arg(index)) => {
                writer.write_le::<u8>(u8::try_from(*index).map_err(|_| mismatch())?);
            }
            (OperandKind::InlineVar, Operand::Local(index))
            | (OperandKind::InlineArg, Operand::Arg(index)) => writer.write_le::<u16>(*index),
            (OperandKind::ShortInlineBrTarget, Operand::Target(target)) => {
                let delta = relative_target(&targets, *target, *next_offset)?;
                let delta = i8::try_from(delta).map_err(|_| {
                    malformed_error!("Short branch {} cannot reach {}", instr.opcode, target)
                })?;
                writer.write_le::<i8>(delta);
            }
            (OperandKind::InlineBrTarget, Operand::Target(target)) => {
                let delta = relative_target(&targets, *target, *next_offset)?;
                writer.write_le::<i32>(i32::try_from(delta).map_err(|_| mismatch())?);
            }
            (OperandKind::InlineSwitch, Operand::Switch(cases)) => {
                writer.write_le::<u32>(cases.len() as u32);
                for case in cases {
                    let delta = relative_target(&targets, *case, *next_offset)?;
                    writer.write_le::<i32>(i32::try_from(delta).map_err(|_| mismatch())?);
                }
            }
            (OperandKind::InlineString, operand @ Operand::String(_))
            | (OperandKind::InlineField, operand @ Operand::Field(_))
            | (OperandKind::InlineMethod, operand @ Operand::Method(_))
            | (OperandKind::InlineType, operand @ Operand::Type(_))
            | (
                OperandKind::InlineTok,
                operand @ (Operand::Type(_) | Operand::Field(_) | Operand::Method(_)),
            ) => {
                let token = operand_token(operand, tokens)?;
                writer.write_le::<u32>(token.value());
            }
            (OperandKind::InlineSig, _) => return Err(Error::NotSupported),
            _ => return Err(mismatch()),
        }
    }

    Ok(writer.into_inner())
}

enum Branch {
    Single(u32),
    Switch(Vec<u32>),
}

/// Decode a CIL instruction stream, assigning sequential instruction ids.
///
/// Returns the instructions and the byte offset of each, followed by the code size.
pub(crate) fn decode_code(
    code: &[u8],
    tokens: &mut dyn TokenResolver,
) -> Result<(Vec<Instruction>, Vec<u32>)> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    let mut offsets = Vec::new();
    let mut branches = Vec::new();

    while parser.has_more_data() {
        let offset = parser.pos() as u32;
        let first = parser.read_le::<u8>()?;
        let value = if first == FE_PREFIX {
            0xFE00 | u16::from(parser.read_le::<u8>()?)
        } else {
            u16::from(first)
        };
        let Some(opcode) = OpCode::from_value(value) else {
            return Err(malformed_error!(
                "Unknown opcode 0x{:x} at offset {}",
                value,
                offset
            ));
        };

        let kind = opcode.operand_kind();
        let operand = match kind {
            OperandKind::None => Operand::None,
            OperandKind::ShortInlineI => Operand::Int32(i32::from(parser.read_le::<i8>()?)),
            OperandKind::InlineI => Operand::Int32(parser.read_le::<i32>()?),
            OperandKind::InlineI8 => Operand::Int64(parser.read_le::<i64>()?),
            OperandKind::ShortInlineR => Operand::Float32(parser.read_le::<f32>()?),
            OperandKind::InlineR => Operand::Float64(parser.read_le::<f64>()?),
            OperandKind::ShortInlineVar => Operand::Local(u16::from(parser.read_le::<u8>()?)),
            OperandKind::InlineVar => Operand::Local(parser.read_le::<u16>()?),
            OperandKind::ShortInlineArg => Operand::Arg(u16::from(parser.read_le::<u8>()?)),
            OperandKind::InlineArg => Operand::Arg(parser.read_le::<u16>()?),
            OperandKind::ShortInlineBrTarget => {
                let delta = i64::from(parser.read_le::<i8>()?);
                branches.push((instructions.len(), Branch::Single(absolute(&parser, delta)?)));
                Operand::None
            }
            OperandKind::InlineBrTarget => {
                let delta = i64::from(parser.read_le::<i32>()?);
                branches.push((instructions.len(), Branch::Single(absolute(&parser, delta)?)));
                Operand::None
            }
            OperandKind::InlineSwitch => {
                let count = parser.read_le::<u32>()? as usize;
                if count.saturating_mul(4) > parser.remaining() {
                    return Err(out_of_bounds_error!());
                }
                let mut deltas = Vec::with_capacity(count);
                for _ in 0..count {
                    deltas.push(i64::from(parser.read_le::<i32>()?));
                }
                let cases = deltas
                    .into_iter()
                    .map(|delta| absolute(&parser, delta))
                    .collect::<Result<Vec<_>>>()?;
                branches.push((instructions.len(), Branch::Switch(cases)));
                Operand::None
            }
            OperandKind::InlineSig => return Err(Error::NotSupported),
            OperandKind::InlineString
            | OperandKind::InlineField
            | OperandKind::InlineMethod
            | OperandKind::InlineType
            | OperandKind::InlineTok => {
                let token = Token::new(parser.read_le::<u32>()?);
                let operand = tokens.operand(token)?;
                let valid = matches!(
                    (kind, &operand),
                    (OperandKind::InlineString, Operand::String(_))
                        | (OperandKind::InlineField, Operand::Field(_))
                        | (OperandKind::InlineMethod, Operand::Method(_))
                        | (OperandKind::InlineType, Operand::Type(_))
                        | (
                            OperandKind::InlineTok,
                            Operand::Type(_) | Operand::Field(_) | Operand::Method(_)
                        )
                );
                if !valid {
                    return Err(malformed_error!(
                        "Token {} does not fit opcode {}",
                        token,
                        opcode
                    ));
                }
                operand
            }
        };

        offsets.push(offset);
        instructions.push(Instruction::new(
            InstrId::new(instructions.len()),
            opcode,
            operand,
        ));
    }
    offsets.push(code.len() as u32);

    let by_offset: HashMap<u32, InstrId> = offsets
        .iter()
        .zip(instructions.iter())
        .map(|(offset, instr)| (*offset, instr.id))
        .collect();
    let lookup = |offset: u32| {
        by_offset.get(&offset).copied().ok_or_else(|| {
            malformed_error!("Branch into the middle of an instruction at {}", offset)
        })
    };

    for (index, branch) in branches {
        instructions[index].operand = match branch {
            Branch::Single(target) => Operand::Target(lookup(target)?),
            Branch::Switch(cases) => Operand::Switch(
                cases
                    .into_iter()
                    .map(lookup)
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
    }

    Ok((instructions, offsets))
}

fn absolute(parser: &Parser, delta: i64) -> Result<u32> {
    let target = parser.pos() as i64 + delta;
    u32::try_from(target)
        .map_err(|_| malformed_error!("Branch target {} before method start", target))
}

/// An exception clause with byte offsets.
struct RawClause {
    flags: u16,
    try_start: u32,
    try_length: u32,
    handler_start: u32,
    handler_length: u32,
    extra: u32,
}

impl RawClause {
    fn fits_small(&self) -> bool {
        self.try_start <= 0xFFFF
            && self.handler_start <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_length <= 0xFF
    }
}

fn raw_clauses(
    body: &MethodBody,
    code_size: u32,
    tokens: &mut dyn TokenEncoder,
) -> Result<Vec<RawClause>> {
    let offsets = body.offsets();
    let offset_of = |id: Option<InstrId>| -> Result<u32> {
        match id {
            None => Ok(code_size),
            Some(id) => body
                .index_of(id)
                .map(|index| offsets[index])
                .ok_or_else(|| malformed_error!("Exception handler bound {} not in body", id)),
        }
    };

    let mut clauses = Vec::with_capacity(body.handlers.len());
    for handler in &body.handlers {
        let try_start = offset_of(Some(handler.try_start))?;
        let try_end = offset_of(handler.try_end)?;
        let handler_start = offset_of(Some(handler.handler_start))?;
        let handler_end = offset_of(handler.handler_end)?;
        if try_end < try_start || handler_end < handler_start {
            return Err(malformed_error!("Exception handler with negative length"));
        }

        let extra = if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
            offset_of(handler.filter_start)?
        } else if let Some(catch_type) = &handler.catch_type {
            tokens.type_token(catch_type)?.value()
        } else {
            0
        };
        clauses.push(RawClause {
            flags: handler.flags.bits(),
            try_start,
            try_length: try_end - try_start,
            handler_start,
            handler_length: handler_end - handler_start,
            extra,
        });
    }
    Ok(clauses)
}

/// Encode a complete method body: header, code and exception section.
///
/// Small bodies without locals or handlers get a tiny header; a tiny header implies a stack
/// depth of 8 and no zero-initialization.
pub(crate) fn encode_body(body: &MethodBody, tokens: &mut dyn TokenEncoder) -> Result<Vec<u8>> {
    let code = encode_code(body, tokens)?;
    let code_size = u32::try_from(code.len())
        .map_err(|_| malformed_error!("Method body of {} bytes", code.len()))?;

    let tiny = code.len() < 64
        && body.max_stack == 8
        && !body.init_locals
        && body.locals.is_empty()
        && body.handlers.is_empty();

    let mut writer = Writer::new();
    if tiny {
        writer.write_le::<u8>(((code.len() as u8) << 2) | HEADER_TINY);
        writer.write_bytes(&code);
        return Ok(writer.into_inner());
    }

    let locals = if body.locals.is_empty() {
        0
    } else {
        tokens.locals_token(&body.locals)?.value()
    };
    let clauses = raw_clauses(body, code_size, tokens)?;

    let mut flags = HEADER_FAT | (FAT_HEADER_DWORDS << 12);
    if body.init_locals {
        flags |= FAT_INIT_LOCALS;
    }
    if !clauses.is_empty() {
        flags |= FAT_MORE_SECTS;
    }
    writer.write_le::<u16>(flags);
    writer.write_le::<u16>(body.max_stack);
    writer.write_le::<u32>(code_size);
    writer.write_le::<u32>(locals);
    writer.write_bytes(&code);

    if clauses.is_empty() {
        return Ok(writer.into_inner());
    }
    writer.align(4);

    let small_size = 4 + clauses.len() * SMALL_CLAUSE_SIZE;
    if small_size <= 0xFF && clauses.iter().all(RawClause::fits_small) {
        writer.write_le::<u8>(SECT_EH_TABLE);
        writer.write_le::<u8>(small_size as u8);
        writer.write_le::<u16>(0);
        for clause in &clauses {
            writer.write_le::<u16>(clause.flags);
            writer.write_le::<u16>(clause.try_start as u16);
            writer.write_le::<u8>(clause.try_length as u8);
            writer.write_le::<u16>(clause.handler_start as u16);
            writer.write_le::<u8>(clause.handler_length as u8);
            writer.write_le::<u32>(clause.extra);
        }
    } else {
        let fat_size = 4 + clauses.len() * FAT_CLAUSE_SIZE;
        if fat_size > 0x00FF_FFFF {
            return Err(malformed_error!("Too many exception clauses"));
        }
        let kind = u32::from(SECT_EH_TABLE | SECT_FAT_FORMAT);
        writer.write_le::<u32>(((fat_size as u32) << 8) | kind);
        for clause in &clauses {
            writer.write_le::<u32>(u32::from(clause.flags));
            writer.write_le::<u32>(clause.try_start);
            writer.write_le::<u32>(clause.try_length);
            writer.write_le::<u32>(clause.handler_start);
            writer.write_le::<u32>(clause.handler_length);
            writer.write_le::<u32>(clause.extra);
        }
    }
    Ok(writer.into_inner())
}

/// Decode a method body starting at the beginning of `data`.
pub(crate) fn decode_body(data: &[u8], tokens: &mut dyn TokenResolver) -> Result<MethodBody> {
    let mut parser = Parser::new(data);
    let first = parser.read_le::<u8>()?;
    let mut body = MethodBody::new();

    if first & HEADER_FORMAT_MASK == HEADER_TINY {
        let code = parser.read_bytes(usize::from(first >> 2))?;
        let (instructions, _) = decode_code(code, tokens)?;
        body.max_stack = 8;
        body.init_locals = false;
        body.set_next_id(instructions.len() as u32);
        body.instructions = instructions;
        return Ok(body);
    }
    if first & HEADER_FORMAT_MASK != HEADER_FAT as u8 {
        return Err(malformed_error!("Invalid method header 0x{:02x}", first));
    }

    parser.seek(0)?;
    let flags = parser.read_le::<u16>()?;
    if flags >> 12 != FAT_HEADER_DWORDS {
        return Err(malformed_error!("Invalid fat method header size {}", flags >> 12));
    }
    body.max_stack = parser.read_le::<u16>()?;
    let code_size = parser.read_le::<u32>()? as usize;
    let locals = parser.read_le::<u32>()?;
    body.init_locals = flags & FAT_INIT_LOCALS != 0;
    if locals != 0 {
        body.locals = tokens.locals(Token::new(locals))?;
    }

    let code = parser.read_bytes(code_size)?;
    let (instructions, offsets) = decode_code(code, tokens)?;
    body.set_next_id(instructions.len() as u32);

    let mut clauses = Vec::new();
    let mut more = flags & FAT_MORE_SECTS != 0;
    while more {
        parser.align(4)?;
        let kind = parser.read_le::<u8>()?;
        more = kind & SECT_MORE_SECTS != 0;
        let fat = kind & SECT_FAT_FORMAT != 0;
        let size = if fat {
            let low = u32::from(parser.read_le::<u16>()?);
            let high = u32::from(parser.read_le::<u8>()?);
            (low | (high << 16)) as usize
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.read_le::<u16>()?;
            size
        };
        let payload = size
            .checked_sub(4)
            .ok_or_else(|| malformed_error!("Invalid method data section size {}", size))?;

        if kind & SECT_EH_TABLE == 0 {
            parser.read_bytes(payload)?;
            continue;
        }
        let clause_size = if fat { FAT_CLAUSE_SIZE } else { SMALL_CLAUSE_SIZE };
        for _ in 0..payload / clause_size {
            clauses.push(if fat {
                RawClause {
                    flags: u16::try_from(parser.read_le::<u32>()?)
                        .map_err(|_| malformed_error!("Invalid exception clause flags"))?,
                    try_start: parser.read_le::<u32>()?,
                    try_length: parser.read_le::<u32>()?,
                    handler_start: parser.read_le::<u32>()?,
                    handler_length: parser.read_le::<u32>()?,
                    extra: parser.read_le::<u32>()?,
                }
            } else {
                RawClause {
                    flags: parser.read_le::<u16>()?,
                    try_start: u32::from(parser.read_le::<u16>()?),
                    try_length: u32::from(parser.read_le::<u8>()?),
                    handler_start: u32::from(parser.read_le::<u16>()?),
                    handler_length: u32::from(parser.read_le::<u8>()?),
                    extra: parser.read_le::<u32>()?,
                }
            });
        }
        parser.read_bytes(payload % clause_size)?;
    }

    let id_at = |offset: u32| -> Result<Option<InstrId>> {
        if offset as usize == code_size {
            return Ok(None);
        }
        offsets
            .iter()
            .position(|candidate| *candidate == offset)
            .filter(|index| *index < instructions.len())
            .map(|index| Some(instructions[index].id))
            .ok_or_else(|| {
                malformed_error!("Exception handler bound {} not on an instruction", offset)
            })
    };
    let start_at = |offset: u32| -> Result<InstrId> {
        id_at(offset)?.ok_or_else(|| malformed_error!("Exception handler starts at end of body"))
    };

    for clause in clauses {
        let flags = ExceptionHandlerFlags::from_bits(clause.flags)
            .ok_or_else(|| malformed_error!("Invalid exception handler flags"))?;
        let try_end = clause
            .try_start
            .checked_add(clause.try_length)
            .ok_or_else(|| out_of_bounds_error!())?;
        let handler_end = clause
            .handler_start
            .checked_add(clause.handler_length)
            .ok_or_else(|| out_of_bounds_error!())?;

        let (catch_type, filter_start) = if flags.contains(ExceptionHandlerFlags::FILTER) {
            (None, Some(start_at(clause.extra)?))
        } else if flags.is_empty() && clause.extra != 0 {
            match tokens.operand(Token::new(clause.extra))? {
                Operand::Type(sig) => (Some(sig), None),
                _ => return Err(malformed_error!("Catch clause token is not a type")),
            }
        } else {
            (None, None)
        };

        body.handlers.push(ExceptionHandler {
            flags,
            try_start: start_at(clause.try_start)?,
            try_end: id_at(try_end)?,
            handler_start: start_at(clause.handler_start)?,
            handler_end: id_at(handler_end)?,
            catch_type,
            filter_start,
        });
    }

    body.instructions = instructions;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One field, one method, `TypeSpec` 1 is `int32`, user string at heap offset 1.
    #[derive(Default)]
    struct Tokens {
        locals: Vec<Vec<TypeSig>>,
    }

    impl TokenResolver for Tokens {
        fn operand(&mut self, token: Token) -> Result<Operand> {
            match (token.table(), token.row()) {
                (Token::FIELD, 1) => Ok(Operand::Field(FieldRefId::new(0))),
                (Token::MEMBER_REF, 1) => Ok(Operand::Method(MethodRefId::new(0))),
                (Token::TYPE_SPEC, 1) => Ok(Operand::Type(TypeSig::INT32)),
                (Token::USER_STRING, 1) => Ok(Operand::String("hello".to_string())),
                _ => Err(malformed_error!("Token {} out of range", token)),
            }
        }

        fn locals(&mut self, token: Token) -> Result<Vec<TypeSig>> {
            self.locals
                .get(token.row() as usize - 1)
                .cloned()
                .ok_or_else(|| malformed_error!("Token {} out of range", token))
        }
    }

    impl TokenEncoder for Tokens {
        fn field_token(&mut self, id: FieldRefId) -> Result<Token> {
            Ok(Token::from_parts(Token::FIELD, id.0 + 1))
        }

        fn method_token(&mut self, id: MethodRefId) -> Result<Token> {
            Ok(Token::from_parts(Token::MEMBER_REF, id.0 + 1))
        }

        fn type_token(&mut self, _sig: &TypeSig) -> Result<Token> {
            Ok(Token::from_parts(Token::TYPE_SPEC, 1))
        }

        fn string_token(&mut self, _value: &str) -> Result<Token> {
            Ok(Token::from_parts(Token::USER_STRING, 1))
        }

        fn locals_token(&mut self, locals: &[TypeSig]) -> Result<Token> {
            self.locals.push(locals.to_vec());
            Ok(Token::from_parts(Token::STANDALONE_SIG, self.locals.len() as u32))
        }
    }

    #[test]
    fn decode_branches() {
        // IL_0000: ldc.i4.0
        // IL_0001: brtrue.s IL_0004
        // IL_0003: nop
        // IL_0004: ret
        let code = [0x16, 0x2D, 0x01, 0x00, 0x2A];
        let (instructions, offsets) = decode_code(&code, &mut Tokens::default()).unwrap();
        assert_eq!(offsets, vec![0, 1, 3, 4, 5]);
        assert_eq!(instructions[1].opcode, OpCode::BrtrueS);
        assert_eq!(instructions[1].operand, Operand::Target(InstrId::new(3)));
    }

    #[test]
    fn decode_tokens_and_prefix() {
        let mut code = vec![0x72];
        code.extend_from_slice(&0x7000_0001_u32.to_le_bytes());
        code.push(0x8C);
        code.extend_from_slice(&0x1B00_0001_u32.to_le_bytes());
        code.extend_from_slice(&[0xFE, 0x01, 0x2A]);

        let (instructions, _) = decode_code(&code, &mut Tokens::default()).unwrap();
        assert_eq!(instructions[0].operand, Operand::String("hello".to_string()));
        assert_eq!(instructions[1].operand, Operand::Type(TypeSig::INT32));
        assert_eq!(instructions[2].opcode, OpCode::Ceq);
    }

    #[test]
    fn reject_bad_streams() {
        let mut tokens = Tokens::default();
        assert!(decode_code(&[0x24], &mut tokens).is_err());
        // branch into the middle of ldc.i4
        assert!(decode_code(&[0x2B, 0x01, 0x20, 0, 0, 0, 0], &mut tokens).is_err());
        assert!(matches!(
            decode_code(&[0x29, 0, 0, 0, 0x11], &mut tokens),
            Err(Error::NotSupported)
        ));
        // ldfld with a method token
        assert!(decode_code(&[0x7B, 0x01, 0, 0, 0x0A], &mut tokens).is_err());
    }

    #[test]
    fn encode_relative_branches() {
        let mut body = MethodBody::new();
        let target = body.alloc_id();
        body.push(OpCode::Br, Operand::Target(target));
        body.push(OpCode::Nop, Operand::None);
        body.instructions
            .push(Instruction::new(target, OpCode::Ret, Operand::None));

        let code = encode_code(&body, &mut Tokens::default()).unwrap();
        assert_eq!(code, vec![0x38, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn short_branch_out_of_range() {
        let mut body = MethodBody::new();
        let target = body.alloc_id();
        body.push(OpCode::BrS, Operand::Target(target));
        for _ in 0..200 {
            body.push(OpCode::Nop, Operand::None);
        }
        body.instructions
            .push(Instruction::new(target, OpCode::Ret, Operand::None));

        assert!(encode_code(&body, &mut Tokens::default()).is_err());
    }

    #[test]
    fn tiny_header() {
        let mut body = MethodBody::new();
        body.init_locals = false;
        body.push(OpCode::Ret, Operand::None);

        let mut tokens = Tokens::default();
        let bytes = encode_body(&body, &mut tokens).unwrap();
        assert_eq!(bytes, vec![0x06, 0x2A]);

        let decoded = decode_body(&bytes, &mut tokens).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn fat_header_with_locals_and_handlers() {
        let mut body = MethodBody::new();
        body.max_stack = 2;
        body.locals = vec![TypeSig::STRING];
        let try_start = body.push(OpCode::Ldsfld, Operand::Field(FieldRefId::new(0)));
        body.push(OpCode::Stloc0, Operand::None);
        body.push(OpCode::LeaveS, Operand::None);
        let handler = body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::LeaveS, Operand::None);
        let end = body.push(OpCode::Ret, Operand::None);
        body.instructions[2].operand = Operand::Target(end);
        body.instructions[4].operand = Operand::Target(end);
        body.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(end),
            catch_type: Some(TypeSig::INT32),
            filter_start: None,
        });

        let mut tokens = Tokens::default();
        let bytes = encode_body(&body, &mut tokens).unwrap();
        assert_eq!(bytes[0] & 0x03, 0x03);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]) & 0x18, 0x18);
        assert_eq!(&bytes[8..12], &0x1100_0001_u32.to_le_bytes());
        // 12 byte header and 12 bytes of code, then a small EH section
        assert_eq!(bytes[24], SECT_EH_TABLE);
        assert_eq!(bytes[25], 16);

        let decoded = decode_body(&bytes, &mut tokens).unwrap();
        assert_eq!(decoded.max_stack, 2);
        assert!(decoded.init_locals);
        assert_eq!(decoded.locals, vec![TypeSig::STRING]);
        assert_eq!(decoded.handlers, body.handlers);
        assert_eq!(decoded.instructions, body.instructions);
    }

    #[test]
    fn fat_exception_section() {
        let mut body = MethodBody::new();
        let try_start = body.push(OpCode::Nop, Operand::None);
        for _ in 0..300 {
            body.push(OpCode::Nop, Operand::None);
        }
        let handler = body.push(OpCode::Endfinally, Operand::None);
        let end = body.push(OpCode::Ret, Operand::None);
        body.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(end),
            catch_type: None,
            filter_start: None,
        });

        let mut tokens = Tokens::default();
        let bytes = encode_body(&body, &mut tokens).unwrap();
        let section = (12 + 303_usize).next_multiple_of(4);
        assert_eq!(bytes[section], SECT_EH_TABLE | SECT_FAT_FORMAT);

        let decoded = decode_body(&bytes, &mut tokens).unwrap();
        assert_eq!(decoded.handlers, body.handlers);
    }

    #[test]
    fn invalid_header() {
        assert!(decode_body(&[0x00, 0x2A], &mut Tokens::default()).is_err());
        // tiny header announcing more code than available
        assert!(decode_body(&[0x0A, 0x2A], &mut Tokens::default()).is_err());
    }
}
