//! CIL opcode table (ECMA-335 Partition III).
//!
//! Every opcode carries its encoded value (two-byte opcodes use the `0xFE` prefix and are
//! stored as `0xFEnn`), mnemonic, operand kind, stack behaviour and control flow class. The
//! table drives decoding, encoding, macro simplification and stack-shape checks.

/// Number of values an opcode pops or pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCount {
    /// A fixed number of values
    Fixed(u8),
    /// Depends on the operand's signature (calls, `ret`)
    Variable,
}

/// How the operand of an opcode is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand present
    None,
    /// 8-bit integer
    ShortInlineI,
    /// 32-bit integer
    InlineI,
    /// 64-bit integer
    InlineI8,
    /// 32-bit float
    ShortInlineR,
    /// 64-bit float
    InlineR,
    /// 8-bit local index
    ShortInlineVar,
    /// 16-bit local index
    InlineVar,
    /// 8-bit argument index
    ShortInlineArg,
    /// 16-bit argument index
    InlineArg,
    /// 8-bit relative branch target
    ShortInlineBrTarget,
    /// 32-bit relative branch target
    InlineBrTarget,
    /// Jump table
    InlineSwitch,
    /// User string token
    InlineString,
    /// Field token
    InlineField,
    /// Method token
    InlineMethod,
    /// Type token
    InlineType,
    /// Type, field or method token (`ldtoken`)
    InlineTok,
    /// Stand-alone signature token (`calli`)
    InlineSig,
}

impl OperandKind {
    /// Size in bytes of the encoded operand, `None` for the variable sized jump table.
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::ShortInlineI
            | OperandKind::ShortInlineVar
            | OperandKind::ShortInlineArg
            | OperandKind::ShortInlineBrTarget => Some(1),
            OperandKind::InlineVar | OperandKind::InlineArg => Some(2),
            OperandKind::InlineI
            | OperandKind::ShortInlineR
            | OperandKind::InlineBrTarget
            | OperandKind::InlineString
            | OperandKind::InlineField
            | OperandKind::InlineMethod
            | OperandKind::InlineType
            | OperandKind::InlineTok
            | OperandKind::InlineSig => Some(4),
            OperandKind::InlineI8 | OperandKind::InlineR => Some(8),
            OperandKind::InlineSwitch => None,
        }
    }
}

/// Control flow class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// Falls through to the next instruction
    Next,
    /// Debugger break
    Break,
    /// Unconditional branch
    Branch,
    /// Conditional branch or switch
    CondBranch,
    /// Method call
    Call,
    /// Leaves the method or a protected region
    Return,
    /// Throws an exception
    Throw,
    /// Prefix applying to the next instruction
    Meta,
}

macro_rules! stack {
    (V) => {
        StackCount::Variable
    };
    ($n:literal) => {
        StackCount::Fixed($n)
    };
}

macro_rules! define_opcodes {
    ($(
        $variant:ident = $value:literal, $name:literal, $operand:ident, $pop:tt, $push:tt,
        $flow:ident;
    )*) => {
        /// A CIL opcode.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OpCode {
            $( $variant, )*
        }

        impl OpCode {
            /// Every defined opcode, in encoding order.
            pub const ALL: &'static [OpCode] = &[ $( OpCode::$variant, )* ];

            /// Encoded value; two-byte opcodes are `0xFE00 | second byte`.
            #[must_use]
            pub const fn value(self) -> u16 {
                match self {
                    $( OpCode::$variant => $value, )*
                }
            }

            /// The ECMA-335 mnemonic.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( OpCode::$variant => $name, )*
                }
            }

            /// Operand encoding.
            #[must_use]
            pub const fn operand_kind(self) -> OperandKind {
                match self {
                    $( OpCode::$variant => OperandKind::$operand, )*
                }
            }

            /// Values popped from the evaluation stack.
            #[must_use]
            pub const fn pops(self) -> StackCount {
                match self {
                    $( OpCode::$variant => stack!($pop), )*
                }
            }

            /// Values pushed onto the evaluation stack.
            #[must_use]
            pub const fn pushes(self) -> StackCount {
                match self {
                    $( OpCode::$variant => stack!($push), )*
                }
            }

            /// Control flow class.
            #[must_use]
            pub const fn flow(self) -> FlowControl {
                match self {
                    $( OpCode::$variant => FlowControl::$flow, )*
                }
            }

            /// Look up an opcode by its encoded value.
            #[must_use]
            pub const fn from_value(value: u16) -> Option<OpCode> {
                match value {
                    $( $value => Some(OpCode::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

define_opcodes! {
    Nop = 0x00, "nop", None, 0, 0, Next;
    Break = 0x01, "break", None, 0, 0, Break;
    Ldarg0 = 0x02, "ldarg.0", None, 0, 1, Next;
    Ldarg1 = 0x03, "ldarg.1", None, 0, 1, Next;
    Ldarg2 = 0x04, "ldarg.2", None, 0, 1, Next;
    Ldarg3 = 0x05, "ldarg.3", None, 0, 1, Next;
    Ldloc0 = 0x06, "ldloc.0", None, 0, 1, Next;
    Ldloc1 = 0x07, "ldloc.1", None, 0, 1, Next;
    Ldloc2 = 0x08, "ldloc.2", None, 0, 1, Next;
    Ldloc3 = 0x09, "ldloc.3", None, 0, 1, Next;
    Stloc0 = 0x0A, "stloc.0", None, 1, 0, Next;
    Stloc1 = 0x0B, "stloc.1", None, 1, 0, Next;
    Stloc2 = 0x0C, "stloc.2", None, 1, 0, Next;
    Stloc3 = 0x0D, "stloc.3", None, 1, 0, Next;
    LdargS = 0x0E, "ldarg.s", ShortInlineArg, 0, 1, Next;
    LdargaS = 0x0F, "ldarga.s", ShortInlineArg, 0, 1, Next;
    StargS = 0x10, "starg.s", ShortInlineArg, 1, 0, Next;
    LdlocS = 0x11, "ldloc.s", ShortInlineVar, 0, 1, Next;
    LdlocaS = 0x12, "ldloca.s", ShortInlineVar, 0, 1, Next;
    StlocS = 0x13, "stloc.s", ShortInlineVar, 1, 0, Next;
    Ldnull = 0x14, "ldnull", None, 0, 1, Next;
    LdcI4M1 = 0x15, "ldc.i4.m1", None, 0, 1, Next;
    LdcI40 = 0x16, "ldc.i4.0", None, 0, 1, Next;
    LdcI41 = 0x17, "ldc.i4.1", None, 0, 1, Next;
    LdcI42 = 0x18, "ldc.i4.2", None, 0, 1, Next;
    LdcI43 = 0x19, "ldc.i4.3", None, 0, 1, Next;
    LdcI44 = 0x1A, "ldc.i4.4", None, 0, 1, Next;
    LdcI45 = 0x1B, "ldc.i4.5", None, 0, 1, Next;
    LdcI46 = 0x1C, "ldc.i4.6", None, 0, 1, Next;
    LdcI47 = 0x1D, "ldc.i4.7", None, 0, 1, Next;
    LdcI48 = 0x1E, "ldc.i4.8", None, 0, 1, Next;
    LdcI4S = 0x1F, "ldc.i4.s", ShortInlineI, 0, 1, Next;
    LdcI4 = 0x20, "ldc.i4", InlineI, 0, 1, Next;
    LdcI8 = 0x21, "ldc.i8", InlineI8, 0, 1, Next;
    LdcR4 = 0x22, "ldc.r4", ShortInlineR, 0, 1, Next;
    LdcR8 = 0x23, "ldc.r8", InlineR, 0, 1, Next;
    Dup = 0x25, "dup", None, 1, 2, Next;
    Pop = 0x26, "pop", None, 1, 0, Next;
    Jmp = 0x27, "jmp", InlineMethod, 0, 0, Call;
    Call = 0x28, "call", InlineMethod, V, V, Call;
    Calli = 0x29, "calli", InlineSig, V, V, Call;
    Ret = 0x2A, "ret", None, V, 0, Return;
    BrS = 0x2B, "br.s", ShortInlineBrTarget, 0, 0, Branch;
    BrfalseS = 0x2C, "brfalse.s", ShortInlineBrTarget, 1, 0, CondBranch;
    BrtrueS = 0x2D, "brtrue.s", ShortInlineBrTarget, 1, 0, CondBranch;
    BeqS = 0x2E, "beq.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BgeS = 0x2F, "bge.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BgtS = 0x30, "bgt.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BleS = 0x31, "ble.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BltS = 0x32, "blt.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BneUnS = 0x33, "bne.un.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BgeUnS = 0x34, "bge.un.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BgtUnS = 0x35, "bgt.un.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BleUnS = 0x36, "ble.un.s", ShortInlineBrTarget, 2, 0, CondBranch;
    BltUnS = 0x37, "blt.un.s", ShortInlineBrTarget, 2, 0, CondBranch;
    Br = 0x38, "br", InlineBrTarget, 0, 0, Branch;
    Brfalse = 0x39, "brfalse", InlineBrTarget, 1, 0, CondBranch;
    Brtrue = 0x3A, "brtrue", InlineBrTarget, 1, 0, CondBranch;
    Beq = 0x3B, "beq", InlineBrTarget, 2, 0, CondBranch;
    Bge = 0x3C, "bge", InlineBrTarget, 2, 0, CondBranch;
    Bgt = 0x3D, "bgt", InlineBrTarget, 2, 0, CondBranch;
    Ble = 0x3E, "ble", InlineBrTarget, 2, 0, CondBranch;
    Blt = 0x3F, "blt", InlineBrTarget, 2, 0, CondBranch;
    BneUn = 0x40, "bne.un", InlineBrTarget, 2, 0, CondBranch;
    BgeUn = 0x41, "bge.un", InlineBrTarget, 2, 0, CondBranch;
    BgtUn = 0x42, "bgt.un", InlineBrTarget, 2, 0, CondBranch;
    BleUn = 0x43, "ble.un", InlineBrTarget, 2, 0, CondBranch;
    BltUn = 0x44, "blt.un", InlineBrTarget, 2, 0, CondBranch;
    Switch = 0x45, "switch", InlineSwitch, 1, 0, CondBranch;
    LdindI1 = 0x46, "ldind.i1", None, 1, 1, Next;
    LdindU1 = 0x47, "ldind.u1", None, 1, 1, Next;
    LdindI2 = 0x48, "ldind.i2", None, 1, 1, Next;
    LdindU2 = 0x49, "ldind.u2", None, 1, 1, Next;
    LdindI4 = 0x4A, "ldind.i4", None, 1, 1, Next;
    LdindU4 = 0x4B, "ldind.u4", None, 1, 1, Next;
    LdindI8 = 0x4C, "ldind.i8", None, 1, 1, Next;
    LdindI = 0x4D, "ldind.i", None, 1, 1, Next;
    LdindR4 = 0x4E, "ldind.r4", None, 1, 1, Next;
    LdindR8 = 0x4F, "ldind.r8", None, 1, 1, Next;
    LdindRef = 0x50, "ldind.ref", None, 1, 1, Next;
    StindRef = 0x51, "stind.ref", None, 2, 0, Next;
    StindI1 = 0x52, "stind.i1", None, 2, 0, Next;
    StindI2 = 0x53, "stind.i2", None, 2, 0, Next;
    StindI4 = 0x54, "stind.i4", None, 2, 0, Next;
    StindI8 = 0x55, "stind.i8", None, 2, 0, Next;
    StindR4 = 0x56, "stind.r4", None, 2, 0, Next;
    StindR8 = 0x57, "stind.r8", None, 2, 0, Next;
    Add = 0x58, "add", None, 2, 1, Next;
    Sub = 0x59, "sub", None, 2, 1, Next;
    Mul = 0x5A, "mul", None, 2, 1, Next;
    Div = 0x5B, "div", None, 2, 1, Next;
    DivUn = 0x5C, "div.un", None, 2, 1, Next;
    Rem = 0x5D, "rem", None, 2, 1, Next;
    RemUn = 0x5E, "rem.un", None, 2, 1, Next;
    And = 0x5F, "and", None, 2, 1, Next;
    Or = 0x60, "or", None, 2, 1, Next;
    Xor = 0x61, "xor", None, 2, 1, Next;
    Shl = 0x62, "shl", None, 2, 1, Next;
    Shr = 0x63, "shr", None, 2, 1, Next;
    ShrUn = 0x64, "shr.un", None, 2, 1, Next;
    Neg = 0x65, "neg", None, 1, 1, Next;
    Not = 0x66, "not", None, 1, 1, Next;
    ConvI1 = 0x67, "conv.i1", None, 1, 1, Next;
    ConvI2 = 0x68, "conv.i2", None, 1, 1, Next;
    ConvI4 = 0x69, "conv.i4", None, 1, 1, Next;
    ConvI8 = 0x6A, "conv.i8", None, 1, 1, Next;
    ConvR4 = 0x6B, "conv.r4", None, 1, 1, Next;
    ConvR8 = 0x6C, "conv.r8", None, 1, 1, Next;
    ConvU4 = 0x6D, "conv.u4", None, 1, 1, Next;
    ConvU8 = 0x6E, "conv.u8", None, 1, 1, Next;
    Callvirt = 0x6F, "callvirt", InlineMethod, V, V, Call;
    Cpobj = 0x70, "cpobj", InlineType, 2, 0, Next;
    Ldobj = 0x71, "ldobj", InlineType, 1, 1, Next;
    Ldstr = 0x72, "ldstr", InlineString, 0, 1, Next;
    Newobj = 0x73, "newobj", InlineMethod, V, 1, Call;
    Castclass = 0x74, "castclass", InlineType, 1, 1, Next;
    Isinst = 0x75, "isinst", InlineType, 1, 1, Next;
    ConvRUn = 0x76, "conv.r.un", None, 1, 1, Next;
    Unbox = 0x79, "unbox", InlineType, 1, 1, Next;
    Throw = 0x7A, "throw", None, 1, 0, Throw;
    Ldfld = 0x7B, "ldfld", InlineField, 1, 1, Next;
    Ldflda = 0x7C, "ldflda", InlineField, 1, 1, Next;
    Stfld = 0x7D, "stfld", InlineField, 2, 0, Next;
    Ldsfld = 0x7E, "ldsfld", InlineField, 0, 1, Next;
    Ldsflda = 0x7F, "ldsflda", InlineField, 0, 1, Next;
    Stsfld = 0x80, "stsfld", InlineField, 1, 0, Next;
    Stobj = 0x81, "stobj", InlineType, 2, 0, Next;
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un", None, 1, 1, Next;
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un", None, 1, 1, Next;
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un", None, 1, 1, Next;
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un", None, 1, 1, Next;
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un", None, 1, 1, Next;
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un", None, 1, 1, Next;
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un", None, 1, 1, Next;
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un", None, 1, 1, Next;
    ConvOvfIUn = 0x8A, "conv.ovf.i.un", None, 1, 1, Next;
    ConvOvfUUn = 0x8B, "conv.ovf.u.un", None, 1, 1, Next;
    Box = 0x8C, "box", InlineType, 1, 1, Next;
    Newarr = 0x8D, "newarr", InlineType, 1, 1, Next;
    Ldlen = 0x8E, "ldlen", None, 1, 1, Next;
    Ldelema = 0x8F, "ldelema", InlineType, 2, 1, Next;
    LdelemI1 = 0x90, "ldelem.i1", None, 2, 1, Next;
    LdelemU1 = 0x91, "ldelem.u1", None, 2, 1, Next;
    LdelemI2 = 0x92, "ldelem.i2", None, 2, 1, Next;
    LdelemU2 = 0x93, "ldelem.u2", None, 2, 1, Next;
    LdelemI4 = 0x94, "ldelem.i4", None, 2, 1, Next;
    LdelemU4 = 0x95, "ldelem.u4", None, 2, 1, Next;
    LdelemI8 = 0x96, "ldelem.i8", None, 2, 1, Next;
    LdelemI = 0x97, "ldelem.i", None, 2, 1, Next;
    LdelemR4 = 0x98, "ldelem.r4", None, 2, 1, Next;
    LdelemR8 = 0x99, "ldelem.r8", None, 2, 1, Next;
    LdelemRef = 0x9A, "ldelem.ref", None, 2, 1, Next;
    StelemI = 0x9B, "stelem.i", None, 3, 0, Next;
    StelemI1 = 0x9C, "stelem.i1", None, 3, 0, Next;
    StelemI2 = 0x9D, "stelem.i2", None, 3, 0, Next;
    StelemI4 = 0x9E, "stelem.i4", None, 3, 0, Next;
    StelemI8 = 0x9F, "stelem.i8", None, 3, 0, Next;
    StelemR4 = 0xA0, "stelem.r4", None, 3, 0, Next;
    StelemR8 = 0xA1, "stelem.r8", None, 3, 0, Next;
    StelemRef = 0xA2, "stelem.ref", None, 3, 0, Next;
    Ldelem = 0xA3, "ldelem", InlineType, 2, 1, Next;
    Stelem = 0xA4, "stelem", InlineType, 3, 0, Next;
    UnboxAny = 0xA5, "unbox.any", InlineType, 1, 1, Next;
    ConvOvfI1 = 0xB3, "conv.ovf.i1", None, 1, 1, Next;
    ConvOvfU1 = 0xB4, "conv.ovf.u1", None, 1, 1, Next;
    ConvOvfI2 = 0xB5, "conv.ovf.i2", None, 1, 1, Next;
    ConvOvfU2 = 0xB6, "conv.ovf.u2", None, 1, 1, Next;
    ConvOvfI4 = 0xB7, "conv.ovf.i4", None, 1, 1, Next;
    ConvOvfU4 = 0xB8, "conv.ovf.u4", None, 1, 1, Next;
    ConvOvfI8 = 0xB9, "conv.ovf.i8", None, 1, 1, Next;
    ConvOvfU8 = 0xBA, "conv.ovf.u8", None, 1, 1, Next;
    Refanyval = 0xC2, "refanyval", InlineType, 1, 1, Next;
    Ckfinite = 0xC3, "ckfinite", None, 1, 1, Next;
    Mkrefany = 0xC6, "mkrefany", InlineType, 1, 1, Next;
    Ldtoken = 0xD0, "ldtoken", InlineTok, 0, 1, Next;
    ConvU2 = 0xD1, "conv.u2", None, 1, 1, Next;
    ConvU1 = 0xD2, "conv.u1", None, 1, 1, Next;
    ConvI = 0xD3, "conv.i", None, 1, 1, Next;
    ConvOvfI = 0xD4, "conv.ovf.i", None, 1, 1, Next;
    ConvOvfU = 0xD5, "conv.ovf.u", None, 1, 1, Next;
    AddOvf = 0xD6, "add.ovf", None, 2, 1, Next;
    AddOvfUn = 0xD7, "add.ovf.un", None, 2, 1, Next;
    MulOvf = 0xD8, "mul.ovf", None, 2, 1, Next;
    MulOvfUn = 0xD9, "mul.ovf.un", None, 2, 1, Next;
    SubOvf = 0xDA, "sub.ovf", None, 2, 1, Next;
    SubOvfUn = 0xDB, "sub.ovf.un", None, 2, 1, Next;
    Endfinally = 0xDC, "endfinally", None, 0, 0, Return;
    Leave = 0xDD, "leave", InlineBrTarget, 0, 0, Branch;
    LeaveS = 0xDE, "leave.s", ShortInlineBrTarget, 0, 0, Branch;
    StindI = 0xDF, "stind.i", None, 2, 0, Next;
    ConvU = 0xE0, "conv.u", None, 1, 1, Next;
    Arglist = 0xFE00, "arglist", None, 0, 1, Next;
    Ceq = 0xFE01, "ceq", None, 2, 1, Next;
    Cgt = 0xFE02, "cgt", None, 2, 1, Next;
    CgtUn = 0xFE03, "cgt.un", None, 2, 1, Next;
    Clt = 0xFE04, "clt", None, 2, 1, Next;
    CltUn = 0xFE05, "clt.un", None, 2, 1, Next;
    Ldftn = 0xFE06, "ldftn", InlineMethod, 0, 1, Next;
    Ldvirtftn = 0xFE07, "ldvirtftn", InlineMethod, 1, 1, Next;
    Ldarg = 0xFE09, "ldarg", InlineArg, 0, 1, Next;
    Ldarga = 0xFE0A, "ldarga", InlineArg, 0, 1, Next;
    Starg = 0xFE0B, "starg", InlineArg, 1, 0, Next;
    Ldloc = 0xFE0C, "ldloc", InlineVar, 0, 1, Next;
    Ldloca = 0xFE0D, "ldloca", InlineVar, 0, 1, Next;
    Stloc = 0xFE0E, "stloc", InlineVar, 1, 0, Next;
    Localloc = 0xFE0F, "localloc", None, 1, 1, Next;
    Endfilter = 0xFE11, "endfilter", None, 1, 0, Return;
    Unaligned = 0xFE12, "unaligned.", ShortInlineI, 0, 0, Meta;
    Volatile = 0xFE13, "volatile.", None, 0, 0, Meta;
    Tail = 0xFE14, "tail.", None, 0, 0, Meta;
    Initobj = 0xFE15, "initobj", InlineType, 1, 0, Next;
    Constrained = 0xFE16, "constrained.", InlineType, 0, 0, Meta;
    Cpblk = 0xFE17, "cpblk", None, 3, 0, Next;
    Initblk = 0xFE18, "initblk", None, 3, 0, Next;
    No = 0xFE19, "no.", ShortInlineI, 0, 0, Meta;
    Rethrow = 0xFE1A, "rethrow", None, 0, 0, Throw;
    Sizeof = 0xFE1C, "sizeof", InlineType, 0, 1, Next;
    Refanytype = 0xFE1D, "refanytype", None, 1, 1, Next;
    Readonly = 0xFE1E, "readonly.", None, 0, 0, Meta;
}

/// First byte shared by all two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

impl OpCode {
    /// Encoded size of the opcode itself (1 or 2 bytes).
    #[must_use]
    pub const fn size(self) -> usize {
        if self.value() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Field access opcodes (`ldfld`, `ldflda`, `stfld` and their static forms).
    #[must_use]
    pub const fn is_field_access(self) -> bool {
        matches!(self.operand_kind(), OperandKind::InlineField)
    }

    /// Field access opcodes that take the address of the field rather than its value.
    #[must_use]
    pub const fn is_field_address(self) -> bool {
        matches!(self, OpCode::Ldflda | OpCode::Ldsflda)
    }

    /// Static field access opcodes.
    #[must_use]
    pub const fn is_static_field_access(self) -> bool {
        matches!(self, OpCode::Ldsfld | OpCode::Ldsflda | OpCode::Stsfld)
    }

    /// Field store opcodes.
    #[must_use]
    pub const fn is_field_store(self) -> bool {
        matches!(self, OpCode::Stfld | OpCode::Stsfld)
    }

    /// Opcodes whose operand is a method reference.
    #[must_use]
    pub const fn is_method_reference(self) -> bool {
        matches!(self.operand_kind(), OperandKind::InlineMethod)
    }

    /// Branch opcodes with a single target (including `leave`).
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::ShortInlineBrTarget | OperandKind::InlineBrTarget
        )
    }

    /// The long form of a short branch, `None` for every other opcode.
    #[must_use]
    pub const fn long_branch(self) -> Option<OpCode> {
        Some(match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrfalseS => OpCode::Brfalse,
            OpCode::BrtrueS => OpCode::Brtrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            OpCode::BgeUnS => OpCode::BgeUn,
            OpCode::BgtUnS => OpCode::BgtUn,
            OpCode::BleUnS => OpCode::BleUn,
            OpCode::BltUnS => OpCode::BltUn,
            OpCode::LeaveS => OpCode::Leave,
            _ => return None,
        })
    }

    /// The short form of a long branch, `None` for every other opcode.
    #[must_use]
    pub const fn short_branch(self) -> Option<OpCode> {
        Some(match self {
            OpCode::Br => OpCode::BrS,
            OpCode::Brfalse => OpCode::BrfalseS,
            OpCode::Brtrue => OpCode::BrtrueS,
            OpCode::Beq => OpCode::BeqS,
            OpCode::Bge => OpCode::BgeS,
            OpCode::Bgt => OpCode::BgtS,
            OpCode::Ble => OpCode::BleS,
            OpCode::Blt => OpCode::BltS,
            OpCode::BneUn => OpCode::BneUnS,
            OpCode::BgeUn => OpCode::BgeUnS,
            OpCode::BgtUn => OpCode::BgtUnS,
            OpCode::BleUn => OpCode::BleUnS,
            OpCode::BltUn => OpCode::BltUnS,
            OpCode::Leave => OpCode::LeaveS,
            _ => return None,
        })
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn values_are_unique_and_resolvable() {
        let mut seen = HashSet::new();
        for opcode in OpCode::ALL {
            assert!(seen.insert(opcode.value()), "duplicate {}", opcode.name());
            assert_eq!(OpCode::from_value(opcode.value()), Some(*opcode));
        }
        assert_eq!(OpCode::from_value(0x24), None);
        assert_eq!(OpCode::from_value(0xFE08), None);
    }

    #[test]
    fn branch_forms_are_symmetric() {
        for opcode in OpCode::ALL {
            if let Some(long) = opcode.long_branch() {
                assert_eq!(long.short_branch(), Some(*opcode));
                assert_eq!(long.operand_kind(), OperandKind::InlineBrTarget);
            }
        }
        assert_eq!(OpCode::Switch.long_branch(), None);
    }

    #[test]
    fn field_classification() {
        assert!(OpCode::Ldfld.is_field_access());
        assert!(OpCode::Stsfld.is_field_store());
        assert!(OpCode::Stsfld.is_static_field_access());
        assert!(OpCode::Ldsflda.is_field_address());
        assert!(!OpCode::Call.is_field_access());
        assert_eq!(OpCode::Ceq.size(), 2);
        assert_eq!(OpCode::Ldfld.size(), 1);
    }
}
