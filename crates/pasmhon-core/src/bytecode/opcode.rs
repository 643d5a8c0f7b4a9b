//! Bytecode instruction set
//!
//! Instructions are one opcode byte followed by zero to two operand bytes.
//! Multi-byte operands are little-endian. Forward jumps carry an `i16`
//! offset relative to the end of the instruction; `JumpBackward` carries an
//! unsigned distance so loop headers are easy to spot.

use crate::ast::{BinOp, CmpOp};

/// A bytecode opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ===== Stack =====
    /// Push a constant. Operand: u16 constant index
    LoadConst,
    Pop,
    Dup,
    /// Duplicate the top two values: `a b -> a b a b`
    DupTwo,
    /// Swap the top two values
    RotTwo,
    /// Move the top value below the next two: `a b c -> c a b`
    RotThree,

    // ===== Names =====
    /// Operand: u16 local slot
    LoadFast,
    StoreFast,
    DeleteFast,
    /// Operand: u16 index into the frame's cells (cellvars, then freevars)
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    /// Operand: u16 index into the code object's name table
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadBuiltin,
    /// Class body namespace. Operand: u16 name index
    LoadName,
    StoreName,
    DeleteName,

    // ===== Arithmetic =====
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,

    // ===== Comparison =====
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,

    // ===== Unary =====
    Neg,
    Pos,
    Not,
    Invert,

    // ===== Control Flow =====
    /// Operand: i16 offset
    Jump,
    /// Pop the condition and jump if it is falsy. Operand: i16 offset
    PopJumpIfFalse,
    PopJumpIfTrue,
    /// Jump keeping the value if falsy, otherwise pop it. Operand: i16 offset
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    /// Loop back edge. Operand: u16 distance back from the end of the instruction
    JumpBackward,

    // ===== Iteration =====
    GetIter,
    /// Push the next item of the iterator on top of the stack. When it is
    /// exhausted, pop the iterator and jump. Operand: i16 offset
    ForIter,

    // ===== Builders =====
    /// Operand: u16 item count
    BuildList,
    BuildTuple,
    /// Operand: u16 key/value pair count
    BuildDict,
    /// Pop step, upper and lower bounds (`None` for missing) and push a slice
    BuildSlice,
    /// Pop a value and append it to the list `n` slots down. Operand: u16 n
    ListAppend,
    /// Pop an iterable and extend the list `n` slots down. Operand: u16 n
    ListExtend,
    /// Pop a value and a key and insert them into the dict `n` slots down
    DictInsert,
    /// Pop a mapping and merge it into the dict `n` slots down
    DictMerge,
    /// Replace the list on top of the stack with a tuple
    ListToTuple,
    /// Unpack a sequence into exactly `n` values, first item on top.
    /// Operand: u16 n
    UnpackSequence,
    /// Unpack with one starred target. Operands: u8 count before, u8 count after
    UnpackEx,

    // ===== Attributes and Items =====
    /// Operand: u16 name index
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    LoadSubscr,
    /// Stack: value, object, index
    StoreSubscr,
    DeleteSubscr,

    // ===== Functions =====
    /// Operand: u8 positional argument count
    Call,
    /// Keyword names tuple on top of the stack. Operand: u8 total argument count
    CallKw,
    /// Arguments tuple, then an optional kwargs dict. Operand: u8 flags
    CallEx,
    /// Build a function from the code object on top of the stack, capturing
    /// cells from the current frame. Operand: u8 flags
    MakeFunction,
    Return,
    /// Suspend a generator, handing the top value to the resumer
    Yield,

    // ===== Classes and Modules =====
    /// Stack: body function, base (or `None`), name
    BuildClass,
    /// Operand: u16 name index of the module
    ImportName,
    /// Push an attribute of the module on top of the stack. Operand: u16 name index
    ImportFrom,

    // ===== Exceptions =====
    /// Operand: u8, 1 to raise the top value, 0 to re-raise the active exception
    Raise,
    /// Re-raise the exception on top of the stack without extending its traceback
    Reraise,
    /// Pop a class (or tuple of classes) and an exception, push whether it matches
    MatchException,
}

/// `MakeFunction` flag: a tuple of positional defaults is on the stack
pub const MAKE_DEFAULTS: u8 = 0x01;
/// `MakeFunction` flag: a dict of keyword-only defaults is on the stack
pub const MAKE_KWDEFAULTS: u8 = 0x02;
/// `CallEx` flag: a kwargs dict is on top of the arguments tuple
pub const CALL_HAS_KWARGS: u8 = 0x01;

impl OpCode {
    /// Every opcode, indexed by discriminant
    pub const ALL: [OpCode; 82] = [
        OpCode::LoadConst,
        OpCode::Pop,
        OpCode::Dup,
        OpCode::DupTwo,
        OpCode::RotTwo,
        OpCode::RotThree,
        OpCode::LoadFast,
        OpCode::StoreFast,
        OpCode::DeleteFast,
        OpCode::LoadDeref,
        OpCode::StoreDeref,
        OpCode::DeleteDeref,
        OpCode::LoadGlobal,
        OpCode::StoreGlobal,
        OpCode::DeleteGlobal,
        OpCode::LoadBuiltin,
        OpCode::LoadName,
        OpCode::StoreName,
        OpCode::DeleteName,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::FloorDiv,
        OpCode::Mod,
        OpCode::Pow,
        OpCode::LShift,
        OpCode::RShift,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::BitXor,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::In,
        OpCode::NotIn,
        OpCode::Is,
        OpCode::IsNot,
        OpCode::Neg,
        OpCode::Pos,
        OpCode::Not,
        OpCode::Invert,
        OpCode::Jump,
        OpCode::PopJumpIfFalse,
        OpCode::PopJumpIfTrue,
        OpCode::JumpIfFalseOrPop,
        OpCode::JumpIfTrueOrPop,
        OpCode::JumpBackward,
        OpCode::GetIter,
        OpCode::ForIter,
        OpCode::BuildList,
        OpCode::BuildTuple,
        OpCode::BuildDict,
        OpCode::BuildSlice,
        OpCode::ListAppend,
        OpCode::ListExtend,
        OpCode::DictInsert,
        OpCode::DictMerge,
        OpCode::ListToTuple,
        OpCode::UnpackSequence,
        OpCode::UnpackEx,
        OpCode::LoadAttr,
        OpCode::StoreAttr,
        OpCode::DeleteAttr,
        OpCode::LoadSubscr,
        OpCode::StoreSubscr,
        OpCode::DeleteSubscr,
        OpCode::Call,
        OpCode::CallKw,
        OpCode::CallEx,
        OpCode::MakeFunction,
        OpCode::Return,
        OpCode::Yield,
        OpCode::BuildClass,
        OpCode::ImportName,
        OpCode::ImportFrom,
        OpCode::Raise,
        OpCode::Reraise,
        OpCode::MatchException,
    ];

    /// Returns the size of the instruction including operands
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            OpCode::Call
            | OpCode::CallKw
            | OpCode::CallEx
            | OpCode::MakeFunction
            | OpCode::Raise => 2,

            OpCode::LoadConst
            | OpCode::LoadFast
            | OpCode::StoreFast
            | OpCode::DeleteFast
            | OpCode::LoadDeref
            | OpCode::StoreDeref
            | OpCode::DeleteDeref
            | OpCode::LoadGlobal
            | OpCode::StoreGlobal
            | OpCode::DeleteGlobal
            | OpCode::LoadBuiltin
            | OpCode::LoadName
            | OpCode::StoreName
            | OpCode::DeleteName
            | OpCode::Jump
            | OpCode::PopJumpIfFalse
            | OpCode::PopJumpIfTrue
            | OpCode::JumpIfFalseOrPop
            | OpCode::JumpIfTrueOrPop
            | OpCode::JumpBackward
            | OpCode::ForIter
            | OpCode::BuildList
            | OpCode::BuildTuple
            | OpCode::BuildDict
            | OpCode::ListAppend
            | OpCode::ListExtend
            | OpCode::DictInsert
            | OpCode::DictMerge
            | OpCode::UnpackSequence
            | OpCode::UnpackEx
            | OpCode::LoadAttr
            | OpCode::StoreAttr
            | OpCode::DeleteAttr
            | OpCode::ImportName
            | OpCode::ImportFrom => 3,

            _ => 1,
        }
    }

    /// True for instructions whose operand is a forward `i16` jump offset
    #[must_use]
    pub const fn is_forward_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::PopJumpIfFalse
                | OpCode::PopJumpIfTrue
                | OpCode::JumpIfFalseOrPop
                | OpCode::JumpIfTrueOrPop
                | OpCode::ForIter
        )
    }

    /// True for instructions whose u16 operand indexes the name table
    #[must_use]
    pub const fn uses_name(self) -> bool {
        matches!(
            self,
            OpCode::LoadGlobal
                | OpCode::StoreGlobal
                | OpCode::DeleteGlobal
                | OpCode::LoadBuiltin
                | OpCode::LoadName
                | OpCode::StoreName
                | OpCode::DeleteName
                | OpCode::LoadAttr
                | OpCode::StoreAttr
                | OpCode::DeleteAttr
                | OpCode::ImportName
                | OpCode::ImportFrom
        )
    }

    /// Returns a human-readable name for the opcode
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::LoadConst => "LOAD_CONST",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::DupTwo => "DUP_TWO",
            OpCode::RotTwo => "ROT_TWO",
            OpCode::RotThree => "ROT_THREE",
            OpCode::LoadFast => "LOAD_FAST",
            OpCode::StoreFast => "STORE_FAST",
            OpCode::DeleteFast => "DELETE_FAST",
            OpCode::LoadDeref => "LOAD_DEREF",
            OpCode::StoreDeref => "STORE_DEREF",
            OpCode::DeleteDeref => "DELETE_DEREF",
            OpCode::LoadGlobal => "LOAD_GLOBAL",
            OpCode::StoreGlobal => "STORE_GLOBAL",
            OpCode::DeleteGlobal => "DELETE_GLOBAL",
            OpCode::LoadBuiltin => "LOAD_BUILTIN",
            OpCode::LoadName => "LOAD_NAME",
            OpCode::StoreName => "STORE_NAME",
            OpCode::DeleteName => "DELETE_NAME",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::FloorDiv => "FLOOR_DIV",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
            OpCode::LShift => "LSHIFT",
            OpCode::RShift => "RSHIFT",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::In => "IN",
            OpCode::NotIn => "NOT_IN",
            OpCode::Is => "IS",
            OpCode::IsNot => "IS_NOT",
            OpCode::Neg => "NEG",
            OpCode::Pos => "POS",
            OpCode::Not => "NOT",
            OpCode::Invert => "INVERT",
            OpCode::Jump => "JUMP",
            OpCode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            OpCode::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            OpCode::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            OpCode::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            OpCode::JumpBackward => "JUMP_BACKWARD",
            OpCode::GetIter => "GET_ITER",
            OpCode::ForIter => "FOR_ITER",
            OpCode::BuildList => "BUILD_LIST",
            OpCode::BuildTuple => "BUILD_TUPLE",
            OpCode::BuildDict => "BUILD_DICT",
            OpCode::BuildSlice => "BUILD_SLICE",
            OpCode::ListAppend => "LIST_APPEND",
            OpCode::ListExtend => "LIST_EXTEND",
            OpCode::DictInsert => "DICT_INSERT",
            OpCode::DictMerge => "DICT_MERGE",
            OpCode::ListToTuple => "LIST_TO_TUPLE",
            OpCode::UnpackSequence => "UNPACK_SEQUENCE",
            OpCode::UnpackEx => "UNPACK_EX",
            OpCode::LoadAttr => "LOAD_ATTR",
            OpCode::StoreAttr => "STORE_ATTR",
            OpCode::DeleteAttr => "DELETE_ATTR",
            OpCode::LoadSubscr => "LOAD_SUBSCR",
            OpCode::StoreSubscr => "STORE_SUBSCR",
            OpCode::DeleteSubscr => "DELETE_SUBSCR",
            OpCode::Call => "CALL",
            OpCode::CallKw => "CALL_KW",
            OpCode::CallEx => "CALL_EX",
            OpCode::MakeFunction => "MAKE_FUNCTION",
            OpCode::Return => "RETURN",
            OpCode::Yield => "YIELD",
            OpCode::BuildClass => "BUILD_CLASS",
            OpCode::ImportName => "IMPORT_NAME",
            OpCode::ImportFrom => "IMPORT_FROM",
            OpCode::Raise => "RAISE",
            OpCode::Reraise => "RERAISE",
            OpCode::MatchException => "MATCH_EXCEPTION",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl From<BinOp> for OpCode {
    fn from(op: BinOp) -> Self {
        match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::FloorDiv => OpCode::FloorDiv,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            BinOp::LShift => OpCode::LShift,
            BinOp::RShift => OpCode::RShift,
            BinOp::BitAnd => OpCode::BitAnd,
            BinOp::BitOr => OpCode::BitOr,
            BinOp::BitXor => OpCode::BitXor,
        }
    }
}

impl From<CmpOp> for OpCode {
    fn from(op: CmpOp) -> Self {
        match op {
            CmpOp::Eq => OpCode::Eq,
            CmpOp::Ne => OpCode::Ne,
            CmpOp::Lt => OpCode::Lt,
            CmpOp::Le => OpCode::Le,
            CmpOp::Gt => OpCode::Gt,
            CmpOp::Ge => OpCode::Ge,
            CmpOp::In => OpCode::In,
            CmpOp::NotIn => OpCode::NotIn,
            CmpOp::Is => OpCode::Is,
            CmpOp::IsNot => OpCode::IsNot,
        }
    }
}

impl OpCode {
    /// The arithmetic operator this instruction performs, if any
    #[must_use]
    pub const fn as_binop(self) -> Option<BinOp> {
        Some(match self {
            OpCode::Add => BinOp::Add,
            OpCode::Sub => BinOp::Sub,
            OpCode::Mul => BinOp::Mul,
            OpCode::Div => BinOp::Div,
            OpCode::FloorDiv => BinOp::FloorDiv,
            OpCode::Mod => BinOp::Mod,
            OpCode::Pow => BinOp::Pow,
            OpCode::LShift => BinOp::LShift,
            OpCode::RShift => BinOp::RShift,
            OpCode::BitAnd => BinOp::BitAnd,
            OpCode::BitOr => BinOp::BitOr,
            OpCode::BitXor => BinOp::BitXor,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_cmpop(self) -> Option<CmpOp> {
        Some(match self {
            OpCode::Eq => CmpOp::Eq,
            OpCode::Ne => CmpOp::Ne,
            OpCode::Lt => CmpOp::Lt,
            OpCode::Le => CmpOp::Le,
            OpCode::Gt => CmpOp::Gt,
            OpCode::Ge => CmpOp::Ge,
            OpCode::In => CmpOp::In,
            OpCode::NotIn => CmpOp::NotIn,
            OpCode::Is => CmpOp::Is,
            OpCode::IsNot => CmpOp::IsNot,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_discriminants() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i, "OpCode {op:?} is out of order");
        }
        assert_eq!(OpCode::ALL.len(), OpCode::MatchException as usize + 1);
    }

    #[test]
    fn decode_rejects_unknown_bytes() {
        assert_eq!(OpCode::try_from(0), Ok(OpCode::LoadConst));
        assert_eq!(OpCode::try_from(250), Err(250));
    }

    #[test]
    fn sizes_follow_operand_kinds() {
        assert_eq!(OpCode::Add.size(), 1);
        assert_eq!(OpCode::Call.size(), 2);
        assert_eq!(OpCode::LoadFast.size(), 3);
        assert_eq!(OpCode::UnpackEx.size(), 3);
        assert!(OpCode::ForIter.is_forward_jump());
        assert!(!OpCode::JumpBackward.is_forward_jump());
    }

    #[test]
    fn opcode_names() {
        assert_eq!(OpCode::LoadFast.name(), "LOAD_FAST");
        assert_eq!(OpCode::PopJumpIfFalse.to_string(), "POP_JUMP_IF_FALSE");
    }

    #[test]
    fn operator_mapping() {
        assert_eq!(OpCode::from(BinOp::FloorDiv), OpCode::FloorDiv);
        assert_eq!(OpCode::FloorDiv.as_binop(), Some(BinOp::FloorDiv));
        assert_eq!(OpCode::from(CmpOp::NotIn).as_cmpop(), Some(CmpOp::NotIn));
        assert_eq!(OpCode::Pop.as_binop(), None);
    }
}
