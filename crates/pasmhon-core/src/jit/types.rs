//! Value representation shared by compiled code and the VM
//!
//! Compiled code only handles unboxed primitives. A value crossing the
//! native boundary is a [`PackedValue`]: a tag word and a data word.
//!
//! ```text
//! struct PackedValue {
//!     tag: u64,   // Tag discriminant, or TAG_DEOPT in a return
//!     data: u64,  // i64 payload, f64 bits, 0/1 for bools, 0 for None
//! }
//! ```

use std::fmt;

use cranelift_codegen::ir::{types, Type as ClifType};

use crate::bytecode::Value;

/// Tag returned instead of a value when compiled code gives up
pub const TAG_DEOPT: u64 = u64::MAX;

/// Tag of a local that has no value yet (on-stack replacement only)
pub const TAG_UNBOUND: u64 = 4;

/// A primitive type compiled code can hold unboxed
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Int = 0,
    Float = 1,
    Bool = 2,
    None = 3,
}

impl Ty {
    /// The unboxed type of `value`, if it has one
    #[must_use]
    pub fn of(value: &Value) -> Option<Ty> {
        match value {
            Value::Int(_) => Some(Ty::Int),
            Value::Float(_) => Some(Ty::Float),
            Value::Bool(_) => Some(Ty::Bool),
            Value::None => Some(Ty::None),
            _ => None,
        }
    }

    #[must_use]
    pub const fn tag(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_tag(tag: u64) -> Option<Ty> {
        match tag {
            0 => Some(Ty::Int),
            1 => Some(Ty::Float),
            2 => Some(Ty::Bool),
            3 => Some(Ty::None),
            _ => None,
        }
    }

    /// Cranelift type of a value of this type; everything except floats
    /// lives in an integer register
    #[must_use]
    pub const fn clif(self) -> ClifType {
        match self {
            Ty::Float => CraneliftTypes::FLOAT,
            Ty::Int | Ty::Bool | Ty::None => CraneliftTypes::INT,
        }
    }

    /// Int and bool take part in integer arithmetic
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(self, Ty::Int | Ty::Bool)
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Ty::Int | Ty::Bool | Ty::Float)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Ty::Int => "int",
            Ty::Float => "float",
            Ty::Bool => "bool",
            Ty::None => "None",
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cranelift type mappings
#[derive(Debug, Clone, Copy)]
pub struct CraneliftTypes;

impl CraneliftTypes {
    /// The pointer type for the target platform
    pub const POINTER: ClifType = types::I64;

    /// Type for int, bool and None payloads
    pub const INT: ClifType = types::I64;

    /// Type for float payloads
    pub const FLOAT: ClifType = types::F64;

    /// Tag word of a packed value
    pub const TAG: ClifType = types::I64;

    /// Data word of a packed value
    pub const DATA: ClifType = types::I64;
}

/// A value crossing the native boundary
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedValue {
    pub tag: u64,
    pub data: u64,
}

impl PackedValue {
    /// Size in bytes, as laid out in argument buffers
    pub const SIZE: u32 = 16;

    /// Offset of the data word
    pub const DATA_OFFSET: i32 = 8;

    /// Pack a primitive; `None` for anything compiled code cannot hold
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let data = match value {
            Value::Int(i) => *i as u64,
            Value::Float(f) => f.to_bits(),
            Value::Bool(b) => u64::from(*b),
            Value::None => 0,
            _ => return None,
        };
        Some(Self {
            tag: Ty::of(value)?.tag(),
            data,
        })
    }

    /// A local slot with no value
    #[must_use]
    pub const fn unbound() -> Self {
        Self {
            tag: TAG_UNBOUND,
            data: 0,
        }
    }

    #[must_use]
    pub fn to_value(self) -> Option<Value> {
        Some(match Ty::from_tag(self.tag)? {
            Ty::Int => Value::Int(self.data as i64),
            Ty::Float => Value::Float(f64::from_bits(self.data)),
            Ty::Bool => Value::Bool(self.data != 0),
            Ty::None => Value::None,
        })
    }
}

/// FFI-safe return type of compiled entries
///
/// Two `u64`s come back in a register pair on the supported hosts, which
/// is how Cranelift lowers a two-value return.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnPair {
    pub tag: u64,
    pub data: u64,
}

impl ReturnPair {
    pub const DEOPT: ReturnPair = ReturnPair {
        tag: TAG_DEOPT,
        data: 0,
    };

    #[must_use]
    pub const fn is_deopt(self) -> bool {
        self.tag == TAG_DEOPT
    }

    #[must_use]
    pub fn to_value(self) -> Option<Value> {
        PackedValue {
            tag: self.tag,
            data: self.data,
        }
        .to_value()
    }
}

/// Where a compiled entry starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// At the start of the function, taking its parameters
    Call,
    /// At a loop header, taking every local slot
    Loop { header: u32 },
}

/// What a compiled entry was specialized for
///
/// For a call entry `tags` holds one type per parameter. For a loop entry
/// it holds one per local slot, `None` meaning unbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSignature {
    pub entry: EntryKind,
    pub tags: Vec<Option<Ty>>,
}

impl TypeSignature {
    #[must_use]
    pub fn call(params: &[Ty]) -> Self {
        Self {
            entry: EntryKind::Call,
            tags: params.iter().copied().map(Some).collect(),
        }
    }

    #[must_use]
    pub fn osr(header: usize, locals: Vec<Option<Ty>>) -> Self {
        Self {
            entry: EntryKind::Loop {
                header: header as u32,
            },
            tags: locals,
        }
    }

    /// Whether packed arguments fit this signature
    #[must_use]
    pub fn accepts(&self, entry: EntryKind, args: &[PackedValue]) -> bool {
        self.entry == entry
            && self.tags.len() == args.len()
            && self
                .tags
                .iter()
                .zip(args)
                .all(|(ty, arg)| ty.map_or(TAG_UNBOUND, Ty::tag) == arg.tag)
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let EntryKind::Loop { header } = self.entry {
            write!(f, "loop@{header}")?;
        }
        f.write_str("(")?;
        for (i, ty) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match ty {
                Some(ty) => write!(f, "{ty}")?,
                None => f.write_str("unbound")?,
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_matches_the_ir() {
        assert_eq!(std::mem::size_of::<PackedValue>(), PackedValue::SIZE as usize);
        assert_eq!(std::mem::size_of::<ReturnPair>(), 16);
    }

    #[test]
    fn primitives_pack_and_unpack() {
        for value in [Value::Int(-7), Value::Float(2.5), Value::Bool(true), Value::None] {
            let packed = PackedValue::from_value(&value).unwrap();
            assert!(packed.to_value().unwrap().py_eq(&value));
        }
        assert!(PackedValue::from_value(&Value::str("x")).is_none());
        assert!(PackedValue::unbound().to_value().is_none());
    }

    #[test]
    fn signatures_accept_matching_tags_only() {
        let signature = TypeSignature::call(&[Ty::Int, Ty::Float]);
        let good = [
            PackedValue::from_value(&Value::Int(1)).unwrap(),
            PackedValue::from_value(&Value::Float(1.0)).unwrap(),
        ];
        assert!(signature.accepts(EntryKind::Call, &good));
        assert!(!signature.accepts(EntryKind::Call, &good[..1]));
        assert!(!signature.accepts(EntryKind::Loop { header: 0 }, &good));
        assert_eq!(signature.to_string(), "(int, float)");

        let osr = TypeSignature::osr(12, vec![Some(Ty::Int), None]);
        assert!(osr.accepts(EntryKind::Loop { header: 12 }, &[good[0], PackedValue::unbound()]));
        assert_eq!(osr.to_string(), "loop@12(int, unbound)");
    }

    #[test]
    fn deopt_is_not_a_value() {
        assert!(ReturnPair::DEOPT.is_deopt());
        assert!(ReturnPair::DEOPT.to_value().is_none());
    }
}
