//! Type inference over bytecode
//!
//! Before lowering, the compiler walks every instruction reachable from the
//! entry point with an abstract state: the static type of each local slot
//! and each stack slot. Block entry states must agree exactly on the stack;
//! locals that disagree become unreadable. Anything the lowering cannot
//! handle fails here, so a successful analysis always lowers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use crate::bytecode::{CodeId, CodeObject, OpCode};

use super::profiler::{Feedback, Profile};
use super::types::{EntryKind, Ty, TypeSignature};
use super::{JitError, JitResult};

/// Static knowledge about one local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unbound,
    Bound(Ty),
    /// Different on different paths; reading it is not compiled
    Unknown,
}

impl Slot {
    fn join(self, other: Slot) -> Slot {
        if self == other {
            self
        } else {
            Slot::Unknown
        }
    }
}

/// Static knowledge about one stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abs {
    Value(Ty),
    /// A global loaded to be called; operand is the name index
    Callee(u16),
}

/// Abstract machine state before an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub locals: Vec<Slot>,
    pub stack: Vec<Abs>,
}

impl State {
    fn join(&self, other: &State, offset: usize) -> JitResult<State> {
        if self.stack != other.stack {
            return Err(JitError::TypeMismatch {
                expected: format!("stack {:?} at {offset}", self.stack),
                got: format!("{:?}", other.stack),
            });
        }
        Ok(State {
            locals: self
                .locals
                .iter()
                .zip(&other.locals)
                .map(|(a, b)| a.join(*b))
                .collect(),
            stack: self.stack.clone(),
        })
    }

    fn pop(&mut self, offset: usize) -> JitResult<Abs> {
        self.stack
            .pop()
            .ok_or_else(|| JitError::Internal(format!("stack underflow at {offset}")))
    }

    fn pop_value(&mut self, offset: usize) -> JitResult<Ty> {
        match self.pop(offset)? {
            Abs::Value(ty) => Ok(ty),
            Abs::Callee(_) => Err(JitError::UnsupportedInstruction(format!(
                "global used as a value at {offset}"
            ))),
        }
    }

    fn push(&mut self, ty: Ty) {
        self.stack.push(Abs::Value(ty));
    }
}

/// A call compiled as a direct entry into another compiled function
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub name: Rc<str>,
    pub callee: CodeId,
    pub result: Ty,
}

/// Decides whether `name(args...)` can be called natively
pub trait CallResolver {
    fn resolve(&self, name: &Rc<str>, args: &[Ty]) -> Option<ResolvedCall>;
}

/// Everything the lowering needs to know
#[derive(Debug)]
pub struct Analysis {
    pub start: usize,
    /// State before each reachable instruction
    pub states: BTreeMap<usize, State>,
    /// Offsets that begin a basic block
    pub leaders: BTreeSet<usize>,
    /// Resolved callees, by `Call` offset
    pub calls: HashMap<usize, ResolvedCall>,
}

impl Analysis {
    /// Run inference from the entry point `signature` describes
    pub fn run(
        code: &CodeObject,
        signature: &TypeSignature,
        profile: Option<&Profile>,
        resolver: &dyn CallResolver,
    ) -> JitResult<Analysis> {
        let mut locals = vec![Slot::Unbound; code.varnames.len()];
        let start = match signature.entry {
            EntryKind::Call => {
                if signature.tags.len() > locals.len() {
                    return Err(JitError::Internal("more parameters than local slots".to_string()));
                }
                0
            }
            EntryKind::Loop { header } => {
                if signature.tags.len() != locals.len() {
                    return Err(JitError::Internal("loop entry does not cover every local".to_string()));
                }
                header as usize
            }
        };
        for (slot, ty) in locals.iter_mut().zip(&signature.tags) {
            *slot = ty.map_or(Slot::Unbound, Slot::Bound);
        }

        let mut analysis = Analysis {
            start,
            states: BTreeMap::new(),
            leaders: BTreeSet::from([start]),
            calls: HashMap::new(),
        };
        let mut worklist = vec![(
            start,
            State {
                locals,
                stack: Vec::new(),
            },
        )];

        while let Some((offset, incoming)) = worklist.pop() {
            let state = match analysis.states.get(&offset) {
                None => incoming,
                Some(previous) => {
                    let joined = previous.join(&incoming, offset)?;
                    if joined == *previous {
                        continue;
                    }
                    joined
                }
            };
            analysis.states.insert(offset, state.clone());
            let mut step = Step {
                code,
                offset,
                state,
                profile,
                resolver,
                analysis: &mut analysis,
            };
            worklist.extend(step.run()?);
        }
        Ok(analysis)
    }

    /// The block-ending instruction's successors become block leaders; the
    /// instruction following an unconditional transfer does too
    fn mark_leaders(&mut self, targets: &[usize]) {
        self.leaders.extend(targets.iter().copied());
    }
}

struct Step<'a> {
    code: &'a CodeObject,
    offset: usize,
    state: State,
    profile: Option<&'a Profile>,
    resolver: &'a dyn CallResolver,
    analysis: &'a mut Analysis,
}

impl Step<'_> {
    fn unsupported<T>(&self, what: impl std::fmt::Display) -> JitResult<T> {
        Err(JitError::UnsupportedInstruction(format!("{what} at {}", self.offset)))
    }

    fn operand_u8(&self) -> JitResult<u8> {
        self.code
            .chunk
            .read_byte(self.offset + 1)
            .ok_or_else(|| JitError::Internal(format!("truncated operand at {}", self.offset)))
    }

    fn operand_u16(&self) -> JitResult<u16> {
        self.code
            .chunk
            .read_u16(self.offset + 1)
            .ok_or_else(|| JitError::Internal(format!("truncated operand at {}", self.offset)))
    }

    fn jump_target(&self) -> JitResult<usize> {
        self.code
            .chunk
            .jump_target(self.offset)
            .ok_or_else(|| JitError::Internal(format!("bad jump at {}", self.offset)))
    }

    fn check_feedback(&self) -> JitResult<()> {
        match self.profile.and_then(|profile| profile.site(self.offset)) {
            Some(Feedback::Poly) => self.unsupported("polymorphic operands"),
            _ => Ok(()),
        }
    }

    /// Apply the instruction and return the successor states
    fn run(&mut self) -> JitResult<Vec<(usize, State)>> {
        let offset = self.offset;
        let byte = self
            .code
            .chunk
            .read_byte(offset)
            .ok_or_else(|| JitError::Internal(format!("fell off the end at {offset}")))?;
        let op = OpCode::try_from(byte)
            .map_err(|b| JitError::UnsupportedInstruction(format!("unknown opcode {b}")))?;
        let next = offset + op.size();

        match op {
            OpCode::LoadConst => {
                let index = self.operand_u16()?;
                let Some(value) = self.code.chunk.get_constant(index) else {
                    return Err(JitError::Internal(format!("bad constant {index}")));
                };
                match Ty::of(value) {
                    Some(ty) => self.state.push(ty),
                    None => return self.unsupported(format!("{} constant", value.type_name())),
                }
            }
            OpCode::Pop => {
                self.state.pop(offset)?;
            }
            OpCode::Dup => {
                let ty = self.state.pop_value(offset)?;
                self.state.push(ty);
                self.state.push(ty);
            }
            OpCode::RotTwo => {
                let a = self.state.pop_value(offset)?;
                let b = self.state.pop_value(offset)?;
                self.state.push(a);
                self.state.push(b);
            }
            OpCode::RotThree => {
                let a = self.state.pop_value(offset)?;
                let b = self.state.pop_value(offset)?;
                let c = self.state.pop_value(offset)?;
                self.state.push(a);
                self.state.push(c);
                self.state.push(b);
            }
            OpCode::LoadFast => {
                let slot = self.operand_u16()? as usize;
                match self.state.locals.get(slot) {
                    Some(Slot::Bound(ty)) => {
                        let ty = *ty;
                        self.state.push(ty);
                    }
                    Some(_) => return self.unsupported(format!("read of possibly unbound local {slot}")),
                    None => return Err(JitError::Internal(format!("bad local {slot}"))),
                }
            }
            OpCode::StoreFast => {
                let slot = self.operand_u16()? as usize;
                let ty = self.state.pop_value(offset)?;
                match self.state.locals.get_mut(slot) {
                    Some(local) => *local = Slot::Bound(ty),
                    None => return Err(JitError::Internal(format!("bad local {slot}"))),
                }
            }
            OpCode::LoadGlobal => {
                let index = self.operand_u16()?;
                self.state.stack.push(Abs::Callee(index));
            }
            _ if op.as_binop().is_some() => {
                self.check_feedback()?;
                let b = self.state.pop_value(offset)?;
                let a = self.state.pop_value(offset)?;
                match binary_result(op, a, b) {
                    Some(ty) => self.state.push(ty),
                    None => return self.unsupported(format!("{op} on {a} and {b}")),
                }
            }
            OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                self.check_feedback()?;
                let b = self.state.pop_value(offset)?;
                let a = self.state.pop_value(offset)?;
                if !a.is_numeric() || !b.is_numeric() {
                    return self.unsupported(format!("{op} on {a} and {b}"));
                }
                self.state.push(Ty::Bool);
            }
            OpCode::Neg | OpCode::Pos | OpCode::Invert => {
                let a = self.state.pop_value(offset)?;
                let result = match (op, a) {
                    (OpCode::Invert, Ty::Int | Ty::Bool) => Ty::Int,
                    (OpCode::Neg | OpCode::Pos, Ty::Int | Ty::Bool) => Ty::Int,
                    (OpCode::Neg | OpCode::Pos, Ty::Float) => Ty::Float,
                    _ => return self.unsupported(format!("{op} on {a}")),
                };
                self.state.push(result);
            }
            OpCode::Not => {
                self.state.pop_value(offset)?;
                self.state.push(Ty::Bool);
            }
            OpCode::Jump => {
                let target = self.jump_target()?;
                self.analysis.mark_leaders(&[target, next]);
                return Ok(vec![(target, self.state.clone())]);
            }
            OpCode::JumpBackward => {
                let target = self.jump_target()?;
                self.analysis.mark_leaders(&[target, next]);
                return Ok(vec![(target, self.state.clone())]);
            }
            OpCode::PopJumpIfFalse | OpCode::PopJumpIfTrue => {
                let target = self.jump_target()?;
                self.state.pop_value(offset)?;
                self.analysis.mark_leaders(&[target, next]);
                return Ok(vec![(target, self.state.clone()), (next, self.state.clone())]);
            }
            OpCode::JumpIfFalseOrPop | OpCode::JumpIfTrueOrPop => {
                let target = self.jump_target()?;
                let kept = self.state.clone();
                self.state.pop_value(offset)?;
                if !matches!(kept.stack.last(), Some(Abs::Value(_))) {
                    return self.unsupported(op);
                }
                self.analysis.mark_leaders(&[target, next]);
                return Ok(vec![(target, kept), (next, self.state.clone())]);
            }
            OpCode::Return => {
                self.state.pop_value(offset)?;
                self.analysis.mark_leaders(&[next]);
                return Ok(Vec::new());
            }
            OpCode::Call => {
                let argc = self.operand_u8()? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(self.state.pop_value(offset)?);
                }
                args.reverse();
                let Abs::Callee(index) = self.state.pop(offset)? else {
                    return self.unsupported("call of a computed value");
                };
                let Some(name) = self.code.name_at(index) else {
                    return Err(JitError::Internal(format!("bad name {index}")));
                };
                let Some(call) = self.resolver.resolve(name, &args) else {
                    return self.unsupported(format!("call to '{name}'"));
                };
                self.state.push(call.result);
                self.analysis.calls.insert(offset, call);
            }
            _ => return self.unsupported(op),
        }
        Ok(vec![(next, self.state.clone())])
    }
}

/// Static result type of an arithmetic instruction, or `None` when the
/// combination is not compiled
#[must_use]
pub fn binary_result(op: OpCode, a: Ty, b: Ty) -> Option<Ty> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    let float = a == Ty::Float || b == Ty::Float;
    match op {
        OpCode::Add | OpCode::Sub | OpCode::Mul => Some(if float { Ty::Float } else { Ty::Int }),
        OpCode::Div => Some(Ty::Float),
        OpCode::FloorDiv | OpCode::Mod if !float => Some(Ty::Int),
        OpCode::LShift | OpCode::RShift if !float => Some(Ty::Int),
        OpCode::BitAnd | OpCode::BitOr | OpCode::BitXor if a == Ty::Bool && b == Ty::Bool => Some(Ty::Bool),
        OpCode::BitAnd | OpCode::BitOr | OpCode::BitXor if !float => Some(Ty::Int),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCalls;

    impl CallResolver for NoCalls {
        fn resolve(&self, _name: &Rc<str>, _args: &[Ty]) -> Option<ResolvedCall> {
            None
        }
    }

    /// The code object of the first function defined in `source`
    fn function(source: &str) -> Rc<CodeObject> {
        let module = crate::compile_source(source, "<test>").expect("compiles");
        let code = module.children().next().cloned().expect("defines a function");
        code
    }

    #[test]
    fn straight_line_arithmetic() {
        let code = function("def f(a, b):\n    c = a * 2 + b\n    return c / 2\n");
        let signature = TypeSignature::call(&[Ty::Int, Ty::Float]);
        let analysis = Analysis::run(&code, &signature, None, &NoCalls).unwrap();
        let last = analysis.states.values().last().unwrap();
        assert_eq!(last.stack, vec![Abs::Value(Ty::Float)]);
        assert_eq!(last.locals[2], Slot::Bound(Ty::Float));
    }

    #[test]
    fn loops_reach_a_fixpoint() {
        let code = function(
            "def f(n):\n    total = 0\n    i = 0\n    while i < n:\n        total = total + i\n        i = i + 1\n    return total\n",
        );
        let analysis = Analysis::run(&code, &TypeSignature::call(&[Ty::Int]), None, &NoCalls).unwrap();
        assert!(analysis.leaders.len() >= 3);
        assert!(analysis.calls.is_empty());
    }

    #[test]
    fn conflicting_local_types_are_unreadable() {
        let code = function(
            "def f(n):\n    x = 0\n    if n:\n        x = 1.5\n    return x\n",
        );
        let err = Analysis::run(&code, &TypeSignature::call(&[Ty::Int]), None, &NoCalls).unwrap_err();
        assert!(matches!(err, JitError::UnsupportedInstruction(_)), "{err}");
    }

    #[test]
    fn non_primitive_operations_fail() {
        let code = function("def f(n):\n    return [n]\n");
        assert!(Analysis::run(&code, &TypeSignature::call(&[Ty::Int]), None, &NoCalls).is_err());

        let code = function("def f(n):\n    return n ** 2\n");
        assert!(Analysis::run(&code, &TypeSignature::call(&[Ty::Int]), None, &NoCalls).is_err());
    }

    #[test]
    fn unresolved_calls_fail() {
        let code = function("def f(n):\n    return g(n)\n\ndef g(n):\n    return n\n");
        let err = Analysis::run(&code, &TypeSignature::call(&[Ty::Int]), None, &NoCalls).unwrap_err();
        assert!(err.to_string().contains("'g'"), "{err}");
    }

    #[test]
    fn result_types() {
        assert_eq!(binary_result(OpCode::Add, Ty::Int, Ty::Bool), Some(Ty::Int));
        assert_eq!(binary_result(OpCode::Mul, Ty::Int, Ty::Float), Some(Ty::Float));
        assert_eq!(binary_result(OpCode::Div, Ty::Int, Ty::Int), Some(Ty::Float));
        assert_eq!(binary_result(OpCode::BitAnd, Ty::Bool, Ty::Bool), Some(Ty::Bool));
        assert_eq!(binary_result(OpCode::FloorDiv, Ty::Float, Ty::Int), None);
        assert_eq!(binary_result(OpCode::Pow, Ty::Int, Ty::Int), None);
        assert_eq!(binary_result(OpCode::Add, Ty::None, Ty::Int), None);
    }
}
