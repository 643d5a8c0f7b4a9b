//! Lowering of analyzed bytecode to native code with Cranelift
//!
//! Every local and stack slot becomes a Cranelift variable per machine
//! type, so SSA construction handles merges at jump targets. Anything the
//! interpreter would raise on (overflow, division by zero, bad shift
//! counts) branches to a shared block that returns `TAG_DEOPT`.

use std::collections::HashMap;

use cranelift_codegen::ir::{
    self, condcodes::FloatCC, condcodes::IntCC, types, AbiParam, Block, FuncRef, InstBuilder,
    MemFlags, Signature, StackSlotData, StackSlotKind, UserFuncName,
};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FuncInstBuilder, FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::bytecode::{CodeObject, OpCode};

use super::analysis::{binary_result, Abs, Analysis, Slot};
use super::runtime::{self, CallSite, NativeEntry};
use super::types::{CraneliftTypes, PackedValue, Ty, TypeSignature, TAG_DEOPT, TAG_UNBOUND};
use super::{JitError, JitResult};

fn cranelift_error(err: impl std::fmt::Display) -> JitError {
    JitError::Cranelift(err.to_string())
}

/// Owns the Cranelift JIT module and turns analyzed code objects into
/// native entries
pub struct JitCompiler {
    module: JITModule,

    /// Compilation context (reused between compilations)
    ctx: Context,

    /// Function builder context (reused between compilations)
    builder_ctx: FunctionBuilderContext,

    /// The imported call helper
    call_helper: FuncId,

    /// Functions defined so far, for unique symbol names
    defined: u32,
}

impl JitCompiler {
    /// Configure Cranelift for the host machine
    pub fn new() -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder.set("opt_level", "speed").map_err(cranelift_error)?;
        flag_builder.set("is_pic", "false").map_err(cranelift_error)?;

        let isa_builder = cranelift_native::builder()
            .map_err(|msg| JitError::UnsupportedHost(msg.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(cranelift_error)?;

        let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        jit_builder.symbol(runtime::CALL_HELPER, runtime::pasmhon_jit_call as *const u8);
        let mut module = JITModule::new(jit_builder);

        let mut helper_sig = module.make_signature();
        helper_sig.params.push(AbiParam::new(CraneliftTypes::POINTER));
        helper_sig.params.push(AbiParam::new(CraneliftTypes::POINTER));
        helper_sig.params.push(AbiParam::new(CraneliftTypes::POINTER));
        helper_sig.params.push(AbiParam::new(types::I32));
        helper_sig.returns.push(AbiParam::new(CraneliftTypes::TAG));
        helper_sig.returns.push(AbiParam::new(CraneliftTypes::DATA));
        let call_helper = module
            .declare_function(runtime::CALL_HELPER, Linkage::Import, &helper_sig)
            .map_err(cranelift_error)?;

        Ok(Self {
            module,
            ctx: Context::new(),
            builder_ctx: FunctionBuilderContext::new(),
            call_helper,
            defined: 0,
        })
    }

    /// `(ctx, args) -> (tag, data)`
    fn entry_signature(&self) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(CraneliftTypes::POINTER));
        sig.params.push(AbiParam::new(CraneliftTypes::POINTER));
        sig.returns.push(AbiParam::new(CraneliftTypes::TAG));
        sig.returns.push(AbiParam::new(CraneliftTypes::DATA));
        sig
    }

    /// Compile `code` for the entry point and argument types in `signature`.
    ///
    /// `sites` maps each resolved `Call` offset to the call site record the
    /// generated code hands to the call helper.
    pub fn compile(
        &mut self,
        code: &CodeObject,
        signature: &TypeSignature,
        analysis: &Analysis,
        sites: &HashMap<usize, *const CallSite>,
    ) -> JitResult<NativeEntry> {
        let sig = self.entry_signature();
        self.defined += 1;
        let name = format!("pasmhon_{}_{}", code.id.as_u32(), self.defined);
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(cranelift_error)?;

        self.ctx.func.signature = sig;
        self.ctx.func.name = UserFuncName::user(0, func_id.as_u32());

        let lowered = {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let call_helper = self.module.declare_func_in_func(self.call_helper, builder.func);
            let lowered = FunctionCompiler::new(&mut builder, code, analysis, sites, call_helper)
                .compile(signature);
            if lowered.is_ok() {
                builder.finalize();
            }
            lowered
        };
        if let Err(err) = lowered {
            self.builder_ctx = FunctionBuilderContext::new();
            self.module.clear_context(&mut self.ctx);
            return Err(err);
        }

        let defined = self
            .module
            .define_function(func_id, &mut self.ctx)
            .map_err(cranelift_error);
        self.module.clear_context(&mut self.ctx);
        defined?;

        self.module.finalize_definitions().map_err(cranelift_error)?;
        Ok(NativeEntry::new(self.module.get_finalized_function(func_id)))
    }
}

/// A value with its static type
#[derive(Debug, Clone, Copy)]
struct Typed {
    ty: Ty,
    val: ir::Value,
}

/// Where a variable lives in the interpreter's frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Home {
    Local(usize),
    Stack(usize),
}

/// Internal state for compiling a single entry
struct FunctionCompiler<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    code: &'a CodeObject,
    analysis: &'a Analysis,
    sites: &'a HashMap<usize, *const CallSite>,
    call_helper: FuncRef,

    /// One variable per home and machine type
    vars: HashMap<(Home, ir::Type), Variable>,
    next_var: u32,

    /// Block for each leader offset
    blocks: HashMap<usize, Block>,

    /// Shared exit returning `TAG_DEOPT`
    deopt: Block,

    /// The context pointer, defined in the entry block
    ctx_ptr: Option<ir::Value>,

    /// Static types of the stack at the current instruction
    stack: Vec<Abs>,

    /// Whether the current block has a terminator (jump/return)
    block_terminated: bool,
}

impl<'a, 'b> FunctionCompiler<'a, 'b> {
    fn new(
        builder: &'a mut FunctionBuilder<'b>,
        code: &'a CodeObject,
        analysis: &'a Analysis,
        sites: &'a HashMap<usize, *const CallSite>,
        call_helper: FuncRef,
    ) -> Self {
        let deopt = builder.create_block();
        Self {
            builder,
            code,
            analysis,
            sites,
            call_helper,
            vars: HashMap::new(),
            next_var: 0,
            blocks: HashMap::new(),
            deopt,
            ctx_ptr: None,
            stack: Vec::new(),
            block_terminated: false,
        }
    }

    fn compile(mut self, signature: &TypeSignature) -> JitResult<()> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let params = self.builder.block_params(entry).to_vec();
        let [ctx_ptr, args] = params[..] else {
            return Err(JitError::Internal("entry block parameters".to_string()));
        };
        self.ctx_ptr = Some(ctx_ptr);

        // tag guards, then unpack into locals
        for (slot, ty) in signature.tags.iter().enumerate() {
            let base = slot as i32 * PackedValue::SIZE as i32;
            let tag = self.builder.ins().load(CraneliftTypes::TAG, MemFlags::trusted(), args, base);
            let expected = ty.map_or(TAG_UNBOUND, Ty::tag);
            let mismatch = self.builder.ins().icmp_imm(IntCC::NotEqual, tag, expected as i64);
            self.deopt_if(mismatch);
            if let Some(ty) = *ty {
                let data = self.builder.ins().load(
                    CraneliftTypes::DATA,
                    MemFlags::trusted(),
                    args,
                    base + PackedValue::DATA_OFFSET,
                );
                let val = self.unpack(ty, data);
                self.store_local(slot, Typed { ty, val });
            }
        }
        let start = self.block_for(self.analysis.start);
        self.builder.ins().jump(start, &[]);
        self.block_terminated = true;

        let analysis = self.analysis;
        for (&offset, state) in &analysis.states {
            if analysis.leaders.contains(&offset) {
                let block = self.block_for(offset);
                if !self.block_terminated {
                    self.builder.ins().jump(block, &[]);
                }
                self.builder.switch_to_block(block);
                self.block_terminated = false;
            } else if self.block_terminated {
                return Err(JitError::Internal(format!("instruction {offset} has no block")));
            }
            self.stack.clone_from(&state.stack);
            self.lower(offset, &state.locals)?;
        }
        if !self.block_terminated {
            self.builder.ins().jump(self.deopt, &[]);
        }

        self.builder.switch_to_block(self.deopt);
        let tag = self.builder.ins().iconst(CraneliftTypes::TAG, TAG_DEOPT as i64);
        let data = self.builder.ins().iconst(CraneliftTypes::DATA, 0);
        self.builder.ins().return_(&[tag, data]);

        self.builder.seal_all_blocks();
        Ok(())
    }

    fn ins(&mut self) -> FuncInstBuilder<'_, 'b> {
        self.builder.ins()
    }

    // ===== Variables =====

    fn var(&mut self, home: Home, ty: Ty) -> Variable {
        let clif = ty.clif();
        if let Some(&var) = self.vars.get(&(home, clif)) {
            return var;
        }
        let var = Variable::from_u32(self.next_var);
        self.next_var += 1;
        self.builder.declare_var(var, clif);
        self.vars.insert((home, clif), var);
        var
    }

    fn store_local(&mut self, slot: usize, value: Typed) {
        let var = self.var(Home::Local(slot), value.ty);
        self.builder.def_var(var, value.val);
    }

    fn push(&mut self, value: Typed) {
        let var = self.var(Home::Stack(self.stack.len()), value.ty);
        self.builder.def_var(var, value.val);
        self.stack.push(Abs::Value(value.ty));
    }

    fn pop(&mut self) -> JitResult<Option<Typed>> {
        match self.stack.pop() {
            Some(Abs::Value(ty)) => {
                let var = self.var(Home::Stack(self.stack.len()), ty);
                Ok(Some(Typed {
                    ty,
                    val: self.builder.use_var(var),
                }))
            }
            Some(Abs::Callee(_)) => Ok(None),
            None => Err(JitError::Internal("stack underflow".to_string())),
        }
    }

    fn pop_value(&mut self) -> JitResult<Typed> {
        self.pop()?
            .ok_or_else(|| JitError::Internal("callee used as a value".to_string()))
    }

    fn peek_value(&mut self) -> JitResult<Typed> {
        let value = self.pop_value()?;
        self.stack.push(Abs::Value(value.ty));
        Ok(value)
    }

    // ===== Blocks =====

    fn block_for(&mut self, offset: usize) -> Block {
        if let Some(&block) = self.blocks.get(&offset) {
            return block;
        }
        let block = self.builder.create_block();
        self.blocks.insert(offset, block);
        block
    }

    /// Leave for the deopt exit when `cond` is true
    fn deopt_if(&mut self, cond: ir::Value) {
        let cont = self.builder.create_block();
        self.builder.ins().brif(cond, self.deopt, &[], cont, &[]);
        self.builder.switch_to_block(cont);
    }

    fn jump_target(&self, offset: usize) -> JitResult<usize> {
        self.code
            .chunk
            .jump_target(offset)
            .ok_or_else(|| JitError::Internal(format!("bad jump at {offset}")))
    }

    // ===== Conversions =====

    fn unpack(&mut self, ty: Ty, data: ir::Value) -> ir::Value {
        if ty == Ty::Float {
            self.builder.ins().bitcast(CraneliftTypes::FLOAT, MemFlags::new(), data)
        } else {
            data
        }
    }

    /// Tag and data words of a typed value
    fn pack(&mut self, value: Typed) -> (ir::Value, ir::Value) {
        let tag = self.builder.ins().iconst(CraneliftTypes::TAG, value.ty.tag() as i64);
        let data = if value.ty == Ty::Float {
            self.builder.ins().bitcast(CraneliftTypes::DATA, MemFlags::new(), value.val)
        } else {
            value.val
        };
        (tag, data)
    }

    fn to_float(&mut self, value: Typed) -> ir::Value {
        if value.ty == Ty::Float {
            value.val
        } else {
            self.builder.ins().fcvt_from_sint(CraneliftTypes::FLOAT, value.val)
        }
    }

    /// Python truthiness as an `i8` flag
    fn truthy(&mut self, value: Typed) -> ir::Value {
        match value.ty {
            Ty::Int | Ty::Bool => self.builder.ins().icmp_imm(IntCC::NotEqual, value.val, 0),
            Ty::Float => {
                let zero = self.builder.ins().f64const(0.0);
                self.builder.ins().fcmp(FloatCC::NotEqual, value.val, zero)
            }
            Ty::None => self.builder.ins().iconst(types::I8, 0),
        }
    }

    fn bool_result(&mut self, flag: ir::Value) -> Typed {
        Typed {
            ty: Ty::Bool,
            val: self.builder.ins().uextend(CraneliftTypes::INT, flag),
        }
    }

    // ===== Instructions =====

    fn operand_u16(&self, offset: usize) -> JitResult<u16> {
        self.code
            .chunk
            .read_u16(offset + 1)
            .ok_or_else(|| JitError::Internal(format!("truncated operand at {offset}")))
    }

    fn lower(&mut self, offset: usize, locals: &[Slot]) -> JitResult<()> {
        let byte = self
            .code
            .chunk
            .read_byte(offset)
            .ok_or_else(|| JitError::Internal(format!("no instruction at {offset}")))?;
        let op = OpCode::try_from(byte)
            .map_err(|b| JitError::UnsupportedInstruction(format!("unknown opcode {b}")))?;
        let next = offset + op.size();

        match op {
            OpCode::LoadConst => {
                let index = self.operand_u16(offset)?;
                let value = self
                    .code
                    .chunk
                    .get_constant(index)
                    .and_then(PackedValue::from_value)
                    .ok_or_else(|| JitError::Internal(format!("bad constant {index}")))?;
                let ty = Ty::from_tag(value.tag).ok_or_else(|| JitError::Internal("constant tag".to_string()))?;
                let val = match ty {
                    Ty::Float => self.builder.ins().f64const(f64::from_bits(value.data)),
                    _ => self.builder.ins().iconst(CraneliftTypes::INT, value.data as i64),
                };
                self.push(Typed { ty, val });
            }
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let value = self.peek_value()?;
                self.push(value);
            }
            OpCode::RotTwo => {
                let a = self.pop_value()?;
                let b = self.pop_value()?;
                self.push(a);
                self.push(b);
            }
            OpCode::RotThree => {
                let a = self.pop_value()?;
                let b = self.pop_value()?;
                let c = self.pop_value()?;
                self.push(a);
                self.push(c);
                self.push(b);
            }
            OpCode::LoadFast => {
                let slot = self.operand_u16(offset)? as usize;
                let Some(Slot::Bound(ty)) = locals.get(slot).copied() else {
                    return Err(JitError::Internal(format!("read of unbound local {slot}")));
                };
                let var = self.var(Home::Local(slot), ty);
                let val = self.builder.use_var(var);
                self.push(Typed { ty, val });
            }
            OpCode::StoreFast => {
                let slot = self.operand_u16(offset)? as usize;
                let value = self.pop_value()?;
                self.store_local(slot, value);
            }
            OpCode::LoadGlobal => {
                let index = self.operand_u16(offset)?;
                self.stack.push(Abs::Callee(index));
            }
            _ if op.as_binop().is_some() => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                let result = self.binary(op, a, b)?;
                self.push(result);
            }
            OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                let result = self.compare(op, a, b)?;
                self.push(result);
            }
            OpCode::Neg => {
                let a = self.pop_value()?;
                let result = if a.ty == Ty::Float {
                    Typed {
                        ty: Ty::Float,
                        val: self.builder.ins().fneg(a.val),
                    }
                } else {
                    let overflow = self.builder.ins().icmp_imm(IntCC::Equal, a.val, i64::MIN);
                    self.deopt_if(overflow);
                    Typed {
                        ty: Ty::Int,
                        val: self.builder.ins().ineg(a.val),
                    }
                };
                self.push(result);
            }
            OpCode::Pos => {
                let a = self.pop_value()?;
                let ty = if a.ty == Ty::Float { Ty::Float } else { Ty::Int };
                self.push(Typed { ty, val: a.val });
            }
            OpCode::Invert => {
                let a = self.pop_value()?;
                let val = self.builder.ins().bnot(a.val);
                self.push(Typed { ty: Ty::Int, val });
            }
            OpCode::Not => {
                let a = self.pop_value()?;
                let truth = self.truthy(a);
                let flag = self.builder.ins().bxor_imm(truth, 1);
                let result = self.bool_result(flag);
                self.push(result);
            }
            OpCode::Jump | OpCode::JumpBackward => {
                let target = self.jump_target(offset)?;
                let block = self.block_for(target);
                self.builder.ins().jump(block, &[]);
                self.block_terminated = true;
            }
            OpCode::PopJumpIfFalse | OpCode::PopJumpIfTrue => {
                let target = self.jump_target(offset)?;
                let cond = self.pop_value()?;
                let truth = self.truthy(cond);
                self.branch(op == OpCode::PopJumpIfTrue, truth, target, next);
            }
            OpCode::JumpIfFalseOrPop | OpCode::JumpIfTrueOrPop => {
                let target = self.jump_target(offset)?;
                let cond = self.peek_value()?;
                let truth = self.truthy(cond);
                self.branch(op == OpCode::JumpIfTrueOrPop, truth, target, next);
            }
            OpCode::Return => {
                let value = self.pop_value()?;
                let (tag, data) = self.pack(value);
                self.builder.ins().return_(&[tag, data]);
                self.block_terminated = true;
            }
            OpCode::Call => self.call(offset)?,
            _ => return Err(JitError::UnsupportedInstruction(op.to_string())),
        }
        Ok(())
    }

    /// Go to `target` when `truth` equals `when`, else to `next`
    fn branch(&mut self, when: bool, truth: ir::Value, target: usize, next: usize) {
        let target = self.block_for(target);
        let next = self.block_for(next);
        if when {
            self.builder.ins().brif(truth, target, &[], next, &[]);
        } else {
            self.builder.ins().brif(truth, next, &[], target, &[]);
        }
        self.block_terminated = true;
    }

    fn binary(&mut self, op: OpCode, a: Typed, b: Typed) -> JitResult<Typed> {
        let ty = binary_result(op, a.ty, b.ty)
            .ok_or_else(|| JitError::UnsupportedInstruction(format!("{op} on {} and {}", a.ty, b.ty)))?;
        if ty == Ty::Float {
            let x = self.to_float(a);
            let y = self.to_float(b);
            let val = match op {
                OpCode::Add => self.ins().fadd(x, y),
                OpCode::Sub => self.ins().fsub(x, y),
                OpCode::Mul => self.ins().fmul(x, y),
                OpCode::Div => {
                    let zero = self.ins().f64const(0.0);
                    let by_zero = self.ins().fcmp(FloatCC::Equal, y, zero);
                    self.deopt_if(by_zero);
                    self.ins().fdiv(x, y)
                }
                _ => return Err(JitError::Internal(format!("float {op}"))),
            };
            return Ok(Typed { ty, val });
        }

        let (x, y) = (a.val, b.val);
        let val = match op {
            OpCode::Add => {
                let sum = self.ins().iadd(x, y);
                let xs = self.ins().bxor(x, sum);
                let ys = self.ins().bxor(y, sum);
                let both = self.ins().band(xs, ys);
                let overflow = self.ins().icmp_imm(IntCC::SignedLessThan, both, 0);
                self.deopt_if(overflow);
                sum
            }
            OpCode::Sub => {
                let diff = self.ins().isub(x, y);
                let xy = self.ins().bxor(x, y);
                let xd = self.ins().bxor(x, diff);
                let both = self.ins().band(xy, xd);
                let overflow = self.ins().icmp_imm(IntCC::SignedLessThan, both, 0);
                self.deopt_if(overflow);
                diff
            }
            OpCode::Mul => {
                let low = self.ins().imul(x, y);
                let high = self.ins().smulhi(x, y);
                let sign = self.ins().sshr_imm(low, 63);
                let overflow = self.ins().icmp(IntCC::NotEqual, high, sign);
                self.deopt_if(overflow);
                low
            }
            OpCode::FloorDiv | OpCode::Mod => {
                let by_zero = self.ins().icmp_imm(IntCC::Equal, y, 0);
                self.deopt_if(by_zero);
                let x_min = self.ins().icmp_imm(IntCC::Equal, x, i64::MIN);
                let y_neg_one = self.ins().icmp_imm(IntCC::Equal, y, -1);
                let overflow = self.ins().band(x_min, y_neg_one);
                self.deopt_if(overflow);

                let quotient = self.ins().sdiv(x, y);
                let remainder = self.ins().srem(x, y);
                // round towards negative infinity when the signs differ
                let inexact = self.ins().icmp_imm(IntCC::NotEqual, remainder, 0);
                let signs = self.ins().bxor(remainder, y);
                let differ = self.ins().icmp_imm(IntCC::SignedLessThan, signs, 0);
                let adjust = self.ins().band(inexact, differ);
                if op == OpCode::FloorDiv {
                    let adjust = self.ins().uextend(CraneliftTypes::INT, adjust);
                    self.ins().isub(quotient, adjust)
                } else {
                    let shifted = self.ins().iadd(remainder, y);
                    self.ins().select(adjust, shifted, remainder)
                }
            }
            OpCode::LShift | OpCode::RShift => {
                // negative counts are huge unsigned
                let out_of_range = self.ins().icmp_imm(IntCC::UnsignedGreaterThanOrEqual, y, 64);
                self.deopt_if(out_of_range);
                if op == OpCode::LShift {
                    let shifted = self.ins().ishl(x, y);
                    let back = self.ins().sshr(shifted, y);
                    let lost = self.ins().icmp(IntCC::NotEqual, back, x);
                    self.deopt_if(lost);
                    shifted
                } else {
                    self.ins().sshr(x, y)
                }
            }
            OpCode::BitAnd => self.ins().band(x, y),
            OpCode::BitOr => self.ins().bor(x, y),
            OpCode::BitXor => self.ins().bxor(x, y),
            _ => return Err(JitError::UnsupportedInstruction(op.to_string())),
        };
        Ok(Typed { ty, val })
    }

    fn compare(&mut self, op: OpCode, a: Typed, b: Typed) -> JitResult<Typed> {
        if !a.ty.is_numeric() || !b.ty.is_numeric() {
            return Err(JitError::UnsupportedInstruction(format!("{op} on {} and {}", a.ty, b.ty)));
        }
        let flag = if a.ty == Ty::Float || b.ty == Ty::Float {
            let cc = match op {
                OpCode::Eq => FloatCC::Equal,
                OpCode::Ne => FloatCC::NotEqual,
                OpCode::Lt => FloatCC::LessThan,
                OpCode::Le => FloatCC::LessThanOrEqual,
                OpCode::Gt => FloatCC::GreaterThan,
                _ => FloatCC::GreaterThanOrEqual,
            };
            let x = self.to_float(a);
            let y = self.to_float(b);
            self.builder.ins().fcmp(cc, x, y)
        } else {
            let cc = match op {
                OpCode::Eq => IntCC::Equal,
                OpCode::Ne => IntCC::NotEqual,
                OpCode::Lt => IntCC::SignedLessThan,
                OpCode::Le => IntCC::SignedLessThanOrEqual,
                OpCode::Gt => IntCC::SignedGreaterThan,
                _ => IntCC::SignedGreaterThanOrEqual,
            };
            self.builder.ins().icmp(cc, a.val, b.val)
        };
        Ok(self.bool_result(flag))
    }

    /// A resolved call: spill the arguments and go through the call helper
    fn call(&mut self, offset: usize) -> JitResult<()> {
        let result = self
            .analysis
            .calls
            .get(&offset)
            .map(|resolved| resolved.result)
            .ok_or_else(|| JitError::Internal(format!("unresolved call at {offset}")))?;
        let site = *self
            .sites
            .get(&offset)
            .ok_or_else(|| JitError::Internal(format!("no call site at {offset}")))?;
        let ctx_ptr = self
            .ctx_ptr
            .ok_or_else(|| JitError::Internal("context pointer".to_string()))?;

        let argc = self
            .code
            .chunk
            .read_byte(offset + 1)
            .ok_or_else(|| JitError::Internal(format!("truncated operand at {offset}")))?;
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop_value()?);
        }
        args.reverse();
        if self.pop()?.is_some() {
            return Err(JitError::Internal(format!("call at {offset} without a callee")));
        }

        let size = PackedValue::SIZE * u32::from(argc.max(1));
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3));
        for (i, arg) in args.into_iter().enumerate() {
            let base = i as i32 * PackedValue::SIZE as i32;
            let (tag, data) = self.pack(arg);
            self.builder.ins().stack_store(tag, slot, base);
            self.builder.ins().stack_store(data, slot, base + PackedValue::DATA_OFFSET);
        }
        let args_ptr = self.builder.ins().stack_addr(CraneliftTypes::POINTER, slot, 0);
        let site_ptr = self.builder.ins().iconst(CraneliftTypes::POINTER, site as i64);
        let argc = self.builder.ins().iconst(types::I32, i64::from(argc));

        let call = self
            .builder
            .ins()
            .call(self.call_helper, &[ctx_ptr, site_ptr, args_ptr, argc]);
        let [tag, data] = self.builder.inst_results(call)[..] else {
            return Err(JitError::Internal("call helper results".to_string()));
        };
        // a deopt tag never equals a value tag
        let unexpected = self.builder.ins().icmp_imm(IntCC::NotEqual, tag, result.tag() as i64);
        self.deopt_if(unexpected);
        let val = self.unpack(result, data);
        self.push(Typed { ty: result, val });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::bytecode::Value;
    use crate::jit::analysis::{CallResolver, ResolvedCall};
    use crate::jit::cache::CodeCache;
    use crate::jit::runtime::{invoke, JitContext};

    struct NoCalls;

    impl CallResolver for NoCalls {
        fn resolve(&self, _name: &Rc<str>, _args: &[Ty]) -> Option<ResolvedCall> {
            None
        }
    }

    /// Compile the first function in `source` for `args` and run it
    fn run(source: &str, args: &[Value]) -> Option<Value> {
        let module = crate::compile_source(source, "<test>").expect("compiles");
        let code = module.children().next().cloned().expect("defines a function");
        let tys: Vec<Ty> = args.iter().map(|a| Ty::of(a).unwrap()).collect();
        let signature = TypeSignature::call(&tys);
        let analysis = Analysis::run(&code, &signature, None, &NoCalls).expect("analysis");

        let mut compiler = JitCompiler::new().expect("host supported");
        let entry = compiler
            .compile(&code, &signature, &analysis, &HashMap::new())
            .expect("compiles");
        let packed: Vec<PackedValue> = args.iter().map(|a| PackedValue::from_value(a).unwrap()).collect();
        let cache = CodeCache::new();
        let mut ctx = JitContext::new(&cache, 100);
        invoke(entry, &mut ctx, &packed).to_value()
    }

    #[test]
    fn jit_compile_arithmetic() {
        let result = run("def f(a, b):\n    return a * b + 1\n", &[Value::Int(6), Value::Int(7)]);
        assert_eq!(result, Some(Value::Int(43)));
    }

    #[test]
    fn jit_compile_loop() {
        let source = "def f(n):\n    total = 0\n    i = 1\n    while i <= n:\n        total = total + i\n        i = i + 1\n    return total\n";
        assert_eq!(run(source, &[Value::Int(1000)]), Some(Value::Int(500_500)));
    }

    #[test]
    fn jit_compile_conditionals() {
        let source = "def f(x):\n    if x > 5 and not x == 7:\n        return 100\n    return 200\n";
        assert_eq!(run(source, &[Value::Int(10)]), Some(Value::Int(100)));
        assert_eq!(run(source, &[Value::Int(7)]), Some(Value::Int(200)));
        assert_eq!(run(source, &[Value::Int(1)]), Some(Value::Int(200)));
    }

    #[test]
    fn floor_division_rounds_down() {
        let source = "def f(a, b):\n    return a // b * 1000 + a % b\n";
        assert_eq!(run(source, &[Value::Int(-7), Value::Int(2)]), Some(Value::Int(-4 * 1000 + 1)));
        assert_eq!(run(source, &[Value::Int(7), Value::Int(-2)]), Some(Value::Int(-4 * 1000 - 1)));
    }

    #[test]
    fn mixed_arithmetic_produces_floats() {
        let result = run("def f(a, b):\n    return a / b + 0.5\n", &[Value::Int(7), Value::Int(2)]);
        assert_eq!(result, Some(Value::Float(4.0)));
        let result = run("def f(a, b):\n    return a < b\n", &[Value::Int(1), Value::Float(1.5)]);
        assert_eq!(result, Some(Value::Bool(true)));
    }

    #[test]
    fn errors_deoptimize() {
        let overflow = "def f(a):\n    return a + 1\n";
        assert_eq!(run(overflow, &[Value::Int(i64::MAX)]), None);
        let zero = "def f(a, b):\n    return a // b\n";
        assert_eq!(run(zero, &[Value::Int(1), Value::Int(0)]), None);
        let shift = "def f(a, b):\n    return a << b\n";
        assert_eq!(run(shift, &[Value::Int(1), Value::Int(-1)]), None);
        assert_eq!(run(shift, &[Value::Int(3), Value::Int(4)]), Some(Value::Int(48)));
    }
}
