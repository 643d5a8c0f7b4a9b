//! Bytecode chunk - instruction bytes, constant pool and line table

use super::opcode::OpCode;
use super::value::Value;

/// A chunk of bytecode
///
/// Holds the raw instructions, the constant pool, and a run-length encoded
/// line table mapping every byte back to its source line.
#[derive(Clone, Default)]
pub struct Chunk {
    code: Vec<u8>,

    constants: Vec<Value>,

    /// Run-length line table: `(line, count)` means `count` bytes on `line`
    lines: Vec<(u32, u32)>,
}

impl Chunk {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes in the chunk
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn get_constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    pub fn write_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.add_line(line, 1);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op as u8, line);
    }

    pub fn write_op_u8(&mut self, op: OpCode, operand: u8, line: u32) {
        self.write_byte(op as u8, line);
        self.write_byte(operand, line);
    }

    pub fn write_op_u16(&mut self, op: OpCode, operand: u16, line: u32) {
        self.write_byte(op as u8, line);
        self.write_u16(operand, line);
    }

    /// Write a u16 value (little-endian)
    pub fn write_u16(&mut self, value: u16, line: u32) {
        self.write_byte((value & 0xFF) as u8, line);
        self.write_byte((value >> 8) as u8, line);
    }

    #[must_use]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Read a u16 at a position (little-endian)
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let low = u16::from(*self.code.get(offset)?);
        let high = u16::from(*self.code.get(offset + 1)?);
        Some(low | (high << 8))
    }

    #[must_use]
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|u| u as i16)
    }

    fn patch_u16(&mut self, offset: usize, value: u16) {
        self.code[offset] = (value & 0xFF) as u8;
        self.code[offset + 1] = (value >> 8) as u8;
    }

    /// Add a constant to the pool and return its index
    ///
    /// Returns `None` if the constant pool is full (> 65535 constants).
    pub fn add_constant(&mut self, value: Value) -> Option<u16> {
        if let Some(i) = self.constants.iter().position(|c| values_identical(c, &value)) {
            return Some(i as u16);
        }
        let index = self.constants.len();
        if index > u16::MAX as usize {
            return None;
        }
        self.constants.push(value);
        Some(index as u16)
    }

    fn add_line(&mut self, line: u32, count: u32) {
        if let Some(last) = self.lines.last_mut() {
            if last.0 == line {
                last.1 += count;
                return;
            }
        }
        self.lines.push((line, count));
    }

    /// Source line of the instruction byte at `offset`
    #[must_use]
    pub fn get_line(&self, offset: usize) -> u32 {
        let mut current_offset = 0;
        for (line, count) in &self.lines {
            current_offset += *count as usize;
            if offset < current_offset {
                return *line;
            }
        }
        self.lines.last().map_or(0, |(line, _)| *line)
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a forward jump with a placeholder offset, returning the operand
    /// position to hand to [`Chunk::patch_jump`]
    pub fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op(op, line);
        let patch_offset = self.code.len();
        self.write_u16(0, line);
        patch_offset
    }

    /// Point a forward jump at the current position.
    ///
    /// Returns `None` if the distance does not fit in an `i16`.
    pub fn patch_jump(&mut self, patch_offset: usize) -> Option<()> {
        let distance = self.code.len() - patch_offset - 2;
        let distance = i16::try_from(distance).ok()?;
        self.patch_u16(patch_offset, distance as u16);
        Some(())
    }

    /// Emit a backward jump to `loop_start`.
    ///
    /// Returns `None` if the distance does not fit in a `u16`.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Option<()> {
        let distance = self.code.len() + OpCode::JumpBackward.size() - loop_start;
        let distance = u16::try_from(distance).ok()?;
        self.write_op_u16(OpCode::JumpBackward, distance, line);
        Some(())
    }

    /// Target of the jump instruction at `offset`
    #[must_use]
    pub fn jump_target(&self, offset: usize) -> Option<usize> {
        let op = OpCode::try_from(self.read_byte(offset)?).ok()?;
        let end = offset + op.size();
        if op == OpCode::JumpBackward {
            return end.checked_sub(self.read_u16(offset + 1)? as usize);
        }
        if op.is_forward_jump() {
            let delta = self.read_i16(offset + 1)?;
            return end.checked_add_signed(delta as isize);
        }
        None
    }
}

/// Constants are deduplicated only when they are indistinguishable at runtime
fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("code_len", &self.code.len())
            .field("constants_len", &self.constants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_deduplicate_by_identity() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Int(1)).unwrap();
        let b = chunk.add_constant(Value::Int(1)).unwrap();
        let c = chunk.add_constant(Value::Bool(true)).unwrap();
        let d = chunk.add_constant(Value::Float(1.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(chunk.constants().len(), 3);
    }

    #[test]
    fn line_table_is_run_length_encoded() {
        let mut chunk = Chunk::new();
        chunk.write_op_u16(OpCode::LoadConst, 0, 1);
        chunk.write_op(OpCode::Return, 2);

        assert_eq!(chunk.get_line(0), 1);
        assert_eq!(chunk.get_line(2), 1);
        assert_eq!(chunk.get_line(3), 2);
        assert_eq!(chunk.lines.len(), 2);
    }

    #[test]
    fn forward_jump_patching() {
        let mut chunk = Chunk::new();
        let patch = chunk.emit_jump(OpCode::PopJumpIfFalse, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.patch_jump(patch).unwrap();

        assert_eq!(chunk.read_i16(patch), Some(2));
        assert_eq!(chunk.jump_target(0), Some(5));
    }

    #[test]
    fn backward_jump_targets_loop_start() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Pop, 1);
        let start = chunk.current_offset();
        chunk.write_op(OpCode::Dup, 1);
        chunk.write_op(OpCode::Pop, 1);
        let at = chunk.current_offset();
        chunk.emit_loop(start, 1).unwrap();

        assert_eq!(chunk.read_u16(at + 1), Some(5));
        assert_eq!(chunk.jump_target(at), Some(start));
    }

    #[test]
    fn oversized_jump_is_rejected() {
        let mut chunk = Chunk::new();
        let patch = chunk.emit_jump(OpCode::Jump, 1);
        for _ in 0..40_000 {
            chunk.write_op(OpCode::Pop, 1);
        }
        assert!(chunk.patch_jump(patch).is_none());
    }
}
