//! Bytecode disassembler for `--dump-bytecode` and debugging

use std::fmt;

use super::code::CodeObject;
use super::opcode::OpCode;
use super::value::Value;

/// Display adapter listing a code object and, recursively, every code
/// object in its constant pool
pub struct Disassembly<'a>(pub &'a CodeObject);

/// Disassemble a code object and its children to a string
#[must_use]
pub fn disassemble(code: &CodeObject) -> String {
    Disassembly(code).to_string()
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        writeln!(
            f,
            "== {} {} ({}:{}) ==",
            code.kind.as_str(),
            code.name,
            code.filename,
            code.first_line
        )?;
        if !code.varnames.is_empty() {
            writeln!(f, "  locals: {}", code.varnames.join(", "))?;
        }
        if !code.cellvars.is_empty() {
            writeln!(f, "  cells: {}", code.cellvars.join(", "))?;
        }
        if !code.freevars.is_empty() {
            writeln!(f, "  free: {}", code.freevars.join(", "))?;
        }

        let mut offset = 0;
        while offset < code.chunk.len() {
            offset = instruction(f, code, offset)?;
        }

        if !code.exception_table.is_empty() {
            writeln!(f, "  exception table:")?;
            for entry in &code.exception_table {
                writeln!(
                    f,
                    "    {:04}..{:04} -> {:04} depth {} {:?}",
                    entry.start, entry.end, entry.handler, entry.depth, entry.kind
                )?;
            }
        }

        for child in code.children() {
            writeln!(f)?;
            write!(f, "{}", Disassembly(child))?;
        }
        Ok(())
    }
}

/// Write one instruction and return the offset of the next
fn instruction(f: &mut fmt::Formatter<'_>, code: &CodeObject, offset: usize) -> Result<usize, fmt::Error> {
    let chunk = &code.chunk;
    write!(f, "{offset:04} ")?;
    let line = chunk.get_line(offset);
    if offset > 0 && line == chunk.get_line(offset - 1) {
        write!(f, "   | ")?;
    } else {
        write!(f, "{line:4} ")?;
    }

    let Some(byte) = chunk.read_byte(offset) else {
        writeln!(f, "<end>")?;
        return Ok(offset + 1);
    };
    let Ok(op) = OpCode::try_from(byte) else {
        writeln!(f, "unknown opcode {byte}")?;
        return Ok(offset + 1);
    };

    match op.size() {
        1 => writeln!(f, "{}", op.name())?,
        2 => {
            let operand = chunk.read_byte(offset + 1).unwrap_or(0);
            writeln!(f, "{:20} {operand}", op.name())?;
        }
        _ => {
            let operand = chunk.read_u16(offset + 1).unwrap_or(0);
            write!(f, "{:20} {operand:5}", op.name())?;
            match op {
                OpCode::LoadConst => {
                    let constant = chunk.get_constant(operand);
                    writeln!(f, " ({})", constant.map_or_else(|| "?".to_string(), format_constant))?;
                }
                OpCode::LoadFast | OpCode::StoreFast | OpCode::DeleteFast => {
                    let name = code.varnames.get(operand as usize).map_or("?", String::as_str);
                    writeln!(f, " ({name})")?;
                }
                OpCode::LoadDeref | OpCode::StoreDeref | OpCode::DeleteDeref => {
                    let index = operand as usize;
                    let name = code
                        .cellvars
                        .get(index)
                        .or_else(|| code.freevars.get(index - code.cellvars.len().min(index)))
                        .map_or("?", String::as_str);
                    writeln!(f, " ({name})")?;
                }
                OpCode::UnpackEx => {
                    writeln!(f, " ({} before, {} after)", operand & 0xFF, operand >> 8)?;
                }
                _ if op.uses_name() => {
                    let name = code.name_at(operand).map_or("?", |n| &**n);
                    writeln!(f, " ({name})")?;
                }
                _ if op.is_forward_jump() || op == OpCode::JumpBackward => {
                    match chunk.jump_target(offset) {
                        Some(target) => writeln!(f, " (to {target})")?,
                        None => writeln!(f)?,
                    }
                }
                _ => writeln!(f)?,
            }
        }
    }
    Ok(offset + op.size())
}

fn format_constant(value: &Value) -> String {
    match value {
        Value::Code(code) => format!("<code {} {}>", code.name, code.id),
        other => other.repr(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_source;

    #[test]
    fn lists_nested_code_objects() {
        let code = compile_source("def f(x):\n    return x + 1\nprint(f(1))\n", "t.pa").unwrap();
        let text = disassemble(&code);
        assert!(text.contains("== module <module> (t.pa:1) =="));
        assert!(text.contains("== function f (t.pa:1) =="));
        assert!(text.contains("LOAD_FAST"));
        assert!(text.contains("(x)"));
        assert!(text.contains("LOAD_BUILTIN"));
        assert!(text.contains("(print)"));
    }

    #[test]
    fn jumps_show_their_targets() {
        let code = compile_source("while x:\n    x = x - 1\n", "t.pa").unwrap();
        let text = disassemble(&code);
        assert!(text.contains("JUMP_BACKWARD"));
        assert!(text.contains("(to 0)"));
    }
}
