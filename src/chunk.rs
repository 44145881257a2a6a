// Chunk: code, constants, line info - owned by one Function object.
//
// Line encoding is run-length: each record is `{line, run_length}`. On
// append, if the incoming line matches the last record's line the run count
// is bumped; otherwise a new record starts. `get_line` walks records
// subtracting run lengths until the offset falls inside the current run.
// This is O(number of distinct lines), not O(code length).

use crate::opcode::OpCode;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
struct LineRun {
    line: u32,
    run_length: u32,
}

#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    lines: Vec<LineRun>,
}

/// Constants beyond this index need the 24-bit `OP_CONSTANT_LONG` form.
pub const MAX_SHORT_CONSTANTS: usize = 256;
/// Constant pools cannot exceed a 24-bit index space.
pub const MAX_CONSTANTS: usize = 1 << 24;

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_byte(&mut self, byte: u8, line: u32) {
        match self.lines.last_mut() {
            Some(run) if run.line == line => run.run_length += 1,
            _ => self.lines.push(LineRun { line, run_length: 1 }),
        }
        self.code.push(byte);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op.as_byte(), line);
    }

    /// Appends a value to the constant pool, returning its index. Callers
    /// that need it reachable by `OP_CONSTANT` must keep the index below
    /// `MAX_SHORT_CONSTANTS`; `add_constant_checked` does that check and
    /// reports a compile error on overflow of `MAX_CONSTANTS`.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Emits a constant load, selecting `OP_CONSTANT` (8-bit index) or
    /// `OP_CONSTANT_LONG` (24-bit little-endian index) automatically.
    pub fn write_constant(&mut self, value: Value, line: u32) -> Result<(), String> {
        let idx = self.add_constant(value);
        if idx >= MAX_CONSTANTS {
            return Err("Too many constants in one chunk.".to_string());
        }
        if idx < MAX_SHORT_CONSTANTS {
            self.write_op(OpCode::Constant, line);
            self.write_byte(idx as u8, line);
        } else {
            self.write_op(OpCode::ConstantLong, line);
            let bytes = (idx as u32).to_le_bytes();
            self.write_byte(bytes[0], line);
            self.write_byte(bytes[1], line);
            self.write_byte(bytes[2], line);
        }
        Ok(())
    }

    pub fn get_line(&self, offset: usize) -> u32 {
        let mut remaining = offset;
        for run in &self.lines {
            if remaining < run.run_length as usize {
                return run.line;
            }
            remaining -= run.run_length as usize;
        }
        self.lines.last().map(|r| r.line).unwrap_or(0)
    }

    pub fn read_u24_le(&self, offset: usize) -> u32 {
        u32::from(self.code[offset])
            | (u32::from(self.code[offset + 1]) << 8)
            | (u32::from(self.code[offset + 2]) << 16)
    }

    /// Emits a two-byte placeholder jump operand, returning its offset so
    /// the caller can patch it once the jump target is known.
    pub fn emit_jump_placeholder(&mut self, line: u32) -> usize {
        self.write_byte(0xff, line);
        self.write_byte(0xff, line);
        self.code.len() - 2
    }

    /// Backpatches a two-byte big-endian jump operand at `offset` so that it
    /// encodes the distance from just after the operand to the current end
    /// of the chunk.
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), String> {
        let jump = self.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err("Too much code to jump over.".to_string());
        }
        let bytes = (jump as u16).to_be_bytes();
        self.code[offset] = bytes[0];
        self.code[offset + 1] = bytes[1];
        Ok(())
    }
}
