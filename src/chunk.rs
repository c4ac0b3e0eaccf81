use crate::value::Value;

const OP_CONSTANT: u8 = 1;
const OP_NIL: u8 = 2;
const OP_TRUE: u8 = 3;
const OP_FALSE: u8 = 4;
const OP_POP: u8 = 5;
const OP_DEFINE_GLOBAL: u8 = 6;
const OP_GET_GLOBAL: u8 = 7;
const OP_SET_GLOBAL: u8 = 8;
const OP_GET_LOCAL: u8 = 9;
const OP_SET_LOCAL: u8 = 10;
const OP_EQUAL: u8 = 11;
const OP_GREATER: u8 = 12;
const OP_LESS: u8 = 13;
const OP_ADD: u8 = 14;
const OP_SUBTRACT: u8 = 15;
const OP_MULTIPLY: u8 = 16;
const OP_DIVIDE: u8 = 17;
const OP_NEGATE: u8 = 18;
const OP_NOT: u8 = 19;
const OP_PRINT: u8 = 20;
const OP_JUMP: u8 = 21;
const OP_JUMP_IF_FALSE: u8 = 22;
const OP_LOOP: u8 = 23;
const OP_CALL: u8 = 24;
const OP_CLOSURE: u8 = 25;
const OP_RETURN: u8 = 26;

const OP_INVALID: u8 = u8::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    OpConstant(u8),
    OpNil,
    OpTrue,
    OpFalse,
    OpPop,
    OpDefineGlobal(u8),
    OpGetGlobal(u8),
    OpSetGlobal(u8),
    OpGetLocal(u8),
    OpSetLocal(u8),
    OpEqual,
    OpGreater,
    OpLess,
    OpAdd,
    OpSubtract,
    OpMultiply,
    OpDivide,
    OpNegate,
    OpNot,
    OpPrint,
    OpJump(u16),
    OpJumpIfFalse(u16),
    OpLoop(u16),
    OpCall(u8),
    OpClosure(u8),
    OpReturn,
    OpInvalid,
}

// Jump operands are encoded big-endian into two bytes.
impl From<Instruction> for Vec<u8> {
    fn from(instr: Instruction) -> Self {
        match instr {
            Instruction::OpConstant(index) => vec![OP_CONSTANT, index],
            Instruction::OpNil => vec![OP_NIL],
            Instruction::OpTrue => vec![OP_TRUE],
            Instruction::OpFalse => vec![OP_FALSE],
            Instruction::OpPop => vec![OP_POP],
            Instruction::OpDefineGlobal(index) => vec![OP_DEFINE_GLOBAL, index],
            Instruction::OpGetGlobal(index) => vec![OP_GET_GLOBAL, index],
            Instruction::OpSetGlobal(index) => vec![OP_SET_GLOBAL, index],
            Instruction::OpGetLocal(slot) => vec![OP_GET_LOCAL, slot],
            Instruction::OpSetLocal(slot) => vec![OP_SET_LOCAL, slot],
            Instruction::OpEqual => vec![OP_EQUAL],
            Instruction::OpGreater => vec![OP_GREATER],
            Instruction::OpLess => vec![OP_LESS],
            Instruction::OpAdd => vec![OP_ADD],
            Instruction::OpSubtract => vec![OP_SUBTRACT],
            Instruction::OpMultiply => vec![OP_MULTIPLY],
            Instruction::OpDivide => vec![OP_DIVIDE],
            Instruction::OpNegate => vec![OP_NEGATE],
            Instruction::OpNot => vec![OP_NOT],
            Instruction::OpPrint => vec![OP_PRINT],
            Instruction::OpJump(offset) => {
                let [hi, lo] = offset.to_be_bytes();
                vec![OP_JUMP, hi, lo]
            }
            Instruction::OpJumpIfFalse(offset) => {
                let [hi, lo] = offset.to_be_bytes();
                vec![OP_JUMP_IF_FALSE, hi, lo]
            }
            Instruction::OpLoop(offset) => {
                let [hi, lo] = offset.to_be_bytes();
                vec![OP_LOOP, hi, lo]
            }
            Instruction::OpCall(arg_count) => vec![OP_CALL, arg_count],
            Instruction::OpClosure(index) => vec![OP_CLOSURE, index],
            Instruction::OpReturn => vec![OP_RETURN],
            Instruction::OpInvalid => vec![OP_INVALID],
        }
    }
}

/// Append-only bytecode buffer. `lines` runs parallel to `code`, one entry
/// per byte, and is read only for diagnostics.
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk {
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Appends the encoded instruction and returns the offset of its opcode
    /// byte.
    pub fn push_instruction(&mut self, instr: Instruction, line: u32) -> usize {
        let index = self.code.len();
        let bytes: Vec<u8> = instr.into();
        for byte in bytes {
            self.code.push(byte);
            self.lines.push(line);
        }
        index
    }

    /// Appends a constant and returns its pool index, unchecked. The caller
    /// enforces the one-byte bound.
    pub fn push_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Overwrites the two operand bytes of the jump instruction starting at
    /// `instr_index` with `jump`, big-endian.
    pub fn patch_jump_offset(&mut self, instr_index: usize, jump: u16) {
        let [hi, lo] = jump.to_be_bytes();
        self.code[instr_index + 1] = hi;
        self.code[instr_index + 2] = lo;
    }

    /// Decodes the instruction at `offset`, returning its total encoded size.
    /// Unknown or truncated encodings decode as `OpInvalid` with size 1, so a
    /// decode loop always makes progress.
    pub fn read_instruction(&self, offset: usize) -> (u8, Instruction) {
        let opcode = match self.code.get(offset) {
            Some(byte) => *byte,
            None => return (1, Instruction::OpInvalid),
        };

        match opcode {
            OP_CONSTANT => self.read_byte_operand(offset, Instruction::OpConstant),
            OP_NIL => (1, Instruction::OpNil),
            OP_TRUE => (1, Instruction::OpTrue),
            OP_FALSE => (1, Instruction::OpFalse),
            OP_POP => (1, Instruction::OpPop),
            OP_DEFINE_GLOBAL => self.read_byte_operand(offset, Instruction::OpDefineGlobal),
            OP_GET_GLOBAL => self.read_byte_operand(offset, Instruction::OpGetGlobal),
            OP_SET_GLOBAL => self.read_byte_operand(offset, Instruction::OpSetGlobal),
            OP_GET_LOCAL => self.read_byte_operand(offset, Instruction::OpGetLocal),
            OP_SET_LOCAL => self.read_byte_operand(offset, Instruction::OpSetLocal),
            OP_EQUAL => (1, Instruction::OpEqual),
            OP_GREATER => (1, Instruction::OpGreater),
            OP_LESS => (1, Instruction::OpLess),
            OP_ADD => (1, Instruction::OpAdd),
            OP_SUBTRACT => (1, Instruction::OpSubtract),
            OP_MULTIPLY => (1, Instruction::OpMultiply),
            OP_DIVIDE => (1, Instruction::OpDivide),
            OP_NEGATE => (1, Instruction::OpNegate),
            OP_NOT => (1, Instruction::OpNot),
            OP_PRINT => (1, Instruction::OpPrint),
            OP_JUMP => self.read_short_operand(offset, Instruction::OpJump),
            OP_JUMP_IF_FALSE => self.read_short_operand(offset, Instruction::OpJumpIfFalse),
            OP_LOOP => self.read_short_operand(offset, Instruction::OpLoop),
            OP_CALL => self.read_byte_operand(offset, Instruction::OpCall),
            OP_CLOSURE => self.read_byte_operand(offset, Instruction::OpClosure),
            OP_RETURN => (1, Instruction::OpReturn),
            _ => (1, Instruction::OpInvalid),
        }
    }

    fn read_byte_operand(&self, offset: usize, build: fn(u8) -> Instruction) -> (u8, Instruction) {
        match self.code.get(offset + 1) {
            Some(operand) => (2, build(*operand)),
            None => (1, Instruction::OpInvalid),
        }
    }

    fn read_short_operand(&self, offset: usize, build: fn(u16) -> Instruction) -> (u8, Instruction) {
        match (self.code.get(offset + 1), self.code.get(offset + 2)) {
            (Some(hi), Some(lo)) => (3, build(u16::from_be_bytes([*hi, *lo]))),
            _ => (1, Instruction::OpInvalid),
        }
    }

    pub fn get_constant(&self, index: u8) -> &Value {
        &self.constants[index as usize]
    }

    pub fn get_constant_checked(&self, index: u8) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    #[cfg(test)]
    pub fn constants_count(&self) -> usize {
        self.constants.len()
    }

    pub fn get_line(&self, offset: usize) -> u32 {
        self.lines[offset]
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn iter(&self) -> InstructionIter {
        InstructionIter {
            chunk: self,
            offset: 0,
        }
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the code buffer, yielding each instruction with its byte offset.
pub struct InstructionIter<'a> {
    chunk: &'a Chunk,
    offset: usize,
}

impl<'a> Iterator for InstructionIter<'a> {
    type Item = (usize, Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.chunk.code_len() {
            return None;
        }
        let at = self.offset;
        let (size, instr) = self.chunk.read_instruction(at);
        self.offset += size as usize;
        Some((at, instr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lines_run_parallel_to_code() {
        let mut chunk = Chunk::new();
        chunk.push_instruction(Instruction::OpConstant(0), 1);
        chunk.push_instruction(Instruction::OpJump(7), 2);
        chunk.push_instruction(Instruction::OpReturn, 3);
        assert_eq!(chunk.code_len(), 6);
        assert_eq!(chunk.lines.len(), chunk.code_len());
        // every byte of an instruction carries the emitting token's line
        assert_eq!(chunk.get_line(0), 1);
        assert_eq!(chunk.get_line(1), 1);
        assert_eq!(chunk.get_line(2), 2);
        assert_eq!(chunk.get_line(4), 2);
        assert_eq!(chunk.get_line(5), 3);
    }

    #[test]
    fn encode_decode_round_trip() {
        let instructions = [
            Instruction::OpConstant(4),
            Instruction::OpNil,
            Instruction::OpDefineGlobal(0),
            Instruction::OpGetLocal(3),
            Instruction::OpSetLocal(3),
            Instruction::OpAdd,
            Instruction::OpJumpIfFalse(0x0102),
            Instruction::OpPop,
            Instruction::OpLoop(9),
            Instruction::OpCall(2),
            Instruction::OpClosure(1),
            Instruction::OpReturn,
        ];

        let mut chunk = Chunk::new();
        for instr in instructions {
            chunk.push_instruction(instr, 1);
        }

        let decoded: Vec<Instruction> = chunk.iter().map(|(_, instr)| instr).collect();
        assert_eq!(decoded, instructions);
    }

    #[test]
    fn jump_operands_are_big_endian() {
        let mut chunk = Chunk::new();
        chunk.push_instruction(Instruction::OpJump(0x1234), 1);
        assert_eq!(chunk.code[1], 0x12);
        assert_eq!(chunk.code[2], 0x34);
    }

    #[test]
    fn patch_rewrites_placeholder_bytes() {
        let mut chunk = Chunk::new();
        let jump_index = chunk.push_instruction(Instruction::OpJumpIfFalse(u16::MAX), 1);
        assert_eq!(chunk.code[1], 0xff);
        assert_eq!(chunk.code[2], 0xff);

        chunk.patch_jump_offset(jump_index, 0x0a0b);
        assert_eq!(chunk.code[1], 0x0a);
        assert_eq!(chunk.code[2], 0x0b);
        let (size, instr) = chunk.read_instruction(jump_index);
        assert_eq!(size, 3);
        assert_eq!(instr, Instruction::OpJumpIfFalse(0x0a0b));
    }

    #[test]
    fn truncated_instruction_decodes_invalid() {
        let mut chunk = Chunk::new();
        chunk.code.push(OP_JUMP);
        chunk.code.push(0x01);
        chunk.lines.extend([1, 1]);
        let (size, instr) = chunk.read_instruction(0);
        assert_eq!((size, instr), (1, Instruction::OpInvalid));
    }

    #[test]
    fn constant_pool_indexing() {
        let mut chunk = Chunk::new();
        let index = chunk.push_constant(Value::Number(1.5));
        assert_eq!(index, 0);
        assert_eq!(*chunk.get_constant(0), Value::Number(1.5));
        assert!(chunk.get_constant_checked(1).is_none());
    }

    proptest! {
        #[test]
        fn any_jump_operand_round_trips(jump in any::<u16>()) {
            let mut chunk = Chunk::new();
            let index = chunk.push_instruction(Instruction::OpLoop(u16::MAX), 1);
            chunk.patch_jump_offset(index, jump);
            let (size, instr) = chunk.read_instruction(index);
            prop_assert_eq!(size, 3);
            prop_assert_eq!(instr, Instruction::OpLoop(jump));
        }
    }
}
