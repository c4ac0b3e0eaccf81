use crate::chunk::{Chunk, Instruction};

/// Formats a chunk instruction by instruction, in the classic four-column
/// layout: byte offset, source line (`|` when unchanged), opcode, operands.
pub struct Disassembler<'a> {
    chunk: &'a Chunk,
    iter: crate::chunk::InstructionIter<'a>,
}

impl<'a> Disassembler<'a> {
    pub fn new(chunk: &'a Chunk) -> Self {
        Disassembler {
            iter: chunk.iter(),
            chunk,
        }
    }
}

impl<'a> Iterator for Disassembler<'a> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, instr) = self.iter.next()?;
        Some(render(self.chunk, offset, instr))
    }
}

fn render(chunk: &Chunk, offset: usize, instr: Instruction) -> String {
    let line = if offset > 0 && chunk.get_line(offset) == chunk.get_line(offset - 1) {
        format!("{:>4} ", "|")
    } else {
        format!("{:04} ", chunk.get_line(offset))
    };
    format!("{:04} {}{}", offset, line, render_operands(chunk, offset, instr))
}

fn render_operands(chunk: &Chunk, offset: usize, instr: Instruction) -> String {
    match instr {
        Instruction::OpConstant(index) => constant_instruction(chunk, "OP_CONSTANT", index),
        Instruction::OpDefineGlobal(index) => {
            constant_instruction(chunk, "OP_DEFINE_GLOBAL", index)
        }
        Instruction::OpGetGlobal(index) => constant_instruction(chunk, "OP_GET_GLOBAL", index),
        Instruction::OpSetGlobal(index) => constant_instruction(chunk, "OP_SET_GLOBAL", index),
        Instruction::OpClosure(index) => constant_instruction(chunk, "OP_CLOSURE", index),

        Instruction::OpGetLocal(slot) => byte_instruction("OP_GET_LOCAL", slot),
        Instruction::OpSetLocal(slot) => byte_instruction("OP_SET_LOCAL", slot),
        Instruction::OpCall(arg_count) => byte_instruction("OP_CALL", arg_count),

        Instruction::OpJump(jump) => jump_instruction("OP_JUMP", offset, jump, 1),
        Instruction::OpJumpIfFalse(jump) => jump_instruction("OP_JUMP_IF_FALSE", offset, jump, 1),
        Instruction::OpLoop(jump) => jump_instruction("OP_LOOP", offset, jump, -1),

        Instruction::OpNil => "OP_NIL".to_string(),
        Instruction::OpTrue => "OP_TRUE".to_string(),
        Instruction::OpFalse => "OP_FALSE".to_string(),
        Instruction::OpPop => "OP_POP".to_string(),
        Instruction::OpEqual => "OP_EQUAL".to_string(),
        Instruction::OpGreater => "OP_GREATER".to_string(),
        Instruction::OpLess => "OP_LESS".to_string(),
        Instruction::OpAdd => "OP_ADD".to_string(),
        Instruction::OpSubtract => "OP_SUBTRACT".to_string(),
        Instruction::OpMultiply => "OP_MULTIPLY".to_string(),
        Instruction::OpDivide => "OP_DIVIDE".to_string(),
        Instruction::OpNegate => "OP_NEGATE".to_string(),
        Instruction::OpNot => "OP_NOT".to_string(),
        Instruction::OpPrint => "OP_PRINT".to_string(),
        Instruction::OpReturn => "OP_RETURN".to_string(),
        Instruction::OpInvalid => "OP_INVALID".to_string(),
    }
}

fn constant_instruction(chunk: &Chunk, name: &str, index: u8) -> String {
    let value = match chunk.get_constant_checked(index) {
        Some(value) => format!("'{}'", value),
        None => "<out-of-bound>".to_string(),
    };
    format!("{:<16} {:>4} {}", name, index, value)
}

fn byte_instruction(name: &str, operand: u8) -> String {
    format!("{:<16} {:>4}", name, operand)
}

fn jump_instruction(name: &str, offset: usize, jump: u16, sign: i64) -> String {
    let target = offset as i64 + 3 + sign * jump as i64;
    format!("{:<16} {:>4} -> {}", name, jump, target)
}

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    for line in Disassembler::new(chunk) {
        println!("{}", line);
    }
}

/// Formats the single instruction at `offset`, for per-step execution traces.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> String {
    let (_, instr) = chunk.read_instruction(offset);
    render(chunk, offset, instr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn renders_constants_and_jumps() {
        let mut chunk = Chunk::new();
        let index = chunk.push_constant(Value::Number(4.2)) as u8;
        chunk.push_instruction(Instruction::OpConstant(index), 10);
        chunk.push_instruction(Instruction::OpJumpIfFalse(5), 10);
        chunk.push_instruction(Instruction::OpLoop(7), 11);
        chunk.push_instruction(Instruction::OpReturn, 11);

        let listing: Vec<String> = Disassembler::new(&chunk).collect();
        assert_eq!(listing.len(), 4);
        assert!(listing[0].contains("OP_CONSTANT"));
        assert!(listing[0].contains("'4.2'"));
        // forward jump from offset 2, backward loop from offset 5
        assert!(listing[1].contains("OP_JUMP_IF_FALSE"));
        assert!(listing[1].contains("-> 10"));
        assert!(listing[2].contains("OP_LOOP"));
        assert!(listing[2].contains("-> 1"));
        // the second instruction on line 10 shows a line continuation marker
        assert!(listing[1].contains("   | "));
    }

    #[test]
    fn chunk_listing_smoke() {
        let mut chunk = Chunk::new();
        chunk.push_instruction(Instruction::OpNil, 1);
        chunk.push_instruction(Instruction::OpReturn, 1);
        // prints to stdout; just make sure it walks the whole chunk
        disassemble_chunk(&chunk, "<script>");
    }
}
