use crate::chunk::Instruction;
use crate::compiler;
use crate::error::{RuntimeError, TraceFrame};
use crate::object::{FnObj, NativeFn, NativeObj};
use crate::value::Value;
use fnv::FnvHashMap;
use std::io::Write;
use std::rc::Rc;
use std::sync::LazyLock;
use std::time::Instant;

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

// === native functions ===

fn clock_native(_argc: u8, _args: &[Value]) -> Value {
    Value::Number(PROCESS_START.elapsed().as_secs_f64())
}

fn input_native(_argc: u8, _args: &[Value]) -> Value {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return Value::Nil;
    }
    let line = line.trim_end_matches(['\n', '\r']);

    if line.as_bytes().first().is_some_and(u8::is_ascii_digit) {
        return Value::Number(parse_leading_number(line));
    }
    Value::String(Rc::from(line))
}

// parse the maximal leading numeric run, ignoring anything after it
fn parse_leading_number(line: &str) -> f64 {
    let bytes = line.as_bytes();
    let mut end = 0;
    while bytes.get(end).is_some_and(|b| b.is_ascii_digit()) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(|b| b.is_ascii_digit()) {
        end += 1;
        while bytes.get(end).is_some_and(|b| b.is_ascii_digit()) {
            end += 1;
        }
    }
    line[..end].parse().unwrap_or(0.0)
}

/// The three-valued outcome of running a piece of source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

struct CallFrame {
    function: Rc<FnObj>,
    /// Index into the value stack where this frame's slots begin; slot 0
    /// aliases the callee.
    value_offset: usize,
    ip: usize,
}

/// The stack machine. Globals live as long as the VM, so a REPL can feed it
/// one `interpret` call per line and keep its definitions.
pub struct Vm {
    call_frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: FnvHashMap<Rc<str>, Value>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            call_frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: FnvHashMap::default(),
        };

        // pin the clock's epoch before any user code runs
        LazyLock::force(&PROCESS_START);

        vm.define_native("clock", clock_native);
        vm.define_native("input", input_native);
        vm
    }

    /// Compiles and runs `source`. Program output goes to `out`; compile and
    /// runtime diagnostics go to standard error.
    pub fn interpret<W: Write>(&mut self, source: &str, out: &mut W) -> InterpretResult {
        let script_fn = match compiler::compile(source) {
            Ok(script_fn) => script_fn,
            Err(_) => return InterpretResult::CompileError,
        };

        match self.execute(script_fn, out) {
            Ok(()) => InterpretResult::Ok,
            Err(err) => {
                eprintln!("{}", err);
                InterpretResult::RuntimeError
            }
        }
    }

    fn execute<W: Write>(
        &mut self,
        script_fn: Rc<FnObj>,
        out: &mut W,
    ) -> Result<(), RuntimeError> {
        self.stack.push(Value::Function(script_fn.clone()));
        self.call_frames.push(CallFrame {
            function: script_fn,
            value_offset: 0,
            ip: 0,
        });

        let result = self.run(out);
        if result.is_err() {
            self.reset_stack();
        }
        result
    }

    fn reset_stack(&mut self) {
        self.call_frames.clear();
        self.stack.clear();
    }

    fn run<W: Write>(&mut self, out: &mut W) -> Result<(), RuntimeError> {
        loop {
            if cfg!(feature = "debug-trace-execution") {
                let mut slots = String::from("          ");
                for val in &self.stack {
                    slots.push_str(&format!("[ {} ]", val));
                }
                println!("{}", slots);
                println!(
                    "{}",
                    crate::debug::disassemble_instruction(
                        &self.call_frame().function.chunk,
                        self.call_frame().ip,
                    )
                );
            }

            let (instr_size, instr) = self.next_instruction();
            match instr {
                Instruction::OpConstant(index) => {
                    let val = self.get_chunk_constant(index).clone();
                    self.push(val)?;
                }

                Instruction::OpNil => self.push(Value::Nil)?,
                Instruction::OpTrue => self.push(Value::Boolean(true))?,
                Instruction::OpFalse => self.push(Value::Boolean(false))?,

                Instruction::OpPop => {
                    self.pop()?;
                }

                Instruction::OpDefineGlobal(index) => {
                    let var_name = self.get_chunk_variable(index)?;
                    let init_val = self.pop()?;
                    self.globals.insert(var_name, init_val);
                }

                Instruction::OpGetGlobal(index) => {
                    let var_name = self.get_chunk_variable(index)?;
                    match self.globals.get(&var_name) {
                        Some(val) => {
                            let val = val.clone();
                            self.push(val)?;
                        }
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                var_name
                            )));
                        }
                    }
                }

                Instruction::OpSetGlobal(index) => {
                    let var_name = self.get_chunk_variable(index)?;
                    // assignment is an expression, so the value stays put
                    let new_val = self.peek()?;
                    match self.globals.get_mut(&var_name) {
                        Some(val) => *val = new_val,
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                var_name
                            )));
                        }
                    }
                }

                Instruction::OpGetLocal(slot) => {
                    match self.stack_frame().get(slot as usize) {
                        Some(val) => {
                            let val = val.clone();
                            self.push(val)?;
                        }
                        None => return Err(self.runtime_error("stack slot out of range")),
                    }
                }

                Instruction::OpSetLocal(slot) => {
                    let new_val = self.peek()?;
                    match self.stack_frame_mut().get_mut(slot as usize) {
                        Some(val) => *val = new_val,
                        None => return Err(self.runtime_error("stack slot out of range")),
                    }
                }

                Instruction::OpEqual => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.push(Value::Boolean(lhs == rhs))?;
                }

                Instruction::OpGreater => {
                    let rhs = self.pop_number()?;
                    let lhs = self.pop_number()?;
                    self.push(Value::Boolean(lhs > rhs))?;
                }

                Instruction::OpLess => {
                    let rhs = self.pop_number()?;
                    let lhs = self.pop_number()?;
                    self.push(Value::Boolean(lhs < rhs))?;
                }

                Instruction::OpAdd => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let result = match (lhs, rhs) {
                        (Value::Number(lnum), Value::Number(rnum)) => Value::Number(lnum + rnum),
                        (Value::String(lstr), Value::String(rstr)) => {
                            let mut joined = String::with_capacity(lstr.len() + rstr.len());
                            joined.push_str(&lstr);
                            joined.push_str(&rstr);
                            Value::String(Rc::from(joined))
                        }
                        // pragmatic extension: numbers coerce into string
                        // concatenation; integral doubles drop the decimal
                        // point under the default float formatting
                        (Value::Number(lnum), Value::String(rstr)) => {
                            Value::String(Rc::from(format!("{}{}", lnum, rstr)))
                        }
                        (Value::String(lstr), Value::Number(rnum)) => {
                            Value::String(Rc::from(format!("{}{}", lstr, rnum)))
                        }
                        _ => {
                            return Err(self
                                .runtime_error("Operands must be two numbers or two strings."));
                        }
                    };
                    self.push(result)?;
                }

                Instruction::OpSubtract => {
                    let rhs = self.pop_number()?;
                    let lhs = self.pop_number()?;
                    self.push(Value::Number(lhs - rhs))?;
                }

                Instruction::OpMultiply => {
                    let rhs = self.pop_number()?;
                    let lhs = self.pop_number()?;
                    self.push(Value::Number(lhs * rhs))?;
                }

                Instruction::OpDivide => {
                    let rhs = self.pop_number()?;
                    let lhs = self.pop_number()?;
                    self.push(Value::Number(lhs / rhs))?;
                }

                Instruction::OpNegate => {
                    let val = self.pop()?;
                    match val {
                        Value::Number(num) => self.push(Value::Number(-num))?,
                        _ => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }

                Instruction::OpNot => {
                    let val = self.pop()?;
                    self.push(Value::Boolean(val.is_falsey()))?;
                }

                Instruction::OpPrint => {
                    let val = self.pop()?;
                    if let Err(err) = writeln!(out, "{}", val) {
                        return Err(self.runtime_error(format!("failed to write output: {}", err)));
                    }
                }

                Instruction::OpJump(offset) => {
                    self.move_ip_fwd(offset as usize);
                }

                Instruction::OpJumpIfFalse(offset) => {
                    // the condition is left on the stack; the compiled
                    // sequence pops it on whichever path runs
                    if self.peek()?.is_falsey() {
                        self.move_ip_fwd(offset as usize);
                    }
                }

                Instruction::OpLoop(offset) => {
                    self.move_ip_back(offset as usize);
                }

                Instruction::OpClosure(index) => {
                    match self.get_chunk_constant(index).clone() {
                        val @ Value::Function(_) => self.push(val)?,
                        _ => return Err(self.runtime_error("unexpected value in constant table")),
                    }
                }

                Instruction::OpCall(arg_count) => {
                    let callee = self.peek_nth(arg_count as usize)?;
                    match callee {
                        Value::Function(fn_obj) => {
                            self.call(fn_obj, arg_count, instr_size)?;
                            continue;
                        }
                        Value::Native(native) => {
                            self.call_native(&native, arg_count)?;
                        }
                        _ => {
                            return Err(
                                self.runtime_error("Can only call functions and classes.")
                            );
                        }
                    }
                }

                Instruction::OpReturn => {
                    let result = self.pop()?;
                    let frame = self.call_frames.pop().expect("empty call frames stack");

                    if self.call_frames.is_empty() {
                        // the slot under the result holds the script itself
                        self.pop()?;
                        return Ok(());
                    }

                    self.stack.truncate(frame.value_offset);
                    self.push(result)?;
                    continue;
                }

                Instruction::OpInvalid => {
                    return Err(self.runtime_error("invalid op code"));
                }
            }
            self.move_ip_fwd(instr_size as usize);
        }
    }

    // === calls ===
    fn call(
        &mut self,
        fn_obj: Rc<FnObj>,
        arg_count: u8,
        instr_size: u8,
    ) -> Result<(), RuntimeError> {
        if arg_count != fn_obj.arity() {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                fn_obj.arity(),
                arg_count
            )));
        }

        if self.call_frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }

        // step past the call before entering the callee, so the return lands
        // on the next instruction
        self.move_ip_fwd(instr_size as usize);

        // slot 0 of the new frame aliases the callee on the stack
        let value_offset = self.stack.len() - arg_count as usize - 1;
        self.call_frames.push(CallFrame {
            function: fn_obj,
            value_offset,
            ip: 0,
        });
        Ok(())
    }

    fn call_native(&mut self, native: &NativeObj, arg_count: u8) -> Result<(), RuntimeError> {
        let first_arg = self.stack.len() - arg_count as usize;
        let result = (native.function)(arg_count, &self.stack[first_arg..]);

        // drop the callee along with the arguments
        self.stack.truncate(first_arg - 1);
        self.push(result)
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        self.globals
            .insert(Rc::from(name), Value::Native(Rc::new(NativeObj::new(function))));
    }

    // === frame and chunk accessors ===
    fn call_frame(&self) -> &CallFrame {
        self.call_frames.last().expect("empty call frames stack")
    }

    fn call_frame_mut(&mut self) -> &mut CallFrame {
        self.call_frames
            .last_mut()
            .expect("empty call frames stack")
    }

    fn stack_frame(&self) -> &[Value] {
        let offset = self.call_frame().value_offset;
        &self.stack[offset..]
    }

    fn stack_frame_mut(&mut self) -> &mut [Value] {
        let offset = self.call_frame().value_offset;
        &mut self.stack[offset..]
    }

    fn move_ip_fwd(&mut self, steps: usize) {
        self.call_frame_mut().ip += steps;
    }

    fn move_ip_back(&mut self, steps: usize) {
        self.call_frame_mut().ip -= steps;
    }

    fn next_instruction(&self) -> (u8, Instruction) {
        let ip = self.call_frame().ip;
        self.call_frame().function.chunk.read_instruction(ip)
    }

    fn get_chunk_constant(&self, index: u8) -> &Value {
        self.call_frame().function.chunk.get_constant(index)
    }

    fn get_chunk_variable(&self, index: u8) -> Result<Rc<str>, RuntimeError> {
        match self.get_chunk_constant(index) {
            Value::String(name) => Ok(name.clone()),
            _ => Err(self.runtime_error("unexpected value in constant table")),
        }
    }

    // === stack APIs ===
    fn push(&mut self, val: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        match self.stack.pop() {
            Some(val) => Ok(val),
            None => Err(self.runtime_error("illegal pop on empty stack")),
        }
    }

    fn peek(&self) -> Result<Value, RuntimeError> {
        match self.stack.last() {
            Some(val) => Ok(val.clone()),
            None => Err(self.runtime_error("illegal pop on empty stack")),
        }
    }

    fn peek_nth(&self, offset: usize) -> Result<Value, RuntimeError> {
        match self.stack.iter().rev().nth(offset) {
            Some(val) => Ok(val.clone()),
            None => Err(self.runtime_error("illegal pop on empty stack")),
        }
    }

    fn pop_number(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Value::Number(num) => Ok(num),
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    // === error reporting ===
    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(message.into(), self.stack_trace())
    }

    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.call_frames
            .iter()
            .rev()
            .enumerate()
            .map(|(depth, frame)| {
                // outer frames already stepped past their call instruction
                let ip = if depth == 0 {
                    frame.ip
                } else {
                    frame.ip.saturating_sub(1)
                };
                let chunk = &frame.function.chunk;
                let ip = ip.min(chunk.code_len().saturating_sub(1));
                TraceFrame::new(chunk.get_line(ip), frame.function.to_string())
            })
            .collect()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_source(source: &str) -> Result<String, RuntimeError> {
        let script_fn = compiler::compile(source).expect("source should compile");
        let mut vm = Vm::new();
        let mut out = Vec::new();
        vm.execute(script_fn, &mut out)
            .map(|()| String::from_utf8(out).unwrap())
    }

    #[test]
    fn add_type_error_message() {
        let err = run_source("print 1 + true;").unwrap_err();
        assert_eq!(err.message(), "Operands must be two numbers or two strings.");
        assert!(err.to_string().contains("[line 1] in <script>"));
    }

    #[test]
    fn comparison_type_error_message() {
        let err = run_source("print 1 < true;").unwrap_err();
        assert_eq!(err.message(), "Operands must be numbers.");
    }

    #[test]
    fn negate_type_error_message() {
        let err = run_source("print -\"oops\";").unwrap_err();
        assert_eq!(err.message(), "Operand must be a number.");
    }

    #[test]
    fn undefined_variable_messages() {
        let err = run_source("print x;").unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'x'.");

        // assignment does not create globals
        let err = run_source("x = 1;").unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'x'.");
    }

    #[test]
    fn arity_mismatch_message() {
        let err = run_source("fun f(a, b) { return a + b; } f(1);").unwrap_err();
        assert_eq!(err.message(), "Expected 2 arguments but got 1.");
    }

    #[test]
    fn calling_a_non_callable() {
        let err = run_source("var x = 3; x();").unwrap_err();
        assert_eq!(err.message(), "Can only call functions and classes.");
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let err = run_source("fun recurse(n) { return recurse(n + 1); } recurse(0);").unwrap_err();
        assert_eq!(err.message(), "Stack overflow.");
        assert!(err.to_string().contains("in <fn recurse>"));
    }

    #[test]
    fn trace_lists_frames_newest_first() {
        let source = "\
fun inner() { return 1 + nil; }
fun outer() { return inner(); }
outer();";
        let err = run_source(source).unwrap_err();
        let rendered = err.to_string();
        let inner_at = rendered.find("in <fn inner>").unwrap();
        let outer_at = rendered.find("in <fn outer>").unwrap();
        let script_at = rendered.find("in <script>").unwrap();
        assert!(inner_at < outer_at && outer_at < script_at);
        assert!(rendered.contains("[line 1] in <fn inner>"));
        assert!(rendered.contains("[line 2] in <fn outer>"));
        assert!(rendered.contains("[line 3] in <script>"));
    }

    #[test]
    fn set_global_leaves_value_on_stack() {
        assert_eq!(run_source("var a = 1; print a = 2;").unwrap(), "2\n");
    }

    #[test]
    fn set_local_leaves_value_on_stack() {
        assert_eq!(run_source("{ var a = 1; print a = 2; }").unwrap(), "2\n");
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = Vm::new();
        let mut out = Vec::new();
        assert_eq!(vm.interpret("var a = 1;", &mut out), InterpretResult::Ok);
        assert_eq!(
            vm.interpret("fun bump() { a = a + 1; } bump();", &mut out),
            InterpretResult::Ok
        );
        assert_eq!(vm.interpret("print a;", &mut out), InterpretResult::Ok);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n");
    }

    #[test]
    fn vm_recovers_after_runtime_error() {
        let mut vm = Vm::new();
        let mut out = Vec::new();
        assert_eq!(
            vm.interpret("print missing;", &mut out),
            InterpretResult::RuntimeError
        );
        // the stacks were reset; the next run starts clean
        assert_eq!(vm.interpret("print 2;", &mut out), InterpretResult::Ok);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n");
    }

    #[test]
    fn native_clock_counts_seconds() {
        assert_eq!(run_source("print clock() >= 0;").unwrap(), "true\n");
        assert_eq!(run_source("print clock;").unwrap(), "<native fn>\n");
    }

    #[test]
    fn leading_number_parses_despite_trailing_garbage() {
        assert_eq!(parse_leading_number("123abc"), 123.0);
        assert_eq!(parse_leading_number("3.14 apples"), 3.14);
        assert_eq!(parse_leading_number("7"), 7.0);
        assert_eq!(parse_leading_number("1.x"), 1.0);
    }

    #[test]
    fn deep_but_bounded_recursion_succeeds() {
        let source = "\
fun count(n) { if (n > 0) { return count(n - 1); } return 0; }
print count(60);";
        assert_eq!(run_source(source).unwrap(), "0\n");
    }
}
