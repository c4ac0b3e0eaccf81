use crate::chunk::{Chunk, Instruction};
use crate::error::CompileError;
use crate::object::FnObj;
use crate::scanner::{ScanError, Scanner, Token, TokenKind};
use crate::value::Value;
use std::rc::Rc;

// slot indices are a single byte, and slot 0 is reserved for the callee
const MAX_LOCALS: usize = u8::MAX as usize + 1;

/// Compiles `source` into the top-level script function. All diagnostics go
/// to standard error as they are found; the `Err` carries only their count.
pub fn compile(source: &str) -> Result<Rc<FnObj>, CompileError> {
    let scanner = Scanner::new(source);
    let mut parser = Parser::new(scanner);
    match parser.parse() {
        Some(script_fn) => Ok(script_fn),
        None => Err(CompileError::new(parser.errors)),
    }
}

struct Local<'a> {
    name: &'a str,
    depth: usize,

    // false between declaration and the end of the initializer
    initialized: bool,
}

enum FunKind {
    Script,
    Function,
}

/// Per-function compile state. Function declarations nest, so the parser
/// keeps these on a stack; the top entry is the one receiving code.
struct FunState<'a> {
    name: String,
    arity: u8,
    kind: FunKind,
    locals: Vec<Local<'a>>,
    scope_depth: usize,
    chunk: Chunk,
}

enum LookupError {
    Unresolved,
    ResolvedUninit,
}

impl<'a> FunState<'a> {
    fn new(name: String, kind: FunKind) -> Self {
        let mut fun = FunState {
            name,
            arity: 0,
            kind,
            locals: Vec::new(),
            scope_depth: 0,
            chunk: Chunk::new(),
        };

        // slot 0 holds the function value itself at runtime
        fun.locals.push(Local {
            name: "",
            depth: 0,
            initialized: true,
        });
        fun
    }

    fn in_global_scope(&self) -> bool {
        self.scope_depth == 0
    }

    fn add_local(&mut self, name: &'a str) {
        self.locals.push(Local {
            name,
            depth: self.scope_depth,
            initialized: false,
        });
    }

    fn init_last_local(&mut self) {
        if let Some(last) = self.locals.last_mut() {
            last.initialized = true;
        }
    }

    fn locals_count(&self) -> usize {
        self.locals.len()
    }

    /// Walks the locals newest to oldest and returns the stack slot of the
    /// first match. Misses resolve as globals.
    fn resolve_local(&self, name: &str) -> Result<usize, LookupError> {
        if let Some((rev_ix, found)) = self
            .locals
            .iter()
            .rev()
            .enumerate()
            .find(|item| item.1.name == name)
        {
            if !found.initialized {
                return Err(LookupError::ResolvedUninit);
            }
            return Ok(self.locals.len() - rev_ix - 1);
        }
        Err(LookupError::Unresolved)
    }
}

enum VarKind {
    Local(String),
    Global { name: String, index: u8, line: u32 },
}

#[derive(Copy, Clone)]
#[allow(dead_code)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

type Parselet<'a> = fn(&mut Parser<'a>, Token<'a>, bool);

struct Parser<'a> {
    scanner: std::iter::Peekable<Scanner<'a>>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<String>,
    curr_line: u32,
    fun_states: Vec<FunState<'a>>,
}

impl<'a> Parser<'a> {
    fn new(scanner: Scanner<'a>) -> Self {
        Parser {
            scanner: scanner.peekable(),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            curr_line: 1,
            fun_states: Vec::new(),
        }
    }

    fn parse(&mut self) -> Option<Rc<FnObj>> {
        self.fun_states
            .push(FunState::new(String::new(), FunKind::Script));

        self.program();
        self.emit_return(true);

        if self.had_error {
            None
        } else {
            Some(self.end_fun())
        }
    }

    fn end_fun(&mut self) -> Rc<FnObj> {
        let fun = self.fun_states.pop().expect("no function to end");
        let fn_obj = FnObj::new(fun.chunk, fun.arity, fun.name);

        if cfg!(feature = "debug-print-code") && !self.had_error {
            crate::debug::disassemble_chunk(&fn_obj.chunk, &fn_obj.to_string());
        }

        Rc::new(fn_obj)
    }

    // === function state management ===
    fn fun(&self) -> &FunState<'a> {
        self.fun_states.last().expect("empty function stack")
    }

    fn fun_mut(&mut self) -> &mut FunState<'a> {
        self.fun_states.last_mut().expect("empty function stack")
    }

    fn begin_scope(&mut self) {
        self.fun_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.fun_mut().scope_depth -= 1;
        let curr_depth = self.fun().scope_depth;
        let drop_count = self
            .fun()
            .locals
            .iter()
            .rev()
            .take_while(|loc| loc.depth > curr_depth)
            .count();

        for _ in 0..drop_count {
            self.fun_mut().locals.pop();
            self.emit_instruction(Instruction::OpPop, self.curr_line);
        }
    }

    // === code emitters ===
    fn emit_instruction(&mut self, instr: Instruction, line: u32) {
        self.fun_mut().chunk.push_instruction(instr, line);
    }

    fn emit_jump(&mut self, instr: Instruction, line: u32) -> usize {
        self.fun_mut().chunk.push_instruction(instr, line)
    }

    fn emit_constant(&mut self, value: Value) -> u8 {
        let index = self.fun_mut().chunk.push_constant(value);
        if index > u8::MAX as usize {
            self.report_error(self.curr_line, "Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_identifier(&mut self, name: &str) -> u8 {
        self.emit_constant(Value::String(Rc::from(name)))
    }

    fn patch_jump(&mut self, instr_index: usize) {
        // measured from the end of the three-byte jump instruction
        let jump = self.next_instr_index() - instr_index - 3;
        if jump > u16::MAX as usize {
            self.report_error(self.curr_line, "Too much code to jump over.");
        }
        self.fun_mut()
            .chunk
            .patch_jump_offset(instr_index, jump as u16);
    }

    fn emit_loop(&mut self, target_index: usize) {
        let jump = self.next_instr_index() - target_index + 3;
        if jump > u16::MAX as usize {
            self.report_error(self.curr_line, "Loop body too large.");
        }
        self.emit_instruction(Instruction::OpLoop(jump as u16), self.curr_line);
    }

    fn emit_return(&mut self, ret_nil: bool) {
        if ret_nil {
            self.emit_instruction(Instruction::OpNil, self.curr_line);
        }
        self.emit_instruction(Instruction::OpReturn, self.curr_line);
    }

    fn next_instr_index(&self) -> usize {
        self.fun().chunk.code_len()
    }

    // === declarations and statements ===
    fn program(&mut self) {
        while !self.is_eof() {
            self.declaration();
        }
    }

    fn declaration(&mut self) {
        if let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Fun => {
                    self.advance();
                    self.fun_decl();
                }
                TokenKind::Var => {
                    self.advance();
                    self.var_decl();
                }
                _ => {
                    self.statement();
                }
            }
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Print => {
                    self.advance();
                    self.print_statement();
                }
                TokenKind::LeftBrace => {
                    self.advance();
                    self.begin_scope();
                    self.block();
                    self.end_scope();
                }
                TokenKind::If => {
                    self.advance();
                    self.if_statement();
                }
                TokenKind::While => {
                    self.advance();
                    self.while_statement();
                }
                TokenKind::For => {
                    self.advance();
                    self.for_statement();
                }
                TokenKind::Return => {
                    self.advance();
                    self.return_statement(tok);
                }
                _ => {
                    self.expr_statement();
                }
            }
        }
    }

    fn var_decl(&mut self) {
        let var_kind = self.parse_var("Expect variable name.");

        // the initializer's residue on the stack is the local's storage
        if self.consume_if(TokenKind::Equal).is_some() {
            self.expression();
        } else {
            self.emit_instruction(Instruction::OpNil, self.curr_line);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");

        match var_kind {
            VarKind::Global { index, line, .. } => {
                self.emit_instruction(Instruction::OpDefineGlobal(index), line);
            }
            VarKind::Local(_) => {
                self.fun_mut().init_last_local();
            }
        }
    }

    fn parse_var(&mut self, message: &str) -> VarKind {
        let ident_tok = match self.consume(TokenKind::Identifier, message) {
            Some(tok) => tok,
            None => return VarKind::Local(String::new()),
        };

        if !self.fun().in_global_scope() {
            let var_name = ident_tok.lexeme;
            let curr_depth = self.fun().scope_depth;

            let dup_var = self
                .fun()
                .locals
                .iter()
                .rev()
                .take_while(|loc| loc.depth == curr_depth)
                .any(|loc| loc.name == var_name);
            if dup_var {
                self.report_error_at(
                    &ident_tok,
                    "Re-definition of an existing variable in this scope.",
                );
            }

            if self.fun().locals_count() == MAX_LOCALS {
                self.report_error_at(&ident_tok, "Too many local variables declared in function.");
                return VarKind::Local(var_name.to_string());
            }

            self.fun_mut().add_local(var_name);
            VarKind::Local(var_name.to_string())
        } else {
            // globals are looked up by name at runtime
            let index = self.emit_identifier(ident_tok.lexeme);
            VarKind::Global {
                name: ident_tok.lexeme.to_string(),
                index,
                line: ident_tok.line,
            }
        }
    }

    fn fun_decl(&mut self) {
        let var_kind = self.parse_var("Expected function name.");

        // initialized eagerly so the body may call itself
        if let VarKind::Local(_) = var_kind {
            self.fun_mut().init_last_local();
        }

        let fun_name = match &var_kind {
            VarKind::Local(name) => name.clone(),
            VarKind::Global { name, .. } => name.clone(),
        };
        self.function(fun_name);

        let fn_obj = self.end_fun();
        let index = self.emit_constant(Value::Function(fn_obj));
        self.emit_instruction(Instruction::OpClosure(index), self.curr_line);

        if let VarKind::Global { index, line, .. } = var_kind {
            self.emit_instruction(Instruction::OpDefineGlobal(index), line);
        }
    }

    fn function(&mut self, name: String) {
        self.fun_states.push(FunState::new(name, FunKind::Function));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.fun().arity == u8::MAX {
                    self.report_error(self.curr_line, "Can't have more than 255 parameters.");
                } else {
                    self.fun_mut().arity += 1;
                }
                self.parse_var("Expect parameter name.");
                self.fun_mut().init_last_local();

                if self.consume_if(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");

        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return(true);
    }

    fn return_statement(&mut self, ret_tok: Token<'a>) {
        if let FunKind::Script = self.fun().kind {
            self.report_error_at(&ret_tok, "Can't return from top-level code.");
        }

        if self.consume_if(TokenKind::Semicolon).is_some() {
            self.emit_return(true);
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_return(false);
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value.");
        self.emit_instruction(Instruction::OpPrint, self.curr_line);
    }

    fn expr_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_instruction(Instruction::OpPop, self.curr_line);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX), self.curr_line);

        // pop the condition value on the fall-through path
        self.emit_instruction(Instruction::OpPop, self.curr_line);
        self.statement();

        let else_jump = self.emit_jump(Instruction::OpJump(u16::MAX), self.curr_line);
        self.patch_jump(then_jump);

        // pop the condition on the taken path; this forms an implicit else
        // when the user wrote none
        self.emit_instruction(Instruction::OpPop, self.curr_line);

        if self.consume_if(TokenKind::Else).is_some() {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.next_instr_index();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX), self.curr_line);

        self.emit_instruction(Instruction::OpPop, self.curr_line);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_instruction(Instruction::OpPop, self.curr_line);
    }

    fn for_statement(&mut self) {
        // loop variables are scoped to the loop
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.consume_if(TokenKind::Semicolon).is_some() {
            // no initializer
        } else if self.consume_if(TokenKind::Var).is_some() {
            self.var_decl();
        } else {
            self.expr_statement();
        }

        let mut loop_start = self.next_instr_index();

        let mut exit_jump = None;
        if self.consume_if(TokenKind::Semicolon).is_none() {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX), self.curr_line));
            self.emit_instruction(Instruction::OpPop, self.curr_line);
        }

        if self.consume_if(TokenKind::RightParen).is_none() {
            // the increment runs after the body, so it is compiled
            // out-of-order: jump over it now, loop back to it later
            let body_jump = self.emit_jump(Instruction::OpJump(u16::MAX), self.curr_line);
            let increment_start = self.next_instr_index();

            self.expression();
            self.emit_instruction(Instruction::OpPop, self.curr_line);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_instruction(Instruction::OpPop, self.curr_line);
        }

        self.end_scope();
    }

    fn block(&mut self) {
        while let Some(tok) = self.peek() {
            if tok.kind == TokenKind::RightBrace {
                break;
            }
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}': no matching token found.");
    }

    // === expressions ===
    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment as i32)
    }

    fn number(&mut self, tok: Token<'a>, _: bool) {
        // the scanner only produces digit runs, which always parse
        let val = tok.lexeme.parse::<f64>().unwrap();
        let index = self.emit_constant(Value::Number(val));
        self.emit_instruction(Instruction::OpConstant(index), tok.line);
    }

    fn string(&mut self, tok: Token<'a>, _: bool) {
        // trim the enclosing quotes
        let literal = &tok.lexeme[1..tok.lexeme.len() - 1];
        let index = self.emit_constant(Value::String(Rc::from(literal)));
        self.emit_instruction(Instruction::OpConstant(index), tok.line);
    }

    fn literal(&mut self, tok: Token<'a>, _: bool) {
        match tok.kind {
            TokenKind::True => self.emit_instruction(Instruction::OpTrue, tok.line),
            TokenKind::False => self.emit_instruction(Instruction::OpFalse, tok.line),
            TokenKind::Nil => self.emit_instruction(Instruction::OpNil, tok.line),
            _ => self.report_error_at(&tok, "Expected expression."),
        }
    }

    fn variable(&mut self, tok: Token<'a>, can_assign: bool) {
        let is_assign = can_assign && self.consume_if(TokenKind::Equal).is_some();

        match self.fun().resolve_local(tok.lexeme) {
            Ok(slot) => {
                if is_assign {
                    self.expression();
                    self.emit_instruction(Instruction::OpSetLocal(slot as u8), tok.line);
                } else {
                    self.emit_instruction(Instruction::OpGetLocal(slot as u8), tok.line);
                }
            }
            Err(LookupError::Unresolved) => {
                // no local with this name; treat it as a global
                let index = self.emit_identifier(tok.lexeme);
                if is_assign {
                    self.expression();
                    self.emit_instruction(Instruction::OpSetGlobal(index), tok.line);
                } else {
                    self.emit_instruction(Instruction::OpGetGlobal(index), tok.line);
                }
            }
            Err(LookupError::ResolvedUninit) => {
                self.report_error_at(&tok, "Can't read local variable in its own initializer.");
            }
        }
    }

    fn grouping(&mut self, _: Token<'a>, _: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, tok: Token<'a>, _: bool) {
        self.parse_precedence(Precedence::Unary as i32);
        match tok.kind {
            TokenKind::Minus => self.emit_instruction(Instruction::OpNegate, tok.line),
            TokenKind::Bang => self.emit_instruction(Instruction::OpNot, tok.line),
            _ => self.report_error_at(&tok, "Expected expression."),
        }
    }

    fn binary(&mut self, tok: Token<'a>, _: bool) {
        // left associative: bind the right operand one level tighter
        let my_prec = self.infix_prec(tok.kind);
        self.parse_precedence(my_prec as i32 + 1);

        match tok.kind {
            TokenKind::Plus => self.emit_instruction(Instruction::OpAdd, tok.line),
            TokenKind::Minus => self.emit_instruction(Instruction::OpSubtract, tok.line),
            TokenKind::Star => self.emit_instruction(Instruction::OpMultiply, tok.line),
            TokenKind::Slash => self.emit_instruction(Instruction::OpDivide, tok.line),
            TokenKind::BangEqual => {
                self.emit_instruction(Instruction::OpEqual, tok.line);
                self.emit_instruction(Instruction::OpNot, tok.line);
            }
            TokenKind::EqualEqual => self.emit_instruction(Instruction::OpEqual, tok.line),
            TokenKind::Greater => self.emit_instruction(Instruction::OpGreater, tok.line),
            TokenKind::GreaterEqual => {
                self.emit_instruction(Instruction::OpLess, tok.line);
                self.emit_instruction(Instruction::OpNot, tok.line);
            }
            TokenKind::Less => self.emit_instruction(Instruction::OpLess, tok.line),
            TokenKind::LessEqual => {
                self.emit_instruction(Instruction::OpGreater, tok.line);
                self.emit_instruction(Instruction::OpNot, tok.line);
            }
            _ => self.report_error_at(&tok, "Expected expression."),
        }
    }

    fn and(&mut self, tok: Token<'a>, _: bool) {
        let end_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX), tok.line);

        self.emit_instruction(Instruction::OpPop, tok.line);
        self.parse_precedence(Precedence::And as i32);

        self.patch_jump(end_jump);
    }

    fn or(&mut self, tok: Token<'a>, _: bool) {
        let else_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX), tok.line);
        let end_jump = self.emit_jump(Instruction::OpJump(u16::MAX), tok.line);

        self.patch_jump(else_jump);
        self.emit_instruction(Instruction::OpPop, tok.line);

        self.parse_precedence(Precedence::Or as i32);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, tok: Token<'a>, _: bool) {
        let mut arg_count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == u8::MAX {
                    self.report_error(self.curr_line, "Can't have more than 255 arguments.");
                } else {
                    arg_count += 1;
                }
                if self.consume_if(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        self.emit_instruction(Instruction::OpCall(arg_count), tok.line);
    }

    fn parse_precedence(&mut self, prec: i32) {
        let tok = match self.advance() {
            Some(tok) => tok,
            None => {
                self.report_error_at_end("Expected expression.");
                return;
            }
        };

        // parselets only look for an assignment target when told from here
        let can_assign = prec <= Precedence::Assignment as i32;

        match self.prefix_rule(tok.kind) {
            Some(parselet) => parselet(self, tok, can_assign),
            None => {
                self.report_error_at(&tok, "Expected expression.");
                return;
            }
        }

        while let Some(tok) = self.peek() {
            let next_prec = self.infix_prec(tok.kind);
            if prec <= next_prec as i32 {
                // every kind with a non-None precedence has an infix rule
                let parselet = self.infix_rule(tok.kind).expect("missing infix rule");
                self.advance();
                parselet(self, tok, can_assign);
            } else {
                break;
            }
        }

        if can_assign {
            if let Some(equal_tok) = self.consume_if(TokenKind::Equal) {
                self.report_error_at(&equal_tok, "Invalid assignment target.");
            }
        }
    }

    fn prefix_rule(&self, tok_kind: TokenKind) -> Option<Parselet<'a>> {
        match tok_kind {
            TokenKind::LeftParen => Some(Self::grouping),
            TokenKind::Number => Some(Self::number),
            TokenKind::String => Some(Self::string),
            TokenKind::Identifier => Some(Self::variable),
            TokenKind::True => Some(Self::literal),
            TokenKind::False => Some(Self::literal),
            TokenKind::Nil => Some(Self::literal),
            TokenKind::Minus => Some(Self::unary),
            TokenKind::Bang => Some(Self::unary),
            _ => None,
        }
    }

    fn infix_prec(&self, tok_kind: TokenKind) -> Precedence {
        match tok_kind {
            TokenKind::LeftParen => Precedence::Call,
            TokenKind::Minus => Precedence::Term,
            TokenKind::Plus => Precedence::Term,
            TokenKind::Star => Precedence::Factor,
            TokenKind::Slash => Precedence::Factor,
            TokenKind::BangEqual => Precedence::Equality,
            TokenKind::EqualEqual => Precedence::Equality,
            TokenKind::Greater => Precedence::Comparison,
            TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::Less => Precedence::Comparison,
            TokenKind::LessEqual => Precedence::Comparison,
            TokenKind::And => Precedence::And,
            TokenKind::Or => Precedence::Or,
            _ => Precedence::None,
        }
    }

    fn infix_rule(&self, tok_kind: TokenKind) -> Option<Parselet<'a>> {
        match tok_kind {
            TokenKind::LeftParen => Some(Self::call),
            TokenKind::Minus => Some(Self::binary),
            TokenKind::Plus => Some(Self::binary),
            TokenKind::Star => Some(Self::binary),
            TokenKind::Slash => Some(Self::binary),
            TokenKind::BangEqual => Some(Self::binary),
            TokenKind::EqualEqual => Some(Self::binary),
            TokenKind::Greater => Some(Self::binary),
            TokenKind::GreaterEqual => Some(Self::binary),
            TokenKind::Less => Some(Self::binary),
            TokenKind::LessEqual => Some(Self::binary),
            TokenKind::And => Some(Self::and),
            TokenKind::Or => Some(Self::or),
            _ => None,
        }
    }

    // === parse utils ===
    fn advance(&mut self) -> Option<Token<'a>> {
        while let Some(tok_or_err) = self.scanner.next() {
            match tok_or_err {
                Ok(tok) => {
                    self.curr_line = tok.line;
                    return Some(tok);
                }
                Err(err) => self.error_in_scan(err),
            }
        }
        None
    }

    fn peek(&mut self) -> Option<Token<'a>> {
        loop {
            match self.scanner.peek() {
                Some(Ok(tok)) => return Some(tok.clone()),
                Some(Err(_)) => {
                    // consume the bad lexeme so the stream makes progress
                    if let Some(Err(err)) = self.scanner.next() {
                        self.error_in_scan(err);
                    }
                }
                None => return None,
            }
        }
    }

    fn check(&mut self, tok_kind: TokenKind) -> bool {
        matches!(self.peek(), Some(tok) if tok.kind == tok_kind)
    }

    /// Consumes the next token when it has the expected kind; otherwise
    /// reports `message` at the offending token and leaves it unconsumed for
    /// synchronization.
    fn consume(&mut self, tok_kind: TokenKind, message: &str) -> Option<Token<'a>> {
        match self.peek() {
            Some(tok) if tok.kind == tok_kind => self.advance(),
            Some(tok) => {
                self.report_error_at(&tok, message);
                None
            }
            None => {
                self.report_error_at_end(message);
                None
            }
        }
    }

    fn consume_if(&mut self, tok_kind: TokenKind) -> Option<Token<'a>> {
        if self.check(tok_kind) {
            self.advance()
        } else {
            None
        }
    }

    fn is_eof(&mut self) -> bool {
        self.scanner.peek().is_none()
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        // skip to something that looks like a statement boundary: just past
        // a semicolon, or just before a keyword that begins a statement
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // === error reporting ===
    fn error_in_scan(&mut self, err: ScanError) {
        self.curr_line = err.line();
        self.report_error(err.line(), &err.to_string());
    }

    fn report_error(&mut self, line: u32, message: &str) {
        self.report(line, None, message);
    }

    fn report_error_at(&mut self, tok: &Token<'a>, message: &str) {
        let location = format!(" at '{}'", tok.lexeme);
        self.report(tok.line, Some(location.as_str()), message);
    }

    fn report_error_at_end(&mut self, message: &str) {
        self.report(self.curr_line, Some(" at end"), message);
    }

    fn report(&mut self, line: u32, location: Option<&str>, message: &str) {
        // panic mode suppresses the cascade until the next synchronization
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let rendered = format!("[line {}] Error{}: {}", line, location.unwrap_or(""), message);
        eprintln!("{}", rendered);
        self.errors.push(rendered);
    }
}
