// Single-pass Pratt compiler.
//
// One forward pass over the token stream: no AST is ever built. Each
// `Compiler` frame (`FunctionState`) owns the `Chunk` under construction for
// one function, its locals, and its upvalue table; `functions` is the stack
// of frames from the outermost script down to whatever nested function is
// currently being parsed - the "enclosing" chain the spec describes,
// represented as a `Vec` instead of a linked list of owned `Box`es because
// Rust's borrow checker makes that chain painful to mutate in place and a
// stack is exactly what "enclosing" means operationally.

use crate::chunk::Chunk;
use crate::gc::{self, Roots};
use crate::object::{FunctionObj, Heap, ObjRef};
use crate::opcode::OpCode;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * / %
    Indices,    // **
    Unary,      // not -x
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Indices,
            Indices => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    Script,
    Function,
}

struct Local<'src> {
    name: &'src str,
    /// -1 means "declared but not yet initialized"; reading such a local
    /// is the `let x = x;` error.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    function_type: FunctionType,
    name_obj: Option<ObjRef>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(function_type: FunctionType, name_obj: Option<ObjRef>) -> Self {
        // Slot 0 is reserved for the callee itself (an empty-named local),
        // matching the calling convention's "slot 0 is the callee".
        let locals = vec![Local { name: "", depth: 0, is_captured: false }];
        FunctionState {
            function_type,
            name_obj,
            arity: 0,
            chunk: Chunk::new(),
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

pub struct Compiler<'src, 'heap> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    heap: &'heap mut Heap,
    functions: Vec<FunctionState<'src>>,
    pub errors: Vec<String>,
}

impl Roots for Compiler<'_, '_> {
    fn mark_roots(&self, heap: &mut Heap, gray: &mut Vec<ObjRef>) {
        for fs in &self.functions {
            if let Some(n) = fs.name_obj {
                gc::mark_object(heap, gray, n);
            }
            for c in &fs.chunk.constants {
                gc::mark_value(heap, gray, c);
            }
        }
    }
}

/// Compiles `source` into a top-level script `Function` object, or returns
/// the list of compile errors accumulated by the parser.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<String>> {
    let dummy = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        previous: dummy,
        current: dummy,
        had_error: false,
        panic_mode: false,
        heap,
        functions: vec![FunctionState::new(FunctionType::Script, None)],
        errors: Vec::new(),
    };

    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");

    let (script, _) = compiler.end_function();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(compiler.heap.alloc_function(script))
    }
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    // ---- token stream plumbing -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.lexeme.to_string();
            self.error_at_current(&msg);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let tok = self.current;
        self.error_at(tok, message);
    }

    fn error(&mut self, message: &str) {
        let tok = self.previous;
        self.error_at(tok, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let where_ = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(format!("[line {}] Error{}: {}", token.line, where_, message));
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Fn
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- current function / chunk access ---------------------------------------

    fn func(&mut self) -> &mut FunctionState<'src> {
        self.functions.last_mut().expect("at least one function frame")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.func().chunk
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.as_byte());
    }

    fn emit_ops(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.line();
        if let Err(msg) = self.chunk().write_constant(value, line) {
            self.error(&msg);
        }
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let line = self.line();
        self.chunk().emit_jump_placeholder(line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if let Err(msg) = self.chunk().patch_jump(offset) {
            self.error(&msg);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn intern(&mut self, s: &str) -> ObjRef {
        let heap: &mut Heap = self.heap;
        heap.intern_string(s)
    }

    fn identifier_constant(&mut self, name: &str) -> u32 {
        let obj = self.intern(name);
        self.chunk().add_constant(Value::Obj(obj)) as u32
    }

    // ---- scopes and locals ------------------------------------------------------

    fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.func().scope_depth -= 1;
        let depth = self.func().scope_depth;
        loop {
            let should_pop = matches!(self.func().locals.last(), Some(local) if local.depth > depth);
            if !should_pop {
                break;
            }
            let captured = self.func().locals.last().unwrap().is_captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.func().locals.pop();
        }
    }

    fn declare_variable(&mut self, name: &'src str) {
        if self.func().scope_depth == 0 {
            return;
        }
        let depth = self.func().scope_depth;
        let mut duplicate = false;
        for local in self.functions.last().unwrap().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.func().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.func().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.func().scope_depth == 0 {
            return;
        }
        let depth = self.func().scope_depth;
        self.func().locals.last_mut().unwrap().depth = depth;
    }

    fn resolve_local(functions: &[FunctionState<'src>], idx: usize, name: &str) -> Result<Option<u8>, &'static str> {
        let fs = &functions[idx];
        for (i, local) in fs.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Cannot read local variable in its own initializer.");
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(functions: &mut [FunctionState<'src>], idx: usize, name: &str) -> Result<Option<u8>, &'static str> {
        if idx == 0 {
            return Ok(None);
        }
        if let Some(local_slot) = Self::resolve_local(functions, idx - 1, name)? {
            functions[idx - 1].locals[local_slot as usize].is_captured = true;
            return Self::add_upvalue(functions, idx, local_slot, true).map(Some);
        }
        if let Some(up_slot) = Self::resolve_upvalue(functions, idx - 1, name)? {
            return Self::add_upvalue(functions, idx, up_slot, false).map(Some);
        }
        Ok(None)
    }

    fn add_upvalue(functions: &mut [FunctionState<'src>], idx: usize, index: u8, is_local: bool) -> Result<u8, &'static str> {
        let fs = &mut functions[idx];
        for (i, up) in fs.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if fs.upvalues.len() >= MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        fs.upvalues.push(UpvalueDesc { index, is_local });
        Ok((fs.upvalues.len() - 1) as u8)
    }

    // ---- declarations and statements --------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Fn) {
            self.fn_declaration();
        } else if self.matches(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fn_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect function name.");
        let name = self.previous.lexeme;
        self.declare_variable(name);
        if self.func().scope_depth > 0 {
            self.mark_initialized();
        }
        self.function(FunctionType::Function, name);
        self.define_variable(name);
    }

    fn function(&mut self, function_type: FunctionType, name: &'src str) {
        let name_obj = self.intern(name);
        self.functions.push(FunctionState::new(function_type, Some(name_obj)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.func().arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.func().arity += 1;
                self.consume(TokenKind::Identifier, "Expect parameter name.");
                let pname = self.previous.lexeme;
                self.declare_variable(pname);
                self.mark_initialized();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (finished, upvalues) = self.end_function();
        let const_idx = {
            let obj = self.heap.alloc_function(finished);
            self.chunk().add_constant(Value::Obj(obj)) as u32
        };
        self.emit_op(OpCode::Closure);
        self.emit_u24(const_idx);
        for up in upvalues {
            self.emit_byte(up.is_local as u8);
            self.emit_byte(up.index);
        }
    }

    /// Emits the implicit `Meta; Return` every function body ends with (if
    /// control falls off the end), then pops this frame, returning its
    /// finished `FunctionObj` alongside the upvalue descriptors the caller
    /// needs to emit the `OP_CLOSURE` operand pairs.
    fn end_function(&mut self) -> (FunctionObj, Vec<UpvalueDesc>) {
        self.emit_op(OpCode::Meta);
        self.emit_op(OpCode::Return);
        let fs = self.functions.pop().expect("function frame to close");
        let func = FunctionObj {
            arity: fs.arity,
            upvalue_count: fs.upvalues.len() as u16,
            chunk: fs.chunk,
            name: fs.name_obj,
        };
        (func, fs.upvalues)
    }

    fn emit_u24(&mut self, value: u32) {
        let bytes = value.to_le_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
        self.emit_byte(bytes[2]);
    }

    fn let_declaration(&mut self) -> &'src str {
        self.consume(TokenKind::Identifier, "Expect variable name.");
        let name = self.previous.lexeme;
        self.declare_variable(name);

        if self.matches(TokenKind::Assign) {
            self.expression();
        } else {
            self.emit_op(OpCode::Meta);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(name);
        name
    }

    fn define_variable(&mut self, name: &str) {
        if self.func().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        let idx = self.identifier_constant(name);
        self.emit_op(OpCode::DefineGlobal);
        self.emit_u24(idx);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'print'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after value.");
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        let mut loop_var: Option<&'src str> = None;
        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Let) {
            loop_var = Some(self.let_declaration());
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        // Closure-per-iteration: copy the loop variable into a fresh inner
        // local before running the body, so a closure captured in the body
        // closes over *that* iteration's binding rather than the one slot
        // the increment clause keeps mutating.
        self.begin_scope();
        if let Some(name) = loop_var {
            let idx = self.functions.len() - 1;
            if let Ok(Some(slot)) = Self::resolve_local(&self.functions, idx, name) {
                self.emit_op(OpCode::GetLocal);
                self.emit_byte(slot);
                self.add_local(name);
                self.mark_initialized();
            }
        }
        self.statement();
        self.end_scope();

        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.func().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_op(OpCode::Meta);
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        }
        self.emit_op(OpCode::Return);
    }

    // ---- expressions (Pratt parsing) --------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= Self::rule_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }

        if can_assign && self.matches(TokenKind::Assign) {
            self.error("Invalid assignment target.");
        }
    }

    fn rule_precedence(kind: TokenKind) -> Precedence {
        use TokenKind::*;
        match kind {
            LeftParen => Precedence::Call,
            StarStar => Precedence::Indices,
            Star | Slash | Percent => Precedence::Factor,
            Plus | Minus => Precedence::Term,
            Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
            Equal | NotEqual => Precedence::Equality,
            And => Precedence::And,
            Or => Precedence::Or,
            _ => Precedence::None,
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Not => self.unary(),
            Number => self.number(),
            String => self.string(),
            Identifier => self.variable(can_assign),
            True | False => self.literal(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | Percent | StarStar | Equal | NotEqual | Less | LessEqual
            | Greater | GreaterEqual => self.binary(),
            LeftParen => self.call(),
            And => self.and(),
            Or => self.or(),
            _ => {
                let _ = can_assign;
            }
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let raw = self.previous.lexeme;
        let contents = &raw[1..raw.len() - 1];
        let obj = self.intern(contents);
        self.emit_constant(Value::Obj(obj));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            _ => unreachable!(),
        }
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Not => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let op_kind = self.previous.kind;
        let next_prec = Self::rule_precedence(op_kind).next();
        self.parse_precedence(next_prec);
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::StarStar => self.emit_op(OpCode::Pow),
            TokenKind::Equal => self.emit_op(OpCode::Equal),
            TokenKind::NotEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            _ => unreachable!(),
        }
    }

    /// `a and b`: symmetric with `or` but without the second jump - if the
    /// left side is falsey it is left on the stack and the right side is
    /// skipped entirely.
    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let idx = self.functions.len() - 1;
        let local_result = Self::resolve_local(&self.functions, idx, name);

        let (get_op, set_op, operand): (OpCode, OpCode, u32) = match local_result {
            Ok(Some(slot)) => (OpCode::GetLocal, OpCode::SetLocal, slot as u32),
            Ok(None) => {
                let up_result = Self::resolve_upvalue(&mut self.functions, idx, name);
                match up_result {
                    Ok(Some(slot)) => (OpCode::GetUpvalue, OpCode::SetUpvalue, slot as u32),
                    Ok(None) => {
                        let const_idx = self.identifier_constant(name);
                        (OpCode::GetGlobal, OpCode::SetGlobal, const_idx)
                    }
                    Err(msg) => {
                        self.error(msg);
                        (OpCode::GetGlobal, OpCode::SetGlobal, 0)
                    }
                }
            }
            Err(msg) => {
                self.error(msg);
                (OpCode::GetGlobal, OpCode::SetGlobal, 0)
            }
        };

        if can_assign && self.matches(TokenKind::Assign) {
            self.expression();
            self.emit_op(set_op);
            self.emit_operand(set_op, operand);
        } else {
            self.emit_op(get_op);
            self.emit_operand(get_op, operand);
        }
    }

    fn emit_operand(&mut self, op: OpCode, operand: u32) {
        match op {
            OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue => {
                self.emit_byte(operand as u8);
            }
            OpCode::GetGlobal | OpCode::SetGlobal => {
                self.emit_u24(operand);
            }
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Heap;

    fn compile_errors(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect_err("expected a compile error")
    }

    fn compile_ok(source: &str) {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect("expected source to compile");
    }

    #[test]
    fn rejects_reading_a_local_in_its_own_initializer() {
        let errors = compile_errors("fn f() { let x = x; }");
        assert!(errors.iter().any(|e| e.contains("own initializer")));
    }

    #[test]
    fn rejects_duplicate_local_in_same_scope() {
        let errors = compile_errors("fn f() { let x = 1; let x = 2; }");
        assert!(errors.iter().any(|e| e.contains("Already a variable")));
    }

    #[test]
    fn allows_shadowing_in_a_nested_scope() {
        compile_ok("fn f() { let x = 1; { let x = 2; } }");
    }

    #[test]
    fn rejects_return_outside_a_function() {
        let errors = compile_errors("return 1;");
        assert!(errors.iter().any(|e| e.contains("top-level code")));
    }

    #[test]
    fn accepts_a_closure_capturing_an_enclosing_local() {
        compile_ok("fn outer() { let x = 1; fn inner() { return x; } return inner; }");
    }

    #[test]
    fn rejects_too_many_parameters() {
        let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
        let source = format!("fn f({}) {{}}", params.join(", "));
        let errors = compile_errors(&source);
        assert!(errors.iter().any(|e| e.contains("255 parameters")));
    }

    #[test]
    fn rejects_too_many_upvalues_in_one_function() {
        // Two enclosing scopes so neither function's own *locals* count
        // (capped separately at 256) is what trips the limit: `b` forwards
        // 200 of `a`'s locals as its own upvalues, and `c` captures those
        // 200 forwarded upvalues plus 100 of `b`'s own locals directly,
        // for 300 upvalues on `c` alone.
        let a_locals: String = (0..200).map(|i| format!("let a{i} = 0;")).collect();
        let b_locals: String = (0..100).map(|i| format!("let b{i} = 0;")).collect();
        let a_names: Vec<String> = (0..200).map(|i| format!("a{i}")).collect();
        let b_names: Vec<String> = (0..100).map(|i| format!("b{i}")).collect();
        let sum_expr = a_names.iter().chain(b_names.iter()).cloned().collect::<Vec<_>>().join(" + ");
        let source =
            format!("fn a() {{ {a_locals} fn b() {{ {b_locals} fn c() {{ return {sum_expr}; }} return c; }} return b; }}");
        let errors = compile_errors(&source);
        assert!(errors.iter().any(|e| e.contains("Too many closure variables")));
    }

    #[test]
    fn dot_is_never_a_valid_infix_operator() {
        let errors = compile_errors("let x = 1 . 2;");
        assert!(!errors.is_empty());
    }

    #[test]
    fn reports_every_error_location_with_its_line_number() {
        let errors = compile_errors("let x = 1;\nreturn 2;");
        assert!(errors.iter().any(|e| e.starts_with("[line 2]")));
    }
}
