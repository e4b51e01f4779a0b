use std::mem;
use std::rc::Rc;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::{self, Instructions, Op};
use crate::bytecode::symbol_table::{Symbol, SymbolScope, SymbolTable};
use crate::lang::node::{Block, Expression, Program, Statement};
use crate::lang::value::{CompiledFunction, Value};

/// Placeholder operand for jumps whose target is not known yet; always
/// back-patched before the enclosing construct finishes compiling.
const PATCH_LATER: usize = 9999;

/// Bytecode compiler: walks the AST and emits instructions into the
/// currently active compilation scope.
///
/// Scopes mirror function nesting. The root scope holds the main
/// program; every function literal pushes a fresh scope, compiles its
/// body there, and pops the finished instruction stream into a
/// `CompiledFunction` constant.
pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
}

/// The compiler's output: the main instruction stream plus the constant
/// pool it references.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

/// Opcode and position of an instruction already written to the stream,
/// kept so peephole edits can find and rewrite it.
#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Op,
    position: usize,
}

/// Per-function emission buffer: the instruction bytes plus cursors to
/// the last two emitted instructions.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            constants: Vec::new(),
            symbol_table: SymbolTable::new(),
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    /// Compiler carrying over state from a previous run, so a REPL can
    /// keep bindings and constants alive across inputs.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    /// Hand the symbol table and constant pool back to the caller.
    ///
    /// Unwinds to the root table first: an aborted compilation may have
    /// left the cursor inside a function scope.
    pub fn into_state(mut self) -> (SymbolTable, Vec<Value>) {
        while let Some(outer) = self.symbol_table.take_outer() {
            self.symbol_table = outer;
        }
        (self.symbol_table, self.constants)
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// Snapshot of the root scope's instructions and the constant pool.
    /// Only meaningful when no function scope is active.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Op::Pop, &[])?;
            }

            // The name is bound before the value compiles, so a function
            // stored in a global can call itself by name.
            Statement::Let { name, value } => {
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Op::SetGlobal, &[symbol.index])?,
                    _ => self.emit(Op::SetLocal, &[symbol.index])?,
                };
            }

            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[])?;
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::undefined_variable(name))?;
                self.load_symbol(&symbol)?;
            }

            Expression::Integer(n) => {
                let constant = self.add_constant(Value::Integer(*n));
                self.emit(Op::Constant, &[constant])?;
            }

            Expression::String(s) => {
                let constant = self.add_constant(Value::String(Rc::from(s.as_str())));
                self.emit(Op::Constant, &[constant])?;
            }

            Expression::Boolean(true) => {
                self.emit(Op::True, &[])?;
            }
            Expression::Boolean(false) => {
                self.emit(Op::False, &[])?;
            }

            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator.as_str() {
                    "!" => self.emit(Op::Bang, &[])?,
                    "-" => self.emit(Op::Minus, &[])?,
                    _ => return Err(CompileError::unknown_operator(operator)),
                };
            }

            Expression::Infix {
                operator,
                left,
                right,
            } => {
                // There is no less-than opcode: `a < b` emits the
                // operands swapped and reuses OpGreaterThan.
                if operator == "<" {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Op::GreaterThan, &[])?;
                    return Ok(());
                }

                self.compile_expression(left)?;
                self.compile_expression(right)?;

                match operator.as_str() {
                    "+" => self.emit(Op::Add, &[])?,
                    "-" => self.emit(Op::Sub, &[])?,
                    "*" => self.emit(Op::Mul, &[])?,
                    "/" => self.emit(Op::Div, &[])?,
                    ">" => self.emit(Op::GreaterThan, &[])?,
                    "==" => self.emit(Op::Equal, &[])?,
                    "!=" => self.emit(Op::NotEqual, &[])?,
                    _ => return Err(CompileError::unknown_operator(operator)),
                };
            }

            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;

                let jump_not_truthy_pos = self.emit(Op::JumpNotTruthy, &[PATCH_LATER])?;

                self.compile_block(consequence)?;
                // An if is an expression; the branch leaves its value on
                // the stack instead of popping it.
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_pop();
                }

                let jump_pos = self.emit(Op::Jump, &[PATCH_LATER])?;

                let after_consequence = self.current_instructions().len();
                self.change_operand(jump_not_truthy_pos, after_consequence)?;

                match alternative {
                    None => {
                        self.emit(Op::Null, &[])?;
                    }
                    Some(alternative) => {
                        self.compile_block(alternative)?;
                        if self.last_instruction_is(Op::Pop) {
                            self.remove_last_pop();
                        }
                    }
                }

                let after_alternative = self.current_instructions().len();
                self.change_operand(jump_pos, after_alternative)?;
            }

            Expression::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()])?;
            }

            Expression::Hash(pairs) => {
                // The literal's pair order is not significant; sorting
                // keys by their source rendering keeps the emitted
                // bytecode identical across runs.
                let mut sorted: Vec<&(Expression, Expression)> = pairs.iter().collect();
                sorted.sort_by_cached_key(|pair| pair.0.to_string());

                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2])?;
            }

            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[])?;
            }

            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Op::Call, &[arguments.len()])?;
            }

            Expression::Function { parameters, body } => {
                self.enter_scope();

                for parameter in parameters {
                    self.symbol_table.define(parameter);
                }

                self.compile_block(body)?;

                // A body ending in an expression returns that value; an
                // empty or value-less body returns null.
                if self.last_instruction_is(Op::Pop) {
                    self.replace_last_pop_with_return()?;
                }
                if !self.last_instruction_is(Op::ReturnValue) {
                    self.emit(Op::Return, &[])?;
                }

                let free_symbols = self.symbol_table.free_symbols.clone();
                let num_locals = self.symbol_table.num_definitions;
                let instructions = self.leave_scope();

                // Push the captured values from the enclosing scope's
                // vantage, in the order the body first referenced them.
                for symbol in &free_symbols {
                    self.load_symbol(symbol)?;
                }

                let function = Value::Function(Rc::new(CompiledFunction {
                    instructions,
                    num_locals,
                    num_parameters: parameters.len(),
                }));
                let function_index = self.add_constant(function);
                self.emit(Op::Closure, &[function_index, free_symbols.len()])?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Encode and append an instruction to the current scope; returns
    /// its starting position.
    fn emit(&mut self, op: Op, operands: &[usize]) -> Result<usize, CompileError> {
        let instruction =
            op::make(op, operands).map_err(|e| CompileError::internal(e.to_string()))?;
        let position = self.add_instruction(&instruction);
        self.set_last_instruction(op, position);
        Ok(position)
    }

    fn add_instruction(&mut self, instruction: &[u8]) -> usize {
        let position = self.current_instructions().len();
        self.scopes[self.scope_index]
            .instructions
            .extend_from_slice(instruction);
        position
    }

    fn set_last_instruction(&mut self, opcode: Op, position: usize) {
        let scope = &mut self.scopes[self.scope_index];
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes[self.scope_index].instructions
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        if self.current_instructions().is_empty() {
            return false;
        }
        matches!(
            self.scopes[self.scope_index].last_instruction,
            Some(last) if last.opcode == op
        )
    }

    /// Truncate the stream at the last OpPop and step the cursor back.
    fn remove_last_pop(&mut self) {
        let scope = &mut self.scopes[self.scope_index];
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    /// Rewrite the trailing OpPop of a function body into OpReturnValue.
    fn replace_last_pop_with_return(&mut self) -> Result<(), CompileError> {
        let last_position = match self.scopes[self.scope_index].last_instruction {
            Some(last) => last.position,
            None => return Ok(()),
        };

        let return_instruction =
            op::make(Op::ReturnValue, &[]).map_err(|e| CompileError::internal(e.to_string()))?;
        self.replace_instruction(last_position, &return_instruction);

        if let Some(last) = &mut self.scopes[self.scope_index].last_instruction {
            last.opcode = Op::ReturnValue;
        }
        Ok(())
    }

    fn replace_instruction(&mut self, position: usize, instruction: &[u8]) {
        let stream = &mut self.scopes[self.scope_index].instructions;
        stream[position..position + instruction.len()].copy_from_slice(instruction);
    }

    /// Re-encode the single operand of the instruction at `position`.
    /// Used to patch jump targets once they are known.
    fn change_operand(&mut self, position: usize, operand: usize) -> Result<(), CompileError> {
        let opcode = Op::from_byte(self.current_instructions()[position]).ok_or_else(|| {
            CompileError::internal(format!("no opcode at patch position {}", position))
        })?;
        let instruction =
            op::make(opcode, &[operand]).map_err(|e| CompileError::internal(e.to_string()))?;
        self.replace_instruction(position, &instruction);
        Ok(())
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.scope_index += 1;

        let outer = mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::enclosed(outer);
    }

    /// Pop the active scope and return its finished instruction stream,
    /// restoring the enclosing symbol table.
    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().unwrap_or_default();
        self.scope_index = self.scope_index.saturating_sub(1);

        if let Some(outer) = self.symbol_table.take_outer() {
            self.symbol_table = outer;
        }

        scope.instructions
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Op::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Op::GetLocal, &[symbol.index])?,
            SymbolScope::Free => self.emit(Op::GetFree, &[symbol.index])?,
        };
        Ok(())
    }
}
