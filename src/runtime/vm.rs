use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::compile::Bytecode;
use crate::bytecode::op::{self, Op};
use crate::lang::value::{
    Closure, CompiledFunction, HashPair, Value, ValueKind, FALSE, NULL, TRUE,
};
use crate::runtime::frame::Frame;
use crate::runtime::runtime_error::RuntimeError;

/// Operand stack depth in slots.
pub const STACK_SIZE: usize = 2048;
/// Size of the globals slab.
pub const GLOBALS_SIZE: usize = 65536;
/// Maximum call-frame depth.
pub const MAX_FRAMES: usize = 2048;

/// Bytecode virtual machine: a fetch/decode/execute loop over the main
/// instruction stream and nested function frames.
///
/// The operand stack is a fixed slab indexed by `sp`; popping only
/// decrements `sp` and leaves the slot in place, which is what makes
/// [`Vm::last_popped_stack_elem`] observable after a run.
pub struct Vm {
    constants: Vec<Value>,

    stack: Vec<Value>,
    /// Next free stack slot. The live top is `stack[sp - 1]`.
    sp: usize,

    globals: Vec<Value>,

    frames: Vec<Frame>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::with_state(bytecode, vec![NULL; GLOBALS_SIZE])
    }

    /// VM reusing an existing globals slab, so a REPL keeps bindings
    /// alive across inputs.
    pub fn with_state(bytecode: Bytecode, globals: Vec<Value>) -> Self {
        // The top-level instructions run as an ordinary frame: a
        // parameterless function wrapped in a closure with no captures.
        let main_function = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        });
        let main_closure = Rc::new(Closure {
            func: main_function,
            free: Vec::new(),
        });

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(main_closure, 0));

        Vm {
            constants: bytecode.constants,
            stack: vec![NULL; STACK_SIZE],
            sp: 0,
            globals,
            frames,
        }
    }

    /// Hand the globals slab back to the caller for the next run.
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The value most recently popped off the stack.
    ///
    /// Popped slots are deliberately not cleared: after the OpPop that
    /// ends each statement, the statement's value sits just above the
    /// live top, at `stack[sp]`.
    pub fn last_popped_stack_elem(&self) -> Value {
        self.stack[self.sp].clone()
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while self.current_frame().ip < self.current_frame().instructions().len() as i64 - 1 {
            self.current_frame_mut().ip += 1;

            let ip = self.current_frame().ip as usize;
            let byte = self.current_frame().instructions()[ip];
            let op = Op::from_byte(byte)
                .ok_or_else(|| RuntimeError::new(format!("unknown opcode: {}", byte)))?;

            match op {
                Op::Constant => {
                    let const_index = self.read_u16_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 2;

                    let constant = self.constants[const_index].clone();
                    self.push(constant)?;
                }

                Op::Pop => {
                    self.pop();
                }

                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    self.execute_binary_operation(op)?;
                }

                Op::True => self.push(TRUE)?,
                Op::False => self.push(FALSE)?,
                Op::Null => self.push(NULL)?,

                Op::Equal | Op::NotEqual | Op::GreaterThan => {
                    self.execute_comparison(op)?;
                }

                Op::Minus => self.execute_minus_operator()?,
                Op::Bang => self.execute_bang_operator()?,

                Op::Jump => {
                    let target = self.read_u16_operand(ip + 1) as i64;
                    // -1 because the loop pre-increments.
                    self.current_frame_mut().ip = target - 1;
                }

                Op::JumpNotTruthy => {
                    let target = self.read_u16_operand(ip + 1) as i64;
                    self.current_frame_mut().ip += 2;

                    let condition = self.pop();
                    if !is_truthy(&condition) {
                        self.current_frame_mut().ip = target - 1;
                    }
                }

                Op::SetGlobal => {
                    let global_index = self.read_u16_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 2;

                    self.globals[global_index] = self.pop();
                }

                Op::GetGlobal => {
                    let global_index = self.read_u16_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 2;

                    let value = self.globals[global_index].clone();
                    self.push(value)?;
                }

                Op::SetLocal => {
                    let local_index = self.read_u8_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;

                    let base_pointer = self.current_frame().base_pointer;
                    self.stack[base_pointer + local_index] = self.pop();
                }

                Op::GetLocal => {
                    let local_index = self.read_u8_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;

                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.stack[base_pointer + local_index].clone();
                    self.push(value)?;
                }

                Op::GetFree => {
                    let free_index = self.read_u8_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;

                    let value = self.current_frame().closure.free[free_index].clone();
                    self.push(value)?;
                }

                Op::Array => {
                    let num_elements = self.read_u16_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 2;

                    let array = self.build_array(self.sp - num_elements, self.sp);
                    self.sp -= num_elements;

                    self.push(array)?;
                }

                Op::Hash => {
                    let num_elements = self.read_u16_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 2;

                    let hash = self.build_hash(self.sp - num_elements, self.sp)?;
                    self.sp -= num_elements;

                    self.push(hash)?;
                }

                Op::Index => {
                    let index = self.pop();
                    let left = self.pop();

                    self.execute_index_expression(left, index)?;
                }

                Op::Call => {
                    let num_args = self.read_u8_operand(ip + 1) as usize;
                    self.current_frame_mut().ip += 1;

                    self.execute_call(num_args)?;
                }

                Op::ReturnValue => {
                    let return_value = self.pop();

                    let frame = self.pop_frame()?;
                    // Rewinding past base_pointer also drops the callee
                    // value sitting under the arguments.
                    self.sp = frame.base_pointer - 1;

                    self.push(return_value)?;
                }

                Op::Return => {
                    let frame = self.pop_frame()?;
                    self.sp = frame.base_pointer - 1;

                    self.push(NULL)?;
                }

                Op::Closure => {
                    let const_index = self.read_u16_operand(ip + 1) as usize;
                    let num_free = self.read_u8_operand(ip + 3) as usize;
                    self.current_frame_mut().ip += 3;

                    self.push_closure(const_index, num_free)?;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Stack and frames
    // =========================================================================

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::new("stack overflow"));
        }

        self.stack[self.sp] = value;
        self.sp += 1;

        Ok(())
    }

    fn pop(&mut self) -> Value {
        let value = self.stack[self.sp - 1].clone();
        self.sp -= 1;
        value
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("the main frame is never popped")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .expect("the main frame is never popped")
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<Frame, RuntimeError> {
        if self.frames.len() <= 1 {
            return Err(RuntimeError::new("cannot return from the main frame"));
        }
        Ok(self.frames.pop().expect("frame stack checked non-empty"))
    }

    fn read_u16_operand(&self, offset: usize) -> u16 {
        op::read_u16(&self.current_frame().instructions()[offset..])
    }

    fn read_u8_operand(&self, offset: usize) -> u8 {
        op::read_u8(&self.current_frame().instructions()[offset..])
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn execute_binary_operation(&mut self, op: Op) -> Result<(), RuntimeError> {
        let right = self.pop();
        let left = self.pop();

        match (&left, &right) {
            (Value::Integer(l), Value::Integer(r)) => {
                self.execute_binary_integer_operation(op, *l, *r)
            }
            (Value::String(l), Value::String(r)) => {
                self.execute_binary_string_operation(op, l, r)
            }
            _ => Err(RuntimeError::new(format!(
                "unsupported types for binary operation: {} {}",
                left.kind(),
                right.kind()
            ))),
        }
    }

    fn execute_binary_integer_operation(
        &mut self,
        op: Op,
        left: i64,
        right: i64,
    ) -> Result<(), RuntimeError> {
        let result = match op {
            Op::Add => left + right,
            Op::Sub => left - right,
            Op::Mul => left * right,
            Op::Div => {
                if right == 0 {
                    return Err(RuntimeError::new("division by zero"));
                }
                left / right
            }
            _ => {
                return Err(RuntimeError::new(format!(
                    "unknown integer operator: {}",
                    op as u8
                )))
            }
        };

        self.push(Value::Integer(result))
    }

    fn execute_binary_string_operation(
        &mut self,
        op: Op,
        left: &str,
        right: &str,
    ) -> Result<(), RuntimeError> {
        if op != Op::Add {
            return Err(RuntimeError::new(format!(
                "unknown string operator: {}",
                op as u8
            )));
        }

        let result = format!("{}{}", left, right);
        self.push(Value::String(Rc::from(result)))
    }

    fn execute_comparison(&mut self, op: Op) -> Result<(), RuntimeError> {
        let right = self.pop();
        let left = self.pop();

        // Either side being an integer selects the integer path. The
        // compiler never emits a comparison mixing an integer with
        // another kind.
        if left.kind() == ValueKind::Integer || right.kind() == ValueKind::Integer {
            return self.execute_integer_comparison(op, left, right);
        }

        match op {
            Op::Equal => {
                let equal = left.same_object(&right);
                self.push(bool_value(equal))
            }
            Op::NotEqual => {
                let equal = left.same_object(&right);
                self.push(bool_value(!equal))
            }
            _ => Err(RuntimeError::new(format!(
                "unknown operator: {} {} {}",
                op as u8,
                left.kind(),
                right.kind()
            ))),
        }
    }

    fn execute_integer_comparison(
        &mut self,
        op: Op,
        left: Value,
        right: Value,
    ) -> Result<(), RuntimeError> {
        let (Value::Integer(left_value), Value::Integer(right_value)) = (&left, &right) else {
            return Err(RuntimeError::new(format!(
                "unknown operator: {} {} {}",
                op as u8,
                left.kind(),
                right.kind()
            )));
        };

        let result = match op {
            Op::Equal => left_value == right_value,
            Op::NotEqual => left_value != right_value,
            Op::GreaterThan => left_value > right_value,
            _ => {
                return Err(RuntimeError::new(format!(
                    "unknown operator: {}",
                    op as u8
                )))
            }
        };

        self.push(bool_value(result))
    }

    fn execute_minus_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop();

        match operand {
            Value::Integer(value) => self.push(Value::Integer(-value)),
            _ => Err(RuntimeError::new(format!(
                "unsupported type for negation: {}",
                operand.kind()
            ))),
        }
    }

    fn execute_bang_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop();

        match operand {
            Value::Boolean(true) => self.push(FALSE),
            Value::Boolean(false) => self.push(TRUE),
            Value::Null => self.push(TRUE),
            _ => self.push(FALSE),
        }
    }

    // =========================================================================
    // Containers and indexing
    // =========================================================================

    fn build_array(&self, start: usize, end: usize) -> Value {
        Value::Array(Rc::new(self.stack[start..end].to_vec()))
    }

    fn build_hash(&self, start: usize, end: usize) -> Result<Value, RuntimeError> {
        let mut pairs = HashMap::new();

        let mut i = start;
        while i < end {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();

            let hash_key = key.hash_key().ok_or_else(|| {
                RuntimeError::new(format!("unusable as hash key: {}", key.kind()))
            })?;

            pairs.insert(hash_key, HashPair { key, value });
            i += 2;
        }

        Ok(Value::Hash(Rc::new(pairs)))
    }

    fn execute_index_expression(
        &mut self,
        left: Value,
        index: Value,
    ) -> Result<(), RuntimeError> {
        match (&left, &index) {
            (Value::Array(elements), Value::Integer(i)) => {
                let max = elements.len() as i64 - 1;
                let value = if *i < 0 || *i > max {
                    NULL
                } else {
                    elements[*i as usize].clone()
                };
                self.push(value)
            }
            (Value::Hash(pairs), _) => {
                let key = index.hash_key().ok_or_else(|| {
                    RuntimeError::new(format!("unusable as hash key: {}", index.kind()))
                })?;

                let value = match pairs.get(&key) {
                    Some(pair) => pair.value.clone(),
                    None => NULL,
                };
                self.push(value)
            }
            _ => Err(RuntimeError::new(format!(
                "index operator not supported: {}",
                left.kind()
            ))),
        }
    }

    // =========================================================================
    // Calls and closures
    // =========================================================================

    fn execute_call(&mut self, num_args: usize) -> Result<(), RuntimeError> {
        let callee = self.stack[self.sp - 1 - num_args].clone();

        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            _ => Err(RuntimeError::new("calling non-function and non-built-in")),
        }
    }

    fn call_closure(
        &mut self,
        closure: Rc<Closure>,
        num_args: usize,
    ) -> Result<(), RuntimeError> {
        if num_args != closure.func.num_parameters {
            return Err(RuntimeError::new(format!(
                "wrong number of arguments: want={}, got={}",
                closure.func.num_parameters, num_args
            )));
        }

        // Locals 0..num_parameters-1 overlap the arguments already on
        // the stack; the remaining local slots are reserved by bumping
        // sp past them.
        let base_pointer = self.sp - num_args;
        let num_locals = closure.func.num_locals;

        self.push_frame(Frame::new(closure, base_pointer))?;
        self.sp = base_pointer + num_locals;

        Ok(())
    }

    fn push_closure(&mut self, const_index: usize, num_free: usize) -> Result<(), RuntimeError> {
        let function = match &self.constants[const_index] {
            Value::Function(function) => Rc::clone(function),
            other => return Err(RuntimeError::new(format!("not a function: {}", other))),
        };

        // The captured values sit on top of the stack in capture order.
        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;

        let closure = Closure { func: function, free };
        self.push(Value::Closure(Rc::new(closure)))
    }
}

fn bool_value(input: bool) -> Value {
    if input {
        TRUE
    } else {
        FALSE
    }
}

/// Truthiness for OpJumpNotTruthy: null and false are falsy, everything
/// else is truthy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Null => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::lang::node::Program;

    enum Expected {
        Int(i64),
        Bool(bool),
        Str(&'static str),
        IntArray(Vec<i64>),
        IntHash(Vec<(i64, i64)>),
        Null,
    }

    struct VmTestCase {
        input: &'static str,
        expected: Expected,
    }

    fn parse(input: &str) -> Program {
        let tokens = Lexer::new(input).tokenize().expect("lexer error");
        Parser::new(tokens).parse_program().expect("parser error")
    }

    fn run_vm_tests(tests: Vec<VmTestCase>) {
        for tt in tests {
            let program = parse(tt.input);

            let mut compiler = Compiler::new();
            if let Err(e) = compiler.compile(&program) {
                panic!("compiler error: {}", e);
            }

            let mut vm = Vm::new(compiler.bytecode());
            if let Err(e) = vm.run() {
                panic!("vm error for {:?}: {}", tt.input, e);
            }

            let stack_elem = vm.last_popped_stack_elem();
            test_expected_value(&tt.expected, &stack_elem, tt.input);
        }
    }

    fn run_vm_error_test(input: &str, expected: &str) {
        let program = parse(input);

        let mut compiler = Compiler::new();
        if let Err(e) = compiler.compile(&program) {
            panic!("compiler error: {}", e);
        }

        let mut vm = Vm::new(compiler.bytecode());
        let err = match vm.run() {
            Err(e) => e,
            Ok(()) => panic!("expected VM error for {:?} but resulted in none", input),
        };

        assert_eq!(err.to_string(), expected, "wrong VM error for {:?}", input);
    }

    fn test_expected_value(expected: &Expected, actual: &Value, input: &str) {
        match (expected, actual) {
            (Expected::Int(want), Value::Integer(got)) => {
                assert_eq!(want, got, "wrong integer for {:?}", input);
            }
            (Expected::Bool(want), Value::Boolean(got)) => {
                assert_eq!(want, got, "wrong boolean for {:?}", input);
            }
            (Expected::Str(want), Value::String(got)) => {
                assert_eq!(*want, &**got, "wrong string for {:?}", input);
            }
            (Expected::Null, Value::Null) => {}
            (Expected::IntArray(want), Value::Array(got)) => {
                assert_eq!(
                    want.len(),
                    got.len(),
                    "wrong number of elements for {:?}",
                    input
                );
                for (i, (want, got)) in want.iter().zip(got.iter()).enumerate() {
                    match got {
                        Value::Integer(got) => {
                            assert_eq!(want, got, "wrong element {} for {:?}", i, input)
                        }
                        other => panic!("element {} is not an integer: {:?}", i, other),
                    }
                }
            }
            (Expected::IntHash(want), Value::Hash(got)) => {
                assert_eq!(want.len(), got.len(), "wrong number of pairs for {:?}", input);
                for (key, value) in want {
                    let hash_key = Value::Integer(*key)
                        .hash_key()
                        .expect("integers are hashable");
                    let pair = got
                        .get(&hash_key)
                        .unwrap_or_else(|| panic!("no pair for key {} in {:?}", key, input));
                    match &pair.value {
                        Value::Integer(got) => {
                            assert_eq!(value, got, "wrong value for key {} in {:?}", key, input)
                        }
                        other => panic!("value for key {} is not an integer: {:?}", key, other),
                    }
                }
            }
            (_, got) => panic!("wrong value kind for {:?}: got {:?}", input, got),
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        let tests = vec![
            VmTestCase { input: "1", expected: Expected::Int(1) },
            VmTestCase { input: "2", expected: Expected::Int(2) },
            VmTestCase { input: "1 + 2", expected: Expected::Int(3) },
            VmTestCase { input: "1 - 2", expected: Expected::Int(-1) },
            VmTestCase { input: "1 * 2", expected: Expected::Int(2) },
            VmTestCase { input: "4 / 2", expected: Expected::Int(2) },
            VmTestCase { input: "50 / 2 * 2 + 10 - 5", expected: Expected::Int(55) },
            VmTestCase { input: "5 + 5 + 5 + 5 - 10", expected: Expected::Int(10) },
            VmTestCase { input: "2 * 2 * 2 * 2 * 2", expected: Expected::Int(32) },
            VmTestCase { input: "5 * 2 + 10", expected: Expected::Int(20) },
            VmTestCase { input: "5 + 2 * 10", expected: Expected::Int(25) },
            VmTestCase { input: "5 * (2 + 10)", expected: Expected::Int(60) },
            VmTestCase { input: "-5", expected: Expected::Int(-5) },
            VmTestCase { input: "-10", expected: Expected::Int(-10) },
            VmTestCase { input: "-50 + 100 + -50", expected: Expected::Int(0) },
            VmTestCase {
                input: "(5 + 10 * 2 + 15 / 3) * 2 + -10",
                expected: Expected::Int(50),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_boolean_expressions() {
        let tests = vec![
            VmTestCase { input: "true", expected: Expected::Bool(true) },
            VmTestCase { input: "false", expected: Expected::Bool(false) },
            VmTestCase { input: "1 < 2", expected: Expected::Bool(true) },
            VmTestCase { input: "1 > 2", expected: Expected::Bool(false) },
            VmTestCase { input: "1 < 1", expected: Expected::Bool(false) },
            VmTestCase { input: "1 > 1", expected: Expected::Bool(false) },
            VmTestCase { input: "1 == 1", expected: Expected::Bool(true) },
            VmTestCase { input: "1 != 1", expected: Expected::Bool(false) },
            VmTestCase { input: "1 == 2", expected: Expected::Bool(false) },
            VmTestCase { input: "1 != 2", expected: Expected::Bool(true) },
            VmTestCase { input: "true == true", expected: Expected::Bool(true) },
            VmTestCase { input: "false == false", expected: Expected::Bool(true) },
            VmTestCase { input: "true == false", expected: Expected::Bool(false) },
            VmTestCase { input: "true != false", expected: Expected::Bool(true) },
            VmTestCase { input: "false != true", expected: Expected::Bool(true) },
            VmTestCase { input: "(1 < 2) == true", expected: Expected::Bool(true) },
            VmTestCase { input: "(1 < 2) == false", expected: Expected::Bool(false) },
            VmTestCase { input: "(1 > 2) == true", expected: Expected::Bool(false) },
            VmTestCase { input: "(1 > 2) == false", expected: Expected::Bool(true) },
            VmTestCase { input: "!true", expected: Expected::Bool(false) },
            VmTestCase { input: "!false", expected: Expected::Bool(true) },
            VmTestCase { input: "!5", expected: Expected::Bool(false) },
            VmTestCase { input: "!!true", expected: Expected::Bool(true) },
            VmTestCase { input: "!!false", expected: Expected::Bool(false) },
            VmTestCase { input: "!!5", expected: Expected::Bool(true) },
            VmTestCase {
                input: "!(if (false) { 5; })",
                expected: Expected::Bool(true),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_string_equality_is_identity() {
        let tests = vec![
            // Each literal occurrence is its own allocation.
            VmTestCase {
                input: r#""mon" == "mon""#,
                expected: Expected::Bool(false),
            },
            // One binding, one allocation.
            VmTestCase {
                input: r#"let s = "mon"; s == s"#,
                expected: Expected::Bool(true),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_conditionals() {
        let tests = vec![
            VmTestCase { input: "if (true) { 10 }", expected: Expected::Int(10) },
            VmTestCase {
                input: "if (true) { 10 } else { 20 }",
                expected: Expected::Int(10),
            },
            VmTestCase {
                input: "if (false) { 10 } else { 20 }",
                expected: Expected::Int(20),
            },
            VmTestCase { input: "if (1) { 10 }", expected: Expected::Int(10) },
            VmTestCase { input: "if (1 < 2) { 10 }", expected: Expected::Int(10) },
            VmTestCase {
                input: "if (1 < 2) { 10 } else { 20 }",
                expected: Expected::Int(10),
            },
            VmTestCase {
                input: "if (1 > 2) { 10 } else { 20 }",
                expected: Expected::Int(20),
            },
            VmTestCase { input: "if (1 > 2) { 10 }", expected: Expected::Null },
            VmTestCase { input: "if (false) { 10 }", expected: Expected::Null },
            VmTestCase {
                input: "if ((if (false) { 10 })) { 10 } else { 20 }",
                expected: Expected::Int(20),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_global_let_statements() {
        let tests = vec![
            VmTestCase { input: "let one = 1; one", expected: Expected::Int(1) },
            VmTestCase {
                input: "let one = 1; let two = 2; one + two",
                expected: Expected::Int(3),
            },
            VmTestCase {
                input: "let one = 1; let two = one + one; one + two",
                expected: Expected::Int(3),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_string_expressions() {
        let tests = vec![
            VmTestCase { input: r#""monkey""#, expected: Expected::Str("monkey") },
            VmTestCase {
                input: r#""mon" + "key""#,
                expected: Expected::Str("monkey"),
            },
            VmTestCase {
                input: r#""mon" + "key" + "banana""#,
                expected: Expected::Str("monkeybanana"),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_array_literals() {
        let tests = vec![
            VmTestCase { input: "[]", expected: Expected::IntArray(vec![]) },
            VmTestCase {
                input: "[1, 2, 3]",
                expected: Expected::IntArray(vec![1, 2, 3]),
            },
            VmTestCase {
                input: "[1 + 2, 3 * 4, 5 + 6]",
                expected: Expected::IntArray(vec![3, 12, 11]),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_hash_literals() {
        let tests = vec![
            VmTestCase { input: "{}", expected: Expected::IntHash(vec![]) },
            VmTestCase {
                input: "{1: 2, 2: 3}",
                expected: Expected::IntHash(vec![(1, 2), (2, 3)]),
            },
            VmTestCase {
                input: "{1 + 1: 2 * 2, 3 + 3: 4 * 4}",
                expected: Expected::IntHash(vec![(2, 4), (6, 16)]),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_index_expressions() {
        let tests = vec![
            VmTestCase { input: "[1, 2, 3][1]", expected: Expected::Int(2) },
            VmTestCase { input: "[1, 2, 3][0 + 2]", expected: Expected::Int(3) },
            VmTestCase { input: "[[1, 1, 1]][0][0]", expected: Expected::Int(1) },
            VmTestCase { input: "[][0]", expected: Expected::Null },
            VmTestCase { input: "[1, 2, 3][99]", expected: Expected::Null },
            VmTestCase { input: "[1][-1]", expected: Expected::Null },
            VmTestCase { input: "{1: 1, 2: 2}[1]", expected: Expected::Int(1) },
            VmTestCase { input: "{1: 1, 2: 2}[2]", expected: Expected::Int(2) },
            VmTestCase { input: "{1: 1}[0]", expected: Expected::Null },
            VmTestCase { input: "{}[0]", expected: Expected::Null },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_calling_functions_without_arguments() {
        let tests = vec![
            VmTestCase {
                input: "let fivePlusTen = function() { 5 + 10; }; fivePlusTen();",
                expected: Expected::Int(15),
            },
            VmTestCase {
                input: "
                let one = function() { 1; };
                let two = function() { 2; };
                one() + two()
                ",
                expected: Expected::Int(3),
            },
            VmTestCase {
                input: "
                let a = function() { 1 };
                let b = function() { a() + 1 };
                let c = function() { b() + 1 };
                c();
                ",
                expected: Expected::Int(3),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_functions_with_return_statement() {
        let tests = vec![
            VmTestCase {
                input: "let earlyExit = function() { return 99; 100; }; earlyExit();",
                expected: Expected::Int(99),
            },
            VmTestCase {
                input: "let earlyExit = function() { return 99; return 100; }; earlyExit();",
                expected: Expected::Int(99),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_functions_without_return_value() {
        let tests = vec![
            VmTestCase {
                input: "let noReturn = function() { }; noReturn();",
                expected: Expected::Null,
            },
            VmTestCase {
                input: "
                let noReturn = function() { };
                let noReturnTwo = function() { noReturn(); };
                noReturn();
                noReturnTwo();
                ",
                expected: Expected::Null,
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_first_class_functions() {
        let tests = vec![
            VmTestCase {
                input: "
                let returnsOne = function() { 1; };
                let returnsOneReturner = function() { returnsOne; };
                returnsOneReturner()();
                ",
                expected: Expected::Int(1),
            },
            VmTestCase {
                input: "
                let returnsOneReturner = function() {
                    let returnsOne = function() { 1; };
                    returnsOne;
                };
                returnsOneReturner()();
                ",
                expected: Expected::Int(1),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_calling_functions_with_bindings() {
        let tests = vec![
            VmTestCase {
                input: "let one = function() { let one = 1; one }; one();",
                expected: Expected::Int(1),
            },
            VmTestCase {
                input: "
                let oneAndTwo = function() { let one = 1; let two = 2; one + two; };
                oneAndTwo();
                ",
                expected: Expected::Int(3),
            },
            VmTestCase {
                input: "
                let oneAndTwo = function() { let one = 1; let two = 2; one + two; };
                let threeAndFour = function() { let three = 3; let four = 4; three + four; };
                oneAndTwo() + threeAndFour();
                ",
                expected: Expected::Int(10),
            },
            VmTestCase {
                input: "
                let firstFoobar = function() { let foobar = 50; foobar; };
                let secondFoobar = function() { let foobar = 100; foobar; };
                firstFoobar() + secondFoobar();
                ",
                expected: Expected::Int(150),
            },
            VmTestCase {
                input: "
                let globalSeed = 50;
                let minusOne = function() {
                    let num = 1;
                    globalSeed - num;
                };
                let minusTwo = function() {
                    let num = 2;
                    globalSeed - num;
                };
                minusOne() + minusTwo();
                ",
                expected: Expected::Int(97),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_calling_functions_with_arguments_and_bindings() {
        let tests = vec![
            VmTestCase {
                input: "let identity = function(a) { a; }; identity(4);",
                expected: Expected::Int(4),
            },
            VmTestCase {
                input: "let sum = function(a, b) { a + b; }; sum(1, 2);",
                expected: Expected::Int(3),
            },
            VmTestCase {
                input: "
                let sum = function(a, b) {
                    let c = a + b;
                    c;
                };
                sum(1, 2);
                ",
                expected: Expected::Int(3),
            },
            VmTestCase {
                input: "
                let sum = function(a, b) {
                    let c = a + b;
                    c;
                };
                sum(1, 2) + sum(3, 4);
                ",
                expected: Expected::Int(10),
            },
            VmTestCase {
                input: "
                let sum = function(a, b) {
                    let c = a + b;
                    c;
                };
                let outer = function() {
                    sum(1, 2) + sum(3, 4);
                };
                outer();
                ",
                expected: Expected::Int(10),
            },
            VmTestCase {
                input: "
                let globalNum = 10;

                let sum = function(a, b) {
                    let c = a + b;
                    c + globalNum;
                };

                let outer = function() {
                    sum(1, 2) + sum(3, 4) + globalNum;
                };
                outer() + globalNum;
                ",
                expected: Expected::Int(50),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_calling_functions_with_wrong_arguments() {
        let tests = [
            (
                "function() { 1; }(1);",
                "wrong number of arguments: want=0, got=1",
            ),
            (
                "function(a) { a; }();",
                "wrong number of arguments: want=1, got=0",
            ),
            (
                "function(a, b) { a + b; }(1);",
                "wrong number of arguments: want=2, got=1",
            ),
        ];

        for (input, expected) in tests {
            run_vm_error_test(input, expected);
        }
    }

    #[test]
    fn test_runtime_errors() {
        let tests = [
            (
                "5 + true",
                "unsupported types for binary operation: INTEGER BOOLEAN",
            ),
            ("-true", "unsupported type for negation: BOOLEAN"),
            ("[1, 2][true]", "index operator not supported: ARRAY"),
            ("5[0]", "index operator not supported: INTEGER"),
            ("{}[[]]", "unusable as hash key: ARRAY"),
            ("{[1, 2]: 3}", "unusable as hash key: ARRAY"),
            ("let noFn = 1; noFn();", "calling non-function and non-built-in"),
            ("1 / 0", "division by zero"),
        ];

        for (input, expected) in tests {
            run_vm_error_test(input, expected);
        }
    }

    #[test]
    fn test_unknown_string_operator_error() {
        run_vm_error_test(
            r#""a" - "b""#,
            &format!("unknown string operator: {}", Op::Sub as u8),
        );
    }

    #[test]
    fn test_runaway_recursion_overflows_cleanly() {
        run_vm_error_test(
            "let runaway = function() { runaway(); }; runaway();",
            "stack overflow",
        );
    }

    #[test]
    fn test_closures() {
        let tests = vec![
            VmTestCase {
                input: "
                let newClosure = function(a) {
                    function() { a; };
                };
                let closure = newClosure(99);
                closure();
                ",
                expected: Expected::Int(99),
            },
            VmTestCase {
                input: "
                let newAdder = function(a, b) {
                    function(c) { a + b + c };
                };
                let adder = newAdder(1, 2);
                adder(8);
                ",
                expected: Expected::Int(11),
            },
            VmTestCase {
                input: "
                let newAdder = function(a, b) {
                    let c = a + b;
                    function(d) { c + d };
                };
                let adder = newAdder(1, 2);
                adder(8);
                ",
                expected: Expected::Int(11),
            },
            VmTestCase {
                input: "
                let newAdderOuter = function(a, b) {
                    let c = a + b;
                    function(d) {
                        let e = d + c;
                        function(f) { e + f; };
                    };
                };
                let newAdderInner = newAdderOuter(1, 2);
                let adder = newAdderInner(3);
                adder(8);
                ",
                expected: Expected::Int(14),
            },
            VmTestCase {
                input: "
                let a = 1;
                let newAdderOuter = function(b) {
                    function(c) {
                        function(d) { a + b + c + d };
                    };
                };
                let newAdderInner = newAdderOuter(2);
                let adder = newAdderInner(3);
                adder(8);
                ",
                expected: Expected::Int(14),
            },
            VmTestCase {
                input: "
                let newClosure = function(a, b) {
                    let one = function() { a; };
                    let two = function() { b; };
                    function() { one() + two(); };
                };
                let closure = newClosure(9, 90);
                closure();
                ",
                expected: Expected::Int(99),
            },
        ];

        run_vm_tests(tests);
    }

    #[test]
    fn test_recursive_functions() {
        let tests = vec![VmTestCase {
            input: "
            let countDown = function(x) {
                if (x == 0) {
                    return 0;
                } else {
                    countDown(x - 1);
                }
            };
            countDown(1);
            ",
            expected: Expected::Int(0),
        }];

        run_vm_tests(tests);
    }

    #[test]
    fn test_recursive_fibonacci() {
        let tests = vec![VmTestCase {
            input: "
            let fibonacci = function(x) {
                if (x == 0) {
                    return 0;
                } else {
                    if (x == 1) {
                        return 1;
                    } else {
                        fibonacci(x - 1) + fibonacci(x - 2);
                    }
                }
            };
            fibonacci(15);
            ",
            expected: Expected::Int(610),
        }];

        run_vm_tests(tests);
    }

    // A compile-run round with carried-over state, the way the REPL
    // drives the pipeline.
    #[test]
    fn test_globals_survive_across_vm_runs() {
        let mut compiler = Compiler::new();
        compiler.compile(&parse("let one = 1;")).expect("compile error");

        let mut vm = Vm::new(compiler.bytecode());
        vm.run().expect("vm error");

        let (symbol_table, constants) = compiler.into_state();
        let globals = vm.into_globals();

        let mut compiler = Compiler::with_state(symbol_table, constants);
        compiler.compile(&parse("one + 2")).expect("compile error");

        let mut vm = Vm::with_state(compiler.bytecode(), globals);
        vm.run().expect("vm error");

        test_expected_value(&Expected::Int(3), &vm.last_popped_stack_elem(), "one + 2");
    }
}
