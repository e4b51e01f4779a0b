use std::rc::Rc;

use crate::lang::value::Closure;

/// Activation record of one function call.
#[derive(Debug)]
pub struct Frame {
    /// The closure being executed; its function's bytecode is this
    /// frame's instruction stream.
    pub closure: Rc<Closure>,

    /// Instruction pointer. Starts at -1 so the fetch loop's
    /// pre-increment lands on offset 0.
    pub ip: i64,

    /// Stack offset where this frame's argument/local region begins.
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: -1,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.closure.func.instructions
    }
}
