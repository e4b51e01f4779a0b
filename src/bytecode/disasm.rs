use crate::bytecode::compile::Bytecode;
use crate::bytecode::op::{self, Op};
use crate::lang::value::Value;

/// Render an instruction stream as one `offset  OpName operands` line
/// per instruction.
pub fn disassemble(ins: &[u8]) -> String {
    let mut out = String::new();
    let mut offset = 0;

    while offset < ins.len() {
        let Some(op) = Op::from_byte(ins[offset]) else {
            out.push_str(&format!("{:04} ERROR: unknown opcode {}\n", offset, ins[offset]));
            offset += 1;
            continue;
        };

        let (operands, read) = op::read_operands(op, &ins[offset + 1..]);
        out.push_str(&format!("{:04} {}\n", offset, format_instruction(op, &operands)));

        offset += 1 + read;
    }

    out
}

fn format_instruction(op: Op, operands: &[usize]) -> String {
    let operand_count = op.operand_widths().len();
    if operands.len() != operand_count {
        return format!(
            "ERROR: operand len {} does not match defined {}",
            operands.len(),
            operand_count
        );
    }

    match operands {
        [] => op.to_string(),
        [a] => format!("{} {}", op, a),
        [a, b] => format!("{} {} {}", op, a, b),
        _ => format!("ERROR: unhandled operand count for {}", op),
    }
}

/// Print a whole program: the main instruction stream, then every
/// function constant under its pool index.
pub fn print_bytecode(bytecode: &Bytecode) {
    println!("════════════════════════════════════════");
    println!(" main");
    println!("════════════════════════════════════════");
    print!("{}", disassemble(&bytecode.instructions));

    for (index, constant) in bytecode.constants.iter().enumerate() {
        if let Value::Function(function) = constant {
            println!();
            println!("════════════════════════════════════════");
            println!(
                " function constants[{}]  locals={} params={}",
                index, function.num_locals, function.num_parameters
            );
            println!("════════════════════════════════════════");
            print!("{}", disassemble(&function.instructions));
        }
    }
}
