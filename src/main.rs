mod bytecode;
mod frontend;
mod lang;
mod runtime;

use std::io::{BufRead, Write};
use std::{env, fs, io, mem, path::Path};

use crate::bytecode::disasm::print_bytecode;
use crate::bytecode::symbol_table::SymbolTable;
use crate::bytecode::Compiler;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::lang::node::Program;
use crate::lang::value::{Value, NULL};
use crate::runtime::vm::GLOBALS_SIZE;
use crate::runtime::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let ast = args.contains(&"--ast".to_string());
    let ast_json = args.contains(&"--ast-json".to_string());
    let show_bytecode =
        args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_usage();
        return;
    }

    // first non-flag argument is the filename
    let filename = args.iter().skip(1).find(|a| !a.starts_with('-'));

    match filename {
        Some(filename) => {
            ensure_extension(filename);
            match fs::read_to_string(filename) {
                Ok(source) => {
                    if tokens_only {
                        dump_tokens(&source);
                    } else {
                        run_program(&source, ast, ast_json, show_bytecode);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to read '{}': {}", filename, e);
                    std::process::exit(1);
                }
            }
        }
        None => repl(),
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("cin") {
        eprintln!("Error: expected a .cin file, got {}", filename);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("CINDER - Bytecode-Compiled Scripting Language");
    println!();
    println!("Usage:");
    println!("  cinder                    Start interactive REPL");
    println!("  cinder <file.cin>         Run a program");
    println!("  cinder --tokens <file>    Show tokens only");
    println!("  cinder --ast <file>       Show the parsed AST");
    println!("  cinder --ast-json <file>  Show the parsed AST as JSON");
    println!("  cinder --bc <file.cin>    Print disassembly before running");
    println!("  cinder --help, -h         Show this help");
}

fn parse_source(source: &str) -> Program {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    };

    match Parser::new(tokens).parse_program() {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    }
}

fn dump_tokens(source: &str) {
    match Lexer::new(source).tokenize() {
        Ok(tokens) => {
            for spanned in tokens {
                println!(
                    "{:>4}:{:<4} {}",
                    spanned.span.line, spanned.span.col, spanned.token
                );
            }
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_program(source: &str, ast: bool, ast_json: bool, show_bytecode: bool) {
    let program = parse_source(source);

    if ast {
        println!("{:#?}", program);
        return;
    }

    if ast_json {
        match serde_json::to_string_pretty(&program) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize AST: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(&program) {
        eprintln!("Compile error: {}", e);
        std::process::exit(1);
    }

    let bytecode = compiler.bytecode();

    if show_bytecode {
        print_bytecode(&bytecode);
        println!();
    }

    let mut vm = Vm::new(bytecode);
    if let Err(e) = vm.run() {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }

    println!("{}", vm.last_popped_stack_elem());
}

/// Interactive loop. One symbol table, constant pool, and globals slab
/// live across inputs, so `let` bindings persist between lines.
fn repl() {
    println!("Cinder REPL - press Ctrl-D to exit");

    let stdin = io::stdin();
    let mut symbol_table = SymbolTable::new();
    let mut constants: Vec<Value> = Vec::new();
    let mut globals = vec![NULL; GLOBALS_SIZE];

    loop {
        print!(">> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        if line.trim().is_empty() {
            continue;
        }

        let tokens = match Lexer::new(&line).tokenize() {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("Lexer error: {}", e);
                continue;
            }
        };

        let program = match Parser::new(tokens).parse_program() {
            Ok(program) => program,
            Err(e) => {
                eprintln!("Parse error: {}", e);
                continue;
            }
        };

        let mut compiler =
            Compiler::with_state(mem::take(&mut symbol_table), mem::take(&mut constants));
        let compiled = compiler.compile(&program);
        let bytecode = compiler.bytecode();
        (symbol_table, constants) = compiler.into_state();

        if let Err(e) = compiled {
            eprintln!("Compile error: {}", e);
            continue;
        }

        let mut vm = Vm::with_state(bytecode, mem::take(&mut globals));
        match vm.run() {
            Ok(()) => println!("{}", vm.last_popped_stack_elem()),
            Err(e) => eprintln!("Runtime error: {}", e),
        }
        globals = vm.into_globals();
    }
}
