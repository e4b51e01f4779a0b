use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed Cinder program: the ordered list of top-level statements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

/// Statement node of the Cinder AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `let <name> = <value>;`
    Let { name: String, value: Expression },

    /// `return <value>;`
    Return(Expression),

    /// An expression in statement position. Its value is the statement's
    /// value; the compiler pops it after evaluation.
    Expression(Expression),
}

/// A braced statement list, the body of functions and `if` arms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

/// Expression node of the Cinder AST.
///
/// Operators carry their source spelling; the compiler dispatches on the
/// string and rejects anything it does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A variable reference.
    Identifier(String),

    /// An integer literal.
    Integer(i64),

    /// A double-quoted string literal.
    String(String),

    /// `true` or `false`.
    Boolean(bool),

    /// `<operator><right>`, with operator `!` or `-`.
    Prefix {
        operator: String,
        right: Box<Expression>,
    },

    /// `<left> <operator> <right>`.
    Infix {
        operator: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// `if (<condition>) { ... }` with an optional `else { ... }`.
    ///
    /// An `if` is an expression: a falsy condition without an alternative
    /// yields null.
    If {
        condition: Box<Expression>,
        consequence: Block,
        alternative: Option<Block>,
    },

    /// `function(<parameters>) { <body> }`.
    Function {
        parameters: Vec<String>,
        body: Block,
    },

    /// `<function>(<arguments>)`.
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },

    /// `[<elements>]`.
    Array(Vec<Expression>),

    /// `{<key>: <value>, ...}`.
    ///
    /// Pairs appear in source order here; the compiler re-sorts keys by
    /// their textual rendering so emitted bytecode is deterministic.
    Hash(Vec<(Expression, Expression)>),

    /// `<left>[<index>]`.
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Let { name, value } => write!(f, "let {} = {};", name, value),
            Statement::Return(value) => write!(f, "return {};", value),
            Statement::Expression(expression) => write!(f, "{}", expression),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    /// Canonical source rendering.
    ///
    /// Hash-literal key ordering in the compiler sorts by this text, so
    /// the rendering of a given expression must be stable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Integer(n) => write!(f, "{}", n),
            Expression::String(s) => write!(f, "{}", s),
            Expression::Boolean(b) => write!(f, "{}", b),
            Expression::Prefix { operator, right } => write!(f, "({}{})", operator, right),
            Expression::Infix {
                operator,
                left,
                right,
            } => write!(f, "({} {} {})", left, operator, right),
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                write!(f, "if{} {}", condition, consequence)?;
                if let Some(alternative) = alternative {
                    write!(f, "else {}", alternative)?;
                }
                Ok(())
            }
            Expression::Function { parameters, body } => {
                write!(f, "function({}) {}", parameters.join(", "), body)
            }
            Expression::Call {
                function,
                arguments,
            } => {
                let arguments: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", function, arguments.join(", "))
            }
            Expression::Array(elements) => {
                let elements: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", elements.join(", "))
            }
            Expression::Hash(pairs) => {
                let pairs: Vec<String> = pairs
                    .iter()
                    .map(|(key, value)| format!("{}:{}", key, value))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Expression::Index { left, index } => write!(f, "({}[{}])", left, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_display() {
        let program = Program {
            statements: vec![Statement::Let {
                name: "myVar".to_string(),
                value: Expression::Identifier("anotherVar".to_string()),
            }],
        };

        assert_eq!(program.to_string(), "let myVar = anotherVar;");
    }

    #[test]
    fn test_operator_rendering_keeps_grouping() {
        let expression = Expression::Infix {
            operator: "*".to_string(),
            left: Box::new(Expression::Infix {
                operator: "+".to_string(),
                left: Box::new(Expression::Integer(1)),
                right: Box::new(Expression::Integer(2)),
            }),
            right: Box::new(Expression::Integer(3)),
        };

        assert_eq!(expression.to_string(), "((1 + 2) * 3)");
    }
}
