//! Drift expressions: tokenizer, parser, bytecode compiler and VM.

use crate::error::{QpotError, Result};
use crate::traits::DriftField;
use std::collections::HashMap;

/// Instructions of the drift VM. Binary operators pop the right operand
/// first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// State variable, `0` for the first coordinate and `1` for the second.
    LoadVar(usize),
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Sinh,
    Cosh,
    Tanh,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "exp" => Self::Exp,
            "log" | "ln" => Self::Ln,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            _ => return None,
        })
    }

    fn apply(self, a: f64) -> f64 {
        match self {
            Self::Sin => a.sin(),
            Self::Cos => a.cos(),
            Self::Tan => a.tan(),
            Self::Exp => a.exp(),
            Self::Ln => a.ln(),
            Self::Sqrt => a.sqrt(),
            Self::Abs => a.abs(),
            Self::Sinh => a.sinh(),
            Self::Cosh => a.cosh(),
            Self::Tanh => a.tanh(),
        }
    }
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` receives the bytecode, the state
/// variables, the parameter values and a scratch stack.
pub struct VM;

impl VM {
    /// Runs `bytecode` and returns the value left on the stack.
    ///
    /// Compiled bytecode is always balanced; a malformed program yields `NaN`,
    /// which callers reject as a non-finite evaluation.
    pub fn execute(bytecode: &Bytecode, vars: &[f64], params: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        let pop = |stack: &mut Vec<f64>| stack.pop().unwrap_or(f64::NAN);

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(vars.get(idx).copied().unwrap_or(f64::NAN)),
                OpCode::LoadParam(idx) => {
                    stack.push(params.get(idx).copied().unwrap_or(f64::NAN))
                }
                OpCode::Add => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(power(a, b));
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(function) => {
                    let a = pop(stack);
                    stack.push(function.apply(a));
                }
            }
        }

        pop(stack)
    }
}

// Integer exponents go through powi so that negative bases stay defined.
fn power(base: f64, exponent: f64) -> f64 {
    if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(exponent)
    }
}

/// Abstract syntax tree for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // +, -, *, /, ^
    Unary(char, Box<Expr>),             // -
    Call(String, Box<Expr>),
}

/// Compiles an AST into `Bytecode`, resolving names to variable or parameter
/// indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else {
                    return Err(QpotError::domain(format!(
                        "Unbound symbol '{name}' in drift expression."
                    )));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => {
                        return Err(QpotError::domain(format!("Unknown binary operator '{op}'.")))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => {
                        return Err(QpotError::domain(format!("Unknown unary operator '{op}'.")))
                    }
                }
            }
            Expr::Call(func, arg) => {
                let function = Function::from_name(func).ok_or_else(|| {
                    QpotError::domain(format!("Unknown function '{func}' in drift expression."))
                })?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

/// Parses `input` into an expression tree.
///
/// Unknown characters, unbalanced parentheses and trailing tokens are domain
/// errors.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(QpotError::domain("Empty expression."));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(QpotError::domain(format!(
            "Unexpected trailing input in expression '{input}'."
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    // Only an exponent if digits (optionally signed) follow.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from(d);
                    if let Some(&sign) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    if !lookahead.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                        break;
                    }
                    num_str.push_str(&exponent);
                    chars = lookahead;
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| QpotError::domain(format!("Malformed number '{num_str}'.")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' || d == '.' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => {
                    return Err(QpotError::domain(format!(
                        "Unexpected character '{c}' in expression."
                    )))
                }
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(QpotError::domain("Expected ')'.")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than '^', so -x^2 is -(x^2).
    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary('-', Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // Right associative: 2^3^2 is 2^(3^2).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(QpotError::domain(format!("Unexpected token {token:?}."))),
            None => Err(QpotError::domain("Unexpected end of expression.")),
        }
    }
}

// --- ExpressionDrift ---

/// A drift field given as two compiled expressions over the state variables.
///
/// The VM stack is allocated per evaluation, so one instance can be shared
/// between threads.
#[derive(Debug, Clone)]
pub struct ExpressionDrift {
    fx: Bytecode,
    fy: Bytecode,
    params: Vec<f64>,
}

impl ExpressionDrift {
    /// Compiles `fx` and `fy` over the variables `x` and `y`.
    pub fn new(fx: &str, fy: &str) -> Result<Self> {
        Self::with_parameters(fx, fy, &[])
    }

    /// Compiles `fx` and `fy` over `x` and `y`, binding each named parameter
    /// to a constant value.
    pub fn with_parameters(fx: &str, fy: &str, params: &[(&str, f64)]) -> Result<Self> {
        Self::with_names(fx, fy, ("x", "y"), params)
    }

    /// Compiles `fx` and `fy` with custom names for the two state variables.
    pub fn with_names(
        fx: &str,
        fy: &str,
        var_names: (&str, &str),
        params: &[(&str, f64)],
    ) -> Result<Self> {
        let var_names = [var_names.0.to_string(), var_names.1.to_string()];
        if var_names[0] == var_names[1] {
            return Err(QpotError::domain("State variable names must differ."));
        }
        let param_names: Vec<String> = params.iter().map(|(name, _)| name.to_string()).collect();
        if let Some(clash) = param_names.iter().find(|name| var_names.contains(name)) {
            return Err(QpotError::domain(format!(
                "Parameter '{clash}' shadows a state variable."
            )));
        }
        let compiler = Compiler::new(&var_names, &param_names);
        let fx = compiler.compile(&parse(fx)?)?;
        let fy = compiler.compile(&parse(fy)?)?;

        Ok(Self {
            fx,
            fy,
            params: params.iter().map(|&(_, value)| value).collect(),
        })
    }
}

impl DriftField for ExpressionDrift {
    fn drift(&self, x: f64, y: f64) -> (f64, f64) {
        let mut stack = Vec::with_capacity(16);
        let vars = [x, y];
        let fx = VM::execute(&self.fx, &vars, &self.params, &mut stack);
        let fy = VM::execute(&self.fy, &vars, &self.params, &mut stack);
        (fx, fy)
    }
}
