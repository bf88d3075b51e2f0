//! Math expression parsing and evaluation.
//!
//! A recursive-descent parser producing a small AST that can be evaluated
//! repeatedly with different variable bindings (the equation solver relies
//! on this).
//!
//! Supported syntax:
//! - numbers (`2`, `3.5`, `.5`, `1e-3`), constants `pi` and `e`
//! - `+ - * / % ^` (`**` is accepted for `^`), unary `+`/`-`, parentheses
//! - implicit multiplication: `3x`, `2(x + 1)`, `(a)(b)`
//! - functions: `sqrt abs sin cos tan asin acos atan sinh cosh tanh ln log
//!   log10 log2 exp round floor ceil min max pow`
//! - one top-level comparison: `== != < <= > >=`; a lone `=` means `==`

use std::collections::HashMap;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MathError {
    #[error("Unexpected character: '{0}'")]
    UnexpectedChar(char),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Undefined symbol {0}")]
    UnknownVariable(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: &'static str, got: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("A comparison cannot be used as a number")]
    NotANumber,
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Format a number without a trailing `.0` for integral values.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        // `as i64` also folds -0 into 0
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(String),
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    left: Node,
    comparison: Option<(CompareOp, Node)>,
}

impl Expression {
    /// Parse an expression string.
    pub fn parse(input: &str) -> Result<Self, MathError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(&tokens);
        let expr = parser.parse_comparison()?;
        if let Some(tok) = parser.peek() {
            return Err(MathError::UnexpectedToken(tok.to_string()));
        }
        Ok(expr)
    }

    /// Evaluate with the given variable bindings.
    pub fn evaluate(&self, vars: &HashMap<String, f64>) -> Result<Value, MathError> {
        let left = eval_node(&self.left, vars)?;
        match &self.comparison {
            None => Ok(Value::Number(left)),
            Some((op, right)) => {
                let right = eval_node(right, vars)?;
                Ok(Value::Bool(compare(*op, left, right)))
            }
        }
    }

    /// Evaluate an expression that must produce a number.
    pub fn evaluate_number(&self, vars: &HashMap<String, f64>) -> Result<f64, MathError> {
        match self.evaluate(vars)? {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(MathError::NotANumber),
        }
    }

    /// For `lhs == rhs`, the expression `lhs - rhs`.
    pub fn equation_residual(&self) -> Option<Expression> {
        match &self.comparison {
            Some((CompareOp::Eq, right)) => Some(Expression {
                left: Node::Binary(BinaryOp::Sub, Box::new(self.left.clone()), Box::new(right.clone())),
                comparison: None,
            }),
            _ => None,
        }
    }

    /// Free variable names, sorted and deduplicated.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_variables(&self.left, &mut names);
        if let Some((_, right)) = &self.comparison {
            collect_variables(right, &mut names);
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Parse and evaluate in one step, with no variables bound.
pub fn evaluate(input: &str) -> Result<Value, MathError> {
    Expression::parse(input)?.evaluate(&HashMap::new())
}

fn collect_variables(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Number(_) => {}
        Node::Variable(name) => out.push(name.clone()),
        Node::Negate(inner) => collect_variables(inner, out),
        Node::Binary(_, l, r) => {
            collect_variables(l, out);
            collect_variables(r, out);
        }
        Node::Call(_, args) => args.iter().for_each(|a| collect_variables(a, out)),
    }
}

fn compare(op: CompareOp, l: f64, r: f64) -> bool {
    // Tolerate float noise so `0.1 + 0.2 == 0.3` holds
    let close = (l - r).abs() <= 1e-12 * l.abs().max(r.abs()).max(1.0);
    match op {
        CompareOp::Eq => close,
        CompareOp::Ne => !close,
        CompareOp::Lt => l < r && !close,
        CompareOp::Le => l < r || close,
        CompareOp::Gt => l > r && !close,
        CompareOp::Ge => l > r || close,
    }
}

fn eval_node(node: &Node, vars: &HashMap<String, f64>) -> Result<f64, MathError> {
    match node {
        Node::Number(n) => Ok(*n),
        Node::Variable(name) => match vars.get(name) {
            Some(v) => Ok(*v),
            None => match name.as_str() {
                "pi" | "PI" => Ok(std::f64::consts::PI),
                "e" | "E" => Ok(std::f64::consts::E),
                "tau" => Ok(std::f64::consts::TAU),
                _ => Err(MathError::UnknownVariable(name.clone())),
            },
        },
        Node::Negate(inner) => Ok(-eval_node(inner, vars)?),
        Node::Binary(op, l, r) => {
            let l = eval_node(l, vars)?;
            let r = eval_node(r, vars)?;
            match op {
                BinaryOp::Add => Ok(l + r),
                BinaryOp::Sub => Ok(l - r),
                BinaryOp::Mul => Ok(l * r),
                BinaryOp::Div => {
                    if r == 0.0 {
                        return Err(MathError::DivisionByZero);
                    }
                    Ok(l / r)
                }
                BinaryOp::Mod => {
                    if r == 0.0 {
                        return Err(MathError::DivisionByZero);
                    }
                    Ok(l - r * (l / r).floor())
                }
                BinaryOp::Pow => Ok(l.powf(r)),
            }
        }
        Node::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval_node(a, vars))
                .collect::<Result<Vec<f64>, _>>()?;
            call_function(name, &values)
        }
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, MathError> {
    let one = |f: fn(f64) -> f64| -> Result<f64, MathError> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(MathError::Arity {
                name: name.to_string(),
                expected: "1",
                got: args.len(),
            }),
        }
    };

    match name {
        "sqrt" => one(f64::sqrt),
        "abs" => one(f64::abs),
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "asin" => one(f64::asin),
        "acos" => one(f64::acos),
        "atan" => one(f64::atan),
        "sinh" => one(f64::sinh),
        "cosh" => one(f64::cosh),
        "tanh" => one(f64::tanh),
        "ln" => one(f64::ln),
        "log10" => one(f64::log10),
        "log2" => one(f64::log2),
        "exp" => one(f64::exp),
        "round" => one(f64::round),
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "log" => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.ln() / base.ln()),
            _ => Err(MathError::Arity {
                name: name.to_string(),
                expected: "1 or 2",
                got: args.len(),
            }),
        },
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err(MathError::Arity {
                name: name.to_string(),
                expected: "2",
                got: args.len(),
            }),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(MathError::Arity {
                    name: name.to_string(),
                    expected: "at least 1",
                    got: 0,
                });
            }
            let fold = if name == "min" { f64::min } else { f64::max };
            Ok(args.iter().copied().reduce(fold).unwrap_or(f64::NAN))
        }
        _ => Err(MathError::UnknownFunction(name.to_string())),
    }
}

fn is_function(name: &str) -> bool {
    matches!(
        name,
        "sqrt" | "abs" | "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "sinh" | "cosh" | "tanh"
            | "ln" | "log" | "log10" | "log2" | "exp" | "round" | "floor" | "ceil" | "min" | "max" | "pow"
    )
}

// ── Tokenizer ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
    Compare(CompareOp),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Percent => f.write_str("%"),
            Token::Caret => f.write_str("^"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Compare(op) => f.write_str(match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
            }),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, MathError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let next_is = |i: usize, c: char| chars.get(i + 1) == Some(&c);

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' if next_is(i, '*') => { tokens.push(Token::Caret); i += 2; }
            '*' | '×' => { tokens.push(Token::Star); i += 1; }
            '/' | '÷' => { tokens.push(Token::Slash); i += 1; }
            '%' => { tokens.push(Token::Percent); i += 1; }
            '^' => { tokens.push(Token::Caret); i += 1; }
            '(' | '[' => { tokens.push(Token::LParen); i += 1; }
            ')' | ']' => { tokens.push(Token::RParen); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '=' => {
                tokens.push(Token::Compare(CompareOp::Eq));
                i += if next_is(i, '=') { 2 } else { 1 };
            }
            '!' if next_is(i, '=') => { tokens.push(Token::Compare(CompareOp::Ne)); i += 2; }
            '<' if next_is(i, '=') => { tokens.push(Token::Compare(CompareOp::Le)); i += 2; }
            '>' if next_is(i, '=') => { tokens.push(Token::Compare(CompareOp::Ge)); i += 2; }
            '<' => { tokens.push(Token::Compare(CompareOp::Lt)); i += 1; }
            '>' => { tokens.push(Token::Compare(CompareOp::Gt)); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part, only when digits follow (`2e` is 2·e)
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str.parse().map_err(|_| MathError::InvalidNumber(num_str))?;
                tokens.push(Token::Number(num));
            }
            'π' => {
                tokens.push(Token::Ident("pi".into()));
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => return Err(MathError::UnexpectedChar(c)),
        }
    }

    Ok(tokens)
}

// ── Parser ────────────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // comparison = additive (CMP additive)?
    fn parse_comparison(&mut self) -> Result<Expression, MathError> {
        let left = self.parse_additive()?;
        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.consume();
            let right = self.parse_additive()?;
            return Ok(Expression {
                left,
                comparison: Some((op, right)),
            });
        }
        Ok(Expression { left, comparison: None })
    }

    // additive = term (('+' | '-') term)*
    fn parse_additive(&mut self) -> Result<Node, MathError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary | implicit-factor)*
    fn parse_term(&mut self) -> Result<Node, MathError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                // `3x`, `2(x + 1)`, `(a)(b)`
                Some(Token::Number(_) | Token::Ident(_) | Token::LParen) => {
                    let right = self.parse_power()?;
                    left = Node::Binary(BinaryOp::Mul, Box::new(left), Box::new(right));
                    continue;
                }
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // unary = ('-' | '+') unary | power
    fn parse_unary(&mut self) -> Result<Node, MathError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(Node::Negate(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // power = primary ('^' unary)?   (right-associative)
    fn parse_power(&mut self) -> Result<Node, MathError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    // primary = NUMBER | IDENT '(' args ')' | IDENT | '(' additive ')'
    fn parse_primary(&mut self) -> Result<Node, MathError> {
        match self.consume().cloned() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::Ident(name)) => {
                if is_function(&name) && self.peek() == Some(&Token::LParen) {
                    self.consume();
                    let args = self.parse_args()?;
                    Ok(Node::Call(name, args))
                } else {
                    Ok(Node::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let val = self.parse_additive()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    Some(tok) => Err(MathError::UnexpectedToken(tok.to_string())),
                    None => Err(MathError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(MathError::UnexpectedToken(tok.to_string())),
            None => Err(MathError::UnexpectedEnd),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Node>, MathError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.consume();
            return Ok(args);
        }
        loop {
            args.push(self.parse_additive()?);
            match self.consume() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => return Err(MathError::UnexpectedToken(tok.to_string())),
                None => return Err(MathError::UnexpectedEnd),
            }
        }
    }
}
