//! Bin selection expressions.
//!
//! A small arithmetic language evaluated once per contributing ray to pick
//! the accumulator bin. Supported syntax:
//!
//! - numbers, `+ - * / ^`, unary minus, parentheses
//! - ray variables: `Dx Dy Dz` (direction), `Px Py Pz` (hit point),
//!   `Nx Ny Nz` (surface normal), `T` (hit distance), `Rdot` (cosine between
//!   ray and normal), and the constant `PI`
//! - functions: `floor ceil abs sqrt sin cos acos atan2 min max if`
//! - parameter names bound from the modifier's parameter string

use raypipe_math::DVec3;
use thiserror::Error;

use crate::evaluated::TracedRay;

/// Deepest nesting of parentheses, calls, signs and powers.
const MAX_NESTING: usize = 64;

/// Most binary operators in one expression.
const MAX_OPERATORS: usize = 1024;

/// Errors that can occur while compiling an expression or its parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("syntax error in {expr:?} at offset {offset}: {message}")]
    Syntax {
        expr: String,
        offset: usize,
        message: String,
    },

    #[error("undefined variable {0:?}")]
    UndefinedVariable(String),

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("bad parameter assignment {0:?}")]
    BadParameter(String),
}

/// Values bound to the ray variables while evaluating an expression.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinContext {
    pub direction: DVec3,
    pub point: DVec3,
    pub normal: DVec3,
    pub distance: f64,
    pub rdot: f64,
}

impl BinContext {
    /// Bind the variables for a traced ray.
    pub fn from_ray(ray: &TracedRay) -> Self {
        match &ray.hit {
            Some(hit) => Self {
                direction: ray.ray.direction,
                point: hit.point,
                normal: hit.normal,
                distance: hit.distance,
                rdot: -ray.ray.direction.dot(hit.normal),
            },
            None => Self {
                direction: ray.ray.direction,
                distance: ray.distance(),
                ..Self::default()
            },
        }
    }
}

/// Named constants assigned in a modifier's parameter string.
///
/// The string is a list of `name=value` pairs separated by commas or
/// semicolons, e.g. `"MF=2,rNx=0"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, f64)>);

impl Params {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut values = Vec::new();
        for assignment in source.split([',', ';']) {
            let assignment = assignment.trim();
            if assignment.is_empty() {
                continue;
            }
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| ExprError::BadParameter(assignment.to_string()))?;
            let name = name.trim();
            if !is_identifier(name) {
                return Err(ExprError::BadParameter(assignment.to_string()));
            }
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| ExprError::BadParameter(assignment.to_string()))?;
            values.retain(|(n, _): &(String, f64)| n != name);
            values.push((name.to_string(), value));
        }
        Ok(Self(values))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    Dx,
    Dy,
    Dz,
    Px,
    Py,
    Pz,
    Nx,
    Ny,
    Nz,
    T,
    Rdot,
}

impl Var {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "Dx" => Var::Dx,
            "Dy" => Var::Dy,
            "Dz" => Var::Dz,
            "Px" => Var::Px,
            "Py" => Var::Py,
            "Pz" => Var::Pz,
            "Nx" => Var::Nx,
            "Ny" => Var::Ny,
            "Nz" => Var::Nz,
            "T" => Var::T,
            "Rdot" => Var::Rdot,
            _ => return None,
        })
    }

    fn value(self, ctx: &BinContext) -> f64 {
        match self {
            Var::Dx => ctx.direction.x,
            Var::Dy => ctx.direction.y,
            Var::Dz => ctx.direction.z,
            Var::Px => ctx.point.x,
            Var::Py => ctx.point.y,
            Var::Pz => ctx.point.z,
            Var::Nx => ctx.normal.x,
            Var::Ny => ctx.normal.y,
            Var::Nz => ctx.normal.z,
            Var::T => ctx.distance,
            Var::Rdot => ctx.rdot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Floor,
    Ceil,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Acos,
    Atan2,
    Min,
    Max,
    If,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "acos" => Func::Acos,
            "atan2" => Func::Atan2,
            "min" => Func::Min,
            "max" => Func::Max,
            "if" => Func::If,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Acos => "acos",
            Func::Atan2 => "atan2",
            Func::Min => "min",
            Func::Max => "max",
            Func::If => "if",
        }
    }

    fn arity(self) -> usize {
        match self {
            Func::Atan2 | Func::Min | Func::Max => 2,
            Func::If => 3,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Acos => args[0].clamp(-1.0, 1.0).acos(),
            Func::Atan2 => args[0].atan2(args[1]),
            Func::Min => args[0].min(args[1]),
            Func::Max => args[0].max(args[1]),
            Func::If => {
                if args[0] > 0.0 {
                    args[1]
                } else {
                    args[2]
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(Var),
    Param(f64),
    Neg(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

impl Node {
    fn eval(&self, ctx: &BinContext) -> f64 {
        match self {
            Node::Num(v) | Node::Param(v) => *v,
            Node::Var(var) => var.value(ctx),
            Node::Neg(inner) => -inner.eval(ctx),
            Node::Binary(op, a, b) => {
                let (a, b) = (a.eval(ctx), b.eval(ctx));
                match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    Op::Pow => a.powf(b),
                }
            }
            Node::Call(func, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(ctx)).collect();
                func.apply(&values)
            }
        }
    }

    fn is_constant(&self) -> bool {
        match self {
            Node::Num(_) => true,
            Node::Var(_) | Node::Param(_) => false,
            Node::Neg(inner) => inner.is_constant(),
            Node::Binary(_, a, b) => a.is_constant() && b.is_constant(),
            Node::Call(_, args) => args.iter().all(Node::is_constant),
        }
    }
}

/// A compiled bin expression with its parameters bound.
#[derive(Debug, Clone, PartialEq)]
pub struct BinExpr {
    source: String,
    root: Node,
}

impl BinExpr {
    /// Parse `source`, resolving names against the ray variables and `params`.
    pub fn compile(source: &str, params: &Params) -> Result<Self, ExprError> {
        let mut parser = Parser {
            src: source,
            pos: 0,
            params,
            depth: 0,
            operators: 0,
        };
        let root = parser.expression()?;
        parser.skip_whitespace();
        if parser.pos < source.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the expression references no variable or parameter.
    pub fn is_constant(&self) -> bool {
        self.root.is_constant()
    }

    pub fn eval(&self, ctx: &BinContext) -> f64 {
        self.root.eval(ctx)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    params: &'a Params,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ExprError {
        ExprError::Syntax {
            expr: self.src.to_string(),
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_raw() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }

    fn peek_raw(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.peek_raw()
    }

    fn expect(&mut self, c: u8) -> Result<(), ExprError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn expression(&mut self) -> Result<Node, ExprError> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                Some(b'+') => Op::Add,
                Some(b'-') => Op::Sub,
                _ => return Ok(node),
            };
            self.count_operator()?;
            self.pos += 1;
            let rhs = self.term()?;
            node = Node::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Node, ExprError> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(b'*') => Op::Mul,
                Some(b'/') => Op::Div,
                _ => return Ok(node),
            };
            self.count_operator()?;
            self.pos += 1;
            let rhs = self.unary()?;
            node = Node::Binary(op, Box::new(node), Box::new(rhs));
        }
    }

    fn count_operator(&mut self) -> Result<(), ExprError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(self.error("too many operators"));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let node = self.signed();
        self.depth -= 1;
        node
    }

    fn signed(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.primary()?;
        if self.peek() == Some(b'^') {
            self.count_operator()?;
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary(Op::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let node = self.expression()?;
                self.expect(b')')?;
                Ok(node)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.name(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn number(&mut self) -> Result<Node, ExprError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.') {
            self.pos += 1;
        }
        if self.pos < bytes.len() && matches!(bytes[self.pos], b'e' | b'E') {
            let mark = self.pos;
            self.pos += 1;
            if self.pos < bytes.len() && matches!(bytes[self.pos], b'+' | b'-') {
                self.pos += 1;
            }
            let digits = self.pos;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            if self.pos == digits {
                self.pos = mark;
            }
        }
        self.src[start..self.pos]
            .parse()
            .map(Node::Num)
            .map_err(|_| ExprError::Syntax {
                expr: self.src.to_string(),
                offset: start,
                message: "bad number".to_string(),
            })
    }

    fn name(&mut self) -> Result<Node, ExprError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len()
            && (bytes[self.pos].is_ascii_alphanumeric() || matches!(bytes[self.pos], b'_' | b'.'))
        {
            self.pos += 1;
        }
        let name = &self.src[start..self.pos];

        if self.peek() == Some(b'(') {
            let func = Func::lookup(name).ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
            self.pos += 1;
            let mut args = Vec::new();
            if self.peek() != Some(b')') {
                loop {
                    args.push(self.expression()?);
                    if self.peek() == Some(b',') {
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
            }
            self.expect(b')')?;
            if args.len() != func.arity() {
                return Err(ExprError::Arity {
                    name: func.name(),
                    expected: func.arity(),
                    got: args.len(),
                });
            }
            return Ok(Node::Call(func, args));
        }

        if name == "PI" {
            return Ok(Node::Num(std::f64::consts::PI));
        }
        if let Some(var) = Var::lookup(name) {
            return Ok(Node::Var(var));
        }
        self.params
            .get(name)
            .map(Node::Param)
            .ok_or_else(|| ExprError::UndefinedVariable(name.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
