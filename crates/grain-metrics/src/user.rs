//! User-defined grain values: algebraic formulas over built-in quantities.
//!
//! A user grain value is described by a [`UserGrainValueSpec`] record,
//! typically supplied by a resource loader. Its formula is compiled
//! against the built-in identifier table (plus the constant `pi`); the
//! resolved variables are the value's dependencies, which are evaluated
//! once and shared, and the compiled expression is then applied to the
//! per-grain vectors.
//!
//! The expression compiler is a collaborator behind the [`ExprCompiler`]
//! trait; [`FormulaCompiler`] is a small recursive-descent implementation
//! sufficient for arithmetic formulas.

use serde::{Deserialize, Serialize};
use spm_common::Unit;

use field_engine::Field;
use mask_engine::MaskField;

use crate::builtin::evaluate_builtins;
use crate::catalog::{GrainValueId, CATALOG};
use crate::error::{GrainError, GrainResult};

/// Description of one user-defined grain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGrainValueSpec {
    pub name: String,
    pub group: String,
    /// Formula over built-in identifiers and `pi`.
    pub formula: String,
    /// Identifier under which other formulas could refer to this value.
    pub ident: String,
    pub symbol: String,
    pub power_x: i32,
    pub power_y: i32,
    pub power_z: i32,
    /// 0 = none, 1 = lateral, 2 = all; mirrors the built-in convention.
    pub same_units: u8,
    pub is_angle: bool,
}

/// A compiled vectorised expression.
pub trait CompiledExpr {
    /// Indices into the identifier table of the variables the expression
    /// actually uses, in first-use order without duplicates.
    fn variables(&self) -> &[usize];

    /// Evaluate over vectors: `inputs[i]` is the data vector of
    /// `variables()[i]`; all inputs and `out` have length `n`.
    fn eval(&self, n: usize, inputs: &[&[f64]], out: &mut [f64]);
}

/// The expression-compiler collaborator contract.
pub trait ExprCompiler {
    /// Compile `formula` against the identifier table `idents`; errors
    /// surface as a message that marks the enclosing value invalid.
    fn compile(&self, formula: &str, idents: &[&str]) -> Result<Box<dyn CompiledExpr>, String>;
}

/// One evaluated user grain value.
#[derive(Debug, Clone)]
pub struct UserGrainValues {
    pub name: String,
    pub ident: String,
    pub values: Vec<f64>,
    pub unit: Unit,
}

/// Evaluate user grain values over the grains of `mask`.
///
/// All formulas are compiled first, the union of their dependencies is
/// evaluated in one shared pass, and each formula is applied to the
/// per-grain vectors. A value whose formula does not compile is reported
/// as an error in its slot without affecting the others.
pub fn evaluate_user_values(
    field: &Field,
    mask: &mut MaskField,
    specs: &[UserGrainValueSpec],
    compiler: &dyn ExprCompiler,
) -> GrainResult<Vec<Result<UserGrainValues, GrainError>>> {
    let idents: Vec<&str> = CATALOG.iter().map(|d| d.ident).collect();

    // Compile everything first and union the dependencies.
    let mut compiled: Vec<Result<Box<dyn CompiledExpr>, GrainError>> = Vec::new();
    let mut needed_ids: Vec<GrainValueId> = Vec::new();
    for spec in specs {
        match compiler.compile(&spec.formula, &idents) {
            Ok(expr) => {
                for &v in expr.variables() {
                    let id = CATALOG[v].id;
                    if !needed_ids.contains(&id) {
                        needed_ids.push(id);
                    }
                }
                compiled.push(Ok(expr));
            }
            Err(reason) => compiled.push(Err(GrainError::InvalidFormula {
                name: spec.name.clone(),
                reason,
            })),
        }
    }

    let builtins = evaluate_builtins(field, mask, &needed_ids)?;
    fn lookup(builtins: &[crate::builtin::GrainValues], id: GrainValueId) -> &[f64] {
        &builtins
            .iter()
            .find(|b| b.id == id)
            .expect("dependency evaluated")
            .values
    }
    let n = builtins
        .first()
        .map(|b| b.values.len())
        .unwrap_or_else(|| mask.n_grains() + 1);

    let mut results = Vec::with_capacity(specs.len());
    for (spec, expr) in specs.iter().zip(compiled) {
        match expr {
            Err(err) => results.push(Err(err)),
            Ok(expr) => {
                let inputs: Vec<&[f64]> = expr
                    .variables()
                    .iter()
                    .map(|&v| lookup(&builtins, CATALOG[v].id))
                    .collect();
                let mut out = vec![0.0; n];
                expr.eval(n, &inputs, &mut out);
                let lateral = Unit::power_multiply(
                    field.xunit(),
                    spec.power_x,
                    field.yunit(),
                    spec.power_y,
                );
                let unit = if spec.is_angle {
                    Unit::none()
                } else {
                    Unit::power_multiply(&lateral, 1, field.zunit(), spec.power_z)
                };
                results.push(Ok(UserGrainValues {
                    name: spec.name.clone(),
                    ident: spec.ident.clone(),
                    values: out,
                    unit,
                }));
            }
        }
    }
    Ok(results)
}

// --- Default compiler ----------------------------------------------------

#[derive(Debug, Clone)]
enum Ast {
    Num(f64),
    Var(usize),
    Neg(Box<Ast>),
    Add(Box<Ast>, Box<Ast>),
    Sub(Box<Ast>, Box<Ast>),
    Mul(Box<Ast>, Box<Ast>),
    Div(Box<Ast>, Box<Ast>),
    Pow(Box<Ast>, Box<Ast>),
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    idents: &'a [&'a str],
    variables: Vec<usize>,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Ast, String> {
        let mut node = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    node = Ast::Add(Box::new(node), Box::new(self.term()?));
                }
                Some(b'-') => {
                    self.pos += 1;
                    node = Ast::Sub(Box::new(node), Box::new(self.term()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn term(&mut self) -> Result<Ast, String> {
        let mut node = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    node = Ast::Mul(Box::new(node), Box::new(self.factor()?));
                }
                Some(b'/') => {
                    self.pos += 1;
                    node = Ast::Div(Box::new(node), Box::new(self.factor()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn factor(&mut self) -> Result<Ast, String> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(Ast::Neg(Box::new(self.factor()?)))
            }
            Some(b'+') => {
                self.pos += 1;
                self.factor()
            }
            _ => {
                let base = self.atom()?;
                if self.peek() == Some(b'^') {
                    self.pos += 1;
                    let exponent = self.factor()?;
                    Ok(Ast::Pow(Box::new(base), Box::new(exponent)))
                } else {
                    Ok(base)
                }
            }
        }
    }

    fn atom(&mut self) -> Result<Ast, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let node = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err("missing closing parenthesis".into());
                }
                self.pos += 1;
                Ok(node)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.identifier(),
            Some(c) => Err(format!("unexpected character '{}'", c as char)),
            None => Err("unexpected end of formula".into()),
        }
    }

    fn number(&mut self) -> Result<Ast, String> {
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == b'.' || *c == b'e' || *c == b'E')
        {
            // Exponent signs belong to the literal.
            if (self.input[self.pos] == b'e' || self.input[self.pos] == b'E')
                && matches!(self.input.get(self.pos + 1), Some(b'+') | Some(b'-'))
            {
                self.pos += 1;
            }
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .expect("ascii literal");
        text.parse::<f64>()
            .map(Ast::Num)
            .map_err(|_| format!("bad numeric literal '{text}'"))
    }

    fn identifier(&mut self) -> Result<Ast, String> {
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
        {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.input[start..self.pos]).expect("ascii ident");
        if name == "pi" {
            return Ok(Ast::Num(std::f64::consts::PI));
        }
        match self.idents.iter().position(|&id| id == name) {
            Some(index) => {
                let var = match self.variables.iter().position(|&v| v == index) {
                    Some(v) => v,
                    None => {
                        self.variables.push(index);
                        self.variables.len() - 1
                    }
                };
                Ok(Ast::Var(var))
            }
            None => Err(format!("unknown identifier '{name}'")),
        }
    }
}

impl Ast {
    fn eval_one(&self, inputs: &[&[f64]], k: usize) -> f64 {
        match self {
            Ast::Num(v) => *v,
            Ast::Var(i) => inputs[*i][k],
            Ast::Neg(a) => -a.eval_one(inputs, k),
            Ast::Add(a, b) => a.eval_one(inputs, k) + b.eval_one(inputs, k),
            Ast::Sub(a, b) => a.eval_one(inputs, k) - b.eval_one(inputs, k),
            Ast::Mul(a, b) => a.eval_one(inputs, k) * b.eval_one(inputs, k),
            Ast::Div(a, b) => a.eval_one(inputs, k) / b.eval_one(inputs, k),
            Ast::Pow(a, b) => a.eval_one(inputs, k).powf(b.eval_one(inputs, k)),
        }
    }
}

struct CompiledFormula {
    ast: Ast,
    variables: Vec<usize>,
}

impl CompiledExpr for CompiledFormula {
    fn variables(&self) -> &[usize] {
        &self.variables
    }

    fn eval(&self, n: usize, inputs: &[&[f64]], out: &mut [f64]) {
        for (k, o) in out.iter_mut().enumerate().take(n) {
            *o = self.ast.eval_one(inputs, k);
        }
    }
}

/// Recursive-descent compiler for arithmetic formulas: `+ - * / ^`,
/// unary minus, parentheses, numeric literals, identifiers and `pi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaCompiler;

impl ExprCompiler for FormulaCompiler {
    fn compile(&self, formula: &str, idents: &[&str]) -> Result<Box<dyn CompiledExpr>, String> {
        let mut parser = Parser {
            input: formula.as_bytes(),
            pos: 0,
            idents,
            variables: Vec::new(),
        };
        let ast = parser.expr()?;
        parser.skip_ws();
        if parser.pos != parser.input.len() {
            return Err(format!("trailing input at position {}", parser.pos));
        }
        Ok(Box::new(CompiledFormula {
            ast,
            variables: parser.variables,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(formula: &str, idents: &[&str]) -> Box<dyn CompiledExpr> {
        FormulaCompiler.compile(formula, idents).unwrap()
    }

    #[test]
    fn test_constant_folding_basics() {
        let e = compile("2 + 3 * 4", &[]);
        let mut out = [0.0];
        e.eval(1, &[], &mut out);
        assert_eq!(out[0], 14.0);
    }

    #[test]
    fn test_precedence_and_parens() {
        let e = compile("(2 + 3) * 4 - 2 ^ 3", &[]);
        let mut out = [0.0];
        e.eval(1, &[], &mut out);
        assert_eq!(out[0], 12.0);
    }

    #[test]
    fn test_unary_minus_and_power() {
        let e = compile("-2 ^ 2", &[]);
        let mut out = [0.0];
        e.eval(1, &[], &mut out);
        // Unary minus binds the whole power factor.
        assert_eq!(out[0], -4.0);
    }

    #[test]
    fn test_pi() {
        let e = compile("2 * pi", &[]);
        let mut out = [0.0];
        e.eval(1, &[], &mut out);
        assert!((out[0] - 2.0 * std::f64::consts::PI).abs() < 1e-15);
    }

    #[test]
    fn test_variables_resolved_in_use_order() {
        let idents = ["A_0", "r_eq", "z_min"];
        let e = compile("z_min + 2 * A_0 + z_min", &idents);
        assert_eq!(e.variables(), &[2, 0]);
        let a0 = [0.0, 10.0];
        let zmin = [0.0, 3.0];
        let mut out = [0.0, 0.0];
        e.eval(2, &[&zmin, &a0], &mut out);
        assert_eq!(out[1], 3.0 + 20.0 + 3.0);
    }

    #[test]
    fn test_unknown_identifier_fails() {
        let r = FormulaCompiler.compile("bogus + 1", &["A_0"]);
        assert!(r.is_err());
    }

    #[test]
    fn test_trailing_garbage_fails() {
        let r = FormulaCompiler.compile("1 + 2 )", &[]);
        assert!(r.is_err());
    }

    #[test]
    fn test_scientific_literals() {
        let e = compile("1.5e2 + 2.5E-1", &[]);
        let mut out = [0.0];
        e.eval(1, &[], &mut out);
        assert!((out[0] - 150.25).abs() < 1e-12);
    }

    #[test]
    fn test_spec_serde_roundtrip() {
        let spec = UserGrainValueSpec {
            name: "Aspect ratio".into(),
            group: "User".into(),
            formula: "D_max / D_min".into(),
            ident: "aspect".into(),
            symbol: "q".into(),
            power_x: 0,
            power_y: 0,
            power_z: 0,
            same_units: 1,
            is_angle: false,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: UserGrainValueSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
