//! Scalar expressions: a small AST compiled to a flat instruction list and
//! evaluated against a tuple with a stack machine, rather than walked
//! recursively node-by-node.

use crate::error::{PoseidonError, Result};
use crate::graph::model::PropValue;
use crate::graph::store::GraphStore;
use crate::query::tuple::{Cell, Tuple};
use crate::txn::TxId;

/// Binary comparison/arithmetic/logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// A scalar expression tree, as built by a pipeline's caller.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A constant.
    Lit(Cell),
    /// A reference to a cell of the current tuple by position.
    Column(usize),
    /// A property lookup on a node/relationship cell of the current tuple.
    Property {
        /// Tuple position holding the node/relationship cell.
        of: usize,
        /// Property key name.
        key: String,
    },
    /// A binary operator application.
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    /// A unary operator application.
    UnOp(UnOp, Box<Expr>),
    /// A call to a registered scalar function.
    Call(String, Vec<Expr>),
}

/// A single compiled instruction in the post-order evaluation program.
#[derive(Debug, Clone)]
enum Instr {
    PushLit(Cell),
    PushColumn(usize),
    PushProperty { of: usize, key: String },
    BinOp(BinOp),
    UnOp(UnOp),
    Call(String, usize),
}

/// An [`Expr`] flattened into a post-order instruction list for repeated,
/// allocation-light evaluation across many tuples.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    instrs: Vec<Instr>,
}

/// Compiles `expr` into a program that [`CompiledExpr::eval`] can run.
pub fn compile(expr: &Expr) -> CompiledExpr {
    let mut instrs = Vec::new();
    compile_into(expr, &mut instrs);
    CompiledExpr { instrs }
}

fn compile_into(expr: &Expr, out: &mut Vec<Instr>) {
    match expr {
        Expr::Lit(c) => out.push(Instr::PushLit(c.clone())),
        Expr::Column(i) => out.push(Instr::PushColumn(*i)),
        Expr::Property { of, key } => out.push(Instr::PushProperty { of: *of, key: key.clone() }),
        Expr::BinOp(op, lhs, rhs) => {
            compile_into(lhs, out);
            compile_into(rhs, out);
            out.push(Instr::BinOp(*op));
        }
        Expr::UnOp(op, inner) => {
            compile_into(inner, out);
            out.push(Instr::UnOp(*op));
        }
        Expr::Call(name, args) => {
            for a in args {
                compile_into(a, out);
            }
            out.push(Instr::Call(name.clone(), args.len()));
        }
    }
}

fn prop_value_to_cell(v: PropValue) -> Cell {
    match v {
        PropValue::Null => Cell::Null,
        PropValue::Bool(b) => Cell::Bool(b),
        PropValue::Int(i) => Cell::Int(i),
        PropValue::UInt(u) => Cell::UInt(u),
        PropValue::Double(d) => Cell::Double(d),
        PropValue::Str(s) => Cell::Str(s),
        PropValue::Timestamp(t) => Cell::Timestamp(t),
    }
}

fn as_f64(c: &Cell) -> Option<f64> {
    match c {
        Cell::Int(i) => Some(*i as f64),
        Cell::UInt(u) => Some(*u as f64),
        Cell::Double(d) => Some(*d),
        Cell::Timestamp(t) => Some(*t as f64),
        _ => None,
    }
}

fn cmp(lhs: &Cell, rhs: &Cell) -> Option<std::cmp::Ordering> {
    if let (Cell::Str(a), Cell::Str(b)) = (lhs, rhs) {
        return Some(a.cmp(b));
    }
    let (a, b) = (as_f64(lhs)?, as_f64(rhs)?);
    a.partial_cmp(&b)
}

/// A user-registered scalar function, called by name from an [`Expr::Call`].
pub type Udf = dyn Fn(&[Cell]) -> Cell + Send + Sync;

/// Read-only context an expression needs to resolve property lookups and
/// function calls while it evaluates.
pub struct EvalCtx<'a> {
    /// The graph store properties are resolved against.
    pub store: &'a GraphStore,
    /// The transaction whose snapshot governs visibility of resolved properties.
    pub txid: TxId,
    /// Registered scalar functions, looked up by name.
    pub udfs: &'a rustc_hash::FxHashMap<String, Box<Udf>>,
}

impl CompiledExpr {
    /// Evaluates this program against `tuple`. A missing property resolves to
    /// [`Cell::Null`] rather than an error; only fatal storage errors (I/O,
    /// corrupt pages) propagate.
    pub fn eval(&self, tuple: &Tuple, ctx: &EvalCtx<'_>) -> Result<Cell> {
        let mut stack: Vec<Cell> = Vec::with_capacity(self.instrs.len());
        for instr in &self.instrs {
            match instr {
                Instr::PushLit(c) => stack.push(c.clone()),
                Instr::PushColumn(i) => stack.push(tuple.get(*i).cloned().unwrap_or(Cell::Null)),
                Instr::PushProperty { of, key } => {
                    let cell = tuple.get(*of).cloned().unwrap_or(Cell::Null);
                    let looked_up = match cell {
                        Cell::Node(id) | Cell::NodeDesc(id, _) => {
                            ctx.store.node_property(ctx.txid, id, key).or_else(fold_nonfatal)?
                        }
                        Cell::Rship(id) | Cell::RshipDesc(id, _) => {
                            ctx.store.rship_property(ctx.txid, id, key).or_else(fold_nonfatal)?
                        }
                        _ => None,
                    };
                    stack.push(looked_up.map(prop_value_to_cell).unwrap_or(Cell::Null));
                }
                Instr::BinOp(op) => {
                    let rhs = stack.pop().unwrap_or(Cell::Null);
                    let lhs = stack.pop().unwrap_or(Cell::Null);
                    stack.push(eval_binop(*op, &lhs, &rhs));
                }
                Instr::UnOp(op) => {
                    let v = stack.pop().unwrap_or(Cell::Null);
                    stack.push(eval_unop(*op, &v));
                }
                Instr::Call(name, argc) => {
                    let start = stack.len().saturating_sub(*argc);
                    let args: Vec<Cell> = stack.split_off(start);
                    let f = ctx.udfs.get(name).ok_or_else(|| PoseidonError::UdfNotFound(name.clone()))?;
                    stack.push(f(&args));
                }
            }
        }
        Ok(stack.pop().unwrap_or(Cell::Null))
    }
}

fn fold_nonfatal(err: PoseidonError) -> Result<Option<PropValue>> {
    if err.is_fatal() {
        Err(err)
    } else {
        Ok(None)
    }
}

fn eval_binop(op: BinOp, lhs: &Cell, rhs: &Cell) -> Cell {
    match op {
        BinOp::And => Cell::Bool(lhs.is_truthy() && rhs.is_truthy()),
        BinOp::Or => Cell::Bool(lhs.is_truthy() || rhs.is_truthy()),
        BinOp::Eq => Cell::Bool(lhs == rhs),
        BinOp::Ne => Cell::Bool(lhs != rhs),
        BinOp::Lt => cmp(lhs, rhs).map(|o| o.is_lt()).map(Cell::Bool).unwrap_or(Cell::Null),
        BinOp::Le => cmp(lhs, rhs).map(|o| o.is_le()).map(Cell::Bool).unwrap_or(Cell::Null),
        BinOp::Gt => cmp(lhs, rhs).map(|o| o.is_gt()).map(Cell::Bool).unwrap_or(Cell::Null),
        BinOp::Ge => cmp(lhs, rhs).map(|o| o.is_ge()).map(Cell::Bool).unwrap_or(Cell::Null),
        BinOp::Add => match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => numeric_result(lhs, rhs, a + b),
            _ => Cell::Null,
        },
        BinOp::Sub => match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => numeric_result(lhs, rhs, a - b),
            _ => Cell::Null,
        },
    }
}

fn numeric_result(lhs: &Cell, rhs: &Cell, v: f64) -> Cell {
    if matches!(lhs, Cell::Double(_)) || matches!(rhs, Cell::Double(_)) {
        Cell::Double(v)
    } else {
        Cell::Int(v as i64)
    }
}

fn eval_unop(op: UnOp, v: &Cell) -> Cell {
    match op {
        UnOp::Not => Cell::Bool(!v.is_truthy()),
        UnOp::Neg => match v {
            Cell::Int(i) => Cell::Int(-i),
            Cell::Double(d) => Cell::Double(-d),
            _ => Cell::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_comparison() {
        let expr = Expr::BinOp(
            BinOp::Gt,
            Box::new(Expr::BinOp(BinOp::Add, Box::new(Expr::Lit(Cell::Int(2))), Box::new(Expr::Lit(Cell::Int(3))))),
            Box::new(Expr::Lit(Cell::Int(4))),
        );
        let program = compile(&expr);
        let udfs = rustc_hash::FxHashMap::default();
        // No store access needed for this expression; build a throwaway ctx
        // is infeasible without a GraphStore, so test arithmetic without it
        // by asserting purely on the instruction list shape instead.
        assert_eq!(program.instrs.len(), 4);
        let _ = udfs;
    }

    #[test]
    fn truthiness_matches_null_and_false_only() {
        assert!(!Cell::Null.is_truthy());
        assert!(!Cell::Bool(false).is_truthy());
        assert!(Cell::Bool(true).is_truthy());
        assert!(Cell::Int(0).is_truthy());
    }
}
