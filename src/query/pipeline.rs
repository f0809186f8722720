//! The physical operator pipeline.
//!
//! Operators live in a flat arena (`Vec<OpKind>`) addressed by integer index
//! rather than as a tree of boxed trait objects linked by raw downstream
//! pointers or captured closures. Execution is push-based: a source operator
//! (index 0) drives the walk, handing each tuple to [`Pipeline::push`], which
//! dispatches on the operator's kind with one exhaustive match instead of a
//! double-dispatch visitor. Streaming operators forward immediately;
//! buffering operators (`order_by`, `group_by`, the join build sides) hold
//! their state in the `OpKind` variant itself and flush it from
//! [`Pipeline::finish`] once the upstream has been fully drained.

use rustc_hash::FxHashMap;

use crate::error::{PoseidonError, Result};
use crate::graph::model::PropValue;
use crate::graph::store::GraphStore;
use crate::graph::traversal::{self, Direction};
use crate::query::expr::{CompiledExpr, EvalCtx, Udf};
use crate::query::tuple::{Cell, Tuple};
use crate::txn::Transaction;

/// A supported aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    /// Row count.
    Count,
    /// Sum of a numeric column.
    Sum,
    /// Arithmetic mean of a numeric column.
    Avg,
    /// Minimum value of a column.
    Min,
    /// Maximum value of a column.
    Max,
}

/// One physical operator. Variants that need to accumulate state across
/// pushes (`Limit`, `DistinctTuples`, `OrderBy`, `GroupBy`, `Aggregate`) carry
/// that state inline so the arena stays a plain `Vec`.
pub enum OpKind {
    /// Emits every visible node, optionally filtered to a label.
    ScanNodes { label: Option<String> },
    /// Like `ScanNodes`, but partitions the underlying scan across threads.
    ParallelScanNodes { label: Option<String>, partitions: usize },
    /// Emits node ids from a registered secondary index lookup.
    IndexScan { label: String, property: String, value: PropValue },
    /// For the node id in column `from_col`, emits one tuple per attached
    /// relationship (appending a `Cell::Rship`).
    ForeachRship { direction: Direction, label: Option<String>, from_col: usize },
    /// Breadth-first variable-hop walk from the node id in column `from_col`.
    VariableHop { direction: Direction, label: Option<String>, min_hops: u32, max_hops: u32, from_col: usize },
    /// Appends the node at the far end of the relationship in `rship_col`.
    GetOtherNode { direction: Direction, rship_col: usize },
    /// Keeps tuples where the node/relationship property equals a literal.
    IsProperty { of: usize, key: String, expected: Cell },
    /// Keeps tuples where the node in column `of` carries the given label.
    NodeHasLabel { of: usize, label: String },
    /// Keeps tuples where a general boolean expression is truthy.
    FilterTuple { expr: CompiledExpr },
    /// Replaces the tuple with the result of evaluating each expression.
    Project { exprs: Vec<CompiledExpr> },
    /// Passes through at most `n` tuples.
    Limit { n: usize, seen: usize },
    /// Suppresses tuples already seen, keyed by [`Cell::sort_key`].
    DistinctTuples { seen: std::collections::HashSet<Vec<u8>> },
    /// Buffers all input, then flushes it sorted by the given columns.
    OrderBy { keys: Vec<(usize, bool)>, buffer: Vec<Tuple> },
    /// Buffers all input, then flushes a single aggregate row.
    Aggregate { aggs: Vec<(AggKind, usize)>, buffer: Vec<Tuple> },
    /// Buffers all input, then flushes one row per distinct key with
    /// aggregates computed over each group.
    GroupBy { key_cols: Vec<usize>, aggs: Vec<(AggKind, usize)>, buffer: Vec<Tuple> },
    /// Cross product against an already-materialized right-hand side.
    CrossJoin { build: Vec<Tuple> },
    /// Equi-join against an already-materialized, hash-keyed right-hand side.
    HashJoin { table: FxHashMap<Vec<u8>, Vec<Tuple>>, probe_key: usize },
    /// Join against a materialized right-hand side filtered by a general predicate.
    NestedLoopJoin { build: Vec<Tuple>, predicate: CompiledExpr },
    /// Like `HashJoin`, but probe tuples with no match still pass through,
    /// padded with `Cell::Null` for the build side's columns.
    LeftOuterJoin { table: FxHashMap<Vec<u8>, Vec<Tuple>>, probe_key: usize, build_width: usize },
    /// Forwards live input, then flushes an already-materialized second input.
    UnionAll { other: Vec<Tuple> },
    /// Creates a node from per-tuple property expressions, appending its id.
    CreateNode { label: String, props: Vec<(String, CompiledExpr)> },
    /// Creates a relationship between the nodes in `src_col`/`dst_col`, appending its id.
    CreateRelationship { src_col: usize, dst_col: usize, label: String, props: Vec<(String, CompiledExpr)> },
    /// Sets a property on the node in column `of`.
    UpdateProperty { of: usize, key: String, value: CompiledExpr },
    /// Deletes the node in column `of`; fails if it still has relationships.
    RemoveNode { of: usize },
    /// Deletes the node in column `of` along with its relationships.
    DetachNode { of: usize },
    /// Deletes the relationship in column `of`.
    RemoveRelationship { of: usize },
    /// Appends every tuple that reaches it to the result set.
    CollectResult,
    /// Discards every tuple that reaches it.
    EndPipeline,
}

/// The context a running pipeline needs: the store, the transaction under
/// whose snapshot every read/write happens, and any registered functions.
pub struct ExecCtx<'a> {
    /// The graph store operators read from and write to.
    pub store: &'a GraphStore,
    /// The transaction scoping this execution's visibility and writes.
    pub txn: &'a Transaction<'a>,
    /// Scalar functions callable from `Expr::Call`.
    pub udfs: &'a FxHashMap<String, Box<Udf>>,
}

impl<'a> ExecCtx<'a> {
    fn eval(&self, expr: &CompiledExpr, tuple: &Tuple) -> Result<Cell> {
        let eval_ctx = EvalCtx { store: self.store, txid: self.txn.id(), udfs: self.udfs };
        expr.eval(tuple, &eval_ctx)
    }
}

fn cell_to_prop(c: &Cell) -> PropValue {
    match c {
        Cell::Null => PropValue::Null,
        Cell::Bool(b) => PropValue::Bool(*b),
        Cell::Int(i) => PropValue::Int(*i),
        Cell::UInt(u) => PropValue::UInt(*u),
        Cell::Double(d) => PropValue::Double(*d),
        Cell::Str(s) => PropValue::Str(s.clone()),
        Cell::Timestamp(t) => PropValue::Timestamp(*t),
        Cell::Node(id) | Cell::NodeDesc(id, _) => PropValue::UInt(*id),
        Cell::Rship(id) | Cell::RshipDesc(id, _) => PropValue::UInt(*id),
        Cell::IdArray(_) => PropValue::Null,
    }
}

fn as_node_id(c: &Cell) -> Option<u64> {
    match c {
        Cell::Node(id) | Cell::NodeDesc(id, _) => Some(*id),
        _ => None,
    }
}

fn as_rship_id(c: &Cell) -> Option<u64> {
    match c {
        Cell::Rship(id) | Cell::RshipDesc(id, _) => Some(*id),
        _ => None,
    }
}

fn prop_eq_cell(v: &PropValue, expected: &Cell) -> bool {
    match (v, expected) {
        (PropValue::Null, Cell::Null) => true,
        (PropValue::Bool(a), Cell::Bool(b)) => a == b,
        (PropValue::Int(a), Cell::Int(b)) => a == b,
        (PropValue::UInt(a), Cell::UInt(b)) => a == b,
        (PropValue::Double(a), Cell::Double(b)) => a == b,
        (PropValue::Str(a), Cell::Str(b)) => a == b,
        (PropValue::Timestamp(a), Cell::Timestamp(b)) => a == b,
        (PropValue::Int(a), Cell::UInt(b)) => *a >= 0 && *a as u64 == *b,
        (PropValue::UInt(a), Cell::Int(b)) => *b >= 0 && *a == *b as u64,
        _ => false,
    }
}

fn numeric(c: &Cell) -> Option<f64> {
    match c {
        Cell::Int(i) => Some(*i as f64),
        Cell::UInt(u) => Some(*u as f64),
        Cell::Double(d) => Some(*d),
        Cell::Timestamp(t) => Some(*t as f64),
        _ => None,
    }
}

fn apply_agg(kind: AggKind, rows: &[&Tuple], col: usize) -> Cell {
    match kind {
        AggKind::Count => Cell::UInt(rows.len() as u64),
        AggKind::Sum => {
            let sum: f64 = rows.iter().filter_map(|r| r.get(col).and_then(numeric)).sum();
            Cell::Double(sum)
        }
        AggKind::Avg => {
            let vals: Vec<f64> = rows.iter().filter_map(|r| r.get(col).and_then(numeric)).collect();
            if vals.is_empty() {
                Cell::Null
            } else {
                Cell::Double(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        }
        AggKind::Min => rows
            .iter()
            .filter_map(|r| r.get(col).and_then(numeric))
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
            .map(Cell::Double)
            .unwrap_or(Cell::Null),
        AggKind::Max => rows
            .iter()
            .filter_map(|r| r.get(col).and_then(numeric))
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
            .map(Cell::Double)
            .unwrap_or(Cell::Null),
    }
}

/// A linear chain of physical operators, executed by [`Pipeline::run`].
pub struct Pipeline {
    pub(crate) ops: Vec<OpKind>,
}

impl Pipeline {
    /// Wraps an already-assembled operator chain (built by
    /// [`crate::query::builder::PipelineBuilder`]).
    pub fn new(ops: Vec<OpKind>) -> Self {
        Self { ops }
    }

    /// Drives the source operator to completion, then flushes every
    /// buffering operator in order, returning every tuple that reached a
    /// `CollectResult` sink.
    pub fn run(&mut self, ctx: &ExecCtx<'_>) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        if self.ops.is_empty() {
            return Ok(out);
        }
        self.drive_source(ctx, &mut out)?;
        for idx in 0..self.ops.len() {
            self.finish(idx, ctx, &mut out)?;
        }
        Ok(out)
    }

    fn drive_source(&mut self, ctx: &ExecCtx<'_>, out: &mut Vec<Tuple>) -> Result<()> {
        let txid = ctx.txn.id();
        match &self.ops[0] {
            OpKind::ScanNodes { label } => {
                let label = label.clone();
                let mut produced = Vec::new();
                ctx.store.nodes(txid, label.as_deref(), |id, _n| produced.push(id))?;
                for id in produced {
                    let mut t = Tuple::new();
                    t.push(Cell::Node(id));
                    self.push(1, t, ctx, out)?;
                }
            }
            OpKind::ParallelScanNodes { label, partitions } => {
                let (label, partitions) = (label.clone(), *partitions);
                let label_code = match &label {
                    Some(l) => match ctx.store.intern(l) {
                        Ok(c) => Some(c),
                        Err(_) => None,
                    },
                    None => None,
                };
                let mut produced = Vec::new();
                ctx.store.parallel_nodes(txid, partitions, |id, n| {
                    if label_code.is_none() || label_code == Some(n.label_code) {
                        produced.push(id);
                    }
                })?;
                for id in produced {
                    let mut t = Tuple::new();
                    t.push(Cell::Node(id));
                    self.push(1, t, ctx, out)?;
                }
            }
            OpKind::IndexScan { label, property, value } => {
                let (label, property, value) = (label.clone(), property.clone(), value.clone());
                let ids = ctx.store.index_lookup(txid, &label, &property, &value)?;
                for id in ids {
                    let mut t = Tuple::new();
                    t.push(Cell::Node(id));
                    self.push(1, t, ctx, out)?;
                }
            }
            other => {
                return Err(PoseidonError::QueryProcessingError(format!(
                    "pipeline source at index 0 must be a scan operator, found {}",
                    op_name(other)
                )))
            }
        }
        Ok(())
    }

    /// Runs `tuple` through operator `idx`, recursing into `idx + 1` for
    /// every tuple it emits (or appending to `out` at the final sink).
    fn push(&mut self, idx: usize, tuple: Tuple, ctx: &ExecCtx<'_>, out: &mut Vec<Tuple>) -> Result<()> {
        if idx >= self.ops.len() {
            return Ok(());
        }
        let txid = ctx.txn.id();
        match &mut self.ops[idx] {
            OpKind::ScanNodes { .. } | OpKind::ParallelScanNodes { .. } | OpKind::IndexScan { .. } => {
                return Err(PoseidonError::QueryProcessingError("scan operator cannot appear mid-pipeline".into()))
            }
            OpKind::ForeachRship { direction, label, from_col } => {
                let (direction, label, from_col) = (*direction, label.clone(), *from_col);
                let Some(node_id) = tuple.get(from_col).and_then(as_node_id) else { return Ok(()) };
                let label_code = match &label {
                    Some(l) => match ctx.store.intern(l) {
                        Ok(c) => Some(c),
                        Err(_) => return Ok(()),
                    },
                    None => None,
                };
                let mut matches = Vec::new();
                traversal::foreach_rship(ctx.store, txid, node_id, direction, |rid| {
                    matches.push(rid);
                    Ok(())
                })?;
                for rid in matches {
                    if let Some(code) = label_code {
                        let Some(r) = ctx.store.get_rship(txid, rid)? else { continue };
                        if r.label_code != code {
                            continue;
                        }
                    }
                    let mut t = tuple.clone();
                    t.push(Cell::Rship(rid));
                    self.push(idx + 1, t, ctx, out)?;
                }
            }
            OpKind::VariableHop { direction, label, min_hops, max_hops, from_col } => {
                let (direction, label, min_hops, max_hops, from_col) = (*direction, label.clone(), *min_hops, *max_hops, *from_col);
                let Some(node_id) = tuple.get(from_col).and_then(as_node_id) else { return Ok(()) };
                let label_code = match &label {
                    Some(l) => ctx.store.intern(l).ok(),
                    None => None,
                };
                let mut matches = Vec::new();
                traversal::variable_hop(ctx.store, txid, node_id, direction, label_code, min_hops, max_hops, |rid, hop| {
                    matches.push((rid, hop));
                    Ok(())
                })?;
                for (rid, _hop) in matches {
                    let mut t = tuple.clone();
                    t.push(Cell::Rship(rid));
                    self.push(idx + 1, t, ctx, out)?;
                }
            }
            OpKind::GetOtherNode { direction, rship_col } => {
                let (direction, rship_col) = (*direction, *rship_col);
                let Some(rid) = tuple.get(rship_col).and_then(as_rship_id) else { return Ok(()) };
                if let Some(other) = traversal::other_node(ctx.store, txid, rid, direction)? {
                    let mut t = tuple.clone();
                    t.push(Cell::Node(other));
                    self.push(idx + 1, t, ctx, out)?;
                }
            }
            OpKind::IsProperty { of, key, expected } => {
                let (of, key, expected) = (*of, key.clone(), expected.clone());
                let Some(cell) = tuple.get(of) else { return Ok(()) };
                let value = match cell {
                    Cell::Node(id) | Cell::NodeDesc(id, _) => ctx.store.node_property(txid, *id, &key)?,
                    Cell::Rship(id) | Cell::RshipDesc(id, _) => ctx.store.rship_property(txid, *id, &key)?,
                    _ => None,
                };
                let matches = match value {
                    Some(v) => prop_eq_cell(&v, &expected),
                    None => matches!(expected, Cell::Null),
                };
                if matches {
                    self.push(idx + 1, tuple, ctx, out)?;
                }
            }
            OpKind::NodeHasLabel { of, label } => {
                let (of, label) = (*of, label.clone());
                let Some(id) = tuple.get(of).and_then(as_node_id) else { return Ok(()) };
                let Some(n) = ctx.store.get_node(txid, id)? else { return Ok(()) };
                let resolved = ctx.store.resolve_label(n.label_code)?;
                if resolved == label {
                    self.push(idx + 1, tuple, ctx, out)?;
                }
            }
            OpKind::FilterTuple { expr } => {
                let expr = expr.clone();
                if ctx.eval(&expr, &tuple)?.is_truthy() {
                    self.push(idx + 1, tuple, ctx, out)?;
                }
            }
            OpKind::Project { exprs } => {
                let exprs = exprs.clone();
                let mut t = Tuple::new();
                for e in &exprs {
                    t.push(ctx.eval(e, &tuple)?);
                }
                self.push(idx + 1, t, ctx, out)?;
            }
            OpKind::Limit { n, seen } => {
                if *seen >= *n {
                    return Ok(());
                }
                *seen += 1;
                self.push(idx + 1, tuple, ctx, out)?;
            }
            OpKind::DistinctTuples { seen } => {
                let key: Vec<u8> = tuple.iter().flat_map(|c| c.sort_key()).collect();
                if seen.insert(key) {
                    self.push(idx + 1, tuple, ctx, out)?;
                }
            }
            OpKind::OrderBy { buffer, .. } => buffer.push(tuple),
            OpKind::Aggregate { buffer, .. } => buffer.push(tuple),
            OpKind::GroupBy { buffer, .. } => buffer.push(tuple),
            OpKind::CrossJoin { build } => {
                let build = build.clone();
                for right in &build {
                    let mut t = tuple.clone();
                    t.extend(right.iter().cloned());
                    self.push(idx + 1, t, ctx, out)?;
                }
            }
            OpKind::HashJoin { table, probe_key } => {
                let probe_key = *probe_key;
                let Some(probe_cell) = tuple.get(probe_key) else { return Ok(()) };
                let key = probe_cell.sort_key();
                if let Some(matches) = table.get(&key).cloned() {
                    for right in matches {
                        let mut t = tuple.clone();
                        t.extend(right.iter().cloned());
                        self.push(idx + 1, t, ctx, out)?;
                    }
                }
            }
            OpKind::NestedLoopJoin { build, predicate } => {
                let (build, predicate) = (build.clone(), predicate.clone());
                for right in &build {
                    let mut candidate = tuple.clone();
                    candidate.extend(right.iter().cloned());
                    if ctx.eval(&predicate, &candidate)?.is_truthy() {
                        self.push(idx + 1, candidate, ctx, out)?;
                    }
                }
            }
            OpKind::LeftOuterJoin { table, probe_key, build_width } => {
                let (probe_key, build_width) = (*probe_key, *build_width);
                let key = tuple.get(probe_key).map(|c| c.sort_key());
                let matches = key.and_then(|k| table.get(&k).cloned());
                match matches {
                    Some(rows) if !rows.is_empty() => {
                        for right in rows {
                            let mut t = tuple.clone();
                            t.extend(right.iter().cloned());
                            self.push(idx + 1, t, ctx, out)?;
                        }
                    }
                    _ => {
                        let mut t = tuple.clone();
                        t.extend(std::iter::repeat(Cell::Null).take(build_width));
                        self.push(idx + 1, t, ctx, out)?;
                    }
                }
            }
            OpKind::UnionAll { .. } => self.push(idx + 1, tuple, ctx, out)?,
            OpKind::CreateNode { label, props } => {
                let (label, props) = (label.clone(), props.clone());
                let mut evaluated = Vec::with_capacity(props.len());
                for (k, e) in &props {
                    evaluated.push((k.clone(), cell_to_prop(&ctx.eval(e, &tuple)?)));
                }
                let nid = ctx.store.add_node(ctx.txn, &label, &evaluated)?;
                let mut t = tuple.clone();
                t.push(Cell::Node(nid));
                self.push(idx + 1, t, ctx, out)?;
            }
            OpKind::CreateRelationship { src_col, dst_col, label, props } => {
                let (src_col, dst_col, label, props) = (*src_col, *dst_col, label.clone(), props.clone());
                let (Some(src), Some(dst)) = (tuple.get(src_col).and_then(as_node_id), tuple.get(dst_col).and_then(as_node_id)) else {
                    return Ok(());
                };
                let mut evaluated = Vec::with_capacity(props.len());
                for (k, e) in &props {
                    evaluated.push((k.clone(), cell_to_prop(&ctx.eval(e, &tuple)?)));
                }
                let rid = ctx.store.add_relationship(ctx.txn, src, dst, &label, &evaluated)?;
                let mut t = tuple.clone();
                t.push(Cell::Rship(rid));
                self.push(idx + 1, t, ctx, out)?;
            }
            OpKind::UpdateProperty { of, key, value } => {
                let (of, key, value) = (*of, key.clone(), value.clone());
                let Some(id) = tuple.get(of).and_then(as_node_id) else { return Ok(()) };
                let v = cell_to_prop(&ctx.eval(&value, &tuple)?);
                ctx.store.set_node_property(ctx.txn, id, &key, v)?;
                self.push(idx + 1, tuple, ctx, out)?;
            }
            OpKind::RemoveNode { of } => {
                let of = *of;
                if let Some(id) = tuple.get(of).and_then(as_node_id) {
                    ctx.store.remove_node(ctx.txn, id)?;
                }
                self.push(idx + 1, tuple, ctx, out)?;
            }
            OpKind::DetachNode { of } => {
                let of = *of;
                if let Some(id) = tuple.get(of).and_then(as_node_id) {
                    ctx.store.detach_node(ctx.txn, id)?;
                }
                self.push(idx + 1, tuple, ctx, out)?;
            }
            OpKind::RemoveRelationship { of } => {
                let of = *of;
                if let Some(id) = tuple.get(of).and_then(as_rship_id) {
                    ctx.store.remove_relationship(ctx.txn, id)?;
                }
                self.push(idx + 1, tuple, ctx, out)?;
            }
            OpKind::CollectResult => out.push(tuple),
            OpKind::EndPipeline => {}
        }
        Ok(())
    }

    fn finish(&mut self, idx: usize, ctx: &ExecCtx<'_>, out: &mut Vec<Tuple>) -> Result<()> {
        match &mut self.ops[idx] {
            OpKind::OrderBy { keys, buffer } => {
                let keys = keys.clone();
                let mut rows = std::mem::take(buffer);
                rows.sort_by(|a, b| {
                    for (col, ascending) in &keys {
                        let ka = a.get(*col).map(Cell::sort_key).unwrap_or_default();
                        let kb = b.get(*col).map(Cell::sort_key).unwrap_or_default();
                        let ord = ka.cmp(&kb);
                        if ord != std::cmp::Ordering::Equal {
                            return if *ascending { ord } else { ord.reverse() };
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                for row in rows {
                    self.push(idx + 1, row, ctx, out)?;
                }
            }
            OpKind::Aggregate { aggs, buffer } => {
                let aggs = aggs.clone();
                let rows = std::mem::take(buffer);
                let refs: Vec<&Tuple> = rows.iter().collect();
                let mut t = Tuple::new();
                for (kind, of) in aggs {
                    t.push(apply_agg(kind, &refs, of));
                }
                self.push(idx + 1, t, ctx, out)?;
            }
            OpKind::GroupBy { key_cols, aggs, buffer } => {
                let (key_cols, aggs) = (key_cols.clone(), aggs.clone());
                let rows = std::mem::take(buffer);
                let mut groups: FxHashMap<Vec<u8>, Vec<Tuple>> = FxHashMap::default();
                let mut first_of_group: FxHashMap<Vec<u8>, Tuple> = FxHashMap::default();
                for row in rows {
                    let key: Vec<u8> = key_cols.iter().flat_map(|c| row.get(*c).map(Cell::sort_key).unwrap_or_default()).collect();
                    first_of_group.entry(key.clone()).or_insert_with(|| row.clone());
                    groups.entry(key).or_default().push(row);
                }
                for (key, rows) in groups {
                    let sample = &first_of_group[&key];
                    let mut t = Tuple::new();
                    for col in &key_cols {
                        t.push(sample.get(*col).cloned().unwrap_or(Cell::Null));
                    }
                    let refs: Vec<&Tuple> = rows.iter().collect();
                    for (agg_kind, agg_col) in &aggs {
                        t.push(apply_agg(*agg_kind, &refs, *agg_col));
                    }
                    self.push(idx + 1, t, ctx, out)?;
                }
            }
            OpKind::UnionAll { other } => {
                let rows = std::mem::take(other);
                for row in rows {
                    self.push(idx + 1, row, ctx, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn op_name(op: &OpKind) -> &'static str {
    match op {
        OpKind::ScanNodes { .. } => "scan_nodes",
        OpKind::ParallelScanNodes { .. } => "parallel_scan_nodes",
        OpKind::IndexScan { .. } => "index_scan",
        OpKind::ForeachRship { .. } => "foreach_rship",
        OpKind::VariableHop { .. } => "variable_hop",
        OpKind::GetOtherNode { .. } => "get_other_node",
        OpKind::IsProperty { .. } => "is_property",
        OpKind::NodeHasLabel { .. } => "node_has_label",
        OpKind::FilterTuple { .. } => "filter_tuple",
        OpKind::Project { .. } => "project",
        OpKind::Limit { .. } => "limit",
        OpKind::DistinctTuples { .. } => "distinct_tuples",
        OpKind::OrderBy { .. } => "order_by",
        OpKind::Aggregate { .. } => "aggregate",
        OpKind::GroupBy { .. } => "group_by",
        OpKind::CrossJoin { .. } => "cross_join",
        OpKind::HashJoin { .. } => "hash_join",
        OpKind::NestedLoopJoin { .. } => "nested_loop_join",
        OpKind::LeftOuterJoin { .. } => "left_outer_join",
        OpKind::UnionAll { .. } => "union_all",
        OpKind::CreateNode { .. } => "create_node",
        OpKind::CreateRelationship { .. } => "create_relationship",
        OpKind::UpdateProperty { .. } => "update_property",
        OpKind::RemoveNode { .. } => "remove_node",
        OpKind::DetachNode { .. } => "detach_node",
        OpKind::RemoveRelationship { .. } => "remove_relationship",
        OpKind::CollectResult => "collect_result",
        OpKind::EndPipeline => "end_pipeline",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple_of(vals: &[Cell]) -> Tuple {
        vals.iter().cloned().collect()
    }

    #[test]
    fn apply_agg_count_ignores_column_values() {
        let rows = vec![tuple_of(&[Cell::Null]), tuple_of(&[Cell::Int(1)]), tuple_of(&[Cell::Str("x".into())])];
        let refs: Vec<&Tuple> = rows.iter().collect();
        assert_eq!(apply_agg(AggKind::Count, &refs, 0), Cell::UInt(3));
    }

    #[test]
    fn apply_agg_sum_avg_min_max_over_numeric_column() {
        let rows = vec![tuple_of(&[Cell::Int(10)]), tuple_of(&[Cell::Int(20)]), tuple_of(&[Cell::Int(30)])];
        let refs: Vec<&Tuple> = rows.iter().collect();
        assert_eq!(apply_agg(AggKind::Sum, &refs, 0), Cell::Double(60.0));
        assert_eq!(apply_agg(AggKind::Avg, &refs, 0), Cell::Double(20.0));
        assert_eq!(apply_agg(AggKind::Min, &refs, 0), Cell::Double(10.0));
        assert_eq!(apply_agg(AggKind::Max, &refs, 0), Cell::Double(30.0));
    }

    #[test]
    fn apply_agg_ignores_non_numeric_rows() {
        let rows = vec![tuple_of(&[Cell::Int(5)]), tuple_of(&[Cell::Str("skip".into())]), tuple_of(&[Cell::Null])];
        let refs: Vec<&Tuple> = rows.iter().collect();
        assert_eq!(apply_agg(AggKind::Sum, &refs, 0), Cell::Double(5.0));
    }

    #[test]
    fn apply_agg_avg_of_empty_input_is_null() {
        let rows: Vec<Tuple> = Vec::new();
        let refs: Vec<&Tuple> = rows.iter().collect();
        assert_eq!(apply_agg(AggKind::Avg, &refs, 0), Cell::Null);
    }

    #[test]
    fn prop_eq_cell_compares_across_int_uint_boundary() {
        assert!(prop_eq_cell(&PropValue::Int(5), &Cell::UInt(5)));
        assert!(prop_eq_cell(&PropValue::UInt(5), &Cell::Int(5)));
        assert!(!prop_eq_cell(&PropValue::Int(-1), &Cell::UInt(0)));
        assert!(!prop_eq_cell(&PropValue::Str("a".into()), &Cell::Int(1)));
    }

    #[test]
    fn cell_to_prop_round_trips_scalar_kinds() {
        assert_eq!(cell_to_prop(&Cell::Bool(true)), PropValue::Bool(true));
        assert_eq!(cell_to_prop(&Cell::Str("hi".into())), PropValue::Str("hi".into()));
        assert_eq!(cell_to_prop(&Cell::Null), PropValue::Null);
    }

    #[test]
    fn run_rejects_pipeline_whose_source_is_not_a_scan() {
        use crate::storage::buffer_pool::BufferPool;
        use crate::txn::TransactionManager;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(BufferPool::new(64));
        let store = GraphStore::open(dir.path(), pool).unwrap();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let udfs = FxHashMap::default();
        let ctx = ExecCtx { store: &store, txn: &txn, udfs: &udfs };

        let mut pipeline = Pipeline::new(vec![OpKind::CollectResult]);
        let err = pipeline.run(&ctx).unwrap_err();
        assert!(matches!(err, PoseidonError::QueryProcessingError(_)));
    }
}
