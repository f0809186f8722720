//! A fluent builder assembling a [`Pipeline`] operator by operator.
//!
//! Each method appends one [`OpKind`] to the arena and returns `self`, so a
//! query reads as a chain: `builder.scan_nodes(...).filter_tuple(...).project(...)`.
//! Join operators materialize their right-hand side immediately (running a
//! caller-supplied sub-[`Pipeline`] to completion) since the main chain stays
//! a simple linear push pipeline.

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::graph::model::PropValue;
use crate::graph::traversal::Direction;
use crate::query::expr::{compile, Expr};
use crate::query::pipeline::{AggKind, ExecCtx, OpKind, Pipeline};
use crate::query::tuple::{Cell, Tuple};

/// Incrementally builds a [`Pipeline`]'s operator arena.
#[derive(Default)]
pub struct PipelineBuilder {
    ops: Vec<OpKind>,
}

impl PipelineBuilder {
    /// Starts an empty pipeline.
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Source: every visible node, optionally filtered to `label`.
    pub fn scan_nodes(mut self, label: Option<&str>) -> Self {
        self.ops.push(OpKind::ScanNodes { label: label.map(String::from) });
        self
    }

    /// Source: every visible node, scanned across `partitions` threads.
    pub fn parallel_scan_nodes(mut self, label: Option<&str>, partitions: usize) -> Self {
        self.ops.push(OpKind::ParallelScanNodes { label: label.map(String::from), partitions });
        self
    }

    /// Source: node ids from a registered secondary index lookup.
    pub fn index_scan(mut self, label: &str, property: &str, value: PropValue) -> Self {
        self.ops.push(OpKind::IndexScan { label: label.into(), property: property.into(), value });
        self
    }

    /// Expands each tuple by one relationship per outgoing edge of the node
    /// in column `from_col`.
    pub fn foreach_from_rship(mut self, from_col: usize, label: Option<&str>) -> Self {
        self.ops.push(OpKind::ForeachRship { direction: Direction::Outgoing, label: label.map(String::from), from_col });
        self
    }

    /// Expands each tuple by one relationship per incoming edge of the node
    /// in column `from_col`.
    pub fn foreach_to_rship(mut self, from_col: usize, label: Option<&str>) -> Self {
        self.ops.push(OpKind::ForeachRship { direction: Direction::Incoming, label: label.map(String::from), from_col });
        self
    }

    /// Expands each tuple by one relationship per edge, outgoing or incoming,
    /// of the node in column `from_col`.
    pub fn foreach_all_rship(mut self, from_col: usize, label: Option<&str>) -> Self {
        self.ops.push(OpKind::ForeachRship { direction: Direction::Both, label: label.map(String::from), from_col });
        self
    }

    /// Breadth-first variable-hop expansion over outgoing edges.
    pub fn variable_hop_from(mut self, from_col: usize, label: Option<&str>, min_hops: u32, max_hops: u32) -> Self {
        self.ops.push(OpKind::VariableHop {
            direction: Direction::Outgoing,
            label: label.map(String::from),
            min_hops,
            max_hops,
            from_col,
        });
        self
    }

    /// Breadth-first variable-hop expansion over incoming edges.
    pub fn variable_hop_to(mut self, from_col: usize, label: Option<&str>, min_hops: u32, max_hops: u32) -> Self {
        self.ops.push(OpKind::VariableHop {
            direction: Direction::Incoming,
            label: label.map(String::from),
            min_hops,
            max_hops,
            from_col,
        });
        self
    }

    /// Appends the destination node of the relationship in `rship_col`.
    pub fn get_to_node(mut self, rship_col: usize) -> Self {
        self.ops.push(OpKind::GetOtherNode { direction: Direction::Outgoing, rship_col });
        self
    }

    /// Appends the source node of the relationship in `rship_col`.
    pub fn get_from_node(mut self, rship_col: usize) -> Self {
        self.ops.push(OpKind::GetOtherNode { direction: Direction::Incoming, rship_col });
        self
    }

    /// Keeps tuples where the node/relationship in column `of` has `key` equal to `expected`.
    pub fn is_property(mut self, of: usize, key: &str, expected: Cell) -> Self {
        self.ops.push(OpKind::IsProperty { of, key: key.into(), expected });
        self
    }

    /// Keeps tuples where the node in column `of` carries `label`.
    pub fn node_has_label(mut self, of: usize, label: &str) -> Self {
        self.ops.push(OpKind::NodeHasLabel { of, label: label.into() });
        self
    }

    /// Keeps tuples where `expr` evaluates truthy.
    pub fn filter_tuple(mut self, expr: &Expr) -> Self {
        self.ops.push(OpKind::FilterTuple { expr: compile(expr) });
        self
    }

    /// Replaces each tuple with the evaluation of `exprs`.
    pub fn project(mut self, exprs: &[Expr]) -> Self {
        self.ops.push(OpKind::Project { exprs: exprs.iter().map(compile).collect() });
        self
    }

    /// Passes through at most `n` tuples.
    pub fn limit(mut self, n: usize) -> Self {
        self.ops.push(OpKind::Limit { n, seen: 0 });
        self
    }

    /// Suppresses duplicate tuples.
    pub fn distinct_tuples(mut self) -> Self {
        self.ops.push(OpKind::DistinctTuples { seen: std::collections::HashSet::new() });
        self
    }

    /// Buffers all input, flushing it sorted by `keys` (column, ascending).
    pub fn order_by(mut self, keys: Vec<(usize, bool)>) -> Self {
        self.ops.push(OpKind::OrderBy { keys, buffer: Vec::new() });
        self
    }

    /// Buffers all input, flushing a single tuple carrying one cell per
    /// requested `(aggregate, column)` pair, ungrouped.
    pub fn aggregate(mut self, aggs: Vec<(AggKind, usize)>) -> Self {
        self.ops.push(OpKind::Aggregate { aggs, buffer: Vec::new() });
        self
    }

    /// Buffers all input, flushing one row per distinct value of `key_cols`
    /// with `aggs` computed per group.
    pub fn group_by(mut self, key_cols: Vec<usize>, aggs: Vec<(AggKind, usize)>) -> Self {
        self.ops.push(OpKind::GroupBy { key_cols, aggs, buffer: Vec::new() });
        self
    }

    /// Cross product against `right`, an already-materialized result set.
    pub fn cross_join(mut self, right: Vec<Tuple>) -> Self {
        self.ops.push(OpKind::CrossJoin { build: right });
        self
    }

    /// Equi-join against `right`, keyed by `build_key` on the right and
    /// `probe_key` on the left.
    pub fn hash_join(mut self, right: Vec<Tuple>, build_key: usize, probe_key: usize) -> Self {
        let table = build_hash_table(&right, build_key);
        self.ops.push(OpKind::HashJoin { table, probe_key });
        self
    }

    /// Join against `right` filtered by a general predicate evaluated over
    /// the concatenated left-then-right tuple.
    pub fn nested_loop_join(mut self, right: Vec<Tuple>, predicate: &Expr) -> Self {
        self.ops.push(OpKind::NestedLoopJoin { build: right, predicate: compile(predicate) });
        self
    }

    /// Like [`Self::hash_join`], but unmatched probe tuples still pass
    /// through, padded with `Cell::Null` for the right side's columns.
    pub fn left_outer_join(mut self, right: Vec<Tuple>, build_key: usize, probe_key: usize, build_width: usize) -> Self {
        let table = build_hash_table(&right, build_key);
        self.ops.push(OpKind::LeftOuterJoin { table, probe_key, build_width });
        self
    }

    /// Forwards live input, then flushes `other`, an already-materialized result set.
    pub fn union_all(mut self, other: Vec<Tuple>) -> Self {
        self.ops.push(OpKind::UnionAll { other });
        self
    }

    /// Creates a node labelled `label` per tuple, appending its id. `props`
    /// pairs a property key with an expression evaluated against the input tuple.
    pub fn create_node(mut self, label: &str, props: Vec<(String, Expr)>) -> Self {
        self.ops.push(OpKind::CreateNode { label: label.into(), props: compile_props(props) });
        self
    }

    /// Creates a relationship between the nodes in `src_col`/`dst_col` per tuple.
    pub fn create_relationship(mut self, src_col: usize, dst_col: usize, label: &str, props: Vec<(String, Expr)>) -> Self {
        self.ops.push(OpKind::CreateRelationship {
            src_col,
            dst_col,
            label: label.into(),
            props: compile_props(props),
        });
        self
    }

    /// Sets property `key` on the node in column `of` to the evaluation of `value`.
    pub fn update_property(mut self, of: usize, key: &str, value: &Expr) -> Self {
        self.ops.push(OpKind::UpdateProperty { of, key: key.into(), value: compile(value) });
        self
    }

    /// Deletes the node in column `of`.
    pub fn remove_node(mut self, of: usize) -> Self {
        self.ops.push(OpKind::RemoveNode { of });
        self
    }

    /// Deletes the node in column `of` along with its relationships.
    pub fn detach_node(mut self, of: usize) -> Self {
        self.ops.push(OpKind::DetachNode { of });
        self
    }

    /// Deletes the relationship in column `of`.
    pub fn remove_relationship(mut self, of: usize) -> Self {
        self.ops.push(OpKind::RemoveRelationship { of });
        self
    }

    /// Sink: collect every tuple that reaches this point into the result set.
    pub fn collect_result(mut self) -> Self {
        self.ops.push(OpKind::CollectResult);
        self
    }

    /// Sink: discard every tuple that reaches this point.
    pub fn end_pipeline(mut self) -> Self {
        self.ops.push(OpKind::EndPipeline);
        self
    }

    /// Finalizes the arena into a runnable [`Pipeline`].
    pub fn build(self) -> Pipeline {
        Pipeline::new(self.ops)
    }

    /// Builds and immediately runs this pipeline, returning its collected tuples.
    pub fn run(self, ctx: &ExecCtx<'_>) -> Result<Vec<Tuple>> {
        self.build().run(ctx)
    }
}

fn compile_props(props: Vec<(String, Expr)>) -> Vec<(String, crate::query::expr::CompiledExpr)> {
    props.into_iter().map(|(k, e)| (k, compile(&e))).collect()
}

fn build_hash_table(rows: &[Tuple], key_col: usize) -> FxHashMap<Vec<u8>, Vec<Tuple>> {
    let mut table: FxHashMap<Vec<u8>, Vec<Tuple>> = FxHashMap::default();
    for row in rows {
        if let Some(cell) = row.get(key_col) {
            table.entry(cell.sort_key()).or_default().push(row.clone());
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::GraphStore;
    use crate::storage::buffer_pool::BufferPool;
    use crate::txn::TransactionManager;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempdir().unwrap();
        let pool = Arc::new(BufferPool::new(256));
        let store = GraphStore::open(dir.path(), pool).unwrap();
        (dir, store)
    }

    #[test]
    fn scan_nodes_filter_and_project_label() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        store.add_node(&txn, "Person", &[("age".into(), PropValue::Int(30))]).unwrap();
        store.add_node(&txn, "Person", &[("age".into(), PropValue::Int(12))]).unwrap();
        store.add_node(&txn, "Company", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let udfs = FxHashMap::default();
        let ctx = ExecCtx { store: &store, txn: &reader, udfs: &udfs };

        let adults = PipelineBuilder::new()
            .scan_nodes(Some("Person"))
            .is_property(0, "age", Cell::Int(30))
            .collect_result()
            .run(&ctx)
            .unwrap();
        assert_eq!(adults.len(), 1);
    }

    #[test]
    fn limit_caps_output_and_distinct_dedupes() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        for _ in 0..5 {
            store.add_node(&txn, "Person", &[]).unwrap();
        }
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let udfs = FxHashMap::default();
        let ctx = ExecCtx { store: &store, txn: &reader, udfs: &udfs };

        let limited = PipelineBuilder::new().scan_nodes(None).limit(3).collect_result().run(&ctx).unwrap();
        assert_eq!(limited.len(), 3);

        let distinct = PipelineBuilder::new()
            .scan_nodes(None)
            .project(&[Expr::Lit(Cell::Bool(true))])
            .distinct_tuples()
            .collect_result()
            .run(&ctx)
            .unwrap();
        assert_eq!(distinct.len(), 1, "every row projects to the same literal tuple");
    }

    #[test]
    fn aggregate_emits_one_row_with_every_requested_aggregate() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        for age in [10, 20, 30] {
            store.add_node(&txn, "Person", &[("age".into(), PropValue::Int(age))]).unwrap();
        }
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let udfs = FxHashMap::default();
        let ctx = ExecCtx { store: &store, txn: &reader, udfs: &udfs };

        let rows = PipelineBuilder::new()
            .scan_nodes(Some("Person"))
            .project(&[Expr::Property { of: 0, key: "age".into() }])
            .aggregate(vec![(AggKind::Count, 0), (AggKind::Sum, 0), (AggKind::Avg, 0)])
            .collect_result()
            .run(&ctx)
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get(0), Some(&Cell::UInt(3)));
        assert_eq!(row.get(1), Some(&Cell::Double(60.0)));
        assert_eq!(row.get(2), Some(&Cell::Double(20.0)));
    }

    #[test]
    fn foreach_all_rship_walks_both_directions() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "Person", &[("name".into(), PropValue::Str("A".into()))]).unwrap();
        let b = store.add_node(&txn, "Person", &[("name".into(), PropValue::Str("B".into()))]).unwrap();
        let c = store.add_node(&txn, "Person", &[("name".into(), PropValue::Str("C".into()))]).unwrap();
        store.add_relationship(&txn, a, b, "knows", &[]).unwrap();
        store.add_relationship(&txn, c, a, "knows", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let udfs = FxHashMap::default();
        let ctx = ExecCtx { store: &store, txn: &reader, udfs: &udfs };

        let rows = PipelineBuilder::new()
            .scan_nodes(Some("Person"))
            .is_property(0, "name", Cell::Str("A".into()))
            .foreach_all_rship(0, None)
            .collect_result()
            .run(&ctx)
            .unwrap();

        // `A` has one outgoing (A->B) and one incoming (C->A) relationship.
        assert_eq!(rows.len(), 2);
    }
}
