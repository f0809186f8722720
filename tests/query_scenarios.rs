//! End-to-end pipeline scenarios against a real on-disk graph store.

use std::sync::Arc;

use poseidon_core::graph::model::PropValue;
use poseidon_core::graph::GraphStore;
use poseidon_core::query::{AggKind, Cell, ExecCtx, Expr, PipelineBuilder};
use poseidon_core::storage::buffer_pool::BufferPool;
use poseidon_core::txn::TransactionManager;
use rustc_hash::FxHashMap;
use tempfile::tempdir;

fn open_store() -> (tempfile::TempDir, GraphStore) {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(256));
    let store = GraphStore::open(dir.path(), pool).unwrap();
    (dir, store)
}

fn name(n: &str) -> Vec<(String, PropValue)> {
    vec![("firstName".to_string(), PropValue::Str(n.to_string()))]
}

/// Builds the A,B,C,D,E,F / A→B,A→C,A→D,B→E,E→F `:knows` graph used by
/// both the traversal and hash-join scenarios.
fn build_knows_graph(store: &GraphStore, txns: &TransactionManager) -> [u64; 6] {
    let txn = txns.begin();
    let a = store.add_node(&txn, "Person", &name("A")).unwrap();
    let b = store.add_node(&txn, "Person", &name("B")).unwrap();
    let c = store.add_node(&txn, "Person", &name("C")).unwrap();
    let d = store.add_node(&txn, "Person", &name("D")).unwrap();
    let e = store.add_node(&txn, "Person", &name("E")).unwrap();
    let f = store.add_node(&txn, "Person", &name("F")).unwrap();
    store.add_relationship(&txn, a, b, "knows", &[]).unwrap();
    store.add_relationship(&txn, a, c, "knows", &[]).unwrap();
    store.add_relationship(&txn, a, d, "knows", &[]).unwrap();
    store.add_relationship(&txn, b, e, "knows", &[]).unwrap();
    store.add_relationship(&txn, e, f, "knows", &[]).unwrap();
    store.commit(txn).unwrap();
    [a, b, c, d, e, f]
}

fn first_name_cells(rows: &[poseidon_core::query::Tuple]) -> Vec<String> {
    let mut names: Vec<String> = rows
        .iter()
        .map(|t| match &t[0] {
            Cell::Str(s) => s.clone(),
            other => panic!("expected a string cell, got {other:?}"),
        })
        .collect();
    names.sort();
    names
}

#[test]
fn fixed_one_hop_from_a_yields_b_c_d() {
    let (_dir, store) = open_store();
    let txns = TransactionManager::new();
    build_knows_graph(&store, &txns);

    let txn = txns.begin();
    let udfs: FxHashMap<String, Box<poseidon_core::query::Udf>> = FxHashMap::default();
    let ctx = ExecCtx { store: &store, txn: &txn, udfs: &udfs };

    let rows = PipelineBuilder::new()
        .scan_nodes(Some("Person"))
        .is_property(0, "firstName", Cell::Str("A".to_string()))
        .foreach_from_rship(0, Some("knows"))
        .get_to_node(1)
        .project(&[Expr::Property { of: 2, key: "firstName".to_string() }])
        .collect_result()
        .run(&ctx)
        .unwrap();

    assert_eq!(first_name_cells(&rows), vec!["B", "C", "D"]);
    txn.abort();
}

#[test]
fn variable_hop_one_to_three_from_a_yields_b_c_d_e_f() {
    let (_dir, store) = open_store();
    let txns = TransactionManager::new();
    build_knows_graph(&store, &txns);

    let txn = txns.begin();
    let udfs: FxHashMap<String, Box<poseidon_core::query::Udf>> = FxHashMap::default();
    let ctx = ExecCtx { store: &store, txn: &txn, udfs: &udfs };

    let rows = PipelineBuilder::new()
        .scan_nodes(Some("Person"))
        .is_property(0, "firstName", Cell::Str("A".to_string()))
        .variable_hop_from(0, Some("knows"), 1, 3)
        .get_to_node(1)
        .project(&[Expr::Property { of: 2, key: "firstName".to_string() }])
        .collect_result()
        .run(&ctx)
        .unwrap();

    assert_eq!(first_name_cells(&rows), vec!["B", "C", "D", "E", "F"]);
    txn.abort();
}

#[test]
fn hash_join_of_one_hop_and_variable_hop_reachability_yields_three_matches() {
    let (_dir, store) = open_store();
    let txns = TransactionManager::new();
    build_knows_graph(&store, &txns);

    let txn = txns.begin();
    let udfs: FxHashMap<String, Box<poseidon_core::query::Udf>> = FxHashMap::default();
    let ctx = ExecCtx { store: &store, txn: &txn, udfs: &udfs };

    // The variable-hop side is materialized first, since join build sides
    // are pre-computed sub-pipelines in this arena.
    let variable_hop_rows = PipelineBuilder::new()
        .scan_nodes(Some("Person"))
        .is_property(0, "firstName", Cell::Str("A".to_string()))
        .variable_hop_from(0, Some("knows"), 1, 3)
        .get_to_node(1)
        .project(&[Expr::Property { of: 2, key: "firstName".to_string() }])
        .collect_result()
        .run(&ctx)
        .unwrap();
    assert_eq!(variable_hop_rows.len(), 5);

    let joined = PipelineBuilder::new()
        .scan_nodes(Some("Person"))
        .is_property(0, "firstName", Cell::Str("A".to_string()))
        .foreach_from_rship(0, Some("knows"))
        .get_to_node(1)
        .project(&[Expr::Property { of: 2, key: "firstName".to_string() }])
        .hash_join(variable_hop_rows, 0, 0)
        .collect_result()
        .run(&ctx)
        .unwrap();

    assert_eq!(joined.len(), 3);
    let mut pairs: Vec<(String, String)> = joined
        .iter()
        .map(|t| {
            let left = match &t[0] { Cell::Str(s) => s.clone(), other => panic!("{other:?}") };
            let right = match &t[1] { Cell::Str(s) => s.clone(), other => panic!("{other:?}") };
            (left, right)
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("B".to_string(), "B".to_string()),
            ("C".to_string(), "C".to_string()),
            ("D".to_string(), "D".to_string()),
        ]
    );
    txn.abort();
}

#[test]
fn group_by_first_name_computes_count_avg_sum_min_max_age() {
    let (_dir, store) = open_store();
    let txns = TransactionManager::new();

    let people: [(&str, i64); 6] = [
        ("John", 42),
        ("John", 37),
        ("John", 20),
        ("Michael", 77),
        ("Michael", 100),
        ("Anastasia", 48),
    ];
    let txn = txns.begin();
    for (first_name, age) in people {
        let props = vec![
            ("firstName".to_string(), PropValue::Str(first_name.to_string())),
            ("age".to_string(), PropValue::Int(age)),
        ];
        store.add_node(&txn, "Person", &props).unwrap();
    }
    store.commit(txn).unwrap();

    let txn = txns.begin();
    let udfs: FxHashMap<String, Box<poseidon_core::query::Udf>> = FxHashMap::default();
    let ctx = ExecCtx { store: &store, txn: &txn, udfs: &udfs };

    let rows = PipelineBuilder::new()
        .scan_nodes(Some("Person"))
        .project(&[
            Expr::Property { of: 0, key: "firstName".to_string() },
            Expr::Property { of: 0, key: "age".to_string() },
        ])
        .group_by(vec![0], vec![(AggKind::Count, 1), (AggKind::Avg, 1), (AggKind::Sum, 1), (AggKind::Min, 1), (AggKind::Max, 1)])
        .collect_result()
        .run(&ctx)
        .unwrap();

    assert_eq!(rows.len(), 3);

    let mut by_name: FxHashMap<String, Vec<Cell>> = FxHashMap::default();
    for row in &rows {
        let key = match &row[0] { Cell::Str(s) => s.clone(), other => panic!("{other:?}") };
        by_name.insert(key, row[1..].to_vec());
    }

    let approx = |cell: &Cell, expected: f64, label: &str| match cell {
        Cell::Double(a) => assert!((a - expected).abs() < 1e-9, "{label}: {a} != {expected}"),
        other => panic!("{label}: expected Double, got {other:?}"),
    };

    let expect = |name: &str, count: u64, avg: f64, sum: f64, min: f64, max: f64| {
        let agg = &by_name[name];
        assert_eq!(agg[0], Cell::UInt(count), "{name} count");
        approx(&agg[1], avg, &format!("{name} avg"));
        approx(&agg[2], sum, &format!("{name} sum"));
        approx(&agg[3], min, &format!("{name} min"));
        approx(&agg[4], max, &format!("{name} max"));
    };

    expect("John", 3, 33.0, 99.0, 20.0, 42.0);
    expect("Michael", 2, 88.5, 177.0, 77.0, 100.0);
    expect("Anastasia", 1, 48.0, 48.0, 48.0, 48.0);

    txn.abort();
}
