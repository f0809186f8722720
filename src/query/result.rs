//! Canonical string formatting for [`Cell`]s and a small result-set wrapper,
//! per the "printing/collecting" split: fixed-width columns for display,
//! canonical per-cell strings (ISO-8601 timestamps, decimal numbers, `NULL`)
//! for storage/collection.

use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

use crate::query::tuple::{Cell, Tuple};

/// Formats a single cell using canonical, collection-oriented formatting.
pub fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NULL".to_string(),
        Cell::Bool(b) => b.to_string(),
        Cell::Int(i) => i.to_string(),
        Cell::UInt(u) => u.to_string(),
        Cell::Double(d) => d.to_string(),
        Cell::Str(s) => s.clone(),
        Cell::Timestamp(t) => format_timestamp(*t),
        Cell::Node(id) => format!("node({id})"),
        Cell::Rship(id) => format!("rship({id})"),
        Cell::NodeDesc(id, label) => format!("node({id}:{label})"),
        Cell::RshipDesc(id, label) => format!("rship({id}:{label})"),
        Cell::IdArray(ids) => {
            let joined: Vec<String> = ids.iter().map(u64::to_string).collect();
            format!("[{}]", joined.join(","))
        }
    }
}

fn format_timestamp(epoch_seconds: i64) -> String {
    match OffsetDateTime::from_unix_timestamp(epoch_seconds) {
        Ok(dt) => dt.format(&Iso8601::DEFAULT).unwrap_or_else(|_| epoch_seconds.to_string()),
        Err(_) => epoch_seconds.to_string(),
    }
}

/// The set of tuples a pipeline's `collect_result` sink accumulated.
pub struct ResultSet {
    rows: Vec<Tuple>,
}

impl ResultSet {
    /// Wraps an already-collected set of tuples.
    pub fn new(rows: Vec<Tuple>) -> Self {
        Self { rows }
    }

    /// Number of rows collected.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows were collected.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Borrows the underlying rows.
    pub fn rows(&self) -> &[Tuple] {
        &self.rows
    }

    /// Renders every row as a fixed-width column table.
    pub fn print(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        let width = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut columns: Vec<usize> = vec![4; width];
        let formatted: Vec<Vec<String>> =
            self.rows.iter().map(|row| (0..width).map(|i| row.get(i).map(format_cell).unwrap_or_default()).collect()).collect();
        for row in &formatted {
            for (i, cell) in row.iter().enumerate() {
                columns[i] = columns[i].max(cell.len());
            }
        }
        let mut out = String::new();
        for row in &formatted {
            for (i, cell) in row.iter().enumerate() {
                out.push_str(&format!("{cell:<width$} ", width = columns[i]));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bool_and_numeric_formatting() {
        assert_eq!(format_cell(&Cell::Null), "NULL");
        assert_eq!(format_cell(&Cell::Int(-7)), "-7");
        assert_eq!(format_cell(&Cell::UInt(7)), "7");
        assert_eq!(format_cell(&Cell::Bool(true)), "true");
    }

    #[test]
    fn result_set_print_pads_columns() {
        let mut rows = Vec::new();
        let mut t1 = Tuple::new();
        t1.push(Cell::Str("a".into()));
        t1.push(Cell::Int(1));
        rows.push(t1);
        let mut t2 = Tuple::new();
        t2.push(Cell::Str("bbbb".into()));
        t2.push(Cell::Int(22));
        rows.push(t2);
        let rs = ResultSet::new(rows);
        let printed = rs.print();
        assert!(printed.contains("bbbb"));
        assert_eq!(rs.len(), 2);
    }
}
