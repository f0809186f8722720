//! The query engine: tuples, expressions, the physical operator pipeline,
//! a fluent pipeline builder, and result formatting.

pub mod builder;
pub mod expr;
pub mod pipeline;
pub mod result;
pub mod tuple;

pub use builder::PipelineBuilder;
pub use expr::{BinOp, CompiledExpr, EvalCtx, Expr, Udf, UnOp};
pub use pipeline::{AggKind, ExecCtx, OpKind, Pipeline};
pub use result::{format_cell, ResultSet};
pub use tuple::{Cell, Tuple};
