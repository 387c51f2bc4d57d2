/// SQL AST and compilation pipeline.
///
/// Query plans built by the `spec` layer are lowered into this AST and then
/// pushed through the remaining stages:
///
/// ```text
/// SelectPlan / PagedPlan / CountQuery
///       ↓
/// Plan lowering            (spec::sql)
///       ↓
/// SQL AST                  (types.rs)
///       ↓
/// Optimization passes      (optimizer.rs)
///       ↓
/// SQL compiler / formatter (compiler.rs, formatter.rs)
///       ↓
/// Validation               (parser.rs)
/// ```
pub mod compiler;
pub mod formatter;
pub mod optimizer;
pub mod parser;
pub mod types;

// Re-export key types for convenience
pub use compiler::compile;
pub use formatter::format_sql;
pub use optimizer::{analyze_query, OptimizationPass, Optimizer, QueryAnalysis};
pub use parser::check_sql;
pub use types::*;
