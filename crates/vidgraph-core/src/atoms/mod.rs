// ── Vidgraph Atoms Layer ───────────────────────────────────────────────────
// Pure constants, error types, configuration, and domain data types.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from engine/ or lib.rs.

pub mod constants;
pub mod error;
pub mod graph_types;
pub mod traits;
pub mod types;
