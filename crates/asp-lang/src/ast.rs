use std::sync::Arc;

pub mod node;

/// Syntax tree nodes are immutable once built and may be shared between
/// request workers, so shared subtrees are reference counted atomically.
pub type Shared<T> = Arc<T>;
pub type Program = Vec<node::Stmt>;
