//! Selector language and matching engine
//!
//! Selectors describe nodes of a UI hierarchy by attribute predicates and
//! structural relations, e.g.
//!
//! ```text
//! @LinearLayout > TextView[text^="Skip" && clickable=true]
//! [vid="close"] - ImageView
//! ```
//!
//! A selector is a chain of units joined by connectors. The rightmost unit
//! is matched against candidate nodes; each connector then says how the unit
//! to its left relates to the node already matched on its right:
//!
//! - `>` / `>n` / `>>`: parent, n-th ancestor, any ancestor (bare whitespace
//!   is the same as `>>`)
//! - `<` / `<n` / `<<`: a direct child, the n-th child, any descendant
//! - `+` / `+n` / `++`: previous sibling, n-th previous, any previous
//! - `-` / `-n` / `--`: next sibling, n-th next, any next
//!
//! The node returned is the one matched by the unit prefixed with `@`, or the
//! rightmost unit when no `@` is given.
//!
//! The engine works over any tree implementing [`Node`]. [`UiTree`] is an
//! in-memory tree built from a serialized snapshot that also provides the
//! indexed lookups used by fast queries.

mod ast;
mod compose;
mod engine;
mod error;
mod node;
mod parser;
mod snapshot;
mod tree;

pub use ast::{Attr, Axis, Comparison, Connector, Expr, Literal, Operator, Position, Selector, Unit, ValueKind};
pub use compose::{GroupMatch, SelectorGroups};
pub use engine::{FastQuery, MatchOptions};
pub use error::{SelectorError, SelectorResult};
pub use node::{AttrValue, Node};
pub use snapshot::ElementSnapshot;
pub use tree::{UiNode, UiNodeSpec, UiTree};
