//! Selector evaluation
//!
//! Matching is pull-based: candidates for the rightmost unit come either
//! from a pre-order walk of the scoped root or, with fast query enabled, from
//! the host's indexed lookups. Each candidate is then verified against the
//! full unit chain, walking connectors leftwards with backtracking.

use tracing::trace;

use crate::ast::{Axis, Comparison, Connector, Expr, Literal, Operator, Position, Selector, Unit};
use crate::node::{AttrValue, Node};
use crate::Attr;

/// Options for a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Use indexed lookups for the rightmost unit when possible
    pub fast_query: bool,
}

impl MatchOptions {
    pub fn fast() -> Self {
        Self { fast_query: true }
    }
}

/// An indexed lookup usable as a pre-filter for the rightmost unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastQuery {
    /// Full view id, looked up directly
    Id(String),
    /// Short view id, expanded with the root's package
    Vid(String),
    /// Text containment lookup
    Text(String),
}

impl Selector {
    /// First matching node in document order, if any
    pub fn find_first<N: Node>(&self, root: &N, options: MatchOptions) -> Option<N> {
        if let Some(candidates) = self.fast_candidates(root, options) {
            return candidates
                .into_iter()
                .find_map(|candidate| self.match_node(&candidate));
        }

        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if let Some(target) = self.match_node(&node) {
                return Some(target);
            }
            let mut children = node.children();
            children.reverse();
            stack.extend(children);
        }
        None
    }

    /// Every matching node, deduplicated
    pub fn find_all<N: Node>(&self, root: &N, options: MatchOptions) -> Vec<N> {
        let candidates = match self.fast_candidates(root, options) {
            Some(candidates) => candidates,
            None => walk(root),
        };

        let mut results: Vec<N> = Vec::new();
        for candidate in candidates {
            if let Some(target) = self.match_node(&candidate) {
                if !results.contains(&target) {
                    results.push(target);
                }
            }
        }
        results
    }

    /// Match `node` as the rightmost unit; returns the target node on success
    pub fn match_node<N: Node>(&self, node: &N) -> Option<N> {
        self.walk_units(node, self.units.len() - 1).flatten()
    }

    /// Indexed lookups derivable from the rightmost unit
    ///
    /// Only comparisons that must hold for the unit to match qualify: a
    /// top-level `&&` chain contributes its first indexable comparison, a
    /// top-level `||` qualifies only when every branch does.
    pub fn fast_queries(&self) -> Option<Vec<FastQuery>> {
        let unit = self.units.last()?;
        fast_queries_of(unit.expr.as_ref()?)
    }

    fn fast_candidates<N: Node>(&self, root: &N, options: MatchOptions) -> Option<Vec<N>> {
        if !options.fast_query {
            return None;
        }
        let queries = self.fast_queries()?;

        let mut candidates: Vec<N> = Vec::new();
        for query in &queries {
            let found = match query {
                FastQuery::Id(id) => root.find_by_view_id(id)?,
                FastQuery::Vid(vid) => {
                    let package = root.package_name()?;
                    root.find_by_view_id(&format!("{package}:id/{vid}"))?
                }
                FastQuery::Text(text) => root.find_by_text(text)?,
            };
            for node in found {
                // Index lookups see the whole window, not just the scope
                if node.is_within(root) && !candidates.contains(&node) {
                    candidates.push(node);
                }
            }
        }
        // Lookups answer in index order; matching must see document order
        candidates.sort_by_cached_key(|node| node.document_position());
        trace!(
            selector = %self,
            candidates = candidates.len(),
            "Fast query candidates"
        );
        Some(candidates)
    }

    /// `Some(target)` when units `0..=idx` match ending at `node`; the inner
    /// option holds the target if it lies within that range
    fn walk_units<N: Node>(&self, node: &N, idx: usize) -> Option<Option<N>> {
        if !unit_matches(&self.units[idx], node) {
            return None;
        }
        let here = (idx == self.target).then(|| node.clone());
        if idx == 0 {
            return Some(here);
        }

        let connector = &self.connectors[idx - 1];
        for related in related_nodes(node, connector) {
            if let Some(found) = self.walk_units(&related, idx - 1) {
                return Some(here.or(found));
            }
        }
        None
    }
}

fn walk<N: Node>(root: &N) -> Vec<N> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
        out.push(node);
    }
    out
}

fn fast_queries_of(expr: &Expr) -> Option<Vec<FastQuery>> {
    match expr {
        Expr::Compare(comparison) => fast_query_of(comparison).map(|q| vec![q]),
        Expr::And(items) => items.iter().find_map(|item| match item {
            Expr::Compare(comparison) => fast_query_of(comparison).map(|q| vec![q]),
            _ => None,
        }),
        Expr::Or(items) => {
            let mut queries = Vec::new();
            for item in items {
                queries.extend(fast_queries_of(item)?);
            }
            Some(queries)
        }
    }
}

fn fast_query_of(comparison: &Comparison) -> Option<FastQuery> {
    if comparison.length {
        return None;
    }
    let Literal::Str(value) = &comparison.literal else {
        return None;
    };
    if value.is_empty() {
        return None;
    }
    match (comparison.attr, comparison.op) {
        (Attr::Id, Operator::Eq) => Some(FastQuery::Id(value.clone())),
        (Attr::Vid, Operator::Eq) => Some(FastQuery::Vid(value.clone())),
        (Attr::Text, Operator::Eq | Operator::Starts | Operator::Contains | Operator::Ends) => {
            Some(FastQuery::Text(value.clone()))
        }
        _ => None,
    }
}

fn unit_matches<N: Node>(unit: &Unit, node: &N) -> bool {
    if let Some(name) = &unit.name {
        match node.class_name() {
            Some(class) if class_matches(&class, name) => {}
            _ => return false,
        }
    }
    match &unit.expr {
        Some(expr) => eval(expr, node),
        None => true,
    }
}

/// `TextView` matches `android.widget.TextView`; a dotted name must match
/// the full class or a dotted suffix of it
fn class_matches(class: &str, name: &str) -> bool {
    class == name
        || (class.len() > name.len()
            && class.ends_with(name)
            && class.as_bytes()[class.len() - name.len() - 1] == b'.')
}

fn eval<N: Node>(expr: &Expr, node: &N) -> bool {
    match expr {
        Expr::Compare(comparison) => compare(comparison, node),
        Expr::And(items) => items.iter().all(|item| eval(item, node)),
        Expr::Or(items) => items.iter().any(|item| eval(item, node)),
    }
}

fn compare<N: Node>(comparison: &Comparison, node: &N) -> bool {
    let mut value = node.attr(comparison.attr);
    if comparison.length {
        value = match value {
            AttrValue::Str(s) => AttrValue::Int(s.chars().count() as i64),
            other => other,
        };
    }

    let op = comparison.op;
    match (&value, &comparison.literal) {
        (AttrValue::Null, Literal::Null) => op == Operator::Eq,
        (_, Literal::Null) => op == Operator::Ne,
        (AttrValue::Null, _) => op.holds_for_null(),
        (AttrValue::Str(actual), Literal::Str(expected)) => {
            compare_str(actual, expected, op, comparison)
        }
        (AttrValue::Int(actual), Literal::Int(expected)) => match op {
            Operator::Eq => actual == expected,
            Operator::Ne => actual != expected,
            Operator::Lt => actual < expected,
            Operator::Le => actual <= expected,
            Operator::Gt => actual > expected,
            Operator::Ge => actual >= expected,
            _ => false,
        },
        (AttrValue::Bool(actual), Literal::Bool(expected)) => match op {
            Operator::Eq => actual == expected,
            Operator::Ne => actual != expected,
            _ => false,
        },
        // Host returned a value of the wrong type
        _ => false,
    }
}

fn compare_str(actual: &str, expected: &str, op: Operator, comparison: &Comparison) -> bool {
    match op {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        Operator::Lt => actual < expected,
        Operator::Le => actual <= expected,
        Operator::Gt => actual > expected,
        Operator::Ge => actual >= expected,
        Operator::Starts => actual.starts_with(expected),
        Operator::NotStarts => !actual.starts_with(expected),
        Operator::Contains => actual.contains(expected),
        Operator::NotContains => !actual.contains(expected),
        Operator::Ends => actual.ends_with(expected),
        Operator::NotEnds => !actual.ends_with(expected),
        Operator::Matches => comparison
            .regex
            .as_ref()
            .is_some_and(|re| re.is_match(actual)),
        Operator::NotMatches => !comparison
            .regex
            .as_ref()
            .is_some_and(|re| re.is_match(actual)),
    }
}

/// Nodes reached from `node` by `connector`, nearest first
fn related_nodes<N: Node>(node: &N, connector: &Connector) -> Vec<N> {
    match connector.axis {
        Axis::Ancestor => {
            let mut ancestors = Vec::new();
            let mut current = node.parent();
            while let Some(parent) = current {
                current = parent.parent();
                ancestors.push(parent);
            }
            pick(ancestors, connector.position)
        }
        Axis::Child => match connector.position {
            Position::Direct => node.children(),
            Position::Nth(n) => node.children().into_iter().nth(n - 1).into_iter().collect(),
            Position::Any => {
                let mut descendants = walk(node);
                descendants.remove(0);
                descendants
            }
        },
        Axis::PrevSibling | Axis::NextSibling => {
            let Some(parent) = node.parent() else {
                return Vec::new();
            };
            let siblings = parent.children();
            let Some(index) = siblings.iter().position(|s| s == node) else {
                return Vec::new();
            };
            let ordered: Vec<N> = if connector.axis == Axis::PrevSibling {
                siblings[..index].iter().rev().cloned().collect()
            } else {
                siblings[index + 1..].to_vec()
            };
            pick(ordered, connector.position)
        }
    }
}

fn pick<N>(ordered: Vec<N>, position: Position) -> Vec<N> {
    match position {
        Position::Direct => ordered.into_iter().take(1).collect(),
        Position::Nth(n) => ordered.into_iter().nth(n - 1).into_iter().collect(),
        Position::Any => ordered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_matches() {
        assert!(class_matches("android.widget.TextView", "TextView"));
        assert!(class_matches("android.widget.TextView", "widget.TextView"));
        assert!(class_matches("TextView", "TextView"));
        assert!(!class_matches("android.widget.MyTextView", "TextView"));
        assert!(!class_matches("android.widget.TextView", "View"));
    }

    #[test]
    fn test_fast_queries_extraction() {
        let q = |s: &str| Selector::parse(s).unwrap().fast_queries();
        assert_eq!(
            q("[vid='close' && clickable=true]"),
            Some(vec![FastQuery::Vid("close".into())])
        );
        assert_eq!(
            q("[clickable=true && text^='Skip']"),
            Some(vec![FastQuery::Text("Skip".into())])
        );
        assert_eq!(
            q("[id='a:id/x' || text='Skip']"),
            Some(vec![
                FastQuery::Id("a:id/x".into()),
                FastQuery::Text("Skip".into())
            ])
        );
        assert_eq!(q("[id='a:id/x' || clickable=true]"), None);
        assert_eq!(q("[text!='Skip']"), None);
        assert_eq!(q("TextView"), None);
        // Only the rightmost unit is considered
        assert_eq!(q("[text='a'] > View"), None);
    }
}
