//! Rule-level composition of selector lists

use crate::ast::Selector;
use crate::engine::MatchOptions;
use crate::node::Node;

/// The four selector lists a rule is made of
#[derive(Debug, Clone, Default)]
pub struct SelectorGroups {
    /// Every selector must match
    pub matches: Vec<Selector>,
    /// At least one selector must match
    pub any_matches: Vec<Selector>,
    /// No selector may match
    pub exclude_matches: Vec<Selector>,
    /// When present, none of these may match either
    pub exclude_all_matches: Vec<Selector>,
}

/// Outcome of a successful group evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMatch<N> {
    /// The element the rule acts on
    pub target: N,
    /// Every element matched by `any_matches` and `matches`, target first
    pub all: Vec<N>,
}

impl SelectorGroups {
    /// A rule needs something positive to look for
    pub fn is_matchable(&self) -> bool {
        !self.matches.is_empty() || !self.any_matches.is_empty()
    }

    /// Evaluate against `root`
    ///
    /// The target is the `any_matches` hit when that list is used, otherwise
    /// the node found by the last `matches` selector.
    pub fn evaluate<N: Node>(&self, root: &N, options: MatchOptions) -> Option<GroupMatch<N>> {
        if !self.is_matchable() {
            return None;
        }

        let mut all: Vec<N> = Vec::new();

        let any_hit = if self.any_matches.is_empty() {
            None
        } else {
            let hit = self
                .any_matches
                .iter()
                .find_map(|selector| selector.find_first(root, options))?;
            all.push(hit.clone());
            Some(hit)
        };

        let mut last_hit = None;
        for selector in &self.matches {
            let hit = selector.find_first(root, options)?;
            if !all.contains(&hit) {
                all.push(hit.clone());
            }
            last_hit = Some(hit);
        }

        if self
            .exclude_matches
            .iter()
            .chain(&self.exclude_all_matches)
            .any(|selector| selector.find_first(root, options).is_some())
        {
            return None;
        }

        let target = any_hit.or(last_hit)?;
        if let Some(pos) = all.iter().position(|n| n == &target) {
            all.swap(0, pos);
        }
        Some(GroupMatch { target, all })
    }
}
