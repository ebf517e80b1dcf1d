//! Tree node interface consumed by the matching engine

use crate::ast::Attr;

/// Value of a node attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    /// Attribute absent on this node
    Null,
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<Option<&str>> for AttrValue {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(s) => AttrValue::Str(s.to_string()),
            None => AttrValue::Null,
        }
    }
}

/// A node in a UI hierarchy
///
/// Handles are cheap to clone and compare equal when they refer to the same
/// underlying node. The indexed lookups are optional: returning `None` makes
/// the engine fall back to a full walk.
pub trait Node: Clone + PartialEq {
    /// Read one attribute
    fn attr(&self, attr: Attr) -> AttrValue;

    fn parent(&self) -> Option<Self>;

    /// Children in display order
    fn children(&self) -> Vec<Self>;

    fn class_name(&self) -> Option<String> {
        self.attr(Attr::Name).as_str().map(str::to_string)
    }

    /// Package owning this node, used to expand `vid` fast queries
    fn package_name(&self) -> Option<String> {
        None
    }

    /// Nodes anywhere in this node's window whose text contains `text`,
    /// ignoring case
    fn find_by_text(&self, _text: &str) -> Option<Vec<Self>> {
        None
    }

    /// Nodes anywhere in this node's window with this full view id
    fn find_by_view_id(&self, _view_id: &str) -> Option<Vec<Self>> {
        None
    }

    /// Sort key that orders nodes of one window by a pre-order walk
    ///
    /// The default lists the child positions leading down from the top of
    /// the window.
    fn document_position(&self) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            let position = parent
                .children()
                .iter()
                .position(|child| child == &current)
                .unwrap_or(0);
            path.push(position);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether `self` is `root` or lies below it
    fn is_within(&self, root: &Self) -> bool {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if &node == root {
                return true;
            }
            current = node.parent();
        }
        false
    }
}
