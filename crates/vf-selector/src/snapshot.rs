//! Serializable description of a matched node for trigger payloads

use serde::{Deserialize, Serialize};

use crate::ast::Attr;
use crate::node::Node;

/// What a workflow gets to see about a matched element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// `[left, top, right, bottom]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[i64; 4]>,
    pub clickable: bool,
    pub depth: i64,
    pub index: i64,
}

impl ElementSnapshot {
    pub fn capture<N: Node>(node: &N) -> Self {
        let string = |attr| node.attr(attr).as_str().map(str::to_string);
        let int = |attr| node.attr(attr).as_int();
        let bounds = match (int(Attr::Left), int(Attr::Top), int(Attr::Right), int(Attr::Bottom)) {
            (Some(l), Some(t), Some(r), Some(b)) => Some([l, t, r, b]),
            _ => None,
        };
        Self {
            text: string(Attr::Text),
            desc: string(Attr::Desc),
            id: string(Attr::Id),
            vid: string(Attr::Vid),
            class_name: string(Attr::Name),
            bounds,
            clickable: node.attr(Attr::Clickable).as_bool().unwrap_or(false),
            depth: int(Attr::Depth).unwrap_or(0),
            index: int(Attr::Index).unwrap_or(0),
        }
    }

    /// Center point of the bounds, where a tap would land
    pub fn center(&self) -> Option<(i64, i64)> {
        self.bounds
            .map(|[l, t, r, b]| ((l + r) / 2, (t + b) / 2))
    }
}
