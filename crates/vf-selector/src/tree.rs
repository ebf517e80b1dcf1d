//! In-memory UI hierarchy snapshot
//!
//! The OS bridge serializes the active window as nested [`UiNodeSpec`]s.
//! [`UiTree::build`] flattens that into an arena with parent links and a
//! view-id index, and [`UiNode`] is the borrowed handle the engine walks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ast::Attr;
use crate::node::{AttrValue, Node};

/// Serialized form of one node and its subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiNodeSpec {
    pub text: Option<String>,
    #[serde(alias = "contentDescription")]
    pub desc: Option<String>,
    /// Full view id resource name
    #[serde(alias = "viewId")]
    pub id: Option<String>,
    #[serde(alias = "class", alias = "name")]
    pub class_name: Option<String>,
    #[serde(alias = "packageName")]
    pub package: Option<String>,
    pub clickable: bool,
    pub focusable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub editable: bool,
    pub long_clickable: bool,
    pub visible_to_user: bool,
    pub scrollable: bool,
    pub selected: bool,
    pub focused: bool,
    pub enabled: bool,
    /// `[left, top, right, bottom]` in screen pixels
    pub bounds: Option<[i32; 4]>,
    pub children: Vec<UiNodeSpec>,
}

impl Default for UiNodeSpec {
    fn default() -> Self {
        Self {
            text: None,
            desc: None,
            id: None,
            class_name: None,
            package: None,
            clickable: false,
            focusable: false,
            checkable: false,
            checked: false,
            editable: false,
            long_clickable: false,
            visible_to_user: true,
            scrollable: false,
            selected: false,
            focused: false,
            enabled: true,
            bounds: None,
            children: Vec::new(),
        }
    }
}

impl UiNodeSpec {
    /// Node of the given class
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_bounds(mut self, bounds: [i32; 4]) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn with_child(mut self, child: UiNodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

struct NodeData {
    spec: UiNodeSpec,
    parent: Option<usize>,
    children: Vec<usize>,
    index: i64,
    depth: i64,
}

/// Flattened snapshot of a window
pub struct UiTree {
    nodes: Vec<NodeData>,
    by_view_id: HashMap<String, Vec<usize>>,
}

impl UiTree {
    /// Flatten a snapshot; node 0 is the root
    pub fn build(root: UiNodeSpec) -> Self {
        let mut tree = UiTree {
            nodes: Vec::new(),
            by_view_id: HashMap::new(),
        };
        tree.push(root, None, 0, 0);
        tree
    }

    fn push(&mut self, mut spec: UiNodeSpec, parent: Option<usize>, index: i64, depth: i64) -> usize {
        let children = std::mem::take(&mut spec.children);
        let idx = self.nodes.len();
        if let Some(id) = &spec.id {
            self.by_view_id.entry(id.clone()).or_default().push(idx);
        }
        self.nodes.push(NodeData {
            spec,
            parent,
            children: Vec::new(),
            index,
            depth,
        });

        for (i, child) in children.into_iter().enumerate() {
            let child_idx = self.push(child, Some(idx), i as i64, depth + 1);
            self.nodes[idx].children.push(child_idx);
        }
        idx
    }

    pub fn root(&self) -> UiNode<'_> {
        UiNode { tree: self, idx: 0 }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, idx: usize) -> UiNode<'_> {
        UiNode { tree: self, idx }
    }

    /// Package of the window, taken from the root
    pub fn package(&self) -> Option<&str> {
        self.nodes.first()?.spec.package.as_deref()
    }
}

/// Borrowed handle to a node of a [`UiTree`]
#[derive(Clone, Copy)]
pub struct UiNode<'a> {
    tree: &'a UiTree,
    idx: usize,
}

impl<'a> UiNode<'a> {
    fn data(&self) -> &'a NodeData {
        &self.tree.nodes[self.idx]
    }

    pub fn spec(&self) -> &'a UiNodeSpec {
        &self.data().spec
    }

    /// Stable position of this node in its tree
    pub fn node_index(&self) -> usize {
        self.idx
    }

    fn package(&self) -> Option<&'a str> {
        self.spec().package.as_deref().or(self.tree.package())
    }

    fn vid(&self) -> Option<String> {
        let id = self.spec().id.as_deref()?;
        match self.package() {
            Some(package) => {
                let prefix = format!("{package}:id/");
                Some(id.strip_prefix(&prefix).unwrap_or(id).to_string())
            }
            None => Some(id.to_string()),
        }
    }

    fn bounds(&self) -> Option<[i32; 4]> {
        self.spec().bounds
    }
}

impl PartialEq for UiNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.idx == other.idx
    }
}

impl std::fmt::Debug for UiNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let spec = self.spec();
        f.debug_struct("UiNode")
            .field("idx", &self.idx)
            .field("class", &spec.class_name)
            .field("id", &spec.id)
            .field("text", &spec.text)
            .finish()
    }
}

impl Node for UiNode<'_> {
    fn attr(&self, attr: Attr) -> AttrValue {
        let spec = self.spec();
        let bound = |f: fn([i32; 4]) -> i32| match self.bounds() {
            Some(b) => AttrValue::Int(i64::from(f(b))),
            None => AttrValue::Null,
        };
        match attr {
            Attr::Id => spec.id.as_deref().into(),
            Attr::Vid => self.vid().map(AttrValue::Str).unwrap_or(AttrValue::Null),
            Attr::Text => spec.text.as_deref().into(),
            Attr::Desc => spec.desc.as_deref().into(),
            Attr::Name => spec.class_name.as_deref().into(),
            Attr::Clickable => AttrValue::Bool(spec.clickable),
            Attr::Focusable => AttrValue::Bool(spec.focusable),
            Attr::Checkable => AttrValue::Bool(spec.checkable),
            Attr::Checked => AttrValue::Bool(spec.checked),
            Attr::Editable => AttrValue::Bool(spec.editable),
            Attr::LongClickable => AttrValue::Bool(spec.long_clickable),
            Attr::VisibleToUser => AttrValue::Bool(spec.visible_to_user),
            Attr::Scrollable => AttrValue::Bool(spec.scrollable),
            Attr::Selected => AttrValue::Bool(spec.selected),
            Attr::Focused => AttrValue::Bool(spec.focused),
            Attr::Enabled => AttrValue::Bool(spec.enabled),
            Attr::ChildCount => AttrValue::Int(self.data().children.len() as i64),
            Attr::Index => AttrValue::Int(self.data().index),
            Attr::Depth => AttrValue::Int(self.data().depth),
            Attr::Left => bound(|b| b[0]),
            Attr::Top => bound(|b| b[1]),
            Attr::Right => bound(|b| b[2]),
            Attr::Bottom => bound(|b| b[3]),
            Attr::Width => bound(|b| b[2] - b[0]),
            Attr::Height => bound(|b| b[3] - b[1]),
        }
    }

    fn parent(&self) -> Option<Self> {
        self.data().parent.map(|idx| self.tree.node(idx))
    }

    fn children(&self) -> Vec<Self> {
        self.data()
            .children
            .iter()
            .map(|&idx| self.tree.node(idx))
            .collect()
    }

    fn package_name(&self) -> Option<String> {
        self.package().map(str::to_string)
    }

    fn find_by_text(&self, text: &str) -> Option<Vec<Self>> {
        let needle = text.to_lowercase();
        Some(
            (0..self.tree.nodes.len())
                .filter(|&idx| {
                    let spec = &self.tree.nodes[idx].spec;
                    [&spec.text, &spec.desc].into_iter().any(|value| {
                        value
                            .as_deref()
                            .is_some_and(|v| v.to_lowercase().contains(&needle))
                    })
                })
                .map(|idx| self.tree.node(idx))
                .collect(),
        )
    }

    fn find_by_view_id(&self, view_id: &str) -> Option<Vec<Self>> {
        Some(
            self.tree
                .by_view_id
                .get(view_id)
                .map(|indices| indices.iter().map(|&idx| self.tree.node(idx)).collect())
                .unwrap_or_default(),
        )
    }

    fn document_position(&self) -> Vec<usize> {
        vec![self.idx]
    }

    fn is_within(&self, root: &Self) -> bool {
        if !std::ptr::eq(self.tree, root.tree) {
            return false;
        }
        let mut current = Some(self.idx);
        while let Some(idx) = current {
            if idx == root.idx {
                return true;
            }
            current = self.tree.nodes[idx].parent;
        }
        false
    }
}
