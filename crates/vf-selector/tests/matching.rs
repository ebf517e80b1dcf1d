//! Selector matching against in-memory UI trees

use serde_json::json;
use vf_selector::{
    Attr, AttrValue, ElementSnapshot, MatchOptions, Node, Selector, SelectorGroups, UiNode,
    UiNodeSpec, UiTree,
};

const PKG: &str = "com.example.app";

/// FrameLayout
/// ├── LinearLayout (id=toolbar)
/// │   ├── ImageView (id=back, clickable)
/// │   └── TextView "Settings"
/// └── LinearLayout (id=dialog)
///     ├── TextView "Update available"
///     ├── Button "OK" (id=ok, clickable)
///     └── Button "Cancel" (id=cancel, clickable)
fn sample_tree() -> UiTree {
    UiTree::build(
        UiNodeSpec::new("android.widget.FrameLayout")
            .with_package(PKG)
            .with_bounds([0, 0, 1080, 2400])
            .with_child(
                UiNodeSpec::new("android.widget.LinearLayout")
                    .with_id(format!("{PKG}:id/toolbar"))
                    .with_child(
                        UiNodeSpec::new("android.widget.ImageView")
                            .with_id(format!("{PKG}:id/back"))
                            .with_desc("Navigate up")
                            .clickable(),
                    )
                    .with_child(UiNodeSpec::new("android.widget.TextView").with_text("Settings")),
            )
            .with_child(
                UiNodeSpec::new("android.widget.LinearLayout")
                    .with_id(format!("{PKG}:id/dialog"))
                    .with_child(
                        UiNodeSpec::new("android.widget.TextView").with_text("Update available"),
                    )
                    .with_child(
                        UiNodeSpec::new("android.widget.Button")
                            .with_id(format!("{PKG}:id/ok"))
                            .with_text("OK")
                            .with_bounds([100, 1800, 500, 1900])
                            .clickable(),
                    )
                    .with_child(
                        UiNodeSpec::new("android.widget.Button")
                            .with_id(format!("{PKG}:id/cancel"))
                            .with_text("Cancel")
                            .clickable(),
                    ),
            ),
    )
}

fn sel(source: &str) -> Selector {
    Selector::parse(source).unwrap()
}

fn text_of(node: &UiNode<'_>) -> Option<String> {
    node.attr(Attr::Text).as_str().map(str::to_string)
}

#[test]
fn test_text_equality_is_exact() {
    let tree = sample_tree();
    let root = tree.root();

    let found = sel(r#"[text="OK"]"#).find_all(&root, MatchOptions::default());
    assert_eq!(found.len(), 1);
    assert_eq!(text_of(&found[0]).as_deref(), Some("OK"));

    assert!(sel(r#"[text="O"]"#)
        .find_first(&root, MatchOptions::default())
        .is_none());
    assert!(sel(r#"[text="ok"]"#)
        .find_first(&root, MatchOptions::default())
        .is_none());
}

#[test]
fn test_string_operators() {
    let tree = sample_tree();
    let root = tree.root();
    let count = |s: &str| sel(s).find_all(&root, MatchOptions::default()).len();

    assert_eq!(count(r#"[text^="O"]"#), 1);
    assert_eq!(count(r#"[text$="able"]"#), 1);
    assert_eq!(count(r#"[text*="a"]"#), 2); // Update available, Cancel
    assert_eq!(count(r#"Button[text!="OK"]"#), 1);
    assert_eq!(count(r#"Button[text!^="C"]"#), 1);
    assert_eq!(count(r#"[text~="^(OK|Cancel)$"]"#), 2);
    assert_eq!(count(r#"[text<"D" && clickable=true]"#), 1); // Cancel
    assert_eq!(count("[text.length=2]"), 1);
}

#[test]
fn test_null_and_typed_attributes() {
    let tree = sample_tree();
    let root = tree.root();
    let count = |s: &str| sel(s).find_all(&root, MatchOptions::default()).len();

    assert_eq!(count("LinearLayout[text=null]"), 2);
    assert_eq!(count("[desc!=null]"), 1);
    assert_eq!(count("[childCount=3]"), 1);
    assert_eq!(count("[depth=2 && index=0]"), 2);
    assert_eq!(count("[clickable=true]"), 3);
    assert_eq!(count("[width=400 && height=100]"), 1);
    assert_eq!(count("[vid='ok']"), 1);
}

#[test]
fn test_class_name_matching() {
    let tree = sample_tree();
    let root = tree.root();
    assert_eq!(
        sel("Button").find_all(&root, MatchOptions::default()).len(),
        2
    );
    assert_eq!(
        sel("android.widget.TextView")
            .find_all(&root, MatchOptions::default())
            .len(),
        2
    );
    assert_eq!(sel("*").find_all(&root, MatchOptions::default()).len(), 8);
}

#[test]
fn test_ancestor_connectors() {
    let tree = sample_tree();
    let root = tree.root();

    // Parent
    let found = sel("[vid='dialog'] > Button").find_all(&root, MatchOptions::default());
    assert_eq!(found.len(), 2);

    // Second ancestor
    let found = sel("FrameLayout >2 Button[text='OK']").find_all(&root, MatchOptions::default());
    assert_eq!(found.len(), 1);
    assert!(sel("FrameLayout >1 Button")
        .find_first(&root, MatchOptions::default())
        .is_none());

    // Any ancestor, explicit and by whitespace
    assert_eq!(
        sel("FrameLayout >> Button").find_all(&root, MatchOptions::default()).len(),
        2
    );
    assert_eq!(
        sel("FrameLayout Button").find_all(&root, MatchOptions::default()).len(),
        2
    );
}

#[test]
fn test_target_marker_returns_ancestor() {
    let tree = sample_tree();
    let root = tree.root();

    let found = sel("@LinearLayout > [text='Cancel']")
        .find_first(&root, MatchOptions::default())
        .unwrap();
    assert_eq!(
        found.attr(Attr::Vid),
        AttrValue::Str("dialog".to_string())
    );
}

#[test]
fn test_child_and_sibling_connectors() {
    let tree = sample_tree();
    let root = tree.root();
    let first = |s: &str| sel(s).find_first(&root, MatchOptions::default());

    // The dialog whose second child is the OK button
    let dialog = first("Button[text='OK'] <2 @LinearLayout").unwrap();
    assert_eq!(dialog.attr(Attr::Vid), AttrValue::Str("dialog".into()));
    assert!(first("Button[text='OK'] <1 LinearLayout").is_none());
    assert!(first("[text='Settings'] < LinearLayout").is_some());
    assert!(first("[text='OK'] << FrameLayout").is_some());

    // OK is the previous sibling of Cancel
    let cancel = first("[text='OK'] + Button").unwrap();
    assert_eq!(text_of(&cancel).as_deref(), Some("Cancel"));
    assert!(first("[text='Update available'] + [text='Cancel']").is_none());
    assert!(first("[text='Update available'] +2 [text='Cancel']").is_some());
    assert!(first("[text='Update available'] ++ [text='Cancel']").is_some());

    // Cancel is the next sibling of OK
    let ok = first("[text='Cancel'] - Button").unwrap();
    assert_eq!(text_of(&ok).as_deref(), Some("OK"));
    assert!(first("[text='Cancel'] -- TextView").is_some());
}

#[test]
fn test_fast_query_matches_walk() {
    let tree = sample_tree();
    let root = tree.root();
    for source in [
        "[vid='ok']",
        "[id='com.example.app:id/cancel']",
        "[text='OK' && clickable=true]",
        "[text*='vail']",
        "[text='OK' || vid='back']",
        "[vid='dialog'] > [text^='C']",
    ] {
        let selector = sel(source);
        assert!(selector.fast_queries().is_some(), "{source}");
        let order = |mut nodes: Vec<UiNode<'_>>| {
            nodes.sort_by_key(|n| n.node_index());
            nodes.iter().map(|n| n.node_index()).collect::<Vec<_>>()
        };
        assert_eq!(
            order(selector.find_all(&root, MatchOptions::fast())),
            order(selector.find_all(&root, MatchOptions::default())),
            "{source}"
        );
    }
}

#[test]
fn test_fast_query_respects_scope() {
    let tree = sample_tree();
    let root = tree.root();
    let toolbar = sel("[vid='toolbar']")
        .find_first(&root, MatchOptions::default())
        .unwrap();

    // The index sees the whole window; results outside the scope are dropped
    assert!(sel("[vid='ok']")
        .find_first(&toolbar, MatchOptions::fast())
        .is_none());
    assert!(sel("[text='OK']")
        .find_first(&toolbar, MatchOptions::fast())
        .is_none());
    assert!(sel("[vid='back']")
        .find_first(&toolbar, MatchOptions::fast())
        .is_some());
}

#[test]
fn test_fast_query_first_match_in_document_order() {
    let tree = sample_tree();
    let root = tree.root();
    let selector = sel("[text='OK' || vid='back']");
    let expected = selector.find_first(&root, MatchOptions::default()).unwrap();
    assert_eq!(expected.spec().text, None);

    let found = selector.find_first(&root, MatchOptions::fast()).unwrap();
    assert_eq!(found, expected);
    assert_eq!(
        selector
            .find_all(&root, MatchOptions::fast())
            .iter()
            .map(|n| n.node_index())
            .collect::<Vec<_>>(),
        vec![2, 6]
    );
}

#[test]
fn test_fast_text_query_verifies_full_predicate() {
    let tree = sample_tree();
    let root = tree.root();
    // Host text lookup is case-insensitive containment; the predicate is not
    assert!(sel("[text='ok']")
        .find_first(&root, MatchOptions::fast())
        .is_none());
}

#[test]
fn test_selector_groups() {
    let tree = sample_tree();
    let root = tree.root();

    let groups = SelectorGroups {
        matches: vec![sel("[text='Update available']"), sel("[text='OK']")],
        ..Default::default()
    };
    let matched = groups.evaluate(&root, MatchOptions::fast()).unwrap();
    assert_eq!(text_of(&matched.target).as_deref(), Some("OK"));
    assert_eq!(matched.all.len(), 2);

    // Both must match independently
    let groups = SelectorGroups {
        matches: vec![sel("[text='Update available']"), sel("[text='Later']")],
        ..Default::default()
    };
    assert!(groups.evaluate(&root, MatchOptions::fast()).is_none());

    // Any of
    let groups = SelectorGroups {
        any_matches: vec![sel("[text='Skip']"), sel("[text='Cancel']")],
        ..Default::default()
    };
    let matched = groups.evaluate(&root, MatchOptions::default()).unwrap();
    assert_eq!(text_of(&matched.target).as_deref(), Some("Cancel"));

    // Exclusions
    let groups = SelectorGroups {
        any_matches: vec![sel("[text='Cancel']")],
        exclude_matches: vec![sel("[text='Settings']")],
        ..Default::default()
    };
    assert!(groups.evaluate(&root, MatchOptions::default()).is_none());

    let groups = SelectorGroups {
        any_matches: vec![sel("[text='Cancel']")],
        exclude_all_matches: vec![sel("[text='Nope']"), sel("[text='Settings']")],
        ..Default::default()
    };
    assert!(groups.evaluate(&root, MatchOptions::default()).is_none());

    let groups = SelectorGroups {
        any_matches: vec![sel("[text='Cancel']")],
        exclude_all_matches: vec![sel("[text='Nope']")],
        ..Default::default()
    };
    assert!(groups.evaluate(&root, MatchOptions::default()).is_some());

    // Nothing positive to look for
    let groups = SelectorGroups {
        exclude_matches: vec![sel("[text='Nope']")],
        ..Default::default()
    };
    assert!(!groups.is_matchable());
    assert!(groups.evaluate(&root, MatchOptions::default()).is_none());
}

#[test]
fn test_tree_from_json_snapshot() {
    let spec: UiNodeSpec = serde_json::from_value(json!({
        "className": "android.widget.FrameLayout",
        "packageName": "com.example.app",
        "children": [
            {"class": "android.widget.Button", "text": "Skip 5s", "viewId": "com.example.app:id/skip", "clickable": true}
        ]
    }))
    .unwrap();
    let tree = UiTree::build(spec);
    assert_eq!(tree.len(), 2);

    let skip = sel("Button[vid='skip' && text^='Skip']")
        .find_first(&tree.root(), MatchOptions::fast())
        .unwrap();
    let snapshot = ElementSnapshot::capture(&skip);
    assert_eq!(snapshot.text.as_deref(), Some("Skip 5s"));
    assert_eq!(snapshot.vid.as_deref(), Some("skip"));
    assert!(snapshot.clickable);
    assert_eq!(snapshot.depth, 1);
    assert_eq!(snapshot.center(), None);
}

/// A tree without indexed lookups, to exercise the walk fallback
#[derive(Clone, PartialEq, Debug)]
struct Plain {
    path: Vec<usize>,
}

const PLAIN_TEXT: [&str; 3] = ["root", "left", "right"];

impl Node for Plain {
    fn attr(&self, attr: Attr) -> AttrValue {
        let idx = self.path.last().map(|i| i + 1).unwrap_or(0);
        match attr {
            Attr::Text => AttrValue::Str(PLAIN_TEXT[idx].to_string()),
            Attr::Name => AttrValue::Str("View".to_string()),
            _ => AttrValue::Null,
        }
    }

    fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }
        Some(Plain {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    fn children(&self) -> Vec<Self> {
        if !self.path.is_empty() {
            return Vec::new();
        }
        vec![Plain { path: vec![0] }, Plain { path: vec![1] }]
    }
}

#[test]
fn test_fast_query_falls_back_without_index() {
    let root = Plain { path: vec![] };
    let found = sel("[text='right']").find_first(&root, MatchOptions::fast());
    assert_eq!(found, Some(Plain { path: vec![1] }));
    assert_eq!(
        sel("[text='left'] + View").find_first(&root, MatchOptions::default()),
        Some(Plain { path: vec![1] })
    );
}

#[test]
fn test_default_document_position_follows_child_order() {
    let root = Plain { path: vec![] };
    let children = root.children();
    assert!(root.document_position() < children[0].document_position());
    assert!(children[0].document_position() < children[1].document_position());
}
