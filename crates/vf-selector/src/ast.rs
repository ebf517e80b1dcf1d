//! Selector syntax tree

use regex::Regex;
use std::fmt;

use crate::error::SelectorResult;
use crate::parser::Parser;

/// Type of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Bool,
}

/// Node attributes addressable from a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    /// Full view id resource name, e.g. `com.app:id/close`
    Id,
    /// View id without the `{package}:id/` prefix
    Vid,
    Text,
    /// Content description
    Desc,
    /// Class name
    Name,
    Clickable,
    Focusable,
    Checkable,
    Checked,
    Editable,
    LongClickable,
    VisibleToUser,
    Scrollable,
    Selected,
    Focused,
    Enabled,
    ChildCount,
    /// Position among the parent's children, 0-based
    Index,
    /// Distance from the root, which has depth 0
    Depth,
    Left,
    Top,
    Right,
    Bottom,
    Width,
    Height,
}

impl Attr {
    /// Resolve an identifier, including the accepted aliases
    pub fn from_name(name: &str) -> Option<Attr> {
        let attr = match name {
            "id" | "viewId" => Attr::Id,
            "vid" => Attr::Vid,
            "text" => Attr::Text,
            "desc" | "contentDescription" => Attr::Desc,
            "name" | "class" | "className" => Attr::Name,
            "clickable" => Attr::Clickable,
            "focusable" => Attr::Focusable,
            "checkable" => Attr::Checkable,
            "checked" => Attr::Checked,
            "editable" => Attr::Editable,
            "longClickable" => Attr::LongClickable,
            "visibleToUser" => Attr::VisibleToUser,
            "scrollable" => Attr::Scrollable,
            "selected" => Attr::Selected,
            "focused" => Attr::Focused,
            "enabled" => Attr::Enabled,
            "childCount" => Attr::ChildCount,
            "index" => Attr::Index,
            "depth" => Attr::Depth,
            "left" => Attr::Left,
            "top" => Attr::Top,
            "right" => Attr::Right,
            "bottom" => Attr::Bottom,
            "width" => Attr::Width,
            "height" => Attr::Height,
            _ => return None,
        };
        Some(attr)
    }

    /// Canonical identifier
    pub fn name(&self) -> &'static str {
        match self {
            Attr::Id => "id",
            Attr::Vid => "vid",
            Attr::Text => "text",
            Attr::Desc => "desc",
            Attr::Name => "name",
            Attr::Clickable => "clickable",
            Attr::Focusable => "focusable",
            Attr::Checkable => "checkable",
            Attr::Checked => "checked",
            Attr::Editable => "editable",
            Attr::LongClickable => "longClickable",
            Attr::VisibleToUser => "visibleToUser",
            Attr::Scrollable => "scrollable",
            Attr::Selected => "selected",
            Attr::Focused => "focused",
            Attr::Enabled => "enabled",
            Attr::ChildCount => "childCount",
            Attr::Index => "index",
            Attr::Depth => "depth",
            Attr::Left => "left",
            Attr::Top => "top",
            Attr::Right => "right",
            Attr::Bottom => "bottom",
            Attr::Width => "width",
            Attr::Height => "height",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Attr::Id | Attr::Vid | Attr::Text | Attr::Desc | Attr::Name => ValueKind::Str,
            Attr::ChildCount
            | Attr::Index
            | Attr::Depth
            | Attr::Left
            | Attr::Top
            | Attr::Right
            | Attr::Bottom
            | Attr::Width
            | Attr::Height => ValueKind::Int,
            _ => ValueKind::Bool,
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Starts,
    NotStarts,
    Contains,
    NotContains,
    Ends,
    NotEnds,
    Matches,
    NotMatches,
}

impl Operator {
    /// Operators in longest-first order for the tokenizer
    pub(crate) const ALL: [Operator; 14] = [
        Operator::NotStarts,
        Operator::NotContains,
        Operator::NotEnds,
        Operator::NotMatches,
        Operator::Ne,
        Operator::Starts,
        Operator::Contains,
        Operator::Ends,
        Operator::Matches,
        Operator::Le,
        Operator::Ge,
        Operator::Eq,
        Operator::Lt,
        Operator::Gt,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Starts => "^=",
            Operator::NotStarts => "!^=",
            Operator::Contains => "*=",
            Operator::NotContains => "!*=",
            Operator::Ends => "$=",
            Operator::NotEnds => "!$=",
            Operator::Matches => "~=",
            Operator::NotMatches => "!~=",
        }
    }

    /// Whether the operator holds when the attribute is absent
    pub(crate) fn holds_for_null(&self) -> bool {
        matches!(
            self,
            Operator::Ne
                | Operator::NotStarts
                | Operator::NotContains
                | Operator::NotEnds
                | Operator::NotMatches
        )
    }

    pub(crate) fn accepts(&self, kind: ValueKind) -> bool {
        match kind {
            ValueKind::Str => true,
            ValueKind::Int => matches!(
                self,
                Operator::Eq
                    | Operator::Ne
                    | Operator::Lt
                    | Operator::Le
                    | Operator::Gt
                    | Operator::Ge
            ),
            ValueKind::Bool => matches!(self, Operator::Eq | Operator::Ne),
        }
    }
}

/// Literal on the right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl Literal {
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Literal::Str(_) => Some(ValueKind::Str),
            Literal::Int(_) => Some(ValueKind::Int),
            Literal::Bool(_) => Some(ValueKind::Bool),
            Literal::Null => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => write!(f, "{s:?}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// `attr op literal`, optionally on `attr.length`
#[derive(Debug, Clone)]
pub struct Comparison {
    pub attr: Attr,
    /// Compare the character count of a string attribute
    pub length: bool,
    pub op: Operator,
    pub literal: Literal,
    /// Compiled pattern for `~=` / `!~=`
    pub(crate) regex: Option<Regex>,
}

impl Comparison {
    /// Type of the left-hand side
    pub fn operand_kind(&self) -> ValueKind {
        if self.length {
            ValueKind::Int
        } else {
            self.attr.kind()
        }
    }
}

/// Boolean predicate over a node's attributes
#[derive(Debug, Clone)]
pub enum Expr {
    Compare(Comparison),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Direction of a connector, read from the right unit to the left unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Left is an ancestor of right
    Ancestor,
    /// Left is a child or descendant of right
    Child,
    /// Left is a previous sibling of right
    PrevSibling,
    /// Left is a next sibling of right
    NextSibling,
}

impl Axis {
    pub fn symbol(&self) -> char {
        match self {
            Axis::Ancestor => '>',
            Axis::Child => '<',
            Axis::PrevSibling => '+',
            Axis::NextSibling => '-',
        }
    }
}

/// Which related nodes a connector reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Single symbol: parent, every direct child, or adjacent sibling
    Direct,
    /// Exactly the n-th step along the axis, 1-based
    Nth(usize),
    /// Doubled symbol: every node along the axis
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connector {
    pub axis: Axis,
    pub position: Position,
}

impl Connector {
    pub const DESCENDANT: Connector = Connector {
        axis: Axis::Ancestor,
        position: Position::Any,
    };
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self.axis.symbol();
        match self.position {
            Position::Direct => write!(f, "{symbol}"),
            Position::Nth(n) => write!(f, "{symbol}{n}"),
            Position::Any => write!(f, "{symbol}{symbol}"),
        }
    }
}

/// One unit of a selector: optional class name and attribute predicates
#[derive(Debug, Clone)]
pub struct Unit {
    /// Class name to match, `None` for `*` or omitted
    pub name: Option<String>,
    /// Conjunction of every `[...]` block
    pub expr: Option<Expr>,
    pub is_target: bool,
}

/// A parsed selector
#[derive(Debug, Clone)]
pub struct Selector {
    pub(crate) source: String,
    /// Units left to right
    pub(crate) units: Vec<Unit>,
    /// `connectors[i]` joins `units[i]` and `units[i + 1]`
    pub(crate) connectors: Vec<Connector>,
    /// Index of the unit whose node is returned
    pub(crate) target: usize,
}

impl Selector {
    /// Parse and type-check a selector
    pub fn parse(source: &str) -> SelectorResult<Selector> {
        Parser::new(source).parse_selector()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn target_index(&self) -> usize {
        self.target
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Selector {
    type Err = crate::SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}
