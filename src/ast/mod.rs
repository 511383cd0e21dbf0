//! AST-based extraction: tolerant parsing, pluggable visitors, and the
//! traversal driver.
//!
//! Visitors subscribe to node kinds and turn normalized node events into
//! detections. The extractor builds a `NodeKind -> visitors` dispatch table
//! once per traversal; new visitor types plug in by registration and the
//! core never enumerates them.

pub mod extractor;
pub mod parser;
pub mod visitors;

pub use extractor::{AstExtractor, ExtractMetadata, ExtractOptions, ExtractOutcome};
pub use parser::{parse_program, preprocess, ParseFailure, ParseMode};

use crate::types::{Detection, Location, Position};

/// Node kinds visitors can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    VariableDeclarator,
    AssignmentExpression,
    Property,
    CallExpression,
    Literal,
    TemplateLiteral,
    MemberExpression,
    ObjectExpression,
    ExportDefaultDeclaration,
    BinaryExpression,
}

/// A resolved string value together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedString {
    pub value: String,
    /// True for plain literals and single-quasi templates; false when the
    /// value came through an `x || 'default'` fallback.
    pub literal: bool,
}

/// One call argument, normalized for visitor consumption.
#[derive(Debug, Clone, Default)]
pub struct CallArg {
    /// Raw source text of the argument (possibly truncated).
    pub text: String,
    /// Resolved string value for literals and single-quasi templates.
    pub string_value: Option<String>,
    /// Numeric value for number literals.
    pub number_value: Option<f64>,
    /// For object-expression arguments: `key -> literal string value`.
    pub object_props: Vec<(String, Option<String>)>,
}

/// Normalized payload of a node event.
#[derive(Debug, Clone)]
pub enum NodeData {
    VariableDeclarator {
        name: Option<String>,
        kind: &'static str,
        value: Option<ResolvedString>,
    },
    Assignment {
        target: String,
        value: Option<ResolvedString>,
    },
    Property {
        key: String,
        value: Option<ResolvedString>,
    },
    Call {
        callee: String,
        is_new: bool,
        args: Vec<CallArg>,
        /// `[..].join(sep)` with all-literal elements.
        join_parts: Option<(Vec<String>, String)>,
    },
    StringLiteral {
        value: String,
    },
    TemplateLiteral {
        quasis: Vec<String>,
        expression_count: usize,
    },
    Member {
        path: String,
        /// True when this member expression is the target of an assignment.
        assigned: bool,
    },
    ObjectExpr {
        properties: Vec<PropertyEntry>,
        /// Nearest enclosing name: variable, property key, or assignment
        /// target; `module.exports` and default exports appear verbatim.
        container: Option<String>,
    },
    ExportDefault,
    Binary {
        /// Flattened `"a" + "b" + ...` concatenation when fully literal.
        reconstructed: Option<String>,
    },
}

/// One property of an object expression.
#[derive(Debug, Clone)]
pub struct PropertyEntry {
    pub key: String,
    pub value: Option<ResolvedString>,
    pub location: Location,
}

/// A node event delivered to subscribed visitors.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub kind: NodeKind,
    pub data: NodeData,
    pub location: Location,
    /// Context snippet: two lines above through two lines below the node.
    pub snippet: String,
}

/// Ancestor stack entry for containment queries.
#[derive(Debug, Clone)]
pub struct AncestorInfo {
    pub kind: NodeKind,
    pub name: Option<String>,
}

/// Per-traversal context handed to visitors.
pub struct VisitContext<'a> {
    pub source_url: &'a str,
    pub ancestors: &'a [AncestorInfo],
}

/// A pluggable extraction visitor. Implementations must be pure per node:
/// no shared mutable state between nodes; containment questions go through
/// `ctx.ancestors`.
pub trait AstVisitor: Send + Sync {
    fn name(&self) -> &'static str;
    fn node_kinds(&self) -> &'static [NodeKind];
    fn enabled(&self) -> bool {
        true
    }
    fn visit(&self, event: &NodeEvent, ctx: &VisitContext<'_>) -> Vec<Detection>;
    fn leave(&self, _event: &NodeEvent, _ctx: &VisitContext<'_>) {}
}

/// Byte-offset to line/column index over a source text.
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (idx, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx as u32 + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-based line, 0-based byte column.
    pub fn position(&self, offset: u32) -> Position {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position {
            line: line_idx as u32 + 1,
            column: offset - self.line_starts[line_idx],
        }
    }

    pub fn location(&self, start: u32, end: u32) -> Location {
        Location {
            start: self.position(start),
            end: self.position(end.max(start)),
        }
    }

    /// Snippet spanning `context` lines above and below the given lines.
    pub fn snippet(&self, source: &str, start_line: u32, end_line: u32, context: u32) -> String {
        let first = start_line.saturating_sub(context).max(1) as usize;
        let last = (end_line + context) as usize;

        source
            .lines()
            .enumerate()
            .filter(|(i, _)| *i + 1 >= first && *i + 1 <= last)
            .map(|(_, l)| l)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_positions() {
        let src = "ab\ncd\nef";
        let index = LineIndex::new(src);

        assert_eq!(index.position(0), Position { line: 1, column: 0 });
        assert_eq!(index.position(3), Position { line: 2, column: 0 });
        assert_eq!(index.position(4), Position { line: 2, column: 1 });
        assert_eq!(index.position(6), Position { line: 3, column: 0 });
    }

    #[test]
    fn test_snippet_bounds() {
        let src = "l1\nl2\nl3\nl4\nl5\nl6\nl7";
        let index = LineIndex::new(src);

        let snippet = index.snippet(src, 4, 4, 2);
        assert_eq!(snippet, "l2\nl3\nl4\nl5\nl6");

        // Clamped at the top of the file.
        let snippet = index.snippet(src, 1, 1, 2);
        assert_eq!(snippet, "l1\nl2\nl3");
    }
}
