//! Newick format parser and writer for rooted binary trees.
//!
//! Supports the Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree ',' subtree ')' label | label
//! label    = name? (':' length)?
//! ```
//!
//! Missing branch lengths read as 0. Bracketed comments (`[...]`) are
//! skipped. Nodes with one or more than two children are rejected by the
//! tree validation.

use crate::tree::{Node, NodeId, PtpTree};
use ptp_core::{PtpError, Result};

/// Parse a Newick string into a validated `PtpTree`.
pub fn parse(input: &str) -> Result<PtpTree> {
    let bytes = input.as_bytes();
    let mut parser = Parser::new(bytes);
    let (nodes, root) = parser.parse_tree()?;
    PtpTree::from_nodes(nodes, root)
}

/// Serialize a `PtpTree` to a Newick string.
///
/// The root's branch length is not written.
pub fn write(tree: &PtpTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

fn write_subtree(tree: &PtpTree, id: NodeId, buf: &mut String) {
    let node = tree.node(id);
    if !node.children.is_empty() {
        buf.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(tree, child, buf);
        }
        buf.push(')');
    }
    buf.push_str(&node.label);
    if !node.is_root() {
        buf.push(':');
        buf.push_str(&format_length(node.branch_length));
    }
}

/// Shortest fixed-point rendering with at most ten decimals.
fn format_length(len: f64) -> String {
    let s = format!("{:.10}", len);
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<(Vec<Node>, NodeId)> {
        self.skip_ignored()?;
        if self.peek().is_none() {
            return Err(PtpError::Parse("empty Newick string".into()));
        }
        let root = self.parse_subtree(None)?;
        self.skip_ignored()?;
        if self.peek() != Some(b';') {
            return Err(PtpError::Parse(format!(
                "expected ';' at position {}",
                self.pos
            )));
        }
        self.pos += 1;
        self.skip_ignored()?;
        if self.pos < self.input.len() {
            return Err(PtpError::Parse(format!(
                "trailing characters after ';' at position {}",
                self.pos
            )));
        }
        // The root's incoming length has no meaning for a rooted tree.
        self.nodes[root].branch_length = 0.0;
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_ignored()?;
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let first_child = self.parse_subtree(Some(id))?;
            self.nodes[id].children.push(first_child);

            loop {
                self.skip_ignored()?;
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(Some(id))?;
                    self.nodes[id].children.push(child);
                } else {
                    break;
                }
            }
            self.skip_ignored()?;
            if self.peek() != Some(b')') {
                return Err(PtpError::Parse(format!(
                    "expected ')' at position {}",
                    self.pos
                )));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        if self.nodes[id].children.is_empty() && self.nodes[id].label.is_empty() {
            return Err(PtpError::Parse(format!(
                "unlabelled leaf before position {}",
                self.pos
            )));
        }
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_ignored()?;
        let name = self.parse_name();
        self.nodes[id].label = name;
        self.skip_ignored()?;
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_ignored()?;
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(PtpError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str
                .parse()
                .map_err(|_| PtpError::Parse(format!("invalid branch length: '{}'", len_str)))?;
            if !(len >= 0.0 && len.is_finite()) {
                return Err(PtpError::Parse(format!(
                    "branch length must be finite and >= 0, got {}",
                    len_str
                )));
            }
            self.nodes[id].branch_length = len;
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' | b'[' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, parent, String::new(), 0.0));
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Skip whitespace and `[...]` comments.
    fn skip_ignored(&mut self) -> Result<()> {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b'[' => {
                    let close = self.input[self.pos..]
                        .iter()
                        .position(|&c| c == b']')
                        .ok_or_else(|| PtpError::Parse("unterminated '[' comment".into()))?;
                    self.pos += close + 1;
                }
                _ => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_pair() {
        let tree = parse("(A,B);").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.leaf_names(), vec!["A", "B"]);
    }

    #[test]
    fn parse_with_branch_lengths() {
        let tree = parse("(A:0.1,B:0.2):0.7;").unwrap();
        let root = tree.get_node(tree.root()).unwrap();
        assert_eq!(root.branch_length, 0.0);
        let a = tree.find_leaves(&["A"]).unwrap()[0];
        assert_eq!(tree.get_node(a).unwrap().branch_length, 0.1);
    }

    #[test]
    fn missing_lengths_read_as_zero() {
        let tree = parse("((A,B):2,C:1);").unwrap();
        let a = tree.find_leaves(&["A"]).unwrap()[0];
        assert_eq!(tree.get_node(a).unwrap().branch_length, 0.0);
    }

    #[test]
    fn parse_nested() {
        let tree = parse("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn parse_internal_labels_and_comments() {
        let tree = parse("((A,B)AB[support=90],(C,D)CD)root;").unwrap();
        let root = tree.get_node(tree.root()).unwrap();
        assert_eq!(root.label, "root");
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn parse_single_leaf() {
        let tree = parse("A:1.5;").unwrap();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.get_node(tree.root()).unwrap().label, "A");
    }

    #[test]
    fn parse_whitespace() {
        let tree = parse("  ( A : 0.1 , B : 0.2 ) ; \n").unwrap();
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn rejects_multifurcation() {
        assert!(matches!(
            parse("(A,B,C);"),
            Err(PtpError::MalformedTree(_))
        ));
    }

    #[test]
    fn rejects_unary_node() {
        assert!(parse("((A),B);").is_err());
    }

    #[test]
    fn rejects_negative_length() {
        assert!(matches!(parse("(A:-1,B:1);"), Err(PtpError::Parse(_))));
    }

    #[test]
    fn parse_error_unbalanced_parens() {
        assert!(parse("((A,B);").is_err());
    }

    #[test]
    fn parse_error_missing_semicolon() {
        assert!(parse("(A,B)").is_err());
    }

    #[test]
    fn parse_error_bad_float() {
        assert!(parse("(A:abc,B);").is_err());
    }

    #[test]
    fn parse_error_empty_and_trailing() {
        assert!(parse("   ").is_err());
        assert!(parse("(A,B);(C,D);").is_err());
    }

    #[test]
    fn write_simple() {
        let tree = parse("(A:1,B:2.5);").unwrap();
        assert_eq!(write(&tree), "(A:1,B:2.5);");
    }

    #[test]
    fn write_after_parse_is_stable() {
        let input = "((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);";
        let tree = parse(input).unwrap();
        assert_eq!(write(&tree), input);
    }
}
