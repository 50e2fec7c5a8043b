//! Markup
//!
//! A minimal HTML-like markup reader and writer for authoring templates and
//! inspecting rendered trees.
//!
//! Supported: elements with quoted, bare or valueless attributes, self-closing
//! elements (`<b/>`), text with the five basic entities, and comments (which
//! are dropped). Whitespace-only text between tags is dropped as well.

use thiserror::Error;

use super::{NodeId, NodeKind, TreeError, VTree};

/// Errors from parsing markup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("expected {expected} at offset {offset}")]
    Expected {
        expected: &'static str,
        offset: usize,
    },

    #[error("closing tag </{found}> does not match <{expected}> at offset {offset}")]
    MismatchedClose {
        expected: String,
        found: String,
        offset: usize,
    },

    #[error("closing tag </{found}> at offset {offset} has no opening tag")]
    UnexpectedClose { found: String, offset: usize },

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("comment starting at offset {0} is never closed")]
    UnclosedComment(usize),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl VTree {
    /// Parse markup into a new tree. The journal of the result is empty.
    pub fn parse(markup: &str) -> Result<Self, MarkupError> {
        let mut tree = VTree::new();
        Reader {
            chars: markup.chars().collect(),
            pos: 0,
        }
        .read_into(&mut tree)?;
        tree.take_mutations();
        Ok(tree)
    }

    /// Serialize the live content of the tree.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for child in self.live_children(self.root()) {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serialize one live subtree.
    pub fn node_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        match node.kind() {
            NodeKind::Root => {
                for child in self.live_children(id) {
                    self.write_node(child, out);
                }
            }
            NodeKind::Text(text) => escape_into(text, false, out),
            NodeKind::Element { tag } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in node.attributes() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                for child in self.live_children(id) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '$')
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        prefix
            .chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), MarkupError> {
        if self.peek() != Some(c) {
            return Err(MarkupError::Expected {
                expected,
                offset: self.pos,
            });
        }
        self.pos += 1;
        Ok(())
    }

    fn name(&mut self, expected: &'static str) -> Result<String, MarkupError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(MarkupError::Expected {
                expected,
                offset: start,
            });
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn read_into(&mut self, tree: &mut VTree) -> Result<(), MarkupError> {
        let mut stack: Vec<(NodeId, String)> = Vec::new();

        while self.peek().is_some() {
            let parent = stack.last().map(|(id, _)| *id).unwrap_or(tree.root());

            if self.starts_with("<!--") {
                let start = self.pos;
                self.pos += 4;
                while !self.starts_with("-->") {
                    if self.peek().is_none() {
                        return Err(MarkupError::UnclosedComment(start));
                    }
                    self.pos += 1;
                }
                self.pos += 3;
            } else if self.starts_with("</") {
                let offset = self.pos;
                self.pos += 2;
                let found = self.name("a tag name")?;
                self.skip_whitespace();
                self.expect('>', "`>`")?;
                match stack.pop() {
                    Some((_, expected)) if expected == found => {}
                    Some((_, expected)) => {
                        return Err(MarkupError::MismatchedClose {
                            expected,
                            found,
                            offset,
                        })
                    }
                    None => return Err(MarkupError::UnexpectedClose { found, offset }),
                }
            } else if self.peek() == Some('<') {
                self.pos += 1;
                let tag = self.name("a tag name")?;
                let element = tree.create_element(tag.clone());
                let self_closing = self.attributes(tree, element)?;
                tree.append_child(parent, element)?;
                if !self_closing {
                    stack.push((element, tag));
                }
            } else {
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '<') {
                    self.pos += 1;
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                if !raw.trim().is_empty() {
                    let text = tree.create_text(unescape(&raw));
                    tree.append_child(parent, text)?;
                }
            }
        }

        match stack.pop() {
            Some((_, tag)) => Err(MarkupError::Unclosed(tag)),
            None => Ok(()),
        }
    }

    /// Read attributes up to the end of an opening tag.
    ///
    /// Returns whether the tag was self-closing.
    fn attributes(&mut self, tree: &mut VTree, element: NodeId) -> Result<bool, MarkupError> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    self.pos += 1;
                    self.expect('>', "`>`")?;
                    return Ok(true);
                }
                Some('>') => {
                    self.pos += 1;
                    return Ok(false);
                }
                None => {
                    return Err(MarkupError::Expected {
                        expected: "`>`",
                        offset: self.pos,
                    })
                }
                Some(_) => {}
            }

            let name = self.name("an attribute name")?;
            self.skip_whitespace();
            let value = if self.peek() == Some('=') {
                self.pos += 1;
                self.skip_whitespace();
                match self.peek() {
                    Some(quote @ ('"' | '\'')) => {
                        self.pos += 1;
                        let start = self.pos;
                        while self.peek().is_some_and(|c| c != quote) {
                            self.pos += 1;
                        }
                        let raw: String = self.chars[start..self.pos].iter().collect();
                        self.expect(quote, "a closing quote")?;
                        unescape(&raw)
                    }
                    _ => self.name("an attribute value")?,
                }
            } else {
                String::new()
            };
            tree.set_attribute(element, name, value)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_markup() {
        let markup = r#"<div class="a b"><span id="x">Hello <em>there</em></span><b></b></div>"#;
        let tree = VTree::parse(markup).unwrap();
        assert_eq!(tree.to_markup(), markup);
    }

    #[test]
    fn self_closing_and_bare_attributes() {
        let tree = VTree::parse(r#"<div><b $repeat=items/><input disabled></input></div>"#).unwrap();
        assert_eq!(
            tree.to_markup(),
            r#"<div><b $repeat="items"></b><input disabled=""></input></div>"#
        );
    }

    #[test]
    fn drops_comments_and_blank_text() {
        let tree = VTree::parse("<ul>\n  <!-- items -->\n  <li>one</li>\n</ul>").unwrap();
        assert_eq!(tree.to_markup(), "<ul><li>one</li></ul>");
    }

    #[test]
    fn entities_are_decoded_and_reencoded() {
        let tree = VTree::parse(r#"<p title="&quot;q&quot;">a &lt; b &amp; c</p>"#).unwrap();
        let p = tree.first_child(tree.root()).unwrap();
        assert_eq!(tree.get(p).unwrap().attribute("title"), Some("\"q\""));
        assert_eq!(tree.to_markup(), r#"<p title="&quot;q&quot;">a &lt; b &amp; c</p>"#);
    }

    #[test]
    fn reports_mismatched_close() {
        assert_eq!(
            VTree::parse("<div><span></div>").unwrap_err(),
            MarkupError::MismatchedClose {
                expected: "span".into(),
                found: "div".into(),
                offset: 11,
            }
        );
    }

    #[test]
    fn reports_unclosed_and_stray_tags() {
        assert_eq!(
            VTree::parse("<div>").unwrap_err(),
            MarkupError::Unclosed("div".into())
        );
        assert!(matches!(
            VTree::parse("</p>").unwrap_err(),
            MarkupError::UnexpectedClose { .. }
        ));
        assert!(matches!(
            VTree::parse("<p><!-- open").unwrap_err(),
            MarkupError::UnclosedComment(3)
        ));
        assert!(matches!(
            VTree::parse("< p>").unwrap_err(),
            MarkupError::Expected { offset: 1, .. }
        ));
    }

    #[test]
    fn parsed_tree_has_empty_journal() {
        let tree = VTree::parse("<a><b></b></a>").unwrap();
        assert!(tree.mutations().is_empty());
    }
}
