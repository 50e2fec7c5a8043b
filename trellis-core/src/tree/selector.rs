//! Selectors
//!
//! A small CSS selector dialect used to bind directives to template
//! locations and to pick projected content.
//!
//! # Grammar
//!
//! ```text
//! selector  := compound (combinator compound)*
//! combinator:= whitespace | '>'
//! compound  := (tag | '*')? ( '#' ident | '.' ident | '[' ident ('=' value)? ']' )*
//! ```
//!
//! Matching runs right to left: the last compound must match the candidate
//! node, earlier compounds are checked against its ancestors.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use super::{NodeId, VTree};

/// Errors from parsing a selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unexpected `{found}` at offset {offset} in selector `{selector}`")]
    Unexpected {
        selector: String,
        found: char,
        offset: usize,
    },

    #[error("unterminated attribute test in selector `{0}`")]
    UnterminatedAttribute(String),

    #[error("selector `{0}` ends with a combinator")]
    DanglingCombinator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeTest {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: SmallVec<[String; 2]>,
    attributes: SmallVec<[AttributeTest; 1]>,
}

impl Compound {
    fn matches(&self, tree: &VTree, node: NodeId) -> bool {
        let Some(node) = tree.get(node) else {
            return false;
        };
        let Some(tag) = node.tag() else {
            return false;
        };

        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.element_id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| node.has_class(class)) {
            return false;
        }
        self.attributes.iter().all(|test| match (&test.value, node.attribute(&test.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        })
    }
}

/// A parsed selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    text: String,
    /// The combinator of the first step is never consulted.
    steps: Vec<(Combinator, Compound)>,
}

impl Selector {
    /// Parse a selector.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut parser = Parser {
            text,
            chars: text.chars().collect(),
            pos: 0,
        };
        let mut steps = Vec::new();

        loop {
            parser.skip_whitespace();
            let Some(c) = parser.peek() else {
                break;
            };

            let combinator = if c == '>' {
                if steps.is_empty() {
                    return Err(parser.unexpected());
                }
                parser.pos += 1;
                parser.skip_whitespace();
                if parser.peek().is_none() {
                    return Err(SelectorError::DanglingCombinator(text.to_string()));
                }
                Combinator::Child
            } else {
                Combinator::Descendant
            };

            let compound = parser.compound()?;
            steps.push((combinator, compound));
        }

        Ok(Self {
            text: text.to_string(),
            steps,
        })
    }

    /// The selector as written.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Check whether `node` in `tree` matches this selector.
    pub fn matches(&self, tree: &VTree, node: NodeId) -> bool {
        self.matches_step(tree, node, self.steps.len() - 1)
    }

    fn matches_step(&self, tree: &VTree, node: NodeId, step: usize) -> bool {
        let (combinator, compound) = &self.steps[step];
        if !compound.matches(tree, node) {
            return false;
        }
        if step == 0 {
            return true;
        }

        match combinator {
            Combinator::Child => tree
                .parent(node)
                .map(|parent| self.matches_step(tree, parent, step - 1))
                .unwrap_or(false),
            Combinator::Descendant => {
                let mut current = tree.parent(node);
                while let Some(ancestor) = current {
                    if self.matches_step(tree, ancestor, step - 1) {
                        return true;
                    }
                    current = tree.parent(ancestor);
                }
                false
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '$' | ':')
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                selector: self.text.to_string(),
                found,
                offset: self.pos,
            },
            None => SelectorError::DanglingCombinator(self.text.to_string()),
        }
    }

    fn name(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.unexpected());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.pos;
        let mut compound = Compound::default();

        match self.peek() {
            Some('*') => self.pos += 1,
            Some(c) if is_name_char(c) => compound.tag = Some(self.name()?),
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.name()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.name()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attributes.push(self.attribute()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.unexpected());
        }
        if self.peek().is_some_and(|c| !c.is_whitespace() && c != '>') {
            return Err(self.unexpected());
        }
        Ok(compound)
    }

    fn attribute(&mut self) -> Result<AttributeTest, SelectorError> {
        self.skip_whitespace();
        let name = self.name()?;
        self.skip_whitespace();

        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => {
                        self.pos += 1;
                        let start = self.pos;
                        while self.peek().is_some_and(|c| c != quote) {
                            self.pos += 1;
                        }
                        if self.peek().is_none() {
                            return Err(SelectorError::UnterminatedAttribute(self.text.to_string()));
                        }
                        let value: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        value
                    }
                    Some(_) => self.name()?,
                    None => return Err(SelectorError::UnterminatedAttribute(self.text.to_string())),
                };
                self.skip_whitespace();
                Some(value)
            }
            Some(_) => return Err(self.unexpected()),
            None => return Err(SelectorError::UnterminatedAttribute(self.text.to_string())),
        };

        if self.peek() != Some(']') {
            return Err(SelectorError::UnterminatedAttribute(self.text.to_string()));
        }
        self.pos += 1;
        Ok(AttributeTest { name, value })
    }
}
