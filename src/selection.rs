//! Selection trees and the per-type partitioner
//!
//! An incoming "resolve these mixed-type references" query carries one
//! composite selection with type-conditioned branches:
//!
//! ```text
//! {
//!   ... on Actor { id name movies { title } }
//!   ... on Movie { id title actors { name } }
//! }
//! ```
//!
//! [`SelectionSet::partition_by_type`] splits that tree into a map from type
//! name to the sub-selection for that type, which is what each per-type
//! loader hands to the underlying store. Unconditioned top-level fields are
//! not attributed to any type. Known limitation: callers must put entity
//! fields under a type condition.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Result};

/// Mapping from entity type name to the sub-selection requested for it.
///
/// Built once per incoming request and immutable afterward.
pub type SelectionMap = HashMap<String, SelectionSet>;

/// A single selection inside a selection set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Selection {
    /// A plain field, optionally with a nested selection set
    #[serde(rename_all = "camelCase")]
    Field {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selection_set: Option<SelectionSet>,
    },
    /// A type-conditioned branch (`... on TypeName { ... }`)
    #[serde(rename_all = "camelCase")]
    Fragment {
        type_condition: String,
        selection_set: SelectionSet,
    },
}

/// A braced list of selections
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    pub selections: Vec<Selection>,
}

impl SelectionSet {
    /// Parse a selection set from its text form.
    ///
    /// Grammar: `'{' (field selection_set? | '...' 'on' name selection_set)* '}'`.
    /// Commas are treated as whitespace.
    pub fn parse(input: &str) -> Result<SelectionSet> {
        let mut tokens = tokenize(input)?;
        tokens.reverse(); // pop() from the front
        let set = parse_selection_set(&mut tokens)?;
        if let Some(tok) = tokens.pop() {
            return Err(ResolveError::InvalidSelection(format!(
                "unexpected trailing '{tok}'"
            )));
        }
        Ok(set)
    }

    /// Print the selection set in its canonical single-line form,
    /// e.g. `{ id name movies { title } }`.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Split a composite selection into per-type sub-selections.
    ///
    /// Each `... on TypeName { ... }` branch is recorded verbatim under
    /// `TypeName`. Plain top-level fields are skipped (not attributed to any
    /// type). If the same type condition appears twice, the later branch
    /// wins. Idempotent and side-effect-free; the returned sub-selections
    /// are structural clones.
    pub fn partition_by_type(&self) -> SelectionMap {
        let mut map = SelectionMap::new();
        for selection in &self.selections {
            if let Selection::Fragment {
                type_condition,
                selection_set,
            } = selection
            {
                map.insert(type_condition.clone(), selection_set.clone());
            }
        }
        map
    }

    /// Check if there are no selections
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for selection in &self.selections {
            match selection {
                Selection::Field {
                    name,
                    selection_set,
                } => {
                    write!(f, " {name}")?;
                    if let Some(sub) = selection_set {
                        write!(f, " {sub}")?;
                    }
                }
                Selection::Fragment {
                    type_condition,
                    selection_set,
                } => {
                    write!(f, " ... on {type_condition} {selection_set}")?;
                }
            }
        }
        write!(f, " }}")
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    Ellipsis,
    Name(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Ellipsis => write!(f, "..."),
            Token::Name(n) => write!(f, "{n}"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            '.' => {
                for _ in 0..3 {
                    if chars.next() != Some('.') {
                        return Err(ResolveError::InvalidSelection(
                            "expected '...'".to_string(),
                        ));
                    }
                }
                tokens.push(Token::Ellipsis);
            }
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            c => {
                return Err(ResolveError::InvalidSelection(format!(
                    "unexpected character '{c}'"
                )));
            }
        }
    }

    Ok(tokens)
}

/// Parse one selection set from a reversed token stream (pop = next token)
fn parse_selection_set(tokens: &mut Vec<Token>) -> Result<SelectionSet> {
    match tokens.pop() {
        Some(Token::LBrace) => {}
        other => {
            return Err(ResolveError::InvalidSelection(format!(
                "expected '{{', got {}",
                other.map_or("end of input".to_string(), |t| format!("'{t}'"))
            )));
        }
    }

    let mut selections = Vec::new();
    loop {
        match tokens.pop() {
            Some(Token::RBrace) => break,
            Some(Token::Name(name)) => {
                // Nested selection set is optional for fields
                let selection_set = if tokens.last() == Some(&Token::LBrace) {
                    Some(parse_selection_set(tokens)?)
                } else {
                    None
                };
                selections.push(Selection::Field {
                    name,
                    selection_set,
                });
            }
            Some(Token::Ellipsis) => {
                match tokens.pop() {
                    Some(Token::Name(kw)) if kw == "on" => {}
                    _ => {
                        return Err(ResolveError::InvalidSelection(
                            "expected 'on' after '...'".to_string(),
                        ));
                    }
                }
                let type_condition = match tokens.pop() {
                    Some(Token::Name(name)) => name,
                    _ => {
                        return Err(ResolveError::InvalidSelection(
                            "expected type name after 'on'".to_string(),
                        ));
                    }
                };
                let selection_set = parse_selection_set(tokens)?;
                selections.push(Selection::Fragment {
                    type_condition,
                    selection_set,
                });
            }
            Some(tok) => {
                return Err(ResolveError::InvalidSelection(format!(
                    "unexpected '{tok}'"
                )));
            }
            None => {
                return Err(ResolveError::InvalidSelection(
                    "unclosed selection set".to_string(),
                ));
            }
        }
    }

    Ok(SelectionSet { selections })
}
