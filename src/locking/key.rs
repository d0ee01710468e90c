// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Derivation of lock keys from a protected operation's arguments.
//!
//! Operations expose their arguments by name through [`KeyArgs`]; a
//! [`KeyTemplate`] turns them into the concrete key for one call, either by
//! substituting `{name}` placeholders or by delegating to a function.

use crate::error::KeyTemplateError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::sync::Arc;

/// Named view over the arguments of one call.
///
/// Structs implement this by hand, one arm per field. The defaults make an
/// empty `impl` enough for operations that only use function templates.
pub trait KeyArgs {
    /// String form of the argument called `name`, if the call supplied it.
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }

    /// Names of the arguments the call supplied.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<V: Display> KeyArgs for HashMap<String, V> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl<V: Display> KeyArgs for BTreeMap<String, V> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl<K: AsRef<str>, V: Display> KeyArgs for Vec<(K, V)> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.to_string())
    }

    fn names(&self) -> Vec<String> {
        self.iter().map(|(key, _)| key.as_ref().to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

type KeyFn<A> = dyn Fn(&A) -> String + Send + Sync;

enum TemplateKind<A> {
    Pattern {
        source: String,
        segments: Vec<Segment>,
        defaults: BTreeMap<String, String>,
    },
    Function(Arc<KeyFn<A>>),
}

/// Recipe for the lock key of a protected operation.
///
/// Bound once when the operation is declared and evaluated on every call with
/// that call's arguments.
pub struct KeyTemplate<A> {
    kind: TemplateKind<A>,
}

impl<A> KeyTemplate<A> {
    /// Parses a pattern such as `"stock:{sku}"`.
    ///
    /// `{{` and `}}` stand for literal braces. Malformed patterns are rejected
    /// here, before any call is made.
    pub fn pattern(source: impl Into<String>) -> Result<Self, KeyTemplateError> {
        let source = source.into();
        let segments = parse_pattern(&source)?;
        Ok(Self {
            kind: TemplateKind::Pattern {
                source,
                segments,
                defaults: BTreeMap::new(),
            },
        })
    }

    /// Uses the return value of `f` verbatim as the key.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            kind: TemplateKind::Function(Arc::new(f)),
        }
    }

    /// Value used for `name` when a call does not supply it.
    ///
    /// Has no effect on function templates.
    pub fn with_default(mut self, name: impl Into<String>, value: impl Display) -> Self {
        if let TemplateKind::Pattern { defaults, .. } = &mut self.kind {
            defaults.insert(name.into(), value.to_string());
        }
        self
    }

    /// Placeholder names in order of appearance; empty for function templates.
    pub fn placeholders(&self) -> Vec<&str> {
        match &self.kind {
            TemplateKind::Pattern { segments, .. } => segments
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Placeholder(name) => Some(name.as_str()),
                    Segment::Literal(_) => None,
                })
                .collect(),
            TemplateKind::Function(_) => Vec::new(),
        }
    }
}

impl<A: KeyArgs> KeyTemplate<A> {
    /// Produces the key for one call.
    pub fn resolve(&self, args: &A) -> Result<String, KeyTemplateError> {
        let (segments, defaults) = match &self.kind {
            TemplateKind::Function(f) => return Ok(f(args)),
            TemplateKind::Pattern {
                segments, defaults, ..
            } => (segments, defaults),
        };

        let mut key = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Placeholder(name) => {
                    let value = args
                        .lookup(name)
                        .or_else(|| defaults.get(name).cloned())
                        .ok_or_else(|| KeyTemplateError::MissingArgument {
                            name: name.clone(),
                            available: available_names(args, defaults),
                        })?;
                    key.push_str(&value);
                }
            }
        }
        Ok(key)
    }
}

impl<A> Clone for KeyTemplate<A> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            TemplateKind::Pattern {
                source,
                segments,
                defaults,
            } => TemplateKind::Pattern {
                source: source.clone(),
                segments: segments.clone(),
                defaults: defaults.clone(),
            },
            TemplateKind::Function(f) => TemplateKind::Function(Arc::clone(f)),
        };
        Self { kind }
    }
}

impl<A> fmt::Debug for KeyTemplate<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TemplateKind::Pattern {
                source, defaults, ..
            } => f
                .debug_struct("KeyTemplate")
                .field("pattern", source)
                .field("defaults", defaults)
                .finish(),
            TemplateKind::Function(_) => f.write_str("KeyTemplate(<function>)"),
        }
    }
}

fn available_names<A: KeyArgs>(args: &A, defaults: &BTreeMap<String, String>) -> Vec<String> {
    let mut names: BTreeSet<String> = args.names().into_iter().collect();
    names.extend(defaults.keys().cloned());
    names.into_iter().collect()
}

fn parse_pattern(source: &str) -> Result<Vec<Segment>, KeyTemplateError> {
    let malformed = |details: &str| KeyTemplateError::Malformed {
        template: source.to_string(),
        details: details.to_string(),
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(malformed("single '}' encountered")),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err(malformed("unexpected '{' inside placeholder")),
                        Some(c) if c.is_alphanumeric() || c == '_' => name.push(c),
                        Some(c) => {
                            return Err(malformed(&format!(
                                "unsupported character '{c}' in placeholder; only plain \
                                 '{{name}}' placeholders are supported"
                            )));
                        }
                        None => return Err(malformed("unclosed '{'")),
                    }
                }
                if name.is_empty() {
                    return Err(malformed("empty placeholder '{}'"));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
