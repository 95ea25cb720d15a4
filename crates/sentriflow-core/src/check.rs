//! Declarative rule checks and their compiled form.
//!
//! Packs and JSON rule files carry checks as a tagged union
//! ([`DeclarativeCheck`]); loading a pack compiles every check into a
//! [`CompiledCheck`] with regexes built and `custom` expressions parsed,
//! so execution never compiles anything. Default rules shipped in Rust
//! can instead supply a [`CheckBody::Native`] callable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Program;
use crate::helpers::HelperRegistry;
use crate::node::ConfigNode;

/// Maximum nesting depth for declarative check trees.
const MAX_CHECK_NESTING: usize = 32;

/// Default wall-clock budget for one `custom` check evaluation.
pub const DEFAULT_CUSTOM_CHECK_BUDGET: Duration = Duration::from_millis(100);

/// Errors from compiling or running a check.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("invalid pattern `{pattern}`")]
    InvalidPattern { pattern: String },

    #[error("unknown regex flag `{flag}`")]
    InvalidFlag { flag: char },

    #[error("check nesting exceeds {MAX_CHECK_NESTING}")]
    NestingTooDeep,

    /// Raised by native check bodies; never surfaced in reports.
    #[error("{0}")]
    Execution(String),
}

/// The wire form of a rule check (§ JSON rule file format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeclarativeCheck {
    Match {
        pattern: String,
        #[serde(default)]
        flags: String,
    },
    NotMatch {
        pattern: String,
        #[serde(default)]
        flags: String,
    },
    Contains {
        text: String,
    },
    NotContains {
        text: String,
    },
    ChildExists {
        selector: String,
    },
    ChildNotExists {
        selector: String,
    },
    ChildMatches {
        selector: String,
        pattern: String,
        #[serde(default)]
        flags: String,
    },
    ChildContains {
        selector: String,
        text: String,
    },
    And {
        conditions: Vec<DeclarativeCheck>,
    },
    Or {
        conditions: Vec<DeclarativeCheck>,
    },
    Not {
        condition: Box<DeclarativeCheck>,
    },
    Custom {
        code: String,
    },
}

impl DeclarativeCheck {
    /// Compile into an executable check.
    ///
    /// Regex patterns and flags are validated here so a bad pattern fails
    /// the pack at load time. `custom` code is the exception: it fails
    /// closed at evaluation instead, so a malformed expression can never
    /// reject an otherwise valid pack.
    pub fn compile(&self) -> Result<CompiledCheck, CheckError> {
        self.compile_at_depth(0)
    }

    fn compile_at_depth(&self, depth: usize) -> Result<CompiledCheck, CheckError> {
        if depth > MAX_CHECK_NESTING {
            return Err(CheckError::NestingTooDeep);
        }
        Ok(match self {
            DeclarativeCheck::Match { pattern, flags } => CompiledCheck::Match {
                regex: build_regex(pattern, flags)?,
            },
            DeclarativeCheck::NotMatch { pattern, flags } => CompiledCheck::NotMatch {
                regex: build_regex(pattern, flags)?,
            },
            DeclarativeCheck::Contains { text } => CompiledCheck::Contains { text: text.clone() },
            DeclarativeCheck::NotContains { text } => CompiledCheck::NotContains {
                text: text.clone(),
            },
            DeclarativeCheck::ChildExists { selector } => CompiledCheck::ChildExists {
                selector: selector.clone(),
            },
            DeclarativeCheck::ChildNotExists { selector } => CompiledCheck::ChildNotExists {
                selector: selector.clone(),
            },
            DeclarativeCheck::ChildMatches {
                selector,
                pattern,
                flags,
            } => CompiledCheck::ChildMatches {
                selector: selector.clone(),
                regex: build_regex(pattern, flags)?,
            },
            DeclarativeCheck::ChildContains { selector, text } => CompiledCheck::ChildContains {
                selector: selector.clone(),
                text: text.clone(),
            },
            DeclarativeCheck::And { conditions } => CompiledCheck::And {
                conditions: conditions
                    .iter()
                    .map(|c| c.compile_at_depth(depth + 1))
                    .collect::<Result<_, _>>()?,
            },
            DeclarativeCheck::Or { conditions } => CompiledCheck::Or {
                conditions: conditions
                    .iter()
                    .map(|c| c.compile_at_depth(depth + 1))
                    .collect::<Result<_, _>>()?,
            },
            DeclarativeCheck::Not { condition } => CompiledCheck::Not {
                condition: Box::new(condition.compile_at_depth(depth + 1)?),
            },
            DeclarativeCheck::Custom { code } => CompiledCheck::Custom {
                program: Program::parse(code),
            },
        })
    }
}

/// Build a regex from a pattern and the wire flag string.
///
/// Supported flags: `i` (case-insensitive), `m` (multi-line), `s`
/// (dot-matches-newline).
fn build_regex(pattern: &str, flags: &str) -> Result<Regex, CheckError> {
    for flag in flags.chars() {
        if !matches!(flag, 'i' | 'm' | 's') {
            return Err(CheckError::InvalidFlag { flag });
        }
    }
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    Regex::new(&full).map_err(|_| CheckError::InvalidPattern {
        pattern: pattern.to_string(),
    })
}

/// Context a check evaluates in.
pub struct CheckContext<'a> {
    pub helpers: &'a HelperRegistry,
    /// Wall-clock budget for one `custom` expression evaluation.
    pub custom_budget: Duration,
    /// Active vendor filter, when one is set for the scan.
    pub vendor: Option<String>,
}

impl<'a> CheckContext<'a> {
    pub fn new(helpers: &'a HelperRegistry) -> Self {
        Self {
            helpers,
            custom_budget: DEFAULT_CUSTOM_CHECK_BUDGET,
            vendor: None,
        }
    }

    pub fn with_custom_budget(mut self, budget: Duration) -> Self {
        self.custom_budget = budget;
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }
}

/// An executable check with all patterns pre-compiled.
#[derive(Debug, Clone)]
pub enum CompiledCheck {
    Match { regex: Regex },
    NotMatch { regex: Regex },
    Contains { text: String },
    NotContains { text: String },
    ChildExists { selector: String },
    ChildNotExists { selector: String },
    ChildMatches { selector: String, regex: Regex },
    ChildContains { selector: String, text: String },
    And { conditions: Vec<CompiledCheck> },
    Or { conditions: Vec<CompiledCheck> },
    Not { condition: Box<CompiledCheck> },
    Custom { program: Program },
}

impl CompiledCheck {
    /// Evaluate against a node. Declarative checks cannot fail at
    /// runtime; `custom` programs fail closed to `false`.
    pub fn evaluate(&self, node: &ConfigNode, ctx: &CheckContext<'_>) -> bool {
        match self {
            CompiledCheck::Match { regex } => regex.is_match(&node.content),
            CompiledCheck::NotMatch { regex } => !regex.is_match(&node.content),
            CompiledCheck::Contains { text } => node.content.contains(text),
            CompiledCheck::NotContains { text } => !node.content.contains(text),
            CompiledCheck::ChildExists { selector } => {
                node.children_matching(selector).next().is_some()
            }
            CompiledCheck::ChildNotExists { selector } => {
                node.children_matching(selector).next().is_none()
            }
            CompiledCheck::ChildMatches { selector, regex } => node
                .children_matching(selector)
                .any(|child| regex.is_match(&child.content)),
            CompiledCheck::ChildContains { selector, text } => node
                .children_matching(selector)
                .any(|child| child.content.contains(text)),
            CompiledCheck::And { conditions } => {
                conditions.iter().all(|c| c.evaluate(node, ctx))
            }
            CompiledCheck::Or { conditions } => {
                conditions.iter().any(|c| c.evaluate(node, ctx))
            }
            CompiledCheck::Not { condition } => !condition.evaluate(node, ctx),
            CompiledCheck::Custom { program } => {
                let deadline = Instant::now() + ctx.custom_budget;
                program.evaluate(node, ctx.helpers, deadline)
            }
        }
    }
}

/// Native check signature used by built-in rules and tests.
pub type NativeCheckFn =
    dyn Fn(&ConfigNode, &CheckContext<'_>) -> Result<bool, CheckError> + Send + Sync;

/// The check behavior carried by a [`Rule`](crate::rule::Rule).
#[derive(Clone)]
pub enum CheckBody {
    /// Compiled from a pack or JSON rule file.
    Declarative(CompiledCheck),
    /// Supplied in Rust, used by built-in rules.
    Native(Arc<NativeCheckFn>),
}

impl CheckBody {
    /// Wrap a Rust closure as a check body.
    pub fn native<F>(check: F) -> Self
    where
        F: Fn(&ConfigNode, &CheckContext<'_>) -> Result<bool, CheckError> + Send + Sync + 'static,
    {
        CheckBody::Native(Arc::new(check))
    }

    /// Evaluate the check. Declarative bodies cannot error.
    pub fn evaluate(
        &self,
        node: &ConfigNode,
        ctx: &CheckContext<'_>,
    ) -> Result<bool, CheckError> {
        match self {
            CheckBody::Declarative(check) => Ok(check.evaluate(node, ctx)),
            CheckBody::Native(check) => check(node, ctx),
        }
    }
}

impl std::fmt::Debug for CheckBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckBody::Declarative(check) => f.debug_tuple("Declarative").field(check).finish(),
            CheckBody::Native(_) => f.write_str("Native(..)"),
        }
    }
}
