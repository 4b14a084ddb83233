//! Identifiers for actions and for the dependencies that refer to them.
//!
//! An [ActionId] names exactly one action in a run: the kind of work it performs and the node
//! (scope) it is bound to. A [TargetId] appears only in dependency lists. It may name one action,
//! or, when its scope is left out, every action of a kind across the whole cluster. The latter is
//! how an action says "wait until this has finished everywhere" without listing node names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniquely identifies an action within a run.
///
/// `scope` is the name of the node the action is bound to, or the empty string for an action
/// that applies to the cluster as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ActionId {
    kind: String,
    scope: String,
}

impl ActionId {
    pub fn new(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        ActionId {
            kind: kind.into(),
            scope: scope.into(),
        }
    }

    /// Creates an [ActionId] for an action that is not bound to any node.
    pub fn cluster_wide(kind: impl Into<String>) -> Self {
        Self::new(kind, "")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the node this action is bound to, or [None] for a cluster-wide action.
    pub fn node(&self) -> Option<&str> {
        match self.scope.is_empty() {
            true => None,
            false => Some(&self.scope),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Some(scope) => write!(f, "{}:{}", self.kind, scope),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A reference to one or more actions, used to declare dependencies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    kind: String,

    /// [None] matches every action of [Self::kind]. Empty strings are normalized to [None].
    scope: Option<String>,
}

impl TargetId {
    /// Refers to the single action of `kind` bound to `scope`.
    ///
    /// An empty `scope` is treated as a wildcard, the same as [TargetId::all].
    pub fn new(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        TargetId {
            kind: kind.into(),
            scope: (!scope.is_empty()).then_some(scope),
        }
    }

    /// Refers to every action of `kind`, regardless of scope.
    pub fn all(kind: impl Into<String>) -> Self {
        TargetId {
            kind: kind.into(),
            scope: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.scope.is_none()
    }

    /// Reports whether `candidate` satisfies this target.
    ///
    /// A wildcard target matches on kind alone. Otherwise both kind and scope must be equal.
    pub fn matches(&self, candidate: &ActionId) -> bool {
        if self.kind != candidate.kind {
            return false;
        }
        match &self.scope {
            None => true,
            Some(scope) => *scope == candidate.scope,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", self.kind, scope),
            None => write!(f, "{}:*", self.kind),
        }
    }
}
