//! Dynamic variables and `%{name}` expansion for generated configuration text.
//!
//! A [Provider] computes a variable's value from the cluster and the node the text is being
//! generated for. [Providers] holds one provider per name and settles conflicts by priority.
//! [Expander] resolves names lazily through a cluster's providers and caches each value for the
//! duration of one expander.

use crate::core::{Cluster, Node};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The priority at which variables from the cluster file's `vars` section are registered.
pub const CONFIG_VAR_PRIORITY: i32 = 100;

type Calculate = dyn Fn(&Cluster, &Node) -> anyhow::Result<String> + Send + Sync;

/// Computes the value of one dynamic variable.
#[derive(Clone)]
pub struct Provider {
    priority: i32,
    calculate: Arc<Calculate>,
}

impl Provider {
    pub fn new(
        priority: i32,
        calculate: impl Fn(&Cluster, &Node) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        Provider {
            priority,
            calculate: Arc::new(calculate),
        }
    }

    /// A provider that always yields `value`.
    pub fn constant(priority: i32, value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(priority, move |_, _| Ok(value.clone()))
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn calculate(&self, cluster: &Cluster, node: &Node) -> anyhow::Result<String> {
        (self.calculate)(cluster, node)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Named providers, one per variable name.
#[derive(Clone, Debug, Default)]
pub struct Providers {
    providers: IndexMap<String, Provider>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`.
    ///
    /// An existing provider is replaced only if `provider` has a strictly higher priority, so on
    /// a tie the first registration stays. Returns whether `provider` was installed.
    pub fn register(&mut self, name: impl Into<String>, provider: Provider) -> bool {
        use indexmap::map::Entry;
        match self.providers.entry(name.into()) {
            Entry::Vacant(entry) => {
                entry.insert(provider);
                true
            }
            Entry::Occupied(mut entry) if provider.priority > entry.get().priority => {
                entry.insert(provider);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Registers every provider in `other`, in order, under the usual priority rule.
    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, Provider)>) {
        for (name, provider) in other {
            self.register(name, provider);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

/// Substitutes `%{name}` placeholders.
///
/// The grammar is small. A backslash makes the next character literal. `%{name}` is replaced by
/// the value [Self::lookup] returns for `name`, or left as-is when the name is unknown. A `%` that
/// isn't followed by `{` is an ordinary character. Anything left dangling at the end of the input
/// (a lone backslash, a final `%`, or an unterminated `%{name`) is copied through unchanged.
pub trait Expand {
    /// Returns the value of `name`, or [None] if no such variable exists.
    fn lookup(&mut self, name: &str) -> anyhow::Result<Option<String>>;

    fn expand(&mut self, input: &str) -> anyhow::Result<String> {
        enum State {
            Text,
            Escape,
            Percent,
            Name(String),
        }

        let mut output = String::with_capacity(input.len());
        let mut state = State::Text;

        for c in input.chars() {
            state = match state {
                State::Text => match c {
                    '\\' => State::Escape,
                    '%' => State::Percent,
                    _ => {
                        output.push(c);
                        State::Text
                    }
                },
                State::Escape => {
                    output.push(c);
                    State::Text
                }
                State::Percent => match c {
                    '{' => State::Name(String::new()),
                    _ => {
                        output.push('%');
                        output.push(c);
                        State::Text
                    }
                },
                State::Name(mut name) => match c {
                    '}' => {
                        match self.lookup(&name)? {
                            Some(value) => output.push_str(&value),
                            None => {
                                output.push_str("%{");
                                output.push_str(&name);
                                output.push('}');
                            }
                        }
                        State::Text
                    }
                    _ => {
                        name.push(c);
                        State::Name(name)
                    }
                },
            };
        }

        match state {
            State::Text => {}
            State::Escape => output.push('\\'),
            State::Percent => output.push('%'),
            State::Name(name) => {
                output.push_str("%{");
                output.push_str(&name);
            }
        }

        Ok(output)
    }
}

impl Expand for HashMap<String, String> {
    fn lookup(&mut self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get(name).cloned())
    }
}

/// Resolves variables through a cluster's [Providers] on behalf of one node.
pub struct Expander<'a> {
    cluster: &'a Cluster,
    node: &'a Node,
    cache: HashMap<String, String>,
}

impl<'a> Expander<'a> {
    pub fn new(cluster: &'a Cluster, node: &'a Node) -> Self {
        Expander {
            cluster,
            node,
            cache: HashMap::new(),
        }
    }
}

impl Expand for Expander<'_> {
    fn lookup(&mut self, name: &str) -> anyhow::Result<Option<String>> {
        if let Some(value) = self.cache.get(name) {
            return Ok(Some(value.clone()));
        }
        let Some(provider) = self.cluster.providers().get(name) else {
            return Ok(None);
        };
        let value = provider.calculate(self.cluster, self.node).map_err(|err| {
            err.context(format!("could not calculate variable {name}"))
        })?;
        self.cache.insert(name.to_string(), value.clone());
        Ok(Some(value))
    }
}
