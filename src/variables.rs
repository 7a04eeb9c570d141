use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Stored raw, expanded on every reference.
    Recursive,
    /// Expanded once when assigned.
    Simple,
}

impl Flavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Recursive => "recursive",
            Flavor::Simple => "simple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Default,
    Environment,
    File,
    CommandLine,
    Override,
    Automatic,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Override => "override",
            Origin::Automatic => "automatic",
        }
    }

    /// Higher values win; an assignment from a lower-priority origin never
    /// replaces a binding from a higher one.
    fn priority(self) -> u8 {
        match self {
            Origin::Default => 0,
            Origin::Environment => 1,
            Origin::File => 2,
            Origin::CommandLine => 3,
            Origin::Override => 4,
            Origin::Automatic => 5,
        }
    }

    pub fn outranks(self, other: Origin) -> bool {
        self.priority() > other.priority()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub flavor: Flavor,
    pub origin: Origin,
    pub value: String,
}

impl Variable {
    pub fn new(flavor: Flavor, origin: Origin, value: impl Into<String>) -> Variable {
        Self {
            flavor,
            origin,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Set(Variable),
    /// A `+=` in a target or pattern scope whose base lives in an outer scope.
    Append { origin: Origin, value: String },
}

/// One scope of variables: the global store, a target's own variables, or a
/// pattern's variables.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    map: HashMap<String, Binding>,
    exported: HashMap<String, bool>,
}

/// A variable as seen through a stack of scopes: the nearest full binding
/// plus the appends stacked above it, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub base: Option<Variable>,
    pub appends: Vec<String>,
    append_origin: Origin,
}

impl Resolved {
    pub fn flavor(&self) -> Flavor {
        self.base
            .as_ref()
            .map(|v| v.flavor)
            .unwrap_or(Flavor::Recursive)
    }

    pub fn origin(&self) -> Origin {
        self.base
            .as_ref()
            .map(|v| v.origin)
            .unwrap_or(self.append_origin)
    }

    /// The unexpanded text, as `$(value ...)` reports it.
    pub fn raw(&self) -> String {
        let mut out = self
            .base
            .as_ref()
            .map(|v| v.value.clone())
            .unwrap_or_default();
        for a in &self.appends {
            join_append(&mut out, a);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }
}

/// Appends `more` to `value` the way `+=` does: separated by a space unless
/// `value` is empty.
pub fn join_append(value: &mut String, more: &str) {
    if !value.is_empty() {
        value.push(' ');
    }
    value.push_str(more);
}

impl Variables {
    pub fn new() -> Variables {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        match self.map.get(name) {
            Some(Binding::Set(v)) => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Binds `name`, unless it is already bound here by an origin that
    /// outranks `origin`. Returns whether the binding took effect.
    pub fn set(&mut self, name: &str, flavor: Flavor, origin: Origin, value: String) -> bool {
        if let Some(Binding::Set(prev)) = self.map.get(name) {
            if prev.origin.outranks(origin) {
                tracing::debug!(
                    "not setting variable '{}', set by higher-priority origin '{}'",
                    name,
                    prev.origin.as_str()
                );
                return false;
            }
        }
        self.map
            .insert(name.to_string(), Binding::Set(Variable::new(flavor, origin, value)));
        true
    }

    /// Appends already-prepared text to an existing binding in this scope.
    /// Callers expand `value` first when the existing flavor is simple.
    /// Without an existing binding, a global scope creates a recursive
    /// variable and any other scope records a deferred append.
    pub fn append(&mut self, name: &str, origin: Origin, value: String, global: bool) -> bool {
        match self.map.get_mut(name) {
            Some(Binding::Set(prev)) => {
                if prev.origin.outranks(origin) {
                    tracing::debug!(
                        "not appending to variable '{}', set by origin '{}'",
                        name,
                        prev.origin.as_str()
                    );
                    return false;
                }
                join_append(&mut prev.value, &value);
                true
            }
            Some(Binding::Append { value: prev, .. }) => {
                join_append(prev, &value);
                true
            }
            None if global => {
                self.map.insert(
                    name.to_string(),
                    Binding::Set(Variable::new(Flavor::Recursive, origin, value)),
                );
                true
            }
            None => {
                self.map
                    .insert(name.to_string(), Binding::Append { origin, value });
                true
            }
        }
    }

    pub fn set_exported(&mut self, name: &str, exported: bool) {
        self.exported.insert(name.to_string(), exported);
    }

    /// `Some(true)` for `export NAME`, `Some(false)` for `unexport NAME`.
    pub fn export_state(&self, name: &str) -> Option<bool> {
        self.exported.get(name).copied()
    }

    /// Names bound in this scope, including deferred appends.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Looks `name` up through `scopes`, innermost first.
pub fn resolve(scopes: &[&Variables], name: &str) -> Option<Resolved> {
    let mut appends = Vec::new();
    let mut append_origin = Origin::File;
    for scope in scopes {
        match scope.map.get(name) {
            Some(Binding::Set(v)) => {
                appends.reverse();
                return Some(Resolved {
                    base: Some(v.clone()),
                    appends,
                    append_origin,
                });
            }
            Some(Binding::Append { origin, value }) => {
                if appends.is_empty() {
                    append_origin = *origin;
                }
                appends.push(value.clone());
            }
            None => {}
        }
    }
    if appends.is_empty() {
        None
    } else {
        appends.reverse();
        Some(Resolved {
            base: None,
            appends,
            append_origin,
        })
    }
}

/// Splits `s` into whitespace-delimited words.
pub fn split_words(s: &str) -> Vec<&str> {
    s.split_ascii_whitespace().collect()
}
