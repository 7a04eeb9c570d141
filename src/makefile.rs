use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Location, MakeError, Result};
use crate::expand::{Environment, Expander};
use crate::graph::Graph;
use crate::variables::{resolve, Flavor, Origin, Resolved, Variables};
use crate::vpath::{Search, Vpath};

/// An `include` seen while reading.
#[derive(Debug, Clone)]
pub struct Include {
    pub path: String,
    /// Not `-include`/`sinclude`.
    pub required: bool,
    pub loc: Location,
}

/// What a variable contributes to a subprocess environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    Value(String),
    /// Passed after expansion in the scope of the subprocess.
    Expand,
    Skip,
}

/// The state built by reading makefiles: variables, rules and search
/// paths.
#[derive(Debug)]
pub struct Makefile {
    pub variables: Variables,
    pub graph: Graph,
    pub vpath: Vpath,
    pub included: Vec<Include>,
    /// `unexport` with no names: only variables marked `export`, or from
    /// the environment or the command line, are passed on.
    pub unexport_all: bool,
    workdir: PathBuf,
    makeflags: String,
    makelevel: usize,
    search: Search,
    phony: HashSet<String>,
    silent: HashSet<String>,
    silent_all: bool,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Decides how a variable reaches subprocesses. `explicit` is the state set
/// by `export`/`unexport`, if any.
pub fn export_value(name: &str, resolved: &Resolved, explicit: Option<bool>, unexport_all: bool) -> Export {
    if !is_identifier(name) || explicit == Some(false) {
        return Export::Skip;
    }
    let inherited = matches!(resolved.origin(), Origin::Environment | Origin::CommandLine);
    if unexport_all && explicit.is_none() && !inherited {
        return Export::Skip;
    }
    if resolved.flavor() == Flavor::Simple && resolved.appends.is_empty() {
        return Export::Value(resolved.raw());
    }
    let raw = resolved.raw();
    if raw.contains('$') {
        Export::Expand
    } else {
        Export::Value(raw)
    }
}

impl Makefile {
    pub fn new(config: &Config, restarts: usize) -> Makefile {
        let workdir = config.directory.clone();
        let mut variables = Variables::new();
        let mut makelevel = 0;
        for (name, value) in &config.environment {
            if name == "MAKELEVEL" {
                makelevel = value.trim().parse().unwrap_or(0);
            }
            if name == "SHELL" || name == "MAKEFLAGS" {
                continue;
            }
            variables.set(name, Flavor::Recursive, Origin::Environment, value.clone());
        }
        let program = config.program.display().to_string();
        variables.set("MAKE", Flavor::Recursive, Origin::Default, program);
        variables.set("SHELL", Flavor::Recursive, Origin::Default, "/bin/sh".to_string());
        variables.set(
            "CURDIR",
            Flavor::Simple,
            Origin::File,
            workdir.display().to_string(),
        );
        variables.set(
            "MAKELEVEL",
            Flavor::Simple,
            Origin::Environment,
            makelevel.to_string(),
        );
        if restarts > 0 {
            variables.set(
                "MAKE_RESTARTS",
                Flavor::Simple,
                Origin::Override,
                restarts.to_string(),
            );
        }
        variables.set("MAKEFILE_LIST", Flavor::Simple, Origin::File, String::new());
        let makeflags = config.makeflags();
        variables.set("MAKEFLAGS", Flavor::Recursive, Origin::File, makeflags.clone());
        for (name, value) in &config.variables {
            variables.set(name, Flavor::Recursive, Origin::CommandLine, value.clone());
        }

        let vpath = Vpath::default();
        Self {
            search: Search::new(&workdir, "", &vpath),
            variables,
            graph: Graph::new(),
            vpath,
            included: Vec::new(),
            unexport_all: false,
            workdir,
            makeflags,
            makelevel,
            phony: HashSet::new(),
            silent: HashSet::new(),
            silent_all: false,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.workdir.join(name)
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn phony(&self) -> &HashSet<String> {
        &self.phony
    }

    pub fn is_silent(&self, target: &str) -> bool {
        self.silent_all || self.silent.contains(target)
    }

    /// Reads and processes one makefile, adding it to `MAKEFILE_LIST`.
    pub fn read_makefile(&mut self, name: &str) -> Result<()> {
        let text = fs::read_to_string(self.path(name))?;
        tracing::debug!("reading makefile '{}'", name);
        self.variables
            .append("MAKEFILE_LIST", Origin::File, name.to_string(), true);
        self.parse_text(&text, name, 1)
    }

    /// Processes `include`d files, recording those that are missing so they
    /// can be remade.
    pub fn include(&mut self, names: &[String], required: bool, loc: &Location) -> Result<()> {
        for name in names {
            let found = self.path(name).is_file();
            self.included.push(Include {
                path: name.clone(),
                required,
                loc: loc.clone(),
            });
            if found {
                self.read_makefile(name)?;
            } else {
                tracing::debug!("{}: included makefile '{}' not found", loc, name);
            }
        }
        Ok(())
    }

    /// Computes what reading left behind: the special targets and the
    /// search path.
    pub fn finish_parsing(&mut self) -> Result<()> {
        self.phony = self.graph.special_prerequisites(".PHONY").into_iter().collect();
        let silent = self.graph.rules(".SILENT");
        self.silent_all = !silent.is_empty() && silent.iter().all(|r| r.prerequisites.is_empty());
        self.silent = self.graph.special_prerequisites(".SILENT").into_iter().collect();
        let loc = Location::internal("VPATH");
        let vpath_variable = Expander::new(self, &loc).variable("VPATH")?;
        self.search = Search::new(&self.workdir, &vpath_variable, &self.vpath);
        Ok(())
    }

    /// The goal used when none is requested: `.DEFAULT_GOAL` when set,
    /// otherwise the first target read.
    pub fn default_goal(&mut self) -> Result<Option<String>> {
        let loc = Location::internal(".DEFAULT_GOAL");
        let set = Expander::new(self, &loc).variable(".DEFAULT_GOAL")?;
        if let Some(goal) = set.split_ascii_whitespace().next() {
            return Ok(Some(goal.to_string()));
        }
        Ok(self.graph.default_target.clone())
    }

    /// Makefiles that should be remade before building: those read and
    /// those included but missing.
    pub fn makefile_goals(&self) -> Vec<String> {
        let mut goals: Vec<String> = self
            .variables
            .get("MAKEFILE_LIST")
            .map(|v| v.value.split_ascii_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        for inc in &self.included {
            if !goals.contains(&inc.path) {
                goals.push(inc.path.clone());
            }
        }
        goals
    }

    /// The first required include that is still missing.
    pub fn missing_include(&self) -> Option<MakeError> {
        self.included
            .iter()
            .find(|inc| inc.required && !self.path(&inc.path).is_file())
            .map(|inc| MakeError::MissingInclude {
                loc: Some(inc.loc.clone()),
                path: PathBuf::from(&inc.path),
            })
    }

    /// Variables to hand to subprocesses: every identifier bound in
    /// `scopes` (innermost first) that was not `unexport`ed. Variables that
    /// need expanding are returned by name only.
    pub fn exported_variables(&self, scopes: &[&Variables]) -> (Vec<(String, String)>, Vec<String>) {
        let names: BTreeSet<&str> = scopes
            .iter()
            .flat_map(|scope| scope.names())
            .filter(|name| !matches!(*name, "MAKELEVEL" | "MAKEFLAGS" | "MAKE_RESTARTS"))
            .collect();
        let mut values = Vec::new();
        let mut expand = Vec::new();
        for name in names {
            let Some(resolved) = resolve(scopes, name) else {
                continue;
            };
            match export_value(name, &resolved, self.variables.export_state(name), self.unexport_all) {
                Export::Value(v) => values.push((name.to_string(), v)),
                Export::Expand => expand.push(name.to_string()),
                Export::Skip => {}
            }
        }
        values.push(("MAKELEVEL".to_string(), (self.makelevel + 1).to_string()));
        values.push(("MAKEFLAGS".to_string(), self.makeflags.clone()));
        (values, expand)
    }
}

impl Environment for Makefile {
    fn lookup(&self, name: &str) -> Option<Resolved> {
        resolve(&[&self.variables], name)
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn exports(&self) -> (Vec<(String, String)>, Vec<String>) {
        self.exported_variables(&[&self.variables])
    }

    fn eval(&mut self, text: &str, loc: &Location) -> Result<()> {
        self.parse_text(text, &loc.path, loc.line.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(flavor: Flavor, origin: Origin, value: &str) -> Resolved {
        let mut v = Variables::new();
        v.set("X", flavor, origin, value.to_string());
        resolve(&[&v], "X").unwrap()
    }

    #[test]
    fn export_policy() {
        let file = resolved(Flavor::Recursive, Origin::File, "plain");
        assert_eq!(export_value("X", &file, None, false), Export::Value("plain".into()));
        assert_eq!(export_value("X", &file, Some(false), false), Export::Skip);
        assert_eq!(export_value("X", &file, None, true), Export::Skip);
        assert_eq!(export_value("X", &file, Some(true), true), Export::Value("plain".into()));

        let env = resolved(Flavor::Recursive, Origin::Environment, "/usr/bin");
        assert_eq!(export_value("PATH", &env, None, true), Export::Value("/usr/bin".into()));
        assert_eq!(export_value("PATH", &env, Some(false), false), Export::Skip);

        let simple = resolved(Flavor::Simple, Origin::File, "$$kept");
        assert_eq!(export_value("X", &simple, None, false), Export::Value("$$kept".into()));

        let deferred = resolved(Flavor::Recursive, Origin::File, "$(Y)");
        assert_eq!(export_value("X", &deferred, None, false), Export::Expand);
        assert_eq!(export_value("X-Y", &deferred, Some(true), false), Export::Skip);
    }

    #[test]
    fn exports_cover_the_whole_store() {
        let mut mk = Makefile::new(&Config::new("/tmp"), 2);
        mk.variables.set("PLAIN", Flavor::Recursive, Origin::File, "p".into());
        mk.variables.set("LATER", Flavor::Recursive, Origin::File, "$(PLAIN)".into());
        mk.variables.set("HIDDEN", Flavor::Simple, Origin::File, "h".into());
        mk.variables.set_exported("HIDDEN", false);
        let (values, deferred) = mk.exported_variables(&[&mk.variables]);
        let value = |name: &str| values.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str());
        assert_eq!(value("PLAIN"), Some("p"));
        assert_eq!(value("HIDDEN"), None);
        assert_eq!(value("MAKE_RESTARTS"), None);
        assert_eq!(value("MAKELEVEL"), Some("1"));
        assert_eq!(deferred, ["LATER"]);
    }

    #[test]
    fn command_line_variables_are_not_overridden_by_the_environment() {
        let mut config = Config::new("/tmp");
        config.environment.push(("OBASIC".into(), "env".into()));
        config.variables.push(("OBASIC".into(), "oval".into()));
        let mk = Makefile::new(&config, 0);
        let v = mk.variables.get("OBASIC").unwrap();
        assert_eq!((v.value.as_str(), v.origin), ("oval", Origin::CommandLine));
        assert!(mk.variables.get("MAKE_RESTARTS").is_none());
    }
}
