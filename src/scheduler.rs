//! Running recipes.
//!
//! A single coordinator owns every node's state. It picks ready nodes in
//! post-order, decides whether they are stale, expands their recipes and
//! hands the resulting command lines to worker tasks, at most `jobs` at a
//! time. Workers only run subprocesses and report back; completion is
//! applied by the coordinator, so no node is started twice.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::{Location, MakeError, Result};
use crate::expand::{Environment, Expander};
use crate::graph::node::{BoundRule, NodeStatus};
use crate::graph::Plan;
use crate::makefile::Makefile;
use crate::parser::scan::is_continuation;
use crate::variables::{resolve, Flavor, Origin, Resolved, Variables};
use crate::PROGRAM;

/// What a build is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The requested goals; each must be makeable.
    Goals,
    /// Makefiles that were read or included. Those without a rule are
    /// skipped, commands run even in a dry run and `-B` does not apply.
    Makefiles,
}

#[derive(Debug, Default)]
pub struct Outcome {
    /// Targets whose recipes ran.
    pub remade: Vec<String>,
}

/// Variables seen by a recipe: automatic variables, then the target's own
/// and pattern-specific variables, then those of the targets it was
/// reached from, then the global ones.
pub struct BuildScope<'a> {
    makefile: &'a Makefile,
    automatic: Variables,
    layers: Vec<&'a Variables>,
}

impl<'a> BuildScope<'a> {
    fn new(makefile: &'a Makefile, plan: &Plan, idx: usize, rule: &BoundRule) -> BuildScope<'a> {
        let graph = &makefile.graph;
        let mut layers = Vec::new();
        let mut at = Some(idx);
        while let Some(i) = at {
            let target = &plan.nodes[i].target;
            if let Some(v) = graph.target_variables(target) {
                layers.push(v);
            }
            layers.extend(graph.pattern_variables_for(target));
            at = plan.nodes[i].parent;
        }
        Self {
            makefile,
            automatic: automatic_variables(plan, idx, rule),
            layers,
        }
    }
}

fn dir_part(word: &str) -> &str {
    match word.rfind('/') {
        Some(0) => "/",
        Some(i) => &word[..i],
        None => ".",
    }
}

fn file_part(word: &str) -> &str {
    match word.rfind('/') {
        Some(i) => &word[i + 1..],
        None => word,
    }
}

fn automatic_variables(plan: &Plan, idx: usize, rule: &BoundRule) -> Variables {
    let node = &plan.nodes[idx];
    let paths: Vec<&str> = rule
        .prerequisites
        .iter()
        .map(|&d| plan.nodes[d].path.as_str())
        .collect();
    let mut unique: Vec<&str> = Vec::new();
    for p in &paths {
        if !unique.contains(p) {
            unique.push(p);
        }
    }
    let newer: Vec<&str> = rule
        .prerequisites
        .iter()
        .filter(|&&d| is_newer(plan, d, node.mtime))
        .map(|&d| plan.nodes[d].path.as_str())
        .collect();

    let values = [
        ("@", node.target.clone()),
        ("<", paths.first().copied().unwrap_or("").to_string()),
        ("^", unique.join(" ")),
        ("+", paths.join(" ")),
        ("?", newer.join(" ")),
        ("*", rule.stem.clone()),
    ];
    let mut vars = Variables::new();
    for (name, value) in values {
        let words: Vec<&str> = value.split_ascii_whitespace().collect();
        let dirs = words.iter().map(|w| dir_part(w)).collect::<Vec<_>>().join(" ");
        let files = words.iter().map(|w| file_part(w)).collect::<Vec<_>>().join(" ");
        vars.set(&format!("{}D", name), Flavor::Simple, Origin::Automatic, dirs);
        vars.set(&format!("{}F", name), Flavor::Simple, Origin::Automatic, files);
        vars.set(name, Flavor::Simple, Origin::Automatic, value);
    }
    vars
}

/// A prerequisite counts as newer when it was remade, does not exist, or
/// is younger than the target.
fn is_newer(plan: &Plan, dep: usize, than: Option<std::time::SystemTime>) -> bool {
    let d = &plan.nodes[dep];
    if d.state == NodeStatus::Rebuilt {
        return true;
    }
    match (d.mtime, than) {
        (Some(dm), Some(t)) => dm > t,
        _ => true,
    }
}

impl BuildScope<'_> {
    fn scopes(&self) -> Vec<&Variables> {
        let mut scopes: Vec<&Variables> = Vec::with_capacity(self.layers.len() + 2);
        scopes.push(&self.automatic);
        scopes.extend(self.layers.iter().copied());
        scopes.push(&self.makefile.variables);
        scopes
    }
}

impl Environment for BuildScope<'_> {
    fn lookup(&self, name: &str) -> Option<Resolved> {
        resolve(&self.scopes(), name)
    }

    fn workdir(&self) -> &Path {
        self.makefile.workdir()
    }

    fn exports(&self) -> (Vec<(String, String)>, Vec<String>) {
        self.makefile.exported_variables(&self.scopes())
    }

    fn eval(&mut self, _text: &str, loc: &Location) -> Result<()> {
        Err(MakeError::Eval {
            loc: loc.clone(),
            message: "$(eval) cannot change the makefile while recipes run".to_string(),
        })
    }
}

/// One command line of a recipe, prefixes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub silent: bool,
    pub ignore_errors: bool,
    /// `+`: runs even in a dry run.
    pub force: bool,
}

impl Line {
    /// Strips any mix of `@`, `-` and `+` (and blanks) from the front.
    pub fn parse(text: &str) -> Line {
        let mut line = Line {
            text: String::new(),
            silent: false,
            ignore_errors: false,
            force: false,
        };
        let mut rest = text;
        loop {
            rest = rest.trim_start();
            match rest.chars().next() {
                Some('@') => line.silent = true,
                Some('-') => line.ignore_errors = true,
                Some('+') => line.force = true,
                _ => break,
            }
            rest = &rest[1..];
        }
        line.text = rest.to_string();
        line
    }
}

/// Splits an expanded recipe line on newlines that are not escaped by a
/// backslash; the escaped ones are left for the shell.
pub fn split_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    for piece in text.split('\n') {
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
        if !is_continuation(piece) {
            commands.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        commands.push(current);
    }
    commands
}

/// Work handed to a worker task.
struct Job {
    idx: usize,
    target: String,
    lines: Vec<Line>,
    shell: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    dry_run: bool,
}

impl Job {
    async fn run(self) -> (usize, Result<()>) {
        let result = self.run_lines().await;
        (self.idx, result)
    }

    async fn run_lines(&self) -> Result<()> {
        for line in &self.lines {
            if !line.silent || self.dry_run {
                println!("{}", line.text);
            }
            if self.dry_run && !line.force {
                continue;
            }
            let status = Command::new(&self.shell)
                .arg("-c")
                .arg(&line.text)
                .current_dir(&self.workdir)
                .envs(self.env.iter().map(|(k, v)| (k, v)))
                .status()
                .await?;
            if status.success() {
                continue;
            }
            let code = status.code().unwrap_or(-1);
            if line.ignore_errors {
                eprintln!("{}: [{}] Error {} (ignored)", PROGRAM, self.target, code);
                continue;
            }
            return Err(MakeError::RecipeFailed {
                target: self.target.clone(),
                code,
            });
        }
        Ok(())
    }
}

struct Scheduler<'a> {
    makefile: &'a Makefile,
    config: &'a Config,
    plan: Plan,
    dry_run: bool,
    always_make: bool,
    /// Prerequisites of each node not yet finished.
    waiting: Vec<usize>,
    /// Ready nodes keyed by post-order position.
    ready: BTreeSet<(usize, usize)>,
    running: JoinSet<(usize, Result<()>)>,
    ran: Vec<bool>,
    failure: Option<MakeError>,
}

impl<'a> Scheduler<'a> {
    fn new(makefile: &'a Makefile, config: &'a Config, plan: Plan, mode: Mode) -> Self {
        let waiting: Vec<usize> = plan.nodes.iter().map(|n| n.dependencies.len()).collect();
        let ready = plan
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| waiting[*i] == 0)
            .map(|(i, n)| (n.order, i))
            .collect();
        let ran = vec![false; plan.nodes.len()];
        Self {
            makefile,
            config,
            dry_run: config.dry_run && mode == Mode::Goals,
            always_make: config.always_make && mode == Mode::Goals,
            plan,
            waiting,
            ready,
            running: JoinSet::new(),
            ran,
            failure: None,
        }
    }

    fn dispatching(&self) -> bool {
        self.failure.is_none() || self.config.keep_going
    }

    async fn run(mut self) -> Result<(Plan, Vec<bool>)> {
        let jobs = self.config.jobs.max(1);
        loop {
            while self.running.len() < jobs && self.dispatching() {
                let Some(next) = self.ready.pop_first() else {
                    break;
                };
                let idx = next.1;
                if let Err(e) = self.start(idx) {
                    self.fail(idx, e);
                }
            }
            let Some(joined) = self.running.join_next().await else {
                break;
            };
            let (idx, result) = joined.map_err(|e| MakeError::Io(std::io::Error::other(e)))?;
            match result {
                Ok(()) => self.remade(idx),
                Err(e) => self.fail(idx, e),
            }
        }
        match self.failure {
            Some(e) => Err(e),
            None => Ok((self.plan, self.ran)),
        }
    }

    fn is_stale(&self, idx: usize, rule: &BoundRule) -> bool {
        let node = &self.plan.nodes[idx];
        if self.always_make || node.phony || node.mtime.is_none() {
            return true;
        }
        if node.double_colon && rule.prerequisites.is_empty() {
            return true;
        }
        rule.prerequisites
            .iter()
            .any(|&d| is_newer(&self.plan, d, node.mtime))
    }

    /// Decides what `idx` needs and either finishes it at once or spawns
    /// its recipe.
    fn start(&mut self, idx: usize) -> Result<()> {
        self.plan.nodes[idx].state = NodeStatus::InProgress;
        let node = &self.plan.nodes[idx];
        if node.rules.is_empty() {
            let status = if node.phony || node.mtime.is_none() {
                NodeStatus::Rebuilt
            } else {
                NodeStatus::UpToDate
            };
            self.finish(idx, status);
            return Ok(());
        }

        let mut stale = false;
        let mut to_run = Vec::new();
        for (i, rule) in node.rules.iter().enumerate() {
            if self.is_stale(idx, rule) {
                stale = true;
                if !rule.commands.is_empty() {
                    to_run.push(i);
                }
            }
        }
        if !stale {
            tracing::debug!("'{}' is up to date", node.target);
            self.finish(idx, NodeStatus::UpToDate);
            return Ok(());
        }
        if to_run.is_empty() {
            let status = if node.phony || node.mtime.is_none() {
                NodeStatus::Rebuilt
            } else {
                NodeStatus::UpToDate
            };
            self.finish(idx, status);
            return Ok(());
        }

        tracing::debug!("remaking '{}'", node.target);
        let target = node.target.clone();
        let silent = self.config.silent || self.makefile.is_silent(&target);
        let mut lines = Vec::new();
        let mut env = Vec::new();
        let mut shell = String::from("/bin/sh");
        for &i in &to_run {
            let rule = &self.plan.nodes[idx].rules[i];
            let mut scope = BuildScope::new(self.makefile, &self.plan, idx, rule);
            for command in &rule.commands {
                let text = Expander::new(&mut scope, &command.loc).expand_text(&command.text)?;
                for piece in split_commands(&text) {
                    let mut line = Line::parse(&piece);
                    if line.text.trim().is_empty() {
                        continue;
                    }
                    line.silent |= silent;
                    line.ignore_errors |= self.config.ignore_errors;
                    lines.push(line);
                }
            }
            if env.is_empty() {
                let loc = rule.loc.clone();
                env = Expander::new(&mut scope, &loc).subprocess_environment();
                let program = Expander::new(&mut scope, &loc).variable("SHELL")?;
                if !program.trim().is_empty() {
                    shell = program.trim().to_string();
                }
            }
        }

        self.ran[idx] = true;
        let job = Job {
            idx,
            target,
            lines,
            shell,
            workdir: self.makefile.workdir().to_path_buf(),
            env,
            dry_run: self.dry_run,
        };
        self.running.spawn(job.run());
        Ok(())
    }

    fn remade(&mut self, idx: usize) {
        let node = &mut self.plan.nodes[idx];
        if !self.dry_run {
            node.path = node.target.clone();
            node.mtime = self.makefile.search().mtime(&node.target);
        }
        self.finish(idx, NodeStatus::Rebuilt);
    }

    fn fail(&mut self, idx: usize, error: MakeError) {
        if self.config.keep_going {
            eprintln!("{}: *** {}", PROGRAM, error);
        }
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.finish(idx, NodeStatus::Failed);
    }

    fn finish(&mut self, idx: usize, status: NodeStatus) {
        self.plan.nodes[idx].state = status;
        let dependents = self.plan.nodes[idx].dependents.clone();
        for d in dependents {
            if self.plan.nodes[d].state.is_terminal() {
                continue;
            }
            if status == NodeStatus::Failed {
                if self.config.keep_going {
                    eprintln!(
                        "{}: Target '{}' not remade because of errors.",
                        PROGRAM, self.plan.nodes[d].target
                    );
                }
                self.finish(d, NodeStatus::Failed);
                continue;
            }
            self.waiting[d] -= 1;
            if self.waiting[d] == 0 && self.plan.nodes[d].state == NodeStatus::Unvisited {
                self.ready.insert((self.plan.nodes[d].order, d));
            }
        }
    }
}

/// Whether any recipe ran for `idx` or anything it depends on.
fn anything_ran(plan: &Plan, ran: &[bool], idx: usize) -> bool {
    let mut seen = vec![false; plan.nodes.len()];
    let mut stack = vec![idx];
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut seen[i], true) {
            continue;
        }
        if ran[i] {
            return true;
        }
        stack.extend(plan.nodes[i].dependencies.iter().copied());
    }
    false
}

/// Brings `goals` up to date.
pub async fn build(makefile: &Makefile, config: &Config, goals: &[String], mode: Mode) -> Result<Outcome> {
    let plan = makefile.graph.resolve(
        goals,
        makefile.search(),
        makefile.phony(),
        mode == Mode::Goals,
    )?;
    tracing::debug!("build plan has {} nodes", plan.nodes.len());
    let (plan, ran) = Scheduler::new(makefile, config, plan, mode).run().await?;

    if mode == Mode::Goals {
        for &g in &plan.goals {
            let node = &plan.nodes[g];
            if anything_ran(&plan, &ran, g) {
                continue;
            }
            if node.has_commands() && node.state == NodeStatus::UpToDate {
                println!("{}: '{}' is up to date.", PROGRAM, node.target);
            } else if !node.has_commands() {
                println!("{}: Nothing to be done for '{}'.", PROGRAM, node.target);
            }
        }
    }

    let remade = plan
        .nodes
        .iter()
        .zip(&ran)
        .filter(|(_, r)| **r)
        .map(|(n, _)| n.target.clone())
        .collect();
    Ok(Outcome { remade })
}
