use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use self::node::{BoundRule, Node};
use self::rule::{Command, PatternRule, Rule, StemMatch};
use crate::error::{Location, MakeError, Result};
use crate::pattern::Pattern;
use crate::variables::Variables;
use crate::vpath::Search;

pub mod node;
pub mod rule;

/// Everything known about one literal target name.
#[derive(Debug, Default)]
pub struct TargetEntry {
    pub rules: Vec<Rc<Rule>>,
    pub variables: Variables,
}

/// The rule graph built while reading makefiles.
#[derive(Debug, Default)]
pub struct Graph {
    targets: HashMap<String, TargetEntry>,
    implicit: Vec<Rc<PatternRule>>,
    pattern_variables: Vec<(Pattern, Variables)>,
    /// Targets and prerequisites named by explicit rules.
    mentioned: HashSet<String>,
    pub default_target: Option<String>,
}

#[derive(PartialEq)]
enum Mark {
    Active,
    Visited,
}

/// An implicit rule chosen for a target.
struct ImplicitMatch {
    rule: Rc<PatternRule>,
    stem: StemMatch,
}

/// A rule for a target, names not yet resolved to nodes.
struct Pending {
    prerequisites: Vec<String>,
    order_only: Vec<String>,
    commands: Vec<Command>,
    stem: String,
    loc: Location,
}

/// The nodes reachable from a set of goals, ready for scheduling.
#[derive(Debug)]
pub struct Plan {
    pub nodes: Vec<Node>,
    pub goals: Vec<usize>,
}

impl Plan {
    pub fn index_of(&self, target: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.target == target)
    }
}

/// Special targets like `.PHONY` are never default goals.
pub fn is_special_target(name: &str) -> bool {
    name.starts_with('.') && !name.contains('/')
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, target: &str, rule: Rc<Rule>) -> Result<()> {
        self.mentioned.insert(target.to_string());
        self.mentioned.extend(rule.prerequisites.iter().cloned());
        self.mentioned.extend(rule.order_only.iter().cloned());

        let entry = self.targets.entry(target.to_string()).or_default();
        if let Some(first) = entry.rules.first() {
            if first.double_colon != rule.double_colon {
                return Err(MakeError::syntax(
                    &rule.loc,
                    format!("target file '{}' has both : and :: entries", target),
                ));
            }
        }
        if !rule.double_colon && !rule.commands.is_empty() {
            if let Some(prev) = entry.rules.iter_mut().find(|r| !r.commands.is_empty()) {
                tracing::warn!(
                    "{}: overriding recipe for target '{}' (previous recipe at {})",
                    rule.loc,
                    target,
                    prev.loc
                );
                *prev = Rc::new(prev.without_commands());
            }
        }
        entry.rules.push(rule);
        Ok(())
    }

    /// Remembers the first eligible target as the default goal.
    pub fn consider_default(&mut self, target: &str) {
        if self.default_target.is_none() && !is_special_target(target) && !target.contains('%') {
            self.default_target = Some(target.to_string());
        }
    }

    pub fn add_implicit(&mut self, rule: PatternRule) {
        self.implicit.push(Rc::new(rule));
    }

    pub fn rules(&self, target: &str) -> &[Rc<Rule>] {
        self.targets
            .get(target)
            .map(|e| e.rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_rules(&self, target: &str) -> bool {
        !self.rules(target).is_empty()
    }

    /// All prerequisites listed for a special target such as `.PHONY`.
    pub fn special_prerequisites(&self, special: &str) -> Vec<String> {
        self.rules(special)
            .iter()
            .flat_map(|r| r.prerequisites.iter().cloned())
            .collect()
    }

    pub fn target_variables(&self, target: &str) -> Option<&Variables> {
        self.targets.get(target).map(|e| &e.variables)
    }

    pub fn target_variables_mut(&mut self, target: &str) -> &mut Variables {
        &mut self.targets.entry(target.to_string()).or_default().variables
    }

    pub fn pattern_variables_mut(&mut self, pattern: Pattern) -> &mut Variables {
        let idx = match self.pattern_variables.iter().position(|(p, _)| *p == pattern) {
            Some(idx) => idx,
            None => {
                self.pattern_variables.push((pattern, Variables::new()));
                self.pattern_variables.len() - 1
            }
        };
        &mut self.pattern_variables[idx].1
    }

    /// Pattern-specific variables matching `target`, latest definition
    /// first.
    pub fn pattern_variables_for(&self, target: &str) -> Vec<&Variables> {
        self.pattern_variables
            .iter()
            .rev()
            .filter(|(p, _)| p.matches(target).is_some())
            .map(|(_, v)| v)
            .collect()
    }

    /// A prerequisite "ought to exist" when it is a file or is named by an
    /// explicit rule.
    fn ought_to_exist(&self, name: &str, search: &Search) -> bool {
        self.mentioned.contains(name) || search.exists(name)
    }

    /// Searches the implicit rules for a way to make `target`, first
    /// accepting only prerequisites that ought to exist, then allowing them
    /// to be made by further implicit rules. A rule appears at most once in
    /// a chain.
    fn find_implicit(
        &self,
        target: &str,
        search: &Search,
        chain: &mut Vec<*const PatternRule>,
    ) -> Option<ImplicitMatch> {
        let mut candidates: Vec<(&Rc<PatternRule>, StemMatch)> = self
            .implicit
            .iter()
            .filter(|r| !r.commands.is_empty() && !chain.contains(&Rc::as_ptr(*r)))
            .filter_map(|r| r.match_for(target).map(|m| (r, m)))
            .collect();

        if candidates.iter().any(|(r, _)| !r.is_match_anything()) {
            candidates.retain(|(r, _)| !r.is_match_anything() || r.terminal);
        }

        let found = candidates
            .iter()
            .find(|(rule, stem)| {
                rule.prerequisites_for(stem)
                    .iter()
                    .all(|p| self.ought_to_exist(p, search))
            })
            .or_else(|| {
                candidates.iter().filter(|(r, _)| !r.terminal).find(|(rule, stem)| {
                    chain.push(Rc::as_ptr(*rule));
                    let viable = rule.prerequisites_for(stem).iter().all(|p| {
                        self.ought_to_exist(p, search)
                            || self.rules(p).iter().any(|r| !r.commands.is_empty())
                            || self.find_implicit(p, search, chain).is_some()
                    });
                    chain.pop();
                    viable
                })
            });

        match found {
            Some((rule, stem)) => {
                tracing::debug!("using implicit rule at {} for '{}'", rule.loc, target);
                Some(ImplicitMatch {
                    rule: Rc::clone(*rule),
                    stem: stem.clone(),
                })
            }
            None => {
                tracing::debug!("no implicit rule found for '{}'", target);
                None
            }
        }
    }

    /// Whether any explicit or implicit rule can make `target`.
    pub fn can_make(&self, target: &str, search: &Search) -> bool {
        self.has_rules(target) || self.find_implicit(target, search, &mut Vec::new()).is_some()
    }

    /// Walks the graph from `goals`, binding rules to targets, locating files
    /// and detecting cycles. With `required` unset, goals that no rule can
    /// make are left out instead of failing.
    pub fn resolve(
        &self,
        goals: &[String],
        search: &Search,
        phony: &HashSet<String>,
        required: bool,
    ) -> Result<Plan> {
        let mut walk = Walk {
            graph: self,
            search,
            phony,
            nodes: Vec::new(),
            index: HashMap::new(),
            marks: Vec::new(),
            stack: Vec::new(),
            order: 0,
        };
        let mut plan_goals = Vec::new();
        for goal in goals {
            if !required && !self.can_make(goal, search) {
                continue;
            }
            let idx = walk.visit(goal, None)?;
            if !plan_goals.contains(&idx) {
                plan_goals.push(idx);
            }
        }
        Ok(Plan {
            nodes: walk.nodes,
            goals: plan_goals,
        })
    }

    /// The rules that apply to `name`: each double-colon rule on its own, or
    /// the single-colon rules merged behind the recipe-bearing one, or the
    /// prerequisites of an implicit rule when no explicit rule has a recipe.
    fn rules_for(&self, name: &str, phony: bool, search: &Search) -> Vec<Pending> {
        let explicit = self.rules(name);
        if explicit.first().is_some_and(|r| r.double_colon) {
            return explicit
                .iter()
                .map(|r| Pending {
                    prerequisites: r.prerequisites.clone(),
                    order_only: r.order_only.clone(),
                    commands: r.commands.clone(),
                    stem: r.stem.clone().unwrap_or_default(),
                    loc: r.loc.clone(),
                })
                .collect();
        }

        let command_rule = explicit.iter().find(|r| !r.commands.is_empty());
        let mut merged = match command_rule {
            Some(r) => Pending {
                prerequisites: r.prerequisites.clone(),
                order_only: r.order_only.clone(),
                commands: r.commands.clone(),
                stem: r.stem.clone().unwrap_or_default(),
                loc: r.loc.clone(),
            },
            None => {
                let implicit = if phony {
                    None
                } else {
                    self.find_implicit(name, search, &mut Vec::new())
                };
                match implicit {
                    Some(m) => Pending {
                        prerequisites: m.rule.prerequisites_for(&m.stem),
                        order_only: m.rule.order_only_for(&m.stem),
                        commands: m.rule.commands.clone(),
                        stem: format!("{}{}", m.stem.dir, m.stem.stem),
                        loc: m.rule.loc.clone(),
                    },
                    None if explicit.is_empty() => return Vec::new(),
                    None => Pending {
                        prerequisites: Vec::new(),
                        order_only: Vec::new(),
                        commands: Vec::new(),
                        stem: String::new(),
                        loc: explicit[0].loc.clone(),
                    },
                }
            }
        };
        for r in explicit {
            if command_rule.is_some_and(|c| Rc::ptr_eq(c, r)) {
                continue;
            }
            merged.prerequisites.extend(r.prerequisites.iter().cloned());
            merged.order_only.extend(r.order_only.iter().cloned());
        }
        vec![merged]
    }
}

/// State of one resolution walk.
struct Walk<'g> {
    graph: &'g Graph,
    search: &'g Search,
    phony: &'g HashSet<String>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    marks: Vec<Mark>,
    stack: Vec<String>,
    order: usize,
}

impl Walk<'_> {
    fn cycle(&self, name: &str) -> MakeError {
        let start = self.stack.iter().position(|n| n == name).unwrap_or(0);
        let mut cycle = self.stack[start..].to_vec();
        cycle.push(name.to_string());
        MakeError::CircularDependency { cycle }
    }

    fn visit(&mut self, name: &str, parent: Option<usize>) -> Result<usize> {
        if let Some(&idx) = self.index.get(name) {
            if self.marks[idx] == Mark::Active {
                return Err(self.cycle(name));
            }
            return Ok(idx);
        }

        let mut node = Node::new(name.to_string());
        node.parent = parent;
        node.phony = self.phony.contains(name);
        if !node.phony {
            if let Some((path, mtime)) = self.search.find(name) {
                node.path = path;
                node.mtime = Some(mtime);
            }
        }
        node.double_colon = self.graph.rules(name).first().is_some_and(|r| r.double_colon);

        let pending = self.graph.rules_for(name, node.phony, self.search);
        if pending.is_empty() && node.mtime.is_none() && !node.phony {
            return Err(MakeError::NoRule {
                target: name.to_string(),
                needed_by: parent.map(|p| self.nodes[p].target.clone()),
            });
        }

        let idx = self.nodes.len();
        self.nodes.push(node);
        self.marks.push(Mark::Active);
        self.index.insert(name.to_string(), idx);
        self.stack.push(name.to_string());

        for p in pending {
            let mut bound = BoundRule {
                prerequisites: Vec::with_capacity(p.prerequisites.len()),
                order_only: Vec::with_capacity(p.order_only.len()),
                commands: p.commands,
                stem: p.stem,
                loc: p.loc,
            };
            for prereq in &p.prerequisites {
                bound.prerequisites.push(self.visit(prereq, Some(idx))?);
            }
            for prereq in &p.order_only {
                bound.order_only.push(self.visit(prereq, Some(idx))?);
            }
            self.nodes[idx].rules.push(bound);
        }

        let mut dependencies: Vec<usize> = Vec::new();
        for r in &self.nodes[idx].rules {
            for d in r.prerequisites.iter().chain(r.order_only.iter()) {
                if !dependencies.contains(d) {
                    dependencies.push(*d);
                }
            }
        }
        for &d in &dependencies {
            self.nodes[d].dependents.push(idx);
        }
        self.nodes[idx].dependencies = dependencies;

        self.stack.pop();
        self.marks[idx] = Mark::Visited;
        self.nodes[idx].order = self.order;
        self.order += 1;
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpath::Vpath;
    use std::path::Path;

    fn rule(prereqs: &[&str], command: Option<&str>) -> Rc<Rule> {
        let loc = Location::new("Makefile", 1);
        Rc::new(Rule {
            prerequisites: prereqs.iter().map(|s| s.to_string()).collect(),
            order_only: Vec::new(),
            commands: command
                .map(|c| Command {
                    text: c.to_string(),
                    loc: loc.clone(),
                })
                .into_iter()
                .collect(),
            double_colon: false,
            stem: None,
            loc,
        })
    }

    fn search() -> Search {
        Search::new(Path::new("/nonexistent-rsmake-dir"), "", &Vpath::default())
    }

    #[test]
    fn merged_prerequisites_put_recipe_rule_first() {
        let mut g = Graph::new();
        g.add_rule("all", rule(&["x"], None)).unwrap();
        g.add_rule("all", rule(&["y"], Some("true"))).unwrap();
        g.add_rule("x", rule(&[], Some("true"))).unwrap();
        g.add_rule("y", rule(&[], Some("true"))).unwrap();
        let plan = g
            .resolve(&["all".to_string()], &search(), &HashSet::new(), true)
            .unwrap();
        let all = &plan.nodes[plan.goals[0]];
        let names: Vec<&str> = all.rules[0]
            .prerequisites
            .iter()
            .map(|&i| plan.nodes[i].target.as_str())
            .collect();
        assert_eq!(names, ["y", "x"]);
    }

    #[test]
    fn mixing_colon_kinds_is_an_error() {
        let mut g = Graph::new();
        g.add_rule("a", rule(&[], None)).unwrap();
        let dc = Rc::new(Rule {
            prerequisites: Vec::new(),
            order_only: Vec::new(),
            commands: Vec::new(),
            double_colon: true,
            stem: None,
            loc: Location::new("Makefile", 2),
        });
        assert!(matches!(g.add_rule("a", dc), Err(MakeError::Syntax { .. })));
    }

    #[test]
    fn special_targets_are_not_default() {
        let mut g = Graph::new();
        g.consider_default(".PHONY");
        g.consider_default("%.o");
        g.consider_default("all");
        g.consider_default("other");
        assert_eq!(g.default_target.as_deref(), Some("all"));
    }
}
