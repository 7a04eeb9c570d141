//! Reading makefile text: conditionals, `define`, `include`, assignments
//! and rules.
//!
//! Each logical line is classified once and dispatched; lines inside a
//! conditional branch that is not taken are only checked for the
//! directives that open and close blocks, so they are never expanded.

use std::rc::Rc;

use crate::error::{Location, MakeError, Result};
use crate::expand::{Environment, Expander};
use crate::graph::rule::{Command, PatternRule, Rule};
use crate::makefile::Makefile;
use crate::pattern::Pattern;
use crate::variables::{split_words, Flavor, Origin, Variables};

use self::conditional::{split_operands, CondKind, Conditionals};
use self::scan::Scanner;

pub mod conditional;
pub mod scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Recursive,
    /// `:=` and `::=`
    Simple,
    /// `+=`
    Append,
    /// `?=`
    Conditional,
    /// `!=`
    Shell,
}

/// The first top-level `:`, `::` or assignment operator of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Colon { double: bool },
    Assign(AssignOp),
}

/// Finds the first separator outside of `$(...)` references. Returns its
/// start, the offset just past it, and its kind.
pub fn find_separator(text: &str) -> Option<(usize, usize, Separator)> {
    let bytes = text.as_bytes();
    let mut closers: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        if b == b'$' {
            match next {
                Some(b'(') => closers.push(b')'),
                Some(b'{') => closers.push(b'}'),
                _ => {}
            }
            i += 2;
            continue;
        }
        if !closers.is_empty() {
            match b {
                b'(' => closers.push(b')'),
                b'{' => closers.push(b'}'),
                _ if closers.last() == Some(&b) => {
                    closers.pop();
                }
                _ => {}
            }
            i += 1;
            continue;
        }
        let found = match (b, next) {
            (b':', Some(b'=')) => Some((2, Separator::Assign(AssignOp::Simple))),
            (b':', Some(b':')) if bytes.get(i + 2) == Some(&b'=') => {
                Some((3, Separator::Assign(AssignOp::Simple)))
            }
            (b':', Some(b':')) => Some((2, Separator::Colon { double: true })),
            (b':', _) => Some((1, Separator::Colon { double: false })),
            (b'+', Some(b'=')) => Some((2, Separator::Assign(AssignOp::Append))),
            (b'?', Some(b'=')) => Some((2, Separator::Assign(AssignOp::Conditional))),
            (b'!', Some(b'=')) => Some((2, Separator::Assign(AssignOp::Shell))),
            (b'=', _) => Some((1, Separator::Assign(AssignOp::Recursive))),
            _ => None,
        };
        if let Some((len, sep)) = found {
            return Some((i, i + len, sep));
        }
        i += 1;
    }
    None
}

/// Position of the first `c` outside of `$(...)` references.
fn find_top_level(text: &str, c: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if matches!(bytes.get(i + 1), Some(b'(') | Some(b'{')) => {
                depth += 1;
                i += 2;
                continue;
            }
            b'$' => {
                i += 2;
                continue;
            }
            b'(' | b'{' if depth > 0 => depth += 1,
            b')' | b'}' if depth > 0 => depth -= 1,
            b if b == c && depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Splits off a leading directive word, which ends at a blank or `(`.
fn split_keyword(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    let end = line
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(line.len());
    (&line[..end], &line[end..])
}

/// Whether `rest` starts with an assignment operator, making the word
/// before it a variable name rather than a directive.
fn starts_with_operator(rest: &str) -> bool {
    let rest = rest.trim_start();
    ["=", ":=", "::=", "+=", "?=", "!="]
        .iter()
        .any(|op| rest.starts_with(op))
}

fn words(text: &str) -> Vec<String> {
    split_words(text).into_iter().map(str::to_string).collect()
}

#[derive(Debug)]
enum RuleKind {
    Explicit,
    /// `targets: target-pattern: prerequisite-patterns`
    Static(Pattern),
    Implicit,
}

/// A rule whose recipe lines are still being read.
#[derive(Debug)]
struct PendingRule {
    targets: Vec<String>,
    kind: RuleKind,
    prerequisites: Vec<String>,
    order_only: Vec<String>,
    double_colon: bool,
    commands: Vec<Command>,
    loc: Location,
}

fn evaluate_condition(mk: &mut Makefile, kind: CondKind, text: &str, loc: &Location) -> Result<bool> {
    let result = match kind {
        CondKind::Ifdef | CondKind::Ifndef => {
            let name = Expander::new(mk, loc).expand_text(text.trim())?;
            let defined = mk.lookup(name.trim()).is_some_and(|r| !r.is_empty());
            defined == (kind == CondKind::Ifdef)
        }
        CondKind::Ifeq | CondKind::Ifneq => {
            let (a, b) = split_operands(text, loc)?;
            let mut e = Expander::new(mk, loc);
            let a = e.expand_text(a)?;
            let b = e.expand_text(b)?;
            (a == b) == (kind == CondKind::Ifeq)
        }
    };
    tracing::debug!("{}: {} is {}", loc, kind.keyword(), result);
    Ok(result)
}

/// Reads the body of a `define` up to its matching `endef`.
fn read_define_body(scanner: &mut Scanner, loc: &Location) -> Result<String> {
    let mut depth = 1usize;
    let mut body: Vec<&str> = Vec::new();
    while let Some((_, line)) = scanner.next_raw() {
        let (word, rest) = split_keyword(line);
        let word = if word == "override" {
            split_keyword(rest).0
        } else {
            word
        };
        if word == "define" {
            depth += 1;
        } else if word == "endef" {
            depth -= 1;
            if depth == 0 {
                return Ok(body.join("\n"));
            }
        }
        body.push(line);
    }
    Err(MakeError::syntax(loc, "missing 'endef', unterminated 'define'"))
}

struct Processor<'m> {
    mk: &'m mut Makefile,
    path: String,
    first_line: usize,
    conds: Conditionals,
    rule: Option<PendingRule>,
}

impl Makefile {
    /// Processes makefile text. `first_line` numbers the first line of
    /// `text` in messages.
    pub fn parse_text(&mut self, text: &str, path: &str, first_line: usize) -> Result<()> {
        let mut scanner = Scanner::new(text);
        let mut p = Processor {
            mk: self,
            path: path.to_string(),
            first_line,
            conds: Conditionals::default(),
            rule: None,
        };
        let mut last = 1;
        while let Some(raw) = scanner.peek() {
            if raw.starts_with('\t') && p.rule.is_some() {
                let Some((lineno, line)) = scanner.next_recipe_line() else {
                    break;
                };
                last = lineno;
                if p.conds.live() {
                    let loc = p.loc(lineno);
                    if let Some(rule) = p.rule.as_mut() {
                        rule.commands.push(Command { text: line, loc });
                    }
                }
                continue;
            }
            let Some((lineno, line)) = scanner.next_make_line() else {
                break;
            };
            last = lineno;
            p.line(&mut scanner, lineno, &line)?;
        }
        p.commit()?;
        if !p.conds.is_empty() {
            return Err(MakeError::syntax(&p.loc(last), "missing 'endif'"));
        }
        Ok(())
    }
}

impl Processor<'_> {
    fn loc(&self, lineno: usize) -> Location {
        Location::new(self.path.clone(), self.first_line + lineno - 1)
    }

    fn expand(&mut self, text: &str, loc: &Location) -> Result<String> {
        Expander::new(&mut *self.mk, loc).expand_text(text)
    }

    fn line(&mut self, scanner: &mut Scanner, lineno: usize, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let loc = self.loc(lineno);
        let (word, rest) = split_keyword(line);

        if let Some(kind) = CondKind::from_keyword(word) {
            let mk = &mut *self.mk;
            return self.conds.open(|| evaluate_condition(mk, kind, rest, &loc));
        }
        match word {
            "else" => return self.else_line(rest, &loc),
            "endif" => {
                if !rest.trim().is_empty() {
                    tracing::warn!("{}: extraneous text after 'endif' directive", loc);
                }
                return self.conds.close(&loc);
            }
            _ => {}
        }

        if !self.conds.live() {
            let defines = word == "define" || (word == "override" && split_keyword(rest).0 == "define");
            if defines {
                read_define_body(scanner, &loc)?;
            }
            return Ok(());
        }

        if starts_with_operator(rest) {
            return self.statement(line, &loc);
        }
        match word {
            "define" => {
                self.commit()?;
                self.define(scanner, rest, Origin::File, &loc)
            }
            "endef" => Err(MakeError::syntax(&loc, "extraneous 'endef'")),
            "include" | "-include" | "sinclude" => {
                self.commit()?;
                let names = words(&self.expand(rest, &loc)?);
                self.mk.include(&names, word == "include", &loc)
            }
            "vpath" => {
                self.commit()?;
                let text = self.expand(rest, &loc)?;
                self.mk.vpath.directive(&text);
                Ok(())
            }
            "override" => {
                self.commit()?;
                let (next, after) = split_keyword(rest);
                if next == "define" {
                    return self.define(scanner, after, Origin::Override, &loc);
                }
                match find_separator(rest) {
                    Some((start, end, Separator::Assign(op))) => {
                        let name = self.expand(rest[..start].trim(), &loc)?;
                        self.assign(name.trim(), op, rest[end..].trim_start(), Origin::Override, &loc)
                    }
                    _ => Err(MakeError::syntax(&loc, "invalid 'override' directive")),
                }
            }
            "export" | "unexport" => {
                self.commit()?;
                self.export(word == "export", rest, &loc)
            }
            _ => self.statement(line, &loc),
        }
    }

    fn else_line(&mut self, rest: &str, loc: &Location) -> Result<()> {
        let rest = rest.trim();
        if rest.is_empty() {
            return self.conds.else_branch(loc, false, || Ok(true));
        }
        let (keyword, condition) = split_keyword(rest);
        let Some(kind) = CondKind::from_keyword(keyword) else {
            return Err(MakeError::syntax(loc, "extraneous text after 'else' directive"));
        };
        let mk = &mut *self.mk;
        self.conds
            .else_branch(loc, true, || evaluate_condition(mk, kind, condition, loc))
    }

    fn define(&mut self, scanner: &mut Scanner, rest: &str, origin: Origin, loc: &Location) -> Result<()> {
        let rest = rest.trim();
        let ops = [
            ("::=", AssignOp::Simple),
            (":=", AssignOp::Simple),
            ("+=", AssignOp::Append),
            ("?=", AssignOp::Conditional),
            ("!=", AssignOp::Shell),
            ("=", AssignOp::Recursive),
        ];
        let (name, op) = ops
            .iter()
            .find_map(|(s, op)| rest.strip_suffix(s).map(|n| (n, *op)))
            .unwrap_or((rest, AssignOp::Recursive));
        let name = self.expand(name.trim(), loc)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MakeError::syntax(loc, "empty variable name"));
        }
        let body = read_define_body(scanner, loc)?;
        self.assign(name, op, &body, origin, loc)
    }

    fn export(&mut self, exported: bool, rest: &str, loc: &Location) -> Result<()> {
        if rest.trim().is_empty() {
            self.mk.unexport_all = !exported;
            return Ok(());
        }
        if exported {
            if let Some((start, end, Separator::Assign(op))) = find_separator(rest) {
                let name = self.expand(rest[..start].trim(), loc)?;
                let name = name.trim();
                self.assign(name, op, rest[end..].trim_start(), Origin::File, loc)?;
                self.mk.variables.set_exported(name, true);
                return Ok(());
            }
        }
        for name in words(&self.expand(rest, loc)?) {
            self.mk.variables.set_exported(&name, exported);
        }
        Ok(())
    }

    /// Variable assignment in the global scope.
    fn assign(&mut self, name: &str, op: AssignOp, value: &str, origin: Origin, loc: &Location) -> Result<()> {
        if name.is_empty() {
            return Err(MakeError::syntax(loc, "empty variable name"));
        }
        match op {
            AssignOp::Recursive => {
                self.mk
                    .variables
                    .set(name, Flavor::Recursive, origin, value.to_string());
            }
            AssignOp::Simple => {
                let value = self.expand(value, loc)?;
                self.mk.variables.set(name, Flavor::Simple, origin, value);
            }
            AssignOp::Shell => {
                let mut e = Expander::new(&mut *self.mk, loc);
                let command = e.expand_text(value)?;
                let output = e.shell(&command)?;
                self.mk.variables.set(name, Flavor::Simple, origin, output);
            }
            AssignOp::Conditional => {
                if self.mk.lookup(name).is_none() {
                    self.mk
                        .variables
                        .set(name, Flavor::Recursive, origin, value.to_string());
                }
            }
            AssignOp::Append => {
                let simple = self
                    .mk
                    .variables
                    .get(name)
                    .is_some_and(|v| v.flavor == Flavor::Simple);
                let value = if simple {
                    self.expand(value, loc)?
                } else {
                    value.to_string()
                };
                self.mk.variables.append(name, origin, value, true);
            }
        }
        Ok(())
    }

    fn scope(&mut self, target: &str) -> &mut Variables {
        let pattern = Pattern::new(target);
        if pattern.is_pattern() {
            self.mk.graph.pattern_variables_mut(pattern)
        } else {
            self.mk.graph.target_variables_mut(target)
        }
    }

    /// `targets: NAME op value`, layered over the global scope while the
    /// targets are built.
    fn assign_target(
        &mut self,
        targets: &[String],
        name_text: &str,
        op: AssignOp,
        value: &str,
        loc: &Location,
    ) -> Result<()> {
        let mut origin = Origin::File;
        let mut name_words = split_words(name_text);
        while let Some(first) = name_words.first() {
            match *first {
                "override" => origin = Origin::Override,
                "export" | "private" => {}
                _ => break,
            }
            name_words.remove(0);
        }
        let name = self.expand(&name_words.join(" "), loc)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MakeError::syntax(loc, "empty variable name"));
        }

        let outranked = self
            .mk
            .variables
            .get(name)
            .is_some_and(|v| v.origin.outranks(origin));
        let computed = match op {
            AssignOp::Simple => Some(self.expand(value, loc)?),
            AssignOp::Shell => {
                let mut e = Expander::new(&mut *self.mk, loc);
                let command = e.expand_text(value)?;
                Some(e.shell(&command)?)
            }
            _ => None,
        };

        for target in targets {
            match op {
                AssignOp::Recursive | AssignOp::Simple | AssignOp::Shell => {
                    if outranked {
                        tracing::debug!(
                            "{}: not setting '{}' for '{}', overridden globally",
                            loc,
                            name,
                            target
                        );
                        continue;
                    }
                    let (flavor, v) = match &computed {
                        Some(v) => (Flavor::Simple, v.clone()),
                        None => (Flavor::Recursive, value.to_string()),
                    };
                    self.scope(target).set(name, flavor, origin, v);
                }
                AssignOp::Conditional => {
                    let defined = self.scope(target).contains(name) || self.mk.lookup(name).is_some();
                    if !defined {
                        self.scope(target)
                            .set(name, Flavor::Recursive, origin, value.to_string());
                    }
                }
                AssignOp::Append => {
                    let simple = self
                        .scope(target)
                        .get(name)
                        .is_some_and(|v| v.flavor == Flavor::Simple);
                    let v = if simple {
                        self.expand(value, loc)?
                    } else {
                        value.to_string()
                    };
                    self.scope(target).append(name, origin, v, false);
                }
            }
        }
        Ok(())
    }

    /// A line that is neither a directive nor a recipe.
    fn statement(&mut self, line: &str, loc: &Location) -> Result<()> {
        self.commit()?;
        match find_separator(line) {
            Some((start, end, Separator::Assign(op))) => {
                let name = self.expand(line[..start].trim(), loc)?;
                self.assign(name.trim(), op, line[end..].trim_start(), Origin::File, loc)
            }
            Some((start, end, Separator::Colon { double })) => {
                self.rule(&line[..start], double, &line[end..], loc)
            }
            None => {
                let expanded = self.expand(line, loc)?;
                if expanded.trim().is_empty() {
                    return Ok(());
                }
                if expanded.contains(':') {
                    // Already expanded; escape it so reading it again as a
                    // rule leaves it unchanged.
                    return self.statement(&expanded.replace('$', "$$"), loc);
                }
                Err(MakeError::syntax(loc, "missing separator"))
            }
        }
    }

    fn rule(&mut self, lhs: &str, double_colon: bool, rest: &str, loc: &Location) -> Result<()> {
        let targets = words(&self.expand(lhs, loc)?);
        let semicolon = find_top_level(rest, b';');

        let separator = find_separator(rest);
        if let Some((start, end, Separator::Assign(op))) = separator {
            if semicolon.map_or(true, |s| s > start) {
                return self.assign_target(&targets, &rest[..start], op, rest[end..].trim_start(), loc);
            }
        }

        let (head, inline) = match semicolon {
            Some(i) => (&rest[..i], Some(rest[i + 1..].trim_start())),
            None => (rest, None),
        };

        let (kind, prereq_text) = match find_separator(head) {
            Some((start, end, Separator::Colon { double: false })) => {
                let pattern = self.expand(&head[..start], loc)?;
                let pattern = Pattern::new(pattern.trim());
                if !pattern.is_pattern() {
                    return Err(MakeError::syntax(loc, "target pattern contains no '%'"));
                }
                (RuleKind::Static(pattern), &head[end..])
            }
            Some((_, _, Separator::Colon { double: true })) => {
                return Err(MakeError::syntax(loc, "unexpected '::' in prerequisites"));
            }
            _ => {
                let patterns = targets
                    .iter()
                    .filter(|t| Pattern::new(t).is_pattern())
                    .count();
                if patterns == 0 {
                    (RuleKind::Explicit, head)
                } else if patterns == targets.len() {
                    (RuleKind::Implicit, head)
                } else {
                    return Err(MakeError::syntax(loc, "mixed implicit and normal rules"));
                }
            }
        };

        let mut prerequisites = Vec::new();
        let mut order_only = Vec::new();
        let mut after_bar = false;
        for word in words(&self.expand(prereq_text, loc)?) {
            if word == "|" {
                after_bar = true;
            } else if after_bar {
                order_only.push(word);
            } else {
                prerequisites.push(word);
            }
        }

        let commands = inline
            .map(|text| Command {
                text: text.to_string(),
                loc: loc.clone(),
            })
            .into_iter()
            .collect();
        self.rule = Some(PendingRule {
            targets,
            kind,
            prerequisites,
            order_only,
            double_colon,
            commands,
            loc: loc.clone(),
        });
        Ok(())
    }

    /// Adds the rule being read, now that its recipe is complete.
    fn commit(&mut self) -> Result<()> {
        let Some(rule) = self.rule.take() else {
            return Ok(());
        };
        let graph = &mut self.mk.graph;
        match rule.kind {
            RuleKind::Explicit => {
                let shared = Rc::new(Rule {
                    prerequisites: rule.prerequisites,
                    order_only: rule.order_only,
                    commands: rule.commands,
                    double_colon: rule.double_colon,
                    stem: None,
                    loc: rule.loc,
                });
                for target in &rule.targets {
                    graph.add_rule(target, Rc::clone(&shared))?;
                    graph.consider_default(target);
                }
            }
            RuleKind::Static(pattern) => {
                for target in &rule.targets {
                    let Some(stem) = pattern.matches(target) else {
                        tracing::warn!(
                            "{}: target '{}' doesn't match the target pattern",
                            rule.loc,
                            target
                        );
                        continue;
                    };
                    let resolve = |words: &[String]| -> Vec<String> {
                        words
                            .iter()
                            .map(|w| Pattern::new(w).resolve("", stem))
                            .collect()
                    };
                    let bound = Rule {
                        prerequisites: resolve(&rule.prerequisites),
                        order_only: resolve(&rule.order_only),
                        commands: rule.commands.clone(),
                        double_colon: rule.double_colon,
                        stem: Some(stem.to_string()),
                        loc: rule.loc.clone(),
                    };
                    graph.add_rule(target, Rc::new(bound))?;
                    graph.consider_default(target);
                }
            }
            RuleKind::Implicit => {
                let patterns = |words: &[String]| -> Vec<Pattern> {
                    words.iter().map(|w| Pattern::new(w)).collect()
                };
                graph.add_implicit(PatternRule {
                    targets: patterns(&rule.targets),
                    prerequisites: patterns(&rule.prerequisites),
                    order_only: patterns(&rule.order_only),
                    commands: rule.commands,
                    terminal: rule.double_colon,
                    loc: rule.loc,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators() {
        let sep = |s: &str| find_separator(s).map(|(start, _, sep)| (start, sep));
        assert_eq!(sep("a = b"), Some((2, Separator::Assign(AssignOp::Recursive))));
        assert_eq!(sep("a := b"), Some((2, Separator::Assign(AssignOp::Simple))));
        assert_eq!(sep("a ::= b"), Some((2, Separator::Assign(AssignOp::Simple))));
        assert_eq!(sep("a += b"), Some((2, Separator::Assign(AssignOp::Append))));
        assert_eq!(sep("a != b"), Some((2, Separator::Assign(AssignOp::Shell))));
        assert_eq!(sep("all:: x"), Some((3, Separator::Colon { double: true })));
        assert_eq!(sep("all: X = y"), Some((3, Separator::Colon { double: false })));
        assert_eq!(sep("$(a:.c=.o): x"), Some((10, Separator::Colon { double: false })));
        assert_eq!(sep("$(info a=b)"), None);
    }

    #[test]
    fn keyword_split() {
        assert_eq!(split_keyword("ifeq (a,b)"), ("ifeq", " (a,b)"));
        assert_eq!(split_keyword("ifeq(a,b)"), ("ifeq", "(a,b)"));
        assert_eq!(split_keyword("-include foo.mk"), ("-include", " foo.mk"));
        assert!(starts_with_operator(" = value"));
        assert!(!starts_with_operator(" foo.mk"));
    }

    #[test]
    fn semicolons_inside_references_are_not_recipes() {
        assert_eq!(find_top_level("a $(x;y) ; echo", b';'), Some(9));
        assert_eq!(find_top_level("a b", b';'), None);
    }
}
