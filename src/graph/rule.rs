use crate::error::Location;
use crate::pattern::Pattern;

/// One recipe line, expanded only when the rule runs.
#[derive(Debug, Clone)]
pub struct Command {
    pub text: String,
    pub loc: Location,
}

/// An explicit rule for one or more literal targets.
#[derive(Debug)]
pub struct Rule {
    pub prerequisites: Vec<String>,
    pub order_only: Vec<String>,
    pub commands: Vec<Command>,
    pub double_colon: bool,
    /// Set for static pattern rules, whose prerequisites were computed from
    /// the stem.
    pub stem: Option<String>,
    pub loc: Location,
}

impl Rule {
    /// The same rule with its recipe dropped, left behind when a later rule
    /// overrides the recipe.
    pub fn without_commands(&self) -> Rule {
        Rule {
            prerequisites: self.prerequisites.clone(),
            order_only: self.order_only.clone(),
            commands: Vec::new(),
            double_colon: self.double_colon,
            stem: self.stem.clone(),
            loc: self.loc.clone(),
        }
    }
}

/// An implicit rule: target patterns and prerequisite patterns sharing one
/// stem.
#[derive(Debug)]
pub struct PatternRule {
    pub targets: Vec<Pattern>,
    pub prerequisites: Vec<Pattern>,
    pub order_only: Vec<Pattern>,
    pub commands: Vec<Command>,
    /// Double-colon pattern rules are terminal: their prerequisites must
    /// exist, never be built through another implicit rule.
    pub terminal: bool,
    pub loc: Location,
}

/// Where a pattern rule matched a target: directory re-prepended to
/// prerequisites, and the stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemMatch {
    pub dir: String,
    pub stem: String,
}

impl PatternRule {
    pub fn is_match_anything(&self) -> bool {
        self.targets.iter().any(|t| t.is_match_anything())
    }

    /// Patterns without a slash also match the file part of a target in a
    /// subdirectory.
    pub fn match_for(&self, target: &str) -> Option<StemMatch> {
        for p in &self.targets {
            if let Some(stem) = p.matches(target) {
                return Some(StemMatch {
                    dir: String::new(),
                    stem: stem.to_string(),
                });
            }
        }
        let slash = target.rfind('/')?;
        let (dir, file) = target.split_at(slash + 1);
        if file.is_empty() {
            return None;
        }
        for p in self.targets.iter().filter(|p| !p.has_slash()) {
            if let Some(stem) = p.matches(file) {
                return Some(StemMatch {
                    dir: dir.to_string(),
                    stem: stem.to_string(),
                });
            }
        }
        None
    }

    pub fn prerequisites_for(&self, m: &StemMatch) -> Vec<String> {
        self.prerequisites
            .iter()
            .map(|p| p.resolve(&m.dir, &m.stem))
            .collect()
    }

    pub fn order_only_for(&self, m: &StemMatch) -> Vec<String> {
        self.order_only
            .iter()
            .map(|p| p.resolve(&m.dir, &m.stem))
            .collect()
    }
}
