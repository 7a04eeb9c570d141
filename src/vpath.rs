use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::pattern::Pattern;

/// Directories registered with the `vpath` directive.
#[derive(Debug, Clone, Default)]
pub struct Vpath {
    patterns: Vec<(Pattern, Vec<String>)>,
}

/// Splits a search path on colons and blanks.
pub fn split_dirs(text: &str) -> Vec<String> {
    text.split(|c: char| c == ':' || c.is_ascii_whitespace())
        .filter(|d| !d.is_empty())
        .map(|d| d.trim_end_matches('/').to_string())
        .map(|d| if d.is_empty() { "/".to_string() } else { d })
        .collect()
}

impl Vpath {
    /// `vpath PATTERN DIRS`, `vpath PATTERN` or bare `vpath`.
    pub fn directive(&mut self, text: &str) {
        let mut words = text.split_ascii_whitespace();
        let Some(pattern) = words.next() else {
            self.patterns.clear();
            return;
        };
        let dirs = split_dirs(&words.collect::<Vec<_>>().join(" "));
        let pattern = Pattern::new(pattern);
        if dirs.is_empty() {
            self.patterns.retain(|(p, _)| *p != pattern);
        } else {
            self.patterns.push((pattern, dirs));
        }
    }
}

/// Locates files relative to the working directory, falling back to the
/// `vpath` directories and then to `VPATH`.
#[derive(Debug, Clone)]
pub struct Search {
    workdir: PathBuf,
    general: Vec<String>,
    patterns: Vec<(Pattern, Vec<String>)>,
}

impl Search {
    pub fn new(workdir: &Path, vpath_variable: &str, vpath: &Vpath) -> Search {
        Self {
            workdir: workdir.to_path_buf(),
            general: split_dirs(vpath_variable),
            patterns: vpath.patterns.clone(),
        }
    }

    pub fn mtime(&self, path: &str) -> Option<SystemTime> {
        fs::metadata(self.workdir.join(path))
            .and_then(|m| m.modified())
            .ok()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Returns the path `name` was found at and its modification time.
    pub fn find(&self, name: &str) -> Option<(String, SystemTime)> {
        if let Some(mtime) = self.mtime(name) {
            return Some((name.to_string(), mtime));
        }
        if Path::new(name).is_absolute() {
            return None;
        }
        let from_patterns = self
            .patterns
            .iter()
            .filter(|(p, _)| p.matches(name).is_some())
            .flat_map(|(_, dirs)| dirs.iter());
        for dir in from_patterns.chain(self.general.iter()) {
            let candidate = format!("{}/{}", dir, name);
            if let Some(mtime) = self.mtime(&candidate) {
                tracing::debug!("found '{}' through vpath as '{}'", name, candidate);
                return Some((candidate, mtime));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_split_on_colons_and_blanks() {
        assert_eq!(split_dirs("src: lib/  inc"), vec!["src", "lib", "inc"]);
    }

    #[test]
    fn vpath_directive_clears() {
        let mut v = Vpath::default();
        v.directive("%.c src");
        v.directive("%.h inc");
        v.directive("%.c");
        assert_eq!(v.patterns.len(), 1);
        v.directive("");
        assert!(v.patterns.is_empty());
    }
}
