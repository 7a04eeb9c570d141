use std::path::PathBuf;

/// Settings of one invocation, from the command line and `MAKEFLAGS`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Makefiles given with `-f`; empty means the usual names are tried.
    pub makefiles: Vec<PathBuf>,
    pub goals: Vec<String>,
    /// `NAME=value` words from the command line, in order.
    pub variables: Vec<(String, String)>,
    pub jobs: usize,
    pub directory: PathBuf,
    /// Imported as variables of origin `environment`.
    pub environment: Vec<(String, String)>,
    /// The value of `$(MAKE)`.
    pub program: PathBuf,
    pub silent: bool,
    pub ignore_errors: bool,
    pub dry_run: bool,
    pub keep_going: bool,
    pub always_make: bool,
    pub debug: bool,
}

/// Makefile names tried in order when none is given.
pub const DEFAULT_MAKEFILES: [&str; 3] = ["GNUmakefile", "makefile", "Makefile"];

impl Config {
    pub fn new(directory: impl Into<PathBuf>) -> Config {
        Self {
            makefiles: Vec::new(),
            goals: Vec::new(),
            variables: Vec::new(),
            jobs: 1,
            directory: directory.into(),
            environment: Vec::new(),
            program: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("rsmake")),
            silent: false,
            ignore_errors: false,
            dry_run: false,
            keep_going: false,
            always_make: false,
            debug: false,
        }
    }

    /// Sorts positional words into goals and command-line variables.
    pub fn add_word(&mut self, word: &str) {
        match parse_assignment(word) {
            Some(var) => self.variables.push(var),
            None => self.goals.push(word.to_string()),
        }
    }

    /// Applies the flags and variables of an inherited `MAKEFLAGS`. Variables
    /// given directly on the command line take precedence.
    pub fn merge_makeflags(&mut self, makeflags: &str) {
        let mut inherited = Vec::new();
        for word in split_escaped(makeflags) {
            if word == "--" {
                continue;
            }
            if let Some(var) = parse_assignment(&word) {
                inherited.push(var);
                continue;
            }
            let letters = word.strip_prefix('-').unwrap_or(&word);
            if letters.starts_with('-') {
                continue;
            }
            for c in letters.chars() {
                match c {
                    's' => self.silent = true,
                    'i' => self.ignore_errors = true,
                    'n' => self.dry_run = true,
                    'k' => self.keep_going = true,
                    'B' => self.always_make = true,
                    _ => {}
                }
            }
        }
        inherited.retain(|(name, _)| !self.variables.iter().any(|(n, _)| n == name));
        inherited.append(&mut self.variables);
        self.variables = inherited;
    }

    /// The `MAKEFLAGS` passed to child invocations.
    pub fn makeflags(&self) -> String {
        let mut letters = String::new();
        for (set, c) in [
            (self.always_make, 'B'),
            (self.ignore_errors, 'i'),
            (self.keep_going, 'k'),
            (self.dry_run, 'n'),
            (self.silent, 's'),
        ] {
            if set {
                letters.push(c);
            }
        }
        if self.variables.is_empty() {
            return letters;
        }
        let vars = self
            .variables
            .iter()
            .map(|(n, v)| format!("{}={}", escape(n), escape(v)))
            .collect::<Vec<_>>()
            .join(" ");
        if letters.is_empty() {
            format!("-- {}", vars)
        } else {
            format!("{} -- {}", letters, vars)
        }
    }
}

/// `NAME=value`, the name being non-empty and free of blanks.
pub fn parse_assignment(word: &str) -> Option<(String, String)> {
    let (name, value) = word.split_once('=')?;
    let name = name.strip_suffix(':').unwrap_or(name);
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace(' ', "\\ ")
}

/// Splits on blanks not preceded by a backslash.
fn split_escaped(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => word.push(next),
                None => word.push('\\'),
            },
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_split_into_goals_and_variables() {
        let mut c = Config::new("/tmp");
        c.add_word("all");
        c.add_word("OBASIC=oval");
        c.add_word("CC:=gcc");
        assert_eq!(c.goals, ["all"]);
        assert_eq!(
            c.variables,
            [
                ("OBASIC".to_string(), "oval".to_string()),
                ("CC".to_string(), "gcc".to_string())
            ]
        );
    }

    #[test]
    fn makeflags_round_trip() {
        let mut c = Config::new("/tmp");
        c.silent = true;
        c.keep_going = true;
        c.variables.push(("MSG".to_string(), "a b".to_string()));
        let flags = c.makeflags();
        assert_eq!(flags, "ks -- MSG=a\\ b");

        let mut child = Config::new("/tmp");
        child.variables.push(("MSG".to_string(), "mine".to_string()));
        child.merge_makeflags(&flags);
        assert!(child.silent && child.keep_going && !child.dry_run);
        assert_eq!(child.variables, [("MSG".to_string(), "mine".to_string())]);
    }

    #[test]
    fn dashed_makeflags() {
        let mut c = Config::new("/tmp");
        c.merge_makeflags("-n -B --no-print-directory");
        assert!(c.dry_run && c.always_make && !c.silent);
    }
}
