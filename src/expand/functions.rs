use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{Environment, Expander, Expansion};
use crate::error::{MakeError, Result};
use crate::pattern::Pattern;
use crate::variables::split_words;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Subst,
    Patsubst,
    Strip,
    Findstring,
    Filter,
    FilterOut,
    Sort,
    Word,
    Wordlist,
    Words,
    Firstword,
    Lastword,
    Dir,
    Notdir,
    Suffix,
    Basename,
    Addsuffix,
    Addprefix,
    Join,
    Wildcard,
    Realpath,
    Abspath,
    If,
    Or,
    And,
    Foreach,
    Call,
    Value,
    Eval,
    Origin,
    Flavor,
    Shell,
    Error,
    Warning,
    Info,
}

use Function::*;

const FUNCTIONS: [(&str, Function); 35] = [
    ("subst", Subst),
    ("patsubst", Patsubst),
    ("strip", Strip),
    ("findstring", Findstring),
    ("filter", Filter),
    ("filter-out", FilterOut),
    ("sort", Sort),
    ("word", Word),
    ("wordlist", Wordlist),
    ("words", Words),
    ("firstword", Firstword),
    ("lastword", Lastword),
    ("dir", Dir),
    ("notdir", Notdir),
    ("suffix", Suffix),
    ("basename", Basename),
    ("addsuffix", Addsuffix),
    ("addprefix", Addprefix),
    ("join", Join),
    ("wildcard", Wildcard),
    ("realpath", Realpath),
    ("abspath", Abspath),
    ("if", If),
    ("or", Or),
    ("and", And),
    ("foreach", Foreach),
    ("call", Call),
    ("value", Value),
    ("eval", Eval),
    ("origin", Origin),
    ("flavor", Flavor),
    ("shell", Shell),
    ("error", Error),
    ("warning", Warning),
    ("info", Info),
];

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        FUNCTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
    }

    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    /// Minimum and maximum argument counts. Past the maximum, commas belong
    /// to the last argument.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Subst | Patsubst | Wordlist | Foreach => (3, Some(3)),
            Findstring | Filter | FilterOut | Word | Addsuffix | Addprefix | Join => (2, Some(2)),
            If => (2, Some(3)),
            Or | And | Call => (1, None),
            _ => (1, Some(1)),
        }
    }
}

/// `$(VAR:FROM=TO)`: a `%`-less FROM only matches at the end of a word.
pub fn substitution_reference(value: &str, from: &str, to: &str) -> String {
    let (pattern, to) = if Pattern::new(from).is_pattern() {
        (Pattern::new(from), to.to_string())
    } else {
        (Pattern::new(&format!("%{}", from)), format!("%{}", to))
    };
    split_words(value)
        .into_iter()
        .map(|w| pattern.subst(&to, w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Makes `$(shell)` output a single line: trailing newlines are dropped and
/// inner ones become spaces.
pub fn shell_output(stdout: &[u8]) -> String {
    let s = String::from_utf8_lossy(stdout);
    let s = s.trim_end_matches(['\n', '\r']);
    s.replace("\r\n", " ").replace('\n', " ")
}

fn dir(word: &str) -> &str {
    match word.rfind('/') {
        Some(i) => &word[..=i],
        None => "./",
    }
}

fn notdir(word: &str) -> &str {
    match word.rfind('/') {
        Some(i) => &word[i + 1..],
        None => word,
    }
}

fn suffix_start(word: &str) -> Option<usize> {
    let dot = word.rfind('.')?;
    match word.rfind('/') {
        Some(slash) if slash > dot => None,
        _ => Some(dot),
    }
}

fn map_words(text: &str, f: impl Fn(&str) -> String) -> String {
    split_words(text)
        .into_iter()
        .map(f)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn wildcard(workdir: &Path, pattern: &str) -> Vec<String> {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let absolute = Path::new(pattern).is_absolute();
    let full = if absolute {
        pattern.to_string()
    } else {
        format!(
            "{}/{}",
            glob::Pattern::escape(&workdir.to_string_lossy()),
            pattern
        )
    };
    let Ok(paths) = glob::glob_with(&full, options) else {
        return Vec::new();
    };
    paths
        .filter_map(|p| p.ok())
        .map(|p| {
            if absolute {
                p.display().to_string()
            } else {
                p.strip_prefix(workdir).unwrap_or(&p).display().to_string()
            }
        })
        .collect()
}

/// Makes `path` absolute against `workdir`, folding `.` and `..` without
/// touching the filesystem.
pub fn abspath(workdir: &Path, path: &str) -> String {
    let joined: PathBuf = if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        workdir.join(path)
    };
    let joined = joined.to_string_lossy().into_owned();
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parse_number(function: Function, which: &str, text: &str) -> std::result::Result<i64, String> {
    text.trim().parse::<i64>().map_err(|_| {
        format!(
            "non-numeric {} argument to '{}' function: '{}'",
            which,
            function.name(),
            text.trim()
        )
    })
}

impl<E: Environment + ?Sized> Expander<'_, E> {
    fn eval_error(&self, message: String) -> MakeError {
        MakeError::Eval {
            loc: self.loc.clone(),
            message,
        }
    }

    fn expand_all(&mut self, args: &[Expansion]) -> Result<Vec<String>> {
        args.iter().map(|a| self.expand(a)).collect()
    }

    pub(crate) fn call_function(&mut self, function: Function, args: &[Expansion]) -> Result<String> {
        match function {
            If => {
                let cond = self.expand(&args[0])?;
                if !cond.trim().is_empty() {
                    self.expand(&args[1])
                } else {
                    match args.get(2) {
                        Some(e) => self.expand(e),
                        None => Ok(String::new()),
                    }
                }
            }
            Or => {
                for a in args {
                    let s = self.expand(a)?;
                    if !s.trim().is_empty() {
                        return Ok(s);
                    }
                }
                Ok(String::new())
            }
            And => {
                let mut last = String::new();
                for a in args {
                    last = self.expand(a)?;
                    if last.trim().is_empty() {
                        return Ok(String::new());
                    }
                }
                Ok(last)
            }
            Foreach => {
                let var = self.expand(&args[0])?.trim().to_string();
                let list = self.expand(&args[1])?;
                let mut results = Vec::new();
                for word in split_words(&list) {
                    let s = self.with_frame(vec![(var.clone(), word.to_string())], |x| {
                        x.expand(&args[2])
                    })?;
                    results.push(s);
                }
                Ok(results.join(" "))
            }
            Call => self.call(args),
            Value => {
                let name = self.expand(&args[0])?.trim().to_string();
                if let Some(v) = self.local(&name) {
                    return Ok(v.to_string());
                }
                Ok(self.env.lookup(&name).map(|r| r.raw()).unwrap_or_default())
            }
            Origin => {
                let name = self.expand(&args[0])?.trim().to_string();
                if self.local(&name).is_some() {
                    return Ok("automatic".to_string());
                }
                Ok(match self.env.lookup(&name) {
                    Some(r) => r.origin().as_str().to_string(),
                    None => "undefined".to_string(),
                })
            }
            Flavor => {
                let name = self.expand(&args[0])?.trim().to_string();
                if self.local(&name).is_some() {
                    return Ok("simple".to_string());
                }
                Ok(match self.env.lookup(&name) {
                    Some(r) => r.flavor().as_str().to_string(),
                    None => "undefined".to_string(),
                })
            }
            Eval | Shell if self.exporting => Err(self.eval_error(format!(
                "'{}' has side effects and is not run for an environment value",
                function.name()
            ))),
            Warning | Info if self.exporting => Ok(String::new()),
            Eval => {
                let text = self.expand(&args[0])?;
                let loc = self.loc.clone();
                self.env.eval(&text, &loc)?;
                Ok(String::new())
            }
            Shell => {
                let cmd = self.expand(&args[0])?;
                self.shell(&cmd)
            }
            Error => {
                let message = self.expand(&args[0])?;
                Err(self.eval_error(message))
            }
            Warning => {
                let message = self.expand(&args[0])?;
                eprintln!("{}: {}", self.loc, message);
                Ok(String::new())
            }
            Info => {
                let message = self.expand(&args[0])?;
                println!("{}", message);
                Ok(String::new())
            }
            _ => {
                let values = self.expand_all(args)?;
                self.text_function(function, &values)
            }
        }
    }

    fn text_function(&mut self, function: Function, a: &[String]) -> Result<String> {
        let workdir = self.env.workdir().to_path_buf();
        let out = match function {
            Subst => {
                if a[0].is_empty() {
                    format!("{}{}", a[2], a[1])
                } else {
                    a[2].replace(a[0].as_str(), &a[1])
                }
            }
            Patsubst => {
                let p = Pattern::new(a[0].trim());
                map_words(&a[2], |w| p.subst(a[1].trim(), w))
            }
            Strip => split_words(&a[0]).join(" "),
            Findstring => {
                if a[1].contains(a[0].as_str()) {
                    a[0].clone()
                } else {
                    String::new()
                }
            }
            Filter | FilterOut => {
                let patterns: Vec<Pattern> = split_words(&a[0]).into_iter().map(Pattern::new).collect();
                let keep = function == Filter;
                split_words(&a[1])
                    .into_iter()
                    .filter(|w| patterns.iter().any(|p| p.matches(w).is_some()) == keep)
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Sort => {
                let mut words = split_words(&a[0]);
                words.sort_unstable();
                words.dedup();
                words.join(" ")
            }
            Word => {
                let n = parse_number(Word, "first", &a[0]).map_err(|m| self.eval_error(m))?;
                if n < 1 {
                    return Err(self.eval_error(
                        "first argument to 'word' function must be greater than 0".to_string(),
                    ));
                }
                split_words(&a[1])
                    .get(n as usize - 1)
                    .map(|w| w.to_string())
                    .unwrap_or_default()
            }
            Wordlist => {
                let start = parse_number(Wordlist, "first", &a[0]).map_err(|m| self.eval_error(m))?;
                let end = parse_number(Wordlist, "second", &a[1]).map_err(|m| self.eval_error(m))?;
                let words = split_words(&a[2]);
                let start = start.max(1) as usize;
                let end = (end.max(0) as usize).min(words.len());
                if start > end {
                    String::new()
                } else {
                    words[start - 1..end].join(" ")
                }
            }
            Words => split_words(&a[0]).len().to_string(),
            Firstword => split_words(&a[0]).first().copied().unwrap_or("").to_string(),
            Lastword => split_words(&a[0]).last().copied().unwrap_or("").to_string(),
            Dir => map_words(&a[0], |w| dir(w).to_string()),
            Notdir => map_words(&a[0], |w| notdir(w).to_string()),
            Suffix => split_words(&a[0])
                .into_iter()
                .filter_map(|w| suffix_start(w).map(|i| &w[i..]))
                .collect::<Vec<_>>()
                .join(" "),
            Basename => map_words(&a[0], |w| match suffix_start(w) {
                Some(i) => w[..i].to_string(),
                None => w.to_string(),
            }),
            Addsuffix => map_words(&a[1], |w| format!("{}{}", w, a[0])),
            Addprefix => map_words(&a[1], |w| format!("{}{}", a[0], w)),
            Join => {
                let first = split_words(&a[0]);
                let second = split_words(&a[1]);
                (0..first.len().max(second.len()))
                    .map(|i| {
                        format!(
                            "{}{}",
                            first.get(i).copied().unwrap_or(""),
                            second.get(i).copied().unwrap_or("")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Wildcard => split_words(&a[0])
                .into_iter()
                .flat_map(|w| wildcard(&workdir, w))
                .collect::<Vec<_>>()
                .join(" "),
            Abspath => map_words(&a[0], |w| abspath(&workdir, w)),
            Realpath => split_words(&a[0])
                .into_iter()
                .filter_map(|w| std::fs::canonicalize(workdir.join(w)).ok())
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" "),
            other => unreachable!("{} is not a text function", other.name()),
        };
        Ok(out)
    }

    fn call(&mut self, args: &[Expansion]) -> Result<String> {
        let name = self.expand(&args[0])?.trim().to_string();
        let params = self.expand_all(&args[1..])?;

        let body = match self.local(&name) {
            Some(v) => return Ok(v.to_string()),
            None => self.env.lookup(&name),
        };
        let Some(body) = body else {
            return Err(MakeError::UndefinedFunction {
                loc: self.loc.clone(),
                name,
            });
        };

        // Positional parameters beyond those given are bound empty so that
        // an outer call's arguments do not leak into this one.
        let count = params.len().max(9);
        let mut frame = vec![("0".to_string(), name)];
        for i in 0..count {
            let value = params.get(i).cloned().unwrap_or_default();
            frame.push(((i + 1).to_string(), value));
        }
        self.with_frame(frame, |x| x.expand_resolved(&body))
    }

    pub fn shell(&mut self, cmd: &str) -> Result<String> {
        let mut program = self.variable("SHELL")?;
        if program.trim().is_empty() {
            program = "/bin/sh".to_string();
        }
        let env = self.subprocess_environment();
        let output = Command::new(program.trim())
            .arg("-c")
            .arg(cmd)
            .current_dir(self.env.workdir())
            .envs(env)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output();
        match output {
            Ok(output) => Ok(shell_output(&output.stdout)),
            Err(e) => {
                tracing::warn!("{}: could not run shell command '{}': {}", self.loc, cmd, e);
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_and_notdir_keep_word_count() {
        let words = "foo.c path/foo.o dir/dir2/";
        assert_eq!(map_words(words, |w| dir(w).to_string()), "./ path/ dir/dir2/");
        assert_eq!(map_words(words, |w| notdir(w).to_string()), "foo.c foo.o ");
    }

    #[test]
    fn substitution_reference_is_suffix_anchored() {
        assert_eq!(substitution_reference("aabb.cc", ".cc", ".dd"), "aabb.dd");
        assert_eq!(substitution_reference("a.cc.x b.cc", ".cc", ".dd"), "a.cc.x b.dd");
        assert_eq!(substitution_reference("aabb.cc", "aa%.cc", "ff%.f"), "ffbb.f");
    }

    #[test]
    fn shell_output_is_one_line() {
        assert_eq!(shell_output(b"a\nb\n\n"), "a b");
        assert_eq!(shell_output(b""), "");
    }

    #[test]
    fn abspath_folds_dots() {
        let wd = Path::new("/work/dir");
        assert_eq!(abspath(wd, "a/../b/./c"), "/work/dir/b/c");
        assert_eq!(abspath(wd, "/x/y/.."), "/x");
    }
}
