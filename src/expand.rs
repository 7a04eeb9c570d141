//! Expansion of `$(...)` references.
//!
//! Text is first parsed into an [`Expansion`], a sequence of literal runs and
//! references, then resolved by an [`Expander`] against an [`Environment`].
//! Whether a reference is a substitution reference or a function call is
//! decided on the literal source text, so a name that only becomes
//! `VAR:.c` after expansion is looked up as a variable with that name.

use std::path::Path;

use crate::error::{Location, MakeError, Result};
use crate::variables::{join_append, Flavor, Resolved};

use self::functions::Function;

pub mod functions;

/// Nesting limit for expansions; reaching it means the text can never
/// finish expanding.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expansion {
    elements: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Literal(String),
    /// `$(NAME)` or `$X`, the name itself being an expansion.
    Variable(Expansion),
    /// `$(NAME:FROM=TO)`.
    Substitution {
        name: Expansion,
        from: Expansion,
        to: Expansion,
    },
    Function {
        function: Function,
        args: Vec<Expansion>,
    },
}

impl Expansion {
    pub fn literal(s: &str) -> Expansion {
        let mut e = Expansion::default();
        e.push_literal(s);
        e
    }

    pub fn parse(text: &str, loc: &Location) -> Result<Expansion> {
        let mut reader = Reader { text, pos: 0, loc };
        let (e, _) = reader.parse_elements(&[], None)?;
        Ok(e)
    }

    fn push_literal(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if let Some(Element::Literal(last)) = self.elements.last_mut() {
            last.push_str(s);
        } else {
            self.elements.push(Element::Literal(s.to_string()));
        }
    }

    fn push(&mut self, element: Element) {
        match element {
            Element::Literal(s) => self.push_literal(&s),
            e => self.elements.push(e),
        }
    }

    fn concat(&mut self, other: Expansion) {
        for e in other.elements {
            self.push(e);
        }
    }
}

struct Reader<'a> {
    text: &'a str,
    pos: usize,
    loc: &'a Location,
}

impl Reader<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Parses until one of `stops` at nesting depth zero, or the closing
    /// delimiter of the enclosing reference. Returns the terminator found,
    /// `None` at the end of the text.
    fn parse_elements(
        &mut self,
        stops: &[char],
        delims: Option<(char, char)>,
    ) -> Result<(Expansion, Option<char>)> {
        let mut out = Expansion::default();
        let mut lit = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            if c == '$' {
                self.bump();
                out.push_literal(&lit);
                lit.clear();
                if let Some(e) = self.parse_dollar()? {
                    out.push(e);
                }
                continue;
            }
            if let Some((open, close)) = delims {
                if c == open {
                    depth += 1;
                } else if c == close {
                    if depth == 0 {
                        self.bump();
                        out.push_literal(&lit);
                        return Ok((out, Some(close)));
                    }
                    depth -= 1;
                }
            }
            if depth == 0 && stops.contains(&c) {
                self.bump();
                out.push_literal(&lit);
                return Ok((out, Some(c)));
            }
            lit.push(c);
            self.bump();
        }
        out.push_literal(&lit);
        Ok((out, None))
    }

    fn parse_dollar(&mut self) -> Result<Option<Element>> {
        let Some(c) = self.bump() else {
            return Ok(None);
        };
        match c {
            '$' => Ok(Some(Element::Literal("$".to_string()))),
            '(' => self.parse_reference(('(', ')')).map(Some),
            '{' => self.parse_reference(('{', '}')).map(Some),
            c => Ok(Some(Element::Variable(Expansion::literal(
                c.encode_utf8(&mut [0; 4]),
            )))),
        }
    }

    fn unterminated(&self) -> MakeError {
        MakeError::syntax(self.loc, "unterminated variable reference")
    }

    fn parse_reference(&mut self, delims: (char, char)) -> Result<Element> {
        if let Some(function) = self.try_function_name() {
            return self.parse_function(function, delims);
        }

        let (name, term) = self.parse_elements(&[':'], Some(delims))?;
        match term {
            Some(c) if c == delims.1 => Ok(Element::Variable(name)),
            Some(_) => {
                let (from, term) = self.parse_elements(&['='], Some(delims))?;
                match term {
                    Some('=') => {
                        let (to, term) = self.parse_elements(&[], Some(delims))?;
                        if term.is_none() {
                            return Err(self.unterminated());
                        }
                        Ok(Element::Substitution { name, from, to })
                    }
                    Some(_) => {
                        // No `=`: the colon is part of the variable name.
                        let mut full = name;
                        full.push_literal(":");
                        full.concat(from);
                        Ok(Element::Variable(full))
                    }
                    None => Err(self.unterminated()),
                }
            }
            None => Err(self.unterminated()),
        }
    }

    /// Consumes a built-in function name and the blanks after it, if the
    /// reference starts with one.
    fn try_function_name(&mut self) -> Option<Function> {
        let rest = &self.text[self.pos..];
        let end = rest
            .find(|c: char| !(c.is_ascii_lowercase() || c == '-'))
            .unwrap_or(rest.len());
        let after = rest[end..].chars().next();
        if !matches!(after, Some(' ') | Some('\t')) {
            return None;
        }
        let function = Function::from_name(&rest[..end])?;
        self.pos += end;
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
        Some(function)
    }

    fn parse_function(&mut self, function: Function, delims: (char, char)) -> Result<Element> {
        let (min, max) = function.arity();
        let mut args = Vec::new();
        loop {
            let stops: &[char] = if max.is_some_and(|m| args.len() + 1 >= m) {
                &[]
            } else {
                &[',']
            };
            let (arg, term) = self.parse_elements(stops, Some(delims))?;
            args.push(arg);
            match term {
                Some(',') => continue,
                Some(_) => break,
                None => return Err(self.unterminated()),
            }
        }
        if args.len() < min {
            return Err(MakeError::syntax(
                self.loc,
                format!(
                    "insufficient number of arguments ({}) to function '{}'",
                    args.len(),
                    function.name()
                ),
            ));
        }
        Ok(Element::Function { function, args })
    }
}

/// What an expansion can see and do: variables, the working directory,
/// and re-entry into makefile processing for `$(eval)`.
pub trait Environment {
    fn lookup(&self, name: &str) -> Option<Resolved>;

    fn workdir(&self) -> &Path;

    /// Variables passed to subprocesses, as values ready to pass and names
    /// still to be expanded.
    fn exports(&self) -> (Vec<(String, String)>, Vec<String>);

    fn eval(&mut self, text: &str, loc: &Location) -> Result<()>;
}

/// Resolves expansions against an environment, tracking the variables being
/// expanded and the temporary bindings of `$(foreach)` and `$(call)`.
pub struct Expander<'e, E: Environment + ?Sized> {
    env: &'e mut E,
    loc: Location,
    frames: Vec<Vec<(String, String)>>,
    expanding: Vec<String>,
    depth: usize,
    /// Expanding values for a subprocess environment: no output, no
    /// `$(shell)` and no `$(eval)`.
    exporting: bool,
}

impl<'e, E: Environment + ?Sized> Expander<'e, E> {
    pub fn new(env: &'e mut E, loc: &Location) -> Self {
        Self {
            env,
            loc: loc.clone(),
            frames: Vec::new(),
            expanding: Vec::new(),
            depth: 0,
            exporting: false,
        }
    }

    pub fn parse(&self, text: &str) -> Result<Expansion> {
        Expansion::parse(text, &self.loc)
    }

    /// Parses and expands `text`.
    pub fn expand_text(&mut self, text: &str) -> Result<String> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }
        let e = self.parse(text)?;
        self.expand(&e)
    }

    pub fn expand(&mut self, e: &Expansion) -> Result<String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(MakeError::Recursion {
                loc: self.loc.clone(),
                name: self.expanding.last().cloned().unwrap_or_default(),
            });
        }
        let r = self.expand_elements(e);
        self.depth -= 1;
        r
    }

    fn expand_elements(&mut self, e: &Expansion) -> Result<String> {
        let mut out = String::new();
        for element in &e.elements {
            match element {
                Element::Literal(s) => out.push_str(s),
                Element::Variable(name) => {
                    let name = self.expand(name)?;
                    out.push_str(&self.variable(&name)?);
                }
                Element::Substitution { name, from, to } => {
                    let name = self.expand(name)?;
                    let from = self.expand(from)?;
                    let to = self.expand(to)?;
                    let value = self.variable(&name)?;
                    out.push_str(&functions::substitution_reference(&value, &from, &to));
                }
                Element::Function { function, args } => {
                    let s = self.call_function(*function, args)?;
                    out.push_str(&s);
                }
            }
        }
        Ok(out)
    }

    fn local(&self, name: &str) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The expanded value of the named variable; undefined variables are
    /// empty.
    pub fn variable(&mut self, name: &str) -> Result<String> {
        if let Some(v) = self.local(name) {
            return Ok(v.to_string());
        }
        let Some(resolved) = self.env.lookup(name) else {
            tracing::debug!("{}: variable '{}' is undefined", self.loc, name);
            return Ok(String::new());
        };
        if self.expanding.iter().any(|n| n == name) {
            tracing::warn!(
                "{}: variable '{}' references itself; using its unexpanded text",
                self.loc,
                name
            );
            return Ok(resolved.raw());
        }
        self.expanding.push(name.to_string());
        let r = self.expand_resolved(&resolved);
        self.expanding.pop();
        r
    }

    fn expand_resolved(&mut self, resolved: &Resolved) -> Result<String> {
        let mut out = match &resolved.base {
            Some(v) if v.flavor == Flavor::Simple => v.value.clone(),
            Some(v) => self.expand_text(&v.value)?,
            None => String::new(),
        };
        for a in &resolved.appends {
            let a = self.expand_text(a)?;
            join_append(&mut out, &a);
        }
        Ok(out)
    }

    /// The environment for a subprocess started from this scope. A value
    /// that cannot be expanded without side effects is left out.
    pub fn subprocess_environment(&mut self) -> Vec<(String, String)> {
        let (mut values, deferred) = self.env.exports();
        let outer = std::mem::replace(&mut self.exporting, true);
        for name in deferred {
            if self.expanding.contains(&name) {
                continue;
            }
            match self.variable(&name) {
                Ok(value) => values.push((name, value)),
                Err(e) => tracing::debug!("not exporting '{}': {}", name, e),
            }
        }
        self.exporting = outer;
        values
    }

    /// Runs `f` with `bindings` visible as variables.
    fn with_frame<T>(
        &mut self,
        bindings: Vec<(String, String)>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.frames.push(bindings);
        let r = f(self);
        self.frames.pop();
        r
    }
}
