use crate::error::{Location, MakeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    Ifdef,
    Ifndef,
    Ifeq,
    Ifneq,
}

impl CondKind {
    pub fn from_keyword(word: &str) -> Option<CondKind> {
        match word {
            "ifdef" => Some(CondKind::Ifdef),
            "ifndef" => Some(CondKind::Ifndef),
            "ifeq" => Some(CondKind::Ifeq),
            "ifneq" => Some(CondKind::Ifneq),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            CondKind::Ifdef => "ifdef",
            CondKind::Ifndef => "ifndef",
            CondKind::Ifeq => "ifeq",
            CondKind::Ifneq => "ifneq",
        }
    }
}

/// One open `if...` block.
#[derive(Debug, Clone)]
pub struct Frame {
    /// All enclosing blocks are in a taken branch.
    parent_live: bool,
    /// Some branch of this block has been taken already.
    taken: bool,
    live: bool,
    seen_else: bool,
}

/// The stack of open conditionals of one file or `$(eval)` text.
#[derive(Debug, Default)]
pub struct Conditionals {
    frames: Vec<Frame>,
}

impl Conditionals {
    /// Lines are processed only while every open block is in its taken
    /// branch.
    pub fn live(&self) -> bool {
        self.frames.last().map_or(true, |f| f.live)
    }

    /// Opens a block. `condition` is only consulted when the enclosing
    /// blocks are live, so that dead branches are never expanded.
    pub fn open(&mut self, condition: impl FnOnce() -> Result<bool>) -> Result<()> {
        let frame = if self.live() {
            let taken = condition()?;
            Frame {
                parent_live: true,
                taken,
                live: taken,
                seen_else: false,
            }
        } else {
            Frame {
                parent_live: false,
                taken: true,
                live: false,
                seen_else: false,
            }
        };
        self.frames.push(frame);
        Ok(())
    }

    /// Handles `else`, optionally followed by another condition.
    pub fn else_branch(
        &mut self,
        loc: &Location,
        chained: bool,
        condition: impl FnOnce() -> Result<bool>,
    ) -> Result<()> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(MakeError::syntax(loc, "extraneous 'else'"));
        };
        if frame.seen_else {
            return Err(MakeError::syntax(loc, "only one 'else' per conditional"));
        }
        if !chained {
            frame.seen_else = true;
        }
        if !frame.parent_live || frame.taken {
            frame.live = false;
            return Ok(());
        }
        let taken = if chained { condition()? } else { true };
        frame.taken = taken;
        frame.live = taken;
        Ok(())
    }

    pub fn close(&mut self, loc: &Location) -> Result<()> {
        match self.frames.pop() {
            Some(_) => Ok(()),
            None => Err(MakeError::syntax(loc, "extraneous 'endif'")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Splits the operands of `ifeq`/`ifneq`, in either the `(a,b)` or the
/// quoted `'a' "b"` form.
///
/// In the parenthesized form the first operand keeps its leading blanks and
/// loses its trailing ones, the second loses the blanks after the comma and
/// keeps those before the closing paren.
pub fn split_operands<'a>(text: &'a str, loc: &Location) -> Result<(&'a str, &'a str)> {
    let text = text.trim();
    let invalid = || MakeError::syntax(loc, "invalid syntax in conditional");
    if let Some(inner) = text.strip_prefix('(') {
        let mut depth = 0usize;
        let mut comma = None;
        for (i, c) in inner.char_indices() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => break,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    comma = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let comma = comma.ok_or_else(invalid)?;
        let first = inner[..comma].trim_end_matches([' ', '\t']);
        let after = inner[comma + 1..].trim_start_matches([' ', '\t']);

        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in after.char_indices() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    close = Some(i);
                    break;
                }
                ')' => depth -= 1,
                _ => {}
            }
        }
        let close = close.ok_or_else(invalid)?;
        if !after[close + 1..].trim().is_empty() {
            return Err(MakeError::syntax(loc, "extraneous text after conditional"));
        }
        return Ok((first, &after[..close]));
    }

    let (first, rest) = quoted(text).ok_or_else(invalid)?;
    let (second, rest) = quoted(rest.trim_start()).ok_or_else(invalid)?;
    if !rest.trim().is_empty() {
        return Err(MakeError::syntax(loc, "extraneous text after conditional"));
    }
    Ok((first, second))
}

fn quoted(text: &str) -> Option<(&str, &str)> {
    let q = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &text[1..];
    let end = body.find(q)?;
    Some((&body[..end], &body[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::internal("test")
    }

    #[test]
    fn paren_form_whitespace() {
        assert_eq!(split_operands("(a,b)", &loc()).unwrap(), ("a", "b"));
        assert_eq!(split_operands("( a,a)", &loc()).unwrap(), (" a", "a"));
        assert_eq!(split_operands("(a, a)", &loc()).unwrap(), ("a", "a"));
        assert_eq!(split_operands("(a,a )", &loc()).unwrap(), ("a", "a "));
        assert_eq!(split_operands("($(f x,y),z)", &loc()).unwrap(), ("$(f x,y)", "z"));
    }

    #[test]
    fn quoted_form() {
        assert_eq!(split_operands("'a b' \"c\"", &loc()).unwrap(), ("a b", "c"));
        assert!(split_operands("'a' 'b' junk", &loc()).is_err());
    }

    #[test]
    fn dead_blocks_never_evaluate() {
        let mut c = Conditionals::default();
        c.open(|| Ok(false)).unwrap();
        c.open(|| panic!("nested condition evaluated in a dead branch")).unwrap();
        c.else_branch(&loc(), true, || panic!("else-if evaluated in a dead branch"))
            .unwrap();
        assert!(!c.live());
        c.close(&loc()).unwrap();
        c.else_branch(&loc(), false, || Ok(true)).unwrap();
        assert!(c.live());
        c.close(&loc()).unwrap();
        assert!(c.is_empty());
    }
}
