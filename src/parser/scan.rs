/// Splits makefile source into logical lines.
///
/// Makefile-syntax lines fold each backslash-newline, with the whitespace
/// around it, into a single space and then drop comments. Recipe lines keep
/// the backslash-newline for the shell and are never comment-stripped.
pub struct Scanner<'a> {
    lines: Vec<&'a str>,
    next: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Scanner<'a> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let lines = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect::<Vec<_>>();
        // A trailing newline does not start another line.
        let mut lines = lines;
        if lines.last() == Some(&"") {
            lines.pop();
        }
        Self { lines, next: 0 }
    }

    pub fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.next).copied()
    }

    /// Reads one physical line verbatim, as `define` bodies need.
    pub fn next_raw(&mut self) -> Option<(usize, &'a str)> {
        let line = self.peek()?;
        self.next += 1;
        Some((self.next, line))
    }

    /// Reads a makefile-syntax logical line with comments removed.
    pub fn next_make_line(&mut self) -> Option<(usize, String)> {
        let (lineno, first) = self.next_raw()?;
        let mut joined = String::new();
        let mut line = first;
        loop {
            if !is_continuation(line) {
                joined.push_str(line);
                break;
            }
            joined.push_str(line[..line.len() - 1].trim_end());
            match self.next_raw() {
                Some((_, next)) => {
                    joined.push(' ');
                    line = next.trim_start();
                }
                None => break,
            }
        }
        Some((lineno, strip_comment(&joined)))
    }

    /// Reads a recipe line: the leading tab is removed from it and from each
    /// continuation line, and backslash-newlines are kept.
    pub fn next_recipe_line(&mut self) -> Option<(usize, String)> {
        let (lineno, first) = self.next_raw()?;
        let mut line = first.strip_prefix('\t').unwrap_or(first);
        let mut joined = String::new();
        loop {
            joined.push_str(line);
            if !is_continuation(line) {
                break;
            }
            match self.next_raw() {
                Some((_, next)) => {
                    joined.push('\n');
                    line = next.strip_prefix('\t').unwrap_or(next);
                }
                None => break,
            }
        }
        Some((lineno, joined))
    }
}

/// A line continues when it ends in an odd number of backslashes.
pub fn is_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

/// Cuts `line` at the first unescaped `#`.
///
/// A run of `n` backslashes before a `#` becomes `n / 2` backslashes; when
/// `n` is odd the `#` is literal, otherwise it starts the comment.
/// Backslashes before any other character are kept as they are.
pub fn strip_comment(line: &str) -> String {
    if !line.contains('#') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut backslashes = 0usize;
    for c in line.chars() {
        match c {
            '\\' => backslashes += 1,
            '#' => {
                out.extend(std::iter::repeat('\\').take(backslashes / 2));
                if backslashes % 2 == 0 {
                    return out;
                }
                out.push('#');
                backslashes = 0;
            }
            c => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
                out.push(c);
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_escapes() {
        assert_eq!(strip_comment("VAR = val1 # comment"), "VAR = val1 ");
        assert_eq!(strip_comment("VAR2 = literal\\#hash"), "VAR2 = literal#hash");
        assert_eq!(strip_comment("a\\\\#c"), "a\\");
        assert_eq!(strip_comment("path\\to # x"), "path\\to ");
    }

    #[test]
    fn continuation_inside_comment_swallows_next_line() {
        let mut s = Scanner::new("# comment \\\nVAR = hidden\nVAR2 = seen\n");
        assert_eq!(s.next_make_line(), Some((1, String::new())));
        assert_eq!(s.next_make_line(), Some((3, "VAR2 = seen".to_string())));
        assert_eq!(s.next_make_line(), None);
    }

    #[test]
    fn continuations_fold_to_one_space() {
        let mut s = Scanner::new("MULTIVAR = val1   \\\n   val2\n");
        assert_eq!(s.next_make_line(), Some((1, "MULTIVAR = val1 val2".to_string())));
    }

    #[test]
    fn recipe_continuations_are_kept() {
        let mut s = Scanner::new("\techo a \\\n\tb\n");
        assert_eq!(s.next_recipe_line(), Some((1, "echo a \\\nb".to_string())));
    }
}
