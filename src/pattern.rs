/// A word possibly containing one `%` wildcard.
///
/// `\%` quotes a literal percent and `\\` before a `%` quotes a backslash;
/// other backslashes are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    prefix: String,
    suffix: Option<String>,
}

impl Pattern {
    pub fn new(s: &str) -> Pattern {
        let mut prefix = String::new();
        let mut chars = s.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some((_, '%')) => {
                        prefix.push('%');
                        chars.next();
                    }
                    Some((_, '\\')) => {
                        prefix.push('\\');
                        chars.next();
                    }
                    _ => prefix.push('\\'),
                },
                '%' => {
                    return Self {
                        prefix,
                        suffix: Some(s[i + 1..].to_string()),
                    }
                }
                c => prefix.push(c),
            }
        }
        Self {
            prefix,
            suffix: None,
        }
    }

    pub fn is_pattern(&self) -> bool {
        self.suffix.is_some()
    }

    /// A bare `%`, which matches anything.
    pub fn is_match_anything(&self) -> bool {
        self.prefix.is_empty() && self.suffix.as_deref() == Some("")
    }

    pub fn has_slash(&self) -> bool {
        self.prefix.contains('/') || self.suffix.as_deref().is_some_and(|s| s.contains('/'))
    }

    /// Returns the stem if `word` matches. A pattern without `%` matches
    /// only its own text, with an empty stem.
    pub fn matches<'w>(&self, word: &'w str) -> Option<&'w str> {
        match &self.suffix {
            Some(suffix) => {
                if word.len() < self.prefix.len() + suffix.len() {
                    return None;
                }
                let rest = word.strip_prefix(self.prefix.as_str())?;
                rest.strip_suffix(suffix.as_str())
            }
            None => (word == self.prefix).then_some(""),
        }
    }

    /// Substitutes `stem` for the `%`, prefixed by `dir`.
    pub fn resolve(&self, dir: &str, stem: &str) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}{}{}{}", dir, self.prefix, stem, suffix),
            None => self.prefix.clone(),
        }
    }

    /// `patsubst` on a single word: words that do not match pass through.
    pub fn subst(&self, replacement: &str, word: &str) -> String {
        match self.matches(word) {
            None => word.to_string(),
            Some(_) if !self.is_pattern() => replacement.to_string(),
            Some(stem) => Pattern::new(replacement).resolve("", stem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patsubst_words() {
        let cases = [
            ("%.c", "%.o", "test.c", "test.o"),
            ("%.c", "%.o", "test", "test"),
            ("%", "%.o", "test.c", "test.c.o"),
            ("foo", "bar", "foo", "bar"),
            ("foo", "%bar", "foo", "%bar"),
            ("%", "perc_%", "path", "perc_path"),
            ("\\%", "sub%", "%", "sub%"),
            ("%.c", "\\%%.o", "foo.c", "%foo.o"),
        ];
        for (pat, repl, word, expected) in cases {
            assert_eq!(Pattern::new(pat).subst(repl, word), expected, "{pat} {repl} {word}");
        }
    }

    #[test]
    fn stem_must_not_overlap() {
        let p = Pattern::new("ab%ba");
        assert_eq!(p.matches("aba"), None);
        assert_eq!(p.matches("abba"), Some(""));
        assert_eq!(p.matches("abxba"), Some("x"));
    }
}
