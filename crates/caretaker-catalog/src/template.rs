//! Command templates.
//!
//! A template such as `kill -TERM {pid}` is split into argv words *before*
//! any value is substituted, so a substituted value always lands inside the
//! word that referenced it. Quoting follows a small subset of POSIX rules:
//! single quotes are literal except for placeholders, double quotes also
//! accept `\"` and `\\`, and a backslash outside quotes escapes the next
//! character. Nothing is ever handed to a shell.

use std::collections::{BTreeSet, HashMap};

use crate::{CatalogError, Result};

/// A piece of an argv word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// A `{name}` placeholder.
    Placeholder(String),
}

/// One argv entry made of literal and placeholder segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Word {
    segments: Vec<Segment>,
}

impl Word {
    /// Segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the word contains no placeholder.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render the word, looking up each placeholder with `resolve`.
    pub fn render<'a, F>(&self, mut resolve: F) -> std::result::Result<String, String>
    where
        F: FnMut(&str) -> Option<&'a str>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = resolve(name).ok_or_else(|| name.clone())?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    fn push_char(&mut self, c: char) {
        match self.segments.last_mut() {
            Some(Segment::Literal(text)) => text.push(c),
            _ => self.segments.push(Segment::Literal(c.to_string())),
        }
    }

    fn push_placeholder(&mut self, name: String) {
        self.segments.push(Segment::Placeholder(name));
    }
}

/// A tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    words: Vec<Word>,
}

impl CommandTemplate {
    /// Tokenize a command string.
    pub fn parse(command: &str) -> Result<Self> {
        let words = tokenize(command)?;
        if words.is_empty() {
            return Err(CatalogError::Template("command is empty".to_string()));
        }
        Ok(Self { words })
    }

    /// All argv words, program first.
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// The program word.
    pub fn program(&self) -> &Word {
        &self.words[0]
    }

    /// Names of every placeholder referenced by the template.
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.words
            .iter()
            .flat_map(|w| w.segments.iter())
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitute argument values and return `(program, args)`.
    ///
    /// The error carries the name of the first unresolved placeholder.
    pub fn render(
        &self,
        values: &HashMap<String, String>,
    ) -> std::result::Result<(String, Vec<String>), String> {
        let mut rendered = self
            .words
            .iter()
            .map(|w| w.render(|name| values.get(name).map(String::as_str)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let program = rendered.remove(0);
        Ok((program, rendered))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

fn tokenize(input: &str) -> Result<Vec<Word>> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = Word::default();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else if c == '{' {
                    i = read_brace(&chars, i, &mut current);
                    continue;
                } else {
                    current.push_char(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' if matches!(chars.get(i + 1), Some('"') | Some('\\')) => {
                    current.push_char(chars[i + 1]);
                    i += 1;
                }
                '{' => {
                    i = read_brace(&chars, i, &mut current);
                    continue;
                }
                _ => current.push_char(c),
            },
            Quote::None => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.get(i + 1).ok_or_else(|| {
                        CatalogError::Template("trailing backslash".to_string())
                    })?;
                    current.push_char(*next);
                    in_word = true;
                    i += 1;
                }
                '{' => {
                    in_word = true;
                    i = read_brace(&chars, i, &mut current);
                    continue;
                }
                _ => {
                    current.push_char(c);
                    in_word = true;
                }
            },
        }
        i += 1;
    }

    if quote != Quote::None {
        return Err(CatalogError::Template(format!(
            "unterminated quote in '{input}'"
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Consume a `{name}` placeholder starting at `start`, or a literal `{`
/// when what follows is not an identifier. Returns the next index.
fn read_brace(chars: &[char], start: usize, word: &mut Word) -> usize {
    let mut end = start + 1;
    if chars.get(end).copied().is_some_and(is_ident_start) {
        while chars.get(end).copied().is_some_and(is_ident_char) {
            end += 1;
        }
        if chars.get(end) == Some(&'}') {
            let name: String = chars[start + 1..end].iter().collect();
            word.push_placeholder(name);
            return end + 1;
        }
    }
    word.push_char('{');
    start + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_splits_on_whitespace() {
        let t = CommandTemplate::parse("ps  -Ao pid,comm").unwrap();
        let (program, args) = t.render(&HashMap::new()).unwrap();
        assert_eq!(program, "ps");
        assert_eq!(args, vec!["-Ao", "pid,comm"]);
    }

    #[test]
    fn test_placeholder_value_stays_in_one_word() {
        let t = CommandTemplate::parse("kill -TERM {pid}").unwrap();
        let (_, args) = t.render(&values(&[("pid", "12; rm -rf /")])).unwrap();
        assert_eq!(args, vec!["-TERM", "12; rm -rf /"]);
    }

    #[test]
    fn test_quoted_word_with_placeholder() {
        let t = CommandTemplate::parse(
            r#"osascript -e 'tell application id "com.apple.Safari" to open location "{url}"'"#,
        )
        .unwrap();
        assert_eq!(t.words().len(), 3);
        let (_, args) = t
            .render(&values(&[("url", "https://example.com")]))
            .unwrap();
        assert_eq!(
            args[1],
            r#"tell application id "com.apple.Safari" to open location "https://example.com""#
        );
    }

    #[test]
    fn test_placeholders_collected() {
        let t = CommandTemplate::parse("cp {src} {dest}/backup-{src}").unwrap();
        let names: Vec<_> = t.placeholders().into_iter().collect();
        assert_eq!(names, vec!["dest", "src"]);
    }

    #[test]
    fn test_non_identifier_brace_is_literal() {
        let t = CommandTemplate::parse("find . -exec echo {} ;").unwrap();
        assert!(t.placeholders().is_empty());
        let (_, args) = t.render(&HashMap::new()).unwrap();
        assert_eq!(args, vec![".", "-exec", "echo", "{}", ";"]);
    }

    #[test]
    fn test_missing_value_reports_name() {
        let t = CommandTemplate::parse("kill {pid}").unwrap();
        assert_eq!(t.render(&HashMap::new()).unwrap_err(), "pid");
    }

    #[test]
    fn test_escapes() {
        let t = CommandTemplate::parse(r#"echo a\ b "c \"d\"""#).unwrap();
        let (_, args) = t.render(&HashMap::new()).unwrap();
        assert_eq!(args, vec!["a b", r#"c "d""#]);
    }

    #[test]
    fn test_empty_quotes_make_an_empty_word() {
        let t = CommandTemplate::parse("printf ''").unwrap();
        let (_, args) = t.render(&HashMap::new()).unwrap();
        assert_eq!(args, vec![""]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            CommandTemplate::parse("echo 'oops"),
            Err(CatalogError::Template(_))
        ));
    }

    #[test]
    fn test_empty_command() {
        assert!(CommandTemplate::parse("   ").is_err());
    }

    #[test]
    fn test_program_literal() {
        let t = CommandTemplate::parse("{tool} --version").unwrap();
        assert!(!t.program().is_literal());
        let t = CommandTemplate::parse("/usr/sbin/purge").unwrap();
        assert!(t.program().is_literal());
    }
}
