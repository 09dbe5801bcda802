// Line-oriented grammar format:
//
//     Name
//     : "literal" Other
//     | "x"
//     ;
//
// Bare words are nonterminals, quoted strings are terminals and '#' starts a
// comment that runs to the end of the line.

use crate::errors::FormatError;
use crate::grammars::{Grammar, GrammarBuilder, RuleRightSide, TokenKey, TypeFlags};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, Write};

/// Characters that cannot appear in a nonterminal name
pub const FORBIDDEN_NONTERMINAL_CHARS: &[char] = &[':', ';', '"', '\\', '|'];

/// Whether `name` can be written as a bare word and read back as the same
/// nonterminal
pub fn is_valid_nonterminal(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('#')
        && !name.contains(|c: char| c.is_ascii_whitespace())
        && !name.contains(FORBIDDEN_NONTERMINAL_CHARS)
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastToken {
    Nothing,
    Nonterminal,
    Terminal,
}

/// Single pass parser state, fed one line at a time
struct GrammarParser {
    builder: GrammarBuilder,
    terminal_buf: String,
    last_token: LastToken,
    is_rule_right_side: bool,
    line: usize,
    /// First line each nonterminal is referenced on a right side
    references: FxHashMap<TokenKey, usize>,
}

impl GrammarParser {
    fn new() -> Self {
        GrammarParser {
            builder: GrammarBuilder::new(),
            terminal_buf: String::new(),
            last_token: LastToken::Nothing,
            is_rule_right_side: false,
            line: 0,
            references: FxHashMap::default(),
        }
    }

    fn flush_terminal_buffer(&mut self) -> Result<(), FormatError> {
        let text = std::mem::take(&mut self.terminal_buf);
        self.builder.push_token(text, TypeFlags::TERMINAL)?;
        Ok(())
    }

    fn feed_line(&mut self, s: &str) -> Result<(), FormatError> {
        self.line += 1;
        let line = self.line;
        let bytes = s.as_bytes();
        let mut r = 0;

        while r < bytes.len() {
            let ch = bytes[r];

            if ch.is_ascii_whitespace() {
                r += 1;
                continue;
            }
            if ch == b'#' {
                break;
            }

            match ch {
                b':' => {
                    if self.is_rule_right_side {
                        return Err(FormatError::RepeatedColon { line });
                    }
                    if self.last_token == LastToken::Nothing {
                        return Err(FormatError::ColonWithoutNonterminal { line });
                    }
                    self.is_rule_right_side = true;
                    self.builder.add_alternative()?;
                    self.last_token = LastToken::Nothing;
                    r += 1;
                }
                b'|' => {
                    if !self.is_rule_right_side {
                        return Err(FormatError::BarBeforeColon { line });
                    }
                    if self.last_token == LastToken::Nothing {
                        return Err(FormatError::EmptyAlternative { line });
                    }
                    if self.last_token == LastToken::Terminal {
                        self.flush_terminal_buffer()?;
                    }
                    self.builder.add_alternative()?;
                    self.last_token = LastToken::Nothing;
                    r += 1;
                }
                b';' => {
                    if !self.is_rule_right_side {
                        return Err(FormatError::SemicolonBeforeColon { line });
                    }
                    if self.last_token == LastToken::Nothing {
                        return Err(FormatError::EmptyRule { line });
                    }
                    if self.last_token == LastToken::Terminal {
                        self.flush_terminal_buffer()?;
                    }
                    self.is_rule_right_side = false;
                    self.last_token = LastToken::Nothing;
                    r += 1;
                }
                b'"' => {
                    let l = r + 1;
                    r = find_terminal_end(bytes, l);
                    if r == bytes.len() {
                        return Err(FormatError::UnclosedQuote { line });
                    }
                    if !self.is_rule_right_side {
                        return Err(FormatError::TerminalOutsideRule { line });
                    }
                    let literal = collapse_escape_sequences(&s[l..r], line)?;
                    self.terminal_buf.push_str(&literal);
                    self.last_token = LastToken::Terminal;
                    r += 1;
                }
                _ => {
                    let l = r;
                    r = find_nonterminal_end(bytes, r + 1);
                    self.nonterminal(&s[l..r], line)?;
                }
            }
        }

        Ok(())
    }

    fn nonterminal(&mut self, name: &str, line: usize) -> Result<(), FormatError> {
        if !is_valid_nonterminal(name) {
            return Err(FormatError::InvalidNonterminal {
                line,
                name: name.to_string(),
            });
        }

        if !self.is_rule_right_side {
            if self.last_token != LastToken::Nothing {
                return Err(FormatError::UnexpectedNonterminal {
                    line,
                    name: name.to_string(),
                });
            }
            self.builder.add_rule(name);
        } else {
            if self.last_token == LastToken::Terminal {
                self.flush_terminal_buffer()?;
            }
            let key = self.builder.push_token(name, TypeFlags::NONTERMINAL)?;
            self.references.entry(key).or_insert(line);
        }

        self.last_token = LastToken::Nonterminal;
        Ok(())
    }

    fn finish(self) -> Result<Grammar, FormatError> {
        if self.is_rule_right_side || self.last_token != LastToken::Nothing {
            return Err(FormatError::UnfinishedRule { line: self.line });
        }

        let grammar = self.builder.build();
        if let Some((key, line)) = grammar
            .dangling_nonterminals()
            .into_iter()
            .filter_map(|key| self.references.get(&key).map(|&line| (key, line)))
            .min_by_key(|&(_, line)| line)
        {
            return Err(FormatError::UndefinedNonterminal {
                line,
                name: grammar.name(key).to_string(),
            });
        }

        Ok(grammar)
    }
}

/// Position of the closing quote, or `bytes.len()` if the line ends first
fn find_terminal_end(bytes: &[u8], mut pos: usize) -> usize {
    let mut is_escaped = false;

    while pos < bytes.len() && (bytes[pos] != b'"' || is_escaped) {
        if bytes[pos] == b'\\' {
            is_escaped = !is_escaped;
        } else {
            is_escaped = false;
        }
        pos += 1;
    }

    pos
}

fn find_nonterminal_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Decode the escapes of a quoted literal. The literal never ends with an
/// unpaired backslash since that would have escaped the closing quote.
fn collapse_escape_sequences(literal: &str, line: usize) -> Result<String, FormatError> {
    let mut res = String::with_capacity(literal.len());
    let mut chars = literal.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            res.push(ch);
            continue;
        }

        let escape = chars.next().unwrap_or('\\');
        res.push(match escape {
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            '?' => '?',
            _ => return Err(FormatError::IllegalEscape { line, escape }),
        });
    }

    Ok(res)
}

/// Read a grammar from a stream of text lines.
///
/// The first nonterminal heading a rule becomes the start symbol. Parsing
/// stops at the first format violation.
pub fn parse_grammar<R: BufRead>(reader: R) -> Result<Grammar, FormatError> {
    let mut parser = GrammarParser::new();
    for line in reader.lines() {
        parser.feed_line(&line?)?;
    }
    parser.finish()
}

/// Read a grammar from an in-memory string
pub fn parse_grammar_str(text: &str) -> Result<Grammar, FormatError> {
    let mut parser = GrammarParser::new();
    for line in text.lines() {
        parser.feed_line(line)?;
    }
    parser.finish()
}

// ============================================================================
// Printer
// ============================================================================

/// Quote a terminal so that the parser reads back the same text
fn escape_terminal(text: &str) -> String {
    let mut res = String::with_capacity(text.len() + 2);
    res.push('"');
    for ch in text.chars() {
        match ch {
            '\x07' => res.push_str("\\a"),
            '\x08' => res.push_str("\\b"),
            '\x0c' => res.push_str("\\f"),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            '\x0b' => res.push_str("\\v"),
            '\\' => res.push_str("\\\\"),
            '"' => res.push_str("\\\""),
            _ => res.push(ch),
        }
    }
    res.push('"');
    res
}

fn write_rule_right_side(f: &mut fmt::Formatter<'_>, g: &Grammar, rrs: &RuleRightSide) -> fmt::Result {
    for (i, &key) in rrs.sequence.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        if rrs.is_nonterminal_at(i) {
            f.write_str(g.name(key))?;
        } else {
            f.write_str(&escape_terminal(g.name(key)))?;
        }
    }
    Ok(())
}

/// Multirule keys in print order: breadth-first from the start symbol, then
/// from every not yet printed multirule in table order.
pub fn print_order(g: &Grammar) -> Vec<TokenKey> {
    let mut order = Vec::with_capacity(g.rules.len());
    let mut shown: FxHashSet<TokenKey> = FxHashSet::default();
    let mut bfs_queue: VecDeque<TokenKey> = VecDeque::new();

    let roots = g.start.into_iter().chain(g.rules.keys().copied());
    for root in roots {
        if !g.rules.contains_key(&root) || !shown.insert(root) {
            continue;
        }
        bfs_queue.push_back(root);

        while let Some(cur) = bfs_queue.pop_front() {
            order.push(cur);
            for nt in g.rules[&cur].iter().flat_map(|rrs| rrs.nonterminals()) {
                if g.rules.contains_key(&nt) && shown.insert(nt) {
                    bfs_queue.push_back(nt);
                }
            }
        }
    }

    order
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in print_order(self) {
            let alternatives = &self.rules[&key];
            // A multirule without alternatives cannot be written back in this format
            if alternatives.is_empty() {
                continue;
            }

            writeln!(f, "{}", self.name(key))?;
            for (i, rrs) in alternatives.iter().enumerate() {
                f.write_str(if i == 0 { ": " } else { "| " })?;
                write_rule_right_side(f, self, rrs)?;
                f.write_str("\n")?;
            }
            f.write_str(";\n")?;
        }
        Ok(())
    }
}

/// Serialize a grammar in the textual format
pub fn write_grammar<W: Write>(g: &Grammar, mut writer: W) -> io::Result<()> {
    write!(writer, "{}", g)?;
    writer.flush()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
