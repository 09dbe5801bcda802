// CYK recognizer over grammars in Chomsky Normal Form.
//
// Terminals may be longer than one character: a terminal production marks
// the span its text covers, so a span of length n can come from a terminal
// as well as from a binary split.

use crate::cnf::check_chomsky_form;
use crate::errors::ChomskyFormError;
use crate::grammars::Grammar;
use rustc_hash::FxHashMap;

/// Dense recognition table: `cells[len - 1][pos][nt]` says whether `nt`
/// derives the `len` bytes starting at `pos`.
struct CykTable {
    cells: Vec<bool>,
    text_len: usize,
    nt_count: usize,
}

impl CykTable {
    fn new(text_len: usize, nt_count: usize) -> Self {
        CykTable {
            cells: vec![false; text_len * text_len * nt_count],
            text_len,
            nt_count,
        }
    }

    fn index(&self, len: usize, pos: usize, nt: usize) -> usize {
        ((len - 1) * self.text_len + pos) * self.nt_count + nt
    }

    fn get(&self, len: usize, pos: usize, nt: usize) -> bool {
        self.cells[self.index(len, pos, nt)]
    }

    fn set(&mut self, len: usize, pos: usize, nt: usize) {
        let i = self.index(len, pos, nt);
        self.cells[i] = true;
    }
}

/// A CNF grammar flattened into the two production shapes CYK works with.
/// Nonterminals are renumbered densely.
#[derive(Debug, Clone)]
pub struct CykRecognizer {
    /// `A -> "text"`, text never empty
    pub terminal_productions: Vec<(usize, Vec<u8>)>,
    /// `A -> B C`
    pub nonterminal_productions: Vec<(usize, (usize, usize))>,
    /// None for the empty grammar
    pub start: Option<usize>,
    /// The start symbol has the empty alternative
    pub start_accepts_empty: bool,
    pub nt_count: usize,
}

impl CykRecognizer {
    /// Prepare a recognizer. Fails unless `grammar` is in Chomsky Normal Form.
    pub fn new(grammar: &Grammar) -> Result<Self, ChomskyFormError> {
        check_chomsky_form(grammar)?;

        let index: FxHashMap<usize, usize> = grammar
            .rules
            .keys()
            .enumerate()
            .map(|(i, &nt)| (nt, i))
            .collect();

        let mut terminal_productions = Vec::new();
        let mut nonterminal_productions = Vec::new();
        let mut start_accepts_empty = false;

        // Classify by shape. The form check guarantees every key below is indexed.
        for (&lhs, alternatives) in &grammar.rules {
            let a = index[&lhs];
            for rrs in alternatives {
                if rrs.is_binary() {
                    nonterminal_productions
                        .push((a, (index[&rrs.sequence[0]], index[&rrs.sequence[1]])));
                    continue;
                }
                let text = grammar.name(rrs.sequence[0]);
                if text.is_empty() {
                    start_accepts_empty = true;
                } else {
                    terminal_productions.push((a, text.as_bytes().to_vec()));
                }
            }
        }

        Ok(CykRecognizer {
            terminal_productions,
            nonterminal_productions,
            start: grammar.start.and_then(|s| index.get(&s).copied()),
            start_accepts_empty,
            nt_count: index.len(),
        })
    }

    /// Whether `text` belongs to the language of the grammar
    pub fn recognize(&self, text: &[u8]) -> bool {
        let start = match self.start {
            Some(start) => start,
            None => return false,
        };
        let n = text.len();
        if n == 0 {
            return self.start_accepts_empty;
        }

        let mut table = CykTable::new(n, self.nt_count);
        self.parse_terminals(text, &mut table);
        for len in 2..=n {
            self.parse_span(len, &mut table);
        }

        table.get(n, 0, start)
    }

    /// Mark every occurrence of every terminal at the length of its text
    fn parse_terminals(&self, text: &[u8], table: &mut CykTable) {
        for pos in 0..text.len() {
            for (a, terminal) in &self.terminal_productions {
                if text[pos..].starts_with(terminal) {
                    table.set(terminal.len(), pos, *a);
                }
            }
        }
    }

    /// Combine shorter spans into spans of length `len`
    fn parse_span(&self, len: usize, table: &mut CykTable) {
        for pos in 0..=table.text_len - len {
            for split in 1..len {
                for &(a, (b, c)) in &self.nonterminal_productions {
                    if table.get(split, pos, b) && table.get(len - split, pos + split, c) {
                        table.set(len, pos, a);
                    }
                }
            }
        }
    }
}

/// Check whether `text` is derivable in `grammar`, which must already be in
/// Chomsky Normal Form
pub fn is_recognized<T: AsRef<[u8]>>(text: T, grammar: &Grammar) -> Result<bool, ChomskyFormError> {
    Ok(CykRecognizer::new(grammar)?.recognize(text.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::{convert_to_chomsky_form, PHASE_COUNT};
    use crate::format::parse_grammar_str;

    fn cnf_of(text: &str) -> Grammar {
        let mut g = parse_grammar_str(text).expect("Failed to parse grammar");
        convert_to_chomsky_form(&mut g, PHASE_COUNT).unwrap();
        g
    }

    #[test]
    fn test_cyk_simple_grammar() {
        let g = parse_grammar_str("S : A B ;\nA : \"a\" ;\nB : \"b\" ;\n").unwrap();

        assert_eq!(is_recognized("ab", &g), Ok(true));
        assert_eq!(is_recognized("aa", &g), Ok(false));
        assert_eq!(is_recognized("a", &g), Ok(false));
        assert_eq!(is_recognized("", &g), Ok(false));
    }

    #[test]
    fn test_cyk_longer_input() {
        let g = parse_grammar_str("S : A B | S S ;\nA : \"a\" ;\nB : \"b\" ;\n").unwrap();
        let recognizer = CykRecognizer::new(&g).unwrap();

        assert!(recognizer.recognize(b"abab"));
        assert!(recognizer.recognize(b"ababab"));
        assert!(!recognizer.recognize(b"abba"));
    }

    #[test]
    fn test_cyk_balanced_with_empty_word() {
        let g = cnf_of("S : \"a\" S \"b\" | \"\" ;");

        for accepted in ["", "ab", "aabb", "aaabbb"] {
            assert_eq!(is_recognized(accepted, &g), Ok(true), "{accepted:?}");
        }
        for rejected in ["a", "b", "ba", "abab", "aab"] {
            assert_eq!(is_recognized(rejected, &g), Ok(false), "{rejected:?}");
        }
    }

    #[test]
    fn test_cyk_multi_character_terminals() {
        let g = parse_grammar_str("S : K V ;\nK : \"key\" ;\nV : \"=\" | \"==\" ;\n").unwrap();

        assert_eq!(is_recognized("key=", &g), Ok(true));
        assert_eq!(is_recognized("key==", &g), Ok(true));
        assert_eq!(is_recognized("ke=", &g), Ok(false));
        assert_eq!(is_recognized("key", &g), Ok(false));
    }

    #[test]
    fn test_cyk_terminal_spanning_whole_text() {
        let g = parse_grammar_str("S : \"hello\" ;").unwrap();
        assert_eq!(is_recognized("hello", &g), Ok(true));
        assert_eq!(is_recognized("hell", &g), Ok(false));
    }

    #[test]
    fn test_cyk_empty_grammar() {
        let g = Grammar::new();
        assert_eq!(is_recognized("", &g), Ok(false));
        assert_eq!(is_recognized("a", &g), Ok(false));
    }

    #[test]
    fn test_cyk_rejects_non_cnf_grammar() {
        let g = parse_grammar_str("S : \"a\" S | \"\" ;").unwrap();
        assert!(matches!(
            is_recognized("a", &g),
            Err(ChomskyFormError::NonChomskyAlternative { .. })
        ));
    }
}
