//! Tests for the CNF conversion - the individual phases, the form check and
//! language preservation checked against hand-written recognizers

use super::*;
use crate::cyk::CykRecognizer;
use crate::format::parse_grammar_str;
use crate::grammars::GrammarBuilder;

fn parse(text: &str) -> Grammar {
    parse_grammar_str(text).expect("test grammar must parse")
}

fn converted(text: &str, end_phase: usize) -> Grammar {
    let mut g = parse(text);
    convert_to_chomsky_form(&mut g, end_phase).unwrap();
    g
}

/// Alternatives of `nt` as lists of symbol texts
fn alternatives_of(g: &Grammar, nt: &str) -> Vec<Vec<String>> {
    let key = g.token_table.key_of(nt).expect("nonterminal not found");
    g.rules[&key]
        .iter()
        .map(|rrs| rrs.sequence.iter().map(|&k| g.name(k).to_string()).collect())
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Every string over `alphabet` of length up to `max_len`
fn all_strings(alphabet: &[u8], max_len: usize) -> Vec<Vec<u8>> {
    let mut res = vec![Vec::new()];
    let mut frontier = vec![Vec::new()];
    for _ in 0..max_len {
        let mut next = Vec::new();
        for s in &frontier {
            for &ch in alphabet {
                let mut longer: Vec<u8> = s.clone();
                longer.push(ch);
                next.push(longer);
            }
        }
        res.extend(next.iter().cloned());
        frontier = next;
    }
    res
}

fn assert_language(text: &str, alphabet: &[u8], max_len: usize, oracle: impl Fn(&[u8]) -> bool) {
    let g = converted(text, PHASE_COUNT);
    assert!(is_in_chomsky_form(&g), "not in CNF:\n{g}");

    let recognizer = CykRecognizer::new(&g).unwrap();
    for s in all_strings(alphabet, max_len) {
        assert_eq!(
            recognizer.recognize(&s),
            oracle(&s),
            "grammar:\n{text}\ntext: {:?}",
            String::from_utf8_lossy(&s)
        );
    }
}

// ============================================================================
// Whole conversion
// ============================================================================

#[test]
fn test_empty_grammar_is_left_alone() {
    let mut g = Grammar::new();
    convert_to_chomsky_form(&mut g, PHASE_COUNT).unwrap();
    assert!(g.is_empty());
    assert!(is_in_chomsky_form(&g));
}

#[test]
fn test_zero_phases_change_nothing() {
    let text = "S : \"a\" S \"b\" | \"\" ;\nU : \"u\" ;\n";
    let g = parse(text);
    assert_eq!(converted(text, 0), g);
}

#[test]
fn test_conversion_is_deterministic() {
    let text = "E : E \"+\" T | T ;\nT : T \"*\" F | F ;\nF : \"(\" E \")\" | \"x\" ;\n";
    let first = converted(text, PHASE_COUNT);
    let second = converted(text, PHASE_COUNT);
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_synthetic_names_skip_taken_ones() {
    let g = converted("S : \"a\" __cnf0 ;\n__cnf0 : \"b\" ;\n", PHASE_COUNT);

    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["b"])]);
    assert_eq!(alternatives_of(&g, "__cnf1"), vec![strings(&["a"])]);
    assert_eq!(g.start_name(), Some("__cnf2"));
    assert_eq!(alternatives_of(&g, "__cnf2"), vec![strings(&["__cnf1", "__cnf0"])]);
    // The old start is only reachable through the collapsed chain
    assert_eq!(g.token_table.key_of("S"), None);
}

#[test]
fn test_custom_prefix() {
    let mut g = parse("S : \"x\" S | \"y\" ;");
    let mut ctx = ConversionContext::with_prefix("N");
    ctx.convert(&mut g, PHASE_COUNT).unwrap();

    assert!(ctx.generated() >= 2);
    assert!(g.start_name().unwrap().starts_with('N'));
    assert!(g.rules.keys().all(|&nt| g.name(nt) == "S" || g.name(nt).starts_with('N')));
}

// ============================================================================
// Phase 1
// ============================================================================

#[test]
fn test_ungenerative_nonterminals_are_removed() {
    let g = converted("S : A | \"s\" ;\nA : A \"a\" ;\n", 1);

    assert_eq!(alternatives_of(&g, "S"), vec![strings(&["s"])]);
    assert_eq!(g.token_table.key_of("A"), None);
    assert_eq!(g.token_table.key_of("a"), None);
    assert!(g.token_table.is_consistent());
}

#[test]
fn test_unreachable_nonterminals_are_removed() {
    let g = converted("S : \"s\" A ;\nA : \"a\" ;\nU : \"u\" A ;\n", 1);

    assert_eq!(g.nonterminal_count(), 2);
    assert_eq!(g.token_table.key_of("U"), None);
    assert_eq!(g.token_table.key_of("u"), None);
}

#[test]
fn test_ungenerative_start_empties_the_grammar() {
    let g = converted("S : S \"x\" | A ;\nA : S ;\n", PHASE_COUNT);

    assert!(g.is_empty());
    assert_eq!(g.start, None);
    assert!(g.token_table.is_empty());
    assert!(is_in_chomsky_form(&g));
}

// ============================================================================
// Phase 2
// ============================================================================

#[test]
fn test_mixed_alternative_is_split() {
    let g = converted("S : \"a\" S \"b\" | \"ab\" ;", 2);

    assert_eq!(
        alternatives_of(&g, "S"),
        vec![strings(&["__cnf0", "__cnf2"]), strings(&["ab"])]
    );
    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["a"])]);
    assert_eq!(alternatives_of(&g, "__cnf1"), vec![strings(&["b"])]);
    assert_eq!(alternatives_of(&g, "__cnf2"), vec![strings(&["S", "__cnf1"])]);
}

#[test]
fn test_terminal_holders_are_shared() {
    let g = converted("S : \"x\" A \"x\" | A \"x\" ;\nA : \"a\" ;\n", 2);

    assert_eq!(
        alternatives_of(&g, "S"),
        vec![strings(&["__cnf0", "__cnf1"]), strings(&["A", "__cnf0"])]
    );
    assert_eq!(alternatives_of(&g, "__cnf1"), vec![strings(&["A", "__cnf0"])]);
    assert_eq!(g.nonterminal_count(), 4);
}

#[test]
fn test_adjacent_terminals_are_joined() {
    let mut builder = GrammarBuilder::new();
    builder.add_rule("S");
    builder.add_alternative().unwrap();
    builder.push_token("a", TypeFlags::TERMINAL).unwrap();
    builder.push_token("b", TypeFlags::TERMINAL).unwrap();
    builder.push_token("A", TypeFlags::NONTERMINAL).unwrap();
    builder.push_token("", TypeFlags::TERMINAL).unwrap();
    builder.add_alternative().unwrap();
    builder.push_token("x", TypeFlags::TERMINAL).unwrap();
    builder.push_token("y", TypeFlags::TERMINAL).unwrap();
    builder.add_rule("A");
    builder.add_alternative().unwrap();
    builder.push_token("c", TypeFlags::TERMINAL).unwrap();
    let mut g = builder.build();

    convert_to_chomsky_form(&mut g, 2).unwrap();

    assert_eq!(
        alternatives_of(&g, "S"),
        vec![strings(&["__cnf0", "A"]), strings(&["xy"])]
    );
    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["ab"])]);
    for gone in ["a", "b", "x", "y", ""] {
        assert_eq!(g.token_table.key_of(gone), None, "{gone:?} should be dropped");
    }
}

#[test]
fn test_long_sequence_is_folded_to_the_right() {
    let text = "S : A B C D ;\nA : \"a\" ;\nB : \"b\" ;\nC : \"c\" ;\nD : \"d\" ;\n";
    let g = converted(text, 2);

    assert_eq!(alternatives_of(&g, "S"), vec![strings(&["A", "__cnf1"])]);
    assert_eq!(alternatives_of(&g, "__cnf1"), vec![strings(&["B", "__cnf0"])]);
    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["C", "D"])]);
}

// ============================================================================
// Phase 3
// ============================================================================

#[test]
fn test_empty_alternatives_are_compensated() {
    let g = converted("S : A B ;\nA : \"a\" | \"\" ;\nB : \"b\" | \"\" ;\n", 3);

    assert_eq!(
        alternatives_of(&g, "S"),
        vec![strings(&["A", "B"]), strings(&["B"]), strings(&["A"])]
    );
    assert_eq!(alternatives_of(&g, "A"), vec![strings(&["a"])]);
    assert_eq!(alternatives_of(&g, "B"), vec![strings(&["b"])]);
    assert_eq!(g.start_name(), Some("__cnf0"));
    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["S"]), strings(&[""])]);
}

#[test]
fn test_only_empty_nonterminal_disappears() {
    let g = converted("S : A S | \"s\" ;\nA : \"\" ;\n", 3);

    assert_eq!(g.token_table.key_of("A"), None);
    assert_eq!(alternatives_of(&g, "S"), vec![strings(&["s"])]);
    // The start is not nullable, so the new start has no empty alternative
    assert_eq!(alternatives_of(&g, "__cnf0"), vec![strings(&["S"])]);
}

#[test]
fn test_nullable_start_stays_out_of_right_sides() {
    let g = converted("S : \"a\" S \"b\" | \"\" ;", PHASE_COUNT);
    check_chomsky_form(&g).unwrap();

    let start = g.start.unwrap();
    assert!(g.rules[&start].iter().any(|rrs| g.is_empty_alternative(rrs)));
    assert!(g
        .rules
        .values()
        .flatten()
        .all(|rrs| !rrs.nonterminals().any(|nt| nt == start)));
}

// ============================================================================
// Phase 4
// ============================================================================

#[test]
fn test_chain_cycles_collapse() {
    let g = converted("S : A ;\nA : B | \"a\" ;\nB : A | \"b\" ;\n", PHASE_COUNT);
    assert_eq!(g.to_string(), "__cnf0\n: \"a\"\n| \"b\"\n;\n");
}

#[test]
fn test_chain_collapse_keeps_order_and_removes_duplicates() {
    let g = converted("S : A | B | \"s\" ;\nA : \"x\" ;\nB : \"x\" | \"y\" ;\n", 4);

    assert_eq!(
        alternatives_of(&g, "S"),
        vec![strings(&["s"]), strings(&["x"]), strings(&["y"])]
    );
}

// ============================================================================
// Chomsky form check
// ============================================================================

#[test]
fn test_check_accepts_cnf() {
    let g = parse("S : A B | \"\" ;\nA : \"a\" ;\nB : \"b\" ;\n");
    assert_eq!(check_chomsky_form(&g), Ok(()));

    // The start may recur as long as it has no empty alternative
    assert!(is_in_chomsky_form(&parse("S : S S | \"a\" ;")));
}

#[test]
fn test_check_rejects_violations() {
    assert_eq!(
        check_chomsky_form(&parse("S : \"a\" S | \"b\" ;")),
        Err(ChomskyFormError::NonChomskyAlternative {
            nonterminal: "S".to_string(),
            alternative: "\"a\" S".to_string(),
        })
    );
    assert!(!is_in_chomsky_form(&parse("S : A ;\nA : \"a\" ;\n")));
    assert_eq!(
        check_chomsky_form(&parse("S : A A ;\nA : \"\" ;\n")),
        Err(ChomskyFormError::NonChomskyAlternative {
            nonterminal: "A".to_string(),
            alternative: "\"\"".to_string(),
        })
    );
    assert_eq!(
        check_chomsky_form(&parse("S : A S | \"\" ;\nA : \"a\" ;\n")),
        Err(ChomskyFormError::RecursiveNullableStart("S".to_string()))
    );
}

#[test]
fn test_check_rejects_dangling_nonterminal() {
    let mut builder = GrammarBuilder::new();
    builder.add_rule("S");
    builder.add_alternative().unwrap();
    builder.push_token("S", TypeFlags::NONTERMINAL).unwrap();
    builder.push_token("A", TypeFlags::NONTERMINAL).unwrap();
    let g = builder.build();

    assert_eq!(
        check_chomsky_form(&g),
        Err(ChomskyFormError::DanglingNonterminal("A".to_string()))
    );
}

// ============================================================================
// Language preservation
// ============================================================================

fn is_anbn(s: &[u8]) -> bool {
    let n = s.len() / 2;
    s.len() % 2 == 0 && s[..n].iter().all(|&c| c == b'a') && s[n..].iter().all(|&c| c == b'b')
}

fn is_balanced(s: &[u8]) -> bool {
    let mut depth: i32 = 0;
    for &c in s {
        depth += if c == b'(' { 1 } else { -1 };
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

#[test]
fn test_language_of_anbn_is_preserved() {
    assert_language("S : \"a\" S \"b\" | \"\" ;", b"ab", 8, is_anbn);
}

#[test]
fn test_language_of_balanced_parentheses_is_preserved() {
    assert_language("S : S S | \"(\" S \")\" | \"\" ;", b"()", 8, is_balanced);
}

#[test]
fn test_language_of_palindromes_is_preserved() {
    let text = "P : \"a\" P \"a\" | \"b\" P \"b\" | \"a\" | \"b\" | \"\" ;";
    assert_language(text, b"ab", 7, |s| s.iter().eq(s.iter().rev()));
}

#[test]
fn test_language_with_long_terminals_is_preserved() {
    // (ab)* c
    assert_language("S : \"ab\" S | \"c\" ;", b"abc", 6, |s| {
        s.last() == Some(&b'c') && s[..s.len() - 1].chunks(2).all(|pair| pair == b"ab")
    });
}

#[test]
fn test_language_of_expressions_is_preserved() {
    let text = "E : E \"+\" T | T ;\nT : T \"*\" F | F ;\nF : \"(\" E \")\" | \"x\" ;\n";
    // Operators and operands alternate when there are no parentheses
    assert_language(text, b"x+*", 6, |s| {
        s.len() % 2 == 1
            && s.iter()
                .enumerate()
                .all(|(i, &c)| (i % 2 == 0) == (c == b'x'))
    });
}

#[test]
fn test_converting_twice_keeps_the_language() {
    let text = "S : S S | \"(\" S \")\" | \"\" ;";
    let once = converted(text, PHASE_COUNT);
    let mut twice = once.clone();
    convert_to_chomsky_form(&mut twice, PHASE_COUNT).unwrap();
    assert!(is_in_chomsky_form(&twice));

    let first = CykRecognizer::new(&once).unwrap();
    let second = CykRecognizer::new(&twice).unwrap();
    for s in all_strings(b"()", 8) {
        assert_eq!(first.recognize(&s), second.recognize(&s));
    }
}
