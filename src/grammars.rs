// Grammars module - token table, rules and the incremental grammar builder

use crate::errors::GrammarError;
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

// ============================================================================
// Token Table - maps between symbol text and compact keys
// ============================================================================

/// Compact identifier of a symbol inside one grammar's token table
pub type TokenKey = usize;

bitflags! {
    /// Roles a symbol plays in a grammar. A symbol may be both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u8 {
        const TERMINAL = 0b01;
        const NONTERMINAL = 0b10;
    }
}

impl TypeFlags {
    /// True if the flags name exactly one role
    pub fn is_single_role(self) -> bool {
        self == TypeFlags::TERMINAL || self == TypeFlags::NONTERMINAL
    }
}

/// A symbol's text together with the roles it is used in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub text: String,
    pub kind: TypeFlags,
}

/// Bidirectional mapping between symbol text and token keys
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    /// Key to entry, ordered by key (insertion order)
    table: BTreeMap<TokenKey, TableEntry>,
    /// Text to key
    rtable: FxHashMap<String, TokenKey>,
    /// Next key to hand out, keys are never recycled
    next_key: TokenKey,
}

impl TokenTable {
    /// Create a new empty token table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the key for `text`, adding `kind` to its roles
    pub fn insert(&mut self, text: impl Into<String>, kind: TypeFlags) -> TokenKey {
        let text = text.into();
        if let Some(&key) = self.rtable.get(&text) {
            if let Some(entry) = self.table.get_mut(&key) {
                entry.kind |= kind;
            }
            return key;
        }

        let key = self.next_key;
        self.next_key += 1;
        self.rtable.insert(text.clone(), key);
        self.table.insert(key, TableEntry { text, kind });
        key
    }

    /// Clear the `kind` roles of `key`. The entry disappears once no role is left.
    pub fn erase(&mut self, key: TokenKey, kind: TypeFlags) -> Result<(), GrammarError> {
        let entry = self
            .table
            .get_mut(&key)
            .ok_or(GrammarError::MissingToken(key))?;
        entry.kind.remove(kind);

        if entry.kind.is_empty() {
            if let Some(entry) = self.table.remove(&key) {
                self.rtable.remove(&entry.text);
            }
        }
        Ok(())
    }

    /// Remove every entry. Keys handed out before are still never reused.
    pub fn clear(&mut self) {
        self.table.clear();
        self.rtable.clear();
    }

    /// Get the text of a key (returns None if not found)
    pub fn text(&self, key: TokenKey) -> Option<&str> {
        self.table.get(&key).map(|e| e.text.as_str())
    }

    /// Get the roles of a key, empty if the key is unknown
    pub fn kind(&self, key: TokenKey) -> TypeFlags {
        self.table.get(&key).map(|e| e.kind).unwrap_or_default()
    }

    /// Get the key for a text (returns None if not found)
    pub fn key_of(&self, text: &str) -> Option<TokenKey> {
        self.rtable.get(text).copied()
    }

    pub fn contains(&self, key: TokenKey) -> bool {
        self.table.contains_key(&key)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (TokenKey, &TableEntry)> {
        self.table.iter().map(|(&k, e)| (k, e))
    }

    /// Number of entries flagged with any of `kind`
    pub fn count(&self, kind: TypeFlags) -> usize {
        self.table.values().filter(|e| e.kind.intersects(kind)).count()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Check that the forward and reverse maps mirror each other exactly
    pub fn is_consistent(&self) -> bool {
        self.table.len() == self.rtable.len()
            && self
                .table
                .iter()
                .all(|(key, entry)| self.rtable.get(&entry.text) == Some(key) && !entry.kind.is_empty())
            && self
                .rtable
                .iter()
                .all(|(text, key)| self.table.get(key).map(|e| &e.text) == Some(text))
    }
}

// ============================================================================
// Rule right sides
// ============================================================================

/// One alternative of a multirule.
///
/// `nt_indexes` lists, in ascending order, the positions of `sequence` that
/// hold nonterminals. All other positions hold terminals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleRightSide {
    pub sequence: Vec<TokenKey>,
    pub nt_indexes: Vec<usize>,
}

impl RuleRightSide {
    pub fn new() -> Self {
        Self::default()
    }

    /// `A -> "t"`
    pub fn terminal(key: TokenKey) -> Self {
        RuleRightSide {
            sequence: vec![key],
            nt_indexes: Vec::new(),
        }
    }

    /// `A -> B`
    pub fn unit(key: TokenKey) -> Self {
        RuleRightSide {
            sequence: vec![key],
            nt_indexes: vec![0],
        }
    }

    /// `A -> B C`
    pub fn pair(first: TokenKey, second: TokenKey) -> Self {
        RuleRightSide {
            sequence: vec![first, second],
            nt_indexes: vec![0, 1],
        }
    }

    pub fn push_terminal(&mut self, key: TokenKey) {
        self.sequence.push(key);
    }

    pub fn push_nonterminal(&mut self, key: TokenKey) {
        self.nt_indexes.push(self.sequence.len());
        self.sequence.push(key);
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Whether the alternative holds terminals only
    pub fn is_terminal_only(&self) -> bool {
        self.nt_indexes.is_empty()
    }

    /// A chain (unit) rule: exactly one nonterminal and nothing else
    pub fn is_chain(&self) -> bool {
        self.sequence.len() == 1 && self.nt_indexes.len() == 1
    }

    /// Exactly two nonterminals and nothing else
    pub fn is_binary(&self) -> bool {
        self.sequence.len() == 2 && self.nt_indexes.len() == 2
    }

    pub fn is_nonterminal_at(&self, position: usize) -> bool {
        self.nt_indexes.binary_search(&position).is_ok()
    }

    /// Keys at nonterminal positions, in order
    pub fn nonterminals(&self) -> impl Iterator<Item = TokenKey> + '_ {
        self.nt_indexes.iter().map(move |&i| self.sequence[i])
    }

    /// Check `nt_indexes` is strictly increasing and in bounds
    pub fn is_well_formed(&self) -> bool {
        self.nt_indexes.windows(2).all(|w| w[0] < w[1])
            && self.nt_indexes.last().map_or(true, |&i| i < self.sequence.len())
    }

    /// Compare two alternatives that may come from different token tables.
    /// Positions are compared by symbol text, with terminal and nonterminal
    /// positions required to line up.
    pub fn positionally_eq(&self, other: &RuleRightSide, table: &TokenTable, other_table: &TokenTable) -> bool {
        self.nt_indexes == other.nt_indexes
            && self.sequence.len() == other.sequence.len()
            && self
                .sequence
                .iter()
                .zip(&other.sequence)
                .all(|(&a, &b)| match (table.text(a), other_table.text(b)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                })
    }
}

// ============================================================================
// Grammar
// ============================================================================

/// A context-free grammar: multirules keyed by nonterminal plus a start symbol
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    pub token_table: TokenTable,
    /// Nonterminal to its ordered alternatives
    pub rules: BTreeMap<TokenKey, Vec<RuleRightSide>>,
    /// None only while the grammar has no rules
    pub start: Option<TokenKey>,
}

impl Grammar {
    /// Create a new empty grammar
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.token_table.clear();
        self.rules.clear();
        self.start = None;
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Get the text of a symbol, "?" if the key is unknown
    pub fn name(&self, key: TokenKey) -> &str {
        self.token_table.text(key).unwrap_or("?")
    }

    /// Get the start symbol's name
    pub fn start_name(&self) -> Option<&str> {
        self.start.and_then(|s| self.token_table.text(s))
    }

    pub fn alternatives(&self, nonterminal: TokenKey) -> Option<&[RuleRightSide]> {
        self.rules.get(&nonterminal).map(Vec::as_slice)
    }

    /// Number of multirules
    pub fn nonterminal_count(&self) -> usize {
        self.rules.len()
    }

    /// Number of terminal symbols in the token table
    pub fn terminal_count(&self) -> usize {
        self.token_table.count(TypeFlags::TERMINAL)
    }

    /// Count total number of alternatives
    pub fn production_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Concatenated text of a terminal-only alternative
    pub fn terminal_text(&self, rrs: &RuleRightSide) -> String {
        rrs.sequence.iter().map(|&k| self.name(k)).collect()
    }

    /// An alternative deriving the empty string directly: terminals only, all empty
    pub fn is_empty_alternative(&self, rrs: &RuleRightSide) -> bool {
        rrs.is_terminal_only() && rrs.sequence.iter().all(|&k| self.name(k).is_empty())
    }

    /// Human readable form of an alternative, used in messages and logs
    pub fn describe(&self, rrs: &RuleRightSide) -> String {
        rrs.sequence
            .iter()
            .enumerate()
            .map(|(i, &k)| {
                if rrs.is_nonterminal_at(i) {
                    self.name(k).to_string()
                } else {
                    format!("{:?}", self.name(k))
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Nonterminals referenced by some alternative without a multirule of their own
    pub fn dangling_nonterminals(&self) -> Vec<TokenKey> {
        let mut dangling: Vec<TokenKey> = self
            .rules
            .values()
            .flatten()
            .flat_map(|rrs| rrs.nonterminals())
            .filter(|nt| !self.rules.contains_key(nt))
            .collect();
        dangling.sort_unstable();
        dangling.dedup();
        dangling
    }
}

/// Grammars are equal when they define the same nonterminals by name, with
/// positionally equal alternatives in the same order, and the same start.
impl PartialEq for Grammar {
    fn eq(&self, other: &Self) -> bool {
        if self.rules.len() != other.rules.len() || self.start_name() != other.start_name() {
            return false;
        }

        self.rules.iter().all(|(&nt, alternatives)| {
            let other_alternatives = other
                .token_table
                .key_of(self.name(nt))
                .and_then(|key| other.rules.get(&key));

            match other_alternatives {
                Some(other_alternatives) => {
                    alternatives.len() == other_alternatives.len()
                        && alternatives.iter().zip(other_alternatives).all(|(a, b)| {
                            a.positionally_eq(b, &self.token_table, &other.token_table)
                        })
                }
                None => false,
            }
        })
    }
}

// ============================================================================
// Grammar Builder
// ============================================================================

/// Incremental construction of a grammar, one rule and alternative at a time
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    grammar: Grammar,
    current: Option<TokenKey>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or reopen) the multirule of `nonterminal`. The first rule added
    /// becomes the start symbol.
    pub fn add_rule(&mut self, nonterminal: impl Into<String>) -> TokenKey {
        let key = self
            .grammar
            .token_table
            .insert(nonterminal, TypeFlags::NONTERMINAL);
        if self.grammar.start.is_none() {
            self.grammar.start = Some(key);
        }
        self.grammar.rules.entry(key).or_default();
        self.current = Some(key);
        key
    }

    /// Append a fresh empty alternative to the current multirule
    pub fn add_alternative(&mut self) -> Result<(), GrammarError> {
        let current = self.current.ok_or(GrammarError::NoOpenRule)?;
        self.grammar
            .rules
            .entry(current)
            .or_default()
            .push(RuleRightSide::new());
        Ok(())
    }

    /// Append a token to the current alternative
    pub fn push_token(&mut self, text: impl Into<String>, kind: TypeFlags) -> Result<TokenKey, GrammarError> {
        if !kind.is_single_role() {
            return Err(GrammarError::InvalidTokenKind(kind));
        }
        let current = self.current.ok_or(GrammarError::NoOpenRule)?;
        let alternative = self
            .grammar
            .rules
            .get_mut(&current)
            .and_then(|alternatives| alternatives.last_mut())
            .ok_or(GrammarError::NoOpenAlternative)?;

        let key = self.grammar.token_table.insert(text, kind);
        if kind == TypeFlags::NONTERMINAL {
            alternative.push_nonterminal(key);
        } else {
            alternative.push_terminal(key);
        }
        Ok(key)
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn build(self) -> Grammar {
        self.grammar
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "grammars_tests.rs"]
mod tests;
