// Chomsky Normal Form conversion.
//
// Five phases run in a fixed order, each rewriting the grammar in place:
//
//   1. prune nonterminals that are ungenerative or unreachable from the start
//   2. split mixed and long alternatives into binary ones
//   3. eliminate empty alternatives behind a fresh, non-recursive start
//   4. collapse chain (unit) rules
//   5. prune again, phases 2-4 can orphan nonterminals
//
// Every phase first computes its changes from a read-only view of the rules
// and only then commits them to the grammar.

use crate::errors::{ChomskyFormError, GrammarError};
use crate::grammars::{Grammar, RuleRightSide, TokenKey, TokenTable, TypeFlags};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// Number of conversion phases
pub const PHASE_COUNT: usize = 5;

/// Prefix of generated nonterminal names
pub const SYNTHETIC_PREFIX: &str = "__cnf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PruneUseless,
    SplitRules,
    EliminateEmpty,
    CollapseChains,
    PruneOrphans,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::PruneUseless,
        Phase::SplitRules,
        Phase::EliminateEmpty,
        Phase::CollapseChains,
        Phase::PruneOrphans,
    ];

    pub fn description(self) -> &'static str {
        match self {
            Phase::PruneUseless => "remove ungenerative and unreachable nonterminals",
            Phase::SplitRules => "split mixed and long alternatives",
            Phase::EliminateEmpty => "eliminate empty alternatives",
            Phase::CollapseChains => "collapse chain rules",
            Phase::PruneOrphans => "remove nonterminals orphaned by the rewrite",
        }
    }
}

// ============================================================================
// Dense nonterminal indexing
// ============================================================================

/// Maps the keys of the multirules to `0..len` so traversals can use flat
/// vectors instead of maps keyed by token
struct NonterminalIndex {
    keys: Vec<TokenKey>,
    index: FxHashMap<TokenKey, usize>,
}

impl NonterminalIndex {
    fn new(g: &Grammar) -> Self {
        let keys: Vec<TokenKey> = g.rules.keys().copied().collect();
        let index = keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();
        NonterminalIndex { keys, index }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn get(&self, key: TokenKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    /// All nonterminals of `rrs` are known and satisfy `marks`
    fn all_marked(&self, rrs: &RuleRightSide, marks: &[bool]) -> bool {
        rrs.nonterminals()
            .all(|nt| self.get(nt).map_or(false, |i| marks[i]))
    }
}

// ============================================================================
// Staged rule changes
// ============================================================================

/// Structural changes computed during a read-only pass over the rules
#[derive(Debug, Default)]
struct StagedChanges {
    /// Multirules to replace (or create) wholesale
    rewritten: BTreeMap<TokenKey, Vec<RuleRightSide>>,
    /// Nonterminals to delete
    removed: Vec<TokenKey>,
    start: Option<TokenKey>,
}

impl StagedChanges {
    fn commit(self, g: &mut Grammar) -> Result<(), GrammarError> {
        for (nt, alternatives) in self.rewritten {
            g.rules.insert(nt, alternatives);
        }
        for nt in self.removed {
            if g.rules.remove(&nt).is_some() {
                g.token_table.erase(nt, TypeFlags::NONTERMINAL)?;
            }
        }
        if let Some(start) = self.start {
            g.start = Some(start);
        }
        if g.start.map_or(false, |s| !g.rules.contains_key(&s)) {
            g.start = None;
        }
        Ok(())
    }
}

/// Remove nonterminals left without alternatives, together with every
/// alternative referring to them, until none are left
fn drop_exhausted_nonterminals(g: &mut Grammar) -> Result<usize, GrammarError> {
    let mut dropped = 0;
    loop {
        let exhausted: FxHashSet<TokenKey> = g
            .rules
            .iter()
            .filter(|(_, alternatives)| alternatives.is_empty())
            .map(|(&nt, _)| nt)
            .collect();
        if exhausted.is_empty() {
            break;
        }

        let staged = StagedChanges {
            rewritten: g
                .rules
                .iter()
                .filter(|(nt, _)| !exhausted.contains(nt))
                .map(|(&nt, alternatives)| {
                    let kept = alternatives
                        .iter()
                        .filter(|rrs| rrs.nonterminals().all(|x| !exhausted.contains(&x)))
                        .cloned()
                        .collect();
                    (nt, kept)
                })
                .collect(),
            removed: exhausted.iter().copied().collect(),
            start: None,
        };
        dropped += exhausted.len();
        staged.commit(g)?;
    }
    Ok(dropped)
}

/// Erase terminal roles that no alternative uses any more
fn drop_unused_terminals(g: &mut Grammar) -> Result<(), GrammarError> {
    let used: FxHashSet<TokenKey> = g
        .rules
        .values()
        .flatten()
        .flat_map(|rrs| {
            rrs.sequence
                .iter()
                .enumerate()
                .filter(|&(i, _)| !rrs.is_nonterminal_at(i))
                .map(|(_, &k)| k)
        })
        .collect();

    let unused: Vec<TokenKey> = g
        .token_table
        .iter()
        .filter(|(key, entry)| entry.kind.contains(TypeFlags::TERMINAL) && !used.contains(key))
        .map(|(key, _)| key)
        .collect();

    for key in unused {
        g.token_table.erase(key, TypeFlags::TERMINAL)?;
    }
    Ok(())
}

// ============================================================================
// Conversion context
// ============================================================================

/// State of one conversion run: the synthetic nonterminal counter and the
/// holders created for terminals. Scoped to a run so conversions stay
/// independent of each other.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    prefix: String,
    counter: usize,
    generated: usize,
    /// Terminal key to the synthetic nonterminal whose only alternative is it
    terminal_holders: FxHashMap<TokenKey, TokenKey>,
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionContext {
    pub fn new() -> Self {
        Self::with_prefix(SYNTHETIC_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        ConversionContext {
            prefix: prefix.into(),
            counter: 0,
            generated: 0,
            terminal_holders: FxHashMap::default(),
        }
    }

    /// Number of synthetic nonterminals created so far
    pub fn generated(&self) -> usize {
        self.generated
    }

    /// Insert a nonterminal whose name is not used by any symbol yet
    fn fresh_nonterminal(&mut self, table: &mut TokenTable) -> TokenKey {
        loop {
            let name = format!("{}{}", self.prefix, self.counter);
            self.counter += 1;
            if table.key_of(&name).is_none() {
                trace!("new synthetic nonterminal {}", name);
                self.generated += 1;
                return table.insert(name, TypeFlags::NONTERMINAL);
            }
        }
    }

    /// Run the first `end_phase` phases (all of them for `end_phase >= 5`)
    pub fn convert(&mut self, g: &mut Grammar, end_phase: usize) -> Result<(), GrammarError> {
        if g.is_empty() {
            debug!("empty grammar, nothing to convert");
            return Ok(());
        }

        for (i, phase) in Phase::ALL.iter().take(end_phase).enumerate() {
            match phase {
                Phase::PruneUseless | Phase::PruneOrphans => prune(g)?,
                Phase::SplitRules => self.split_rules(g)?,
                Phase::EliminateEmpty => self.eliminate_empty(g)?,
                Phase::CollapseChains => collapse_chains(g)?,
            }
            debug!(
                "phase {} ({}): {} nonterminals, {} alternatives",
                i + 1,
                phase.description(),
                g.nonterminal_count(),
                g.production_count()
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------------

    fn split_rules(&mut self, g: &mut Grammar) -> Result<(), GrammarError> {
        self.terminal_holders.clear();

        let mut staged = StagedChanges::default();
        let mut synthetic: BTreeMap<TokenKey, Vec<RuleRightSide>> = BTreeMap::new();
        let Grammar {
            token_table, rules, ..
        } = &mut *g;

        for (&nt, alternatives) in rules.iter() {
            let split = alternatives
                .iter()
                .map(|rrs| self.split_alternative(rrs, token_table, &mut synthetic))
                .collect();
            staged.rewritten.insert(nt, split);
        }

        debug!("split produced {} synthetic multirules", synthetic.len());
        staged.rewritten.extend(synthetic);
        staged.commit(g)?;
        drop_unused_terminals(g)
    }

    fn split_alternative(
        &mut self,
        rrs: &RuleRightSide,
        table: &mut TokenTable,
        synthetic: &mut BTreeMap<TokenKey, Vec<RuleRightSide>>,
    ) -> RuleRightSide {
        if rrs.is_binary() || rrs.is_chain() || (rrs.is_terminal_only() && rrs.len() <= 1) {
            return rrs.clone();
        }

        if rrs.is_terminal_only() {
            let text: String = rrs.sequence.iter().filter_map(|&k| table.text(k)).collect();
            return RuleRightSide::terminal(table.insert(text, TypeFlags::TERMINAL));
        }

        // Terminals become holder nonterminals, adjacent ones joined first and
        // empty ones dropped.
        let mut symbols: Vec<TokenKey> = Vec::with_capacity(rrs.len());
        let mut run = String::new();
        for (i, &key) in rrs.sequence.iter().enumerate() {
            if rrs.is_nonterminal_at(i) {
                if !run.is_empty() {
                    symbols.push(self.terminal_holder(std::mem::take(&mut run), table, synthetic));
                }
                symbols.push(key);
            } else {
                run.push_str(table.text(key).unwrap_or_default());
            }
        }
        if !run.is_empty() {
            symbols.push(self.terminal_holder(run, table, synthetic));
        }

        match symbols.len() {
            1 => RuleRightSide::unit(symbols[0]),
            2 => RuleRightSide::pair(symbols[0], symbols[1]),
            len => {
                // X0 X1 ... Xn  =>  X0 L1,  L1 -> X1 L2,  ...,  Ln-1 -> Xn-1 Xn
                let mut tail = symbols[len - 1];
                for &symbol in symbols[1..len - 1].iter().rev() {
                    let link = self.fresh_nonterminal(table);
                    synthetic.insert(link, vec![RuleRightSide::pair(symbol, tail)]);
                    tail = link;
                }
                RuleRightSide::pair(symbols[0], tail)
            }
        }
    }

    fn terminal_holder(
        &mut self,
        text: String,
        table: &mut TokenTable,
        synthetic: &mut BTreeMap<TokenKey, Vec<RuleRightSide>>,
    ) -> TokenKey {
        let terminal = table.insert(text, TypeFlags::TERMINAL);
        if let Some(&holder) = self.terminal_holders.get(&terminal) {
            return holder;
        }
        let holder = self.fresh_nonterminal(table);
        synthetic.insert(holder, vec![RuleRightSide::terminal(terminal)]);
        self.terminal_holders.insert(terminal, holder);
        holder
    }

    // ------------------------------------------------------------------------
    // Phase 3
    // ------------------------------------------------------------------------

    fn eliminate_empty(&mut self, g: &mut Grammar) -> Result<(), GrammarError> {
        let old_start = match g.start {
            Some(start) => start,
            None => return Ok(()),
        };

        let index = NonterminalIndex::new(g);
        let nullable = empty_generative(g, &index);
        let is_nullable = |nt: TokenKey| index.get(nt).map_or(false, |i| nullable[i]);

        let mut staged = StagedChanges::default();
        for (&nt, alternatives) in &g.rules {
            let mut seen: FxHashSet<RuleRightSide> = FxHashSet::default();
            let mut kept = Vec::with_capacity(alternatives.len());
            let mut keep = |rrs: RuleRightSide| {
                if seen.insert(rrs.clone()) {
                    kept.push(rrs);
                }
            };

            for rrs in alternatives {
                if g.is_empty_alternative(rrs) {
                    continue;
                }
                keep(rrs.clone());

                if rrs.is_binary() {
                    let (first, second) = (rrs.sequence[0], rrs.sequence[1]);
                    if is_nullable(first) && second != nt {
                        keep(RuleRightSide::unit(second));
                    }
                    if is_nullable(second) && first != nt {
                        keep(RuleRightSide::unit(first));
                    }
                }
            }
            staged.rewritten.insert(nt, kept);
        }

        let unique_start = self.fresh_nonterminal(&mut g.token_table);
        let mut start_alternatives = vec![RuleRightSide::unit(old_start)];
        if is_nullable(old_start) {
            let empty = g.token_table.insert("", TypeFlags::TERMINAL);
            start_alternatives.push(RuleRightSide::terminal(empty));
        }
        debug!(
            "{} empty-generative nonterminals, new start {}",
            nullable.iter().filter(|&&n| n).count(),
            g.name(unique_start)
        );
        staged.rewritten.insert(unique_start, start_alternatives);
        staged.start = Some(unique_start);

        staged.commit(g)?;
        drop_exhausted_nonterminals(g)?;
        drop_unused_terminals(g)
    }
}

/// Run the full conversion with a fresh context
pub fn convert_to_chomsky_form(g: &mut Grammar, end_phase: usize) -> Result<(), GrammarError> {
    ConversionContext::new().convert(g, end_phase)
}

// ============================================================================
// Phases 1 and 5
// ============================================================================

/// Fixed point: a nonterminal is generative once every nonterminal of at
/// least one of its alternatives is. All-terminal alternatives seed it.
fn generative(g: &Grammar, index: &NonterminalIndex) -> Vec<bool> {
    let mut marks = vec![false; index.len()];
    let mut changed = true;

    while changed {
        changed = false;
        for (i, nt) in index.keys.iter().enumerate() {
            if marks[i] {
                continue;
            }
            if g.rules[nt].iter().any(|rrs| index.all_marked(rrs, &marks)) {
                marks[i] = true;
                changed = true;
            }
        }
    }

    marks
}

fn prune(g: &mut Grammar) -> Result<(), GrammarError> {
    if g.is_empty() {
        return Ok(());
    }

    let index = NonterminalIndex::new(g);
    let generative = generative(g, &index);

    // Depth-first walk from the start through alternatives that can still
    // derive a terminal string
    let mut reachable = vec![false; index.len()];
    let mut dfs_stack: Vec<usize> = Vec::new();
    if let Some(start) = g.start.and_then(|s| index.get(s)) {
        if generative[start] {
            reachable[start] = true;
            dfs_stack.push(start);
        }
    }
    while let Some(cur) = dfs_stack.pop() {
        for rrs in &g.rules[&index.keys[cur]] {
            if !index.all_marked(rrs, &generative) {
                continue;
            }
            for nt in rrs.nonterminals() {
                if let Some(i) = index.get(nt) {
                    if !reachable[i] {
                        reachable[i] = true;
                        dfs_stack.push(i);
                    }
                }
            }
        }
    }

    let mut staged = StagedChanges::default();
    for (i, &nt) in index.keys.iter().enumerate() {
        if !reachable[i] {
            staged.removed.push(nt);
            continue;
        }
        let kept: Vec<RuleRightSide> = g.rules[&nt]
            .iter()
            .filter(|rrs| index.all_marked(rrs, &generative))
            .cloned()
            .collect();
        staged.rewritten.insert(nt, kept);
    }

    debug!("pruning {} useless nonterminals", staged.removed.len());
    staged.commit(g)?;
    drop_unused_terminals(g)
}

// ============================================================================
// Phase 3 helpers
// ============================================================================

/// Fixed point over nonterminals deriving the empty string, seeded by direct
/// empty alternatives
fn empty_generative(g: &Grammar, index: &NonterminalIndex) -> Vec<bool> {
    let mut marks: Vec<bool> = index
        .keys
        .iter()
        .map(|nt| g.rules[nt].iter().any(|rrs| g.is_empty_alternative(rrs)))
        .collect();
    let mut changed = true;

    while changed {
        changed = false;
        for (i, nt) in index.keys.iter().enumerate() {
            if marks[i] {
                continue;
            }
            let derives_empty = g.rules[nt].iter().any(|rrs| {
                !rrs.is_terminal_only()
                    && rrs.nt_indexes.len() == rrs.len()
                    && index.all_marked(rrs, &marks)
            });
            if derives_empty {
                marks[i] = true;
                changed = true;
            }
        }
    }

    marks
}

// ============================================================================
// Phase 4
// ============================================================================

/// Give every nonterminal the non-chain alternatives of everything it reaches
/// through chain rules, then drop the chain rules. Cycles are cut by the
/// visited marks.
fn collapse_chains(g: &mut Grammar) -> Result<(), GrammarError> {
    let index = NonterminalIndex::new(g);
    let mut staged = StagedChanges::default();
    let mut collapsed = 0;

    for (i, &nt) in index.keys.iter().enumerate() {
        let mut visited = vec![false; index.len()];
        let mut chain = vec![i];
        let mut stack = vec![i];
        visited[i] = true;

        while let Some(cur) = stack.pop() {
            for rrs in &g.rules[&index.keys[cur]] {
                if !rrs.is_chain() {
                    continue;
                }
                if let Some(next) = index.get(rrs.sequence[0]) {
                    if !visited[next] {
                        visited[next] = true;
                        chain.push(next);
                        stack.push(next);
                    }
                }
            }
        }

        let mut seen: FxHashSet<&RuleRightSide> = FxHashSet::default();
        let alternatives: Vec<RuleRightSide> = chain
            .iter()
            .flat_map(|&j| g.rules[&index.keys[j]].iter())
            .filter(|rrs| !rrs.is_chain() && seen.insert(*rrs))
            .cloned()
            .collect();

        collapsed += chain.len() - 1;
        staged.rewritten.insert(nt, alternatives);
    }

    debug!("collapsed {} chain links", collapsed);
    staged.commit(g)?;
    drop_exhausted_nonterminals(g)?;
    Ok(())
}

// ============================================================================
// Chomsky form check
// ============================================================================

/// Check that `g` is in Chomsky Normal Form: every alternative is two
/// nonterminals or one non-empty terminal, except that the start symbol may
/// have the empty alternative as long as it never appears on a right side.
/// The empty grammar passes.
pub fn check_chomsky_form(g: &Grammar) -> Result<(), ChomskyFormError> {
    if g.is_empty() {
        return Ok(());
    }

    let start = g
        .start
        .filter(|s| g.rules.contains_key(s))
        .ok_or(ChomskyFormError::MissingStart)?;

    if let Some(&nt) = g.dangling_nonterminals().first() {
        return Err(ChomskyFormError::DanglingNonterminal(g.name(nt).to_string()));
    }

    let mut start_is_nullable = false;
    let mut start_is_referenced = false;

    for (&nt, alternatives) in &g.rules {
        for rrs in alternatives {
            let valid = if rrs.is_binary() {
                start_is_referenced |= rrs.sequence.contains(&start);
                true
            } else if rrs.is_terminal_only() && rrs.len() == 1 {
                if g.name(rrs.sequence[0]).is_empty() {
                    start_is_nullable |= nt == start;
                    nt == start
                } else {
                    true
                }
            } else {
                false
            };

            if !valid {
                return Err(ChomskyFormError::NonChomskyAlternative {
                    nonterminal: g.name(nt).to_string(),
                    alternative: g.describe(rrs),
                });
            }
        }
    }

    if start_is_nullable && start_is_referenced {
        return Err(ChomskyFormError::RecursiveNullableStart(g.name(start).to_string()));
    }
    Ok(())
}

pub fn is_in_chomsky_form(g: &Grammar) -> bool {
    check_chomsky_form(g).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "cnf_tests.rs"]
mod tests;
