// Error types shared by the grammar model, the text format, the CNF check and
// the JSON interchange.

use crate::grammars::{TokenKey, TypeFlags};
use std::io;
use thiserror::Error;

/// Contract violations of the token table and the grammar builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("token key {0} is not present in the token table")]
    MissingToken(TokenKey),
    #[error("a token must be either a terminal or a nonterminal, got {0:?}")]
    InvalidTokenKind(TypeFlags),
    #[error("no rule has been started yet")]
    NoOpenRule,
    #[error("the current rule has no right side to append to")]
    NoOpenAlternative,
}

/// Violations of the textual grammar format. Parsing stops at the first one.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("line {line}: the ':' symbol must appear only once during a rule definition")]
    RepeatedColon { line: usize },
    #[error("line {line}: expected a nonterminal, but met ':'")]
    ColonWithoutNonterminal { line: usize },
    #[error("line {line}: the '|' symbol cannot be used before ':'")]
    BarBeforeColon { line: usize },
    #[error("line {line}: the right side of a rule cannot be empty")]
    EmptyAlternative { line: usize },
    #[error("line {line}: expected ':' symbol, but met ';'")]
    SemicolonBeforeColon { line: usize },
    #[error("line {line}: a rule cannot be empty this way, add \"\" to the right side")]
    EmptyRule { line: usize },
    #[error("line {line}: every sequence in \"\"-quotes must be closed in the same line")]
    UnclosedQuote { line: usize },
    #[error("line {line}: a rule must start from a nonterminal, but met a terminal")]
    TerminalOutsideRule { line: usize },
    #[error("line {line}: an invalid nonterminal '{name}', it contains one of ':', ';', '\"', '\\', '|'")]
    InvalidNonterminal { line: usize, name: String },
    #[error("line {line}: expected ':' symbol, but found the nonterminal '{name}'")]
    UnexpectedNonterminal { line: usize, name: String },
    #[error("line {line}: met illegal escape sequence '\\{escape}'")]
    IllegalEscape { line: usize, escape: char },
    #[error("line {line}: the last rule is not finished")]
    UnfinishedRule { line: usize },
    #[error("line {line}: the nonterminal '{name}' is used but never defined")]
    UndefinedNonterminal { line: usize, name: String },
    #[error("failed to read the grammar: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

impl FormatError {
    /// Line the violation was found on, if the error is tied to one.
    pub fn line(&self) -> Option<usize> {
        use FormatError::*;
        match self {
            RepeatedColon { line }
            | ColonWithoutNonterminal { line }
            | BarBeforeColon { line }
            | EmptyAlternative { line }
            | SemicolonBeforeColon { line }
            | EmptyRule { line }
            | UnclosedQuote { line }
            | TerminalOutsideRule { line }
            | InvalidNonterminal { line, .. }
            | UnexpectedNonterminal { line, .. }
            | IllegalEscape { line, .. }
            | UnfinishedRule { line }
            | UndefinedNonterminal { line, .. } => Some(*line),
            Io(_) | Grammar(_) => None,
        }
    }
}

/// Reasons a grammar is rejected by the Chomsky Normal Form check.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChomskyFormError {
    #[error("the alternative '{alternative}' of '{nonterminal}' is not in Chomsky form")]
    NonChomskyAlternative {
        nonterminal: String,
        alternative: String,
    },
    #[error("the start symbol '{0}' derives the empty string but appears on a right side")]
    RecursiveNullableStart(String),
    #[error("the nonterminal '{0}' is referenced but has no rule")]
    DanglingNonterminal(String),
    #[error("the start symbol is not defined")]
    MissingStart,
}

/// Failures of the JSON grammar interchange.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("failed to parse JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("failed to read or write JSON: {0}")]
    Io(#[from] io::Error),
    #[error("rule '{rule}': {reason}")]
    BadRule { rule: String, reason: String },
    #[error("start symbol '{0}' not found")]
    MissingStart(String),
    #[error("the nonterminal '{0}' is used but never defined")]
    UndefinedNonterminal(String),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}
