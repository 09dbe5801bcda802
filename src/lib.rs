//! Grammar converter and CYK recognizer.
//!
//! A grammar is read from a line-oriented text format (or JSON), normalized
//! into Chomsky Normal Form and then used to decide whether a text belongs to
//! its language.

pub mod cnf;
pub mod cyk;
pub mod errors;
pub mod format;
pub mod grammars;
pub mod json;

pub use cnf::{check_chomsky_form, convert_to_chomsky_form, is_in_chomsky_form, ConversionContext, PHASE_COUNT};
pub use cyk::{is_recognized, CykRecognizer};
pub use errors::{ChomskyFormError, FormatError, GrammarError, JsonError};
pub use format::{parse_grammar, parse_grammar_str, write_grammar};
pub use grammars::{Grammar, GrammarBuilder, RuleRightSide, TableEntry, TokenKey, TokenTable, TypeFlags};
pub use json::{load_grammar_from_file, load_grammar_from_str, to_json_string, write_grammar_json};
