// JSON grammar interchange.
//
//     { "name": "balanced", "start": "<S>",
//       "rules": { "<S>": [["a", "<S>", "b"], [""]], "<D>": {"digits": true} } }
//
// Strings written <Name> are nonterminals, everything else is a terminal.
// Rules keep document order.

use crate::errors::JsonError;
use crate::format::is_valid_nonterminal;
use crate::grammars::{Grammar, GrammarBuilder, RuleRightSide, TypeFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// String-based symbol for parsing JSON
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StrSymbol {
    Terminal(String),
    NonTerminal(String),
}

/// JSON structure for grammar files
#[derive(Debug, Serialize, Deserialize)]
struct GrammarJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<String>,
    #[serde(default)]
    rules: Map<String, Value>,
}

/// `<Name>` to `Name`, None for anything else
fn nonterminal_name(symbol: &str) -> Option<&str> {
    symbol
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .filter(|s| !s.is_empty())
}

// ============================================================================
// Import
// ============================================================================

/// Load a grammar from a JSON file
pub fn load_grammar_from_file<P: AsRef<Path>>(path: P) -> Result<Grammar, JsonError> {
    let content = fs::read_to_string(path)?;
    load_grammar_from_str(&content)
}

/// Load a grammar from a JSON reader
pub fn load_grammar_from_reader<R: Read>(reader: R) -> Result<Grammar, JsonError> {
    let parsed: GrammarJson = serde_json::from_reader(reader)?;
    build_grammar(parsed)
}

/// Load a grammar from a JSON string.
///
/// The `start` rule becomes the start symbol, or the first rule when `start`
/// is absent. A document without rules is the empty grammar.
pub fn load_grammar_from_str(json: &str) -> Result<Grammar, JsonError> {
    let parsed: GrammarJson = serde_json::from_str(json)?;
    build_grammar(parsed)
}

fn build_grammar(parsed: GrammarJson) -> Result<Grammar, JsonError> {
    let mut str_rules: Vec<(&str, Vec<Vec<StrSymbol>>)> = Vec::with_capacity(parsed.rules.len());
    for (lhs, rhs_value) in &parsed.rules {
        let bad_rule = |reason: String| JsonError::BadRule {
            rule: lhs.clone(),
            reason,
        };
        let name = nonterminal_name(lhs)
            .ok_or_else(|| bad_rule("a rule must be headed by a <nonterminal>".to_string()))?;
        if !is_valid_nonterminal(name) {
            return Err(bad_rule(invalid_name_reason(name)));
        }
        str_rules.push((name, parse_rules(rhs_value).map_err(bad_rule)?));
    }

    let mut builder = GrammarBuilder::new();

    // Register the start symbol first so it gets the start role and prints first
    if let Some(start) = &parsed.start {
        let name = nonterminal_name(start).unwrap_or(start);
        if !str_rules.iter().any(|&(lhs, _)| lhs == name) {
            return Err(JsonError::MissingStart(start.clone()));
        }
        builder.add_rule(name);
    }

    for (lhs, productions) in str_rules {
        builder.add_rule(lhs);
        for production in productions {
            builder.add_alternative()?;
            if production.is_empty() {
                builder.push_token("", TypeFlags::TERMINAL)?;
            }
            for symbol in production {
                match symbol {
                    StrSymbol::Terminal(s) => builder.push_token(s, TypeFlags::TERMINAL)?,
                    StrSymbol::NonTerminal(s) => builder.push_token(s, TypeFlags::NONTERMINAL)?,
                };
            }
        }
    }

    let grammar = builder.build();
    if let Some(&nt) = grammar.dangling_nonterminals().first() {
        return Err(JsonError::UndefinedNonterminal(grammar.name(nt).to_string()));
    }
    Ok(grammar)
}

fn invalid_name_reason(name: &str) -> String {
    format!(
        "the nonterminal '{}' cannot contain whitespace or one of ':', ';', '\"', '\\', '|', nor start with '#'",
        name
    )
}

/// Parse rules from JSON value
fn parse_rules(value: &Value) -> Result<Vec<Vec<StrSymbol>>, String> {
    let result = match value {
        // Array of productions: [["a", "<B>"], ["c"]]
        Value::Array(productions) => productions
            .iter()
            .map(|prod| match prod {
                Value::Array(symbols) => parse_production(symbols),
                _ => Err("production must be an array".to_string()),
            })
            .collect::<Result<Vec<_>, _>>()?,
        // Special rule object: {"digits": true} or {"letters": true} or {"char_range": [...]}
        Value::Object(obj) => {
            if obj.get("digits").and_then(Value::as_bool) == Some(true) {
                (0..=9)
                    .map(|i| vec![StrSymbol::Terminal(i.to_string())])
                    .collect()
            } else if obj.get("letters").and_then(Value::as_bool) == Some(true) {
                ('a'..='z')
                    .map(|c| vec![StrSymbol::Terminal(c.to_string())])
                    .collect()
            } else if let Some(range) = obj.get("char_range") {
                let range_arr = range.as_array().ok_or("char_range must be an array")?;
                let bound = |i: usize, what: &str| {
                    range_arr
                        .get(i)
                        .and_then(Value::as_u64)
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or(format!("char_range {} must be a number in 0..=255", what))
                };
                let (start, end) = (bound(0, "start")?, bound(1, "end")?);

                let exclude: Vec<u64> = obj
                    .get("exclude")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_u64).collect())
                    .unwrap_or_default();

                (start..end)
                    .filter(|&i| !exclude.contains(&u64::from(i)))
                    .map(|i| vec![StrSymbol::Terminal(char::from(i).to_string())])
                    .collect()
            } else {
                return Err("expected one of digits, letters or char_range".to_string());
            }
        }
        _ => return Err("rules must be an array or object".to_string()),
    };

    if result.is_empty() {
        return Err("a rule needs at least one alternative".to_string());
    }
    Ok(result)
}

/// Parse a single production from JSON array
fn parse_production(symbols: &[Value]) -> Result<Vec<StrSymbol>, String> {
    symbols
        .iter()
        .map(|s| {
            let sym_str = s.as_str().ok_or("symbol must be a string")?;
            match nonterminal_name(sym_str) {
                Some(name) if !is_valid_nonterminal(name) => Err(invalid_name_reason(name)),
                Some(name) => Ok(StrSymbol::NonTerminal(name.to_string())),
                None => Ok(StrSymbol::Terminal(sym_str.to_string())),
            }
        })
        .collect()
}

// ============================================================================
// Export
// ============================================================================

fn production_to_json(g: &Grammar, rrs: &RuleRightSide) -> Value {
    Value::Array(
        rrs.sequence
            .iter()
            .enumerate()
            .map(|(i, &key)| {
                if rrs.is_nonterminal_at(i) {
                    Value::String(format!("<{}>", g.name(key)))
                } else {
                    Value::String(g.name(key).to_string())
                }
            })
            .collect(),
    )
}

fn grammar_to_json(g: &Grammar, name: Option<&str>) -> GrammarJson {
    // Start rule first, then the rest in table order
    let order = g.start.filter(|s| g.rules.contains_key(s)).into_iter().chain(
        g.rules
            .keys()
            .copied()
            .filter(|&nt| Some(nt) != g.start),
    );

    let rules = order
        .map(|nt| {
            let alternatives = g.rules[&nt]
                .iter()
                .map(|rrs| production_to_json(g, rrs))
                .collect();
            (format!("<{}>", g.name(nt)), Value::Array(alternatives))
        })
        .collect();

    GrammarJson {
        name: name.map(str::to_string),
        start: g.start_name().map(|s| format!("<{}>", s)),
        rules,
    }
}

/// Serialize a grammar as pretty-printed JSON
pub fn to_json_string(g: &Grammar, name: Option<&str>) -> Result<String, JsonError> {
    Ok(serde_json::to_string_pretty(&grammar_to_json(g, name))?)
}

/// Write a grammar as pretty-printed JSON followed by a newline
pub fn write_grammar_json<W: Write>(g: &Grammar, mut writer: W) -> Result<(), JsonError> {
    serde_json::to_writer_pretty(&mut writer, &grammar_to_json(g, None))?;
    writer.write_all(b"\n")?;
    Ok(())
}
