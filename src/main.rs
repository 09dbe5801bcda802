//! Command line front end: converts grammars to Chomsky Normal Form and checks
//! whether a text is recognized by a grammar.

#[macro_use]
extern crate log;

use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use gc_cykp::cnf::{check_chomsky_form, convert_to_chomsky_form, PHASE_COUNT};
use gc_cykp::cyk::CykRecognizer;
use gc_cykp::errors::{ChomskyFormError, FormatError, GrammarError, JsonError};
use gc_cykp::format::{parse_grammar, write_grammar};
use gc_cykp::grammars::Grammar;
use gc_cykp::json::{load_grammar_from_file, write_grammar_json};
use log::LevelFilter;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error("cannot access '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Json(#[from] JsonError),
    #[error(transparent)]
    ChomskyForm(#[from] ChomskyFormError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

impl AppError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> AppError + '_ {
        move |source| AppError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn cli() -> Command {
    Command::new("gc-cykp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts context-free grammars to Chomsky Normal Form and recognizes texts with CYK.")
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase log verbosity (warn, info, debug, trace)"),
        )
        .arg(
            Arg::new("recognize")
                .short('R')
                .value_name("TEXT")
                .value_parser(value_parser!(PathBuf))
                .help("Check whether the contents of TEXT are recognized by the grammar"),
        )
        .arg(
            Arg::new("no-convert")
                .short('n')
                .action(ArgAction::SetTrue)
                .requires("recognize")
                .help("Do not convert: the grammar must already be in Chomsky Normal Form"),
        )
        .arg(
            Arg::new("convert")
                .short('C')
                .value_name("PHASES")
                .value_parser(value_parser!(usize))
                .help("Run the first PHASES conversion phases (0 to 5) and output the grammar"),
        )
        .group(
            ArgGroup::new("mode")
                .args(["recognize", "convert"])
                .required(true),
        )
        .arg(
            Arg::new("save")
                .short('s')
                .value_name("OUT")
                .value_parser(value_parser!(PathBuf))
                .help("Write the resulting grammar to OUT instead of the standard output"),
        )
        .arg(
            Arg::new("grammar")
                .value_name("GRAMMAR")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .help("Grammar file, JSON if it ends in .json"),
        )
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_default_env();
    // RUST_LOG wins unless -v was given
    if verbosity > 0 || std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(level);
    }
    builder.format_timestamp(None).init();
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

fn load_grammar(path: &Path) -> Result<Grammar, AppError> {
    let grammar = if is_json(path) {
        load_grammar_from_file(path).map_err(|err| match err {
            JsonError::Io(source) => AppError::Io {
                path: path.to_path_buf(),
                source,
            },
            err => AppError::Json(err),
        })?
    } else {
        let file = File::open(path).map_err(AppError::io(path))?;
        parse_grammar(BufReader::new(file))?
    };

    info!(
        "Grammar has {} productions, {} nonterminals, {} terminals",
        grammar.production_count(),
        grammar.nonterminal_count(),
        grammar.terminal_count(),
    );
    Ok(grammar)
}

/// Write the grammar to `out`, or print it under `header` on stdout
fn save_grammar(grammar: &Grammar, out: Option<&PathBuf>, header: Option<&str>) -> Result<(), AppError> {
    match out {
        Some(path) => {
            let file = File::create(path).map_err(AppError::io(path))?;
            let writer = BufWriter::new(file);
            if is_json(path) {
                write_grammar_json(grammar, writer)?;
            } else {
                write_grammar(grammar, writer).map_err(AppError::io(path))?;
            }
            info!("Grammar written to {}", path.display());
        }
        None => {
            let stdout_path = Path::new("<stdout>");
            let mut stdout = io::stdout().lock();
            if let Some(header) = header {
                writeln!(stdout, "{}", header).map_err(AppError::io(stdout_path))?;
            }
            write_grammar(grammar, stdout).map_err(AppError::io(stdout_path))?;
        }
    }
    Ok(())
}

fn recognize(matches: &ArgMatches, text_path: &Path, mut grammar: Grammar) -> Result<(), AppError> {
    let text = fs::read(text_path).map_err(AppError::io(text_path))?;

    if matches.get_flag("no-convert") {
        check_chomsky_form(&grammar)?;
    } else {
        convert_to_chomsky_form(&mut grammar, PHASE_COUNT)?;
    }
    save_grammar(&grammar, matches.get_one::<PathBuf>("save"), Some("The converted grammar:"))?;

    let recognizer = CykRecognizer::new(&grammar)?;
    let start = Instant::now();
    let recognized = recognizer.recognize(&text);
    info!("Recognized {} bytes in {:?}", text.len(), start.elapsed());

    if recognized {
        println!("Yes, the text is recognized by the grammar.");
    } else {
        println!("No, the text is not recognized by the grammar.");
    }
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<(), AppError> {
    let grammar_path = matches
        .get_one::<PathBuf>("grammar")
        .map(PathBuf::as_path)
        .unwrap_or_else(|| Path::new(""));
    let mut grammar = load_grammar(grammar_path)?;

    if let Some(text_path) = matches.get_one::<PathBuf>("recognize") {
        return recognize(matches, text_path, grammar);
    }

    let phases = matches.get_one::<usize>("convert").copied().unwrap_or(PHASE_COUNT);
    info!("Running {} of {} conversion phases", phases.min(PHASE_COUNT), PHASE_COUNT);
    convert_to_chomsky_form(&mut grammar, phases)?;
    save_grammar(&grammar, matches.get_one::<PathBuf>("save"), None)
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("The program has interrupted its execution: {}", err);
            eprintln!("For more information, execute the program with \"-h\" flag.");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_modes_are_exclusive_and_required() {
        assert!(cli().try_get_matches_from(["gc-cykp", "g.txt"]).is_err());
        assert!(cli()
            .try_get_matches_from(["gc-cykp", "-R", "t.txt", "-C", "2", "g.txt"])
            .is_err());
        assert!(cli().try_get_matches_from(["gc-cykp", "-n", "-C", "2", "g.txt"]).is_err());

        let matches = cli()
            .try_get_matches_from(["gc-cykp", "-vv", "-R", "t.txt", "-n", "-s", "out.json", "g.txt"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
        assert!(matches.get_flag("no-convert"));
        assert_eq!(matches.get_one::<PathBuf>("save"), Some(&PathBuf::from("out.json")));

        let matches = cli().try_get_matches_from(["gc-cykp", "-C", "3", "g.txt"]).unwrap();
        assert_eq!(matches.get_one::<usize>("convert"), Some(&3));
    }

    #[test]
    fn test_output_format_follows_extension() {
        assert!(is_json(Path::new("grammars/balanced.json")));
        assert!(!is_json(Path::new("grammars/balanced.txt")));
        assert!(!is_json(Path::new("json")));
    }

    #[test]
    fn test_load_grammar_by_extension() {
        let dir = std::env::temp_dir();
        let json_path = dir.join(format!("gc_cykp_cli_{}.json", std::process::id()));
        let text_path = json_path.with_extension("txt");
        fs::write(&json_path, r#"{"rules": {"<S>": [["a", "<S>"], ["b"]]}}"#).unwrap();
        fs::write(&text_path, "S : \"a\" S | \"b\" ;\n").unwrap();

        let from_json = load_grammar(&json_path);
        let from_text = load_grammar(&text_path);
        let _ = fs::remove_file(&json_path);
        let _ = fs::remove_file(&text_path);
        assert_eq!(from_json.unwrap(), from_text.unwrap());

        let missing = json_path.with_extension("absent.json");
        match load_grammar(&missing) {
            Err(AppError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
