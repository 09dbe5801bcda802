//! Benchmarking tool that outputs CSV data for plotting recognition time vs input length.
//!
//! Usage:
//!   cargo run --release --bin benchmark_csv -- <GRAMMAR> <TEXT> [OUT.csv]
//!
//! Output:
//!   Creates a CSV file (default results/benchmark.csv) with columns:
//!   input_length, median_time_ns, mad_ns, peak_memory_bytes, iterations, recognized
use clap::{value_parser, Arg, Command};
use gc_cykp::cnf::{convert_to_chomsky_form, PHASE_COUNT};
use gc_cykp::cyk::CykRecognizer;
use gc_cykp::errors::{ChomskyFormError, FormatError, GrammarError, JsonError};
use gc_cykp::format::parse_grammar_str;
use gc_cykp::json::load_grammar_from_str;
use memory_stats::memory_stats;
use std::fs::{self, File};
use std::hint::black_box;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

// ============================================================================
// Configuration
// ============================================================================

const WARMUP_ITERATIONS: u32 = 1;
const MIN_ITERATIONS: u32 = 5;
const MAX_ITERATIONS: u32 = 20;
const TARGET_TIME: Duration = Duration::from_millis(500);
/// Number of prefixes measured when the text is a single line
const SINGLE_LINE_STEPS: usize = 20;
const DEFAULT_OUTPUT: &str = "results/benchmark.csv";

#[derive(Debug, Error)]
enum BenchError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Json(#[from] JsonError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    ChomskyForm(#[from] ChomskyFormError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BenchError + '_ {
    move |source| BenchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone)]
struct BenchmarkResult {
    input_length: usize,
    median_time_ns: f64,
    mad_ns: f64,
    peak_memory_bytes: usize,
    iterations: u32,
    recognized: bool,
}

impl BenchmarkResult {
    const CSV_HEADER: &'static str =
        "input_length,median_time_ns,mad_ns,peak_memory_bytes,iterations,recognized";

    fn to_csv_row(&self) -> String {
        format!(
            "{},{:.2},{:.2},{},{},{}",
            self.input_length,
            self.median_time_ns,
            self.mad_ns,
            self.peak_memory_bytes,
            self.iterations,
            self.recognized
        )
    }
}

// ============================================================================
// Measurement Functions
// ============================================================================

/// Measure peak memory usage during recognition using a sampling thread
fn measure_peak_memory<F>(mut recognize_fn: F) -> usize
where
    F: FnMut() -> bool,
{
    let start_mem = memory_stats().map(|u| u.physical_mem).unwrap_or(0);

    let peak_mem = Arc::new(AtomicUsize::new(start_mem));
    let stop_signal = Arc::new(AtomicBool::new(false));

    let t_peak = peak_mem.clone();
    let t_stop = stop_signal.clone();

    // Spawn sampler thread (1ms interval)
    let sampler = thread::spawn(move || {
        while !t_stop.load(Ordering::Relaxed) {
            if let Some(usage) = memory_stats() {
                t_peak.fetch_max(usage.physical_mem, Ordering::Relaxed);
            }
            thread::sleep(Duration::from_millis(1));
        }
    });

    black_box(recognize_fn());

    stop_signal.store(true, Ordering::Relaxed);
    let _ = sampler.join();

    // Approximate delta, the recognizer runs on this thread only
    peak_mem.load(Ordering::Relaxed).saturating_sub(start_mem)
}

/// Median of a sorted, non-empty slice
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Time `recognize_fn`, returning (median ns, MAD ns, iterations)
fn measure<F>(mut recognize_fn: F) -> (f64, f64, u32)
where
    F: FnMut() -> bool,
{
    for _ in 0..WARMUP_ITERATIONS {
        black_box(recognize_fn());
    }

    let mut times: Vec<f64> = Vec::new();
    let mut iterations = 0u32;

    let start_measure = Instant::now();
    loop {
        if iterations >= MAX_ITERATIONS {
            break;
        }
        if iterations >= MIN_ITERATIONS && start_measure.elapsed() >= TARGET_TIME {
            break;
        }

        let start = Instant::now();
        black_box(recognize_fn());
        times.push(start.elapsed().as_nanos() as f64);
        iterations += 1;
    }

    times.sort_by(f64::total_cmp);
    let median_time = median(&times);

    // MAD (Median Absolute Deviation)
    let mut deviations: Vec<f64> = times.iter().map(|t| (t - median_time).abs()).collect();
    deviations.sort_by(f64::total_cmp);

    (median_time, median(&deviations), iterations)
}

/// Prefix lengths to measure: every line end for multi-line texts, otherwise
/// evenly spaced steps over the single line
fn prefix_lengths(text: &[u8]) -> Vec<usize> {
    let mut lengths: Vec<usize> = text
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
        .map(|(i, _)| i + 1)
        .collect();

    if lengths.len() <= 1 {
        let step = (text.len() / SINGLE_LINE_STEPS).max(1);
        lengths = (step..=text.len()).step_by(step).collect();
    }
    if lengths.last() != Some(&text.len()) {
        lengths.push(text.len());
    }
    lengths
}

// ============================================================================
// Driver
// ============================================================================

fn run_benchmarks(grammar_path: &Path, text_path: &Path, out_path: &Path) -> Result<(), BenchError> {
    let source = fs::read_to_string(grammar_path).map_err(io_error(grammar_path))?;
    let mut grammar = if grammar_path.extension().and_then(|s| s.to_str()) == Some("json") {
        load_grammar_from_str(&source)?
    } else {
        parse_grammar_str(&source)?
    };
    convert_to_chomsky_form(&mut grammar, PHASE_COUNT)?;
    let recognizer = CykRecognizer::new(&grammar)?;
    println!(
        "Grammar: {} ({} nonterminals, {} productions in CNF)",
        grammar_path.display(),
        grammar.nonterminal_count(),
        grammar.production_count()
    );

    let text = fs::read(text_path).map_err(io_error(text_path))?;

    if let Some(dir) = out_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    let mut csv_file = File::create(out_path).map_err(io_error(out_path))?;
    writeln!(csv_file, "{}", BenchmarkResult::CSV_HEADER).map_err(io_error(out_path))?;

    for len in prefix_lengths(&text) {
        let input = &text[..len];
        let recognized = recognizer.recognize(input);
        let (median_time_ns, mad_ns, iterations) = measure(|| recognizer.recognize(black_box(input)));
        let peak_memory_bytes = measure_peak_memory(|| recognizer.recognize(black_box(input)));

        let result = BenchmarkResult {
            input_length: len,
            median_time_ns,
            mad_ns,
            peak_memory_bytes,
            iterations,
            recognized,
        };
        println!(
            "  {:>8} bytes  {}  median {:.0} ns  mad {:.0} ns  ({} iterations)",
            len,
            if recognized { "yes" } else { "no " },
            result.median_time_ns,
            result.mad_ns,
            result.iterations
        );

        // Write result to CSV immediately
        writeln!(csv_file, "{}", result.to_csv_row()).map_err(io_error(out_path))?;
        csv_file.flush().map_err(io_error(out_path))?;
    }

    Ok(())
}

fn main() -> ExitCode {
    let matches = Command::new("benchmark_csv")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Measures CYK recognition time and memory over growing prefixes of a text")
        .arg(Arg::new("grammar").value_name("GRAMMAR").value_parser(value_parser!(PathBuf)).required(true))
        .arg(Arg::new("text").value_name("TEXT").value_parser(value_parser!(PathBuf)).required(true))
        .arg(Arg::new("out").value_name("OUT.csv").value_parser(value_parser!(PathBuf)))
        .get_matches();

    let default_out = PathBuf::from(DEFAULT_OUTPUT);
    let (Some(grammar_path), Some(text_path)) = (
        matches.get_one::<PathBuf>("grammar"),
        matches.get_one::<PathBuf>("text"),
    ) else {
        return ExitCode::FAILURE;
    };
    let out_path = matches.get_one::<PathBuf>("out").unwrap_or(&default_out);

    println!("Recognizer Benchmark Tool");
    println!("=========================");
    println!("  Warmup iterations: {}", WARMUP_ITERATIONS);
    println!("  Min iterations: {}", MIN_ITERATIONS);
    println!("  Max iterations: {}", MAX_ITERATIONS);
    println!("  Target time: {:?}", TARGET_TIME);

    match run_benchmarks(grammar_path, text_path, out_path) {
        Ok(()) => {
            println!("\nResults written to {}", out_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error running benchmarks: {}", e);
            ExitCode::FAILURE
        }
    }
}
