//! gil - Gillespie direct-method simulator
//!
//! CLI Usage:
//!   gil model.gil                       # 1000 samples over t in [0, 1]
//!   gil --stop 50 --npp 0 model         # every step up to t = 50
//!   gil --mid A --mthresh 0 --mdelay 2 model.gil
//!
//! With `--mthresh`, the run continues until the `--mid` molecule passes
//! through the threshold (in either direction), then for exactly `--mdelay`
//! more time units. The delay replaces the stop time, so it can also extend
//! the run past `--stop`.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use gilrs::{Monitor, Recorder, StepRecord, load_file};

const TIME_WIDTH: usize = 9;
const MIN_COUNT_WIDTH: usize = 7;
const DEFAULT_PLOT_POINTS: u32 = 1000;

struct Cli {
    file: String,
    stop_time: Option<f64>,
    monitor_id: Option<String>,
    monitor_threshold: Option<f64>,
    monitor_delay: f64,
    plot_points: Option<u32>,
    seed: Option<u64>,
    options_file: Option<String>,
    trace: Option<String>,
    verbose: bool,
}

fn usage() {
    println!("Usage: gil [options] <fileName>");
    println!();
    println!("Options:");
    println!("  --stop T        Stop time (default: 1.0)");
    println!("  --mid ID        Molecule to monitor");
    println!("  --mthresh X     Monitor threshold");
    println!("  --mdelay D      Time to keep running after the threshold (default: 0)");
    println!("  --npp N         Number of plot points, 0 for every step (default: 1000)");
    println!("  --seed S        Seed for the random number generator");
    println!("  --options FILE  JSON file with run options");
    println!("  --trace LEVEL   Log level: error, warn, info, debug, trace (default: warn)");
    println!("  --verbose       Print the molecule and reaction tables first");
    println!("  --help, -h      Show this help");
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(text: &str, flag: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("invalid value for {flag}: {text}"))
}

fn parse_args(args: &[String]) -> Result<Option<Cli>, String> {
    let mut cli = Cli {
        file: String::new(),
        stop_time: None,
        monitor_id: None,
        monitor_threshold: None,
        monitor_delay: 0.0,
        plot_points: None,
        seed: None,
        options_file: None,
        trace: None,
        verbose: false,
    };
    let mut files = Vec::new();
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--stop" | "-stop" => cli.stop_time = Some(number(value(args, &mut i, flag)?, flag)?),
            "--mid" | "-mid" => cli.monitor_id = Some(value(args, &mut i, flag)?.to_string()),
            "--mthresh" | "-mthresh" => {
                cli.monitor_threshold = Some(number(value(args, &mut i, flag)?, flag)?)
            }
            "--mdelay" | "-mdelay" => cli.monitor_delay = number(value(args, &mut i, flag)?, flag)?,
            "--npp" | "-npp" => cli.plot_points = Some(number(value(args, &mut i, flag)?, flag)?),
            "--seed" => cli.seed = Some(number(value(args, &mut i, flag)?, flag)?),
            "--options" => cli.options_file = Some(value(args, &mut i, flag)?.to_string()),
            "--trace" | "-t" => cli.trace = Some(value(args, &mut i, flag)?.to_string()),
            "--verbose" | "-verbose" => cli.verbose = true,
            "--help" | "-h" | "-help" => return Ok(None),
            _ if flag.starts_with('-') => return Err(format!("unknown option: {flag}")),
            _ => files.push(flag.to_string()),
        }
        i += 1;
    }
    match files.len() {
        1 => cli.file = files.remove(0),
        0 => return Err("no network description file given".into()),
        _ => return Err(format!("expected one file, got {}", files.len())),
    }
    Ok(Some(cli))
}

/// Streams samples as a fixed-width table: `t` then one column per molecule.
///
/// When tracing steps, the rows a step emits are held back until the step
/// reports its reaction, which is appended to the first of them.
struct TableWriter<W: Write> {
    out: W,
    widths: Vec<usize>,
    reactions: Vec<(String, String)>,
    trace_steps: bool,
    step_rows: Vec<String>,
    error: Option<io::Error>,
}

impl<W: Write> TableWriter<W> {
    fn new(out: W, ids: &[&str], reactions: Vec<(String, String)>) -> Self {
        Self {
            out,
            widths: ids
                .iter()
                .map(|id| MIN_COUNT_WIDTH.max(id.len() + 1))
                .collect(),
            reactions,
            trace_steps: false,
            step_rows: Vec::new(),
            error: None,
        }
    }

    fn header(&mut self, ids: &[&str]) {
        let mut line = format!("{:>w$}", "t", w = TIME_WIDTH);
        for (id, width) in ids.iter().zip(self.widths.iter().copied()) {
            line.push_str(&format!("{id:>width$}"));
        }
        self.write(format_args!("{line}\n"));
    }

    fn write(&mut self, args: std::fmt::Arguments<'_>) {
        if self.error.is_none() {
            if let Err(err) = self.out.write_fmt(args) {
                self.error = Some(err);
            }
        }
    }

    fn flush_step_rows(&mut self, annotation: Option<String>) {
        let rows = std::mem::take(&mut self.step_rows);
        for (i, row) in rows.iter().enumerate() {
            match (&annotation, i) {
                (Some(note), 0) => self.write(format_args!("{row}{note}\n")),
                _ => self.write(format_args!("{row}\n")),
            }
        }
    }

    fn finish(mut self) -> io::Result<()> {
        self.flush_step_rows(None);
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()
    }
}

impl<W: Write> Recorder for TableWriter<W> {
    fn record_sample(&mut self, time: f64, counts: &[u32]) {
        let mut line = format!("{:w$.4}", time, w = TIME_WIDTH);
        for (count, width) in counts.iter().zip(self.widths.iter().copied()) {
            line.push_str(&format!("{count:width$}"));
        }
        if self.trace_steps {
            self.step_rows.push(line);
        } else {
            self.write(format_args!("{line}\n"));
        }
    }

    fn record_step(&mut self, step: &StepRecord) {
        if self.step_rows.is_empty() {
            return;
        }
        let note = match step.reaction {
            Some(r) => {
                let (id, formula) = &self.reactions[r];
                format!(" [{id}] {formula}")
            }
            None => " (no reaction)".to_string(),
        };
        self.flush_step_rows(Some(note));
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let model = load_file(&cli.file)?;
    let (mut sim, mut options) = model.into_simulation()?;

    if let Some(path) = &cli.options_file {
        options = options.with_json_file(path)?;
    }
    if let Some(stop) = cli.stop_time {
        options.stop_time = stop;
    }
    // an options file keeps its own plot interval unless --npp is given
    let plot_points = match (cli.plot_points, &cli.options_file) {
        (Some(n), _) => Some(n),
        (None, None) => Some(DEFAULT_PLOT_POINTS),
        (None, Some(_)) => None,
    };
    if let Some(n) = plot_points {
        options.plot_interval = if n == 0 {
            0.0
        } else {
            options.stop_time / n as f64
        };
    }
    if let (Some(molecule), Some(threshold)) = (&cli.monitor_id, cli.monitor_threshold) {
        options.monitor = Some(Monitor {
            molecule: molecule.clone(),
            threshold,
            delay: cli.monitor_delay,
        });
    } else if cli.monitor_id.is_some() != cli.monitor_threshold.is_some() {
        log::warn!("--mid and --mthresh must be given together; monitoring disabled");
    }
    if cli.seed.is_some() {
        options.seed = cli.seed;
    }
    options.trace_steps |= log::log_enabled!(log::Level::Debug);

    let network = sim.network();
    if cli.verbose {
        println!("{}", network.molecule_table());
        println!("{}", network.reaction_table());
    }

    let ids: Vec<&str> = network.molecules().iter().map(|m| m.id()).collect();
    let reactions = network
        .reactions()
        .iter()
        .map(|r| (r.id().to_string(), r.formula().to_string()))
        .collect();
    let mut writer = TableWriter::new(BufWriter::new(io::stdout().lock()), &ids, reactions);
    writer.header(&ids);
    writer.trace_steps = options.trace_steps;

    let summary = sim.run(&options, &mut writer)?;
    writer.finish()?;
    if let Some(at) = summary.threshold_reached_at {
        log::info!("threshold reached at t={:.4}", at);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            usage();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("gil: {message}");
            usage();
            return ExitCode::FAILURE;
        }
    };

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = &cli.trace {
        logger.parse_filters(level);
    }
    logger.init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gil: {err}");
            ExitCode::FAILURE
        }
    }
}
