use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use heic_png::request::DEFAULT_OUTPUT_PREFIX;
use heic_png::{
    discover, ConversionRequest, PadColor, PngConverter, ProgressEvent, ProgressObserver,
    ResizeMode, RunOutcome, RunState, SchedulerOptions, StopSignal,
};
use serde_json::json;
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::{print_summary_report, BatchProgressBar};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::Level;

#[derive(Parser)]
#[command(name = "heic-png")]
#[command(version, about = "Batch HEIC/HEIF to lossless PNG converter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the HEIC/HEIF files a run would pick up
    Scan {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        recursion: RecursionArgs,

        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,
    },

    /// Convert every HEIC/HEIF file under INPUT into a new indexed output directory
    #[command(name = "run")]
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Input root; optional when --request names one
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Directory in which `<prefix><N>` is created
    #[arg(short, long, value_name = "DIR")]
    output_base: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_OUTPUT_PREFIX)]
    prefix: String,

    #[command(flatten)]
    recursion: RecursionArgs,

    /// 0 = fastest/largest, 9 = smallest/slowest; output is lossless either way
    #[arg(short = 'l', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=9))]
    compress_level: u8,

    #[arg(long, value_enum, default_value_t = ResizeMode::Keep)]
    resize: ResizeMode,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Let fit/pad enlarge images smaller than the target
    #[arg(long)]
    allow_upscale: bool,

    /// Pad background: #RRGGBB, #RGB, r,g,b, white or black
    #[arg(long, default_value = "white")]
    pad_color: String,

    /// Pool width (default: HEIC_PNG_WORKERS, else min(32, cores + 4))
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Continue into an existing output directory, skipping files already converted
    #[arg(long, value_name = "DIR")]
    resume_into: Option<PathBuf>,

    /// Load the request from a JSON file; INPUT and --output-base override its paths
    #[arg(long, value_name = "FILE")]
    request: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

/// `--recursive` / `--no-recursive`; the last one given wins, recursive by default.
#[derive(clap::Args, Clone, Copy)]
struct RecursionArgs {
    /// Descend into subdirectories of INPUT (default)
    #[arg(long, overrides_with = "no_recursive")]
    recursive: bool,

    /// Only look at direct children of INPUT
    #[arg(long, overrides_with = "recursive")]
    no_recursive: bool,
}

impl RecursionArgs {
    fn enabled(self) -> bool {
        !self.no_recursive
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

impl RunArgs {
    fn to_request(&self) -> anyhow::Result<ConversionRequest> {
        let mut request = match &self.request {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read request file: {}", path.display()))?;
                serde_json::from_str::<ConversionRequest>(&raw)
                    .with_context(|| format!("Invalid request file: {}", path.display()))?
            }
            None => ConversionRequest {
                output_prefix: self.prefix.clone(),
                recursive: self.recursion.enabled(),
                compress_level: self.compress_level,
                resize_mode: self.resize,
                target_width: self.width,
                target_height: self.height,
                avoid_upscale: !self.allow_upscale,
                pad_color: PadColor::parse_or_white(&self.pad_color),
                ..ConversionRequest::default()
            },
        };

        if let Some(input) = &self.input {
            request.input_root = input.clone();
        }
        if let Some(base) = &self.output_base {
            request.output_base = base.clone();
        }
        if request.input_root.as_os_str().is_empty() {
            bail!("no input directory given (pass INPUT or set input_root in --request)");
        }
        Ok(request)
    }
}

/// Terminal observer: progress bar plus errors printed above it.
struct CliObserver {
    bar: BatchProgressBar,
}

impl ProgressObserver for CliObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.completed as u64);

        let mut lines = event.message.lines();
        if let Some(first) = lines.next() {
            self.bar.set_message(first.to_string());
        }
        for extra in lines {
            self.bar.println(&format!("📂 {}", extra));
        }
    }

    fn on_error(&self, message: &str) {
        self.bar.println(&format!("{} {}", style("❌").red(), message));
    }

    fn on_done(&self, outcome: &RunOutcome) {
        self.bar.finish_with_message(&outcome.message);
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            input,
            recursion,
            output,
        } => {
            start_logging(LogConfig::default());
            scan(input, recursion.enabled(), output)
        }
        Commands::Run(args) => {
            let mut log_config = LogConfig::new();
            if let Some(dir) = &args.log_dir {
                log_config = log_config.with_log_dir(dir);
            }
            if args.verbose {
                log_config = log_config.with_level(Level::DEBUG);
            }
            start_logging(log_config);
            run(&args)
        }
    }
}

/// Logging failures are reported but never stop the command.
fn start_logging(config: LogConfig) {
    if let Err(e) = init_logging("heic_png", config) {
        eprintln!("⚠️  Logging disabled: {:#}", e);
    }
}

fn scan(input: PathBuf, recursive: bool, output: OutputFormat) -> anyhow::Result<ExitCode> {
    if !input.is_dir() {
        bail!("not a directory: {}", input.display());
    }
    let files = discover(&input, recursive);

    match output {
        OutputFormat::Human => {
            for f in &files {
                println!("{}", f.display());
            }
            println!(
                "\n{} HEIC/HEIF file(s) in {}{}",
                style(files.len()).green().bold(),
                input.display(),
                if recursive { " (recursive)" } else { "" }
            );
        }
        OutputFormat::Json => {
            let listed: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
            let report = json!({
                "root": input.display().to_string(),
                "recursive": recursive,
                "count": files.len(),
                "files": listed,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let request = args.to_request()?;
    let options = SchedulerOptions {
        workers: args.workers,
        resume_into: args.resume_into.clone(),
    };

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        if handler_stop.request_stop() {
            eprintln!("\n⏹️  Stop requested, letting started files finish (Ctrl+C again has no further effect)");
        }
    })
    .context("set Ctrl+C handler")?;

    let observer = CliObserver {
        bar: BatchProgressBar::new("HEIC→PNG", false),
    };

    let start = Instant::now();
    let outcome = heic_png::run_with(&request, &PngConverter, &options, &stop, &observer);
    drop(observer);

    if outcome.status != RunState::Failed || outcome.output_dir.is_some() {
        print_summary_report(&outcome.summary, start.elapsed(), "HEIC → PNG");
    }

    match (&outcome.status, &outcome.output_dir) {
        (RunState::Completed, Some(dir)) => {
            println!("\n✅ {}\n📁 Output: {}", outcome.message, dir.display());
            Ok(ExitCode::SUCCESS)
        }
        (RunState::Stopped, Some(dir)) => {
            println!("\n⏹️  {}\n📁 Partial output: {}", outcome.message, dir.display());
            Ok(ExitCode::from(2))
        }
        _ => {
            eprintln!("\n{} {}", style("❌ Failed:").red().bold(), outcome.message);
            if let Some(dir) = &outcome.output_dir {
                eprintln!("📁 Partial output: {}", dir.display());
            }
            Ok(ExitCode::from(1))
        }
    }
}
