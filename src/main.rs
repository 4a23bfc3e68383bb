// CLI front end: argument validation, logging setup, exit-code mapping.
// Benchmark result lines go to stdout; everything else goes to stderr.

use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};

use fmax_bench::runner::{self, SizeClass};
use fmax_bench::{cpu, Config, MemOrder, RunError, StressConfig, Variant};

const EXIT_CONFIG: u8 = 1;
const EXIT_PIN: u8 = 2;
const EXIT_CALIBRATION: u8 = 3;

#[derive(Parser)]
#[command(
   name = "fmax-bench",
   about = "Fetch-max contention benchmark runner",
   after_help = "Notes:\n\
      1. benchmark results go to stdout, other messages to stderr\n\
      2. samples from core 0 are assumed to be noisy and are ignored"
)]
struct Cli {
   #[command(subcommand)]
   command: Command,
}

#[derive(Subcommand)]
enum Command {
   /// Benchmark one fetch-max variant under lock-step contention
   Fmax(FmaxArgs),
   /// Fill the fetch-max queue from every core until it reports full
   Stress(StressArgs),
}

#[derive(Args)]
struct FmaxArgs {
   /// Number of cores to run on (pins to 1, 2, etc., to 0 only in the
   /// last resort)
   #[arg(short = 'c', long = "cores")]
   cores: usize,

   /// fetch-max implementation to benchmark
   #[arg(short = 't', long, value_enum, default_value_t = Variant::Strong)]
   variant: Variant,

   /// Number of iterations, at least 100
   #[arg(short = 'i', long, default_value_t = 1_000_000)]
   iters: u64,

   /// Random seed, derived from the clock when unset
   #[arg(short = 's', long)]
   seed: Option<u64>,

   /// Maximum sigma (ns) accepted by calibration
   #[arg(short = 'm', long, default_value_t = 1.0)]
   max_sigma: f64,

   /// Memory ordering requested for every fetch-max call
   #[arg(short = 'r', long, value_enum, default_value_t = MemOrder::SeqCst)]
   order: MemOrder,
}

#[derive(Args)]
struct StressArgs {
   /// Number of cores to run on
   #[arg(short = 'c', long = "cores")]
   cores: usize,

   /// fetch-max implementation driving the queue cursor
   #[arg(short = 't', long, value_enum, default_value_t = Variant::Strong)]
   variant: Variant,

   /// Queue capacity class
   #[arg(long, value_enum, default_value_t = SizeClass::Small)]
   size: SizeClass,
}

/// CPUs 1..=cores, wrapping so CPU 0 is only used when every core is
/// requested. CPU 1 is the first isolated one on the benchmark hosts.
fn select_cpus(cores: usize, detected: usize) -> Vec<usize> {
   (1..=cores).map(|j| j % detected).collect()
}

fn validate_cores(cores: usize, detected: usize) -> Result<()> {
   if cores < 1 {
      bail!("out of range (too low): --cores {cores}");
   }
   if cores > detected {
      bail!("out of range (too high): --cores {cores}, detected {detected}");
   }
   Ok(())
}

fn clock_seed() -> u64 {
   let nanos = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_nanos();
   nanos as u64 & u64::from(u32::MAX)
}

fn build_config(args: &FmaxArgs) -> Result<Config> {
   let detected = cpu::count_cpus();
   validate_cores(args.cores, detected)?;
   if args.iters < 100 {
      bail!("out of range (too low): --iters {}", args.iters);
   }
   if args.max_sigma <= 0.0 {
      bail!("out of range (too low): --max-sigma {}", args.max_sigma);
   }

   Ok(Config {
      variant: args.variant,
      order: args.order,
      cpus: select_cpus(args.cores, detected),
      iters: args.iters,
      seed: args.seed.unwrap_or_else(clock_seed),
      max_sigma: args.max_sigma,
   })
}

fn exit_for(err: &RunError) -> ExitCode {
   match err {
      RunError::Pin => ExitCode::from(EXIT_PIN),
      RunError::Calibration { .. } => ExitCode::from(EXIT_CALIBRATION),
   }
}

fn run_fmax(args: &FmaxArgs) -> ExitCode {
   let config = match build_config(args) {
      Ok(config) => config,
      Err(err) => {
         error!("{err:#}");
         return ExitCode::from(EXIT_CONFIG);
      }
   };

   info!(
      "Will use: {} core(s), {} implementation, {} operation, {} iterations, {} max. sigma, {} seed",
      config.cpus.len(),
      config.variant,
      config.order,
      config.iters,
      config.max_sigma,
      config.seed
   );

   match runner::run(&config) {
      Ok(report) => {
         println!("{}\t{}\t{}", report.cores, report.mean, report.stdev);
         ExitCode::SUCCESS
      }
      Err(err) => {
         error!("{err}");
         exit_for(&err)
      }
   }
}

fn run_stress(args: &StressArgs) -> ExitCode {
   let detected = cpu::count_cpus();
   if let Err(err) = validate_cores(args.cores, detected) {
      error!("{err:#}");
      return ExitCode::from(EXIT_CONFIG);
   }

   let config = StressConfig {
      variant: args.variant,
      cpus: select_cpus(args.cores, detected),
      size: args.size,
   };

   info!(
      "Will use: {} core(s), {} implementation, {} queue slots",
      config.cpus.len(),
      config.variant,
      config.size.slots()
   );

   match runner::run_stress(&config) {
      Ok(report) => {
         println!(
            "{}\t{}\t{} ({})",
            report.cores, report.mean, report.stdev, report.starved
         );
         ExitCode::SUCCESS
      }
      Err(err) => {
         error!("{err}");
         exit_for(&err)
      }
   }
}

fn main() -> ExitCode {
   env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

   let cli = Cli::parse();
   match &cli.command {
      Command::Fmax(args) => run_fmax(args),
      Command::Stress(args) => run_stress(args),
   }
}
