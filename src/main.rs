//! Command-line entry point.
//!
//! ```bash
//! # Benchmark the configured target once
//! pktprobe --config pktprobe.toml --output results/
//!
//! # With the optimization loop enabled in the config file, the baseline
//! # run is followed by every configured step
//! pktprobe --config pktprobe.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use pktprobe::affinity::{AffinityGuard, AffinityResult};
use pktprobe::optimize::{OptimizationLoop, ShellBuildDriver, StepDecision};
use pktprobe::recorder::{RunRecorder, RunTag, RunTable};
use pktprobe::sampling::{CancelFlag, Sampler};
use pktprobe::target::{ShellLauncher, TargetController};
use pktprobe::{report, sources, Config};

/// Out-of-band benchmarking and optimization of packet-processing
/// applications
#[derive(Parser, Debug)]
#[command(name = "pktprobe")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "pktprobe.toml")]
    config: PathBuf,

    /// Output directory for CSV exports
    #[arg(short, long, default_value = "results")]
    output: PathBuf,

    /// Suppress the banner and progress bars
    #[arg(short, long)]
    quiet: bool,
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT into the cancel flag so a run in flight winds down
/// through the normal revert path instead of dying mid-window.
fn install_interrupt_watch(cancel: CancelFlag) {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    });
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "configuration error:".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "fatal:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args, config: &Config) -> Result<()> {
    if !args.quiet {
        banner(config);
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("cannot create output directory {}", args.output.display()))?;

    let cancel = CancelFlag::new();
    install_interrupt_watch(cancel.clone());

    let _pin = match AffinityGuard::pin_to(config.app.test_core) {
        AffinityResult::Pinned(guard) => Some(guard),
        AffinityResult::NotPinned { reason } => {
            tracing::warn!("running unpinned: {}", reason);
            None
        }
    };

    let controller = TargetController::new(ShellLauncher, config.startup(), config.grace());
    let sampler = Sampler::new(config.runtime(), config.step());

    let recorder = match config.plan() {
        Some(plan) => {
            let mut builder = ShellBuildDriver;
            let mut factory = || sources::from_config(config);
            let mut looper =
                OptimizationLoop::new(&controller, &mut builder, sampler, cancel.clone());

            let progress = spinner_progress(args.quiet, "running optimization steps");
            let outcome = looper.run(&plan, &mut factory);
            progress.finish();
            let outcome = outcome?;

            if !args.quiet {
                println!();
                for step in &outcome.reports {
                    let verdict = match step.decision {
                        StepDecision::Kept => "kept".green().bold(),
                        StepDecision::Reverted => "reverted".yellow(),
                        StepDecision::NotApplicable => "not applicable".red(),
                    };
                    let candidate = step
                        .candidate
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {:<28} {:<16} baseline {:>12}  candidate {:>12}",
                        step.name, verdict, step.baseline, candidate
                    );
                }
                println!(
                    "\n{} {} of {} steps kept",
                    "done:".green().bold(),
                    outcome.kept_count(),
                    outcome.reports.len()
                );
            }
            outcome.recorder
        }
        None => {
            let window = window_progress(args.quiet, config.startup() + config.runtime());
            let result = controller.execute_run(&config.app.launch_cmd, || {
                let mut set = sources::from_config(config);
                sampler.run(&mut set, &cancel)
            });
            window.finish();
            let run = result?;

            if !args.quiet {
                println!();
                print!("{}", report::render_summary(&RunTable::from_run(&run)));
                if !run.valid {
                    println!("{}", "run incomplete: window not fully covered".yellow());
                }
            }
            let mut recorder = RunRecorder::new();
            recorder.record("baseline", RunTag::Baseline, run);
            recorder
        }
    };

    export(&args.output, &recorder)?;
    Ok(())
}

fn banner(config: &Config) {
    println!(
        "{} {}",
        "pktprobe".cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("  target:   {}", config.app.launch_cmd);
    println!(
        "  window:   {}s warm-up, {}s measured, {}ms step",
        config.app.startup_secs, config.app.runtime_secs, config.app.step_millis
    );
    println!(
        "  cores:    {:?} (control on {})",
        config.app.cores, config.app.test_core
    );
    if config.optimization.enabled {
        println!("  steps:    {}", config.optimization.steps.len());
    }
    println!();
}

/// Elapsed-time progress bar for one measurement window, driven by a
/// background thread while the controller blocks.
struct WindowProgress {
    stop: std::sync::Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Spinner for the optimization path, where the number of windows and
/// rebuilds is not known up front.
fn spinner_progress(quiet: bool, msg: &'static str) -> WindowProgress {
    let stop = std::sync::Arc::new(AtomicBool::new(false));
    if quiet {
        return WindowProgress { stop, thread: None };
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(msg);

    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            bar.tick();
            std::thread::sleep(Duration::from_millis(120));
        }
        bar.finish_and_clear();
    });
    WindowProgress {
        stop,
        thread: Some(thread),
    }
}

fn window_progress(quiet: bool, window: Duration) -> WindowProgress {
    let stop = std::sync::Arc::new(AtomicBool::new(false));
    if quiet {
        return WindowProgress { stop, thread: None };
    }

    let bar = ProgressBar::new(window.as_secs().max(1));
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || {
        let start = Instant::now();
        while !stop_flag.load(Ordering::SeqCst) {
            let elapsed = start.elapsed().as_secs().min(bar.length().unwrap_or(0));
            bar.set_position(elapsed);
            std::thread::sleep(Duration::from_millis(200));
        }
        bar.finish_and_clear();
    });
    WindowProgress {
        stop,
        thread: Some(thread),
    }
}

impl WindowProgress {
    fn finish(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread {
            let _ = thread.join();
        }
    }
}

/// Write one CSV per recorded run, numbered in session order.
fn export(dir: &std::path::Path, recorder: &RunRecorder) -> Result<()> {
    for (index, recorded) in recorder.runs().iter().enumerate() {
        let slug: String = recorded
            .label
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let path = dir.join(format!("{:02}-{}.csv", index, slug));
        report::csv_to_file(&path, &RunTable::from_run(&recorded.run))
            .with_context(|| format!("cannot write {}", path.display()))?;
        tracing::info!(path = %path.display(), tag = ?recorded.tag, "run exported");
    }
    Ok(())
}
