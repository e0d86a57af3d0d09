//! # Tongs experiment binaries
//!
//! Shared plumbing for the `bitflip` and `ptrr` workloads: logging bridged with
//! progress bars, the command line options of the trigger protocol, the external
//! acquisition script, the trigger mode and the `run.json` summary.
//!
//! Both binaries run in two roles. Without `--trigger` they are the workload; the
//! runner script starts them once, waits for `WORKLOAD_READY` and then spawns
//! the same binary with `--trigger` once per iteration.

#[macro_use]
extern crate log;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};
use clap::Args;
use indicatif::{MultiProgress, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use serde::Serialize;
use tongs_trigger::{FifoPaths, SerialRts, TriggerProcess};

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Extension trait for creating named progress bars.
pub trait NamedProgress {
    /// Creates a progress bar style with a name label.
    fn named_bar(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    fn named_bar(name: &str) -> Self {
        let fmt = format!(
            "{:<31} {{wide_bar:40.cyan/blue}} {{pos:>5}}/{{len:<5}} [{{elapsed_precise}} ({{eta}} remaining)] {{msg}}",
            name
        );
        ProgressStyle::default_bar()
            .template(&fmt)
            .unwrap_or(ProgressStyle::default_bar())
    }
}

/// Options of the trigger protocol shared by all workloads.
#[derive(Args, Debug, Serialize, Clone)]
pub struct ProtocolArgs {
    /// Run the trigger process for one iteration instead of the workload.
    #[clap(long = "trigger")]
    pub trigger: bool,
    /// Serial device whose RTS line drives the oscilloscope trigger.
    #[clap(long = "trigger-device", default_value = "/dev/ttyUSB0")]
    pub trigger_device: PathBuf,
    /// CPU the trigger process is pinned to, away from the workload.
    #[clap(long = "trigger-cpu", default_value = "3")]
    pub trigger_cpu: usize,
    /// Directory holding the three FIFOs, `/tmp` if not given.
    #[clap(long = "fifo-dir")]
    pub fifo_dir: Option<PathBuf>,
    /// Interpreter of the acquisition script.
    #[clap(long = "acquire-python", default_value = "./decoder/venv/bin/python3")]
    pub acquire_python: PathBuf,
    /// Acquisition script, called with `--start` and `--stop`.
    #[clap(long = "acquire-script", default_value = "./decoder/acquire.py")]
    pub acquire_script: PathBuf,
}

impl ProtocolArgs {
    pub fn fifo_paths(&self) -> FifoPaths {
        match &self.fifo_dir {
            Some(dir) => FifoPaths::in_dir(dir),
            None => FifoPaths::default(),
        }
    }

    pub fn acquisition(&self) -> Acquisition {
        Acquisition::new(&self.acquire_python, &self.acquire_script)
    }
}

/// Runs one iteration of the trigger process and exits the trigger role.
///
/// The process is pinned to `args.trigger_cpu` with the highest scheduling
/// priority so pulses follow the workload commands without delay.
pub fn run_trigger(args: &ProtocolArgs) -> anyhow::Result<()> {
    pin_to_cpu(args.trigger_cpu)?;
    raise_priority()?;
    let line = SerialRts::open(&args.trigger_device)
        .with_context(|| format!("could not open trigger device {:?}", args.trigger_device))?;
    let mut process = TriggerProcess::new(args.fifo_paths(), line);
    let stats = process.run()?;
    if stats.invalid > 0 {
        warn!("ignored {} invalid command(s)", stats.invalid);
    }
    Ok(())
}

fn pin_to_cpu(cpu: usize) -> anyhow::Result<()> {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe { libc::CPU_SET(cpu, &mut set) };
    let ret = unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("could not pin trigger process to CPU {}", cpu));
    }
    debug!("trigger pinned to CPU {}", cpu);
    Ok(())
}

fn raise_priority() -> anyhow::Result<()> {
    // PRIO_MIN
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -20) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("setpriority failed");
    }
    Ok(())
}

/// The external oscilloscope acquisition script.
///
/// Calls are synchronous: `start` returns once the scope is armed.
#[derive(Debug, Clone)]
pub struct Acquisition {
    python: PathBuf,
    script: PathBuf,
}

impl Acquisition {
    pub fn new<P: AsRef<Path>, S: AsRef<Path>>(python: P, script: S) -> Self {
        Acquisition {
            python: python.as_ref().to_path_buf(),
            script: script.as_ref().to_path_buf(),
        }
    }

    pub fn start(&self) -> anyhow::Result<()> {
        info!("starting acquisition");
        self.call("--start")
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.call("--stop")?;
        info!("stopped acquisition");
        Ok(())
    }

    fn call(&self, arg: &str) -> anyhow::Result<()> {
        let status = Command::new(&self.python)
            .arg(&self.script)
            .arg(arg)
            .status()
            .with_context(|| format!("could not run {:?} {}", self.script, arg))?;
        if !status.success() {
            bail!("{:?} {} exited with {}", self.script, arg, status);
        }
        Ok(())
    }
}

/// Summary of a workload run, written as `run.json` before the first iteration.
#[derive(Debug, Serialize)]
pub struct RunSummary<A: Serialize, T: Serialize> {
    /// RFC 3339 start time
    pub started: String,
    pub args: A,
    pub seed: u64,
    pub targets: T,
}

impl<A: Serialize, T: Serialize> RunSummary<A, T> {
    pub fn new(args: A, seed: u64, targets: T) -> Self {
        RunSummary {
            started: chrono::Local::now().to_rfc3339(),
            args,
            seed,
            targets,
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("could not create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("run summary saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[clap(flatten)]
        protocol: ProtocolArgs,
    }

    #[test]
    fn test_protocol_defaults() {
        let cli = Cli::parse_from(["test"]);
        assert!(!cli.protocol.trigger);
        assert_eq!(cli.protocol.trigger_device, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(cli.protocol.fifo_paths(), FifoPaths::default());
    }

    #[test]
    fn test_fifo_dir() {
        let cli = Cli::parse_from(["test", "--trigger", "--fifo-dir", "/run/tongs"]);
        assert!(cli.protocol.trigger);
        assert_eq!(
            cli.protocol.fifo_paths().workload2trigger,
            PathBuf::from("/run/tongs/workload2trigger")
        );
    }

    #[test]
    fn test_acquisition_reports_failure() {
        let acq = Acquisition::new("/nonexistent/python3", "acquire.py");
        assert!(acq.start().is_err());
    }

    #[test]
    fn test_run_summary_json() -> anyhow::Result<()> {
        let summary = RunSummary::new("args", 42, vec![1, 2]);
        let json = serde_json::to_value(&summary)?;
        assert_eq!(json["seed"], 42);
        assert_eq!(json["targets"], serde_json::json!([1, 2]));
        assert!(chrono::DateTime::parse_from_rfc3339(&summary.started).is_ok());
        Ok(())
    }
}
