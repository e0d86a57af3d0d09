use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::info;
use rand::seq::SliceRandom;
use serde::Serialize;
use tongs_bin::{NamedProgress, ProtocolArgs, RunSummary, init_logging_with_progress, run_trigger};
use tongs_core::memory::{AddressFunction, Allocation, DramAddr, DramContext, GeometryConfig};
use tongs_core::program::Program;
use tongs_core::retry;
use tongs_core::util::{GIB, Rng};
use tongs_trigger::WorkloadClient;

/// First aggressor row is placed after this row.
const FIRST_ROW: usize = 128;
/// Minimum distance between consecutive aggressor rows.
const ROW_SPACING: usize = 8;
/// Random extra distance between consecutive aggressor rows, exclusive.
const ROW_JITTER: usize = 8;

/// CLI arguments for the `ptrr` binary.
///
/// Hammers a few randomly spaced rows of one bank per iteration while the
/// oscilloscope records the command bus.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    #[clap(flatten)]
    protocol: ProtocolArgs,
    /// DRAM geometry configuration.
    #[clap(long = "config", default_value = "config/raptorlake-1rank.json")]
    config: String,
    /// Function whose value at the allocation base selects the subchannel.
    #[clap(long = "subchannel-func", default_value = "0xc3200")]
    subchannel_func: AddressFunction,
    /// Retry the allocation while its physical base is at or above this many GiB.
    #[clap(long = "phys-limit-gib", default_value = "16")]
    phys_limit_gib: usize,
    /// Measured iterations, each with a fresh set of aggressors.
    #[clap(long = "iterations", default_value = "512")]
    iterations: usize,
    /// Aggressor rows per iteration.
    #[clap(long = "aggressors", default_value = "2")]
    aggressors: usize,
    /// Total aggressor accesses per program execution.
    #[clap(long = "total-accesses", default_value = "8192")]
    total_accesses: usize,
    /// Capture rounds per iteration.
    #[clap(long = "captures", default_value = "4")]
    captures: usize,
    /// Program executions per capture round.
    #[clap(long = "executions", default_value = "256")]
    executions: usize,
    /// Execution index at which the trigger is sent in each round.
    #[clap(long = "trigger-exec", default_value = "64")]
    trigger_exec: usize,
    /// Pause between executions, in µs.
    #[clap(long = "between-execs-us", default_value = "20")]
    between_execs_us: u64,
    /// Pause after each capture round, in µs.
    #[clap(long = "after-round-us", default_value = "20000000")]
    after_round_us: u64,
    /// Pause before starting the acquisition, in s.
    #[clap(long = "pre-acquisition-s", default_value = "5")]
    pre_acquisition_s: u64,
    /// Seed of the aggressor placement, random if not given.
    #[clap(long = "seed")]
    seed: Option<u64>,
    /// Program listing written every iteration.
    #[clap(long = "program", default_value = "program.txt")]
    program: String,
    /// Run summary.
    #[clap(long = "summary", default_value = "run.json")]
    summary: String,
}

/// Picks `count` rows with increasing gaps after [`FIRST_ROW`] in random order.
fn pick_aggressors<R: rand::Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<usize> {
    let mut rows = Vec::with_capacity(count);
    let mut last = FIRST_ROW;
    while rows.len() < count {
        last += ROW_SPACING + rng.random_range(0..ROW_JITTER);
        rows.push(last);
    }
    rows.shuffle(rng);
    rows
}

fn build_program(ctx: &DramContext, subchannel: usize, rows: &[usize], repetitions: usize) -> Program {
    let mut prog = Program::new();
    for _ in 0..repetitions {
        for &row in rows {
            prog.push_access(ctx.to_virt(&DramAddr::new(subchannel, 0, 0, 0, row, row)));
        }
    }
    prog
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    if args.protocol.trigger {
        return run_trigger(&args.protocol);
    }
    info!("CLI args: {:?}", args);

    let config = GeometryConfig::from_jsonfile(&args.config)?;
    let phys_limit = args.phys_limit_gib * GIB;

    // rejected superpages stay mapped so the kernel hands out a different one
    let mut rejected = Vec::new();
    let allocation = retry!(|| {
        let allocation = match Allocation::allocate(1) {
            Ok(allocation) => allocation,
            Err(e) => return Ok(Err(e)),
        };
        let phys = allocation.virt_to_phys(allocation.base());
        info!("allocation phys ptr is {:?}", phys);
        match phys {
            Some(phys) if phys.as_usize() < phys_limit => Ok(Ok(allocation)),
            _ => {
                rejected.push(allocation);
                Err(format!("allocation was outside {} GiB", args.phys_limit_gib))
            }
        }
    })?;
    drop(rejected);

    let phys_base = allocation
        .virt_to_phys(allocation.base())
        .map_or(0, |p| p.as_u64());
    let subchannel = args.subchannel_func.apply_to(phys_base) as usize;
    info!("chosen subchannel is {}", subchannel);

    let ctx = DramContext::new(allocation, &config)?;
    let mut rng = args.seed.map_or_else(Rng::from_entropy, Rng::from_seed);
    let seed = rng.seed();
    RunSummary::new(&args, seed, &config).save_to_file(&args.summary)?;

    let acquisition = args.protocol.acquisition();
    let mut client = WorkloadClient::new(args.protocol.fifo_paths())?;
    client.send_ready_to_runner()?;

    let repetitions = args.total_accesses / args.aggressors.max(1);
    info!("aggressors         = {}", args.aggressors);
    info!("total accesses     = {}", args.total_accesses);
    info!("pattern iterations = {}", repetitions);

    let bar = progress.add(ProgressBar::new(args.iterations as u64));
    bar.set_style(ProgressStyle::named_bar("Iterations"));
    for _ in 0..args.iterations {
        let rows = pick_aggressors(args.aggressors, &mut rng);
        let prog = build_program(&ctx, subchannel, &rows, repetitions);
        prog.check_bounds(ctx.allocation())?;
        info!("program built for rows {}", rows.iter().join(", "));

        let mut iteration = client.wait_for_trigger()?;

        prog.write_to_file(&args.program, &ctx)?;
        thread::sleep(Duration::from_secs(args.pre_acquisition_s));
        acquisition.start()?;

        for round in 0..args.captures {
            info!("execution round {}", round);
            for j in 0..args.executions {
                if j == args.trigger_exec {
                    iteration.send_trigger()?;
                }
                thread::sleep(Duration::from_micros(args.between_execs_us));
                // SAFETY: bounds checked against the allocation owned by `ctx`
                unsafe { prog.execute() };
            }
            thread::sleep(Duration::from_micros(args.after_round_us));
        }

        acquisition.stop()?;
        iteration.finish()?;
        bar.inc(1);
    }
    bar.finish();

    info!("workload completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tongs_core::memory::{Chunk, PhysAddr, VirtAddr};

    #[test]
    fn test_pick_aggressors_spacing() {
        let mut rng = Rng::from_seed(1);
        for _ in 0..100 {
            let mut rows = pick_aggressors(4, &mut rng);
            rows.sort();
            let mut last = FIRST_ROW;
            for row in rows {
                assert!(row >= last + ROW_SPACING);
                assert!(row < last + ROW_SPACING + ROW_JITTER);
                last = row;
            }
        }
    }

    #[test]
    fn test_build_program_stays_in_bank() -> Result<()> {
        let config = GeometryConfig::from_jsonfile(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../config/raptorlake-1rank.json"
        ))?;
        let base = VirtAddr::new(0x7f00_0000_0000);
        let chunk = Chunk {
            virt: base,
            phys: PhysAddr::new(3 * GIB),
        };
        let ctx = DramContext::new(Allocation::from_parts(base, GIB, vec![chunk])?, &config)?;
        let prog = build_program(&ctx, 1, &[140, 150], 8);
        assert_eq!(prog.len(), 8 * 2 * 3);
        prog.check_bounds(ctx.allocation())?;
        for addr in prog.instructions().iter().filter_map(|i| i.addr()) {
            let dram = ctx.from_virt(addr);
            assert_eq!((dram.subchannel, dram.bank_group, dram.bank), (1, 0, 0));
            assert!(dram.row == 140 || dram.row == 150);
        }
        Ok(())
    }
}
