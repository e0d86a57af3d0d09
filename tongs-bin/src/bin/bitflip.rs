use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::Serialize;
use tongs_bin::{NamedProgress, ProtocolArgs, RunSummary, init_logging_with_progress, run_trigger};
use tongs_core::memory::{
    AddressGenerator, Allocation, DEFAULT_GOOD_ADDR_ITERATIONS, FunctionConstraint, access,
    bit_distribution, shuffle_in_windows,
};
use tongs_core::util::{MIB, Rng};
use tongs_trigger::WorkloadClient;

/// Targets are shuffled within windows of this size.
const SHUFFLE_WINDOW: usize = 512;

/// CLI arguments for the `bitflip` binary.
///
/// Picks principal addresses, derives every single-bit neighbour in DRAM linear
/// space and accesses one address per measured iteration.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    #[clap(flatten)]
    protocol: ProtocolArgs,
    /// Number of 1 GiB superpages to allocate.
    #[clap(long = "superpages", required_unless_present = "trigger")]
    superpages: Option<usize>,
    /// Number of principal addresses.
    #[clap(long = "num", default_value = "1")]
    num: usize,
    /// Prefer principal addresses that allow as many bit flips as possible (far from random).
    #[clap(long = "good-addr")]
    good_addr: bool,
    /// Samples drawn per principal address with `--good-addr`.
    #[clap(long = "good-addr-iterations", default_value_t = DEFAULT_GOOD_ADDR_ITERATIONS)]
    good_addr_iterations: usize,
    /// DRAM offset in MiB (dram_addr = phys_addr - offset).
    #[clap(long = "offset", default_value = "0", allow_hyphen_values = true)]
    offset_mib: i64,
    /// Keep this function fixed by flipping additional bits, e.g. `0xc3200=1`.
    #[clap(long = "keep-fixed")]
    keep_fixed: Option<FunctionConstraint>,
    /// Seed of the address sampler, random if not given.
    #[clap(long = "seed")]
    seed: Option<u64>,
    /// Accesses per iteration.
    #[clap(long = "accesses", default_value = "12000000")]
    accesses: usize,
    /// Trigger commands per iteration, spread evenly over the accesses.
    #[clap(long = "triggers", default_value = "3")]
    triggers: usize,
    /// Pause between opening the trigger channel and the first access, in ms.
    #[clap(long = "settle-ms", default_value = "500")]
    settle_ms: u64,
    /// Per-iteration configuration record.
    #[clap(long = "exp-cfg", default_value = "exp_cfg.csv")]
    exp_cfg: String,
    /// Run summary.
    #[clap(long = "summary", default_value = "run.json")]
    summary: String,
}

impl CliArgs {
    /// Checks the workload arguments and returns the number of superpages.
    fn validate(&self) -> Result<usize> {
        let superpages = self
            .superpages
            .context("--superpages is required unless --trigger is given")?;
        ensure!(superpages > 0, "--superpages must be at least 1");
        ensure!(self.triggers > 0, "--triggers must be at least 1");
        ensure!(
            self.triggers <= self.accesses,
            "--triggers ({}) exceeds --accesses ({})",
            self.triggers,
            self.accesses
        );
        Ok(superpages)
    }
}

/// Access indices at which a trigger is sent, evenly spread over `accesses`.
///
/// Requires `triggers <= accesses`, so every index is distinct.
fn trigger_points(accesses: usize, triggers: usize) -> Vec<usize> {
    (0..triggers).map(|k| k * accesses / triggers).collect()
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    if args.protocol.trigger {
        return run_trigger(&args.protocol);
    }
    info!("CLI args: {:?}", args);

    let superpages = args.validate()?;
    let constraints: Vec<FunctionConstraint> = args.keep_fixed.into_iter().collect();
    let dram_offset = args.offset_mib * MIB as i64;
    info!("running workload");
    info!("    {} superpages", superpages);
    info!("    {} principal addresses", args.num);
    if args.good_addr {
        info!("    using addresses which allow for many bit flips");
    }
    info!("    DRAM offset of {:#x} ({} MiB)", dram_offset, args.offset_mib);
    for c in &constraints {
        info!("    function constraint: {}", c);
    }

    let allocation = Allocation::allocate(superpages)?;
    let rng = args.seed.map_or_else(Rng::from_entropy, Rng::from_seed);
    let seed = rng.seed();
    info!("sampler seed {}", seed);
    let mut generator = AddressGenerator::new(&allocation, dram_offset, rng);

    let mut targets = Vec::new();
    for _ in 0..args.num {
        let principal = if args.good_addr {
            generator.get_good_addr(&constraints, args.good_addr_iterations)?
        } else {
            generator.get_random_addr(&constraints)?
        };
        let neighbours = generator.flip_neighbours(principal, &constraints)?;
        debug!(
            "principal {:p} with {} neighbours",
            principal,
            neighbours.len() - 2
        );
        targets.extend(neighbours);
    }
    info!(
        "accessing a total of {} addresses, for {} principal addresses",
        targets.len(),
        args.num
    );

    for (bit, count) in bit_distribution(&targets).iter().enumerate() {
        let percentage = 100.0 * *count as f64 / targets.len() as f64;
        info!(
            "bit {:2}: {:4} / {:4} ({:5.2}%)",
            bit,
            count,
            targets.len(),
            percentage
        );
    }

    // throw off the prefetcher
    let mut shuffle_rng = Rng::from_seed(seed.wrapping_add(1));
    shuffle_in_windows(&mut targets, SHUFFLE_WINDOW, &mut shuffle_rng);

    RunSummary::new(&args, seed, &targets).save_to_file(&args.summary)?;

    let acquisition = args.protocol.acquisition();
    let points = trigger_points(args.accesses, args.triggers);
    let mut client = WorkloadClient::new(args.protocol.fifo_paths())?;
    client.send_ready_to_runner()?;

    let bar = progress.add(ProgressBar::new(targets.len() as u64));
    bar.set_style(ProgressStyle::named_bar("Targets"));
    for target in &targets {
        let mut iteration = client.wait_for_trigger()?;
        thread::sleep(Duration::from_millis(args.settle_ms));

        target
            .write_record_file(&args.exp_cfg)
            .with_context(|| format!("could not write {}", args.exp_cfg))?;
        let addr = target.virt;

        acquisition.start()?;
        let mut next_trigger = 0;
        for j in 0..args.accesses {
            // SAFETY: every target was resolved inside `allocation`, which outlives the loop
            unsafe {
                access::read(addr);
                access::clflushopt(addr);
            }
            access::mfence();
            if points.get(next_trigger) == Some(&j) {
                iteration.send_trigger()?;
                next_trigger += 1;
            }
        }
        acquisition.stop()?;
        debug!("sent {} trigger(s)", iteration.triggers());

        iteration.finish()?;
        bar.inc(1);
    }
    bar.finish();

    info!("workload completed");
    Ok(())
}
