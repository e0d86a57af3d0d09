use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use rand::seq::SliceRandom;
use tongs::memory::{
    AccessTarget, AddressGenerator, Allocation, CSV_HEADER, Chunk, FunctionConstraint, PhysAddr,
    VirtAddr, bit_distribution, shuffle_in_windows,
};
use tongs::trigger::test_util::FifoDir;
use tongs::trigger::{TriggerLine, TriggerProcess, WorkloadClient};
use tongs::util::{GIB, Rng};

const BASE: usize = 0x20_0000_0000;

fn two_chunks() -> anyhow::Result<Allocation> {
    let chunks = (0..2)
        .map(|i| Chunk {
            virt: VirtAddr::new(BASE + i * GIB),
            phys: PhysAddr::new((4 + i) * GIB),
        })
        .collect();
    Ok(Allocation::from_parts(VirtAddr::new(BASE), 2 * GIB, chunks)?)
}

struct Counter(usize);

impl TriggerLine for Counter {
    type Error = Infallible;

    fn pulse(&mut self) -> Result<(), Infallible> {
        self.0 += 1;
        Ok(())
    }
}

fn bitflip_targets(seed: u64) -> anyhow::Result<(Allocation, Vec<AccessTarget>)> {
    let allocation = two_chunks()?;
    let constraint: FunctionConstraint = "0xc3200=1".parse()?;
    let targets = {
        let mut generator = AddressGenerator::new(&allocation, 0, Rng::from_seed(seed));
        let principal = generator.get_random_addr(&[constraint])?;
        generator.flip_neighbours(principal, &[constraint])?
    };
    Ok((allocation, targets))
}

#[test]
fn test_neighbours_keep_the_subchannel() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let constraint: FunctionConstraint = "0xc3200=1".parse()?;
    for seed in 0..16 {
        let (allocation, targets) = bitflip_targets(seed)?;
        // bits 6..30 except the lowest constraint bit, plus bit 30 across chunks
        assert_eq!(targets.len(), 2 + 23 + 1);
        assert_eq!(targets[0], targets[1]);
        let principal = targets[0].dram;
        for t in &targets {
            assert!(constraint.is_satisfied_by(t.dram), "{:#x}", t.dram);
            assert!(allocation.contains(t.virt));
            assert_eq!(t.principal_dram, principal);
            assert_eq!(t.phys.as_u64(), t.dram);
        }
        let distinct_high = targets
            .iter()
            .filter(|t| (t.dram ^ principal) >> 30 != 0)
            .count();
        assert_eq!(distinct_high, 1);
    }
    Ok(())
}

#[test]
fn test_bit_distribution_after_shuffle() -> anyhow::Result<()> {
    let (_allocation, mut targets) = bitflip_targets(7)?;
    let before = bit_distribution(&targets);
    shuffle_in_windows(&mut targets, 8, &mut Rng::from_seed(1));
    assert_eq!(bit_distribution(&targets), before);
    assert_eq!(before[32..].iter().sum::<usize>(), targets.len());
    Ok(())
}

#[test]
fn test_iterations_over_fifos() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let fifos = FifoDir::new("flow")?;
    let paths = fifos.paths();

    let (_allocation, mut targets) = bitflip_targets(3)?;
    targets.shuffle(&mut Rng::from_seed(9));
    targets.truncate(3);

    let runner_paths = paths.clone();
    let runner = thread::spawn(move || -> anyhow::Result<Vec<usize>> {
        let mut ready = Vec::new();
        std::io::Read::read_to_end(
            &mut std::fs::File::open(&runner_paths.workload2runner)?,
            &mut ready,
        )?;
        anyhow::ensure!(ready == [1], "unexpected runner bytes {:?}", ready);
        let mut pulses = Vec::new();
        for _ in 0..3 {
            let mut process = TriggerProcess::new(runner_paths.clone(), Counter(0));
            process.run()?;
            pulses.push(process.into_line().0);
        }
        Ok(pulses)
    });

    let record = fifos.path().join("exp_cfg.csv");
    let mut client = WorkloadClient::new(paths)?.with_poll_interval(Duration::from_millis(10));
    client.send_ready_to_runner()?;
    let accesses = 30;
    let trigger_every = accesses / 3;
    for target in &targets {
        let mut iteration = client.wait_for_trigger()?;
        target.write_record_file(&record)?;
        for j in 0..accesses {
            if j % trigger_every == 0 {
                iteration.send_trigger()?;
            }
        }
        iteration.finish()?;

        let content = std::fs::read_to_string(&record)?;
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let fields: Vec<u64> = lines
            .next()
            .ok_or_else(|| anyhow!("missing record"))?
            .split(',')
            .map(|f| u64::from_str_radix(f.trim_start_matches("0x"), 16))
            .collect::<Result<_, _>>()?;
        assert_eq!(
            fields,
            vec![
                target.virt.as_u64(),
                target.phys.as_u64(),
                target.dram,
                target.principal_dram
            ]
        );
    }

    let pulses = runner.join().map_err(|_| anyhow!("runner panicked"))??;
    assert_eq!(pulses, vec![3, 3, 3]);
    Ok(())
}
