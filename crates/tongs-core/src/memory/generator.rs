use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::{debug, trace};
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

use super::function::all_satisfied;
use super::{Allocation, FunctionConstraint, PhysAddr, VirtAddr};
use crate::util::{CL_SHIFT, Rng, WORD_BITS, bit, lsb};

/// Number of samples [`AddressGenerator::get_random_addr`] draws before giving up.
pub const RANDOM_ADDR_ATTEMPTS: usize = 1024;

/// Default sample budget of [`AddressGenerator::get_good_addr`].
pub const DEFAULT_GOOD_ADDR_ITERATIONS: usize = 256;

/// Errors from constrained address search.
///
/// Search failures mean the constraint set is presumed unsatisfiable within the
/// budget, not that the caller was unlucky. Whether to abort is up to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    /// No sample satisfied the constraints
    #[error("could not find address satisfying constraints in {attempts} attempts")]
    Exhausted {
        /// Samples drawn
        attempts: usize,
    },
    /// No candidate satisfied the constraints within the iteration budget
    #[error("no candidate satisfied the constraints in {iterations} iterations")]
    NoCandidate {
        /// Iteration budget
        iterations: usize,
    },
    /// Neighbour generation keeps at most one constraint fixed
    #[error("neighbour generation supports at most one constraint, got {0}")]
    TooManyConstraints(usize),
    /// The address is not part of the allocation
    #[error("address {0:?} is outside the allocation")]
    OutsideAllocation(VirtAddr),
}

/// Header line of the per-iteration configuration record.
pub const CSV_HEADER: &str = "virt_addr,phys_addr,dram_addr,dram_principal";

/// One address accessed during a measured iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AccessTarget {
    /// Virtual address inside the allocation
    pub virt: VirtAddr,
    /// Physical address
    pub phys: PhysAddr,
    /// DRAM linear address, `phys - dram_offset`
    pub dram: u64,
    /// DRAM linear address of the principal this target was derived from
    pub principal_dram: u64,
}

impl AccessTarget {
    /// Writes the configuration record (header plus one line of hex values).
    ///
    /// # Errors
    ///
    /// Returns any error of the underlying writer.
    pub fn write_record<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "{}", CSV_HEADER)?;
        writeln!(
            w,
            "{:#x},{:#x},{:#x},{:#x}",
            self.virt, self.phys, self.dram, self.principal_dram
        )
    }

    /// Writes the configuration record to `path`, replacing the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_record_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_record(&mut w)?;
        w.flush()
    }
}

/// Samples addresses of an [`Allocation`] in DRAM linear space.
///
/// DRAM linear addresses are `phys - dram_offset`, with the offset supplied by the
/// operator. All constraints are evaluated on DRAM linear addresses.
pub struct AddressGenerator<'a> {
    allocation: &'a Allocation,
    dram_offset: i64,
    rng: Rng,
}

impl<'a> AddressGenerator<'a> {
    /// Creates a generator sampling from `allocation` with `rng`.
    pub fn new(allocation: &'a Allocation, dram_offset: i64, rng: Rng) -> Self {
        AddressGenerator {
            allocation,
            dram_offset,
            rng,
        }
    }

    /// The sampled allocation.
    pub fn allocation(&self) -> &'a Allocation {
        self.allocation
    }

    /// Offset between physical and DRAM linear addresses.
    pub fn dram_offset(&self) -> i64 {
        self.dram_offset
    }

    /// Converts a virtual address to a DRAM linear address.
    pub fn virt_to_dram(&self, virt: VirtAddr) -> Option<u64> {
        let phys = self.allocation.virt_to_phys(virt)?;
        Some(phys.as_u64().wrapping_sub(self.dram_offset as u64))
    }

    /// Converts a DRAM linear address to a virtual address, `None` outside the allocation.
    pub fn dram_to_virt(&self, dram: u64) -> Option<VirtAddr> {
        let phys = dram.wrapping_add(self.dram_offset as u64);
        self.allocation.phys_to_virt(PhysAddr::new(phys as usize))
    }

    /// Resolves all addresses of `virt` into an [`AccessTarget`].
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::OutsideAllocation`] if `virt` is not in the allocation.
    pub fn target(&self, virt: VirtAddr, principal_dram: Option<u64>) -> Result<AccessTarget, SearchError> {
        let phys = self
            .allocation
            .virt_to_phys(virt)
            .ok_or(SearchError::OutsideAllocation(virt))?;
        let dram = phys.as_u64().wrapping_sub(self.dram_offset as u64);
        Ok(AccessTarget {
            virt,
            phys,
            dram,
            principal_dram: principal_dram.unwrap_or(dram),
        })
    }

    /// Picks a random address whose DRAM linear address satisfies all `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Exhausted`] if none of [`RANDOM_ADDR_ATTEMPTS`] samples
    /// satisfies the constraints.
    pub fn get_random_addr(
        &mut self,
        constraints: &[FunctionConstraint],
    ) -> Result<VirtAddr, SearchError> {
        for _ in 0..RANDOM_ADDR_ATTEMPTS {
            let virt = self.allocation.get_rand_addr(&mut self.rng);
            let Some(dram) = self.virt_to_dram(virt) else {
                continue;
            };
            if all_satisfied(constraints, dram) {
                return Ok(virt);
            }
        }
        Err(SearchError::Exhausted {
            attempts: RANDOM_ADDR_ATTEMPTS,
        })
    }

    /// Number of bit positions `6..64` whose flip in DRAM linear space stays inside
    /// the allocation. Zero for addresses outside the allocation.
    pub fn flip_score(&self, virt: VirtAddr) -> usize {
        let Some(dram) = self.virt_to_dram(virt) else {
            return 0;
        };
        (CL_SHIFT..WORD_BITS)
            .filter(|&b| self.dram_to_virt(dram ^ bit(b)).is_some())
            .count()
    }

    /// Picks the sampled address that allows single bit flips in the most positions
    /// while satisfying `constraints`.
    ///
    /// Draws `iterations` samples; among those satisfying the constraints the highest
    /// [`flip_score`](Self::flip_score) wins, ties keep the first seen. The result is
    /// far from uniformly distributed.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::NoCandidate`] if no sample satisfies the constraints.
    pub fn get_good_addr(
        &mut self,
        constraints: &[FunctionConstraint],
        iterations: usize,
    ) -> Result<VirtAddr, SearchError> {
        let mut best: Option<(VirtAddr, usize)> = None;
        for _ in 0..iterations {
            let virt = self.allocation.get_rand_addr(&mut self.rng);
            let Some(dram) = self.virt_to_dram(virt) else {
                continue;
            };
            if !all_satisfied(constraints, dram) {
                continue;
            }
            let score = self.flip_score(virt);
            trace!("candidate {:p} dram 0x{:x} score {}", virt, dram, score);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((virt, score));
            }
        }
        let (virt, score) = best.ok_or(SearchError::NoCandidate { iterations })?;
        debug!("best candidate {:p} with {} possible flips", virt, score);
        Ok(virt)
    }

    /// Builds the access list for one principal address.
    ///
    /// The principal comes first, twice, followed by every single-bit neighbour
    /// (bits 6..64 in DRAM linear space) that stays inside the allocation. If a
    /// constraint is given and the flipped bit is part of its function, the lowest
    /// set bit of the function is flipped as well so the function value is kept.
    /// That lowest bit itself is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::TooManyConstraints`] for more than one constraint and
    /// [`SearchError::OutsideAllocation`] if `principal` is not in the allocation.
    pub fn flip_neighbours(
        &self,
        principal: VirtAddr,
        constraints: &[FunctionConstraint],
    ) -> Result<Vec<AccessTarget>, SearchError> {
        if constraints.len() > 1 {
            return Err(SearchError::TooManyConstraints(constraints.len()));
        }
        let fixed = constraints
            .first()
            .map(|c| c.func().mask())
            .and_then(|mask| lsb(mask).map(|l| (mask, l)));

        let principal = self.target(principal, None)?;
        let mut targets = vec![principal, principal];
        for b in CL_SHIFT..WORD_BITS {
            let mut flipped = principal.dram ^ bit(b);
            if let Some((mask, lowest)) = fixed {
                if mask & bit(b) != 0 {
                    if b == lowest {
                        debug!("bit {} is the lowest bit of kept function 0x{:x}, skipping", b, mask);
                        continue;
                    }
                    flipped ^= bit(lowest);
                }
            }
            let Some(virt) = self.dram_to_virt(flipped) else {
                trace!("flipping bit {} leads outside of the allocation, skipping", b);
                continue;
            };
            targets.push(self.target(virt, Some(principal.dram))?);
        }
        Ok(targets)
    }
}

/// Counts, for every bit of the DRAM linear address, how many targets have it set.
pub fn bit_distribution(targets: &[AccessTarget]) -> [usize; WORD_BITS] {
    let mut counts = [0; WORD_BITS];
    for target in targets {
        for (i, count) in counts.iter_mut().enumerate() {
            *count += (target.dram & bit(i) != 0) as usize;
        }
    }
    counts
}

/// Shuffles `items` in consecutive windows of `window` elements.
///
/// Elements never leave their window, so the coarse order survives while adjacent
/// accesses are decorrelated.
pub fn shuffle_in_windows<T, R: rand::Rng + ?Sized>(items: &mut [T], window: usize, rng: &mut R) {
    for chunk in items.chunks_mut(window.max(1)) {
        chunk.shuffle(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AddressFunction, Chunk};
    use crate::util::GIB;

    const BASE: usize = 0x10_0000_0000;

    /// Chunks at physical 4, 5 and 6 GiB.
    fn three_chunks() -> Allocation {
        let chunks = (0..3)
            .map(|i| Chunk {
                virt: VirtAddr::new(BASE + i * GIB),
                phys: PhysAddr::new((4 + i) * GIB),
            })
            .collect();
        Allocation::from_parts(VirtAddr::new(BASE), 3 * GIB, chunks).expect("valid chunk table")
    }

    fn constraint(mask: u64, value: bool) -> FunctionConstraint {
        FunctionConstraint::new(AddressFunction::new(mask), value)
    }

    #[test]
    fn test_dram_translation() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, GIB as i64, Rng::from_seed(1));
        let virt = VirtAddr::new(BASE + 0x1040);
        assert_eq!(generator.virt_to_dram(virt), Some((3 * GIB + 0x1040) as u64));
        assert_eq!(generator.dram_to_virt((3 * GIB + 0x1040) as u64), Some(virt));
        assert_eq!(generator.dram_to_virt(0), None);
        assert_eq!(generator.virt_to_dram(VirtAddr::new(0x1000)), None);
    }

    #[test]
    fn test_flip_score() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(1));
        // bits 6..30 always stay in the chunk; 4 GiB can reach 5 and 6 GiB
        assert_eq!(generator.flip_score(VirtAddr::new(BASE + 0x40)), 26);
        assert_eq!(generator.flip_score(VirtAddr::new(BASE + GIB)), 25);
        assert_eq!(generator.flip_score(VirtAddr::new(BASE + 2 * GIB + 0x123)), 25);
        assert_eq!(generator.flip_score(VirtAddr::new(0)), 0);
    }

    #[test]
    fn test_random_addr_satisfies_constraints() {
        let alloc = three_chunks();
        let mut generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(2));
        let constraints = [constraint(0xc3200, true), constraint(0x40, false)];
        for _ in 0..100 {
            let virt = generator.get_random_addr(&constraints).expect("satisfiable");
            let dram = generator.virt_to_dram(virt).expect("inside allocation");
            assert!(all_satisfied(&constraints, dram));
        }
    }

    #[test]
    fn test_unconstrained_random_addr_takes_first_sample() {
        use rand::Rng as _;

        let alloc = three_chunks();
        for seed in 0..32 {
            let mut generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(seed));
            let virt = generator.get_random_addr(&[]).expect("no constraints");
            let first = alloc.base() + Rng::from_seed(seed).random_range(0..alloc.len());
            assert_eq!(virt, first);
        }
    }

    #[test]
    fn test_unsatisfiable_constraints_fail() {
        let alloc = three_chunks();
        let mut generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(3));
        // the empty function is always 0
        let never = [constraint(0, true)];
        assert_eq!(
            generator.get_random_addr(&never),
            Err(SearchError::Exhausted { attempts: 1024 })
        );
        assert_eq!(
            generator.get_good_addr(&never, 64),
            Err(SearchError::NoCandidate { iterations: 64 })
        );
    }

    #[test]
    fn test_good_addr_prefers_best_chunk() {
        let alloc = three_chunks();
        let mut generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(4));
        let virt = generator
            .get_good_addr(&[], DEFAULT_GOOD_ADDR_ITERATIONS)
            .expect("candidate");
        assert_eq!(alloc.virt_to_phys(virt).map(|p| p.as_usize() / GIB), Some(4));
        assert_eq!(generator.flip_score(virt), 26);
    }

    #[test]
    fn test_good_addr_monotonic_in_budget() {
        let alloc = three_chunks();
        let constraints = [constraint(0x3000, true)];
        let mut previous = 0;
        for iterations in [1, 2, 4, 16, 64, 256] {
            // same seed, so a larger budget sees a superset of the candidates
            let mut generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(11));
            let Ok(virt) = generator.get_good_addr(&constraints, iterations) else {
                continue;
            };
            let score = generator.flip_score(virt);
            assert!(score >= previous, "{} < {} at {}", score, previous, iterations);
            previous = score;
        }
        assert_eq!(previous, 26);
    }

    #[test]
    fn test_flip_neighbours_without_constraint() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(5));
        let principal = VirtAddr::new(BASE + 0x1_2340);
        let targets = generator.flip_neighbours(principal, &[]).expect("neighbours");
        assert_eq!(targets.len(), 2 + 26);
        assert_eq!(targets[0], targets[1]);
        assert_eq!(targets[0].virt, principal);
        let principal_dram = targets[0].dram;
        for t in &targets[2..] {
            assert_eq!(t.principal_dram, principal_dram);
            assert_eq!((t.dram ^ principal_dram).count_ones(), 1);
            assert!(alloc.contains(t.virt));
        }
    }

    #[test]
    fn test_flip_neighbours_keeps_constraint() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(6));
        let keep = [constraint(0xc3200, true)];
        let principal = VirtAddr::new(BASE + 0x200);
        let targets = generator.flip_neighbours(principal, &keep).expect("neighbours");
        // bit 9 is skipped, every other bit of 6..30 plus bits 30 and 31 are reachable
        assert_eq!(targets.len(), 2 + 25);
        for t in &targets {
            assert!(keep[0].is_satisfied_by(t.dram), "0x{:x}", t.dram);
            let diff = t.dram ^ t.principal_dram;
            let others = diff & 0xc3200 & !bit(9);
            assert_eq!(diff & bit(9) != 0, others != 0, "0x{:x}", diff);
        }
    }

    #[test]
    fn test_flip_neighbours_rejects_two_constraints() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(7));
        let res = generator.flip_neighbours(
            VirtAddr::new(BASE),
            &[constraint(0x40, true), constraint(0x80, true)],
        );
        assert_eq!(res, Err(SearchError::TooManyConstraints(2)));
    }

    #[test]
    fn test_record_format() {
        let target = AccessTarget {
            virt: VirtAddr::new(0x7f00_0000_1040),
            phys: PhysAddr::new(0x1_4000_1040),
            dram: 0x1_4000_1040,
            principal_dram: 0x1_4000_1000,
        };
        let mut out = Vec::new();
        target.write_record(&mut out).expect("write to vec");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "virt_addr,phys_addr,dram_addr,dram_principal\n\
             0x7f0000001040,0x140001040,0x140001040,0x140001000\n"
        );
    }

    #[test]
    fn test_bit_distribution_and_windows() {
        let alloc = three_chunks();
        let generator = AddressGenerator::new(&alloc, 0, Rng::from_seed(8));
        let mut targets = generator
            .flip_neighbours(VirtAddr::new(BASE), &[])
            .expect("neighbours");
        let counts = bit_distribution(&targets);
        // principal dram is exactly 4 GiB and bit 32 is never flipped
        assert_eq!(counts[32], targets.len());
        assert_eq!(counts[30], 1);
        assert_eq!(counts[6], 1);
        assert_eq!(counts[0], 0);

        let before = targets.clone();
        let mut rng = Rng::from_seed(9);
        shuffle_in_windows(&mut targets, 8, &mut rng);
        for (a, b) in before.chunks(8).zip(targets.chunks(8)) {
            let mut a = a.to_vec();
            let mut b = b.to_vec();
            a.sort_by_key(|t| t.dram);
            b.sort_by_key(|t| t.dram);
            assert_eq!(a, b);
        }
    }
}
