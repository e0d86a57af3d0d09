use rand::RngCore;
use tongs_core::memory::{
    Allocation, BitMatrix, Chunk, DramAddr, DramCodec, DramContext, GeometryConfig, PhysAddr,
    VirtAddr,
};
use tongs_core::program::Program;
use tongs_core::util::{GIB, Rng};

const CONFIGS: [&str; 4] = [
    "zen3-2rank.json",
    "zen4-1rank.json",
    "raptorlake-1rank.json",
    "raptorlake-2rank.json",
];

fn config_path(name: &str) -> String {
    format!("{}/../../config/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn synthetic_superpage(base: usize, phys: usize) -> anyhow::Result<Allocation> {
    Ok(Allocation::from_parts(
        VirtAddr::new(base),
        GIB,
        vec![Chunk {
            virt: VirtAddr::new(base),
            phys: PhysAddr::new(phys),
        }],
    )?)
}

#[test]
fn test_shipped_geometries_are_bijective() -> anyhow::Result<()> {
    let mut rng = Rng::from_seed(0x7045);
    for name in CONFIGS {
        let config = GeometryConfig::from_jsonfile(config_path(name))?;
        let codec = DramCodec::new(&config)?;
        assert_eq!(codec.matrix_size(), config.matrix_size, "{}", name);

        let product = codec.linear_to_dram().mul(codec.dram_to_linear())?;
        assert_eq!(product, BitMatrix::identity(config.matrix_size), "{}", name);
        let product = codec.dram_to_linear().mul(codec.linear_to_dram())?;
        assert_eq!(product, BitMatrix::identity(config.matrix_size), "{}", name);

        for _ in 0..1000 {
            let linear = rng.next_u64() & codec.matrix_mask();
            assert_eq!(codec.encode(&codec.decode(linear)), linear, "{}", name);
        }
        let widths: usize = codec.fields().iter().map(|f| f.width()).sum();
        assert_eq!(widths, config.matrix_size, "{}", name);
    }
    Ok(())
}

#[test]
fn test_context_per_geometry() -> anyhow::Result<()> {
    let mut rng = Rng::from_seed(0xc0de);
    for (i, name) in CONFIGS.iter().enumerate() {
        let config = GeometryConfig::from_jsonfile(config_path(name))?;
        let alloc = synthetic_superpage(0x7f00_0000_0000 + i * 4 * GIB, (i + 1) * GIB)?;
        let ctx = DramContext::new(alloc, &config)?;
        for _ in 0..1000 {
            let virt = ctx.allocation().get_rand_addr(&mut rng);
            assert_eq!(ctx.to_virt(&ctx.from_virt(virt)), virt, "{}", name);
        }
    }
    Ok(())
}

#[test]
fn test_aggressor_program_listing() -> anyhow::Result<()> {
    let config = GeometryConfig::from_jsonfile(config_path("raptorlake-1rank.json"))?;
    let ctx = DramContext::new(synthetic_superpage(0x10_0000_0000, 2 * GIB)?, &config)?;
    let rows = [141, 150];
    let mut prog = Program::new();
    for _ in 0..4 {
        for &row in &rows {
            prog.push_access(ctx.to_virt(&DramAddr::new(1, 0, 0, 0, row, row)));
        }
    }
    prog.check_bounds(ctx.allocation())?;
    assert_eq!(prog.len(), 4 * rows.len() * 3);

    let mut out = Vec::new();
    prog.write_to(&mut out, &ctx)?;
    let listing = String::from_utf8(out)?;
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), prog.len());
    assert_eq!(lines[0], "READ (1,0,0,0,141,141)");
    assert_eq!(lines[1], "CLFLUSH (1,0,0,0,141,141)");
    assert_eq!(lines[2], "MFENCE");
    assert_eq!(lines[3], "READ (1,0,0,0,150,150)");
    Ok(())
}

#[test]
fn test_rejects_missing_file() {
    assert!(GeometryConfig::from_jsonfile(config_path("does-not-exist.json")).is_err());
}
