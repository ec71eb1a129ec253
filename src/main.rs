use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use glam::DVec3;
use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use tricorr::geometry::{random_sphere_points_with_rng, random_square_points_with_rng};
use tricorr::{BinConfig, Coord, Corr3, Field, KernelKind, MetricKind, Zeta};

/// tricorr - three-point correlations of random test fields
#[derive(Parser, Debug)]
#[command(name = "tricorr", version, about)]
struct Cli {
    /// Number of random points (accepts k/m suffixes, e.g. 10k)
    #[arg(long, default_value = "2k", value_parser = parse_count)]
    points: usize,

    /// Random seed for the field
    #[arg(long)]
    seed: Option<u64>,

    /// Triangle-value kernel
    #[arg(long, value_enum, default_value = "nnn")]
    kernel: Kernel,

    /// Sample the unit sphere (Arc metric) instead of the unit square
    #[arg(long)]
    sphere: bool,

    /// Smallest middle-side separation to bin
    #[arg(long, default_value_t = 0.02)]
    minsep: f64,

    /// Largest middle-side separation to bin
    #[arg(long, default_value_t = 0.25)]
    maxsep: f64,

    /// Number of logarithmic separation bins
    #[arg(long, default_value_t = 6)]
    nbins: usize,

    /// Number of u = d3/d2 bins
    #[arg(long, default_value_t = 6)]
    nubins: usize,

    /// Number of |v| = (d1-d2)/d3 bins (doubled internally for sign)
    #[arg(long, default_value_t = 6)]
    nvbins: usize,

    /// Cell-splitting tolerance for all three axes (0 = exact)
    #[arg(long, default_value_t = 0.1)]
    slop: f64,

    /// Print a progress dot per top-level cell
    #[arg(long)]
    dots: bool,

    /// Number of worker threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Export per-bin arrays to a file (supports .json and .json.gz)
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    /// Counts only
    Nnn,
    /// Scalar field
    Kkk,
    /// Spin-2 shear field
    Ggg,
}

fn parse_count(s: &str) -> Result<usize, String> {
    let s = s.to_lowercase();
    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 1_000_000)
    } else if let Some(stripped) = s.strip_suffix('k') {
        (stripped, 1_000)
    } else {
        (s.as_str(), 1)
    };

    num_str
        .parse::<f64>()
        .map(|n| (n * multiplier as f64) as usize)
        .map_err(|e| format!("Invalid number '{}': {}", s, e))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("Failed to configure the thread pool");
    }

    let seed = cli.seed.unwrap_or_else(rand::random);
    let coord = if cli.sphere { Coord::Sphere } else { Coord::Flat };
    println!(
        "points={}, seed={}, kernel={:?}, coord={:?}",
        cli.points, seed, cli.kernel, coord
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let points = if cli.sphere {
        random_sphere_points_with_rng(cli.points, &mut rng)
    } else {
        random_square_points_with_rng(cli.points, &mut rng)
    };

    print!("Building field... ");
    let start = std::time::Instant::now();
    let (field, kind) = build_field(&points, coord, cli.kernel, &mut rng);
    println!("{:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    let config = BinConfig {
        minsep: cli.minsep,
        maxsep: cli.maxsep,
        nbins: cli.nbins,
        nubins: cli.nubins,
        nvbins: cli.nvbins,
        b: cli.slop,
        bu: cli.slop,
        bv: cli.slop,
        metric: if cli.sphere {
            MetricKind::Arc
        } else {
            MetricKind::Euclidean
        },
        ..BinConfig::default()
    };
    let mut corr = Corr3::new(kind, &config).expect("Invalid binning configuration");

    print!("Correlating... ");
    let start = std::time::Instant::now();
    corr.process_auto(&field, cli.dots)
        .expect("Correlation failed");
    println!("{:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    let total_triangles: f64 = corr.ntri().iter().sum();
    let total_weight: f64 = corr.weight().iter().sum();
    let filled = corr.weight().iter().filter(|&&w| w > 0.0).count();
    println!(
        "{} bins ({} filled), {} triangles in range, total weight {:.6e}",
        corr.ntot(),
        filled,
        total_triangles,
        total_weight
    );

    if let Some(path) = &cli.export {
        export_corr(&corr, &cli, seed, path);
    }
}

fn build_field(
    points: &[DVec3],
    coord: Coord,
    kernel: Kernel,
    rng: &mut ChaCha8Rng,
) -> (Field, KernelKind) {
    match kernel {
        Kernel::Nnn => (
            Field::counts(points, None, coord).expect("Failed to build field"),
            KernelKind::Count,
        ),
        Kernel::Kkk => {
            let kappa: Vec<f64> = (0..points.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (
                Field::scalars(points, None, &kappa, coord).expect("Failed to build field"),
                KernelKind::Scalar,
            )
        }
        Kernel::Ggg => {
            let shear: Vec<Complex64> = (0..points.len())
                .map(|_| Complex64::new(rng.gen_range(-0.05..0.05), rng.gen_range(-0.05..0.05)))
                .collect();
            (
                Field::shears(points, None, &shear, coord).expect("Failed to build field"),
                KernelKind::Spin2,
            )
        }
    }
}

/// Export per-bin arrays to a JSON file (optionally gzipped).
fn export_corr(corr: &Corr3, cli: &Cli, seed: u64, path: &Path) {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::BufWriter;

    print!("Exporting to {}... ", path.display());
    let start = std::time::Instant::now();

    let data = CorrExport::from_corr(corr, cli, seed);
    let file = File::create(path).expect("Failed to create export file");

    let is_gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    if is_gzip {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(encoder, &data).expect("Failed to write JSON");
    } else {
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, &data).expect("Failed to write JSON");
    }

    println!("{:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
}

#[derive(Serialize)]
struct CorrExport {
    metadata: Metadata,
    bins: BinExport,
}

#[derive(Serialize)]
struct Metadata {
    seed: u64,
    points: usize,
    kernel: String,
    sphere: bool,
    minsep: f64,
    maxsep: f64,
    nbins: usize,
    nubins: usize,
    nvbins: usize,
}

#[derive(Serialize)]
struct BinExport {
    weight: Vec<f64>,
    ntri: Vec<f64>,
    meand1: Vec<f64>,
    meand2: Vec<f64>,
    meand3: Vec<f64>,
    meanu: Vec<f64>,
    meanv: Vec<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    zeta: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gammas: Option<GammaExport>,
}

#[derive(Serialize)]
struct GammaExport {
    gam0r: Vec<f64>,
    gam0i: Vec<f64>,
    gam1r: Vec<f64>,
    gam1i: Vec<f64>,
    gam2r: Vec<f64>,
    gam2i: Vec<f64>,
    gam3r: Vec<f64>,
    gam3i: Vec<f64>,
}

impl CorrExport {
    fn from_corr(corr: &Corr3, cli: &Cli, seed: u64) -> Self {
        let (zeta, gammas) = match corr.zeta() {
            Zeta::Count => (None, None),
            Zeta::Scalar { zeta } => (Some(zeta.clone()), None),
            Zeta::Spin2 {
                gam0r,
                gam0i,
                gam1r,
                gam1i,
                gam2r,
                gam2i,
                gam3r,
                gam3i,
            } => (
                None,
                Some(GammaExport {
                    gam0r: gam0r.clone(),
                    gam0i: gam0i.clone(),
                    gam1r: gam1r.clone(),
                    gam1i: gam1i.clone(),
                    gam2r: gam2r.clone(),
                    gam2i: gam2i.clone(),
                    gam3r: gam3r.clone(),
                    gam3i: gam3i.clone(),
                }),
            ),
        };

        CorrExport {
            metadata: Metadata {
                seed,
                points: cli.points,
                kernel: format!("{:?}", cli.kernel).to_lowercase(),
                sphere: cli.sphere,
                minsep: cli.minsep,
                maxsep: cli.maxsep,
                nbins: cli.nbins,
                nubins: cli.nubins,
                nvbins: cli.nvbins,
            },
            bins: BinExport {
                weight: corr.weight().to_vec(),
                ntri: corr.ntri().to_vec(),
                meand1: corr.meand1().to_vec(),
                meand2: corr.meand2().to_vec(),
                meand3: corr.meand3().to_vec(),
                meanu: corr.meanu().to_vec(),
                meanv: corr.meanv().to_vec(),
                zeta,
                gammas,
            },
        }
    }
}
