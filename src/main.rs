use std::time::Instant;

use ark_bn254::{g1::Config as G1Config, Fr, G1Affine};
use ark_std::UniformRand;
use clap::{Args, Parser, Subcommand};
use eyre::WrapErr;
use msm_core::msm::{multiply_and_sum_with_config, MsmConfig, PippengerReference};
use msm_core::utils::profiling::{print_arena_usage, print_memory_usage};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use rayon::prelude::*;
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Profile and benchmark Pippenger MSMs over BN254 G1.
#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Profile(ProfileArgs),
    Benchmark(BenchmarkArgs),
}

#[derive(Args, Debug, Clone)]
struct ProfileArgs {
    /// Also record spans as a chrome/Perfetto trace
    #[clap(long)]
    chrome: bool,

    /// Number of points (as 2^size)
    #[clap(short, long, default_value_t = 16)]
    size: usize,

    /// Worker threads; defaults to the rayon pool size
    #[clap(short, long)]
    threads: Option<usize>,

    /// Override the bucket width chosen by the tuning table
    #[clap(long)]
    bucket_width: Option<usize>,
}

#[derive(Args, Debug)]
struct BenchmarkArgs {
    #[clap(flatten)]
    profile_args: ProfileArgs,

    /// Smallest input to run (as 2^min_size); sizes double up to 2^size
    #[clap(long, default_value_t = 10)]
    min_size: usize,

    /// Repetitions per input size
    #[clap(short, long, default_value_t = 5)]
    iterations: usize,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Profile(args) => trace_only(args),
        Commands::Benchmark(args) => benchmark_and_trace(args),
    }
}

type Bench = Box<dyn FnOnce() -> eyre::Result<()> + Send>;

/// Installs the subscriber, then runs each bench inside its span. With
/// `--chrome` the spans are also written as a Perfetto trace, to `trace_file`
/// if given.
fn trace(
    args: &ProfileArgs,
    benchmarks: Vec<(tracing::Span, Bench)>,
    trace_file: Option<String>,
) -> eyre::Result<()> {
    let log_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(log_filter);

    let (chrome_layer, _guard) = if args.chrome {
        let builder = ChromeLayerBuilder::new().include_args(true);
        let builder = match &trace_file {
            Some(file) => builder.file(file),
            None => builder,
        };
        let (layer, guard) = builder.build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(log_layer)
        .with(chrome_layer)
        .init();
    if args.chrome {
        let destination = trace_file.as_deref().unwrap_or("trace-<timestamp>.json");
        tracing::info!(destination, "writing chrome trace; open it in https://ui.perfetto.dev/");
    }

    for (span, bench) in benchmarks {
        span.in_scope(|| -> eyre::Result<()> {
            bench()?;
            tracing::info!("bench complete");
            Ok(())
        })?;
    }
    Ok(())
}

fn random_input(log_size: usize) -> (Vec<Fr>, Vec<G1Affine>) {
    let n = 1 << log_size;
    let scalars = (0..n)
        .into_par_iter()
        .map_init(
            || ChaCha20Rng::seed_from_u64(rayon::current_thread_index().unwrap_or(0) as u64),
            |rng, _| Fr::rand(rng),
        )
        .collect();
    let points = (0..n)
        .into_par_iter()
        .map_init(
            || {
                let thread = rayon::current_thread_index().unwrap_or(0);
                ChaCha20Rng::seed_from_u64((n + thread) as u64)
            },
            |rng, _| G1Affine::rand(rng),
        )
        .collect();
    (scalars, points)
}

fn msm_config(args: &ProfileArgs) -> MsmConfig {
    MsmConfig {
        num_threads: args.threads,
        bucket_width: args.bucket_width,
        ..MsmConfig::default()
    }
}

fn thread_pool(args: &ProfileArgs) -> eyre::Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = args.threads {
        builder = builder.num_threads(threads);
    }
    builder.build().wrap_err("failed to build the worker pool")
}

// One MSM at a fixed size
fn trace_only(args: ProfileArgs) -> eyre::Result<()> {
    let log_size = args.size;
    let config = msm_config(&args);
    let bench: Bench = Box::new(move || {
        let (scalars, points) = random_input(log_size);
        print_memory_usage("inputs generated");
        let start = Instant::now();
        let sum = multiply_and_sum_with_config(&scalars, &points, None, &config)?;
        tracing::info!(elapsed = ?start.elapsed(), infinity = sum.infinity, "msm done");
        print_arena_usage("after msm");
        Ok(())
    });
    let span = tracing::info_span!("msm", log_size);
    let pool = thread_pool(&args)?;
    pool.install(|| trace(&args, vec![(span, bench)], None))
}

// Growing sizes through one cached arena
fn benchmark_and_trace(args: BenchmarkArgs) -> eyre::Result<()> {
    let profile_args = args.profile_args;
    let trace_file = format!(
        "benchmark-runs/perfetto_traces/msm_{}_{}.json",
        args.min_size, profile_args.size
    );
    if profile_args.chrome {
        std::fs::create_dir_all("benchmark-runs/perfetto_traces")
            .wrap_err("failed to create the trace directory")?;
    }

    let config = msm_config(&profile_args);
    let (min_size, max_size, iterations) = (args.min_size, profile_args.size, args.iterations);
    let bench: Bench = Box::new(move || {
        let (scalars, points) = random_input(max_size);
        let layout = config.resolve::<Fr>(1 << max_size)?.layout();
        let reference = PippengerReference::<G1Config>::acquire(&layout)?;
        print_arena_usage("arena reserved");

        for log_size in min_size..=max_size {
            let n = 1 << log_size;
            let span = tracing::info_span!("size", log_size);
            let _guard = span.enter();
            let start = Instant::now();
            for _ in 0..iterations {
                multiply_and_sum_with_config(&scalars[..n], &points[..n], None, &config)?;
            }
            let per_msm = start.elapsed() / iterations.max(1) as u32;
            tracing::info!(log_size, ?per_msm, "benchmark");
        }

        print_arena_usage("after benchmark");
        print_memory_usage("after benchmark");
        reference.release();
        Ok(())
    });
    let span = tracing::info_span!("benchmark", min_size, max_size);
    let pool = thread_pool(&profile_args)?;
    pool.install(|| trace(&profile_args, vec![(span, bench)], Some(trace_file)))
}
