use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use stormy_core::glam::Vec3;
use stormy_core::hash::hash_frame;
use stormy_core::{Camera, DirectionalLight, FrameBuffer, Pass, PostProcessConfig};
use stormy_render::frame_io::{load_frame, save_frame};
use stormy_render::{
    FrameReport, GpuContext, GpuPassExecutor, PostProcessOrchestrator, SoftwareExecutor,
};

/// Looked up in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "stormy.toml";

#[derive(Parser)]
#[command(
    name = "stormy",
    version,
    about = "Stormy: bloom and god-ray post-processing for rendered frames"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the post-process over an image file
    Process {
        /// Source image
        #[arg()]
        input: PathBuf,

        /// Where to write the composited image (.exr keeps HDR values)
        #[arg(short, long)]
        output: PathBuf,

        /// TOML configuration (default: ./stormy.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sun travel direction as x,y,z; overrides the configured sun
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        sun: Option<Vec3>,

        /// Run the WGSL program on the GPU instead of the CPU executor
        #[arg(long)]
        gpu: bool,

        /// Print the frame report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the shader passes in ordinal order
    Passes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Process {
            input,
            output,
            config,
            sun,
            gpu,
            json,
        } => cmd_process(&input, &output, config.as_deref(), sun, gpu, json),
        Commands::Config { output } => cmd_config(output.as_deref()),
        Commands::Passes => cmd_passes(),
    }
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z but got '{}'", s));
    }
    let mut values = [0.0f32; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .parse()
            .map_err(|_| format!("'{}' is not a number", part))?;
    }
    Ok(Vec3::from_array(values))
}

fn load_config(path: Option<&Path>) -> Result<PostProcessConfig> {
    match path {
        Some(path) => PostProcessConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                PostProcessConfig::load_from_file(default_path)
                    .with_context(|| format!("failed to load config: {}", default_path.display()))
            } else {
                Ok(PostProcessConfig::default())
            }
        }
    }
}

/// Replace the sun direction, keeping a configured color and intensity.
fn apply_sun_override(config: &mut PostProcessConfig, direction: Vec3) {
    config.sun = Some(match config.sun {
        Some(sun) => DirectionalLight { direction, ..sun },
        None => DirectionalLight::new(direction),
    });
}

#[derive(Serialize)]
struct ProcessSummary {
    input: PathBuf,
    output: PathBuf,
    width: u32,
    height: u32,
    executor: &'static str,
    #[serde(flatten)]
    report: FrameReport,
    hash: String,
    elapsed_ms: f64,
}

fn cmd_process(
    input: &Path,
    output: &Path,
    config_path: Option<&Path>,
    sun: Option<Vec3>,
    gpu: bool,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;
    if let Some(direction) = sun {
        apply_sun_override(&mut config, direction);
    }

    let source = load_frame(input)?;
    tracing::info!(
        "Processing {} ({}x{})",
        input.display(),
        source.width,
        source.height
    );

    let mut post = PostProcessOrchestrator::new(&config, Camera::default());
    let (frame, report) = if gpu {
        process_on_gpu(&mut post, &config, &source)?
    } else {
        process_on_cpu(&mut post, &config, source)?
    };

    save_frame(&frame, output)?;

    let summary = ProcessSummary {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        width: frame.width,
        height: frame.height,
        executor: if gpu { "gpu" } else { "software" },
        report,
        hash: hash_frame(&frame).to_hex(),
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Stormy post-process");
        println!("   Input:    {}", summary.input.display());
        println!("   Output:   {}", summary.output.display());
        println!("   Size:     {}x{}", summary.width, summary.height);
        println!("   Executor: {}", summary.executor);
        println!("   Outcome:  {:?}", summary.report.outcome);
        println!("   Blits:    {}", summary.report.blits);
        println!(
            "   God rays: {}",
            if summary.report.god_rays { "yes" } else { "no" }
        );
        println!("   Hash:     {}", summary.hash);
        println!("   Time:     {:.1}ms", summary.elapsed_ms);
    }
    Ok(())
}

fn process_on_cpu(
    post: &mut PostProcessOrchestrator,
    config: &PostProcessConfig,
    source: FrameBuffer,
) -> Result<(FrameBuffer, FrameReport)> {
    let mut exec = SoftwareExecutor::new();
    exec.register_shader(&config.shader.name);
    post.initialize(&mut exec)
        .context("failed to initialize post-process")?;

    let size = source.size();
    let src = exec.import(source);
    let dst = exec.create_frame(size);
    let report = post.process_frame(&mut exec, src, dst)?;
    post.teardown();

    let frame = exec
        .take(dst)
        .context("destination frame missing from executor")?;
    Ok((frame, report))
}

fn process_on_gpu(
    post: &mut PostProcessOrchestrator,
    config: &PostProcessConfig,
    source: &FrameBuffer,
) -> Result<(FrameBuffer, FrameReport)> {
    let gpu = Arc::new(GpuContext::init()?);
    let mut exec = GpuPassExecutor::new(gpu, config.shader.search_paths.clone());
    post.initialize(&mut exec).with_context(|| {
        format!(
            "failed to initialize post-process (searched {:?} for {}.wgsl)",
            config.shader.search_paths, config.shader.name
        )
    })?;

    let src = exec.import(source)?;
    let dst = exec.create_frame(source.size())?;
    let report = post.process_frame(&mut exec, src, dst)?;
    post.teardown();

    let frame = exec.read_back(dst)?;
    exec.discard(src);
    exec.discard(dst);
    Ok((frame, report))
}

fn cmd_config(output: Option<&Path>) -> Result<()> {
    let config = PostProcessConfig::default();
    match output {
        Some(path) => {
            config
                .save_to_file(path)
                .with_context(|| format!("failed to write config: {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

fn cmd_passes() -> Result<()> {
    println!("{:<8} | {:<10} | {}", "Ordinal", "Pass", "Entry point");
    println!("{:-<8}-+-{:-<10}-+-{:-<14}", "", "", "");
    for pass in Pass::ALL {
        println!("{:<8} | {:<10} | {}", pass.index(), pass.to_string(), pass.entry_point());
    }
    Ok(())
}
