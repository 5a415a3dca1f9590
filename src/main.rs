use anyhow::{Context, Result};
use clap::Parser;
use confique::Config;
use log::{info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};
use std::{fs, path::PathBuf};
use trace_capture::*;

#[derive(Parser, Debug)]
#[command(version, about = "Capture, screen and store side-channel traces")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Seed for the simulated rig
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Log every rejected capture
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(output_dir: &str, verbose: bool) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {output_dir}"))?;
    let log_path = PathBuf::from(output_dir).join(format!(
        "capture_{}.log",
        time::OffsetDateTime::now_utc().date()
    ));
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    CombinedLogger::init(vec![
        TermLogger::new(
            term_level,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ])?;
    Ok(log_path)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let conf = Conf::builder()
        .env()
        .file(&cli.config)
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    conf.validate()?;

    let log_path = init_logging(&conf.output.output_dir, cli.verbose)?;
    info!("Logging to {}", log_path.display());

    let policy = CapturePolicy::from_settings(&conf.acquisition);
    let mut bench = sim::prepared_bench(cli.seed, &conf.profile, policy)?;

    let writer = SessionWriter::new(
        &conf.output.output_dir,
        conf.output.compression_level,
        conf.output.blosc_threads,
        DirectoryScan,
    );
    let mut session = AcquisitionSession::new(&conf.acquisition);
    let files = session.run_and_close(&mut bench, &writer)?;

    info!("Saved run {}:", files.run_id);
    for path in files.paths() {
        info!("  {}", path.display());
    }
    Ok(())
}
