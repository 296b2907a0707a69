use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use nanopond_app::{ExitFlag, SharedWorld, renderer::{HeadlessRenderer, Renderer, RendererContext}, terminal::TerminalRenderer};
use nanopond_core::{PondConfig, ReportSink, World};
use nanopond_storage::CsvReportSink;
use owo_colors::OwoColorize;
use serde_json::Value as JsonValue;
use std::{
    fmt, fs,
    io::{self, IsTerminal},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, atomic::AtomicBool},
};
use tracing::info;

fn main() -> Result<()> {
    let cli = AppCli::parse();
    init_tracing();

    let config = compose_config(&cli)?;
    eprintln!(
        "{} v{} ({}x{} pond)",
        "nanopond".cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        config.width,
        config.height,
    );

    let (active_mode, renderer) = resolve_renderer(cli.mode, cli.ticks);
    let sink = build_sink(&cli, active_mode)?;
    let world = World::with_sink(config, sink)?;
    let world: SharedWorld = Arc::new(Mutex::new(world));
    let exit_now: ExitFlag = Arc::new(AtomicBool::new(false));

    info!(
        requested_mode = cli.mode.as_str(),
        active_mode = active_mode.as_str(),
        renderer = renderer.name(),
        ticks = cli.ticks,
        "starting nanopond shell"
    );
    renderer.run(RendererContext {
        world,
        exit_now,
        tick_limit: cli.ticks,
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Parser, Debug)]
#[command(name = "nanopond-app", version, about = "Nanopond artificial-life simulator shell")]
struct AppCli {
    /// Rendering mode (auto picks the terminal view on a tty, headless
    /// otherwise or when a tick limit is set).
    #[arg(long, value_enum, env = "NANOPOND_MODE", default_value_t = RendererMode::Auto)]
    mode: RendererMode,
    /// Layered configuration files (TOML) applied in order.
    #[arg(
        long = "config",
        value_name = "FILE",
        action = ArgAction::Append,
        env = "NANOPOND_CONFIG",
        value_delimiter = ';'
    )]
    config_layers: Vec<PathBuf>,
    /// Write report rows to this file instead of standard output.
    #[arg(long = "csv", value_name = "FILE", env = "NANOPOND_CSV")]
    csv: Option<PathBuf>,
    /// Stop after this many ticks; 0 runs until interrupted.
    #[arg(long, default_value_t = 0, env = "NANOPOND_TICKS")]
    ticks: u64,
    /// Override the configured PRNG seed.
    #[arg(long, env = "NANOPOND_SEED")]
    seed: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum RendererMode {
    Auto,
    Terminal,
    Headless,
}

impl RendererMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Terminal => "terminal",
            Self::Headless => "headless",
        }
    }
}

impl fmt::Display for RendererMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn resolve_renderer(mode: RendererMode, ticks: u64) -> (RendererMode, Box<dyn Renderer>) {
    let active = match mode {
        RendererMode::Auto => {
            if ticks > 0 || !io::stdout().is_terminal() {
                RendererMode::Headless
            } else {
                RendererMode::Terminal
            }
        }
        other => other,
    };
    let renderer: Box<dyn Renderer> = match active {
        RendererMode::Terminal => Box::new(TerminalRenderer::default()),
        _ => Box::new(HeadlessRenderer),
    };
    (active, renderer)
}

/// Pick the report sink: an explicit CSV path wins; otherwise headless
/// runs stream rows to stdout while the terminal view, which owns
/// stdout, relies on the in-memory report history.
fn build_sink(cli: &AppCli, mode: RendererMode) -> Result<Box<dyn ReportSink>> {
    if let Some(path) = &cli.csv {
        let sink = CsvReportSink::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        return Ok(Box::new(sink));
    }
    if mode == RendererMode::Terminal {
        Ok(Box::new(nanopond_core::NullSink))
    } else {
        Ok(Box::new(CsvReportSink::stdout()))
    }
}

fn compose_config(cli: &AppCli) -> Result<PondConfig> {
    let mut config = apply_config_layers(PondConfig::default(), &cli.config_layers)?;
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn apply_config_layers(base: PondConfig, layers: &[PathBuf]) -> Result<PondConfig> {
    if layers.is_empty() {
        return Ok(base);
    }

    let mut merged = serde_json::to_value(&base).expect("serialize base config");
    for path in layers {
        info!(layer = %path.display(), "applying configuration layer");
        merge_layer(&mut merged, load_config_layer(path)?);
    }
    serde_json::from_value(merged).context("merged configuration is not a valid pond config")
}

fn load_config_layer(path: &Path) -> Result<JsonValue> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration layer {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse TOML config layer {}", path.display()))
}

/// Overlay a layer's keys onto the base config. `PondConfig` is a flat
/// table, so a later layer simply overwrites the fields it names.
fn merge_layer(base: &mut JsonValue, layer: JsonValue) {
    if let (JsonValue::Object(base_map), JsonValue::Object(layer_map)) = (base, layer) {
        for (key, value) in layer_map {
            base_map.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_parse() {
        let cli = AppCli::try_parse_from(["nanopond-app"]).expect("cli");
        assert_eq!(cli.mode, RendererMode::Auto);
        assert_eq!(cli.ticks, 0);
        assert!(cli.csv.is_none());
        assert!(cli.seed.is_none());
        assert!(cli.config_layers.is_empty());
    }

    #[test]
    fn cli_accepts_overrides() {
        let cli = AppCli::try_parse_from([
            "nanopond-app",
            "--mode",
            "headless",
            "--ticks",
            "500",
            "--seed",
            "99",
            "--csv",
            "out.csv",
        ])
        .expect("cli");
        assert_eq!(cli.mode, RendererMode::Headless);
        assert_eq!(cli.ticks, 500);
        assert_eq!(cli.seed, Some(99));
        assert_eq!(cli.csv.as_deref(), Some(Path::new("out.csv")));
    }

    #[test]
    fn config_layers_merge_in_order() {
        let dir = std::env::temp_dir().join(format!("nanopond_cfg_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let first = dir.join("first.toml");
        let second = dir.join("second.toml");
        fs::write(&first, "width = 64\nheight = 48\n").expect("first layer");
        fs::write(&second, "height = 32\nmutation_rate = 9000\n").expect("second layer");

        let config = apply_config_layers(PondConfig::default(), &[first, second])
            .expect("merged config");
        assert_eq!(config.width, 64);
        assert_eq!(config.height, 32);
        assert_eq!(config.mutation_rate, 9_000);
        assert_eq!(config.report_frequency, PondConfig::default().report_frequency);
    }

    #[test]
    fn seed_override_takes_effect() {
        let cli = AppCli::try_parse_from(["nanopond-app", "--seed", "7"]).expect("cli");
        let config = compose_config(&cli).expect("config");
        assert_eq!(config.rng_seed, Some(7));
    }
}
