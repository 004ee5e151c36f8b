use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::rtun::tunnel::mapping::TunnelMapping;

pub const DEFAULT_ADDR: &str = ":8421";
pub const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";
pub const DEFAULT_EXPOSE_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Relay,
    Hidden,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Relay => write!(f, "relay"),
            Mode::Hidden => write!(f, "hidden"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Listen address (relay) or relay address (hidden side).
    pub addr: String,
    pub mappings: Vec<TunnelMapping>,
    pub local_host: String,
    pub expose_host: String,
    pub retry_unit: Duration,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub add_source: bool,
}

/// Values given on the command line; anything set here wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub addr: Option<String>,
    pub server: bool,
    pub ports: Vec<String>,
    pub local_host: Option<String>,
    pub expose_host: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    addr: Option<String>,
    #[serde(default)]
    server: bool,
    #[serde(default)]
    ports: Vec<String>,
    local_host: Option<String>,
    expose_host: Option<String>,
    retry_unit_ms: Option<i64>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLogging {
    level: Option<String>,
    format: Option<String>,
    output: Option<String>,
    #[serde(default)]
    add_source: bool,
}

pub fn load(ov: Overrides) -> anyhow::Result<Config> {
    let fc = match &ov.config {
        Some(p) => load_file(p)?,
        None => FileConfig::default(),
    };
    Config::merge(fc, ov)
}

fn load_file(path: &Path) -> anyhow::Result<FileConfig> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let s = String::from_utf8_lossy(&data);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let fc = match ext.as_str() {
        "toml" => toml::from_str(&s).with_context(|| format!("parse toml {}", path.display()))?,
        "yaml" | "yml" => {
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml {}", path.display()))?
        }
        _ => anyhow::bail!("config: unsupported config extension {:?} (expected .toml or .yaml/.yml)", ext),
    };
    Ok(fc)
}

fn pick(flag: Option<String>, file: Option<String>, default: &str) -> String {
    flag.or(file)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    fn merge(fc: FileConfig, ov: Overrides) -> anyhow::Result<Config> {
        let mode = if ov.server || fc.server {
            Mode::Relay
        } else {
            Mode::Hidden
        };

        let specs = if ov.ports.is_empty() { fc.ports } else { ov.ports };
        let mut mappings = Vec::with_capacity(specs.len());
        for spec in &specs {
            let m: TunnelMapping = spec
                .parse()
                .with_context(|| format!("config: invalid port mapping {spec:?}"))?;
            mappings.push(m);
        }

        let fl = fc.logging.unwrap_or_default();
        let cfg = Config {
            mode,
            addr: pick(ov.addr, fc.addr, DEFAULT_ADDR),
            mappings,
            local_host: pick(ov.local_host, fc.local_host, DEFAULT_LOCAL_HOST),
            expose_host: pick(ov.expose_host, fc.expose_host, DEFAULT_EXPOSE_HOST),
            retry_unit: Duration::from_millis(fc.retry_unit_ms.unwrap_or(1000).max(1) as u64),
            logging: LoggingConfig {
                level: pick(ov.log_level, fl.level, "info"),
                format: pick(ov.log_format, fl.format, "text"),
                output: pick(ov.log_output, fl.output, "stderr"),
                add_source: fl.add_source,
            },
        };

        if cfg.mode == Mode::Hidden && cfg.mappings.is_empty() {
            anyhow::bail!("config: nothing to run (pass --server, or at least one --port local:remote)");
        }
        match cfg.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("config: unknown log format {other:?} (expected text|json)"),
        }

        Ok(cfg)
    }
}
