mod rtun;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "rtun",
    version,
    about = "rtun - reverse TCP tunnel: expose local services through a public relay"
)]
struct Cli {
    /// Listen address (with --server) or relay address to connect to. Default ":8421".
    #[arg(short = 'a', long = "addr", env = "RTUN_ADDR")]
    addr: Option<String>,

    /// Port mapping "local:remote"; repeat for several services (hidden side only).
    #[arg(short = 'p', long = "port", env = "RTUN_PORTS", value_delimiter = ',')]
    ports: Vec<String>,

    /// Run as the relay instead of the hidden side.
    #[arg(short = 's', long = "server", env = "RTUN_SERVER")]
    server: bool,

    /// Optional config file (.toml/.yaml/.yml); flags override its values.
    #[arg(short = 'c', long = "config", env = "RTUN_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Host the hidden side dials for each mapping's local port. Default "127.0.0.1".
    #[arg(long, env = "RTUN_LOCAL_HOST")]
    local_host: Option<String>,

    /// Host the relay binds negotiated ports on. Default "0.0.0.0".
    #[arg(long, env = "RTUN_EXPOSE_HOST")]
    expose_host: Option<String>,

    /// trace|debug|info|warn|error (RUST_LOG takes precedence).
    #[arg(long, env = "RTUN_LOG_LEVEL")]
    log_level: Option<String>,

    /// text|json
    #[arg(long, env = "RTUN_LOG_FORMAT")]
    log_format: Option<String>,

    /// stderr|stdout|discard|<file path>
    #[arg(long, env = "RTUN_LOG_OUTPUT")]
    log_output: Option<String>,
}

impl From<Cli> for rtun::config::Overrides {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            addr: cli.addr,
            server: cli.server,
            ports: cli.ports,
            local_host: cli.local_host,
            expose_host: cli.expose_host,
            log_level: cli.log_level,
            log_format: cli.log_format,
            log_output: cli.log_output,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    rtun::run(cli.into()).await
}
