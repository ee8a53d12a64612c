use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

use webconnectivity::config::{Config, helper_netx, load_config, probe_netx};
use webconnectivity::helper::{self, Helper};
use webconnectivity::model::Measurement;
use webconnectivity::probe::{DEFAULT_USER_AGENT, HelperClient, LogProgress, Measurer};

#[derive(Debug, Parser)]
#[command(name = "webconnectivity", version, about)]
struct Cli {
    /// YAML configuration file. Defaults to ./config.yml when present.
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    /// Name servers to use instead of the configured ones.
    #[arg(long = "name-server", env = "DNS_HOSTS", value_delimiter = ',', global = true)]
    name_servers: Vec<String>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Measure URLs, writing one JSON measurement per line.
    Probe {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Test helper to ask, before the configured ones.
        #[arg(long = "test-helper")]
        test_helpers: Vec<String>,

        /// Write measurements here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Serve the control test helper.
    Helper {
        /// Address to listen on, overriding the configuration.
        #[arg(long)]
        listen: Option<String>,
    },
}

fn to_fixed_width(input: &str, width: usize) -> String {
    use unicode_truncate::UnicodeTruncateStr;

    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "webconnectivity=debug"
    } else {
        "webconnectivity=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    // reqwest and our handshaker must agree on the provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut config = load_config(cli.config.as_deref()).context("cannot load configuration")?;
    if !cli.name_servers.is_empty() {
        config.dns.name_servers = cli.name_servers.iter().map(|s| s.trim().to_string()).collect();
    }

    match cli.command {
        Command::Probe {
            urls,
            test_helpers,
            output,
        } => {
            let mut helpers = test_helpers;
            helpers.append(&mut config.probe.test_helpers);
            config.probe.test_helpers = helpers;
            config.validate().context("invalid configuration")?;
            run_probe(&config, &urls, output).await
        }
        Command::Helper { listen } => {
            if let Some(listen) = listen {
                config.helper.listen = listen;
            }
            config.validate().context("invalid configuration")?;
            run_helper(&config).await
        }
    }
}

async fn run_probe(
    config: &Config,
    urls: &[String],
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let helpers: Vec<Url> = config.probe.test_helper_urls()?;
    if helpers.is_empty() {
        bail!("no test helpers configured, pass --test-helper or set probe.test_helpers");
    }
    info!(helpers = helpers.len(), "using test helpers");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.probe.timeout_seconds))
        .user_agent(DEFAULT_USER_AGENT)
        .build()
        .context("cannot build test helper client")?;
    let netx = probe_netx(config).context("cannot set up the network stack")?;
    let settings = config
        .probe
        .settings(config.dns.name_servers.first().cloned());
    let measurer = Measurer::new(settings, netx, Arc::new(HelperClient::new(client, helpers)));

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let width = urls.iter().map(|url| url.len()).max().unwrap_or(10).min(60);
    let mut failed = 0;
    for url in urls {
        match measurer.run(url, &LogProgress).await {
            Ok(measurement) => {
                report(&measurement, width);
                serde_json::to_writer(&mut out, &measurement)?;
                writeln!(out)?;
                out.flush()?;
            }
            Err(err) => {
                error!(%url, error = %err, "cannot measure");
                failed += 1;
            }
        }
    }

    if failed == urls.len() {
        bail!("no URL could be measured");
    }
    Ok(())
}

fn report(measurement: &Measurement, width: usize) {
    let keys = measurement.summary_keys();
    let input = to_fixed_width(&measurement.input, width);
    if keys.accessible {
        eprintln!("[{input}] ✅ accessible ({:.2}s)", measurement.test_runtime);
    } else if keys.is_anomaly {
        eprintln!("[{input}] ❌ blocking: {}", keys.blocking);
    } else {
        eprintln!("[{input}] ❔ undetermined");
    }
}

async fn run_helper(config: &Config) -> anyhow::Result<()> {
    let netx = helper_netx(config).context("cannot set up the network stack")?;
    let helper = Arc::new(Helper::new(config.helper.settings(), netx));
    let listener = TcpListener::bind(&config.helper.listen)
        .await
        .with_context(|| format!("cannot listen on {}", config.helper.listen))?;

    helper::serve(listener, helper, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
