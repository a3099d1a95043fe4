use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shoal::irc::config::Config;
use shoal::irc::core::Ircd;

#[derive(Debug, Parser)]
#[command(name = "shoald", version, about = "A TS6-family IRC server")]
struct Cli {
    /// The configuration file to use
    #[arg(long, default_value = "/etc/shoal.conf")]
    config: PathBuf,

    /// The file to which logs are written
    #[arg(long)]
    log: Option<PathBuf>,

    /// Don't write logs to the console
    #[arg(long)]
    silent: bool,

    /// Generate a configuration file and exit
    #[arg(long)]
    genconf: bool,

    /// Check the configuration file and exit
    #[arg(long)]
    checkconf: bool,
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let console = (!cli.silent).then(fmt::layer);
    let file = match &cli.log {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening logfile {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.genconf {
        let text = serde_json::to_string_pretty(&Config::default_config())?;
        std::fs::write(&cli.config, text)
            .with_context(|| format!("writing configuration to {}", cli.config.display()))?;
        println!("configuration file written to {}", cli.config.display());
        return Ok(());
    }

    init_logging(&cli)?;

    let config = Config::load(&cli.config)?;

    if cli.checkconf {
        config.check()?;
        info!("configuration successfully checked");
        return Ok(());
    }

    let ircd = Ircd::start(config).await?;
    info!("shoal up");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    ircd.quit().await;
    Ok(())
}
