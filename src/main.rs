mod cli;

use clap::Parser;
use cli::{Cli, Commands, FetchArgs};
use imagebox::config::Config;
use imagebox::loader::{LoadOutcome, LoadedLocation};
use imagebox::locator::Locator;
use imagebox::registry::Registry;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch(args) => fetch(args).await?,
        Commands::Serve(args) => imagebox::api::run(args.address).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&Config::load()?)?),
    }

    Ok(())
}

async fn fetch(args: FetchArgs) -> Result<(), AnyError> {
    let locators = args
        .locators
        .iter()
        .map(|raw| Locator::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let config = Config::load()?;
    let registry = Registry::from_config(&config, Handle::current())?;
    let loader = registry.loader_with_name(&args.loader);

    if let Some(max) = args.concurrency {
        loader.set_maximum_concurrent_loads(max);
    }
    if let Some(timeout) = args.timeout {
        loader.set_loading_timeout(timeout.as_duration());
    }

    let mut loads = JoinSet::new();
    for locator in locators {
        let loader = loader.clone();
        loads.spawn(async move { loader.load(&locator).await });
    }

    let mut failures = 0;
    while let Some(joined) = loads.join_next().await {
        match joined? {
            Some(outcome) => {
                if !outcome.success {
                    failures += 1;
                }
                println!("{}", describe(&outcome));
            }
            None => failures += 1,
        }
    }

    registry.cleanup_loader_with_name(&args.loader);

    if failures > 0 {
        return Err(format!("{} image(s) failed to load", failures).into());
    }
    Ok(())
}

fn describe(outcome: &LoadOutcome) -> String {
    match (&outcome.image, outcome.location) {
        (Some(image), location) if location != LoadedLocation::None => format!(
            "{}\t{:?}\t{}x{}",
            outcome.locator,
            location,
            image.width(),
            image.height()
        ),
        _ => format!(
            "{}\tfailed\t{:?}",
            outcome.locator,
            outcome.failure.unwrap_or(imagebox::loader::FailureKind::Fetch)
        ),
    }
}
