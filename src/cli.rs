use clap::{Parser, Subcommand};
use std::net::SocketAddr;

use imagebox::config::HumanDuration;

#[derive(Parser, Debug)]
#[command(name = "imagebox")]
#[command(about = "Asynchronous image loader and cache", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load images and report where each came from
    Fetch(FetchArgs),
    /// Run the HTTP preview server
    Serve(ServeArgs),
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Locators to load (http(s)://, file://, bundle:///)
    #[arg(required = true)]
    pub locators: Vec<String>,

    /// Loader to use
    #[arg(long, default_value = imagebox::registry::DEFAULT_LOADER_NAME)]
    pub loader: String,

    /// Override the maximum number of concurrent fetches
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the loading timeout (e.g. "10s", "500ms"; "0" disables)
    #[arg(long)]
    pub timeout: Option<HumanDuration>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
