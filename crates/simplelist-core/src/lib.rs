pub mod aggregate;
pub mod cli;
pub mod commands;
pub mod completion;
pub mod config;
pub mod datastore;
pub mod filter;
pub mod item;
pub mod render;
pub mod search;
pub mod sort;
pub mod store;
pub mod tag;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Command, ListArgs};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting simplelist CLI"
    );
    debug!(overrides = ?cli.rc_overrides, "command-line rc overrides");

    let mut cfg = config::Config::load(cli.rc_file.as_deref())?;
    cfg.apply_overrides(
        cli.rc_overrides
            .into_iter()
            .map(|kv| (kv.key, kv.value)),
    );

    let registry = datastore::LocationRegistry::in_config_dir()?;
    let mut renderer = render::Renderer::new(&cfg)?;
    let command = cli
        .command
        .unwrap_or_else(|| Command::List(ListArgs::default()));

    if let Command::Location { dir } = &command {
        return commands::cmd_location(&cfg, &registry, cli.data.as_deref(), dir.as_deref());
    }

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref(), &registry)
        .context("failed to resolve save location")?;

    let store = datastore::DataStore::open(&data_dir)
        .with_context(|| format!("failed to open datastore at {}", data_dir.display()))?;

    commands::dispatch(&store, &cfg, &mut renderer, command)?;

    info!("done");
    Ok(())
}
