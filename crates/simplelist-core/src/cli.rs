use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("expected KEY=VALUE, got: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

fn key_val_parser() -> clap::builder::ValueParser {
    clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sl",
    version,
    about = "Simple List: a tag-and-field driven list keeper",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Override a config key for this run (`--rc sort.order=asc`).
    #[arg(long = "rc", value_parser = key_val_parser(), action = ArgAction::Append, global = true)]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    /// Save location, taking precedence over config and `sl location`.
    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an item; it inherits tags from the active filter set.
    Add(AddArgs),
    /// Show the items selected by the active filter set.
    List(ListArgs),
    Info {
        id: String,
    },
    Edit(EditArgs),
    #[command(subcommand)]
    Tag(TagCommand),
    /// Show, set or remove one field of an item.
    Field(FieldArgs),
    /// Toggle completion of an item.
    Done(DoneArgs),
    Delete {
        id: String,
    },
    /// Distinct plain tags in use.
    Tags {
        #[arg(short = 'a', long = "all")]
        all: bool,
    },
    /// Distinct field keys in use.
    Fields {
        #[arg(short = 'a', long = "all")]
        all: bool,
    },
    #[command(subcommand)]
    Filter(FilterCommand),
    /// Merge items from an exported file; same ids are overwritten.
    Import {
        path: PathBuf,
    },
    /// Write all items to a file or directory (default: current directory).
    Export {
        path: Option<PathBuf>,
    },
    /// Show or choose the directory items are saved in.
    Location {
        dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    pub summary: Vec<String>,

    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,

    #[arg(short = 't', long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    #[arg(short = 'f', long = "field", value_parser = key_val_parser(), action = ArgAction::Append)]
    pub fields: Vec<KeyVal>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(short = 's', long = "search")]
    pub search: Option<String>,

    #[arg(long = "sort")]
    pub sort: Option<String>,

    #[arg(long = "asc", conflicts_with = "desc")]
    pub asc: bool,

    #[arg(long = "desc")]
    pub desc: bool,

    /// `any` or `all`.
    #[arg(long = "match")]
    pub match_mode: Option<String>,

    #[arg(short = 'a', long = "all")]
    pub show_completed: bool,

    #[arg(long = "no-filter")]
    pub no_filter: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(short = 's', long = "summary")]
    pub summary: Option<String>,

    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TagCommand {
    Add {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    Remove {
        id: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    Rename {
        id: String,
        from: String,
        to: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FieldArgs {
    pub id: String,
    pub key: String,
    pub value: Option<String>,

    #[arg(long = "remove", conflicts_with = "value")]
    pub remove: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DoneArgs {
    pub id: String,

    /// Write the completion at once instead of after the delay.
    #[arg(long = "now")]
    pub immediate: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    /// Add a filter to the active set, e.g. `Tags Include Urgent`.
    Add {
        field: String,
        operator: String,
        value: String,
    },
    Edit {
        id: String,
        field: String,
        operator: String,
        value: String,
    },
    Remove {
        id: String,
    },
    Clear,
    /// Print a filter set (the active one by default).
    Show {
        name: Option<String>,
    },
    Save {
        name: String,
    },
    Load {
        name: String,
    },
    Delete {
        name: String,
    },
    Saved,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        GlobalCli::command().debug_assert();
    }

    #[test]
    fn key_val_requires_equals_and_key() {
        let kv: KeyVal = "sort.order = asc".parse().unwrap();
        assert_eq!(kv.key, "sort.order");
        assert_eq!(kv.value, "asc");
        assert!("novalue".parse::<KeyVal>().is_err());
        assert!("=x".parse::<KeyVal>().is_err());
    }

    #[test]
    fn parses_add_with_tags_and_fields() {
        let cli = GlobalCli::parse_from([
            "sl", "add", "Buy", "milk", "-t", "Errand", "-f", "Priority=High", "--rc",
            "color=off",
        ]);
        assert_eq!(cli.rc_overrides[0].key, "color");
        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.summary.join(" "), "Buy milk");
        assert_eq!(args.tags, vec!["Errand"]);
        assert_eq!(args.fields[0].value, "High");
    }

    #[test]
    fn asc_and_desc_conflict() {
        assert!(GlobalCli::try_parse_from(["sl", "list", "--asc", "--desc"]).is_err());
    }

    #[test]
    fn field_value_and_remove_conflict() {
        assert!(GlobalCli::try_parse_from(["sl", "field", "abc", "Due", "x", "--remove"]).is_err());
    }
}
