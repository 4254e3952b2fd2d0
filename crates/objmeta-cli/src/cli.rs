use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "objmeta",
    about = "Inspect and edit persistent object metadata caches",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the cache files (overrides the config file)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show a cache file's header and record count
    Inspect(InspectArgs),
    /// Look up the value stored for an object id
    Get(GetArgs),
    /// Store a value for an object id and write the cache back
    Set(SetArgs),
    /// List every record in a cache, sorted by id
    Dump(DumpArgs),
    /// Print the object id of some data
    Hash(HashArgs),
}

/// Options shared by commands that open a cache.
#[derive(Args)]
pub struct CacheArgs {
    /// Cache name (file name inside the cache directory)
    pub name: String,
    /// Payload width in bytes
    #[arg(short, long)]
    pub width: usize,
    /// Expected validity fingerprint, 40 hex chars
    #[arg(long)]
    pub fingerprint: Option<String>,
}

#[derive(Args)]
pub struct InspectArgs {
    pub name: String,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub cache: CacheArgs,
    /// Object id, 40 hex chars
    pub id: String,
}

#[derive(Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub cache: CacheArgs,
    /// Object id, 40 hex chars
    pub id: String,
    /// Payload as hex, exactly `width` bytes
    pub value: String,
}

#[derive(Args)]
pub struct DumpArgs {
    #[command(flatten)]
    pub cache: CacheArgs,
}

#[derive(Args)]
pub struct HashArgs {
    pub data: String,
}
