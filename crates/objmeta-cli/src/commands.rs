use std::fs;
use std::sync::Arc;

use anyhow::{bail, ensure, Context};
use colored::Colorize;
use objmeta_cache::{
    record_size, CacheConfig, CacheHeader, FlushOutcome, FlushRegistry, Fingerprint,
    MetadataCache, HEADER_LEN,
};
use objmeta_types::ObjectId;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

/// A command result that can be printed for people or as JSON.
trait Report: Serialize {
    fn print_text(&self);
}

fn emit<R: Report>(format: OutputFormat, report: &R) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => report.print_text(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let registry = FlushRegistry::global();
    match cli.command {
        Command::Inspect(args) => emit(cli.format, &cmd_inspect(&config, &args)?),
        Command::Get(args) => emit(cli.format, &cmd_get(&config, &registry, &args)?),
        Command::Set(args) => emit(cli.format, &cmd_set(&config, &registry, &args)?),
        Command::Dump(args) => emit(cli.format, &cmd_dump(&config, &registry, &args)?),
        Command::Hash(args) => emit(cli.format, &cmd_hash(&args)),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    debug!(
        cache_dir = %config.cache_dir.display(),
        read_mode = ?config.read_mode,
        "loaded cache configuration"
    );
    Ok(config)
}

fn parse_id(hex: &str) -> anyhow::Result<ObjectId> {
    ObjectId::from_hex(hex).with_context(|| format!("invalid object id {hex:?}"))
}

fn open_cache(
    config: &CacheConfig,
    registry: &Arc<FlushRegistry>,
    args: &CacheArgs,
) -> anyhow::Result<MetadataCache> {
    let cache = MetadataCache::new(&args.name, args.width, config)?
        .with_registry(Arc::clone(registry));
    Ok(match &args.fingerprint {
        Some(hex) => {
            let fingerprint = Fingerprint::from_hex(hex)
                .with_context(|| format!("invalid fingerprint {hex:?}"))?;
            cache.with_validity(fingerprint)
        }
        None => cache,
    })
}

#[derive(Debug, Serialize)]
struct InspectReport {
    name: String,
    path: String,
    version: u32,
    width: u32,
    fingerprint: String,
    records: usize,
    trailing_bytes: usize,
}

impl Report for InspectReport {
    fn print_text(&self) {
        println!("{} {}", "cache".bold(), self.name.yellow().bold());
        println!("  path:        {}", self.path);
        println!("  version:     {}", self.version);
        println!("  width:       {} bytes", self.width);
        println!("  fingerprint: {}", self.fingerprint.cyan());
        println!("  records:     {}", self.records.to_string().bold());
        if self.trailing_bytes > 0 {
            println!(
                "  {} {} trailing bytes after the last record",
                "warning:".yellow(),
                self.trailing_bytes
            );
        }
    }
}

fn cmd_inspect(config: &CacheConfig, args: &InspectArgs) -> anyhow::Result<InspectReport> {
    let path = config.cache_path(&args.name);
    let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let header = CacheHeader::decode(&data)
        .with_context(|| format!("{} is not a cache file", path.display()))?;

    let body = data.len() - HEADER_LEN;
    let stride = record_size(header.width as usize);
    Ok(InspectReport {
        name: args.name.clone(),
        path: path.display().to_string(),
        version: header.version,
        width: header.width,
        fingerprint: header.fingerprint.to_hex(),
        records: body / stride,
        trailing_bytes: body % stride,
    })
}

#[derive(Debug, Serialize)]
struct GetReport {
    name: String,
    id: String,
    value: Option<String>,
}

impl Report for GetReport {
    fn print_text(&self) {
        match &self.value {
            Some(value) => println!("{}", value),
            None => println!("{} no value for {}", "✗".red(), self.id.yellow()),
        }
    }
}

fn cmd_get(
    config: &CacheConfig,
    registry: &Arc<FlushRegistry>,
    args: &GetArgs,
) -> anyhow::Result<GetReport> {
    let id = parse_id(&args.id)?;
    let cache = open_cache(config, registry, &args.cache)?;
    Ok(GetReport {
        name: args.cache.name.clone(),
        id: id.to_hex(),
        value: cache.lookup(&id).map(hex::encode),
    })
}

#[derive(Debug, Serialize)]
struct SetReport {
    name: String,
    id: String,
    value: String,
    previous: Option<String>,
    records_written: usize,
}

impl Report for SetReport {
    fn print_text(&self) {
        println!(
            "{} {} = {} in {}",
            "✓".green().bold(),
            self.id.yellow(),
            self.value,
            self.name.bold()
        );
        if let Some(previous) = &self.previous {
            println!("  replaced {}", previous.dimmed());
        }
        println!("  {} records written", self.records_written);
    }
}

fn cmd_set(
    config: &CacheConfig,
    registry: &Arc<FlushRegistry>,
    args: &SetArgs,
) -> anyhow::Result<SetReport> {
    let id = parse_id(&args.id)?;
    let value = hex::decode(&args.value)
        .with_context(|| format!("value {:?} is not hex", args.value))?;
    ensure!(
        value.len() == args.cache.width,
        "value is {} bytes but the cache width is {}",
        value.len(),
        args.cache.width
    );

    let guard = registry.guard();
    let cache = open_cache(config, registry, &args.cache)?;
    let previous = cache.add(&id, &value);
    let report = guard.finish();

    if let Some((name, err)) = report.failures.into_iter().next() {
        return Err(anyhow::Error::new(err).context(format!("failed to write cache {name}")));
    }
    let records_written = report
        .outcomes
        .iter()
        .find_map(|(name, outcome)| match outcome {
            FlushOutcome::Written { records, .. } if *name == args.cache.name => Some(*records),
            _ => None,
        });
    let Some(records_written) = records_written else {
        bail!("cache {} was not written", args.cache.name);
    };

    Ok(SetReport {
        name: args.cache.name.clone(),
        id: id.to_hex(),
        value: hex::encode(&value),
        previous: previous.map(hex::encode),
        records_written,
    })
}

#[derive(Debug, Serialize)]
struct DumpRecord {
    id: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct DumpReport {
    name: String,
    width: usize,
    records: Vec<DumpRecord>,
}

impl Report for DumpReport {
    fn print_text(&self) {
        for record in &self.records {
            println!("{} {}", record.id.yellow(), record.value);
        }
        println!(
            "{} {} records of {} bytes",
            self.name.bold(),
            self.records.len(),
            self.width
        );
    }
}

fn cmd_dump(
    config: &CacheConfig,
    registry: &Arc<FlushRegistry>,
    args: &DumpArgs,
) -> anyhow::Result<DumpReport> {
    let cache = open_cache(config, registry, &args.cache)?;
    let records = cache
        .records()?
        .into_iter()
        .map(|(id, value)| DumpRecord {
            id: id.to_hex(),
            value: hex::encode(value),
        })
        .collect();
    Ok(DumpReport {
        name: args.cache.name.clone(),
        width: cache.width(),
        records,
    })
}

#[derive(Debug, Serialize)]
struct HashReport {
    bytes: usize,
    id: String,
}

impl Report for HashReport {
    fn print_text(&self) {
        println!("{}", self.id);
    }
}

fn cmd_hash(args: &HashArgs) -> HashReport {
    HashReport {
        bytes: args.data.len(),
        id: ObjectId::from_bytes(args.data.as_bytes()).to_hex(),
    }
}
