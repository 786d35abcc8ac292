use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use job_id_map::config::data_dir_from_lookup;
use job_id_map::{
    FileStorage, JobIdMappingStore, KeyValueStorage, Lookup, MappingRecord, NewMapping,
    StoreConfig,
};

#[derive(Parser, Debug)]
#[command(name = "job-id-map")]
#[command(about = "Inspect and maintain the job id mapping store")]
pub struct JobIdMapCli {
    /// Directory holding the slot files. Defaults to JOB_ID_MAP_DATA_DIR or ./.job-id-map.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Slot name. Defaults to JOB_ID_MAP_STORAGE_KEY or job_id_mappings.
    #[arg(long, global = true)]
    pub storage_key: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Map a local job id to its remote document id
    Add {
        local_id: String,
        remote_id: String,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        company: String,
    },
    /// Print the remote id mapped to a local id
    Remote { local_id: String },
    /// Print the local id mapped to a remote id
    Local { remote_id: String },
    /// List mappings, optionally for one owner
    List {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Remove the mapping for a local id
    Remove { local_id: String },
    /// Drop mappings older than the retention window
    Prune {
        #[arg(long)]
        max_age_days: Option<i64>,
    },
    /// Delete every mapping
    Clear,
    /// Print the whole collection as pretty JSON
    Export,
}

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    NotFound,
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Success => ExitCode::SUCCESS,
            CommandStatus::NotFound => ExitCode::from(1),
        }
    }
}

pub fn run() -> Result<ExitCode> {
    let cli = JobIdMapCli::parse();
    let mut config = StoreConfig::from_env().context("load job id map config")?;
    if let Some(storage_key) = cli.storage_key {
        config = config.with_storage_key(storage_key);
    }
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| data_dir_from_lookup(|key| std::env::var(key).ok()));
    tracing::debug!(
        data_dir = %data_dir.display(),
        storage_key = %config.storage_key,
        "opening job id map"
    );

    let store = JobIdMappingStore::with_config(FileStorage::new(data_dir), config);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&store, cli.command, &mut out).map(ExitCode::from)
}

/// Runs one command against `store`, writing results to `out`.
///
/// Storage failures that the store swallowed are surfaced as errors here.
pub fn execute<S: KeyValueStorage>(
    store: &JobIdMappingStore<S>,
    command: Commands,
    out: &mut impl Write,
) -> Result<CommandStatus> {
    store.clear_last_failure();
    match command {
        Commands::Add {
            local_id,
            remote_id,
            owner,
            title,
            company,
        } => {
            store.upsert_mapping(NewMapping::new(local_id, remote_id, owner, title, company));
            ensure_no_failure(store)?;
            Ok(CommandStatus::Success)
        }
        Commands::Remote { local_id } => {
            print_lookup(store, store.resolve_remote_id(&local_id), out)
        }
        Commands::Local { remote_id } => {
            print_lookup(store, store.resolve_local_id(&remote_id), out)
        }
        Commands::List { owner } => {
            let records = match owner {
                Some(owner) => store.list_for_owner(&owner),
                None => store.list_all(),
            };
            ensure_no_failure(store)?;
            for record in &records {
                writeln!(out, "{}", format_record(record)).context("write mapping")?;
            }
            Ok(CommandStatus::Success)
        }
        Commands::Remove { local_id } => {
            store.remove_mapping(&local_id);
            ensure_no_failure(store)?;
            Ok(CommandStatus::Success)
        }
        Commands::Prune { max_age_days } => {
            match max_age_days {
                Some(days) => store.prune_older_than(days),
                None => store.prune_expired(),
            }
            ensure_no_failure(store)?;
            Ok(CommandStatus::Success)
        }
        Commands::Clear => {
            store.clear_all();
            ensure_no_failure(store)?;
            Ok(CommandStatus::Success)
        }
        Commands::Export => {
            let text = store.export_as_text();
            ensure_no_failure(store)?;
            writeln!(out, "{text}").context("write export")?;
            Ok(CommandStatus::Success)
        }
    }
}

fn print_lookup<S: KeyValueStorage>(
    store: &JobIdMappingStore<S>,
    lookup: Lookup<String>,
    out: &mut impl Write,
) -> Result<CommandStatus> {
    match lookup {
        Lookup::Found(id) => {
            writeln!(out, "{id}").context("write lookup result")?;
            Ok(CommandStatus::Success)
        }
        Lookup::Absent => Ok(CommandStatus::NotFound),
        Lookup::Unavailable => {
            ensure_no_failure(store)?;
            Err(anyhow!("job id map is unavailable"))
        }
    }
}

fn ensure_no_failure<S: KeyValueStorage>(store: &JobIdMappingStore<S>) -> Result<()> {
    match store.last_failure() {
        Some(failure) => Err(anyhow!("{} failed: {}", failure.operation, failure.message)),
        None => Ok(()),
    }
}

fn format_record(record: &MappingRecord) -> String {
    [
        record.local_id.as_str(),
        record.remote_id.as_str(),
        record.owner_id.as_str(),
        record.created_at.as_str(),
        record.title.as_str(),
        record.secondary_label.as_str(),
    ]
    .join("\t")
}
