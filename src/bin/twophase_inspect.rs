//! `twophase-inspect`: a debugging aid, in the shape of the teacher crate's
//! `murodb-wal-inspect`. Opens a prepare-record WAL file and a JSON
//! checkpoint-index snapshot, replays them through the recovery driver's
//! `prescan`/`recover` against in-memory collaborators, and prints what
//! would be reconstructed on restart. It never touches a live GXact table
//! belonging to a running process.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use twophase_core::collab::memory::{
    InMemoryClog, InMemoryProcArray, InMemoryStorage, InMemorySubxactMap, NullDistributedXact,
    ResourceManagerRegistry,
};
use twophase_core::config::TwoPhaseConfig;
use twophase_core::coordinator::TwoPhaseCoordinator;
use twophase_core::ids::{BackendId, Lsn};
use twophase_core::wal::FileWal;

const EXIT_OK: i32 = 0;
const EXIT_FATAL_ERROR: i32 = 20;

/// Inspection-time recovery backend id: arbitrary, since this tool never
/// shares a process with a live backend population.
const INSPECT_BACKEND: BackendId = i32::MAX;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormatArg {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "twophase-inspect",
    about = "Replay a prepare-record WAL and checkpoint index without a live database"
)]
struct Cli {
    /// Path to the prepare-record WAL file
    wal: PathBuf,

    /// Path to a JSON checkpoint-index snapshot: `[{"xid":.., "log_id":.., "offset":..}, ...]`
    #[arg(long, value_name = "PATH")]
    checkpoint: PathBuf,

    /// Output format for the report
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormatArg,
}

#[derive(Deserialize)]
struct CheckpointMapEntryFile {
    xid: u32,
    log_id: u32,
    offset: u32,
}

fn load_checkpoint_entries(path: &std::path::Path) -> Result<Vec<CheckpointMapEntryFile>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read checkpoint snapshot {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| format!("failed to parse checkpoint snapshot {}: {}", path.display(), e))
}

fn new_inspection_coordinator(wal_path: &std::path::Path) -> Result<TwoPhaseCoordinator, String> {
    let wal = FileWal::open_append(wal_path)
        .map_err(|e| format!("failed to open WAL {}: {}", wal_path.display(), e))?;
    Ok(TwoPhaseCoordinator::new(
        TwoPhaseConfig::default(),
        /* max_real_backends */ 100,
        Box::new(wal),
        Box::new(InMemoryProcArray::new()),
        Box::new(InMemoryClog::new()),
        Box::new(InMemoryStorage::new()),
        Box::new(InMemorySubxactMap::new()),
        Box::new(ResourceManagerRegistry::new()),
        Box::new(NullDistributedXact::new()),
    ))
}

fn fatal_and_exit(format: &OutputFormatArg, msg: &str) -> ! {
    match format {
        OutputFormatArg::Text => eprintln!("ERROR: {}", msg),
        OutputFormatArg::Json => {
            println!(
                "{{\"status\":\"fatal\",\"error\":{}}}",
                serde_json::to_string(msg).unwrap_or_else(|_| "\"unknown\"".to_string())
            );
        }
    }
    process::exit(EXIT_FATAL_ERROR);
}

fn main() {
    let cli = Cli::parse();

    let entries = load_checkpoint_entries(&cli.checkpoint)
        .unwrap_or_else(|e| fatal_and_exit(&cli.format, &e));

    let coordinator =
        new_inspection_coordinator(&cli.wal).unwrap_or_else(|e| fatal_and_exit(&cli.format, &e));
    for entry in &entries {
        coordinator
            .checkpoint
            .insert_or_replace(entry.xid, Lsn::new(entry.log_id, entry.offset));
    }

    let prescan = coordinator.prescan().unwrap_or_else(|e| {
        fatal_and_exit(&cli.format, &format!("prescan failed: {}", e));
    });
    let recovered = coordinator
        .recover(INSPECT_BACKEND)
        .unwrap_or_else(|e| fatal_and_exit(&cli.format, &format!("recover failed: {}", e)));

    let rows = twophase_core::view::list_prepared_xacts(&coordinator.table);

    match cli.format {
        OutputFormatArg::Text => {
            println!("twophase-inspect report for {}:", cli.wal.display());
            println!("  checkpoint entries:   {}", entries.len());
            println!("  oldest in progress:   {:?}", prescan.oldest_in_progress);
            println!("  next xid floor:       {:?}", prescan.next_xid_floor);
            println!("  recovered xacts:      {}", recovered.len());
            for row in &rows {
                println!(
                    "  - xid {} gid {:?} owner {} database {} prepared_at {}",
                    row.xid, row.gid, row.owner, row.database, row.prepared_at
                );
            }
        }
        OutputFormatArg::Json => {
            let rows_json = rows
                .iter()
                .map(|row| {
                    format!(
                        "{{\"xid\":{},\"gid\":{},\"owner\":{},\"database\":{},\"prepared_at\":{}}}",
                        row.xid,
                        serde_json::to_string(&row.gid.as_str_lossy().into_owned())
                            .unwrap_or_else(|_| "null".to_string()),
                        row.owner,
                        row.database,
                        row.prepared_at
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            println!(
                "{{\"status\":\"ok\",\"wal_path\":{},\"checkpoint_entries\":{},\"oldest_in_progress\":{},\"next_xid_floor\":{},\"recovered\":[{}]}}",
                serde_json::to_string(&cli.wal.display().to_string()).unwrap_or_else(|_| "null".to_string()),
                entries.len(),
                prescan
                    .oldest_in_progress
                    .map(|x| x.to_string())
                    .unwrap_or_else(|| "null".to_string()),
                prescan
                    .next_xid_floor
                    .map(|x| x.to_string())
                    .unwrap_or_else(|| "null".to_string()),
                rows_json
            );
        }
    }

    process::exit(EXIT_OK);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_entry_json_shape_parses() {
        let json = r#"[{"xid": 200, "log_id": 0, "offset": 128}]"#;
        let entries: Vec<CheckpointMapEntryFile> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].xid, 200);
        assert_eq!(entries[0].offset, 128);
    }
}
