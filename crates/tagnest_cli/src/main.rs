//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `tagnest_core` linkage with a ping and version probe.
//! - Run one nested-group expansion against an in-memory store.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `tagnest [LOG_DIR]`. With `LOG_DIR`, engine events are written to
//! rotating log files there.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tagnest_core::{
    default_log_level, init_logging, open_db_in_memory, EngineConfig, EntityRef,
    SqliteWorkspaceRepository, WorkspaceSessions,
};
use uuid::Uuid;

fn main() -> ExitCode {
    println!("tagnest_core ping={}", tagnest_core::ping());
    println!("tagnest_core version={}", tagnest_core::core_version());

    if let Some(arg) = std::env::args().nth(1) {
        let log_dir = match resolve_log_dir(&arg) {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("tagnest_core logging failed: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
            eprintln!("tagnest_core logging failed: {err}");
            return ExitCode::FAILURE;
        }
        println!("tagnest_core logging dir={}", log_dir.display());
    }

    match expand_probe() {
        Ok(tags) => {
            println!("tagnest_core expand engineering={}", tags.join(","));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("tagnest_core expand failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn expand_probe() -> Result<Vec<String>, Box<dyn Error>> {
    let repo = SqliteWorkspaceRepository::try_new(open_db_in_memory()?)?;
    let sessions = WorkspaceSessions::new(EngineConfig::default())?;
    let workspace_id = Uuid::new_v4();
    sessions.open(workspace_id, repo)?;

    let backend = sessions.create_group(
        workspace_id,
        "backend",
        &[
            EntityRef::Tag("python".to_string()),
            EntityRef::Tag("java".to_string()),
        ],
    )?;
    let engineering = sessions.create_group(
        workspace_id,
        "engineering",
        &[
            EntityRef::Group(backend),
            EntityRef::Tag("frontend-tag".to_string()),
        ],
    )?;

    let expansion = sessions.expand(workspace_id, engineering)?;
    Ok(expansion.tags.iter().cloned().collect())
}

/// Anchors a relative log directory at the current working directory.
fn resolve_log_dir(arg: &str) -> std::io::Result<PathBuf> {
    let path = Path::new(arg.trim());
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
