/// Run artifacts: PID file, run log and token file
///
/// Each artifact has exactly one writer (this process) and its content is
/// the only contract external observers rely on.

pub mod publisher;
pub mod run_log;

pub use publisher::publish;
pub use run_log::RunLog;

use crate::error::ArtifactError;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Literal written to the token file once the endpoint is reachable
pub const TOKEN_LITERAL: &str = "true";

/// Write `pid` in decimal to `path`, replacing any previous content
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), ArtifactError> {
    write_synced(path, pid.to_string().as_bytes())
        .map_err(|e| ArtifactError::new("write pid file", path, e))
}

/// Read a PID file back; `None` when missing or not a positive integer
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

/// Remove the PID file; a file that is already gone is not an error
pub fn remove_pid_file(path: &Path) -> Result<(), ArtifactError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ArtifactError::new("remove pid file", path, e)),
    }
}

/// Write the success literal to the token file and sync it to disk
pub fn write_token(path: &Path) -> Result<(), ArtifactError> {
    write_synced(path, TOKEN_LITERAL.as_bytes())
        .map_err(|e| ArtifactError::new("write token file", path, e))
}

/// True when `path` holds exactly the success literal
pub fn token_is_set(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|content| content == TOKEN_LITERAL)
        .unwrap_or(false)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
