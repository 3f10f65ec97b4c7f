/// Success publication: token file, connection release, final log lines

use super::{remove_pid_file, write_token, RunLog};
use crate::config::ArtifactConfig;
use crate::error::ArtifactError;
use crate::health::retry::Confirmed;
use crate::health::Connector;

/// Publish the reachable token for a confirmed connection
///
/// Runs once per process, after the retry loop reached `Success`. The run log
/// is consumed and closed on every path.
pub async fn publish<K: Connector + ?Sized>(
    connector: &K,
    confirmed: Confirmed<K::Connection>,
    artifacts: &ArtifactConfig,
    mut run_log: RunLog,
) -> Result<(), ArtifactError> {
    let Confirmed {
        connection,
        attempts,
    } = confirmed;

    run_log.line("connection OK!.");
    let peer = connector.describe(&connection);
    log::info!("{} after {} attempt(s)", peer, attempts);
    run_log.line("Setting token.");

    let written = write_token(&artifacts.token_file);
    connector.release(connection).await;

    if let Err(e) = written {
        run_log.line(format_args!("token not written: {}", e));
        run_log.close();
        return Err(e);
    }
    log::info!("Token written to {:?}", artifacts.token_file);

    if artifacts.remove_pid_on_exit {
        if let Err(e) = remove_pid_file(&artifacts.pid_file) {
            log::warn!("{}", e);
        }
    }

    run_log.line("ending...");
    run_log.close();
    Ok(())
}
