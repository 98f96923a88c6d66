//! Print live query snapshots until done.

use std::time::Duration;

use glean_cache::{Loaded, Snapshot, SyncContext};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// How long `--once` waits for the live query to catch up with the store.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Print the current snapshot, then either follow updates until Ctrl-C or,
/// with `once`, wait for stored events and print until caught up.
pub async fn run<T>(ctx: &SyncContext, mut loaded: Loaded<T>, once: bool) -> Result<()>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    print_snapshot(&loaded.query.current())?;

    if once {
        loaded.stored_events_loaded().await;
        let target = ctx.store().version();

        let query = &mut loaded.query;
        let settle = async {
            while query.version() < target {
                match query.changed().await {
                    Some(snapshot) => print_snapshot(&snapshot)?,
                    None => break,
                }
            }
            Ok::<_, miette::Report>(())
        };
        match tokio::time::timeout(SETTLE_TIMEOUT, settle).await {
            Ok(result) => result?,
            Err(_) => warn!(target_version = target, "live query did not catch up; exiting"),
        }
    } else {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
                snapshot = loaded.query.changed() => match snapshot {
                    Some(snapshot) => print_snapshot(&snapshot)?,
                    None => break,
                },
            }
        }
    }

    let stats = loaded.finish().await;
    info!(
        received = stats.received,
        stored = stats.stored,
        skipped = stats.skipped,
        failed = stats.failed,
        "streams closed"
    );
    match stats.fault {
        Some(fault) => Err(fault).into_diagnostic(),
        None => Ok(()),
    }
}

/// One JSON line: `{"version":N,"records":...}` or `{"version":N,"error":"..."}`.
fn print_snapshot<T: Serialize>(snapshot: &Snapshot<T>) -> Result<()> {
    let mut line = Map::new();
    line.insert("version".to_string(), Value::from(snapshot.version));
    match &snapshot.result {
        Ok(records) => {
            line.insert("records".to_string(), serde_json::to_value(records).into_diagnostic()?);
        }
        Err(fault) => {
            line.insert("error".to_string(), Value::from(fault.to_string()));
        }
    }
    println!("{}", Value::Object(line));
    Ok(())
}
