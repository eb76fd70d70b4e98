//! Terminal progress line, refreshed on a fixed tick.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use sshx_transfer::TransferStats;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(500);

/// Renders the one-line progress display.
pub fn line(stats: &TransferStats) -> String {
    format!("\r📊 {:>3}% | ⚡ {:.0} KB/s", stats.percent(), stats.kb_per_sec())
}

/// Spawns the progress printer. It redraws every 500 ms until `stop` is
/// cancelled; the caller prints the final state itself.
pub fn spawn_printer(stats: Arc<TransferStats>, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    print!("{}", line(&stats));
                    let _ = std::io::stdout().flush();
                }
            }
        }
    })
}

/// Prints the final progress state (no trailing newline, matching the
/// in-flight redraws).
pub fn print_final(stats: &TransferStats) {
    print!("{}", line(stats));
    let _ = std::io::stdout().flush();
}
