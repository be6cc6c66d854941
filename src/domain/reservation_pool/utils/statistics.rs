use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::reservation_pool::pool::pool_stats::StateCounts;
use crate::error::Result;

/// Log target of the per-tick analytics events. The console logger drops this
/// target; the log file keeps it.
pub const POOL_ANALYTICS_TARGET: &str = "pool_analytics";

/// One row of the statistics file, taken after each scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TickRecord {
    pub tick: u64,

    /// Clock time (ms) at the end of the tick.
    pub time: i64,

    pub staging: usize,
    pub ready: usize,
    pub in_use: usize,
    pub cached: usize,
    pub pending_removal: usize,
    pub queued: usize,

    pub pending_trials: usize,
    pub running_trials: usize,
    pub finished_trials: usize,

    /// Placement groups alive on the backend.
    pub backend_live: usize,
}

impl TickRecord {
    pub fn counts(&self) -> StateCounts {
        StateCounts {
            staging: self.staging,
            ready: self.ready,
            in_use: self.in_use,
            cached: self.cached,
            pending_removal: self.pending_removal,
            queued: self.queued,
        }
    }
}

/// Writes the records as `;` delimited CSV with a header row.
pub fn write_records<W: Write>(records: &[TickRecord], writer: W) -> Result<()> {
    let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);
    for record in records {
        csv_wtr.serialize(record)?;
    }
    csv_wtr.flush()?;
    Ok(())
}

pub fn write_records_to_file(records: &[TickRecord], path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_records(records, file)?;
    log::info!("Wrote {} tick record(s) to '{}'", records.len(), path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_header_and_semicolons() {
        let record = TickRecord {
            tick: 3,
            time: 3000,
            staging: 1,
            ready: 0,
            in_use: 2,
            cached: 0,
            pending_removal: 1,
            queued: 4,
            pending_trials: 5,
            running_trials: 2,
            finished_trials: 1,
            backend_live: 3,
        };

        let mut buffer = Vec::new();
        write_records(&[record], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("Tick;Time;Staging;Ready;InUse;Cached;PendingRemoval;Queued;PendingTrials;RunningTrials;FinishedTrials;BackendLive")
        );
        assert_eq!(lines.next(), Some("3;3000;1;0;2;0;1;4;5;2;1;3"));
        assert_eq!(record.counts().demand(), 7);
    }
}
