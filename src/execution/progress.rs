use std::time::{Duration, Instant};

use crate::ingestion::ByteCounter;
use crate::types::{IngestionProgress, ProgressPhase};

/// Upper bound of the reading phase, in percent.
const READING_CEILING: f64 = 10.0;
/// Upper bound of the mapping phase; 100 is reserved for the final snapshot.
const MAPPING_CEILING: f64 = 99.0;

/// Builds [`IngestionProgress`] snapshots for one run.
///
/// Snapshots are monotonic in `fraction_complete` and rate-limited to one per `interval`; the
/// final 100% snapshot is never suppressed.
pub(crate) struct ProgressTracker {
    started: Instant,
    interval: Duration,
    last_emit: Option<Instant>,
    last_fraction: f64,
    bytes: ByteCounter,
    bytes_total: u64,
}

impl ProgressTracker {
    pub(crate) fn new(bytes: ByteCounter, bytes_total: u64, interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            interval,
            last_emit: None,
            last_fraction: 0.0,
            bytes,
            bytes_total,
        }
    }

    /// Emit a snapshot unless one was emitted less than `interval` ago.
    pub(crate) fn tick(
        &mut self,
        phase: ProgressPhase,
        rows_processed: u64,
        emit: &mut dyn FnMut(IngestionProgress),
    ) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_emit = Some(now);
        emit(self.snapshot(phase, rows_processed));
        true
    }

    /// The terminal 100% snapshot.
    pub(crate) fn finish(&mut self, rows_processed: u64, emit: &mut dyn FnMut(IngestionProgress)) {
        self.last_fraction = 100.0;
        let mut snap = self.snapshot(ProgressPhase::Mapping, rows_processed);
        snap.fraction_complete = 100.0;
        snap.eta_seconds = Some(0.0);
        self.last_emit = Some(Instant::now());
        emit(snap);
    }

    pub(crate) fn snapshot(&mut self, phase: ProgressPhase, rows_processed: u64) -> IngestionProgress {
        // Zip readers seek back over parts of the archive, so the raw count can overshoot.
        let bytes_processed = self.bytes.get().min(self.bytes_total);
        let ratio = if self.bytes_total > 0 {
            (bytes_processed as f64 / self.bytes_total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let computed = match phase {
            ProgressPhase::Reading => ratio * READING_CEILING,
            ProgressPhase::Mapping => READING_CEILING + ratio * (MAPPING_CEILING - READING_CEILING),
        };
        let fraction_complete = computed.max(self.last_fraction);
        self.last_fraction = fraction_complete;

        let elapsed = self.started.elapsed().as_secs_f64();
        let throughput_rows_per_second = if elapsed > 0.0 {
            rows_processed as f64 / elapsed
        } else {
            0.0
        };
        let eta_seconds = if ratio > 0.0 && ratio < 1.0 && elapsed > 0.0 {
            Some(elapsed * (1.0 - ratio) / ratio)
        } else {
            None
        };

        IngestionProgress {
            fraction_complete,
            phase,
            bytes_processed,
            bytes_total: self.bytes_total,
            rows_processed,
            // Neither reader knows the row count before the pass ends.
            rows_total: None,
            throughput_rows_per_second,
            eta_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::ingestion::source::CountingReader;

    fn tracker_over(bytes: &[u8], interval: Duration) -> (ProgressTracker, CountingReader<&[u8]>) {
        let counter = ByteCounter::default();
        let tracker = ProgressTracker::new(counter.clone(), bytes.len() as u64, interval);
        (tracker, CountingReader::new(bytes, counter))
    }

    #[test]
    fn phases_map_into_their_bands() {
        let data = [0u8; 100];
        let (mut tracker, mut reader) = tracker_over(&data, Duration::ZERO);
        let mut buf = [0u8; 50];
        reader.read_exact(&mut buf).unwrap();

        let reading = tracker.snapshot(ProgressPhase::Reading, 0);
        assert!((reading.fraction_complete - 5.0).abs() < 1e-9);
        assert_eq!(reading.bytes_processed, 50);

        let mapping = tracker.snapshot(ProgressPhase::Mapping, 10);
        assert!((mapping.fraction_complete - 54.5).abs() < 1e-9);
        assert_eq!(mapping.rows_total, None);
    }

    #[test]
    fn fraction_never_decreases() {
        let data = [0u8; 10];
        let (mut tracker, mut reader) = tracker_over(&data, Duration::ZERO);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();

        let high = tracker.snapshot(ProgressPhase::Mapping, 1).fraction_complete;
        let later = tracker.snapshot(ProgressPhase::Reading, 1).fraction_complete;
        assert!(later >= high);
    }

    #[test]
    fn ticks_are_rate_limited_but_finish_always_emits() {
        let data = [0u8; 10];
        let (mut tracker, _reader) = tracker_over(&data, Duration::from_secs(3600));
        let mut seen = Vec::new();
        let mut emit = |p: IngestionProgress| seen.push(p);

        assert!(tracker.tick(ProgressPhase::Reading, 0, &mut emit));
        assert!(!tracker.tick(ProgressPhase::Mapping, 5, &mut emit));
        tracker.finish(5, &mut emit);

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].fraction_complete, 100.0);
        assert_eq!(seen[1].eta_seconds, Some(0.0));
    }
}
