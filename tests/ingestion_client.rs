use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::thread;
use std::time::Duration;

use soh_pipeline::PipelineError;
use soh_pipeline::execution::{IngestionClient, IngestionMessage, IngestionOptions};
use soh_pipeline::ingestion::SourceHandle;
use soh_pipeline::types::IngestionProgress;

fn stock_csv(rows: usize) -> Vec<u8> {
    let mut body = String::from("Barcode,Style,Qty,Box\n");
    for i in 0..rows {
        body.push_str(&format!("{i:06},STY{},{},B{}\n", i % 7, i % 13, i % 5));
    }
    body.into_bytes()
}

/// Hands out a few bytes per read with a pause, so a run stays in flight long enough to poke at.
struct Throttled {
    data: Cursor<Vec<u8>>,
}

impl Read for Throttled {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(1));
        let n = buf.len().min(64);
        self.data.read(&mut buf[..n])
    }
}

impl Seek for Throttled {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

fn slow_source(rows: usize) -> SourceHandle {
    let body = stock_csv(rows);
    let len = body.len() as u64;
    SourceHandle::from_reader("slow.csv", Throttled { data: Cursor::new(body) }, len)
}

struct Exploding;

impl Read for Exploding {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        panic!("reader exploded");
    }
}

impl Seek for Exploding {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

fn client() -> IngestionClient {
    IngestionClient::new(IngestionOptions {
        row_batch_size: 50,
        progress_interval_ms: 0,
        num_threads: Some(2),
        ..Default::default()
    })
}

#[test]
fn wait_returns_the_outcome_and_frees_the_client() {
    let client = client();
    let run = client
        .submit(SourceHandle::from_bytes("count.csv", stock_csv(500)))
        .unwrap();
    assert_eq!(run.source_label(), "count.csv");

    let out = run.wait().unwrap();
    assert_eq!(out.records.len(), 500);
    assert_eq!(out.containers.len(), 5);
    assert!(!client.is_busy());
}

#[test]
fn second_submit_while_busy_is_rejected() {
    let client = client();
    let run = client.submit(slow_source(20_000)).unwrap();
    assert!(client.is_busy());

    let err = client
        .submit(SourceHandle::from_bytes("other.csv", stock_csv(1)))
        .unwrap_err();
    assert!(matches!(err, PipelineError::IngestionInProgress));

    run.cancel();
    assert!(matches!(run.wait(), Err(PipelineError::Cancelled)));
    assert!(!client.is_busy());
    client
        .submit(SourceHandle::from_bytes("other.csv", stock_csv(1)))
        .unwrap()
        .wait()
        .unwrap();
}

#[test]
fn message_stream_is_monotonic_with_one_terminal_message_last() {
    let client = client();
    let run = client
        .submit(SourceHandle::from_bytes("count.csv", stock_csv(2_000)))
        .unwrap();

    let messages: Vec<IngestionMessage> = run.collect();
    let terminal: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![messages.len() - 1]);
    assert!(matches!(messages.last(), Some(IngestionMessage::Complete(_))));

    let progress: Vec<&IngestionProgress> = messages
        .iter()
        .filter_map(|m| match m {
            IngestionMessage::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert!(progress.len() > 2);
    assert!(
        progress
            .windows(2)
            .all(|w| w[0].fraction_complete <= w[1].fraction_complete)
    );
    assert!(progress.iter().all(|p| p.bytes_processed <= p.bytes_total));
    let last = progress.last().unwrap();
    assert_eq!(last.fraction_complete, 100.0);
    assert_eq!(last.rows_processed, 2_000);
}

#[test]
fn cancel_after_progress_ends_in_cancelled_never_complete() {
    let client = client();
    let mut run = client.submit(slow_source(20_000)).unwrap();

    let mut progress_seen = 0;
    let mut terminal = None;
    while let Some(message) = run.next_message() {
        match message {
            IngestionMessage::Progress(_) => {
                progress_seen += 1;
                if progress_seen == 3 {
                    run.cancel();
                }
            }
            other => terminal = Some(other),
        }
    }

    assert!(progress_seen >= 3);
    assert!(matches!(terminal, Some(IngestionMessage::Error(PipelineError::Cancelled))));
    assert!(run.next_message().is_none());
    assert!(!client.is_busy());
}

#[test]
fn cancel_handle_works_from_another_thread() {
    let client = client();
    let run = client.submit(slow_source(20_000)).unwrap();
    let handle = run.cancel_handle();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
    });
    assert!(matches!(run.wait(), Err(PipelineError::Cancelled)));
    canceller.join().unwrap();
}

#[test]
fn dropping_an_unfinished_run_cancels_it() {
    let client = client();
    let run = client.submit(slow_source(20_000)).unwrap();
    drop(run);

    assert!(!client.is_busy());
    client
        .submit(SourceHandle::from_bytes("next.csv", stock_csv(3)))
        .unwrap()
        .wait()
        .unwrap();
}

#[test]
fn invalid_options_fail_before_spawning() {
    let client = IngestionClient::new(IngestionOptions {
        row_batch_size: 0,
        ..Default::default()
    });
    let err = client
        .submit(SourceHandle::from_bytes("count.csv", stock_csv(1)))
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidOptions { .. }));
    assert!(!client.is_busy());
}

#[test]
fn worker_panic_surfaces_as_worker_failed() {
    let client = client();
    let run = client
        .submit(SourceHandle::from_reader("boom.csv", Exploding, 10))
        .unwrap();

    match run.wait() {
        Err(PipelineError::WorkerFailed { message }) => assert!(message.contains("reader exploded")),
        other => panic!("expected WorkerFailed, got {other:?}"),
    }
    assert!(!client.is_busy());
}
