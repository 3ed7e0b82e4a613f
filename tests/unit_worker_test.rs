//! End-to-end behaviour of a unit run across peers and restarts

mod common;

use beamshard::error::PipelineError;
use beamshard::model::SourceKind;
use beamshard::worker::UnitStatus;
use common::{
    beam_names, peer, run_id, run_worker, worker, RecordingProcessor, TestContextBuilder,
};
use std::fs;

#[tokio::test]
async fn test_peers_of_one_run_split_contiguously() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 10)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    let names = beam_names(10, "fil");
    let run = run_id("job-100");

    // Each peer finishes before the next one starts
    let processors: Vec<_> = (0..3).map(|_| RecordingProcessor::new()).collect();
    let mut reports = Vec::new();
    for rank in 0..3 {
        let report = run_worker(peer(rank, 3), &run, processors[rank].clone())
            .run(unit.clone())
            .await
            .unwrap();
        reports.push(report);
    }

    let owned: Vec<usize> = reports.iter().map(|r| r.owned).collect();
    assert_eq!(owned, vec![4, 4, 2]);
    assert!(reports.iter().all(|r| r.already_completed == 0));
    assert_eq!(processors[0].seen(), names[0..4].to_vec());
    assert_eq!(processors[1].seen(), names[4..8].to_vec());
    assert_eq!(processors[2].seen(), names[8..10].to_vec());
    assert_eq!(ctx.record_names(&unit), names);

    let ranks: Vec<usize> = ctx.records(&unit).iter().map(|(rank, _)| *rank).collect();
    assert_eq!(ranks, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
}

#[tokio::test]
async fn test_late_peer_still_gets_its_whole_slice() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 10)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    let names = beam_names(10, "fil");
    let run = run_id("job-101");

    // Rank 1 starts only after rank 0 has recorded its whole slice
    let early = RecordingProcessor::new();
    run_worker(peer(0, 2), &run, early.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(early.seen(), names[0..5].to_vec());

    let late = RecordingProcessor::new();
    let report = run_worker(peer(1, 2), &run, late.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.already_completed, 0);
    assert_eq!(report.owned, 5);
    assert_eq!(late.seen(), names[5..10].to_vec());
    assert_eq!(ctx.record_names(&unit), names);
}

#[tokio::test]
async fn test_concurrent_peers_of_one_run_cover_every_item() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 7)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    let run = run_id("job-102");

    let processors: Vec<_> = (0..2).map(|_| RecordingProcessor::new()).collect();
    let worker_a = run_worker(peer(0, 2), &run, processors[0].clone());
    let worker_b = run_worker(peer(1, 2), &run, processors[1].clone());
    let (a, b) = tokio::join!(worker_a.run(unit.clone()), worker_b.run(unit.clone()));
    assert_eq!(a.unwrap().owned, 4);
    assert_eq!(b.unwrap().owned, 3);
    assert_eq!(processors[0].seen(), beam_names(7, "fil")[0..4].to_vec());
    assert_eq!(processors[1].seen(), beam_names(7, "fil")[4..7].to_vec());
    assert_eq!(ctx.record_names(&unit), beam_names(7, "fil"));
}

#[tokio::test]
async fn test_second_run_processes_nothing() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 6)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let first = RecordingProcessor::new();
    let report = worker(peer(0, 1), first.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.processed, 6);
    assert_eq!(first.seen(), beam_names(6, "fil"));

    let second = RecordingProcessor::new();
    let report = worker(peer(0, 1), second.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.already_completed, 6);
    assert_eq!(report.owned, 0);
    assert_eq!(report.processed, 0);
    assert!(second.seen().is_empty());
    assert_eq!(ctx.record_names(&unit).len(), 6);
}

#[tokio::test]
async fn test_resume_with_more_peers_skips_everything() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 10)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let first = run_id("job-200");
    for rank in 0..2 {
        run_worker(peer(rank, 2), &first, RecordingProcessor::new())
            .run(unit.clone())
            .await
            .unwrap();
    }
    assert_eq!(ctx.record_names(&unit), beam_names(10, "fil"));

    let second = run_id("job-201");
    for rank in 0..4 {
        let processor = RecordingProcessor::new();
        let report = run_worker(peer(rank, 4), &second, processor.clone())
            .run(unit.clone())
            .await
            .unwrap();
        assert_eq!(report.already_completed, 10);
        assert_eq!(report.owned, 0);
        assert!(processor.seen().is_empty());
    }
    // Logs from the old peer count are still the only ones holding records
    let ranks: std::collections::BTreeSet<usize> =
        ctx.records(&unit).into_iter().map(|(rank, _)| rank).collect();
    assert!(ranks.iter().all(|r| *r < 2));
}

#[tokio::test]
async fn test_resume_with_different_peer_count_covers_remaining_once() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 10)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    let names = beam_names(10, "fil");

    // Old run with two peers: rank 1 died on its second item
    let old = run_id("job-300");
    run_worker(peer(0, 2), &old, RecordingProcessor::new())
        .run(unit.clone())
        .await
        .unwrap();
    let err = run_worker(peer(1, 2), &old, RecordingProcessor::failing_at("BM06.fil"))
        .run(unit.clone())
        .await
        .unwrap_err();
    assert_eq!(err.failed_item(), Some("BM06.fil"));
    assert_eq!(ctx.record_names(&unit), names[0..6].to_vec());

    // Resume with three peers: four leftovers in chunks of two, the last peer idles
    let new = run_id("job-301");
    let processors: Vec<_> = (0..3).map(|_| RecordingProcessor::new()).collect();
    let mut reports = Vec::new();
    for rank in 0..3 {
        let report = run_worker(peer(rank, 3), &new, processors[rank].clone())
            .run(unit.clone())
            .await
            .unwrap();
        reports.push(report);
    }

    assert!(reports.iter().all(|r| r.already_completed == 6));
    assert_eq!(processors[0].seen(), names[6..8].to_vec());
    assert_eq!(processors[1].seen(), names[8..10].to_vec());
    assert!(processors[2].seen().is_empty());
    assert_eq!(reports[2].owned, 0);
    assert_eq!(ctx.record_names(&unit), names);
}

#[tokio::test]
async fn test_restart_under_same_run_id_skips_own_records() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 10)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    let names = beam_names(10, "fil");
    let run = run_id("job-400");

    run_worker(peer(1, 2), &run, RecordingProcessor::failing_at("BM07.fil"))
        .run(unit.clone())
        .await
        .unwrap_err();

    // The launcher restarts rank 1 inside the same job
    let retry = RecordingProcessor::new();
    let report = run_worker(peer(1, 2), &run, retry.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.owned, 5);
    assert_eq!(report.resumed, 2);
    assert_eq!(report.processed, 3);
    assert_eq!(retry.seen(), names[7..10].to_vec());

    // Rank 0's slice is untouched by the restart
    let late = RecordingProcessor::new();
    run_worker(peer(0, 2), &run, late.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(late.seen(), names[0..5].to_vec());
    assert_eq!(ctx.record_names(&unit), names);
}

#[tokio::test]
async fn test_item_failure_keeps_earlier_records() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 5)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let processor = RecordingProcessor::failing_at("BM02.fil");
    let err = worker(peer(0, 1), processor.clone())
        .run(unit.clone())
        .await
        .unwrap_err();

    match &err {
        PipelineError::ItemFailed(failed) => {
            assert_eq!(failed.rank, 0);
            assert_eq!(failed.unit, "20230910");
            assert_eq!(failed.item, "BM02.fil");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Nothing after the failing item was attempted
    assert_eq!(processor.seen(), vec!["BM00.fil", "BM01.fil", "BM02.fil"]);
    assert_eq!(ctx.record_names(&unit), vec!["BM00.fil", "BM01.fil"]);
    assert!(ctx.unit_log(&unit).contains("FAILED BM02.fil"));

    let retry = RecordingProcessor::new();
    let report = worker(peer(0, 1), retry.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.already_completed, 2);
    assert_eq!(retry.seen(), vec!["BM02.fil", "BM03.fil", "BM04.fil"]);
}

#[tokio::test]
async fn test_empty_directory_is_no_input() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_unit("20230910", &[])
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let processor = RecordingProcessor::new();
    let report = worker(peer(0, 2), processor.clone())
        .run(unit.clone())
        .await
        .unwrap();

    assert_eq!(report.status, UnitStatus::NoInput);
    assert_eq!(report.kind, SourceKind::None);
    assert!(report.elapsed.is_none());
    assert!(processor.seen().is_empty());
    assert!(ctx.records(&unit).is_empty());

    let log = ctx.unit_log(&unit);
    assert!(log.contains("nothing to process"));
    assert!(!log.contains("Total processing time"));
}

#[tokio::test]
async fn test_missing_input_directory_is_no_input() {
    let ctx = TestContextBuilder::new().unwrap().build().unwrap();
    let unit = ctx.unit("20991231");

    let report = worker(peer(0, 1), RecordingProcessor::new())
        .run(unit)
        .await
        .unwrap();
    assert_eq!(report.status, UnitStatus::NoInput);
}

#[tokio::test]
async fn test_raw_takes_precedence_over_prepared() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_unit("20230910", &["BM00.raw", "BM01.raw", "BM00.fil", "notes.txt"])
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let processor = RecordingProcessor::new();
    let report = worker(peer(0, 1), processor.clone())
        .run(unit.clone())
        .await
        .unwrap();

    assert_eq!(report.kind, SourceKind::Raw);
    assert_eq!(processor.seen(), vec!["BM00.raw", "BM01.raw"]);
}

#[tokio::test]
async fn test_first_run_bootstraps_logs_and_ledger() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 3)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    let report = worker(peer(0, 3), RecordingProcessor::new())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.processed, 1);

    for rank in 0..3 {
        let path = unit.state_dir.join(format!("20230910.history_{}.jsonl", rank));
        assert!(path.exists(), "missing {}", path.display());
    }
    assert_eq!(
        fs::read_to_string(unit.ledger_path()).unwrap(),
        "BM00.fil\n"
    );

    let log = ctx.unit_log(&unit);
    assert!(log.contains("Start processing PREPARED data for date 20230910 on rank 0/3."));
    assert!(log.contains("Total processing time: "));
}

#[tokio::test]
async fn test_torn_record_does_not_hide_progress() {
    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 3)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");

    worker(peer(0, 1), RecordingProcessor::failing_at("BM01.fil"))
        .run(unit.clone())
        .await
        .unwrap_err();

    // Simulate a crash mid-append
    let log_path = unit.state_dir.join("20230910.history_0.jsonl");
    let mut contents = fs::read_to_string(&log_path).unwrap();
    contents.push_str("{\"kind\":\"completed\",\"item\":\"BM0");
    fs::write(&log_path, contents).unwrap();

    let processor = RecordingProcessor::new();
    let report = worker(peer(0, 1), processor.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.already_completed, 1);
    assert_eq!(processor.seen(), vec!["BM01.fil", "BM02.fil"]);
    assert_eq!(ctx.record_names(&unit), beam_names(3, "fil"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unusable_file_names_are_logged() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let ctx = TestContextBuilder::new()
        .unwrap()
        .with_prepared_unit("20230910", 2)
        .build()
        .unwrap();
    let unit = ctx.unit("20230910");
    if fs::write(unit.input_dir.join(OsStr::from_bytes(b"BM\xfe.fil")), b"").is_err() {
        return;
    }

    let processor = RecordingProcessor::new();
    let report = worker(peer(0, 1), processor.clone())
        .run(unit.clone())
        .await
        .unwrap();
    assert_eq!(report.listed, 2);
    assert_eq!(processor.seen(), beam_names(2, "fil"));
    assert!(ctx.unit_log(&unit).contains("SKIPPED"));
}
