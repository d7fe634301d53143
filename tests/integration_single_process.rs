//! Single-thread, single-process pipeline properties: the full merge plus
//! aggregation path must reproduce the locally measured values exactly.

use perf_telemetry::{CalcType, Session};

#[test]
fn single_thread_round_trip_reproduces_local_values() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    monitor.start("kernel");
    std::thread::sleep(std::time::Duration::from_millis(5));
    monitor.stop("kernel", 1.0e6, 3);
    monitor.start("kernel");
    monitor.stop("kernel", 1.0e6, 1);

    monitor.aggregate().unwrap();

    let id = monitor.section_id("kernel").unwrap();
    let record = monitor.section(id).unwrap();
    let local_time = record.time;
    let stats = monitor.section_stats(id).unwrap();

    // mean equals the locally measured value bit-for-bit, stddev is zero
    assert_eq!(stats.time_mean, local_time);
    assert_eq!(stats.time_stddev, 0.0);
    assert_eq!(stats.metric_mean, 4.0e6);
    assert_eq!(stats.metric_stddev, 0.0);
    assert_eq!(stats.count_total, 2);
    assert!(local_time >= 0.005);
}

#[test]
fn aggregate_is_idempotent() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    monitor.start("a");
    monitor.stop("a", 10.0, 1);

    monitor.aggregate().unwrap();
    let id = monitor.section_id("a").unwrap();
    let first = monitor.section_stats(id).unwrap().clone();
    let first_ranking = monitor.ranking().to_vec();

    monitor.aggregate().unwrap();
    let second = monitor.section_stats(id).unwrap();

    assert_eq!(second.time_mean, first.time_mean);
    assert_eq!(second.time_stddev, first.time_stddev);
    assert_eq!(second.metric_mean, first.metric_mean);
    assert_eq!(second.count_total, first.count_total);
    assert_eq!(monitor.ranking(), first_ranking.as_slice());
}

#[test]
fn reset_then_aggregate_yields_zero_stats() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    monitor.start("warmup");
    monitor.stop("warmup", 123.0, 1);
    monitor.reset("warmup");

    monitor.aggregate().unwrap();

    let id = monitor.section_id("warmup").unwrap();
    let stats = monitor.section_stats(id).unwrap();
    assert_eq!(stats.count_total, 0);
    assert_eq!(stats.time_mean, 0.0);
    assert_eq!(stats.time_stddev, 0.0);
    assert!(!stats.metric_mean.is_nan());
    assert!(!stats.metric_stddev.is_nan());
}

#[test]
fn ranking_covers_every_section_once() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    for label in ["a", "b", "c"] {
        monitor.start(label);
        monitor.stop(label, 0.0, 1);
    }
    monitor.aggregate().unwrap();

    let mut ranking = monitor.ranking().to_vec();
    assert_eq!(ranking.len(), monitor.section_count());
    ranking.sort_unstable();
    assert_eq!(ranking, (0..monitor.section_count()).collect::<Vec<_>>());

    // every position resolves to a label
    for position in 0..monitor.section_count() {
        assert!(monitor.section_label(position).is_some());
    }
}

#[test]
fn communication_sections_report_max_time() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    monitor.set_properties("exchange", CalcType::Comm, true);
    monitor.start("exchange");
    std::thread::sleep(std::time::Duration::from_millis(2));
    monitor.stop("exchange", 1024.0, 1);

    monitor.aggregate().unwrap();

    let id = monitor.section_id("exchange").unwrap();
    let stats = monitor.section_stats(id).unwrap();
    // with one process, the max is the (only) local time
    assert_eq!(stats.comm_time_max, stats.time_by_rank[0]);
    assert!(stats.comm_time_max > 0.0);
}

#[test]
fn measurement_can_resume_after_aggregate() {
    let session = Session::single_threaded().unwrap();
    let mut monitor = session.attach().unwrap();

    monitor.start("s");
    monitor.stop("s", 1.0, 1);
    monitor.aggregate().unwrap();

    let id = monitor.section_id("s").unwrap();
    let after_first = monitor.section_stats(id).unwrap().count_total;

    // resetting re-arms the section for a fresh measurement interval
    monitor.reset("s");
    monitor.start("s");
    monitor.stop("s", 1.0, 1);
    monitor.start("s");
    monitor.stop("s", 1.0, 1);
    monitor.aggregate().unwrap();

    assert_eq!(after_first, 1);
    assert_eq!(monitor.section_stats(id).unwrap().count_total, 2);
}
