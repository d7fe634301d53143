//! # Performance Telemetry Driver - Main Entry Point
//!
//! A demonstration driver for the telemetry engine. It runs a small
//! synthetic numerical workload — a serial setup phase on the master
//! thread plus compute and exchange kernels across a thread team — with
//! every phase instrumented as a measured section, then aggregates and
//! prints the report.
//!
//! ## Execution Flow
//!
//! 1. **Initialize logging**: colorized output keyed by severity
//! 2. **Parse arguments**: team size, iterations, report level
//! 3. **Build the session** and attach one monitor per team thread
//! 4. **Warm up** each kernel, then discard the warm-up measurements
//! 5. **Run the instrumented workload** across the team
//! 6. **Aggregate** (a team collective) and print the report from the
//!    master monitor
//!
//! The workload declares its own metrics (flops for the compute kernel,
//! bytes for the exchange kernel), so the driver is meaningful even on
//! machines without a hardware-counter backend.

use anyhow::Result;
use clap::Parser;
use perf_telemetry::{
    cli::{Args, DriverConfiguration},
    logging::SeverityFormatter,
    session::Monitor,
    CalcType, Session, TelemetryReport,
};
use rand::Rng;
use tracing::info;

fn main() -> Result<()> {
    let args = Args::parse();

    // The log level can still be overridden via RUST_LOG
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .event_format(SeverityFormatter)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = DriverConfiguration::from(&args);
    info!(
        "Starting telemetry driver: {} threads, {} iterations",
        config.threads, config.iterations
    );

    let session = Session::builder(config.threads).build()?;

    let mut master: Option<Monitor> = None;
    crossbeam::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..config.threads {
            let session = &session;
            let config = &config;
            handles.push(scope.spawn(move |_| -> Result<Option<Monitor>> {
                let mut monitor = session.attach()?;
                run_workload(&mut monitor, config);
                monitor.aggregate()?;
                if monitor.thread_id() == 0 {
                    Ok(Some(monitor))
                } else {
                    Ok(None)
                }
            }));
        }
        for handle in handles {
            if let Some(monitor) = handle.join().expect("worker thread panicked")? {
                master = Some(monitor);
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .expect("thread team panicked")?;

    let mut master = master.expect("master monitor missing");
    master.finalize_trace();

    let report = TelemetryReport::from_monitor(&master, config.report_level);
    let mut stdout = std::io::stdout();
    report.write_text(&mut stdout)?;

    if let Some(path) = &config.output_file {
        report.write_json(path)?;
    }

    info!("Telemetry driver finished");
    Ok(())
}

/// Run the instrumented synthetic workload on one team thread.
fn run_workload(monitor: &mut Monitor, config: &DriverConfiguration) {
    let is_master = monitor.thread_id() == 0;
    let mut rng = rand::thread_rng();

    if is_master {
        // one-off serial phase, measured like any other section
        monitor.start("setup");
        let state = build_state(config.kernel_size);
        std::hint::black_box(&state);
        monitor.stop("setup", 0.0, 1);
    }

    monitor.set_properties("halo exchange", CalcType::Comm, true);

    // warm up, then discard what the warm-up measured
    for _ in 0..config.warmup_iterations {
        compute_kernel(monitor, config.kernel_size);
        exchange_kernel(monitor, config.kernel_size);
    }
    monitor.reset_all();

    for _ in 0..config.iterations {
        // jitter the repeat count so per-thread times genuinely differ
        let repeat = rng.gen_range(1..=3);
        for _ in 0..repeat {
            compute_kernel(monitor, config.kernel_size);
        }
        exchange_kernel(monitor, config.kernel_size);
    }
}

fn build_state(n: usize) -> Vec<f64> {
    (0..n * n).map(|i| (i % 17) as f64).collect()
}

/// Dense matrix-vector product, 2*n^2 declared flops per call.
fn compute_kernel(monitor: &mut Monitor, n: usize) {
    monitor.start("stencil kernel");
    let matrix = build_state(n);
    let x = vec![1.0_f64; n];
    let mut y = vec![0.0_f64; n];
    for i in 0..n {
        let mut acc = 0.0;
        for j in 0..n {
            acc += matrix[i * n + j] * x[j];
        }
        y[i] = acc;
    }
    std::hint::black_box(&y);
    monitor.stop("stencil kernel", 2.0 * (n * n) as f64, 1);
}

/// Buffer copy standing in for a halo exchange, n*8 declared bytes.
fn exchange_kernel(monitor: &mut Monitor, n: usize) {
    monitor.start("halo exchange");
    let send = vec![0x5a_u8; n * 8];
    let mut recv = vec![0_u8; n * 8];
    recv.copy_from_slice(&send);
    std::hint::black_box(&recv);
    monitor.stop("halo exchange", (n * 8) as f64, 1);
}
