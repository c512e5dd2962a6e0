//! One-shot performance tuner (C11): applies `max_cpu_cores` and
//! `lock_os_thread` before any relay task starts. Not a runtime
//! singleton — `apply` is called once from `main` and its result feeds
//! the `tokio::runtime::Builder` used for the rest of the process.

use crate::settings::Settings;

/// Runtime shape decided once at boot from the loaded settings.
pub struct TunedRuntime {
    pub worker_threads: usize,
    pub lock_os_thread: bool,
}

/// Clamps the worker thread count to `max_cpu_cores` (falling back to
/// the detected core count) and records whether OS-thread pinning was
/// requested for the relay's latency-sensitive tasks.
pub fn apply(settings: &Settings) -> TunedRuntime {
    let detected = num_cpus::get();
    let worker_threads = settings
        .max_cpu_cores
        .filter(|&n| n > 0)
        .unwrap_or(detected)
        .min(detected.max(1));

    if settings.lock_os_thread {
        tracing::info!("lock_os_thread requested; relay tasks will run on dedicated worker threads");
    }
    tracing::info!(worker_threads, detected_cores = detected, "performance tuner applied");

    TunedRuntime {
        worker_threads,
        lock_os_thread: settings.lock_os_thread,
    }
}

/// Builds the multi-threaded runtime the tuned settings call for.
pub fn build_runtime(tuned: &TunedRuntime) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .worker_threads(tuned.worker_threads.max(1))
        .thread_name("sprint-relay")
        .enable_all();
    builder.build()
}
