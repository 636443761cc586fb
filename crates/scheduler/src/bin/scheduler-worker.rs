//! scheduler-worker: runs a simulated imaging sequence on the task scheduler.
//!
//! Sequence: slew -> plate_solve -> guide_settle -> expose, with a recurring
//! focus check alongside. Task definitions and their parameters live in a
//! `TaskContainer`; the scheduler runs them until the exposure finishes or
//! `--duration-secs` elapses, then the metrics are logged as JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use stargaze_scheduler::{
    Scheduler, SchedulerConfig, TaskContainer, TaskDefinition, TaskHandle, TaskId, TaskState,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Stargaze scheduler worker. Drives a demo imaging sequence.
#[derive(Parser, Debug)]
#[command(name = "scheduler-worker", version, about)]
struct Cli {
    /// Path to a scheduler TOML config file.
    #[arg(long, env = "STARGAZE_CONFIG", default_value = "config/stargaze.toml")]
    config: String,

    /// Stop after this many seconds even if the sequence has not finished.
    #[arg(long, env = "STARGAZE_DURATION_SECS", default_value_t = 30)]
    duration_secs: u64,

    /// Start in manual mode and trigger evaluation from this process.
    #[arg(long)]
    manual: bool,

    /// Override the concurrency limit from the config.
    #[arg(long)]
    max_concurrent: Option<usize>,
}

// ── Sequence ────────────────────────────────────────────────────────

/// Edges of the imaging sequence: (task, tasks it waits for).
const SEQUENCE_EDGES: &[(&str, &[&str])] = &[
    ("plate_solve", &["slew"]),
    ("guide_settle", &["plate_solve"]),
    ("expose", &["guide_settle"]),
];

fn build_container() -> TaskContainer {
    let container = TaskContainer::new();
    container.batch_add_tasks([
        TaskDefinition::new("slew")
            .with_priority(10)
            .with_description("Slew the mount to the target"),
        TaskDefinition::new("plate_solve")
            .with_priority(8)
            .with_retries(2, Duration::from_millis(200))
            .with_tag("astrometry"),
        TaskDefinition::new("guide_settle")
            .with_priority(6)
            .with_retries(1, Duration::from_millis(100)),
        TaskDefinition::new("expose").with_priority(5).with_tag("camera"),
        TaskDefinition::new("focus_check")
            .with_priority(1)
            .with_recurring(true)
            .with_delay(Duration::from_millis(500)),
        TaskDefinition::new("flat_frames").with_enabled(false),
    ]);

    container.add_or_update_task_params("slew", json!({ "ra": "05h35m17s", "dec": "-05d23m28s" }));
    container.add_or_update_task_params("expose", json!({ "seconds": 1.5, "frames": 3 }));
    container.add_or_update_task_params("focus_check", json!({ "hfr_limit": 2.4 }));

    // Highest priority first, for readable startup logs
    container.sort_tasks(|a, b| b.priority.cmp(&a.priority));
    container
}

/// Simulated work for each step, driven by its container params.
fn body_for(
    name: &str,
    container: &Arc<TaskContainer>,
) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
    let name = name.to_string();
    let container = Arc::clone(container);
    let attempts = AtomicU32::new(0);

    move || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let params = container.get_task_params(&name).unwrap_or_default();
        match name.as_str() {
            "slew" => {
                info!(target_ra = %params["ra"], target_dec = %params["dec"], "slewing");
                std::thread::sleep(Duration::from_millis(300));
            }
            "plate_solve" => {
                std::thread::sleep(Duration::from_millis(150));
                // First solve usually fails while the mount settles
                if attempt == 1 {
                    anyhow::bail!("no stars matched in the solver index");
                }
            }
            "guide_settle" => std::thread::sleep(Duration::from_millis(200)),
            "expose" => {
                let seconds = params["seconds"].as_f64().unwrap_or(1.0);
                let frames = params["frames"].as_u64().unwrap_or(1);
                for frame in 1..=frames {
                    std::thread::sleep(Duration::from_secs_f64(seconds));
                    info!("frame {}/{} captured", frame, frames);
                }
            }
            "focus_check" => {
                let limit = params["hfr_limit"].as_f64().unwrap_or(3.0);
                info!("focus check #{} (hfr limit {})", attempt, limit);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Schedule every enabled definition and wire the sequence edges.
///
/// Dispatch is paused while edges are added, so no step can start before
/// the step it waits for.
fn schedule_sequence<F, B>(
    scheduler: &Scheduler,
    container: &TaskContainer,
    make_body: F,
) -> anyhow::Result<HashMap<String, TaskHandle>>
where
    F: Fn(&str) -> B,
    B: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    let was_paused = scheduler.is_paused();
    scheduler.pause();
    let wired = wire_sequence(scheduler, container, make_body);
    if !was_paused {
        scheduler.resume();
    }
    wired
}

fn wire_sequence<F, B>(
    scheduler: &Scheduler,
    container: &TaskContainer,
    make_body: F,
) -> anyhow::Result<HashMap<String, TaskHandle>>
where
    F: Fn(&str) -> B,
    B: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    let mut handles = HashMap::new();
    for definition in container.find_tasks(None, Some(true)) {
        let handle = scheduler
            .schedule_definition(&definition, make_body(&definition.name))
            .with_context(|| format!("scheduling {}", definition.name))?;
        handles.insert(definition.name.clone(), handle);
    }
    for (task, deps) in SEQUENCE_EDGES {
        let Some(dependent) = handles.get(*task) else {
            continue;
        };
        for dep in *deps {
            if let Some(dependency) = handles.get(*dep) {
                scheduler
                    .add_dependency(dependent.id(), dependency.id())
                    .with_context(|| format!("wiring {} -> {}", task, dep))?;
            }
        }
    }
    Ok(handles)
}

fn run_until_done(
    scheduler: &Scheduler,
    last: TaskId,
    manual: bool,
    budget: Duration,
) -> Option<TaskState> {
    if !manual {
        return scheduler.wait_until_finished(last, budget);
    }

    let started = Instant::now();
    let step = scheduler.config().tick_interval();
    while started.elapsed() < budget {
        scheduler.trigger_tasks();
        if let Some(state) = scheduler.wait_until_finished(last, step) {
            return Some(state);
        }
    }
    None
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load scheduler config (fall back to defaults if file not found)
    let mut config = match SchedulerConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded scheduler config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using defaults"
            );
            SchedulerConfig::from_env()?
        }
    };
    if cli.manual {
        config.start_mode = stargaze_scheduler::ExecutionMode::Manual;
    }
    if let Some(limit) = cli.max_concurrent {
        config.max_concurrent_tasks = limit;
    }
    config.log_summary();

    let container = Arc::new(build_container());
    info!(
        "Task container loaded: {} definitions, {} with params",
        container.get_task_count(),
        container.list_task_params().len()
    );

    let scheduler = Scheduler::new(config)?;
    let handles = schedule_sequence(&scheduler, &container, |name| body_for(name, &container))?;
    let expose = handles
        .get("expose")
        .context("imaging sequence has no expose step")?
        .id();

    let outcome = run_until_done(
        &scheduler,
        expose,
        cli.manual,
        Duration::from_secs(cli.duration_secs),
    );
    match outcome {
        Some(state) => info!("Imaging sequence finished: expose {}", state),
        None => warn!("Imaging sequence did not finish within {}s", cli.duration_secs),
    }

    if let Some(focus) = handles.get("focus_check") {
        if let Err(e) = scheduler.cancel_task(focus.id()) {
            warn!(error = %e, "could not cancel focus check");
        }
    }
    scheduler.shutdown();
    scheduler.wait_idle(Duration::from_secs(5));

    let metrics = serde_json::to_string_pretty(&scheduler.metrics())?;
    info!("Scheduler metrics:\n{}", metrics);
    for task in scheduler.finished_tasks() {
        info!(
            "  {:<14} {:<10} runs={} retries={}",
            task.name, task.state, task.execution_count, task.retry_count
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const STEPS: [&str; 4] = ["slew", "plate_solve", "guide_settle", "expose"];

    fn recording_body(
        log: &Arc<Mutex<Vec<String>>>,
        name: &str,
    ) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        let name = name.to_string();
        move || {
            // A slow first step exposes any step that starts too early
            if name == "slew" {
                std::thread::sleep(Duration::from_millis(20));
            }
            log.lock().unwrap().push(name.clone());
            Ok(())
        }
    }

    #[test]
    fn sequence_runs_in_order_in_automatic_mode() {
        for _ in 0..5 {
            let scheduler = Scheduler::new(SchedulerConfig {
                tick_interval_ms: 1,
                max_concurrent_tasks: 4,
                ..SchedulerConfig::default()
            })
            .unwrap();
            let container = build_container();
            let log = Arc::new(Mutex::new(Vec::new()));

            let handles =
                schedule_sequence(&scheduler, &container, |name| recording_body(&log, name))
                    .unwrap();
            assert!(!scheduler.is_paused());
            assert!(!handles.contains_key("flat_frames"));

            let expose = handles["expose"].id();
            assert_eq!(
                scheduler.wait_until_finished(expose, Duration::from_secs(5)),
                Some(TaskState::Completed)
            );
            scheduler.cancel_task(handles["focus_check"].id()).unwrap();
            scheduler.wait_idle(Duration::from_secs(5));

            let steps: Vec<String> = log
                .lock()
                .unwrap()
                .iter()
                .filter(|name| STEPS.contains(&name.as_str()))
                .cloned()
                .collect();
            assert_eq!(steps, STEPS);
        }
    }

    #[test]
    fn caller_pause_is_preserved() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.pause();
        let container = build_container();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles =
            schedule_sequence(&scheduler, &container, |name| recording_body(&log, name))
                .unwrap();
        assert!(scheduler.is_paused());
        assert_eq!(scheduler.trigger_tasks(), 0);
        assert_eq!(handles.len(), 5);
        assert!(log.lock().unwrap().is_empty());
    }
}
