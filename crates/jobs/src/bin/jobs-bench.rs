//! jobs-bench: drives a synthetic layered group graph through the scheduler.
//!
//! Every layer holds `--width` groups; each group depends on two groups of
//! the previous layer. Groups carry `--tasks` tasks of `--multiplicity`
//! invocations that spin for `--work-us` microseconds. Prints the scheduler
//! metrics as JSON once every group finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use stupid_jobs::{Priority, Scheduler, SchedulerConfig, Task, TaskGroupId};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic workload runner for the stupid-jobs scheduler.
#[derive(Parser, Debug)]
#[command(name = "jobs-bench", version, about)]
struct Cli {
    /// Path to a scheduler TOML config file.
    #[arg(long, env = "STUPID_JOBS_CONFIG")]
    config: Option<String>,

    /// Number of dependency layers.
    #[arg(long, default_value_t = 8)]
    layers: usize,

    /// Groups per layer.
    #[arg(long, default_value_t = 16)]
    width: usize,

    /// Tasks per group.
    #[arg(long, default_value_t = 2)]
    tasks: usize,

    /// Invocations per task.
    #[arg(long, default_value_t = 4)]
    multiplicity: u32,

    /// Busy work per invocation in microseconds.
    #[arg(long, default_value_t = 200)]
    work_us: u64,
}

fn load_config(path: Option<&str>) -> SchedulerConfig {
    let Some(path) = path else {
        return SchedulerConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "invalid environment overrides, using defaults");
            SchedulerConfig::default()
        });
    };
    match SchedulerConfig::from_file(path) {
        Ok(cfg) => {
            info!(path, "loaded scheduler config");
            cfg
        }
        Err(e) => {
            warn!(error = %e, path, "failed to load config, using defaults");
            SchedulerConfig::default()
        }
    }
}

fn spin(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

fn priority_for(layer: usize, column: usize) -> Priority {
    match (layer + column) % 4 {
        0 => Priority::High,
        1 | 2 => Priority::Normal,
        _ => Priority::Low,
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    let scheduler = Scheduler::new(config)?;

    let work = Duration::from_micros(cli.work_us);
    let started = Instant::now();
    let mut previous: Vec<TaskGroupId> = Vec::new();
    let mut all = Vec::with_capacity(cli.layers * cli.width);

    for layer in 0..cli.layers {
        let mut current = Vec::with_capacity(cli.width);
        for column in 0..cli.width {
            let group = scheduler.create_task_group(priority_for(layer, column));
            for t in 0..cli.tasks {
                let task = Task::from_fn(format!("l{layer}-t{t}"), move |_| spin(work))
                    .with_multiplicity(cli.multiplicity);
                scheduler.add_task_to_group(group, Arc::new(task));
            }
            if !previous.is_empty() {
                let left = previous[column % previous.len()];
                let right = previous[(column + 1) % previous.len()];
                scheduler.add_task_group_dependency(group, left);
                if right != left {
                    scheduler.add_task_group_dependency(group, right);
                }
            }
            current.push(group);
        }
        for &group in &current {
            scheduler.start_task_group(group);
        }
        all.extend_from_slice(&current);
        previous = current;
    }

    scheduler.wait_for_groups(&all);
    let elapsed = started.elapsed();
    info!(
        groups = all.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "all groups finished"
    );

    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);
    scheduler.shutdown();
    Ok(())
}
