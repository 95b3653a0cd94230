//! Plan runner.
//!
//! Walks steps sequentially; per step, targets resolve to hosts, the
//! rollout strategy partitions them into batches, batches run one after
//! another, and hosts inside a batch run as concurrent tasks. The runner
//! is fail-fast: the first host to fail cancels its batch token, no
//! further batch starts, and the run returns with failure metadata.
//! Hosts already executing an action are allowed to finish it.


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::actions::{self, guard, Outcome};
use crate::artifacts::ArtifactStore;
use crate::envmap;
use crate::error::{HadesError, Result};
use crate::inventory::Inventory;
use crate::logger::{self, EventLog, HostLog, RunEvent};
use crate::registry;
use crate::rollout::Strategy;
use crate::runtime::Runtime;
use crate::schema::{ConfigFile, Job, Plan, Step};
use crate::ssh::{Client, Host, LocalClient};
use crate::ui::Console;

/// Failure metadata carried by a finished run.
#[derive(Debug, Clone)]
pub struct Failure {
    pub step: String,
    /// Absent when the step failed before any host was selected
    /// (environment resolution, artifact loading).
    pub host: Option<String>,
    pub error: String,
}

/// Result of a run: identity, timing, and failure metadata (empty on
/// success).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub failure: Option<Failure>,
}

impl RunReport {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Fresh run identity: timestamp plus a short unique tail so two runs
/// within one second stay distinct.
pub fn mint_run_id() -> String {
    let now = chrono::Utc::now();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let seed = nanos ^ ((std::process::id() as u64) << 16);
    format!(
        "hades-{}-{:06x}",
        now.format("%Y%m%d-%H%M%S"),
        seed & 0xFF_FFFF
    )
}

pub struct Executor {
    ssh: Arc<dyn Client>,
    local: Arc<dyn Client>,
    console: Console,
    log_root: PathBuf,
}

impl Executor {
    pub fn new(ssh: Arc<dyn Client>) -> Self {
        Executor {
            ssh,
            local: Arc::new(LocalClient::new()),
            console: Console::new(),
            log_root: logger::log_root(),
        }
    }

    /// Inject both transports; used by tests to script the local side.
    pub fn with_transports(ssh: Arc<dyn Client>, local: Arc<dyn Client>) -> Self {
        Executor {
            ssh,
            local,
            console: Console::new(),
            log_root: logger::log_root(),
        }
    }

    /// Place run logs under a different root.
    pub fn log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Execute every step of a plan. Returns `Err` only for problems
    /// found before the run begins; anything after that lands in the
    /// report's failure metadata.
    pub async fn execute_plan(
        &self,
        cancel: &CancellationToken,
        file: &ConfigFile,
        plan_name: &str,
        inventory: &Inventory,
        only_targets: &[String],
        cli_env: &HashMap<String, String>,
    ) -> Result<RunReport> {
        let plan = lookup_plan(file, plan_name)?;
        check_target_filter(inventory, only_targets)?;

        let run_id = mint_run_id();
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let log_dir = self.log_root.join(&run_id);
        let events = Arc::new(EventLog::create(&log_dir)?);
        let artifacts = Arc::new(ArtifactStore::new());
        let registries = Arc::new(registry::Manager::from_config(&file.registries)?);

        self.console.plan_started(plan_name, &run_id);
        let _ = events.append(RunEvent::RunStarted {
            plan: plan_name.to_string(),
            run_id: run_id.clone(),
        });

        let total_steps = plan.steps.len();
        for (index, step) in plan.steps.iter().enumerate() {
            let step_name = step.display_name();
            let selected = select_targets(step, only_targets);
            let targets_joined = selected.join(", ");
            self.console
                .step_progress(index + 1, total_steps, step_name, &step.job, &targets_joined);

            if selected.is_empty() {
                self.console.step_skipped(step_name);
                continue;
            }

            let _ = events.append(RunEvent::StepStarted {
                step: step_name.to_string(),
                job: step.job.clone(),
            });

            let ctx = StepCtx {
                run_id: &run_id,
                plan_name,
                plan,
                step,
                step_name,
                selected: &selected,
                inventory,
                cli_env,
                log_dir: &log_dir,
                events: &events,
                artifacts: &artifacts,
                registries: &registries,
            };

            match self.execute_step(cancel, file, &ctx).await {
                Ok(hosts) => {
                    self.console.step_completed(step_name, &targets_joined, hosts);
                }
                Err(failure) => {
                    let _ = events.append(RunEvent::RunFailed {
                        run_id: run_id.clone(),
                        step: failure.step.clone(),
                        host: failure.host.clone().unwrap_or_default(),
                        error: failure.error.clone(),
                    });
                    self.console
                        .plan_failed(&failure.step, failure.host.as_deref().unwrap_or("-"));
                    artifacts.clear();
                    return Ok(RunReport {
                        run_id,
                        started_at,
                        finished_at: chrono::Utc::now(),
                        failure: Some(failure),
                    });
                }
            }
        }

        artifacts.clear();
        let _ = events.append(RunEvent::RunCompleted {
            run_id: run_id.clone(),
            duration_seconds: start.elapsed().as_secs_f64(),
        });
        self.console.plan_completed(start.elapsed());

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: chrono::Utc::now(),
            failure: None,
        })
    }

    async fn execute_step(
        &self,
        cancel: &CancellationToken,
        file: &ConfigFile,
        ctx: &StepCtx<'_>,
    ) -> std::result::Result<usize, Failure> {
        let fail = |error: HadesError| Failure {
            step: ctx.step_name.to_string(),
            host: None,
            error: error.to_string(),
        };

        let job = file
            .jobs
            .get(&ctx.step.job)
            .ok_or_else(|| fail(HadesError::config(format!("job {:?} not found", ctx.step.job))))?;

        let env = envmap::resolve_step_env(job, &[&ctx.plan.env, &ctx.step.env], ctx.cli_env)
            .map_err(fail)?;

        self.load_artifacts(job, ctx).await.map_err(fail)?;

        let transport = if job.local {
            self.local.clone()
        } else {
            self.ssh.clone()
        };

        let mut total_hosts = 0;
        for target in ctx.selected {
            let hosts = ctx
                .inventory
                .resolve_target(target)
                .map_err(|err| fail(err))?;

            let strategy = Strategy::parse(&ctx.step.parallelism, hosts.len())
                .map_err(|err| fail(err))?
                .with_limit(ctx.step.limit);
            let batches = strategy.batches(&hosts);
            let selected_count: usize = batches.iter().map(Vec::len).sum();
            total_hosts += selected_count;

            self.console.target_started(target, selected_count);

            for (batch_index, batch) in batches.iter().enumerate() {
                self.console
                    .batch_started(batch_index + 1, batches.len(), batch.len());

                if let Some(failure) = self
                    .run_batch(cancel, ctx, job, &transport, target, &env, batch)
                    .await
                {
                    self.console.target_failed(target);
                    return Err(failure);
                }

                self.console.batch_completed(batch_index + 1, batches.len());
            }

            self.console.target_completed(target, selected_count);
        }

        Ok(total_hosts)
    }

    async fn load_artifacts(&self, job: &Job, ctx: &StepCtx<'_>) -> Result<()> {
        for (name, def) in &job.artifacts {
            let bytes = tokio::fs::read(&def.path)
                .await
                .map_err(|err| {
                    HadesError::io(format!("loading artifact {name:?} from {}", def.path), err)
                })?;
            let _ = ctx.events.append(RunEvent::ArtifactLoaded {
                name: name.clone(),
                path: def.path.clone(),
                bytes: bytes.len(),
            });
            self.console.artifact_loaded(name, &def.path);
            ctx.artifacts.store(name.clone(), bytes);
        }
        Ok(())
    }

    /// Run one batch: hosts concurrently, first failure cancels the
    /// batch token. Returns the first failure, if any.
    async fn run_batch(
        &self,
        cancel: &CancellationToken,
        ctx: &StepCtx<'_>,
        job: &Job,
        transport: &Arc<dyn Client>,
        target: &str,
        env: &HashMap<String, String>,
        batch: &[Host],
    ) -> Option<Failure> {
        let batch_cancel = cancel.child_token();
        let mut set = JoinSet::new();

        for host in batch {
            let host_ctx = HostJob {
                transport: transport.clone(),
                artifacts: ctx.artifacts.clone(),
                registries: ctx.registries.clone(),
                env: env.clone(),
                run_id: ctx.run_id.to_string(),
                plan_name: ctx.plan_name.to_string(),
                target: target.to_string(),
                host: host.clone(),
                job: job.clone(),
                job_name: ctx.step.job.clone(),
                log_dir: ctx.log_dir.clone(),
                events: ctx.events.clone(),
                cancel: batch_cancel.clone(),
                console: self.console,
            };
            set.spawn(run_host_job(host_ctx));
        }

        let mut failure: Option<Failure> = None;
        while let Some(joined) = set.join_next().await {
            let (host_name, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    if failure.is_none() {
                        batch_cancel.cancel();
                        failure = Some(Failure {
                            step: ctx.step_name.to_string(),
                            host: None,
                            error: format!("host task aborted: {join_err}"),
                        });
                    }
                    continue;
                }
            };

            match result {
                Ok(()) => {}
                Err(HadesError::Cancelled) => {
                    // A sibling's failure already cancelled this host.
                }
                Err(err) => {
                    self.console
                        .job_failed(&host_name, &ctx.step.job, &err.to_string());
                    if failure.is_none() {
                        batch_cancel.cancel();
                        failure = Some(Failure {
                            step: ctx.step_name.to_string(),
                            host: Some(host_name),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        // Every host reported Cancelled without a local failure: the
        // operator (or an outer scope) cancelled the run.
        if failure.is_none() && batch_cancel.is_cancelled() {
            failure = Some(Failure {
                step: ctx.step_name.to_string(),
                host: None,
                error: HadesError::Cancelled.to_string(),
            });
        }

        failure
    }

    /// Identical traversal to `execute_plan`, but actions self-describe
    /// instead of executing: no artifact loads, no connections.
    pub async fn dry_run(
        &self,
        file: &ConfigFile,
        plan_name: &str,
        inventory: &Inventory,
        only_targets: &[String],
        cli_env: &HashMap<String, String>,
    ) -> Result<()> {
        let plan = lookup_plan(file, plan_name)?;
        check_target_filter(inventory, only_targets)?;

        self.console.dry_run_header(plan_name);

        for (index, step) in plan.steps.iter().enumerate() {
            let job = file
                .jobs
                .get(&step.job)
                .ok_or_else(|| HadesError::config(format!("job {:?} not found", step.job)))?;
            let env = envmap::resolve_step_env(job, &[&plan.env, &step.env], cli_env)?;

            println!("Step {}: {}", index + 1, step.display_name());
            println!("  Job: {}", step.job);

            for target in select_targets(step, only_targets) {
                let hosts = inventory.resolve_target(&target)?;
                let strategy =
                    Strategy::parse(&step.parallelism, hosts.len())?.with_limit(step.limit);

                for batch in strategy.batches(&hosts) {
                    for host in batch {
                        let mut host_env = env.clone();
                        envmap::inject_reserved(
                            &mut host_env,
                            "dry-run",
                            plan_name,
                            &target,
                            &host,
                        );
                        self.console.dry_run_host(&host.name);
                        for spec in &job.actions {
                            let action = actions::build(spec)?;
                            self.console.dry_run_action(&action.describe(&host_env));
                        }
                    }
                }
            }
            println!();
        }

        Ok(())
    }

    /// Close pooled connections, surfacing the first close error.
    pub async fn shutdown(&self) -> Result<()> {
        self.ssh.close().await?;
        self.local.close().await
    }
}

struct StepCtx<'a> {
    run_id: &'a str,
    plan_name: &'a str,
    plan: &'a Plan,
    step: &'a Step,
    step_name: &'a str,
    selected: &'a [String],
    inventory: &'a Inventory,
    cli_env: &'a HashMap<String, String>,
    log_dir: &'a PathBuf,
    events: &'a Arc<EventLog>,
    artifacts: &'a Arc<ArtifactStore>,
    registries: &'a Arc<registry::Manager>,
}

fn lookup_plan<'a>(file: &'a ConfigFile, plan_name: &str) -> Result<&'a Plan> {
    file.plans
        .get(plan_name)
        .ok_or_else(|| HadesError::config(format!("plan {plan_name:?} not found")))
}

fn check_target_filter(inventory: &Inventory, only_targets: &[String]) -> Result<()> {
    for name in only_targets {
        if !inventory.has_target(name) {
            return Err(HadesError::inventory(format!(
                "target {name:?} from --target not found"
            )));
        }
    }
    Ok(())
}

fn select_targets(step: &Step, only_targets: &[String]) -> Vec<String> {
    step.targets
        .iter()
        .filter(|target| only_targets.is_empty() || only_targets.contains(target))
        .cloned()
        .collect()
}

/// Everything a host task needs, owned, so it can run under `JoinSet`.
struct HostJob {
    transport: Arc<dyn Client>,
    artifacts: Arc<ArtifactStore>,
    registries: Arc<registry::Manager>,
    env: HashMap<String, String>,
    run_id: String,
    plan_name: String,
    target: String,
    host: Host,
    job: Job,
    job_name: String,
    log_dir: PathBuf,
    events: Arc<EventLog>,
    cancel: CancellationToken,
    console: Console,
}

async fn run_host_job(ctx: HostJob) -> (String, Result<()>) {
    let host_name = ctx.host.name.clone();
    let result = run_host_job_inner(ctx).await;
    (host_name, result)
}

async fn run_host_job_inner(ctx: HostJob) -> Result<()> {
    let log = HostLog::create(&ctx.log_dir, &ctx.host.name)?;
    let console = ctx.console;
    let events = ctx.events.clone();
    let job = ctx.job;
    let job_name = ctx.job_name;
    let host_name = ctx.host.name.clone();

    let rt = Runtime::new(
        ctx.transport,
        ctx.artifacts,
        ctx.registries,
        ctx.env,
        ctx.run_id,
        ctx.plan_name,
        ctx.target,
        ctx.host,
        ctx.cancel,
        log.stdout(),
        log.stderr(),
    );

    if let Some(guard) = &job.guard {
        let decision = guard::evaluate(guard, &rt).await?;
        if !decision.proceed {
            console.job_skipped(&host_name, &job_name);
            let _ = events.append(RunEvent::JobSkipped {
                host: host_name.clone(),
                job: job_name.clone(),
            });
            return Ok(());
        }
    }

    console.job_starting(&host_name, &job_name);

    for (index, spec) in job.actions.iter().enumerate() {
        // A cancelled batch lets the in-flight action finish, but no new
        // action begins.
        if rt.cancel.is_cancelled() {
            return Err(HadesError::Cancelled);
        }

        let kind = spec.kind();
        let label = match &spec.name {
            Some(name) => format!("[{index}] {kind} ({name})"),
            None => format!("[{index}] {kind}"),
        };

        log.action_delimiter(&job_name, kind, spec.name.as_deref(), index)?;
        console.action_started(&host_name, &label);
        let _ = events.append(RunEvent::ActionStarted {
            host: host_name.clone(),
            label: label.clone(),
        });

        let action = actions::build(spec)?;
        match action.execute(&rt).await {
            Ok(Outcome::Done) => {
                console.action_completed(&host_name, &label);
                let _ = events.append(RunEvent::ActionCompleted {
                    host: host_name.clone(),
                    label: label.clone(),
                });
            }
            Ok(Outcome::Skipped(reason)) => {
                console.action_skipped(&host_name, &label, &reason);
                let _ = events.append(RunEvent::ActionSkipped {
                    host: host_name.clone(),
                    label: label.clone(),
                    reason,
                });
            }
            Err(HadesError::Cancelled) => return Err(HadesError::Cancelled),
            Err(err) => {
                console.action_failed(&host_name, &label, &err.to_string());
                let _ = events.append(RunEvent::ActionFailed {
                    host: host_name.clone(),
                    label: label.clone(),
                    error: err.to_string(),
                });
                return Err(HadesError::Action {
                    index,
                    kind: kind.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    console.job_completed(&host_name, &job_name);
    Ok(())
}
