//! Workflow scheduler task.
//!
//! Owns the registered workflows and decides when they run:
//! - cron workflows, when their schedule comes due
//! - event workflows, when a matching trigger event is dispatched
//! - any workflow, when triggered manually
//!
//! A workflow never runs twice at the same time; a trigger that arrives while
//! it is running is skipped (events) or rejected (manual).
//!
//! The task is driven through `SchedulerHandle`, which sends commands over an
//! mpsc channel, and stops when its `CancellationToken` is cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::runner::WorkflowRunner;
use super::schedule::{CronError, CronSchedule};
use super::{Trigger, Workflow};
use crate::error::SchedulerError;
use crate::models::workflow::WorkflowInfo;

/// Longest the task sleeps between cron checks.
const MAX_SLEEP: Duration = Duration::from_secs(60);

enum SchedulerCommand {
    List {
        ack: oneshot::Sender<Vec<WorkflowInfo>>,
    },
    Trigger {
        workflow_id: String,
        input: Value,
        ack: oneshot::Sender<Result<Uuid, SchedulerError>>,
    },
    Dispatch {
        name: String,
        data: Value,
        ack: oneshot::Sender<Vec<String>>,
    },
}

/// Handle to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Registered workflows in registration order.
    pub async fn workflows(&self) -> Result<Vec<WorkflowInfo>, SchedulerError> {
        let (ack, done) = oneshot::channel();
        self.send(SchedulerCommand::List { ack }).await?;
        done.await.map_err(|_| SchedulerError::Closed)
    }

    /// Start `workflow_id` now with `input`. Returns the new run id.
    pub async fn trigger(&self, workflow_id: &str, input: Value) -> Result<Uuid, SchedulerError> {
        let (ack, done) = oneshot::channel();
        self.send(SchedulerCommand::Trigger {
            workflow_id: workflow_id.to_string(),
            input,
            ack,
        })
        .await?;
        done.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Start every workflow triggered by event `name`.
    ///
    /// Returns the ids of the workflows that were started.
    pub async fn dispatch_event(
        &self,
        name: &str,
        data: Value,
    ) -> Result<Vec<String>, SchedulerError> {
        let (ack, done) = oneshot::channel();
        self.send(SchedulerCommand::Dispatch {
            name: name.to_string(),
            data,
            ack,
        })
        .await?;
        done.await.map_err(|_| SchedulerError::Closed)
    }

    async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Closed)
    }
}

pub struct WorkflowScheduler {
    workflows: Vec<Arc<dyn Workflow>>,
    by_id: HashMap<&'static str, Arc<dyn Workflow>>,
    schedules: Vec<(Arc<dyn Workflow>, CronSchedule)>,
    runner: Arc<WorkflowRunner>,
    running: Arc<Mutex<HashSet<&'static str>>>,
    cron_enabled: bool,
}

impl WorkflowScheduler {
    /// Build a scheduler for `workflows`, parsing every cron trigger.
    pub fn new(
        workflows: Vec<Arc<dyn Workflow>>,
        runner: WorkflowRunner,
    ) -> Result<Self, CronError> {
        let mut by_id = HashMap::new();
        let mut schedules = Vec::new();

        for workflow in &workflows {
            by_id.insert(workflow.id(), Arc::clone(workflow));
            if let Trigger::Cron(expression) = workflow.trigger() {
                schedules.push((Arc::clone(workflow), CronSchedule::parse(expression)?));
            }
        }

        Ok(Self {
            workflows,
            by_id,
            schedules,
            runner: Arc::new(runner),
            running: Arc::new(Mutex::new(HashSet::new())),
            cron_enabled: true,
        })
    }

    /// Disable cron firing; manual and event triggers still work.
    pub fn with_cron(mut self, enabled: bool) -> Self {
        self.cron_enabled = enabled;
        self
    }

    /// Spawn the scheduler task.
    pub fn spawn(self, cancel: CancellationToken) -> (SchedulerHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(32);
        let task = tokio::spawn(self.run(receiver, cancel));
        (SchedulerHandle { commands }, task)
    }

    async fn run(self, mut receiver: mpsc::Receiver<SchedulerCommand>, cancel: CancellationToken) {
        tracing::info!(
            "Workflow scheduler started with {} workflows ({} scheduled, cron {})",
            self.workflows.len(),
            self.schedules.len(),
            if self.cron_enabled { "enabled" } else { "disabled" }
        );

        let mut last_check = Utc::now();
        for (workflow, schedule) in &self.schedules {
            tracing::debug!(
                workflow = workflow.id(),
                schedule = schedule.expression(),
                next = ?schedule.next_after(last_check),
                "Scheduled workflow"
            );
        }

        loop {
            let wait = self.next_wake(last_check, Utc::now());

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = receiver.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = tokio::time::sleep(wait), if self.cron_enabled => {
                    let now = Utc::now();
                    for workflow in self.due_between(last_check, now) {
                        if let Err(e) = self.launch(&workflow, "cron".to_string(), Value::Null).await {
                            tracing::warn!(workflow = workflow.id(), "Skipped scheduled run: {}", e);
                        }
                    }
                    last_check = now;
                }
            }
        }

        tracing::info!("Workflow scheduler stopped");
    }

    async fn handle(&self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::List { ack } => {
                let _ = ack.send(self.list());
            }
            SchedulerCommand::Trigger {
                workflow_id,
                input,
                ack,
            } => {
                let result = match self.by_id.get(workflow_id.as_str()) {
                    Some(workflow) => {
                        let workflow = Arc::clone(workflow);
                        self.launch(&workflow, "manual".to_string(), input).await
                    }
                    None => Err(SchedulerError::NotFound(workflow_id)),
                };
                let _ = ack.send(result);
            }
            SchedulerCommand::Dispatch { name, data, ack } => {
                let _ = ack.send(self.dispatch(&name, data).await);
            }
        }
    }

    fn list(&self) -> Vec<WorkflowInfo> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        self.workflows
            .iter()
            .map(|w| WorkflowInfo {
                id: w.id().to_string(),
                name: w.name().to_string(),
                trigger: w.trigger().describe(),
                retries: w.retries(),
                is_running: running.contains(w.id()),
            })
            .collect()
    }

    async fn dispatch(&self, name: &str, data: Value) -> Vec<String> {
        let matching: Vec<Arc<dyn Workflow>> = self
            .workflows
            .iter()
            .filter(|w| matches!(w.trigger(), Trigger::Event(event) if event == name))
            .cloned()
            .collect();

        if matching.is_empty() {
            tracing::debug!(event = name, "No workflow listens for event");
        }

        let mut started = Vec::new();
        for workflow in matching {
            match self
                .launch(&workflow, format!("event:{}", name), data.clone())
                .await
            {
                Ok(_) => started.push(workflow.id().to_string()),
                Err(e) => tracing::warn!(workflow = workflow.id(), event = name, "Not started: {}", e),
            }
        }
        started
    }

    /// Record a run and execute it in the background.
    async fn launch(
        &self,
        workflow: &Arc<dyn Workflow>,
        trigger: String,
        input: Value,
    ) -> Result<Uuid, SchedulerError> {
        let id = workflow.id();
        if !self.lock_running().insert(id) {
            return Err(SchedulerError::AlreadyRunning(id.to_string()));
        }

        let run_id = match self.runner.start(workflow.as_ref(), &trigger).await {
            Ok(run_id) => run_id,
            Err(e) => {
                self.lock_running().remove(id);
                return Err(e.into());
            }
        };
        tracing::info!(workflow = id, %run_id, trigger = %trigger, "Workflow run started");

        let workflow = Arc::clone(workflow);
        let runner = Arc::clone(&self.runner);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            runner.execute(workflow.as_ref(), run_id, input).await;
            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(workflow.id());
        });

        Ok(run_id)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashSet<&'static str>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cron workflows with a firing time in `(since, now]`.
    fn due_between(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Arc<dyn Workflow>> {
        self.schedules
            .iter()
            .filter(|(_, schedule)| matches!(schedule.next_after(since), Some(t) if t <= now))
            .map(|(workflow, _)| Arc::clone(workflow))
            .collect()
    }

    /// Time until the earliest firing after `since`, capped at `MAX_SLEEP`.
    fn next_wake(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        self.schedules
            .iter()
            .filter_map(|(_, schedule)| schedule.next_after(since))
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
    }
}
