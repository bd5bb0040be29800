//! The Mission Engine (Reaper, §4.8): sequences exploit injection followed by
//! optional validation against one target.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::error::CoreError;
use crate::event::cancellation::CancellationMessage;
use crate::event::channel::{EventConsumer, EventPublisher};
use crate::event::MissionEvent;
use crate::mission::exploit::{Exploit, ExploitBody, OsFamily};
use crate::mission::playbook_runner::{PlaybookRunner, PlaybookStatus};
use crate::mission::state::{MissionState, StepLogEntry, StepOutcome};
use crate::mission::validator::{Probe, ValidationResult, Validator};
use crate::platform::{CloneSpec, PlatformDispatcher, PowerOp};
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MissionTarget {
    Existing { host_ip: String, os_family: OsFamily },
    Ephemeral { template_ref: String, cpu: u32, memory_mb: u64, os_family: OsFamily },
}

#[derive(Debug, Clone)]
pub struct MissionSpec {
    pub mission_id: String,
    pub target: MissionTarget,
    pub exploits: Vec<Exploit>,
    pub probes: Vec<(String, Probe)>,
}

#[derive(Debug, Clone)]
pub struct MissionConfig {
    pub exploit_step_deadline: Duration,
    pub probe_deadline: Duration,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self { exploit_step_deadline: Duration::from_secs(600), probe_deadline: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
pub struct MissionResult {
    pub mission_id: String,
    pub state: MissionState,
    pub progress: u8,
    pub step_log: Vec<StepLogEntry>,
    pub validations: Vec<ValidationResult>,
    pub target_ip: Option<String>,
}

impl MissionResult {
    fn new(mission_id: &str) -> Self {
        Self {
            mission_id: mission_id.to_string(),
            state: MissionState::Pending,
            progress: 0,
            step_log: Vec::new(),
            validations: Vec::new(),
            target_ip: None,
        }
    }
}

struct ActiveMission {
    handle: Mutex<Option<StartedThreadContext>>,
    result: Arc<Mutex<MissionResult>>,
}

pub struct MissionEngine {
    backend_kind: String,
    backend_instance_id: String,
    dispatcher: Arc<PlatformDispatcher>,
    playbook_runner: Arc<dyn PlaybookRunner>,
    validator: Arc<Validator>,
    events: EventPublisher<MissionEvent>,
    config: MissionConfig,
    active: Mutex<HashMap<String, ActiveMission>>,
}

impl MissionEngine {
    pub fn new(
        backend_kind: impl Into<String>,
        backend_instance_id: impl Into<String>,
        dispatcher: Arc<PlatformDispatcher>,
        playbook_runner: Arc<dyn PlaybookRunner>,
        validator: Arc<Validator>,
        events: EventPublisher<MissionEvent>,
        config: MissionConfig,
    ) -> Self {
        Self {
            backend_kind: backend_kind.into(),
            backend_instance_id: backend_instance_id.into(),
            dispatcher,
            playbook_runner,
            validator,
            events,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the mission's run-to-completion thread. Returns immediately;
    /// progress is observable via [`MissionEngine::status`].
    pub fn start(self: &Arc<Self>, spec: MissionSpec) -> Arc<Mutex<MissionResult>> {
        let result = Arc::new(Mutex::new(MissionResult::new(&spec.mission_id)));
        let mission_id = spec.mission_id.clone();

        let engine = self.clone();
        let result_for_thread = result.clone();
        let thread_name = format!("mission-{}", spec.mission_id);
        let handle = NotStartedThreadContext::new(thread_name, move |stop_consumer| {
            engine.run_to_completion(spec, result_for_thread, stop_consumer);
        })
        .start();

        self.active.lock().expect("lock poisoned").insert(
            mission_id,
            ActiveMission { handle: Mutex::new(Some(handle)), result: result.clone() },
        );

        result
    }

    /// Signals cancellation for a running mission; a no-op if it isn't active
    /// or has already finished. Per §4.8, the current exploit step is allowed
    /// to finish — this only stops the *next* step from starting.
    pub fn cancel(&self, mission_id: &str) {
        let handle = self
            .active
            .lock()
            .expect("lock poisoned")
            .get(mission_id)
            .and_then(|active| active.handle.lock().expect("lock poisoned").take());
        if let Some(handle) = handle {
            if let Err(err) = handle.stop() {
                warn!(mission_id, %err, "mission did not acknowledge cancellation promptly");
            }
        }
    }

    pub fn status(&self, mission_id: &str) -> Option<MissionResult> {
        self.active
            .lock()
            .expect("lock poisoned")
            .get(mission_id)
            .map(|a| a.result.lock().expect("lock poisoned").clone())
    }

    fn set_state(&self, result: &Arc<Mutex<MissionResult>>, mission_id: &str, state: MissionState) {
        result.lock().expect("lock poisoned").state = state;
        let _ = self.events.publish(MissionEvent::StateChanged {
            mission_id: mission_id.to_string(),
            state: format!("{state:?}"),
        });
    }

    fn run_to_completion(&self, spec: MissionSpec, result: Arc<Mutex<MissionResult>>, stop_consumer: EventConsumer<CancellationMessage>) {
        let span = info_span!("mission", mission_id = %spec.mission_id);
        let _guard = span.enter();

        self.set_state(&result, &spec.mission_id, MissionState::Starting);

        let (target_ip, os_family) = match self.resolve_target(&spec, &result) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(%err, "failed to resolve mission target");
                self.set_state(&result, &spec.mission_id, MissionState::Failed);
                return;
            }
        };
        result.lock().expect("lock poisoned").target_ip = Some(target_ip.clone());

        self.set_state(&result, &spec.mission_id, MissionState::Injecting);
        let total_steps = spec.exploits.len().max(1);
        let mut fatal_failure = false;
        let mut cancelled = false;

        let record_cancelled_remainder = |from: usize| {
            let now = chrono::Utc::now();
            let mut locked = result.lock().expect("lock poisoned");
            for exploit in &spec.exploits[from..] {
                locked.step_log.push(StepLogEntry {
                    exploit_name: exploit.name.clone(),
                    outcome: StepOutcome::Cancelled,
                    detail: Some("mission cancelled before this step ran".to_string()),
                    started_at: now,
                    finished_at: now,
                });
            }
        };

        for (index, exploit) in spec.exploits.iter().enumerate() {
            if stop_consumer.is_cancelled(Duration::ZERO) {
                cancelled = true;
                record_cancelled_remainder(index);
                break;
            }

            let entry = self.run_exploit_step(&target_ip, os_family, exploit);
            let is_fatal = matches!(entry.outcome, StepOutcome::StepFailed | StepOutcome::Timeout) && exploit.fatal_on_fail;

            {
                let mut locked = result.lock().expect("lock poisoned");
                locked.step_log.push(entry.clone());
                locked.progress = (100 * (index + 1) / total_steps) as u8;
            }
            let _ = self.events.publish(MissionEvent::Progress {
                mission_id: spec.mission_id.clone(),
                percent: result.lock().expect("lock poisoned").progress,
            });
            let _ = self.events.publish(MissionEvent::StepCompleted {
                mission_id: spec.mission_id.clone(),
                exploit: exploit.name.clone(),
                outcome: format!("{:?}", entry.outcome),
            });

            if is_fatal {
                fatal_failure = true;
                break;
            }
            if stop_consumer.is_cancelled(Duration::ZERO) {
                cancelled = true;
                record_cancelled_remainder(index + 1);
                break;
            }
        }

        if cancelled {
            self.set_state(&result, &spec.mission_id, MissionState::Cancelled);
            return;
        }
        if fatal_failure {
            self.set_state(&result, &spec.mission_id, MissionState::Failed);
            return;
        }

        self.set_state(&result, &spec.mission_id, MissionState::Verifying);
        for (test_name, probe) in &spec.probes {
            let validation = self.validator.run_probe(&spec.mission_id, test_name, &target_ip, probe, self.config.probe_deadline);
            result.lock().expect("lock poisoned").validations.push(validation);
        }

        result.lock().expect("lock poisoned").progress = 100;
        self.set_state(&result, &spec.mission_id, MissionState::Completed);
        info!("mission completed");
    }

    fn resolve_target(&self, spec: &MissionSpec, result: &Arc<Mutex<MissionResult>>) -> Result<(String, OsFamily), CoreError> {
        match &spec.target {
            MissionTarget::Existing { host_ip, os_family } => Ok((host_ip.clone(), *os_family)),
            MissionTarget::Ephemeral { template_ref, cpu, memory_mb, os_family } => {
                self.set_state(result, &spec.mission_id, MissionState::DeployingVm);
                let call = self.dispatcher.dispatch(&self.backend_kind, &self.backend_instance_id, Duration::from_secs(60))?;
                let adapter = call.adapter();
                let clone_spec = CloneSpec {
                    template_ref: template_ref.clone(),
                    name: format!("mission-{}", spec.mission_id),
                    cpu: *cpu,
                    memory_mb: *memory_mb,
                    disks_gb: vec![20],
                    nics: Vec::new(),
                    userdata: None,
                    request_id: format!("mission:{}", spec.mission_id),
                };
                let native_id = adapter.clone_from_template(&clone_spec)?;
                adapter.set_power(&native_id, PowerOp::On)?;
                let ip = adapter.wait_for_liveness(&native_id, Duration::from_secs(180))?;
                Ok((ip, *os_family))
            }
        }
    }

    fn run_exploit_step(&self, target_ip: &str, observed_os: OsFamily, exploit: &Exploit) -> StepLogEntry {
        let started_at = chrono::Utc::now();

        if exploit.target_os_family != observed_os {
            return StepLogEntry {
                exploit_name: exploit.name.clone(),
                outcome: StepOutcome::IncompatibleOs,
                detail: Some(format!("exploit targets {:?}, observed {:?}", exploit.target_os_family, observed_os)),
                started_at,
                finished_at: chrono::Utc::now(),
            };
        }

        let deadline = self.config.exploit_step_deadline;
        let (tx, rx) = crossbeam::channel::bounded(1);
        let runner = self.playbook_runner.clone();
        let body = exploit.body.clone();
        let ip = target_ip.to_string();
        let variables = exploit.variables.clone();
        std::thread::spawn(move || {
            let outcome = run_exploit_body(runner.as_ref(), &ip, observed_os, &body, &variables);
            let _ = tx.send(outcome);
        });

        let outcome_result = rx.recv_timeout(deadline);
        let (outcome, detail) = match outcome_result {
            Ok(Ok(())) => (StepOutcome::Success, None),
            Ok(Err(err)) => (StepOutcome::StepFailed, Some(err.to_string())),
            Err(_) => (StepOutcome::Timeout, Some(format!("exploit '{}' exceeded {:?}", exploit.name, deadline))),
        };

        StepLogEntry { exploit_name: exploit.name.clone(), outcome, detail, started_at, finished_at: chrono::Utc::now() }
    }
}

fn run_exploit_body(
    runner: &dyn PlaybookRunner,
    target_ip: &str,
    observed_os: OsFamily,
    body: &ExploitBody,
    variables: &HashMap<String, String>,
) -> Result<(), CoreError> {
    match body {
        ExploitBody::Script(script) => {
            let result = runner.run_script(target_ip, observed_os, script)?;
            if result.exit_code != 0 {
                return Err(CoreError::Internal(format!("script exited {}: {}", result.exit_code, result.stderr)));
            }
            Ok(())
        }
        ExploitBody::Playbook { path } => {
            let outcome = runner.run_playbook(&[target_ip.to_string()], path, variables)?;
            match outcome.status {
                PlaybookStatus::Success => Ok(()),
                PlaybookStatus::Failed => Err(CoreError::Internal(outcome.log)),
            }
        }
    }
}
