use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use crate::deploy::intent::{LabIntent, NodeKind, NodeSpec};
use crate::deploy::task::{TaskOutcome, TaskState};
use crate::error::CoreError;
use crate::event::channel::EventPublisher;
use crate::event::DeployEvent;
use crate::network::NetworkAllocator;
use crate::platform::{CloneSpec, PlatformDispatcher, PowerOp};
use crate::registry::LabRegistry;
use crate::resource::{Resource, ResourceKind, ResourceState};

#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub max_concurrent_clones: usize,
    pub deploy_deadline: Duration,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self { max_concurrent_clones: 6, deploy_deadline: Duration::from_secs(1800) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployTerminalState {
    Completed,
    CompletedWithErrors,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub deploy_id: String,
    pub lab_id: String,
    pub terminal_state: DeployTerminalState,
    pub tasks: Vec<TaskOutcome>,
    pub first_fatal_error: Option<String>,
}

pub struct DeploymentEngine {
    backend_kind: String,
    backend_instance_id: String,
    dispatcher: Arc<PlatformDispatcher>,
    registry: Arc<dyn LabRegistry>,
    allocator: Arc<NetworkAllocator>,
    events: EventPublisher<DeployEvent>,
    config: DeploymentConfig,
    completed: Mutex<HashMap<String, DeployOutcome>>,
}

const ADAPTER_CALL_DEADLINE: Duration = Duration::from_secs(60);
const LIVENESS_WAIT_CAP: Duration = Duration::from_secs(120);

impl DeploymentEngine {
    pub fn new(
        backend_kind: impl Into<String>,
        backend_instance_id: impl Into<String>,
        dispatcher: Arc<PlatformDispatcher>,
        registry: Arc<dyn LabRegistry>,
        allocator: Arc<NetworkAllocator>,
        events: EventPublisher<DeployEvent>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            backend_kind: backend_kind.into(),
            backend_instance_id: backend_instance_id.into(),
            dispatcher,
            registry,
            allocator,
            events,
            config,
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Executes `intent` under `deploy_id`. Retrying the same `deploy_id`
    /// returns the memoized outcome without reissuing any backend call
    /// (§4.7's idempotency requirement).
    pub fn deploy(&self, intent: &LabIntent, deploy_id: &str) -> Result<DeployOutcome, CoreError> {
        if let Some(existing) = self.completed.lock().expect("lock poisoned").get(deploy_id) {
            return Ok(existing.clone());
        }

        let span = info_span!("deploy", deploy_id, lab_id = %intent.lab_id);
        let _guard = span.enter();

        intent.validate()?;
        let _ = self.events.publish(DeployEvent::Started {
            deploy_id: deploy_id.to_string(),
            lab_id: intent.lab_id.clone(),
        });

        let mut expected_names: Vec<String> = vec![intent.gateway().name.clone()];
        expected_names.extend(intent.tenants().map(|n| n.name.clone()));
        self.registry.set_expected_names(&intent.lab_id, expected_names);

        let deadline_at = Instant::now() + self.config.deploy_deadline;

        let lease = match self.allocator.acquire(&intent.lab_id) {
            Ok(lease) => lease,
            Err(err) => {
                let outcome = self.finish(deploy_id, intent, DeployTerminalState::Failed, Vec::new(), Some(err.to_string()));
                return Ok(outcome);
            }
        };

        let mut tasks = Vec::new();
        let gateway_outcome = self.run_gateway_task(intent, deploy_id, &lease, deadline_at);
        let gateway_failed = gateway_outcome.state == TaskState::Failed;
        tasks.push(gateway_outcome.clone());

        if gateway_failed {
            self.teardown_tenant_stubs(&tasks);
            self.allocator.release(&lease);
            let outcome = self.finish(
                deploy_id,
                intent,
                DeployTerminalState::Failed,
                tasks,
                gateway_outcome.error.clone(),
            );
            return Ok(outcome);
        }

        let mut tenant_outcomes = self.run_tenant_tasks(intent, deploy_id, &lease, deadline_at);
        tasks.append(&mut tenant_outcomes);

        let any_tenant_failed = tasks
            .iter()
            .skip(1)
            .any(|t| matches!(t.state, TaskState::Failed | TaskState::Skipped));
        let terminal = if any_tenant_failed {
            DeployTerminalState::CompletedWithErrors
        } else {
            DeployTerminalState::Completed
        };

        let outcome = self.finish(deploy_id, intent, terminal, tasks, None);
        Ok(outcome)
    }

    pub fn outcome(&self, deploy_id: &str) -> Option<DeployOutcome> {
        self.completed.lock().expect("lock poisoned").get(deploy_id).cloned()
    }

    pub fn list_outcomes(&self) -> Vec<DeployOutcome> {
        self.completed.lock().expect("lock poisoned").values().cloned().collect()
    }

    fn finish(
        &self,
        deploy_id: &str,
        intent: &LabIntent,
        terminal_state: DeployTerminalState,
        tasks: Vec<TaskOutcome>,
        first_fatal_error: Option<String>,
    ) -> DeployOutcome {
        let outcome = DeployOutcome {
            deploy_id: deploy_id.to_string(),
            lab_id: intent.lab_id.clone(),
            terminal_state,
            tasks,
            first_fatal_error,
        };
        let event = match terminal_state {
            DeployTerminalState::Failed => DeployEvent::Failed {
                deploy_id: deploy_id.to_string(),
                error: outcome.first_fatal_error.clone().unwrap_or_default(),
            },
            _ => DeployEvent::Completed {
                deploy_id: deploy_id.to_string(),
                outcome: format!("{:?}", outcome.terminal_state),
            },
        };
        let _ = self.events.publish(event);
        self.completed
            .lock()
            .expect("lock poisoned")
            .insert(deploy_id.to_string(), outcome.clone());
        outcome
    }

    fn run_gateway_task(
        &self,
        intent: &LabIntent,
        deploy_id: &str,
        lease: &crate::network::NetworkLease,
        deadline_at: Instant,
    ) -> TaskOutcome {
        let gateway = intent.gateway();
        self.run_node_task(intent, deploy_id, gateway, lease, deadline_at)
    }

    /// Clamps `cap` to whatever remains of the deploy's overall deadline, so a
    /// single node's adapter calls can never outlive `deploy_deadline` even
    /// when issued late in a multi-node deploy (§5: child deadlines must not
    /// exceed the parent's).
    fn remaining_deadline(deadline_at: Instant, cap: Duration) -> Duration {
        deadline_at.saturating_duration_since(Instant::now()).min(cap)
    }

    fn run_tenant_tasks(
        &self,
        intent: &LabIntent,
        deploy_id: &str,
        lease: &crate::network::NetworkLease,
        deadline_at: Instant,
    ) -> Vec<TaskOutcome> {
        let tenants: Vec<&NodeSpec> = intent.tenants().collect();
        if tenants.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = unbounded::<&NodeSpec>();
        for node in &tenants {
            job_tx.send(node).expect("channel just created");
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded::<TaskOutcome>();
        let worker_count = self.config.max_concurrent_clones.min(tenants.len()).max(1);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(|| {
                    while let Ok(node) = job_rx.recv() {
                        let outcome = if Instant::now() >= deadline_at {
                            let mut skipped = TaskOutcome::pending(&node.name, NodeKind::Vm);
                            skipped.state = TaskState::Skipped;
                            skipped.error = Some("deploy deadline exceeded".to_string());
                            skipped
                        } else {
                            self.run_node_task(intent, deploy_id, node, lease, deadline_at)
                        };
                        let _ = result_tx.send(outcome);
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.iter().collect()
    }

    fn run_node_task(
        &self,
        intent: &LabIntent,
        deploy_id: &str,
        node: &NodeSpec,
        lease: &crate::network::NetworkLease,
        deadline_at: Instant,
    ) -> TaskOutcome {
        let mut outcome = TaskOutcome::pending(&node.name, node.kind);
        let request_id = format!("{deploy_id}:{}", node.name);

        let dispatch_deadline = Self::remaining_deadline(deadline_at, ADAPTER_CALL_DEADLINE);
        let call = match self.dispatcher.dispatch(&self.backend_kind, &self.backend_instance_id, dispatch_deadline) {
            Ok(call) => call,
            Err(err) => {
                outcome.state = TaskState::Failed;
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };
        let adapter = call.adapter();

        outcome.state = TaskState::Cloning;
        let spec = CloneSpec {
            template_ref: node.template_ref.clone(),
            name: node.name.clone(),
            cpu: node.cpu,
            memory_mb: node.memory_mb,
            disks_gb: node.disks_gb.clone(),
            nics: node.network_edges.clone(),
            userdata: None,
            request_id: request_id.clone(),
        };
        let native_id = match adapter.clone_from_template(&spec) {
            Ok(id) => id,
            Err(err) => {
                warn!(node = %node.name, %err, "clone failed");
                outcome.state = TaskState::Failed;
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };
        outcome.native_id = Some(native_id.clone());

        let kind = match node.kind {
            NodeKind::Gateway => ResourceKind::Gateway,
            NodeKind::Vm => ResourceKind::Vm,
        };
        let resource = Resource::new(
            crate::resource::ResourceIdentity::new(&self.backend_kind, &self.backend_instance_id, &native_id),
            kind,
            node.name.clone(),
        )
        .with_lab(intent.lab_id.clone());
        let _ = self.registry.register(resource);

        outcome.state = TaskState::Configuring;
        if let Err(err) = adapter.attach_network(&native_id, lease) {
            outcome.state = TaskState::Failed;
            outcome.error = Some(err.to_string());
            return outcome;
        }

        outcome.state = TaskState::Starting;
        if let Err(err) = adapter.set_power(&native_id, PowerOp::On) {
            outcome.state = TaskState::Failed;
            outcome.error = Some(err.to_string());
            return outcome;
        }

        outcome.state = TaskState::WaitingIp;
        let liveness_deadline = Self::remaining_deadline(deadline_at, LIVENESS_WAIT_CAP);
        let observed_ip = match adapter.wait_for_liveness(&native_id, liveness_deadline) {
            Ok(ip) => ip,
            Err(err) => {
                outcome.state = TaskState::Failed;
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };
        outcome.observed_ip = Some(observed_ip.clone());
        outcome.state = TaskState::Live;

        let mut running = Resource::new(
            crate::resource::ResourceIdentity::new(&self.backend_kind, &self.backend_instance_id, &native_id),
            kind,
            node.name.clone(),
        )
        .with_lab(intent.lab_id.clone())
        .with_state(ResourceState::Running);
        running.config.observed_ip = Some(observed_ip);
        let _ = self.registry.register(running);

        info!(node = %node.name, native_id, "node live");
        outcome
    }

    /// Tears down every resource the registry knows about for `lab_id` and
    /// releases its network lease. Unlike [`DeploymentEngine::deploy`] this is
    /// not keyed by a deploy id — destroying a lab is idempotent by nature
    /// (deleting an already-gone resource is treated as success by adapters).
    pub fn destroy(&self, lab_id: &str) -> Result<(), CoreError> {
        let span = info_span!("destroy", lab_id);
        let _guard = span.enter();

        for resource in self.registry.resources_for_lab(lab_id) {
            let call = self.dispatcher.dispatch(&self.backend_kind, &self.backend_instance_id, ADAPTER_CALL_DEADLINE)?;
            if let Err(err) = call.adapter().delete(&resource.identity.native_id, true) {
                warn!(native_id = %resource.identity.native_id, %err, "failed to delete resource during lab teardown");
            }
        }

        if let Some(lease) = self.allocator.lease_for_lab(lab_id) {
            self.allocator.release(&lease);
        }

        info!(lab_id, "lab torn down");
        Ok(())
    }

    /// Best-effort compensating teardown of whatever was created before a
    /// gateway failure aborted the deploy (§4.7).
    fn teardown_tenant_stubs(&self, tasks: &[TaskOutcome]) {
        for task in tasks {
            if let Some(native_id) = &task.native_id {
                if let Ok(call) = self.dispatcher.dispatch(&self.backend_kind, &self.backend_instance_id, ADAPTER_CALL_DEADLINE) {
                    if let Err(err) = call.adapter().delete(native_id, true) {
                        error!(native_id, %err, "compensating teardown failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{AllocatorConfig, NetworkLease};
    use crate::platform::adapter::{Credential, ExecResult};
    use crate::platform::PlatformDispatcherBuilder;
    use crate::registry::memory::InMemoryLabRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        clone_calls: AtomicUsize,
        fail_names: Vec<String>,
    }

    impl PlatformAdapter for StubAdapter {
        fn backend_kind(&self) -> &str {
            "onprem"
        }
        fn backend_instance_id(&self) -> &str {
            "host-1"
        }
        fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError> {
            self.clone_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_names.iter().any(|n| n == &spec.name) {
                return Err(CoreError::BackendUnreachable(spec.name.clone()));
            }
            Ok(format!("native-{}", spec.name))
        }
        fn set_power(&self, _native_id: &str, _op: PowerOp) -> Result<(), CoreError> {
            Ok(())
        }
        fn wait_for_liveness(&self, _native_id: &str, _deadline: Duration) -> Result<String, CoreError> {
            Ok("10.0.0.5".to_string())
        }
        fn delete(&self, _native_id: &str, _force: bool) -> Result<(), CoreError> {
            Ok(())
        }
        fn list_resources(&self, _kind_filter: Option<&str>) -> Result<Vec<Resource>, CoreError> {
            Ok(Vec::new())
        }
        fn attach_network(&self, _native_id: &str, _lease: &NetworkLease) -> Result<(), CoreError> {
            Ok(())
        }
        fn exec_command(&self, _native_id: &str, _credential: &Credential, _command: &str) -> Result<ExecResult, CoreError> {
            Ok(ExecResult { stdout: String::new(), stderr: String::new(), exit_code: 0 })
        }
    }

    fn node(kind: NodeKind, name: &str) -> NodeSpec {
        NodeSpec {
            kind,
            template_ref: "tmpl".to_string(),
            name: name.to_string(),
            cpu: 1,
            memory_mb: 512,
            disks_gb: vec![20],
            network_edges: vec!["lab".to_string()],
        }
    }

    fn engine(adapter: Arc<StubAdapter>) -> DeploymentEngine {
        let dispatcher = Arc::new(PlatformDispatcherBuilder::new().register(adapter, 4).build());
        let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
        let allocator = Arc::new(NetworkAllocator::new(AllocatorConfig::default()));
        let (events, _consumer) = crate::event::channel::pub_sub();
        DeploymentEngine::new("onprem", "host-1", dispatcher, registry, allocator, events, DeploymentConfig::default())
    }

    #[test]
    fn gateway_only_lab_completes() {
        let adapter = Arc::new(StubAdapter { clone_calls: AtomicUsize::new(0), fail_names: Vec::new() });
        let eng = engine(adapter.clone());
        let intent = LabIntent { lab_id: "L1".to_string(), nodes: vec![node(NodeKind::Gateway, "gw")], mission_id: None };

        let outcome = eng.deploy(&intent, "d1").unwrap();
        assert_eq!(outcome.terminal_state, DeployTerminalState::Completed);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(adapter.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_deploy_id_returns_memoized_outcome_without_recloning() {
        let adapter = Arc::new(StubAdapter { clone_calls: AtomicUsize::new(0), fail_names: Vec::new() });
        let eng = engine(adapter.clone());
        let intent = LabIntent { lab_id: "L1".to_string(), nodes: vec![node(NodeKind::Gateway, "gw")], mission_id: None };

        let first = eng.deploy(&intent, "d1").unwrap();
        let second = eng.deploy(&intent, "d1").unwrap();
        assert_eq!(first.deploy_id, second.deploy_id);
        assert_eq!(adapter.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_intent_is_rejected_before_any_clone_call() {
        let adapter = Arc::new(StubAdapter { clone_calls: AtomicUsize::new(0), fail_names: Vec::new() });
        let eng = engine(adapter.clone());
        let intent = LabIntent { lab_id: "L1".to_string(), nodes: vec![node(NodeKind::Vm, "a")], mission_id: None };

        assert!(matches!(eng.deploy(&intent, "d1"), Err(CoreError::ConfigInvalid(_))));
        assert_eq!(adapter.clone_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn gateway_clone_failure_fails_the_deploy_without_touching_tenants() {
        let adapter = Arc::new(StubAdapter { clone_calls: AtomicUsize::new(0), fail_names: vec!["gw".to_string()] });
        let eng = engine(adapter.clone());
        let intent = LabIntent {
            lab_id: "L1".to_string(),
            nodes: vec![node(NodeKind::Gateway, "gw"), node(NodeKind::Vm, "a")],
            mission_id: None,
        };

        let outcome = eng.deploy(&intent, "d1").unwrap();
        assert_eq!(outcome.terminal_state, DeployTerminalState::Failed);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(adapter.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outcome_and_list_outcomes_reflect_finished_deploys() {
        let adapter = Arc::new(StubAdapter { clone_calls: AtomicUsize::new(0), fail_names: Vec::new() });
        let eng = engine(adapter);
        let intent = LabIntent { lab_id: "L1".to_string(), nodes: vec![node(NodeKind::Gateway, "gw")], mission_id: None };

        assert!(eng.outcome("d1").is_none());
        eng.deploy(&intent, "d1").unwrap();
        assert!(eng.outcome("d1").is_some());
        assert_eq!(eng.list_outcomes().len(), 1);
    }
}
