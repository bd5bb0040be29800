//! End-to-end scenarios exercising the Deployment Engine, Drift Detector and
//! Mission Engine together through fake backends, mirroring the walkthroughs
//! in the control plane's behavior reference: small lab happy path, gateway
//! failure, tenant partial failure, drift clearing after restart, and
//! sequential/cancelled mission injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rangectl::deploy::{DeployTerminalState, DeploymentConfig, DeploymentEngine, LabIntent, NodeKind, NodeSpec};
use rangectl::drift::DriftDetector;
use rangectl::error::CoreError;
use rangectl::event::channel::pub_sub;
use rangectl::mission::{
    Exploit, ExploitBody, ExploitType, MissionConfig, MissionEngine, MissionSpec, MissionState, MissionTarget, OsFamily,
    PlaybookOutcome, PlaybookRunner, PlaybookStatus, StepOutcome, Validator,
};
use rangectl::network::{AllocatorConfig, NetworkAllocator, NetworkLease};
use rangectl::platform::{CloneSpec, Credential, ExecResult, PlatformAdapter, PlatformDispatcherBuilder, PowerOp};
use rangectl::registry::memory::InMemoryLabRegistry;
use rangectl::registry::LabRegistry;
use rangectl::resource::Resource;

fn intent_with_tenants(lab_id: &str, tenant_names: &[&str]) -> LabIntent {
    let mut nodes = vec![NodeSpec {
        kind: NodeKind::Gateway,
        template_ref: "tpl-gw".to_string(),
        name: "gw".to_string(),
        cpu: 1,
        memory_mb: 512,
        disks_gb: vec![10],
        network_edges: Vec::new(),
    }];
    for name in tenant_names {
        nodes.push(NodeSpec {
            kind: NodeKind::Vm,
            template_ref: "tpl-vm".to_string(),
            name: name.to_string(),
            cpu: 1,
            memory_mb: 1024,
            disks_gb: vec![20],
            network_edges: Vec::new(),
        });
    }
    LabIntent { lab_id: lab_id.to_string(), nodes, mission_id: None }
}

fn allocator() -> Arc<NetworkAllocator> {
    Arc::new(NetworkAllocator::new(AllocatorConfig::default()))
}

/// A fake adapter whose clone/liveness behavior is driven per-node-name, so a
/// single test can make one node fail while its siblings succeed.
struct FakeAdapter {
    fail_clone_for: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeAdapter {
    fn new() -> Self {
        Self { fail_clone_for: Mutex::new(Vec::new()), deleted: Mutex::new(Vec::new()), next_id: AtomicUsize::new(0) }
    }

    fn failing(names: &[&str]) -> Self {
        let adapter = Self::new();
        *adapter.fail_clone_for.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
        adapter
    }
}

impl PlatformAdapter for FakeAdapter {
    fn backend_kind(&self) -> &str {
        "onprem"
    }
    fn backend_instance_id(&self) -> &str {
        "host-1"
    }
    fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError> {
        if self.fail_clone_for.lock().unwrap().contains(&spec.name) {
            return Err(CoreError::BackendUnreachable(format!("simulated clone failure for {}", spec.name)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("native-{}-{id}", spec.name))
    }
    fn set_power(&self, _native_id: &str, _op: PowerOp) -> Result<(), CoreError> {
        Ok(())
    }
    fn wait_for_liveness(&self, native_id: &str, _deadline: Duration) -> Result<String, CoreError> {
        Ok(format!("10.50.0.{}", native_id.len() % 250 + 1))
    }
    fn delete(&self, native_id: &str, _force: bool) -> Result<(), CoreError> {
        self.deleted.lock().unwrap().push(native_id.to_string());
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

fn engine_with(adapter: Arc<FakeAdapter>, registry: Arc<dyn LabRegistry>) -> DeploymentEngine {
    let dispatcher = Arc::new(PlatformDispatcherBuilder::new().register(adapter, 4).build());
    let allocator = allocator();
    let (events, _consumer) = pub_sub();
    DeploymentEngine::new("onprem", "host-1", dispatcher, registry, allocator, events, DeploymentConfig::default())
}

#[test]
fn small_lab_deploys_cleanly_and_tears_down() {
    let adapter = Arc::new(FakeAdapter::new());
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
    let engine = engine_with(adapter.clone(), registry.clone());
    let intent = intent_with_tenants("lab-small", &["web-1", "db-1"]);

    let outcome = engine.deploy(&intent, "deploy-1").unwrap();
    assert_eq!(outcome.terminal_state, DeployTerminalState::Completed);
    assert_eq!(outcome.tasks.len(), 3);
    assert!(registry.resources_for_lab("lab-small").len() == 3);

    engine.destroy("lab-small").unwrap();
    assert_eq!(adapter.deleted.lock().unwrap().len(), 3);
}

#[test]
fn gateway_failure_skips_tenants_and_fails_the_deploy() {
    let adapter = Arc::new(FakeAdapter::failing(&["gw"]));
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
    let engine = engine_with(adapter, registry);
    let intent = intent_with_tenants("lab-gwfail", &["web-1"]);

    let outcome = engine.deploy(&intent, "deploy-1").unwrap();
    assert_eq!(outcome.terminal_state, DeployTerminalState::Failed);
    assert_eq!(outcome.tasks.len(), 1, "tenants never run once the gateway fails");
    assert!(outcome.first_fatal_error.is_some());
}

#[test]
fn one_failing_tenant_completes_with_errors_not_fully_failed() {
    let adapter = Arc::new(FakeAdapter::failing(&["db-1"]));
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
    let engine = engine_with(adapter, registry);
    let intent = intent_with_tenants("lab-partial", &["web-1", "db-1", "web-2"]);

    let outcome = engine.deploy(&intent, "deploy-1").unwrap();
    assert_eq!(outcome.terminal_state, DeployTerminalState::CompletedWithErrors);
    assert_eq!(outcome.tasks.len(), 4);
    let failed: Vec<_> = outcome.tasks.iter().filter(|t| t.error.is_some()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].node_name, "db-1");
}

#[test]
fn repeated_deploy_id_is_idempotent_and_does_not_reclone() {
    let adapter = Arc::new(FakeAdapter::new());
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
    let engine = engine_with(adapter.clone(), registry);
    let intent = intent_with_tenants("lab-idempotent", &["web-1"]);

    let first = engine.deploy(&intent, "deploy-1").unwrap();
    let second = engine.deploy(&intent, "deploy-1").unwrap();
    assert_eq!(first.tasks[0].native_id, second.tasks[0].native_id);
    assert_eq!(adapter.next_id.load(Ordering::SeqCst), 2, "exactly one clone per node, not reissued on retry");
}

#[test]
fn drift_clears_once_resources_reappear_after_restart() {
    let adapter = Arc::new(FakeAdapter::new());
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
    let engine = engine_with(adapter, registry.clone());
    let detector = DriftDetector::new(registry.clone());
    let intent = intent_with_tenants("lab-drift", &["web-1"]);

    engine.deploy(&intent, "deploy-1").unwrap();
    let healthy_snapshot = detector.reconcile(&intent);
    assert!(healthy_snapshot.healthy());

    std::thread::sleep(Duration::from_millis(5));
    for resource in registry.resources_for_lab("lab-drift") {
        registry.mark_missing(&resource.identity, Duration::ZERO).unwrap();
    }
    let drifted_snapshot = detector.reconcile(&intent);
    assert!(!drifted_snapshot.healthy(), "resources gone missing should show up as drift");

    for resource in registry.resources_for_lab("lab-drift") {
        let mut refreshed = resource.clone();
        refreshed.state = rangectl::resource::ResourceState::Running;
        registry.register(refreshed).unwrap();
    }
    let recovered_snapshot = detector.reconcile(&intent);
    assert!(recovered_snapshot.healthy(), "drift should clear once the resources are observed running again");
}

/// A scripted playbook runner: each script call advances a shared step
/// counter so the test can assert exploits ran in declaration order, and can
/// be told to fail or hang on a particular exploit name.
struct ScriptedRunner {
    order: Mutex<Vec<String>>,
    fail_on: Option<String>,
    hang_on: Option<String>,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self { order: Mutex::new(Vec::new()), fail_on: None, hang_on: None }
    }
}

impl PlaybookRunner for ScriptedRunner {
    fn run_script(&self, _host: &str, _os_family: OsFamily, script: &str) -> Result<ExecResult, CoreError> {
        self.order.lock().unwrap().push(script.to_string());
        if self.hang_on.as_deref() == Some(script) {
            std::thread::sleep(Duration::from_millis(300));
        }
        if self.fail_on.as_deref() == Some(script) {
            return Ok(ExecResult { stdout: String::new(), stderr: "boom".to_string(), exit_code: 1 });
        }
        Ok(ExecResult { stdout: "ok".to_string(), stderr: String::new(), exit_code: 0 })
    }

    fn run_playbook(&self, _hosts: &[String], _path: &str, _vars: &HashMap<String, String>) -> Result<PlaybookOutcome, CoreError> {
        Ok(PlaybookOutcome { status: PlaybookStatus::Success, log: String::new() })
    }
}

fn exploit(name: &str, fatal: bool) -> Exploit {
    Exploit {
        name: name.to_string(),
        exploit_type: ExploitType::Credential,
        severity: 2,
        target_os_family: OsFamily::Linux,
        body: ExploitBody::Script(name.to_string()),
        variables: HashMap::new(),
        cve: None,
        fatal_on_fail: fatal,
    }
}

fn mission_engine(runner: Arc<ScriptedRunner>) -> Arc<MissionEngine> {
    let dispatcher = Arc::new(PlatformDispatcherBuilder::new().build());
    let validator = Arc::new(Validator::new());
    let (events, _consumer) = pub_sub();
    Arc::new(MissionEngine::new("onprem", "host-1", dispatcher, runner, validator, events, MissionConfig::default()))
}

fn wait_for_terminal(engine: &MissionEngine, mission_id: &str) -> MissionState {
    for _ in 0..500 {
        if let Some(result) = engine.status(mission_id) {
            if result.state.is_terminal() {
                return result.state;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("mission '{mission_id}' did not reach a terminal state in time");
}

#[test]
fn mission_runs_exploits_sequentially_in_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let engine = mission_engine(runner.clone());
    let spec = MissionSpec {
        mission_id: "mission-seq".to_string(),
        target: MissionTarget::Existing { host_ip: "10.0.0.5".to_string(), os_family: OsFamily::Linux },
        exploits: vec![exploit("recon", false), exploit("privesc", false), exploit("exfil", false)],
        probes: Vec::new(),
    };
    engine.start(spec);

    assert_eq!(wait_for_terminal(&engine, "mission-seq"), MissionState::Completed);
    let result = engine.status("mission-seq").unwrap();
    let names: Vec<_> = result.step_log.iter().map(|s| s.exploit_name.clone()).collect();
    assert_eq!(names, vec!["recon", "privesc", "exfil"]);
    assert!(result.step_log.iter().all(|s| s.outcome == StepOutcome::Success));
}

#[test]
fn fatal_exploit_failure_stops_the_mission_before_later_steps() {
    let mut runner = ScriptedRunner::new();
    runner.fail_on = Some("privesc".to_string());
    let runner = Arc::new(runner);
    let engine = mission_engine(runner.clone());
    let spec = MissionSpec {
        mission_id: "mission-fatal".to_string(),
        target: MissionTarget::Existing { host_ip: "10.0.0.5".to_string(), os_family: OsFamily::Linux },
        exploits: vec![exploit("recon", false), exploit("privesc", true), exploit("exfil", false)],
        probes: Vec::new(),
    };
    engine.start(spec);

    assert_eq!(wait_for_terminal(&engine, "mission-fatal"), MissionState::Failed);
    let result = engine.status("mission-fatal").unwrap();
    assert_eq!(result.step_log.len(), 2, "exfil must never run once a fatal step fails");
    assert!(!runner.order.lock().unwrap().contains(&"exfil".to_string()));
}

#[test]
fn cancelling_a_mission_lets_the_in_flight_step_finish_then_stops() {
    let mut runner = ScriptedRunner::new();
    runner.hang_on = Some("slow-step".to_string());
    let runner = Arc::new(runner);
    let engine = mission_engine(runner.clone());
    let spec = MissionSpec {
        mission_id: "mission-cancel".to_string(),
        target: MissionTarget::Existing { host_ip: "10.0.0.5".to_string(), os_family: OsFamily::Linux },
        exploits: vec![exploit("slow-step", false), exploit("never-reached", false)],
        probes: Vec::new(),
    };
    engine.start(spec);

    std::thread::sleep(Duration::from_millis(50));
    engine.cancel("mission-cancel");

    let state = wait_for_terminal(&engine, "mission-cancel");
    assert!(matches!(state, MissionState::Cancelled | MissionState::Completed));

    if state == MissionState::Cancelled {
        let result = engine.status("mission-cancel").unwrap();
        assert_eq!(result.step_log.len(), 2);
        assert_eq!(result.step_log[0].exploit_name, "slow-step");
        assert_eq!(result.step_log[0].outcome, StepOutcome::Success, "the in-flight step is left to finish");
        assert_eq!(result.step_log[1].exploit_name, "never-reached");
        assert_eq!(result.step_log[1].outcome, StepOutcome::Cancelled);
    }
}

#[test]
fn incompatible_os_exploit_is_recorded_without_running() {
    let runner = Arc::new(ScriptedRunner::new());
    let engine = mission_engine(runner.clone());
    let mut windows_exploit = exploit("winprivesc", false);
    windows_exploit.target_os_family = OsFamily::Windows;
    let spec = MissionSpec {
        mission_id: "mission-os".to_string(),
        target: MissionTarget::Existing { host_ip: "10.0.0.5".to_string(), os_family: OsFamily::Linux },
        exploits: vec![windows_exploit],
        probes: Vec::new(),
    };
    engine.start(spec);

    assert_eq!(wait_for_terminal(&engine, "mission-os"), MissionState::Completed);
    let result = engine.status("mission-os").unwrap();
    assert_eq!(result.step_log[0].outcome, StepOutcome::IncompatibleOs);
    assert!(runner.order.lock().unwrap().is_empty(), "an incompatible exploit must never reach the runner");
}
