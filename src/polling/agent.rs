use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn};

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::platform::PlatformDispatcher;
use crate::polling::tier::PollingTier;
use crate::registry::LabRegistry;
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};

const ADAPTER_CALL_DEADLINE: Duration = Duration::from_secs(30);

/// One long-lived thread per `(backend instance, tier)`, mirroring the
/// teacher's `spawn_health_checker`: a loop that does one piece of work, then
/// sleeps via the cancellation consumer so a stop request is observed within
/// one tick instead of after a full sleep.
pub fn spawn_polling_agent(
    backend_kind: String,
    backend_instance_id: String,
    tier: PollingTier,
    period: Duration,
    grace_multiplier: u32,
    dispatcher: Arc<PlatformDispatcher>,
    registry: Arc<dyn LabRegistry>,
) -> StartedThreadContext {
    let thread_name = format!("poll-{backend_kind}-{backend_instance_id}-{tier:?}");
    let grace = period * grace_multiplier;

    let callback = move |stop_consumer: EventConsumer<CancellationMessage>| loop {
        let span = info_span!("polling_tick", backend_kind = %backend_kind, backend_instance_id = %backend_instance_id, tier = ?tier);
        let _guard = span.enter();

        if let Err(err) = run_tick(&backend_kind, &backend_instance_id, tier, &dispatcher, registry.as_ref(), grace) {
            warn!(%err, "polling tick failed");
        }

        if stop_consumer.is_cancelled(period) {
            break;
        }
    };

    NotStartedThreadContext::new(thread_name, callback).start()
}

fn run_tick(
    backend_kind: &str,
    backend_instance_id: &str,
    tier: PollingTier,
    dispatcher: &PlatformDispatcher,
    registry: &dyn LabRegistry,
    grace: Duration,
) -> Result<(), crate::error::CoreError> {
    let call = dispatcher.dispatch(backend_kind, backend_instance_id, ADAPTER_CALL_DEADLINE)?;
    let observed = call.adapter().list_resources(tier.kind_filter())?;

    debug!(observed = observed.len(), "listed native resources");

    let observed_identities: std::collections::HashSet<_> =
        observed.iter().map(|r| r.identity.clone()).collect();

    for resource in observed {
        registry.register(resource)?;
    }

    for known in registry.resources_for_backend(backend_kind, backend_instance_id) {
        if !observed_identities.contains(&known.identity) {
            registry.mark_missing(&known.identity, grace)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkLease;
    use crate::platform::{CloneSpec, Credential, ExecResult, PlatformAdapter, PlatformDispatcherBuilder, PowerOp};
    use crate::registry::memory::InMemoryLabRegistry;
    use crate::registry::RegistryChannel;
    use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceState};
    use std::sync::Mutex;

    struct FakeAdapter {
        listing: Mutex<Vec<Resource>>,
    }

    impl PlatformAdapter for FakeAdapter {
        fn backend_kind(&self) -> &str {
            "onprem"
        }
        fn backend_instance_id(&self) -> &str {
            "host-1"
        }
        fn clone_from_template(&self, _spec: &CloneSpec) -> Result<String, crate::error::CoreError> {
            unimplemented!()
        }
        fn set_power(&self, _native_id: &str, _op: PowerOp) -> Result<(), crate::error::CoreError> {
            unimplemented!()
        }
        fn wait_for_liveness(&self, _native_id: &str, _deadline: Duration) -> Result<String, crate::error::CoreError> {
            unimplemented!()
        }
        fn delete(&self, _native_id: &str, _force: bool) -> Result<(), crate::error::CoreError> {
            unimplemented!()
        }
        fn list_resources(&self, _kind_filter: Option<&str>) -> Result<Vec<Resource>, crate::error::CoreError> {
            Ok(self.listing.lock().unwrap().clone())
        }
        fn attach_network(&self, _native_id: &str, _lease: &NetworkLease) -> Result<(), crate::error::CoreError> {
            unimplemented!()
        }
        fn exec_command(&self, _native_id: &str, _credential: &Credential, _command: &str) -> Result<ExecResult, crate::error::CoreError> {
            unimplemented!()
        }
    }

    #[test]
    fn tick_registers_observed_and_marks_vanished_as_missing() {
        let identity = ResourceIdentity::new("onprem", "host-1", "vm-a");
        let adapter = Arc::new(FakeAdapter {
            listing: Mutex::new(vec![Resource::new(identity.clone(), ResourceKind::Vm, "vm-a")
                .with_state(ResourceState::Running)]),
        });
        let dispatcher = Arc::new(PlatformDispatcherBuilder::new().register(adapter.clone(), 4).build());
        let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
        registry.set_expected_names("", vec![]);

        run_tick(
            "onprem",
            "host-1",
            PollingTier::VirtualMachines,
            &dispatcher,
            registry.as_ref(),
            Duration::from_millis(1),
        )
        .unwrap();
        assert!(registry.get(&identity).is_some());

        adapter.listing.lock().unwrap().clear();
        std::thread::sleep(Duration::from_millis(5));
        let consumer = registry.subscribe(RegistryChannel::All);
        run_tick(
            "onprem",
            "host-1",
            PollingTier::VirtualMachines,
            &dispatcher,
            registry.as_ref(),
            Duration::from_millis(1),
        )
        .unwrap();

        let resource = registry.get(&identity).unwrap();
        assert_eq!(resource.state, ResourceState::Unknown);
        assert!(consumer.as_ref().try_recv().is_ok());
    }
}
