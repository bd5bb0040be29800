use std::process::ExitCode;
use std::sync::Arc;

use rangectl::cli::{Cli, Command, DeployCommand, LabCommand, MissionCommand};
use rangectl::config::AppConfig;
use rangectl::deploy::{DeploymentEngine, LabIntent};
use rangectl::drift::DriftDetector;
use rangectl::error::CoreError;
use rangectl::event::channel::pub_sub;
use rangectl::logging::Logging;
use rangectl::mission::{Exploit, ExploitBody, ExploitType, ExternalPlaybookRunner, MissionEngine, MissionSpec, MissionTarget, OsFamily, Probe, Validator};
use rangectl::network::NetworkAllocator;
use rangectl::platform::PlatformDispatcherBuilder;
use rangectl::polling::spawn_polling_agent;
use rangectl::registry::memory::InMemoryLabRegistry;
use rangectl::registry::LabRegistry;
use rangectl::secrets::EnvSecretOracle;
use rangectl::store::{ExploitLibrary, InMemoryLabIntentStore, InMemoryMissionSpecStore, LabIntentStore, MissionSpecStore};
use tracing::{error, info};

struct App {
    registry: Arc<dyn LabRegistry>,
    dispatcher: Arc<rangectl::platform::PlatformDispatcher>,
    deploy_engine: Arc<DeploymentEngine>,
    mission_engine: Arc<MissionEngine>,
    drift: Arc<DriftDetector>,
    lab_store: Arc<dyn LabIntentStore>,
    mission_store: Arc<dyn MissionSpecStore>,
    exploit_library: Arc<ExploitLibrary>,
    config: AppConfig,
}

fn seed_exploit_library(library: &ExploitLibrary) {
    library.add(Exploit {
        name: "default-credential-check".to_string(),
        exploit_type: ExploitType::Credential,
        severity: 3,
        target_os_family: OsFamily::Linux,
        body: ExploitBody::Script("echo 'checked default credentials'".to_string()),
        variables: Default::default(),
        cve: None,
        fatal_on_fail: false,
    });
}

fn build_app(config: AppConfig) -> App {
    let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());

    let mut dispatcher_builder = PlatformDispatcherBuilder::new();
    for adapter_config in &config.adapters {
        let (_, _, adapter) = adapter_config.build();
        dispatcher_builder = dispatcher_builder.register(adapter, 4);
    }
    let dispatcher = Arc::new(dispatcher_builder.build());

    let allocator = Arc::new(NetworkAllocator::new(config.allocator.clone().into()));
    let drift = Arc::new(DriftDetector::new(registry.clone()));

    let (deploy_events, _deploy_consumer) = pub_sub();
    let (backend_kind, backend_instance_id) = config
        .adapters
        .first()
        .map(|a| (a.backend_kind().to_string(), a.instance_id().to_string()))
        .unwrap_or_else(|| ("onprem".to_string(), "unconfigured".to_string()));

    let deploy_engine = Arc::new(DeploymentEngine::new(
        backend_kind.clone(),
        backend_instance_id.clone(),
        dispatcher.clone(),
        registry.clone(),
        allocator.clone(),
        deploy_events,
        config.deployment.clone().into(),
    ));

    let secrets = Arc::new(EnvSecretOracle::default());
    let playbook_runner = Arc::new(ExternalPlaybookRunner::new(secrets, "ansible", "ansible-playbook"));
    let validator = Arc::new(Validator::new());
    let (mission_events, _mission_consumer) = pub_sub();
    let mission_engine = Arc::new(MissionEngine::new(
        backend_kind,
        backend_instance_id,
        dispatcher.clone(),
        playbook_runner,
        validator,
        mission_events,
        config.mission.clone().into(),
    ));

    let lab_store: Arc<dyn LabIntentStore> = Arc::new(InMemoryLabIntentStore::default());
    let mission_store: Arc<dyn MissionSpecStore> = Arc::new(InMemoryMissionSpecStore::default());
    let exploit_library = Arc::new(ExploitLibrary::default());

    App { registry, dispatcher, deploy_engine, mission_engine, drift, lab_store, mission_store, exploit_library, config }
}

fn cmd_init(app: &App) -> Result<(), CoreError> {
    seed_exploit_library(&app.exploit_library);
    info!(exploits = app.exploit_library.len(), "seeded exploit library");
    Ok(())
}

fn cmd_serve(app: &App) -> Result<(), CoreError> {
    let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| CoreError::Internal(format!("could not install signal handler: {e}")))?;

    let mut pollers = Vec::new();
    for adapter_config in &app.config.adapters {
        let kind = adapter_config.backend_kind().to_string();
        let instance = adapter_config.instance_id().to_string();
        for (tier, period) in [
            (rangectl::polling::PollingTier::VirtualMachines, app.config.polling.vm_period),
            (rangectl::polling::PollingTier::Inventory, app.config.polling.inventory_period),
            (rangectl::polling::PollingTier::Discovery, app.config.polling.discovery_period),
        ] {
            pollers.push(spawn_polling_agent(
                kind.clone(),
                instance.clone(),
                tier,
                period,
                app.config.polling.grace_multiplier,
                app.dispatcher.clone(),
                app.registry.clone(),
            ));
        }
    }

    info!("control plane serving; waiting for shutdown signal");
    let _ = stop_rx.recv();
    info!("shutdown signal received, stopping workers");

    for poller in pollers {
        if let Err(err) = poller.stop() {
            error!(%err, "poller did not stop cleanly");
        }
    }
    Ok(())
}

fn cmd_lab(app: &App, command: LabCommand) -> Result<(), CoreError> {
    match command {
        LabCommand::List => {
            for intent in app.lab_store.list() {
                println!("{}", intent.lab_id);
            }
        }
        LabCommand::Show { lab_id } => match app.lab_store.get(&lab_id) {
            Some(intent) => println!("{}", serde_json::to_string_pretty(&intent).unwrap_or_default()),
            None => return Err(CoreError::ResourceMissing(rangectl::resource::ResourceIdentity::new("lab", "intent-store", lab_id))),
        },
        LabCommand::Create { path } => {
            let contents = std::fs::read_to_string(&path).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
            let intent: LabIntent = serde_yaml::from_str(&contents).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
            intent.validate()?;
            app.lab_store.create(intent)?;
        }
        LabCommand::Delete { lab_id } => {
            app.deploy_engine.destroy(&lab_id)?;
            app.lab_store.delete(&lab_id)?;
        }
    }
    Ok(())
}

fn cmd_deploy(app: &App, command: DeployCommand) -> Result<(), CoreError> {
    match command {
        DeployCommand::List => {
            for outcome in app.deploy_engine.list_outcomes() {
                println!("{} {} {:?}", outcome.deploy_id, outcome.lab_id, outcome.terminal_state);
            }
        }
        DeployCommand::Create { lab_id, deploy_id } => {
            let intent = app
                .lab_store
                .get(&lab_id)
                .ok_or_else(|| CoreError::ResourceMissing(rangectl::resource::ResourceIdentity::new("lab", "intent-store", &lab_id)))?;
            let outcome = app.deploy_engine.deploy(&intent, &deploy_id)?;
            let snapshot = app.drift.reconcile(&intent);
            println!("{} {:?} healthy={}", outcome.deploy_id, outcome.terminal_state, snapshot.healthy());
        }
        DeployCommand::Destroy { deploy_id } => {
            let outcome = app
                .deploy_engine
                .outcome(&deploy_id)
                .ok_or_else(|| CoreError::ResourceMissing(rangectl::resource::ResourceIdentity::new("deploy", "outcome-store", &deploy_id)))?;
            app.deploy_engine.destroy(&outcome.lab_id)?;
        }
    }
    Ok(())
}

fn cmd_mission(app: &App, command: MissionCommand) -> Result<(), CoreError> {
    match command {
        MissionCommand::Create { path } => {
            let contents = std::fs::read_to_string(&path).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
            let file: MissionSpecFile = serde_yaml::from_str(&contents).map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
            for exploit in &file.exploits {
                app.exploit_library.add(exploit.clone());
            }
            let spec = MissionSpec {
                mission_id: file.mission_id.clone(),
                target: file.target,
                exploits: file.exploits,
                probes: file.probes.into_iter().collect(),
            };
            let exploit_count = spec.exploits.len();
            app.mission_store.create(spec)?;
            println!("mission {} created with {exploit_count} exploits", file.mission_id);
        }
        MissionCommand::Start { mission_id } => {
            let spec = app.mission_store.get(&mission_id).ok_or_else(|| {
                CoreError::ResourceMissing(rangectl::resource::ResourceIdentity::new("mission", "spec-store", &mission_id))
            })?;
            app.mission_engine.start(spec);
            println!("mission {mission_id} started");
        }
        MissionCommand::Cancel { mission_id } => {
            app.mission_engine.cancel(&mission_id);
            println!("mission {mission_id} cancellation requested");
        }
    }
    Ok(())
}

#[derive(serde::Deserialize)]
struct MissionSpecFile {
    mission_id: String,
    target: MissionTarget,
    #[serde(default)]
    exploits: Vec<Exploit>,
    #[serde(default)]
    probes: std::collections::HashMap<String, Probe>,
}

fn main() -> ExitCode {
    if let Err(err) = Logging::try_init() {
        eprintln!("failed to initialize logging: {err}");
    }

    let cli = Cli::parse_args();
    let config = match AppConfig::load(&cli.get_config_path()) {
        Ok(config) => config,
        Err(err) => {
            if matches!(cli.command, Command::Init) {
                AppConfig::default()
            } else {
                error!(%err, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        }
    };

    let app = build_app(config);

    let result = match cli.command {
        Command::Init => cmd_init(&app),
        Command::Serve => cmd_serve(&app),
        Command::Lab(command) => cmd_lab(&app, command),
        Command::Deploy(command) => cmd_deploy(&app, command),
        Command::Mission(command) => cmd_mission(&app, command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            ExitCode::FAILURE
        }
    }
}
