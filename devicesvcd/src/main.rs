//! `devicesvcd`: the device-service runtime binary. Wires together
//! every module in this crate in the order spec §5 describes --
//! secrets, then configuration, then the message bus, then devices,
//! then autoevents, then discovery -- and runs until asked to stop.

mod autoevent;
mod bus;
mod busrpc;
mod callbacks;
mod command;
mod config;
mod configstore;
mod definitions;
mod handlers;
mod httpd;
mod metrics;
mod provision;
mod secretstore;

use crate::autoevent::AutoeventContext;
use crate::bus::dispatch::Dispatcher;
use crate::bus::mqtt::MqttBus;
use crate::bus::redis_streams::RedisStreamsBus;
use crate::bus::{Bus, IncomingMessage};
use crate::command::PipelineConfig;
use crate::config::BusKind;
use crate::provision::WatcherList;
use crate::secretstore::{SecretStore, SecretsFile};
use device_svc_api::driver::Driver;
use device_svc_api::registry::Registry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let Some(cfg) = config::get().await else {
        return;
    };

    init_logging(cfg.log_level());

    if let Err(e) = run(cfg).await {
        error!(error = %e, "fatal startup error, exiting");
        std::process::exit(1);
    }
}

fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cfg: config::Config) -> Result<(), device_svc_api::Error> {
    info!(service_name = %cfg.service_name, "starting up");

    // 1. Secrets -- opened before the bus, since bus credentials are
    // themselves a secret (spec §5 ordering).
    let secret_store: Arc<dyn SecretStore> = match &cfg.secret_store.secrets_file {
        Some(path) => Arc::new(SecretsFile::load(path).await?),
        None => Arc::new(SecretsFile::empty()),
    };

    // 2. Shared runtime state, built before the bus so callback
    // handlers can close over it.
    let registry = Arc::new(Registry::new());
    let driver: Arc<dyn Driver> = Arc::new(device_svc_drv_null::NullDriver::new());
    driver.initialize(&HashMap::new()).await.map_err(|e| device_svc_api::Error::DriverError(e.to_string()))?;

    let metrics = Arc::new(metrics::Metrics::default());
    let watchers = Arc::new(WatcherList::new());
    let pipeline_config = PipelineConfig {
        data_transform: cfg.device.data_transform,
        max_cmd_ops: cfg.device.max_cmd_ops,
        service_name: cfg.service_name.clone(),
        service_locked: Arc::new(AtomicBool::new(false)),
    };

    // 3. The message bus.
    let (bus, mut inbound, redis_bus) = connect_bus(&cfg, secret_store.as_ref()).await?;

    let ctx = AutoeventContext {
        registry: registry.clone(),
        driver: driver.clone(),
        bus: bus.clone(),
        metrics: metrics.clone(),
        pipeline_config,
        base_topic_prefix: cfg.message_bus.base_topic_prefix.clone(),
    };

    let dispatcher = Arc::new(Dispatcher::new(&cfg.message_bus.base_topic_prefix, &cfg.service_name));
    handlers::register_all(&dispatcher, &ctx, watchers.clone(), &cfg.message_bus.base_topic_prefix, &cfg.service_name).await;

    let subscriptions = dispatcher.subscriptions().await;
    match redis_bus {
        Some(redis_bus) => inbound = redis_bus.spawn_subscriber(subscriptions),
        None => {
            for subscription in &subscriptions {
                if let Err(e) = bus.subscribe(subscription).await {
                    warn!(subscription = %subscription, error = %e, "failed to subscribe");
                }
            }
        }
    }

    {
        let dispatcher = dispatcher.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                dispatcher.dispatch(bus.as_ref(), message).await;
            }
        });
    }

    // 4. Devices: load local profile/device definitions (spec §1
    // "YAML/JSON file readers") and install them exactly as a
    // `device/add` callback would.
    for profile in definitions::load_profiles(&cfg.device.profiles_dir).await? {
        registry.add_profile(profile).await;
    }

    for device in definitions::load_devices(&cfg.device.devices_dir, &cfg.service_name).await? {
        let name = device.name.clone();
        if let Err(e) = callbacks::device_added(&ctx, device).await {
            warn!(device = %name, error = %e, "failed to install device from local definitions");
        }
    }

    info!(devices = registry.device_count().await, profiles = registry.profile_count().await, "devices loaded");

    // 5 & 6. Autoevents are started by `callbacks::device_added` above;
    // discovery is driven by a background task fed both by the
    // configured interval and the admin HTTP trigger.
    let (discovery_tx, discovery_rx) = mpsc::channel::<String>(8);
    spawn_discovery_task(driver.clone(), watchers.clone(), discovery_rx);
    if cfg.device.discovery.enabled {
        spawn_discovery_ticker(discovery_tx.clone(), cfg.device.discovery.interval_ms);
    }

    spawn_telemetry_task(metrics.clone(), cfg.writable.telemetry_interval_ms);

    let (stop_tx, stop_rx) = watch::channel(false);
    let http_state = Arc::new(httpd::HttpState { config: cfg.clone(), metrics: metrics.clone(), discovery_tx });
    let addr: SocketAddr = ([0, 0, 0, 0], 59990).into();

    let http_secret_store = secret_store.clone();
    let http_task = tokio::spawn(async move {
        httpd::serve(addr, http_state, http_secret_store, stop_rx).await;
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
    let _ = stop_tx.send(true);
    let _ = http_task.await;

    driver.stop(false).await;
    Ok(())
}

/// Connects to the configured bus and returns it as a trait object
/// alongside the channel its inbound-message forwarding task feeds.
/// For the Redis binding the returned channel is a throwaway empty one
/// and the concrete `RedisStreamsBus` is also returned separately --
/// its real subscriber loop can only start once the dispatcher's topic
/// set is known, which requires a call `main` makes after this one.
#[allow(clippy::type_complexity)]
async fn connect_bus(
    cfg: &config::Config,
    secret_store: &dyn SecretStore,
) -> Result<(Arc<dyn Bus>, mpsc::Receiver<IncomingMessage>, Option<Arc<RedisStreamsBus>>), device_svc_api::Error> {
    match cfg.message_bus.kind {
        BusKind::Mqtt => {
            let (mqtt_bus, rx) = MqttBus::connect(
                &cfg.message_bus.client_id,
                &cfg.message_bus.host,
                cfg.message_bus.port,
                cfg.message_bus.qos,
                secret_store,
                "mqtt",
                std::time::Duration::from_secs(30),
            )
            .await?;
            Ok((Arc::new(mqtt_bus), rx, None))
        }
        BusKind::Redis => {
            let url = format!("redis://{}:{}", cfg.message_bus.host, cfg.message_bus.port);
            let redis_bus = Arc::new(RedisStreamsBus::connect(&url).await?);
            let (_tx, rx) = mpsc::channel(1);
            Ok((redis_bus.clone(), rx, Some(redis_bus)))
        }
    }
}

fn spawn_discovery_task(driver: Arc<dyn Driver>, watchers: Arc<WatcherList>, mut rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(request_id) = rx.recv().await {
            let watcher_count = watchers.len().await;
            info!(watchers = watcher_count, "running discovery scan");
            if let Err(e) = driver.discover(&request_id).await {
                warn!(error = %e, "discovery scan failed");
            }
        }
    });
}

fn spawn_discovery_ticker(tx: mpsc::Sender<String>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(String::new()).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_telemetry_task(metrics: Arc<metrics::Metrics>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            info!(
                events_sent = snapshot.events_sent,
                readings_sent = snapshot.readings_sent,
                command_failures = snapshot.command_failures,
                devices_down = snapshot.devices_down,
                "telemetry"
            );
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
