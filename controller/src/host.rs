use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use reflow_common::{
    Device, DeviceError, EngineAction, EngineEvent, Profile, ReflowController, RuntimeConfig,
    TemperatureCell, TickOutput, TOPIC_CMD_MANUAL, TOPIC_CMD_PROFILE, TOPIC_CMD_START,
    TOPIC_CMD_STOP, TOPIC_CONTROLLER_AVAILABILITY, TOPIC_CONTROLLER_EVENT, TOPIC_CONTROLLER_STATE,
    TOPIC_CONTROLLER_STATUS,
};

use crate::sim::SimulatedOven;

const MAX_MQTT_PAYLOAD_BYTES: usize = 4_096;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<ReflowController>>,
    device: Arc<Mutex<Box<dyn Device>>>,
    temperature: Arc<TemperatureCell>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
struct ManualCommand {
    intensity: f32,
    #[serde(rename = "targetTemperature", default)]
    target_temperature: Option<f32>,
}

/// Wraps an outgoing payload with a wall-clock timestamp.
#[derive(Debug, Serialize)]
struct Stamped<'a, T> {
    timestamp: String,
    #[serde(flatten)]
    body: &'a T,
}

impl<'a, T> Stamped<'a, T> {
    fn now(body: &'a T) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            body,
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let profile = load_profile(&runtime).await?;
    match &profile {
        Some(profile) => info!(
            profile = %profile.name,
            phases = profile.phases.len(),
            "profile loaded"
        ),
        None => info!("no profile configured, running in manual mode"),
    }

    let mut controller =
        ReflowController::new(runtime.controller.clone(), runtime.regulator.clone());
    let now_ms = monotonic_ms();
    controller.set_manual_setpoint(
        runtime.manual.intensity,
        runtime.manual.target_temperature,
        now_ms,
    );
    controller.set_profile(profile);

    let temperature = Arc::new(TemperatureCell::new());
    let mut oven: Box<dyn Device> = Box::new(SimulatedOven::new());
    {
        let temperature = Arc::clone(&temperature);
        oven.on_temperature_changed(Box::new(move |reading| {
            temperature.store(reading);
        }));
    }
    oven.connect().context("failed to connect oven")?;
    restart_oven(&mut *oven, &temperature).context("failed to start oven")?;
    controller.start(monotonic_ms());

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("reflow-controller-rust", mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(15));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_AVAILABILITY,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        device: Arc::new(Mutex::new(oven)),
        temperature,
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt)
        .await
        .context("failed to subscribe controller topics")?;
    publish_availability(&app_state, "online").await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_mqtt_loop(app_state.clone(), eventloop);
    let control = spawn_control_loop(
        app_state.clone(),
        runtime.controller.tick_interval_ms,
        shutdown_rx.clone(),
    );
    let publisher = spawn_state_publish_loop(
        app_state.clone(),
        runtime.controller.state_publish_interval_ms,
        shutdown_rx,
    );

    info!(
        tick_ms = runtime.controller.tick_interval_ms,
        "reflow controller running"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("control loops already stopped");
    }
    for (name, handle) in [("control", control), ("publisher", publisher)] {
        if let Err(err) = handle.await {
            warn!("{name} loop ended abnormally: {err}");
        }
    }

    shutdown_device(&app_state).await;
    publish_availability(&app_state, "offline").await;
    Ok(())
}

async fn load_profile(runtime: &RuntimeConfig) -> anyhow::Result<Option<Profile>> {
    let path = std::env::var("REFLOW_PROFILE")
        .ok()
        .or_else(|| runtime.profile_path.clone())
        .map(PathBuf::from);
    let Some(path) = path else {
        return Ok(None);
    };

    let raw = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read profile {}", path.display()))?;
    let profile = Profile::from_json(&raw)
        .with_context(|| format!("failed to parse profile {}", path.display()))?;
    Ok(Some(profile))
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_MANUAL,
        TOPIC_CMD_PROFILE,
        TOPIC_CMD_START,
        TOPIC_CMD_STOP,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(
    app_state: AppState,
    tick_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let now_ms = monotonic_ms();
            let measured = app_state.temperature.load();
            let output = {
                let mut controller = app_state.controller.lock().await;
                if controller.is_running() {
                    controller.tick(now_ms, measured)
                } else {
                    TickOutput::default()
                }
            };

            if !output.actions.is_empty() {
                execute_engine_actions(&app_state, output.actions).await;
            }
            for event in output.events {
                publish_event(&app_state, &event).await;
            }
        }
    })
}

fn spawn_state_publish_loop(
    app_state: AppState,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let now_ms = monotonic_ms();
            let active_intensity = { app_state.device.lock().await.pulse() };
            let (sample, status) = {
                let controller = app_state.controller.lock().await;
                (
                    controller.sample(active_intensity),
                    controller.status(now_ms, active_intensity),
                )
            };
            debug!(?status, "controller status");

            publish_json(&app_state, TOPIC_CONTROLLER_STATE, false, &Stamped::now(&sample)).await;
            publish_json(&app_state, TOPIC_CONTROLLER_STATUS, true, &Stamped::now(&status)).await;
        }
    })
}

async fn execute_engine_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    let mut device = app_state.device.lock().await;
    for action in actions {
        match action {
            EngineAction::SetPulse(duty) => {
                debug!(duty, "set pulse");
                if let Err(err) = device.set_pulse(duty) {
                    warn!("failed to apply pulse {duty:.3}: {err}");
                }
            }
        }
    }
}

async fn publish_event(app_state: &AppState, event: &EngineEvent) {
    match event {
        EngineEvent::PhaseStarted {
            index,
            name,
            phase_type,
            target_temperature,
            base_intensity,
            start_temperature,
            ..
        } => info!(
            index,
            name = %name,
            phase_type = phase_type.as_str(),
            target_temperature,
            base_intensity,
            start_temperature,
            "phase:start"
        ),
        EngineEvent::PhaseEnded { index, name } => info!(index, name = %name, "phase:end"),
        EngineEvent::ProfileFinished { name } => info!(profile = %name, "profile:finished"),
        EngineEvent::TickFault { message } => warn!("control tick fault: {message}"),
    }

    publish_json(app_state, TOPIC_CONTROLLER_EVENT, false, &Stamped::now(event)).await;
}

async fn publish_json<T: Serialize>(app_state: &AppState, topic: &str, retain: bool, body: &T) {
    match serde_json::to_vec(body) {
        Ok(payload) => {
            if let Err(err) = app_state
                .mqtt
                .publish(topic, QoS::AtLeastOnce, retain, payload)
                .await
            {
                warn!("publish to {topic} failed: {err}");
            }
        }
        Err(err) => warn!("serialization for {topic} failed: {err}"),
    }
}

async fn publish_availability(app_state: &AppState, availability: &str) {
    if let Err(err) = app_state
        .mqtt
        .publish(
            TOPIC_CONTROLLER_AVAILABILITY,
            QoS::AtLeastOnce,
            true,
            availability,
        )
        .await
    {
        warn!("availability publish failed: {err}");
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let now_ms = monotonic_ms();

    match topic.as_str() {
        TOPIC_CMD_MANUAL => {
            let command = serde_json::from_str::<ManualCommand>(&message)
                .context("invalid manual command")?;
            {
                let mut controller = app_state.controller.lock().await;
                controller.set_manual_setpoint(
                    command.intensity,
                    command.target_temperature,
                    now_ms,
                );
            }
            info!(
                intensity = command.intensity,
                target = ?command.target_temperature,
                "manual setpoint updated"
            );
            persist_runtime_from_state(app_state).await?;
        }
        TOPIC_CMD_PROFILE => {
            let profile = serde_json::from_str::<Option<Profile>>(&message)
                .context("invalid profile document")?;
            let name = profile.as_ref().map(|profile| profile.name.clone());
            app_state.controller.lock().await.set_profile(profile);
            match name {
                Some(name) => info!(profile = %name, "profile selected"),
                None => info!("profile cleared, manual mode"),
            }
        }
        TOPIC_CMD_START => {
            {
                let mut device = app_state.device.lock().await;
                restart_oven(&mut **device, &app_state.temperature)
                    .context("failed to start oven")?;
            }
            app_state.controller.lock().await.start(now_ms);
            info!("run started");
        }
        TOPIC_CMD_STOP => {
            app_state.controller.lock().await.stop(now_ms);
            {
                let mut device = app_state.device.lock().await;
                halt_oven(&mut **device, &app_state.temperature)
                    .context("failed to stop oven")?;
            }
            info!("run stopped");
        }
        _ => {}
    }

    Ok(())
}

/// Starts the oven and seeds the cell with a fresh reading.
fn restart_oven(
    device: &mut dyn Device,
    temperature: &TemperatureCell,
) -> Result<(), DeviceError> {
    device.start()?;
    temperature.store(device.temperature()?);
    Ok(())
}

/// Zeroes and stops the oven. The last reading is dropped since a stopped
/// oven no longer holds that temperature.
fn halt_oven(
    device: &mut dyn Device,
    temperature: &TemperatureCell,
) -> Result<(), DeviceError> {
    temperature.clear();
    if device.is_started() {
        device.set_pulse(0.0)?;
        device.stop()?;
    }
    Ok(())
}

async fn shutdown_device(app_state: &AppState) {
    let mut device = app_state.device.lock().await;
    if device.is_started() {
        if let Err(err) = device.set_pulse(0.0) {
            warn!("failed to zero oven output: {err}");
        }
        if let Err(err) = device.stop() {
            warn!("failed to stop oven: {err}");
        }
    }
    if let Err(err) = device.disconnect() {
        warn!("failed to disconnect oven: {err}");
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("REFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.reflow"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let manual = state.controller.lock().await.manual_setpoint().clone();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.manual = manual;
    state.store.save_runtime_config(&runtime).await
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
