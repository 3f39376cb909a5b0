//! Bridge runner - main loop over an NDJSON line stream
//!
//! Reads the input line by line and dispatches:
//! - responses complete pending GPIO service requests right away
//! - commands are queued and run one at a time, each answered by a reply line
//! - bus events are queued and routed one at a time, in arrival order
//!
//! Commands and events wait for the orchestrator startup, which itself
//! needs responses from the input, so the reader never blocks on them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use sensorhub_app::params::ParamReader;
use sensorhub_app::{HandlerContext, Orchestrator, Settings};
use sensorhub_core::prelude::*;
use sensorhub_core::{BusEvent, Params, SensorEvent};
use sensorhub_io::{BusGpioClient, CommandSender, DeviceStore, MemoryDeviceStore, RequestTracker};

use super::{BridgeCommand, InboundMessage, OutboundMessage};

/// Capacity of the outbound line channel
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Shortest period of the stale request sweep
const MIN_CLEANUP_PERIOD: Duration = Duration::from_millis(100);

/// Run the bridge on stdin/stdout with collaborators built from settings
pub async fn run(settings: Settings) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("sensorhub bridge starting");
    info!("═══════════════════════════════════════════════════════");

    let store: Arc<dyn DeviceStore> = if settings.store.persist {
        info!("Devices file: {}", settings.store.path.display());
        Arc::new(MemoryDeviceStore::open(settings.store.path.clone())?)
    } else {
        Arc::new(MemoryDeviceStore::new())
    };

    let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let tracker = Arc::new(RequestTracker::new());
    let gpio = BusGpioClient::new(
        CommandSender::new(line_tx.clone(), tracker.clone()),
        settings.bus.request_timeout(),
    );

    let ctx = HandlerContext::new(Arc::new(gpio), store, Arc::new(settings));
    let orchestrator = Arc::new(Orchestrator::with_default_handlers(ctx)?);

    Bridge::new(orchestrator, tracker, line_tx, line_rx)
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    info!("sensorhub bridge exiting");
    Ok(())
}

/// The orchestrator wired to a line stream
pub struct Bridge {
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<RequestTracker>,
    line_tx: mpsc::Sender<String>,
    line_rx: mpsc::Receiver<String>,
    request_timeout: Duration,
}

impl Bridge {
    /// `line_tx`/`line_rx` is the outbound channel the GPIO client writes
    /// its requests to
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        tracker: Arc<RequestTracker>,
        line_tx: mpsc::Sender<String>,
        line_rx: mpsc::Receiver<String>,
    ) -> Self {
        let request_timeout = orchestrator.context().settings().bus.request_timeout();
        Self {
            orchestrator,
            tracker,
            line_tx,
            line_rx,
            request_timeout,
        }
    }

    /// Process `input` until EOF, then stop every poller
    pub async fn run<R, W>(self, input: R, output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Bridge {
            orchestrator,
            tracker,
            line_tx,
            line_rx,
            request_timeout,
        } = self;

        let (writer_stop_tx, writer_stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_lines(line_rx, output, writer_stop_rx));

        let (forward_stop_tx, forward_stop_rx) = watch::channel(false);
        let forwarder = tokio::spawn(forward_sensor_events(
            orchestrator.subscribe(),
            line_tx.clone(),
            forward_stop_rx,
        ));

        let (started_tx, started_rx) = watch::channel(false);
        let startup = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.start().await;
                let _ = started_tx.send(true);
            })
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_events(
            orchestrator.clone(),
            event_rx,
            started_rx.clone(),
        ));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut commands = tokio::spawn(run_commands(
            orchestrator.clone(),
            command_rx,
            line_tx.clone(),
            started_rx.clone(),
        ));

        let mut lines = input.lines();
        let mut cleanup = tokio::time::interval(request_timeout.max(MIN_CLEANUP_PERIOD));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            info!("Input closed");
                            break;
                        }
                        Err(e) => {
                            error!("Failed to read input: {}", e);
                            break;
                        }
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match InboundMessage::parse(trimmed) {
                        Ok(InboundMessage::Response(response)) => {
                            if !tracker.handle_response(response).await {
                                debug!("Response to unknown request dropped");
                            }
                        }
                        Ok(InboundMessage::Command(command)) => {
                            let _ = command_tx.send(command);
                        }
                        Ok(InboundMessage::Event(event)) => {
                            let _ = event_tx.send(event);
                        }
                        Err(e) => warn!("Malformed input line skipped: {}", e),
                    }
                }
                _ = cleanup.tick() => {
                    let stale = tracker.cleanup_stale(request_timeout * 2).await;
                    if !stale.is_empty() {
                        warn!("Dropped {} stale requests", stale.len());
                    }
                }
            }
        }

        // No more responses can arrive: let in-flight work fail fast
        tracker.cancel_all().await;

        drop(event_tx);
        let _ = router.await;

        drop(command_tx);
        match tokio::time::timeout(request_timeout, &mut commands).await {
            Ok(Err(e)) => error!("Command worker failed: {}", e),
            Ok(Ok(())) => {}
            Err(_) => {
                warn!("Pending commands abandoned");
                commands.abort();
            }
        }

        startup.abort();
        orchestrator.shutdown();

        let _ = forward_stop_tx.send(true);
        let _ = forwarder.await;
        let _ = writer_stop_tx.send(());
        match writer.await {
            Ok(result) => result,
            Err(e) => {
                error!("Writer task failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Write outbound lines until stopped, then flush what is queued
async fn write_lines<W>(
    mut line_rx: mpsc::Receiver<String>,
    mut output: W,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => write_line(&mut output, &line).await?,
                None => break,
            },
            _ = &mut stop_rx => {
                while let Ok(line) = line_rx.try_recv() {
                    write_line(&mut output, &line).await?;
                }
                break;
            }
        }
    }
    output.shutdown().await?;
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

async fn send_line(line_tx: &mpsc::Sender<String>, message: OutboundMessage) {
    if let Some(line) = message.to_line() {
        if line_tx.send(line).await.is_err() {
            error!("Output closed, message dropped");
        }
    }
}

/// Turn published sensor events into outbound lines
async fn forward_sensor_events(
    mut events: broadcast::Receiver<SensorEvent>,
    line_tx: mpsc::Sender<String>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => send_line(&line_tx, OutboundMessage::event(&event)).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{} sensor events lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop_rx.changed() => {
                while let Ok(event) = events.try_recv() {
                    send_line(&line_tx, OutboundMessage::event(&event)).await;
                }
                break;
            }
        }
    }
}

async fn wait_started(started_rx: &mut watch::Receiver<bool>) {
    if started_rx.wait_for(|started| *started).await.is_err() {
        warn!("Orchestrator startup did not complete");
    }
}

/// Route bus events in arrival order
async fn route_events(
    orchestrator: Arc<Orchestrator>,
    mut event_rx: mpsc::UnboundedReceiver<BusEvent>,
    mut started_rx: watch::Receiver<bool>,
) {
    wait_started(&mut started_rx).await;
    while let Some(event) = event_rx.recv().await {
        debug!("Event {}", event.name);
        orchestrator.handle_event(&event).await;
    }
}

/// Run commands in arrival order, replying to each
async fn run_commands(
    orchestrator: Arc<Orchestrator>,
    mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    line_tx: mpsc::Sender<String>,
    mut started_rx: watch::Receiver<bool>,
) {
    wait_started(&mut started_rx).await;
    while let Some(command) = command_rx.recv().await {
        debug!("Command {} ({})", command.command, command.id);

        let result = dispatch(&orchestrator, &command.command, command.params).await;
        if let Err(e) = &result {
            debug!("Command {} failed: {}", command.command, e);
        }
        send_line(&line_tx, OutboundMessage::reply(command.id, result)).await;
    }
}

/// Remove a string parameter consumed by the bridge itself
fn take_str(params: &mut Params, field: &str) -> Result<String> {
    let value = ParamReader::new(params).str(field)?.to_string();
    params.remove(field);
    Ok(value)
}

async fn dispatch(orchestrator: &Orchestrator, command: &str, mut params: Params) -> Result<Value> {
    match command {
        "add_sensor" => {
            let kind = take_str(&mut params, "type")?;
            let subtype = take_str(&mut params, "subtype")?;
            let devices = orchestrator.add_sensor(&kind, &subtype, &params).await?;
            Ok(serde_json::to_value(devices)?)
        }
        "update_sensor" => {
            let id = take_str(&mut params, "uuid")?;
            let devices = orchestrator.update_sensor(&id, &params).await?;
            Ok(serde_json::to_value(devices)?)
        }
        "delete_sensor" => {
            let id = take_str(&mut params, "uuid")?;
            Ok(json!(orchestrator.delete_sensor(&id).await?))
        }
        "get_module_config" => Ok(orchestrator.module_config()),
        "get_devices" => Ok(serde_json::to_value(orchestrator.devices().await?)?),
        name => orchestrator.call_method(name, &params).await,
    }
}
