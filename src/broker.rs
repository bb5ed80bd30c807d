//! MQTT side of the bridge.
//!
//! [`BrokerConnection`] is the connect/disconnect/reconnect state machine. It is plain data
//! driven by [`BrokerEvent`]s and explicit instants, so the main loop owns all timing.
//! [`MqttBroker`] wires it to a `rumqttc` client whose network loop runs on a background
//! thread and reports back over a channel.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Delay between a lost connection and the next connect attempt.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Request channel capacity of the MQTT client.
const REQUEST_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Not connected to the broker")]
    NotConnected,
    #[error("Broker client error: {0}")]
    Client(String),
}

/// Anything tag values can be published to.
pub trait Publisher {
    fn is_connected(&self) -> bool;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError>;

    /// Remove the retained message on `topic`.
    fn clear(&mut self, topic: &str) -> Result<(), PublishError> {
        self.publish(topic, "", true)
    }
}

/// A broker session the main loop keeps alive.
pub trait BrokerSession: Publisher {
    /// Start connecting. The result is picked up by [`BrokerSession::maintain`].
    fn connect(&mut self, now: Instant);

    /// Process connection events and reconnect when one is due.
    fn maintain(&mut self, now: Instant);

    /// Disconnect for good.
    fn disconnect(&mut self);
}

/// Connection status reported by the network thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How a transition into the disconnected state was classified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disconnect {
    /// A connect attempt failed or did not complete.
    ConnectTimeout { elapsed: Duration },
    /// An established connection dropped.
    Unsolicited,
    /// Requested by us during shutdown. No reconnect follows.
    Shutdown,
    /// Already disconnected, nothing changed.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct BrokerConnection {
    connected: bool,
    connect_in_progress: bool,
    connect_attempt: Option<Instant>,
    next_reconnect: Option<Instant>,
    shutting_down: bool,
}

impl BrokerConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else if self.connect_in_progress {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn next_reconnect(&self) -> Option<Instant> {
        self.next_reconnect
    }

    pub fn connect_attempt(&self) -> Option<Instant> {
        self.connect_attempt
    }

    /// A connect request has been issued.
    pub fn begin_connect(&mut self, now: Instant) {
        self.connect_attempt = Some(now);
        self.connect_in_progress = true;
        self.next_reconnect = None;
    }

    pub fn on_connected(&mut self, now: Instant) {
        let elapsed = self
            .connect_attempt
            .map(|attempt| now.saturating_duration_since(attempt))
            .unwrap_or_default();
        info!(elapsed_s = elapsed.as_secs_f64(), "connected to broker");
        self.connected = true;
        self.connect_in_progress = false;
        self.next_reconnect = None;
    }

    pub fn on_disconnected(&mut self, now: Instant, reason: &str) -> Disconnect {
        let kind = if self.shutting_down {
            Disconnect::Shutdown
        } else if self.connect_in_progress {
            let elapsed = self
                .connect_attempt
                .map(|attempt| now.saturating_duration_since(attempt))
                .unwrap_or_default();
            warn!(elapsed_s = elapsed.as_secs(), "broker connect timeout: {reason}");
            Disconnect::ConnectTimeout { elapsed }
        } else if self.connected {
            warn!("unexpected disconnect from broker: {reason}");
            Disconnect::Unsolicited
        } else {
            debug!("disconnect while already disconnected: {reason}");
            Disconnect::Ignored
        };

        self.connected = false;
        self.connect_in_progress = false;
        if matches!(
            kind,
            Disconnect::ConnectTimeout { .. } | Disconnect::Unsolicited
        ) {
            let at = now + RECONNECT_INTERVAL;
            info!(in_s = RECONNECT_INTERVAL.as_secs(), "broker reconnect scheduled");
            self.next_reconnect = Some(at);
        }
        kind
    }

    pub fn apply(&mut self, now: Instant, event: &BrokerEvent) -> Option<Disconnect> {
        match event {
            BrokerEvent::Connected => {
                self.on_connected(now);
                None
            }
            BrokerEvent::Disconnected { reason } => Some(self.on_disconnected(now, reason)),
        }
    }

    /// Whether a scheduled reconnect has come due.
    pub fn reconnect_due(&self, now: Instant) -> bool {
        !self.shutting_down && self.next_reconnect.is_some_and(|at| now >= at)
    }

    /// Any disconnect from here on is intentional.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
        self.next_reconnect = None;
    }
}

/// Broker endpoint and session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keepalive: Duration,
}

/// Broker session backed by `rumqttc`.
pub struct MqttBroker {
    settings: MqttSettings,
    connection: BrokerConnection,
    client: Option<Client>,
    events: Option<Receiver<BrokerEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl MqttBroker {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            connection: BrokerConnection::new(),
            client: None,
            events: None,
            worker: None,
        }
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.connection
    }

    /// Issue a connect request on a fresh client and network thread.
    fn start(&mut self, now: Instant) {
        self.stop_worker();

        let mut options = MqttOptions::new(
            &self.settings.client_id,
            &self.settings.host,
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keepalive);
        options.set_clean_session(true);

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            "connecting to broker"
        );
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    let event = match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                BrokerEvent::Connected
                            } else {
                                BrokerEvent::Disconnected {
                                    reason: format!("connection refused: {:?}", ack.code),
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => BrokerEvent::Disconnected {
                            reason: "broker sent disconnect".to_string(),
                        },
                        Ok(_) => continue,
                        Err(e) => BrokerEvent::Disconnected {
                            reason: e.to_string(),
                        },
                    };
                    let stop = !matches!(event, BrokerEvent::Connected);
                    if tx.send(event).is_err() || stop {
                        break;
                    }
                }
            });

        match worker {
            Ok(worker) => {
                self.connection.begin_connect(now);
                self.client = Some(client);
                self.events = Some(rx);
                self.worker = Some(worker);
            }
            Err(e) => {
                error!("unable to start broker thread: {e}");
                self.connection.begin_connect(now);
                self.connection.on_disconnected(now, "broker thread failed to start");
            }
        }
    }

    /// Drain connection events posted by the network thread.
    pub fn poll_events(&mut self, now: Instant) {
        let Some(events) = &self.events else {
            return;
        };
        let mut pending = Vec::new();
        let mut closed = false;
        loop {
            match events.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        for event in &pending {
            self.connection.apply(now, event);
        }
        if closed {
            self.events = None;
            // The thread ended without reporting why.
            if self.connection.state() != ConnectionState::Disconnected {
                self.connection.on_disconnected(now, "network thread exited");
            }
        }
    }

    fn stop_worker(&mut self) {
        // Dropping the client closes the request channel, which ends the old network loop.
        self.client = None;
        self.events = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("broker thread panicked");
            }
        }
    }
}

impl BrokerSession for MqttBroker {
    fn connect(&mut self, now: Instant) {
        self.start(now);
    }

    fn maintain(&mut self, now: Instant) {
        self.poll_events(now);
        if self.connection.reconnect_due(now) {
            self.start(now);
        }
    }

    /// Orderly shutdown: send the disconnect and wait for queued publishes to go out.
    fn disconnect(&mut self) {
        self.connection.begin_shutdown();
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect() {
                debug!("broker disconnect: {e}");
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("broker thread panicked");
            }
        }
        self.events = None;
        info!("disconnected from broker");
    }
}

impl Publisher for MqttBroker {
    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        if !self.connection.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(PublishError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Client(e.to_string()))
    }
}
