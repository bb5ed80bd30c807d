//! Test doubles for the broker and the register reader.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::{
    broker::{BrokerSession, PublishError, Publisher},
    scheduler::TagReader,
};

/// One message seen by the [`RecordingPublisher`]. Clears show up as empty retained payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Published {
    pub fn new(topic: &str, payload: &str, retain: bool) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        }
    }
}

/// Records everything published to it.
pub struct RecordingPublisher {
    pub connected: bool,
    pub messages: Vec<Published>,
    /// Fail every publish with a client error.
    pub reject: bool,
    /// Whether a connect request succeeds.
    pub accept_connect: bool,
    pub connects: Vec<Instant>,
    pub maintained: usize,
    pub shut_down: bool,
}

impl RecordingPublisher {
    pub fn connected() -> Self {
        Self {
            connected: true,
            messages: Vec::new(),
            reject: false,
            accept_connect: true,
            connects: Vec::new(),
            maintained: 0,
            shut_down: false,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::connected()
        }
    }
}

impl Publisher for RecordingPublisher {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        if self.reject {
            return Err(PublishError::Client("rejected".to_string()));
        }
        self.messages.push(Published::new(topic, payload, retain));
        Ok(())
    }
}

impl BrokerSession for RecordingPublisher {
    fn connect(&mut self, now: Instant) {
        self.connects.push(now);
        self.connected = self.accept_connect;
    }

    fn maintain(&mut self, _now: Instant) {
        self.maintained += 1;
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.shut_down = true;
    }
}

/// Answers reads from a per-address script. Unscripted reads fail.
#[derive(Default)]
pub struct ScriptedReader {
    script: HashMap<(u8, u16), VecDeque<Option<f64>>>,
    pub reads: Vec<(u8, u16)>,
    pub released: bool,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful read.
    pub fn value(mut self, device_id: u8, address: u16, value: f64) -> Self {
        self.push(device_id, address, Some(value));
        self
    }

    /// Queue a failed read.
    pub fn failure(mut self, device_id: u8, address: u16) -> Self {
        self.push(device_id, address, None);
        self
    }

    pub fn push(&mut self, device_id: u8, address: u16, result: Option<f64>) {
        self.script
            .entry((device_id, address))
            .or_default()
            .push_back(result);
    }
}

impl TagReader for ScriptedReader {
    type Error = String;

    fn read_tag(&mut self, device_id: u8, address: u16) -> Result<f64, String> {
        self.reads.push((device_id, address));
        self.script
            .get_mut(&(device_id, address))
            .and_then(VecDeque::pop_front)
            .flatten()
            .ok_or_else(|| "no response".to_string())
    }

    fn release(&mut self) {
        self.released = true;
    }
}
