//! Tags are the polled data points of the bridge.
//!
//! A tag names one controller register, says how to scale and render its value, and keeps its
//! own noread bookkeeping. Consecutive failed reads are counted; once the count exceeds the
//! tag's `noread_ignore` threshold the configured [`NoreadAction`] kicks in.

use crate::format::ValueFormat;

/// What to do once a tag has failed more reads in a row than it may ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoreadAction {
    /// Clear the retained message on the tag's topic.
    Clear,
    /// Publish the tag's noread value instead of a reading.
    PublishValue,
    /// Leave the topic alone.
    #[default]
    Ignore,
}

impl From<i32> for NoreadAction {
    /// `0` clears, `1` publishes the substitute value, anything else does nothing.
    fn from(value: i32) -> Self {
        match value {
            0 => NoreadAction::Clear,
            1 => NoreadAction::PublishValue,
            _ => NoreadAction::Ignore,
        }
    }
}

/// Where a tag stands with respect to its noread threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// The last read succeeded.
    Fresh,
    /// Failing, but within the number of failures the tag tolerates.
    Degraded,
    /// Failing for longer than the tag tolerates.
    Noread,
}

/// Outcome of the publish decision for one read attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishAction {
    None,
    Publish { payload: String, retain: bool },
    /// Zero-length retained publish, removing the broker's last value.
    Clear,
}

/// One polled controller register.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub device_id: u8,
    /// Single-byte RAM address, or a packed LSB/MSB pair above 255.
    pub address: u16,
    pub update_cycle: u32,
    /// Accepted and stored. Reads are always issued one register at a time.
    pub group: u32,
    /// Empty means the tag is read but never published.
    pub topic: String,
    pub format: ValueFormat,
    pub retain: bool,
    pub multiplier: f64,
    pub offset: f64,
    pub noread_value: f64,
    pub noread_action: NoreadAction,
    pub noread_ignore: u32,
    raw_value: f64,
    noread_count: u32,
}

impl Tag {
    /// Create a tag with unit scaling, the default format and no noread action.
    pub fn new(device_id: u8, address: u16) -> Self {
        Self {
            device_id,
            address,
            update_cycle: 0,
            group: 0,
            topic: String::new(),
            format: ValueFormat::default(),
            retain: false,
            multiplier: 1.0,
            offset: 0.0,
            noread_value: 0.0,
            noread_action: NoreadAction::default(),
            noread_ignore: 0,
            raw_value: 0.0,
            noread_count: 0,
        }
    }

    /// Record a successful read. Returns `true` if this ends a noread streak.
    pub fn set_raw_value(&mut self, value: f64) -> bool {
        let recovered = self.is_noread();
        self.raw_value = value;
        self.noread_count = 0;
        recovered
    }

    /// Record a failed read. Returns `true` if this failure crossed the ignore threshold.
    pub fn noread_notify(&mut self) -> bool {
        let was_exceeded = self.ignore_exceeded();
        self.noread_count = self.noread_count.saturating_add(1);
        !was_exceeded && self.ignore_exceeded()
    }

    pub fn raw_value(&self) -> f64 {
        self.raw_value
    }

    /// `raw * multiplier + offset`, computed on every call.
    pub fn scaled_value(&self) -> f64 {
        self.raw_value * self.multiplier + self.offset
    }

    pub fn noread_count(&self) -> u32 {
        self.noread_count
    }

    pub fn is_noread(&self) -> bool {
        self.noread_count > 0
    }

    pub fn ignore_exceeded(&self) -> bool {
        self.noread_count > self.noread_ignore
    }

    pub fn state(&self) -> TagState {
        if !self.is_noread() {
            TagState::Fresh
        } else if self.ignore_exceeded() {
            TagState::Noread
        } else {
            TagState::Degraded
        }
    }

    pub fn has_topic(&self) -> bool {
        !self.topic.is_empty()
    }

    /// The payload for the current reading.
    pub fn payload(&self) -> String {
        self.format.render(self.scaled_value())
    }

    /// The payload substituted for a reading while in noread.
    pub fn noread_payload(&self) -> String {
        self.format.render(self.noread_value)
    }

    /// Decide what to publish after a read attempt.
    pub fn publish_action(&self, read_ok: bool) -> PublishAction {
        if !self.has_topic() {
            return PublishAction::None;
        }
        if read_ok {
            return PublishAction::Publish {
                payload: self.payload(),
                retain: self.retain,
            };
        }
        if !self.ignore_exceeded() {
            return PublishAction::None;
        }
        match self.noread_action {
            NoreadAction::Clear => PublishAction::Clear,
            NoreadAction::PublishValue => PublishAction::Publish {
                payload: self.noread_payload(),
                retain: self.retain,
            },
            NoreadAction::Ignore => PublishAction::None,
        }
    }
}
