//! The scheduler decides which tags to read on each tick and what to publish.
//!
//! It owns every tag and update cycle for the life of the process. Read failures never leave
//! this module: they are absorbed into the tag's noread state.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::{
    broker::{PublishError, Publisher},
    cycle::UpdateCycle,
    error::Error,
    tag::{PublishAction, Tag},
    transport::{Connector, PlTransport, PortError},
};

/// Source of raw tag values.
pub trait TagReader {
    type Error: core::fmt::Display;

    fn read_tag(&mut self, device_id: u8, address: u16) -> Result<f64, Self::Error>;

    /// Give up any device handle held between reads.
    fn release(&mut self) {}
}

impl<C: Connector> TagReader for PlTransport<C> {
    type Error = Error<PortError<C>>;

    fn read_tag(&mut self, device_id: u8, address: u16) -> Result<f64, Self::Error> {
        self.read_value(device_id, address)
    }

    fn release(&mut self) {
        self.close();
    }
}

pub struct Scheduler {
    tags: Vec<Tag>,
    cycles: Vec<UpdateCycle>,
    /// Pause between two register transactions, for controller turnaround.
    transaction_delay: Duration,
}

impl Scheduler {
    /// Assign each tag to the cycle with a matching id, keeping the given orders.
    pub fn new(mut cycles: Vec<UpdateCycle>, tags: Vec<Tag>, transaction_delay: Duration) -> Self {
        for (index, tag) in tags.iter().enumerate() {
            match cycles.iter_mut().find(|cycle| cycle.id == tag.update_cycle) {
                Some(cycle) => cycle.assign(index),
                None => warn!(
                    device_id = tag.device_id,
                    address = tag.address,
                    update_cycle = tag.update_cycle,
                    "tag has no matching update cycle and will never be polled"
                ),
            }
        }
        for cycle in &cycles {
            debug!(
                cycle = cycle.id,
                interval_s = cycle.interval.as_secs_f64(),
                tags = cycle.tags().len(),
                "update cycle"
            );
        }
        Self {
            tags,
            cycles,
            transaction_delay,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn cycles(&self) -> &[UpdateCycle] {
        &self.cycles
    }

    /// Tags that belong to some cycle, in cycle order.
    pub fn scheduled_tags(&self) -> impl Iterator<Item = &Tag> {
        self.cycles
            .iter()
            .flat_map(move |cycle| cycle.tags().iter().map(move |&index| &self.tags[index]))
    }

    /// Run every due cycle. Returns `true` if at least one cycle fired.
    pub fn tick<R, P>(&mut self, now: Instant, reader: &mut R, publisher: &mut P) -> bool
    where
        R: TagReader,
        P: Publisher,
    {
        let mut fired = false;
        let mut first_read = true;
        for cycle in &mut self.cycles {
            if cycle.tags().is_empty() || !cycle.fire(now) {
                continue;
            }
            fired = true;
            trace!(cycle = cycle.id, "update cycle due");

            for &index in cycle.tags() {
                if !first_read && !self.transaction_delay.is_zero() {
                    std::thread::sleep(self.transaction_delay);
                }
                first_read = false;
                read_tag(&mut self.tags[index], reader, publisher);
            }
        }
        fired
    }

    /// Exit handling for published tags: optionally publish each noread value, then
    /// optionally clear each retained message.
    pub fn publish_exit<P: Publisher>(&self, publisher: &mut P, noread: bool, clear: bool) {
        if !noread && !clear {
            return;
        }
        for tag in self.scheduled_tags().filter(|tag| tag.has_topic()) {
            if noread {
                let payload = tag.noread_payload();
                report(publisher.publish(&tag.topic, &payload, tag.retain), tag);
            }
            if clear {
                report(publisher.clear(&tag.topic), tag);
            }
        }
    }
}

/// Read one tag, update its noread state and act on the publish decision.
fn read_tag<R: TagReader, P: Publisher>(tag: &mut Tag, reader: &mut R, publisher: &mut P) {
    let read_ok = match reader.read_tag(tag.device_id, tag.address) {
        Ok(value) => {
            if tag.set_raw_value(value) {
                info!(
                    device_id = tag.device_id,
                    address = tag.address,
                    topic = %tag.topic,
                    "tag read recovered"
                );
            }
            true
        }
        Err(e) => {
            debug!(
                device_id = tag.device_id,
                address = tag.address,
                "tag read failed: {e}"
            );
            if tag.noread_notify() {
                warn!(
                    device_id = tag.device_id,
                    address = tag.address,
                    topic = %tag.topic,
                    noread_count = tag.noread_count(),
                    "tag is in noread"
                );
            }
            false
        }
    };

    let result = match tag.publish_action(read_ok) {
        PublishAction::None => return,
        PublishAction::Publish { payload, retain } => {
            trace!(topic = %tag.topic, payload = %payload, retain, "publish");
            publisher.publish(&tag.topic, &payload, retain)
        }
        PublishAction::Clear => publisher.clear(&tag.topic),
    };
    report(result, tag);
}

/// Publish failures are logged and dropped.
fn report(result: Result<(), PublishError>, tag: &Tag) {
    match result {
        Ok(()) => {}
        Err(PublishError::NotConnected) => trace!(topic = %tag.topic, "not connected, publish skipped"),
        Err(e) => warn!(topic = %tag.topic, "publish failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ValueFormat;
    use crate::mock_broker::{Published, RecordingPublisher, ScriptedReader};
    use crate::mock_serial::{MockConnector, MockSerial};
    use crate::tag::NoreadAction;

    fn tag(address: u16, cycle: u32, topic: &str) -> Tag {
        let mut tag = Tag::new(1, address);
        tag.update_cycle = cycle;
        tag.topic = topic.to_string();
        tag.format = ValueFormat::parse("%.0f").unwrap();
        tag
    }

    fn cycles(specs: &[(u32, u64)]) -> Vec<UpdateCycle> {
        specs
            .iter()
            .map(|&(id, secs)| UpdateCycle::new(id, Duration::from_secs(secs)))
            .collect()
    }

    #[test]
    fn test_tags_assigned_by_cycle_id() {
        let scheduler = Scheduler::new(
            cycles(&[(1, 10), (2, 60)]),
            vec![tag(50, 2, "a"), tag(51, 1, "b"), tag(52, 2, "c"), tag(53, 9, "d")],
            Duration::ZERO,
        );
        assert_eq!(scheduler.cycles()[0].tags(), [1]);
        assert_eq!(scheduler.cycles()[1].tags(), [0, 2]);
        // The tag of the unknown cycle is kept but never scheduled.
        assert_eq!(scheduler.tags().len(), 4);
        assert_eq!(scheduler.scheduled_tags().count(), 3);
    }

    #[test]
    fn test_reads_in_cycle_then_assignment_order() {
        let mut scheduler = Scheduler::new(
            cycles(&[(2, 10), (1, 10)]),
            vec![tag(50, 1, "a"), tag(51, 2, "b"), tag(52, 1, "c")],
            Duration::ZERO,
        );
        let mut reader = ScriptedReader::new()
            .value(1, 50, 1.0)
            .value(1, 51, 2.0)
            .value(1, 52, 3.0);
        let mut publisher = RecordingPublisher::connected();

        assert!(scheduler.tick(Instant::now(), &mut reader, &mut publisher));
        assert_eq!(reader.reads, [(1, 51), (1, 50), (1, 52)]);
        // Reads and publishes are interleaved per tag.
        let topics: Vec<_> = publisher.messages.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, ["b", "a", "c"]);
    }

    #[test]
    fn test_cycle_not_polled_before_due() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(
            cycles(&[(1, 10), (2, 30)]),
            vec![tag(50, 1, "fast"), tag(51, 2, "slow")],
            Duration::ZERO,
        );
        let mut reader = ScriptedReader::new();
        let mut publisher = RecordingPublisher::connected();

        assert!(scheduler.tick(start, &mut reader, &mut publisher));
        assert_eq!(reader.reads.len(), 2);

        assert!(!scheduler.tick(start + Duration::from_secs(9), &mut reader, &mut publisher));
        assert_eq!(reader.reads.len(), 2);

        assert!(scheduler.tick(start + Duration::from_secs(10), &mut reader, &mut publisher));
        assert_eq!(reader.reads[2], (1, 50));
        assert_eq!(reader.reads.len(), 3);
        assert_eq!(
            scheduler.cycles()[0].next_due(),
            Some(start + Duration::from_secs(20))
        );
    }

    #[test]
    fn test_end_to_end_battery_voltage() {
        let mut voltage = tag(50, 1, "solar/battery/voltage");
        voltage.multiplier = 0.1;
        voltage.retain = true;
        voltage.format = ValueFormat::parse("%.1f").unwrap();
        let mut scheduler = Scheduler::new(cycles(&[(1, 10)]), vec![voltage], Duration::ZERO);

        let mut port = MockSerial::new();
        port.queue_reply(&[200, 245]);
        let mut transport = PlTransport::new(MockConnector::with_ports([port]));
        let mut publisher = RecordingPublisher::connected();

        scheduler.tick(Instant::now(), &mut transport, &mut publisher);
        assert_eq!(
            publisher.messages,
            [Published::new("solar/battery/voltage", "24.5", true)]
        );
        assert_eq!(
            transport.connector().last_written().unwrap(),
            [20, 50, 0, 235]
        );
    }

    #[test]
    fn test_noread_value_published_after_ignore_threshold() {
        let start = Instant::now();
        let mut flaky = tag(50, 1, "solar/battery/voltage");
        flaky.noread_ignore = 2;
        flaky.noread_action = NoreadAction::PublishValue;
        flaky.noread_value = -1.0;
        flaky.format = ValueFormat::parse("%.1f").unwrap();
        let mut scheduler = Scheduler::new(cycles(&[(1, 10)]), vec![flaky], Duration::ZERO);
        let mut reader = ScriptedReader::new();
        let mut publisher = RecordingPublisher::connected();

        for n in 0..2u64 {
            scheduler.tick(start + Duration::from_secs(n * 10), &mut reader, &mut publisher);
            assert!(publisher.messages.is_empty());
        }
        scheduler.tick(start + Duration::from_secs(20), &mut reader, &mut publisher);

        assert_eq!(scheduler.tags()[0].noread_count(), 3);
        assert_eq!(
            publisher.messages,
            [Published::new("solar/battery/voltage", "-1.0", false)]
        );
    }

    #[test]
    fn test_noread_clear_after_threshold() {
        let mut flaky = tag(50, 1, "t");
        flaky.noread_action = NoreadAction::Clear;
        let mut scheduler = Scheduler::new(cycles(&[(1, 10)]), vec![flaky], Duration::ZERO);
        let mut publisher = RecordingPublisher::connected();

        scheduler.tick(Instant::now(), &mut ScriptedReader::new(), &mut publisher);
        assert_eq!(publisher.messages, [Published::new("t", "", true)]);
    }

    #[test]
    fn test_recovery_resets_noread() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(cycles(&[(1, 1)]), vec![tag(50, 1, "t")], Duration::ZERO);
        let mut reader = ScriptedReader::new().failure(1, 50).value(1, 50, 7.0);
        let mut publisher = RecordingPublisher::connected();

        scheduler.tick(start, &mut reader, &mut publisher);
        assert!(scheduler.tags()[0].is_noread());
        scheduler.tick(start + Duration::from_secs(1), &mut reader, &mut publisher);
        assert_eq!(scheduler.tags()[0].noread_count(), 0);
        assert_eq!(publisher.messages, [Published::new("t", "7", false)]);
    }

    #[test]
    fn test_reads_continue_while_disconnected() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(cycles(&[(1, 1)]), vec![tag(50, 1, "t")], Duration::ZERO);
        let mut reader = ScriptedReader::new();
        let mut publisher = RecordingPublisher::disconnected();

        scheduler.tick(start, &mut reader, &mut publisher);
        scheduler.tick(start + Duration::from_secs(1), &mut reader, &mut publisher);
        assert_eq!(reader.reads.len(), 2);
        assert_eq!(scheduler.tags()[0].noread_count(), 2);
        assert!(publisher.messages.is_empty());
    }

    #[test]
    fn test_topicless_tag_is_read_not_published() {
        let mut scheduler = Scheduler::new(cycles(&[(1, 1)]), vec![tag(50, 1, "")], Duration::ZERO);
        let mut reader = ScriptedReader::new().value(1, 50, 3.0);
        let mut publisher = RecordingPublisher::connected();

        scheduler.tick(Instant::now(), &mut reader, &mut publisher);
        assert_eq!(reader.reads.len(), 1);
        assert_eq!(scheduler.tags()[0].raw_value(), 3.0);
        assert!(publisher.messages.is_empty());
    }

    #[test]
    fn test_publish_rejection_does_not_stop_cycle() {
        let mut scheduler = Scheduler::new(
            cycles(&[(1, 1)]),
            vec![tag(50, 1, "a"), tag(51, 1, "b")],
            Duration::ZERO,
        );
        let mut reader = ScriptedReader::new().value(1, 50, 1.0).value(1, 51, 2.0);
        let mut publisher = RecordingPublisher::connected();
        publisher.reject = true;

        scheduler.tick(Instant::now(), &mut reader, &mut publisher);
        assert_eq!(reader.reads.len(), 2);
        assert_eq!(scheduler.tags()[1].raw_value(), 2.0);
    }

    #[test]
    fn test_exit_publishes_noread_then_clears() {
        let mut a = tag(50, 1, "a");
        a.noread_value = -1.0;
        a.retain = true;
        let scheduler = Scheduler::new(
            cycles(&[(1, 1)]),
            vec![a, tag(51, 1, ""), tag(52, 5, "unscheduled")],
            Duration::ZERO,
        );
        let mut publisher = RecordingPublisher::connected();

        scheduler.publish_exit(&mut publisher, true, true);
        assert_eq!(
            publisher.messages,
            [Published::new("a", "-1", true), Published::new("a", "", true)]
        );

        publisher.messages.clear();
        scheduler.publish_exit(&mut publisher, false, false);
        assert!(publisher.messages.is_empty());
    }
}
