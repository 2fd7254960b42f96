//! Binary event log: one MessagePack map per event, self-delimiting.
//!
//! Identical inputs produce byte-identical streams; the replay pipeline
//! feeds a recorded stream back into any sink without needing state beyond
//! what prior events established.

use std::io::{self, Read, Write};

use crate::log::{Event, EventSink};

/// Writes the event stream as consecutive MessagePack records.
pub struct BinaryLog<W: Write> {
    out: W,
}

impl<W: Write> BinaryLog<W> {
    pub fn new(out: W) -> BinaryLog<W> {
        BinaryLog { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for BinaryLog<W> {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        rmp_serde::encode::write_named(&mut self.out, event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Stream a recorded binary log into `sink`. Returns the number of events
/// replayed; a malformed record surfaces as an error naming its index.
pub fn replay<R: Read>(mut input: R, sink: &mut dyn EventSink) -> io::Result<u64> {
    let mut count: u64 = 0;
    loop {
        match rmp_serde::decode::from_read::<_, Event>(&mut input) {
            Ok(event) => {
                sink.emit(&event)?;
                count += 1;
            }
            Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
                if e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                return Ok(count);
            }
            Err(e) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed record {count}: {e}"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{EventKind, Recorder, ThreadRef};
    use crate::time::Time;
    use crate::types::CoreUid;

    fn sample_events() -> Vec<Event> {
        vec![
            Event {
                core: CoreUid(0),
                time: Time::zero(),
                kind: EventKind::ThreadExecute {
                    thread: ThreadRef {
                        module: "0".to_string(),
                        tid: 1,
                    },
                    run_time: Time::ratio(7, 2),
                },
            },
            Event {
                core: CoreUid(0),
                time: Time::ratio(7, 2),
                kind: EventKind::TimerSet {
                    ctx_index: 0,
                    timeout: Some(Time::from_units(4)),
                },
            },
            Event {
                core: CoreUid(0),
                time: Time::ratio(7, 2),
                kind: EventKind::CoreIdle {
                    until: Time::from_units(10),
                },
            },
        ]
    }

    #[test]
    fn round_trips_through_bytes() {
        let events = sample_events();
        let mut log = BinaryLog::new(Vec::new());
        for event in &events {
            log.emit(event).unwrap();
        }
        let bytes = log.into_inner();

        let mut recorder = Recorder::new();
        let replayed = replay(bytes.as_slice(), &mut recorder).unwrap();
        assert_eq!(replayed, events.len() as u64);
        assert_eq!(recorder.events(), events.as_slice());
    }

    #[test]
    fn rewriting_a_replayed_stream_is_identity() {
        let events = sample_events();
        let mut first = BinaryLog::new(Vec::new());
        for event in &events {
            first.emit(event).unwrap();
        }
        let bytes = first.into_inner();

        let mut second = BinaryLog::new(Vec::new());
        replay(bytes.as_slice(), &mut second).unwrap();
        assert_eq!(bytes, second.into_inner());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut log = BinaryLog::new(Vec::new());
        for event in &sample_events() {
            log.emit(event).unwrap();
        }
        let mut bytes = log.into_inner();
        bytes.truncate(bytes.len() - 3);

        let mut recorder = Recorder::new();
        assert!(replay(bytes.as_slice(), &mut recorder).is_err());
    }
}
