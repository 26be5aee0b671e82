//! Test node builders

use super::{Event, EventLog};
use std::time::Duration;
use streamflow_rs::{datum, NodeContext, NodeMode, NodeRef, Result, StreamNode};

/// Producer state: (emitted so far, limit).
type Counter = (u64, u64);

fn count_step(ctx: &mut NodeContext<'_>) -> Result<()> {
    let next = match ctx.payload_mut::<Counter>()? {
        Some((emitted, limit)) if *emitted < *limit => {
            *emitted += 1;
            Some(*emitted)
        }
        _ => None,
    };
    match next {
        Some(value) => ctx.emit_then(datum(value), count_step),
        None => ctx.close(),
    }
}

/// Producer emitting `1..=limit`, one value per continuation, then closing.
pub fn counting_producer(name: &str, limit: u64) -> NodeRef {
    StreamNode::builder(name, NodeMode::Producer)
        .payload::<Counter>((0, limit))
        .on_start(count_step)
        .build()
}

/// Producer that starts and never emits or closes on its own.
pub fn idle_producer(name: &str) -> NodeRef {
    StreamNode::builder(name, NodeMode::Producer).build()
}

/// Builder for consumers that record everything they see.
pub struct RecorderBuilder {
    name: String,
    mode: NodeMode,
    log: EventLog,
    close_delay: Option<Duration>,
    panic_on: Option<u64>,
}

impl RecorderBuilder {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            mode: NodeMode::Consumer,
            log: log.clone(),
            close_delay: None,
            panic_on: None,
        }
    }

    /// Sleep inside the close callback before recording the close.
    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    /// Panic when this value arrives.
    pub fn panic_on(mut self, value: u64) -> Self {
        self.panic_on = Some(value);
        self
    }

    pub fn build(self) -> NodeRef {
        let start_log = self.log.clone();
        let close_log = self.log;
        let panic_on = self.panic_on;
        let close_delay = self.close_delay;

        StreamNode::builder(self.name, self.mode)
            .on_start(move |ctx| {
                let value = ctx.data_as::<u64>().copied().unwrap_or_default();
                if panic_on == Some(value) {
                    panic!("recorder asked to panic on {}", value);
                }
                start_log.push(Event::Value {
                    node: ctx.node().name().to_string(),
                    value,
                    worker: ctx.worker(),
                });
                Ok(())
            })
            .on_close(move |ctx| {
                if let Some(delay) = close_delay {
                    std::thread::sleep(delay);
                }
                close_log.push(Event::Close {
                    node: ctx.node().name().to_string(),
                    worker: ctx.worker(),
                });
                Ok(())
            })
            .build()
    }
}

/// Transform applying `f` to each u64 and forwarding the result.
pub fn map_transform(name: &str, log: &EventLog, f: fn(u64) -> u64) -> NodeRef {
    let start_log = log.clone();
    let close_log = log.clone();
    StreamNode::builder(name, NodeMode::Transform)
        .on_start(move |ctx| {
            let value = ctx.data_as::<u64>().copied().unwrap_or_default();
            start_log.push(Event::Value {
                node: ctx.node().name().to_string(),
                value,
                worker: ctx.worker(),
            });
            ctx.emit(datum(f(value)))
        })
        .on_close(move |ctx| {
            close_log.push(Event::Close {
                node: ctx.node().name().to_string(),
                worker: ctx.worker(),
            });
            Ok(())
        })
        .build()
}
