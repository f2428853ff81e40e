//! Run observer that prints every delivered event as a JSON line.

use std::io::Write;

use orgscope_core::listener::RunObserver;
use orgscope_types::{MapEvent, RunEvent, UpdateEvent};
use tracing::warn;

/// Writes events to `W`, one JSON document per line.
pub struct JsonLinesObserver<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    /// Observer writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    fn write(&mut self, event: RunEvent) {
        let written = serde_json::to_writer(&mut self.out, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            warn!(update = event.update(), "Failed to write event: {e}");
        }
    }
}

impl<W: Write + Send> RunObserver for JsonLinesObserver<W> {
    fn on_map(&mut self, event: &MapEvent) {
        self.write(RunEvent::Map(event.clone()));
    }

    fn on_update(&mut self, event: &UpdateEvent) {
        self.write(RunEvent::Update(event.clone()));
    }

    fn on_events_dropped(&mut self, total: u64) {
        warn!(dropped_maps = total, "Observer fell behind; maps were dropped");
    }
}
