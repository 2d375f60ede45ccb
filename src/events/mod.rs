//! Run progress events and their fan-out.
//!
//! | Module  | Responsibility                                        |
//! |---------|-------------------------------------------------------|
//! | `types` | `AgentEvent`, `EventKind`, payload constructors       |
//! | `bus`   | `EventBus` / `Subscription` (drop-oldest fan-out)     |
//! | `sink`  | JSONL + tracing log sink subscribed to every run      |

pub mod bus;
pub mod sink;
pub mod types;

pub use bus::{DEFAULT_CAPACITY, EventBus, Subscription};
pub use sink::spawn_log_sink;
pub use types::{AgentEvent, EventKind, truncate_chars};

/// Run-scoped publisher handed to node executors.
#[derive(Clone)]
pub struct RunEvents {
    bus: EventBus,
    run_id: String,
}

impl RunEvents {
    pub fn new(bus: EventBus, run_id: &str) -> Self {
        Self {
            bus,
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: AgentEvent) {
        debug_assert_eq!(event.run_id, self.run_id);
        tracing::trace!(run_id = %self.run_id, kind = %event.kind, iteration = event.iteration, "emit");
        self.bus.publish(event);
    }
}
