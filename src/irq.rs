//! Interrupt lines
//!
//! A line is a boolean wire from one driver to one numbered input of a sink
//! (an INTC input, the CPU IRQ pin). Level changes are delivered
//! synchronously: by the time `set` returns every downstream sink has
//! recomputed its own state.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

/// The receiving side of an interrupt line.
pub trait IrqHandler {
    /// Called with the new level of input `n`.
    fn set_irq(&self, n: usize, level: bool);
}

enum Sink {
    Detached,
    Input { handler: Rc<dyn IrqHandler>, n: usize },
    Fanout(Vec<IrqLine>),
}

struct Wire {
    sink: Sink,
    level: Cell<bool>,
}

/// Handle to an interrupt line.
///
/// Clones refer to the same wire and share its level.
#[derive(Clone)]
pub struct IrqLine {
    wire: Rc<Wire>,
}

impl IrqLine {
    fn with_sink(sink: Sink) -> Self {
        IrqLine {
            wire: Rc::new(Wire {
                sink,
                level: Cell::new(false),
            }),
        }
    }

    /// Line feeding input `n` of `handler`.
    pub fn new(handler: Rc<dyn IrqHandler>, n: usize) -> Self {
        Self::with_sink(Sink::Input { handler, n })
    }

    /// Line that is not wired to anything. Only its level is tracked.
    pub fn detached() -> Self {
        Self::with_sink(Sink::Detached)
    }

    /// One source, many sinks.
    pub fn fanout(lines: Vec<IrqLine>) -> Self {
        Self::with_sink(Sink::Fanout(lines))
    }

    /// Last level driven onto the line.
    pub fn level(&self) -> bool {
        self.wire.level.get()
    }

    pub fn set(&self, level: bool) {
        let previous = self.wire.level.replace(level);
        if previous != level {
            trace!(level, "irq line transition");
        }
        match &self.wire.sink {
            Sink::Detached => {}
            Sink::Input { handler, n } => handler.set_irq(*n, level),
            Sink::Fanout(lines) => {
                for line in lines {
                    line.set(level);
                }
            }
        }
    }

    pub fn raise(&self) {
        self.set(true);
    }

    pub fn lower(&self) {
        self.set(false);
    }

    /// Raise then lower, for edge style sources.
    pub fn pulse(&self) {
        self.set(true);
        self.set(false);
    }
}

impl fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match &self.wire.sink {
            Sink::Detached => "detached".to_string(),
            Sink::Input { n, .. } => format!("input {n}"),
            Sink::Fanout(lines) => format!("fanout x{}", lines.len()),
        };
        f.debug_struct("IrqLine")
            .field("level", &self.level())
            .field("sink", &sink)
            .finish()
    }
}
