//! Event variants delivered by the event clock

use std::collections::HashSet;
use std::fmt;

use crate::{ControlId, SurfaceId};

/// Tag identifying which subscription table an event is dispatched through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockEventKind {
    Tick,
    Startup,
    ClientConnect,
    LockState,
    ControlPress,
    VariablesChanged,
    LocalVariablesChanged,
}

impl fmt::Display for ClockEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tick => "tick",
            Self::Startup => "startup",
            Self::ClientConnect => "client_connect",
            Self::LockState => "lock_state",
            Self::ControlPress => "control_press",
            Self::VariablesChanged => "variables_changed",
            Self::LocalVariablesChanged => "local_variables_changed",
        };
        f.write_str(s)
    }
}

/// An event published on the event clock
///
/// The variant set is closed; subscribers register per [`ClockEventKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    /// One heartbeat of the clock
    Tick {
        /// Whole seconds elapsed since the heartbeat started
        tick: u64,
        /// Wall clock time of the heartbeat, in Unix milliseconds
        wall_clock_ms: i64,
    },

    /// The application finished starting up
    Startup,

    /// A client (UI/remote) connected
    ClientConnect,

    /// The host computer was locked or unlocked
    LockState { locked: bool },

    /// A control was pressed or released
    ControlPress {
        control_id: ControlId,
        pressed: bool,
        /// Originating surface, if any
        surface_id: Option<SurfaceId>,
    },

    /// A batch of fully-qualified variable keys changed value
    VariablesChanged {
        keys: HashSet<String>,
        /// Producer of the batch, if known
        origin: Option<String>,
    },

    /// A batch of a single control's local variables changed value
    LocalVariablesChanged {
        names: HashSet<String>,
        control_id: ControlId,
    },
}

impl ClockEvent {
    /// The subscription table this event is dispatched through
    pub fn kind(&self) -> ClockEventKind {
        match self {
            Self::Tick { .. } => ClockEventKind::Tick,
            Self::Startup => ClockEventKind::Startup,
            Self::ClientConnect => ClockEventKind::ClientConnect,
            Self::LockState { .. } => ClockEventKind::LockState,
            Self::ControlPress { .. } => ClockEventKind::ControlPress,
            Self::VariablesChanged { .. } => ClockEventKind::VariablesChanged,
            Self::LocalVariablesChanged { .. } => ClockEventKind::LocalVariablesChanged,
        }
    }
}
