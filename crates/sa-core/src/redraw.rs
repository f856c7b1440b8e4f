//! Redraw notification port

use crate::ControlId;

/// Asks the rendering layer to redraw a control
///
/// Invoked when a control's variable is promoted out of standby and when a
/// trigger's condition flips.
pub trait RedrawNotifier: Send + Sync {
    fn trigger_redraw(&self, control_id: &ControlId);
}

/// Notifier used when nothing renders controls
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRedraw;

impl RedrawNotifier for NoRedraw {
    fn trigger_redraw(&self, _control_id: &ControlId) {}
}
