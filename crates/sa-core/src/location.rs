//! Control locations and the page-location lookup port

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ControlId;

/// Where a control sits on the page grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlLocation {
    pub page_number: u32,
    pub row: i32,
    pub column: i32,
}

impl ControlLocation {
    pub fn new(page_number: u32, row: i32, column: i32) -> Self {
        Self {
            page_number,
            row,
            column,
        }
    }
}

impl fmt::Display for ControlLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.page_number, self.row, self.column)
    }
}

/// Resolves the current location of a control, if it has one
///
/// Triggers and expression variables live off-grid and have no location.
pub trait PageLocationLookup: Send + Sync {
    fn location_of(&self, control_id: &ControlId) -> Option<ControlLocation>;
}

/// Lookup used when no page grid is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocations;

impl PageLocationLookup for NoLocations {
    fn location_of(&self, _control_id: &ControlId) -> Option<ControlLocation> {
        None
    }
}
