//! String identifier newtypes for controls, surfaces and trigger events

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Prefix carried by every trigger control id and by the surface id a trigger
/// runs its actions under
pub const TRIGGER_PREFIX: &str = "trigger:";

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh identifier (ULID)
            pub fn generate() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Get the identifier as a string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_id!(
    /// Identifier of a control (button, trigger, expression variable, ...)
    ControlId
);

define_id!(
    /// Identifier of the surface a press or an action run originates from
    SurfaceId
);

define_id!(
    /// Identifier of an event descriptor within a trigger
    EventId
);

impl ControlId {
    /// Generate a fresh trigger control id (`trigger:<ulid>`)
    pub fn generate_trigger() -> Self {
        Self(format!("{TRIGGER_PREFIX}{}", Ulid::new()))
    }

    /// Whether this control is a trigger
    pub fn is_trigger(&self) -> bool {
        self.0.starts_with(TRIGGER_PREFIX)
    }
}

impl SurfaceId {
    /// The surface id a trigger uses when running its own actions
    pub fn for_trigger(control_id: &ControlId) -> Self {
        if control_id.is_trigger() {
            Self(control_id.as_str().to_string())
        } else {
            Self(format!("{TRIGGER_PREFIX}{control_id}"))
        }
    }

    /// Whether this surface is a trigger rather than a physical surface
    pub fn is_trigger(&self) -> bool {
        self.0.starts_with(TRIGGER_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ControlId::generate(), ControlId::generate());
        assert_eq!(EventId::generate().as_str().len(), 26);
    }

    #[test]
    fn test_trigger_ids() {
        let id = ControlId::generate_trigger();
        assert!(id.is_trigger());
        assert!(!ControlId::new("bank:1").is_trigger());

        let surface = SurfaceId::for_trigger(&id);
        assert!(surface.is_trigger());
        assert_eq!(surface.as_str(), id.as_str());
        assert!(!SurfaceId::new("streamdeck:AB12").is_trigger());
    }

    #[test]
    fn test_transparent_serde() {
        let id = ControlId::new("trigger:abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"trigger:abc\"");
    }
}
