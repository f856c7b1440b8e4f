//! Active/standby ownership of contested variable names
//!
//! Several producers may claim one variable name. The first claimant is the
//! active owner and publishes the value; later claimants wait in an ordered
//! standby list and are promoted, oldest first, when the active owner goes
//! away. One registry exists per variable kind; the kind-specific reaction to
//! promotion and release is injected as a [`ConflictStrategy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Kind-specific reaction to ownership changes
///
/// Called after the registry lock has been released, so implementations may
/// call back into the registry.
pub trait ConflictStrategy<O>: Send + Sync {
    /// `owner` became the active owner of `name`; its value is live from now on
    fn promoted(&self, owner: &O, name: &str);

    /// Nobody owns `name` any more; its value must become undefined
    fn released(&self, name: &str);
}

#[derive(Debug, Clone, PartialEq)]
struct ConflictEntry<O> {
    active: O,
    standby: Vec<O>,
}

enum Notification<O> {
    Promoted(O, String),
    Released(String),
}

/// Registry of name claims for one variable kind
pub struct NameConflictRegistry<O> {
    kind: &'static str,
    entries: Mutex<HashMap<String, ConflictEntry<O>>>,
    strategy: Arc<dyn ConflictStrategy<O>>,
}

impl<O> NameConflictRegistry<O>
where
    O: Clone + Ord + Hash + Display + Send + Sync,
{
    pub fn new(kind: &'static str, strategy: Arc<dyn ConflictStrategy<O>>) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            strategy,
        }
    }

    /// Claim a name
    ///
    /// Returns whether `owner` is the active owner afterwards. Claiming a
    /// name already held (actively or on standby) changes nothing.
    pub fn add(&self, owner: O, name: &str) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(name) {
            None => {
                trace!(kind = self.kind, owner = %owner, name, "Name claimed");
                entries.insert(
                    name.to_string(),
                    ConflictEntry {
                        active: owner,
                        standby: Vec::new(),
                    },
                );
                true
            }
            Some(entry) if entry.active == owner => true,
            Some(entry) => {
                if !entry.standby.contains(&owner) {
                    debug!(
                        kind = self.kind,
                        owner = %owner,
                        active = %entry.active,
                        name,
                        "Name already claimed, owner placed on standby"
                    );
                    entry.standby.push(owner);
                }
                false
            }
        }
    }

    /// Give up a claim
    ///
    /// Removing the active owner promotes the oldest standby, or releases the
    /// name when there is none. Unknown owners and names are ignored.
    pub fn remove(&self, owner: &O, name: &str) {
        let notification = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(name) else {
                return;
            };

            if entry.active != *owner {
                entry.standby.retain(|o| o != owner);
                None
            } else if entry.standby.is_empty() {
                entries.remove(name);
                Some(Notification::Released(name.to_string()))
            } else {
                let next = entry.standby.remove(0);
                entry.active = next.clone();
                Some(Notification::Promoted(next, name.to_string()))
            }
        };

        if let Some(notification) = notification {
            self.notify(notification);
        }
    }

    /// Recompute every claim from scratch
    ///
    /// Owners are visited in id order, so the outcome does not depend on the
    /// order in which they were loaded. Every resulting active owner is
    /// notified as promoted; names nobody claims any more are released.
    pub fn rebuild<I>(&self, claims: I)
    where
        I: IntoIterator<Item = (O, String)>,
    {
        let mut ordered: Vec<(O, String)> = claims.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rebuilt: HashMap<String, ConflictEntry<O>> = HashMap::new();
        for (owner, name) in ordered {
            match rebuilt.get_mut(&name) {
                None => {
                    rebuilt.insert(
                        name,
                        ConflictEntry {
                            active: owner,
                            standby: Vec::new(),
                        },
                    );
                }
                Some(entry) => {
                    if entry.active != owner && !entry.standby.contains(&owner) {
                        entry.standby.push(owner);
                    }
                }
            }
        }

        let mut notifications = Vec::new();
        {
            let mut entries = self.lock();
            for name in entries.keys() {
                if !rebuilt.contains_key(name) {
                    notifications.push(Notification::Released(name.clone()));
                }
            }

            // Sorted so promotion notifications go out in a reproducible order
            let promoted: BTreeMap<&String, &O> =
                rebuilt.iter().map(|(name, e)| (name, &e.active)).collect();
            for (name, owner) in promoted {
                notifications.push(Notification::Promoted((*owner).clone(), name.clone()));
            }

            *entries = rebuilt;
        }

        debug!(
            kind = self.kind,
            notifications = notifications.len(),
            "Rebuilt name conflict registry"
        );
        for notification in notifications {
            self.notify(notification);
        }
    }

    /// Whether `owner` actively owns any name
    pub fn is_active(&self, owner: &O) -> bool {
        self.lock().values().any(|entry| entry.active == *owner)
    }

    /// The active owner of a name
    pub fn active_owner_for(&self, name: &str) -> Option<O> {
        self.lock().get(name).map(|entry| entry.active.clone())
    }

    /// Standby owners of a name, oldest first
    pub fn standby_for(&self, name: &str) -> Vec<O> {
        self.lock()
            .get(name)
            .map(|entry| entry.standby.clone())
            .unwrap_or_default()
    }

    /// Number of claimed names
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn notify(&self, notification: Notification<O>) {
        match notification {
            Notification::Promoted(owner, name) => {
                debug!(kind = self.kind, owner = %owner, name = %name, "Owner promoted");
                self.strategy.promoted(&owner, &name);
            }
            Notification::Released(name) => {
                debug!(kind = self.kind, name = %name, "Name released");
                self.strategy.released(&name);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConflictEntry<O>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
