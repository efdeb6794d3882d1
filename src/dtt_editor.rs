// Reconciling editor: applies add/edit/delete form submissions to the fleet
// store without clobbering the fields the simulation driver owns.
//
// Edits are merged against the store's *current* record at write time. The
// copy of the bus that was loaded into the form is never written back, since
// the simulation may have moved the bus any number of times in between.

use crate::dtt_fleet::FleetStore;
use crate::dtt_models::{Bus, BusStatus, DTTError, Location, Result, Route};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub const MSG_BUS_ADDED: &str = "New bus added to fleet";
pub const MSG_BUS_UPDATED: &str = "Bus details updated";
pub const MSG_BUS_REMOVED: &str = "Bus removed successfully";

// ============================================================================
// Policies
// ============================================================================

/// What `create` does when the id is already present in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateIdPolicy {
    /// Append anyway; both records coexist under the same key.
    #[default]
    Allow,
    Reject,
    /// Overwrite the existing record in place.
    Replace,
}

/// How `update` decides that a draft field was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Empty strings and zero are treated as "unset" and ignored.
    #[default]
    Truthy,
    /// Any supplied value is applied, including empty strings and zero.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditorPolicy {
    pub duplicate_ids: DuplicateIdPolicy,
    pub reject_empty_ids: bool,
    pub merge_mode: MergeMode,
    pub default_origin: Location,
}

// ============================================================================
// Drafts
// ============================================================================

/// Full form state, as used by the add form and as the initial contents of
/// the edit form.
#[derive(Debug, Clone, PartialEq)]
pub struct BusDraft {
    pub id: String,
    pub name: String,
    pub route_id: String,
    pub driver_name: Option<String>,
    pub capacity: u32,
    pub status: BusStatus,
    pub passengers: u32,
    pub speed: f64,
    pub location: Option<Location>,
}

impl BusDraft {
    /// Defaults for a blank "Add Bus" form
    pub fn blank(routes: &[Route], origin: Location, capacity: u32) -> Self {
        BusDraft {
            id: String::new(),
            name: String::new(),
            route_id: routes.first().map(|r| r.id.clone()).unwrap_or_default(),
            driver_name: None,
            capacity,
            status: BusStatus::Inactive,
            passengers: 0,
            speed: 0.0,
            location: Some(origin),
        }
    }

    pub fn from_bus(bus: &Bus) -> Self {
        BusDraft {
            id: bus.id.clone(),
            name: bus.name.clone(),
            route_id: bus.route_id.clone(),
            driver_name: bus.driver_name.clone(),
            capacity: bus.capacity,
            status: bus.status,
            passengers: bus.passengers,
            speed: bus.speed,
            location: Some(bus.location),
        }
    }

    /// The editable subset an edit-form submission carries
    pub fn to_edit(&self) -> BusEdit {
        BusEdit {
            name: Some(self.name.clone()),
            route_id: Some(self.route_id.clone()),
            capacity: Some(self.capacity),
            status: Some(self.status),
        }
    }

    fn into_bus(self, origin: Location, now: DateTime<Utc>) -> Bus {
        Bus {
            id: self.id,
            name: self.name,
            route_id: self.route_id,
            driver_name: self.driver_name,
            status: self.status,
            location: self.location.unwrap_or(origin),
            speed: self.speed,
            capacity: self.capacity,
            passengers: self.passengers,
            last_updated: now,
        }
    }
}

/// Partial edit of the administrative fields. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusEdit {
    pub name: Option<String>,
    pub route_id: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<BusStatus>,
}

impl BusEdit {
    /// Administrative fields come from the edit, everything else from `current`.
    pub fn apply_to(&self, current: &Bus, mode: MergeMode) -> Bus {
        let text = |value: &Option<String>| -> Option<String> {
            match mode {
                MergeMode::Truthy => value.clone().filter(|v| !v.is_empty()),
                MergeMode::Explicit => value.clone(),
            }
        };
        let capacity = match mode {
            MergeMode::Truthy => self.capacity.filter(|c| *c != 0),
            MergeMode::Explicit => self.capacity,
        };

        Bus {
            name: text(&self.name).unwrap_or_else(|| current.name.clone()),
            route_id: text(&self.route_id).unwrap_or_else(|| current.route_id.clone()),
            capacity: capacity.unwrap_or(current.capacity),
            status: self.status.unwrap_or(current.status),
            ..current.clone()
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub raised_at: Instant,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Notification { message: message.into(), severity: Severity::Success, raised_at: Instant::now() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notification { message: message.into(), severity: Severity::Info, raised_at: Instant::now() }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.raised_at) >= ttl
    }
}

// ============================================================================
// Pure merge logic
// ============================================================================

pub fn insert_bus(current: &[Bus], bus: Bus, policy: &EditorPolicy) -> Result<Vec<Bus>> {
    if policy.reject_empty_ids && bus.id.trim().is_empty() {
        return Err(DTTError::EmptyBusId);
    }

    let exists = current.iter().any(|b| b.id == bus.id);
    match (exists, policy.duplicate_ids) {
        (true, DuplicateIdPolicy::Reject) => Err(DTTError::DuplicateBusId(bus.id)),
        (true, DuplicateIdPolicy::Replace) => {
            let mut replaced = false;
            Ok(current
                .iter()
                .filter_map(|b| {
                    if b.id != bus.id {
                        Some(b.clone())
                    } else if !replaced {
                        replaced = true;
                        Some(bus.clone())
                    } else {
                        None
                    }
                })
                .collect())
        }
        _ => {
            let mut next = current.to_vec();
            next.push(bus);
            Ok(next)
        }
    }
}

/// Applies `edit` to every record matching `id`; unmatched ids fall through.
pub fn merge_edit(current: &[Bus], id: &str, edit: &BusEdit, mode: MergeMode) -> Vec<Bus> {
    current
        .iter()
        .map(|b| if b.id == id { edit.apply_to(b, mode) } else { b.clone() })
        .collect()
}

// ============================================================================
// Editor
// ============================================================================

#[derive(Clone)]
pub struct ReconcilingEditor {
    store: FleetStore,
    policy: EditorPolicy,
    notifications: broadcast::Sender<Notification>,
}

impl ReconcilingEditor {
    pub fn new(store: FleetStore, policy: EditorPolicy) -> Self {
        let (notifications, _) = broadcast::channel(32);
        ReconcilingEditor { store, policy, notifications }
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn create(&self, draft: BusDraft) -> Result<Notification> {
        let bus = draft.into_bus(self.policy.default_origin, Utc::now());
        let id = bus.id.clone();
        let mut outcome = Ok(());

        self.store.update(|current| match insert_bus(&current.buses, bus, &self.policy) {
            Ok(next) => Some(next),
            Err(e) => {
                outcome = Err(e);
                None
            }
        });

        match outcome {
            Ok(()) => {
                log::info!("Bus {} added to fleet", id);
                Ok(self.notify(Notification::success(MSG_BUS_ADDED)))
            }
            Err(e) => {
                log::warn!("Rejected new bus '{}': {}", id, e);
                Err(e)
            }
        }
    }

    /// Always notifies, even when no bus matched `id`.
    pub fn update(&self, id: &str, edit: &BusEdit) -> Notification {
        let mode = self.policy.merge_mode;
        let mut matched = false;

        self.store.update(|current| {
            matched = current.contains(id);
            matched.then(|| merge_edit(&current.buses, id, edit, mode))
        });

        if matched {
            log::info!("Bus {} updated", id);
        } else {
            log::warn!("Update for unknown bus '{}' left the fleet unchanged", id);
        }
        self.notify(Notification::success(MSG_BUS_UPDATED))
    }

    /// `confirm` sees the bus as currently stored (if any). Declining leaves
    /// the store untouched and raises no notification.
    pub fn delete<F>(&self, id: &str, confirm: F) -> Option<Notification>
    where
        F: FnOnce(Option<&Bus>) -> bool,
    {
        let snapshot = self.store.snapshot();
        if !confirm(snapshot.get(id)) {
            log::debug!("Removal of bus {} cancelled", id);
            return None;
        }

        if self.store.remove(id) {
            log::info!("Bus {} removed from fleet", id);
        }
        Some(self.notify(Notification::info(MSG_BUS_REMOVED)))
    }

    fn notify(&self, notification: Notification) -> Notification {
        // No subscribers is fine; the caller still gets the notification.
        let _ = self.notifications.send(notification.clone());
        notification
    }
}
