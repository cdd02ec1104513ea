//! The device itself, and the RAII acquire/release machinery the
//! registry hands out borrows through (spec §3, §4.1, §5 "Refcounting").

use crate::autoevent::Autoevent;
use crate::device::address::{DriverHandle, ProtocolAddress};
use crate::device::name::Name;
use crate::device::profile::Profile;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    Locked,
    Unlocked,
}

impl FromStr for AdminState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(AdminState::Locked),
            "UNLOCKED" => Ok(AdminState::Unlocked),
            _ => Err(crate::Error::BadRequest(format!("invalid admin state {:?}", s))),
        }
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Locked => write!(f, "LOCKED"),
            AdminState::Unlocked => write!(f, "UNLOCKED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingState {
    Up,
    Down,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingState::Up => write!(f, "UP"),
            OperatingState::Down => write!(f, "DOWN"),
        }
    }
}

/// The shape of a device as delivered by the platform (e.g. over the
/// `device/add` callback topic), before it is installed in the
/// registry as a `DeviceEntry`.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: Name,
    pub parent: Option<Name>,
    pub description: String,
    pub labels: Vec<String>,
    pub tags: Option<Vec<String>>,
    pub admin_state: AdminState,
    pub service_name: String,
    pub protocol_address: ProtocolAddress,
    pub profile_name: Name,
    pub autoevents: Vec<Autoevent>,
    pub origin_ns: u64,
}

/// A live entry in the registry's device map: a `Device` plus its
/// resolved profile, driver-parsed address handle, per-autoevent
/// scheduler slots, and the acquire/release bookkeeping used to
/// satisfy P2/P3.
///
/// `outstanding` starts at 1, representing the map's own hold.
/// `acquire_*` increments it and hands back a `DeviceHandle`; when the
/// handle drops, it decrements. `removed` is set once the entry has
/// been taken out of the map; when the count reaches zero *and*
/// `removed` is set, `reap_notify` wakes the task that runs teardown
/// (stopping autoevents, calling the driver's free callbacks) --
/// exactly once, outside of any map lock.
pub struct DeviceEntry {
    pub id: Uuid,
    pub device: Device,
    pub profile: RwLock<Arc<Profile>>,
    pub driver_address_handle: RwLock<Option<DriverHandle>>,
    pub operating_state: RwLock<OperatingState>,
    pub admin_state: RwLock<AdminState>,
    pub retry_count: AtomicU32,
    pub(crate) autoevent_handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
    outstanding: AtomicUsize,
    removed: AtomicBool,
    pub(crate) reap_notify: Notify,
}

impl DeviceEntry {
    pub fn new(device: Device, profile: Arc<Profile>) -> Arc<Self> {
        let admin_state = device.admin_state;
        Arc::new(DeviceEntry {
            id: Uuid::new_v4(),
            device,
            profile: RwLock::new(profile),
            driver_address_handle: RwLock::new(None),
            operating_state: RwLock::new(OperatingState::Up),
            admin_state: RwLock::new(admin_state),
            retry_count: AtomicU32::new(0),
            autoevent_handles: RwLock::new(Vec::new()),
            outstanding: AtomicUsize::new(1),
            removed: AtomicBool::new(false),
            reap_notify: Notify::new(),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> DeviceHandle {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        DeviceHandle(self.clone())
    }

    /// Takes the map's own hold away (called once, from
    /// `remove_by_name`). Returns `true` if this was the last
    /// outstanding hold, meaning teardown can run immediately.
    pub(crate) fn mark_removed(&self) -> bool {
        self.removed.store(true, Ordering::Release);
        self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Installs a scheduler job handle, serialized against any
    /// concurrent install/teardown through the same `RwLock` write
    /// guard (spec §4.6 "device-local mutex").
    pub async fn install_autoevent_handle(&self, handle: tokio::task::JoinHandle<()>) {
        self.autoevent_handles.write().await.push(handle);
    }

    /// Takes every installed job handle, leaving none behind -- used
    /// on device removal/replacement to abort them all.
    pub async fn take_autoevent_handles(&self) -> Vec<tokio::task::JoinHandle<()>> {
        std::mem::take(&mut *self.autoevent_handles.write().await)
    }
}

/// An RAII borrow of a device, returned by `Registry::acquire_*`.
/// Dropping it releases the hold; this replaces spec's explicit
/// `release(device)` call with ownership -- the caller simply lets
/// the handle go out of scope.
pub struct DeviceHandle(Arc<DeviceEntry>);

impl DeviceHandle {
    pub fn entry(&self) -> &Arc<DeviceEntry> {
        &self.0
    }
}

impl std::ops::Deref for DeviceHandle {
    type Target = DeviceEntry;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        let prev = self.0.outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.0.removed.load(Ordering::Acquire) {
            self.0.reap_notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::profile::Profile;

    fn mk_device(name: &str) -> Device {
        Device {
            name: Name::create(name).unwrap(),
            parent: None,
            description: String::new(),
            labels: vec![],
            tags: None,
            admin_state: AdminState::Unlocked,
            service_name: "svc".into(),
            protocol_address: ProtocolAddress::new(),
            profile_name: Name::create("p1").unwrap(),
            autoevents: vec![],
            origin_ns: 0,
        }
    }

    fn mk_profile() -> Arc<Profile> {
        Arc::new(Profile::new(
            Name::create("p1").unwrap(),
            String::new(),
            String::new(),
            String::new(),
            vec![],
            vec![],
            vec![],
        ))
    }

    #[test]
    fn test_admin_state_parsing() {
        assert_eq!("LOCKED".parse::<AdminState>().unwrap(), AdminState::Locked);
        assert_eq!("UNLOCKED".parse::<AdminState>().unwrap(), AdminState::Unlocked);
        assert!("WEIRD".parse::<AdminState>().is_err());
    }

    #[test]
    fn test_acquire_release_counts() {
        let entry = DeviceEntry::new(mk_device("d1"), mk_profile());
        assert_eq!(entry.outstanding_count(), 1);

        let h1 = entry.acquire();
        let h2 = entry.acquire();
        assert_eq!(entry.outstanding_count(), 3);

        drop(h1);
        assert_eq!(entry.outstanding_count(), 2);
        drop(h2);
        assert_eq!(entry.outstanding_count(), 1);
    }

    #[test]
    fn test_mark_removed_last_hold() {
        let entry = DeviceEntry::new(mk_device("d1"), mk_profile());
        assert!(entry.mark_removed());
    }

    #[test]
    fn test_mark_removed_with_outstanding_holds() {
        let entry = DeviceEntry::new(mk_device("d1"), mk_profile());
        let _h = entry.acquire();
        assert!(!entry.mark_removed());
    }
}
