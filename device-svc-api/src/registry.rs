//! The device registry: a concurrent, reference-counted map of
//! devices and their profiles (spec §4.1).
//!
//! `tokio::sync::RwLock` queues waiters FIFO, so a steady stream of
//! readers cannot starve a writer -- this satisfies spec's
//! writer-preference requirement without a hand-rolled lock.
//! Locking discipline: a read or write guard is held only long enough
//! to look up/insert/remove/clone an `Arc`; it is always dropped
//! before any driver callback or other I/O runs (P4).

use crate::device::{AdminState, Command, Device, DeviceEntry, DeviceHandle, Direction, Name, OperatingState, Resource};
use crate::error::{Error, Result};
use crate::device::profile::Profile;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What `add_or_replace` actually did, so the caller knows whether to
/// notify the driver of a brand-new device (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    UpdatedInPlace,
    UpdatedByReplace,
}

/// A device snapshot returned by `for_each_matching_command`: an
/// acquired handle (refcount already incremented) plus the resolved
/// command it matched on.
pub struct MatchedDevice {
    pub handle: DeviceHandle,
    pub profile: Arc<Profile>,
}

struct Inner {
    devices: HashMap<Name, Arc<DeviceEntry>>,
    devices_by_id: HashMap<Uuid, Name>,
    profiles: HashMap<Name, Arc<Profile>>,
}

/// The device map: `add_or_replace`, `remove_by_name`,
/// `acquire_by_name`/`acquire_by_id`, `for_each_matching_command`,
/// `get_profile`, `add_profile` -- exactly spec §4.1's operation list.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: RwLock::new(Inner {
                devices: HashMap::new(),
                devices_by_id: HashMap::new(),
                profiles: HashMap::new(),
            }),
        }
    }

    /// Profiles are never replaced in place (spec §4.1): a new profile
    /// supersedes its predecessor by name. Devices that referenced the
    /// predecessor keep working off their own `Arc` clone until a
    /// `deviceprofile/update` callback explicitly relinks them (see
    /// `devicesvcd::callbacks`).
    pub async fn add_profile(&self, profile: Profile) -> Arc<Profile> {
        let profile = Arc::new(profile);
        let mut inner = self.inner.write().await;
        inner.profiles.insert(profile.name.clone(), profile.clone());
        profile
    }

    pub async fn get_profile(&self, name: &str) -> Option<Arc<Profile>> {
        self.inner.read().await.profiles.get(name).cloned()
    }

    /// Relinks every device currently pointing at `old_name`'s profile
    /// onto `new_profile` (used by the `deviceprofile/update` callback
    /// handler -- spec §4.1 "devices ... are relinked to the successor
    /// on a profile-updated callback").
    pub async fn relink_profile(&self, profile_name: &str, new_profile: Arc<Profile>) {
        let inner = self.inner.read().await;
        for entry in inner.devices.values() {
            if entry.device.profile_name.as_str() == profile_name {
                *entry.profile.write().await = new_profile.clone();
            }
        }
    }

    /// Inserts a brand-new device, or updates an existing one of the
    /// same name in place or by full replacement (spec §4.1).
    ///
    /// "Updated in place" iff name, profile name, autoevent list, and
    /// protocol address are all unchanged; otherwise the old device is
    /// removed (its autoevents stopped, its refcount decremented) and
    /// the new one inserted. Devices whose `admin_state` is `Locked`
    /// are never installed (spec §3 "a device exists in the map iff
    /// its admin-state is not LOCKED at the time of insert").
    pub async fn add_or_replace(&self, device: Device, profile: Arc<Profile>) -> Result<(Option<Arc<DeviceEntry>>, UpsertOutcome)> {
        if device.admin_state == AdminState::Locked {
            return Err(Error::BadRequest(String::from("device is locked; ignored by the core")));
        }

        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.devices.get(&device.name).cloned() {
            let unchanged = existing.device.profile_name == device.profile_name
                && existing.device.autoevents == device.autoevents
                && existing.device.protocol_address == device.protocol_address;

            if unchanged {
                return Ok((None, UpsertOutcome::UpdatedInPlace));
            }

            // Full replacement: remove the old entry (stopping its
            // autoevents is the caller's responsibility once it sees
            // the returned old entry), insert the new one.
            inner.devices_by_id.remove(&existing.id);
            let last_hold = existing.mark_removed();
            let new_entry = DeviceEntry::new(device, profile);
            inner.devices_by_id.insert(new_entry.id, new_entry.device.name.clone());
            inner.devices.insert(new_entry.device.name.clone(), new_entry);

            return Ok((
                if last_hold { Some(existing) } else { None },
                UpsertOutcome::UpdatedByReplace,
            ));
        }

        let entry = DeviceEntry::new(device, profile);
        inner.devices_by_id.insert(entry.id, entry.device.name.clone());
        inner.devices.insert(entry.device.name.clone(), entry);
        Ok((None, UpsertOutcome::Created))
    }

    /// Removes a device by name. Returns the entry if one was removed
    /// and this was its last outstanding hold (teardown -- stopping
    /// autoevents and running the driver's free callbacks -- is then
    /// the caller's job, done outside any registry lock).
    pub async fn remove_by_name(&self, name: &str) -> Option<Arc<DeviceEntry>> {
        let mut inner = self.inner.write().await;
        let entry = inner.devices.remove(name)?;
        inner.devices_by_id.remove(&entry.id);
        let last_hold = entry.mark_removed();
        if last_hold {
            Some(entry)
        } else {
            None
        }
    }

    pub async fn acquire_by_name(&self, name: &str) -> Option<DeviceHandle> {
        let inner = self.inner.read().await;
        inner.devices.get(name).map(|e| e.acquire())
    }

    pub async fn acquire_by_id(&self, id: Uuid) -> Option<DeviceHandle> {
        let inner = self.inner.read().await;
        let name = inner.devices_by_id.get(&id)?;
        inner.devices.get(name).map(|e| e.acquire())
    }

    /// Snapshots, under a single read-lock, every `UNLOCKED`/`UP`
    /// device whose profile has a command of the given direction and
    /// name (spec §4.1). Each returned entry's refcount is
    /// incremented; the caller drops the `DeviceHandle` (or lets it
    /// fall out of scope) to release it.
    pub async fn for_each_matching_command(&self, command_name: &str, dir: Direction) -> Vec<MatchedDevice> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();

        for entry in inner.devices.values() {
            if *entry.admin_state.read().await != AdminState::Unlocked {
                continue;
            }
            if *entry.operating_state.read().await != OperatingState::Up {
                continue;
            }

            let profile = entry.profile.read().await.clone();
            let has_command = profile.command(command_name).map(|c| c.permits(dir)).unwrap_or(false)
                || profile.resource(command_name).map(|r| r.property.permits(dir)).unwrap_or(false);

            if has_command {
                out.push(MatchedDevice { handle: entry.acquire(), profile });
            }
        }

        out
    }

    pub async fn device_count(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    pub async fn profile_count(&self) -> usize {
        self.inner.read().await.profiles.len()
    }
}

#[allow(dead_code)]
fn resource_direction(resource: &Resource, dir: Direction) -> bool {
    resource.property.permits(dir)
}

#[allow(dead_code)]
fn command_direction(command: &Command, dir: Direction) -> bool {
    command.permits(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ProtocolAddress};

    fn mk_device(name: &str, profile: &str) -> Device {
        Device {
            name: Name::create(name).unwrap(),
            parent: None,
            description: String::new(),
            labels: vec![],
            tags: None,
            admin_state: AdminState::Unlocked,
            service_name: "svc".into(),
            protocol_address: ProtocolAddress::new(),
            profile_name: Name::create(profile).unwrap(),
            autoevents: vec![],
            origin_ns: 0,
        }
    }

    fn mk_profile(name: &str) -> Arc<Profile> {
        Arc::new(Profile::new(Name::create(name).unwrap(), String::new(), String::new(), String::new(), vec![], vec![], vec![]))
    }

    #[tokio::test]
    async fn test_create_then_update_in_place() {
        let reg = Registry::new();
        let profile = mk_profile("p1");

        let (old, outcome) = reg.add_or_replace(mk_device("d1", "p1"), profile.clone()).await.unwrap();
        assert!(old.is_none());
        assert_eq!(outcome, UpsertOutcome::Created);

        let (old, outcome) = reg.add_or_replace(mk_device("d1", "p1"), profile).await.unwrap();
        assert!(old.is_none());
        assert_eq!(outcome, UpsertOutcome::UpdatedInPlace);
        assert_eq!(reg.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_by_replace_on_profile_change() {
        let reg = Registry::new();
        reg.add_or_replace(mk_device("d1", "p1"), mk_profile("p1")).await.unwrap();

        let (old, outcome) = reg.add_or_replace(mk_device("d1", "p2"), mk_profile("p2")).await.unwrap();
        assert!(old.is_some());
        assert_eq!(outcome, UpsertOutcome::UpdatedByReplace);
        assert_eq!(reg.device_count().await, 1);

        let handle = reg.acquire_by_name("d1").await.unwrap();
        assert_eq!(handle.device.profile_name.as_str(), "p2");
    }

    #[tokio::test]
    async fn test_locked_device_is_rejected() {
        let reg = Registry::new();
        let mut device = mk_device("d1", "p1");
        device.admin_state = AdminState::Locked;

        assert!(reg.add_or_replace(device, mk_profile("p1")).await.is_err());
        assert_eq!(reg.device_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_by_name() {
        let reg = Registry::new();
        reg.add_or_replace(mk_device("d1", "p1"), mk_profile("p1")).await.unwrap();

        assert!(reg.remove_by_name("d1").await.is_some());
        assert_eq!(reg.device_count().await, 0);
        assert!(reg.acquire_by_name("d1").await.is_none());
        assert!(reg.remove_by_name("d1").await.is_none());
    }

    #[tokio::test]
    async fn test_acquire_by_id() {
        let reg = Registry::new();
        reg.add_or_replace(mk_device("d1", "p1"), mk_profile("p1")).await.unwrap();

        let by_name = reg.acquire_by_name("d1").await.unwrap();
        let id = by_name.id;
        drop(by_name);

        let by_id = reg.acquire_by_id(id).await.unwrap();
        assert_eq!(by_id.device.name.as_str(), "d1");
    }

    #[tokio::test]
    async fn test_for_each_matching_command_filters_locked_and_down() {
        use crate::device::resource::{PropertyValue, TypeCode};
        use crate::device::address::ResourceAttrs;
        use crate::device::resource::Resource as Res;

        let reg = Registry::new();
        let profile = Arc::new(Profile::new(
            Name::create("p1").unwrap(),
            String::new(),
            String::new(),
            String::new(),
            vec![],
            vec![Res {
                name: Name::create("temp").unwrap(),
                description: String::new(),
                attributes: ResourceAttrs::new(),
                property: PropertyValue {
                    type_code: TypeCode::I32,
                    readable: true,
                    writable: false,
                    transform: None,
                    bounds: None,
                    assertion: None,
                    units: None,
                    default_value: None,
                    media_type: None,
                    mapping: None,
                },
                driver_handle: None,
                tags: None,
            }],
            vec![],
        ));

        reg.add_or_replace(mk_device("d1", "p1"), profile.clone()).await.unwrap();
        reg.add_or_replace(mk_device("d2", "p1"), profile).await.unwrap();

        {
            let h = reg.acquire_by_name("d2").await.unwrap();
            *h.operating_state.write().await = OperatingState::Down;
        }

        let matches = reg.for_each_matching_command("temp", Direction::Get).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].handle.device.name.as_str(), "d1");
    }
}
