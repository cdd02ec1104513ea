//! The provision-watcher task (spec §4.7): holds the live watcher
//! list, keeps it in sync with `provisionwatcher/{add,update,delete}`
//! callbacks, and matches discovery announcements against it.
//!
//! The watcher types themselves (`ProvisionWatcher`, `Announcement`,
//! `admit`) live in `device_svc_api::provision`; this module is the
//! devicesvcd-side home for the mutable list and its registry-backed
//! population.

use device_svc_api::provision::{admit, AdmittedDevice, Announcement, ProvisionWatcher};
use tokio::sync::RwLock;
use tracing::info;

/// The live, mutable list of provision watchers. A plain
/// `RwLock<Vec<_>>` suffices: spec §4.7 describes matching as
/// read-only and population/CRUD as infrequent compared to matching,
/// so there is no need for the device map's more elaborate
/// reference-counting discipline here.
#[derive(Default)]
pub struct WatcherList {
    watchers: RwLock<Vec<ProvisionWatcher>>,
}

impl WatcherList {
    pub fn new() -> Self {
        WatcherList::default()
    }

    /// Replaces the entire list, preserving declaration order (used
    /// at startup once the registry's watcher tree has been fetched).
    pub async fn populate(&self, watchers: Vec<ProvisionWatcher>) {
        info!(count = watchers.len(), "provision watchers populated");
        *self.watchers.write().await = watchers;
    }

    /// Upserts one watcher by name -- the `provisionwatcher/add` and
    /// `provisionwatcher/update` callback handlers share this path,
    /// since both mean "this name now has this definition."
    pub async fn upsert(&self, watcher: ProvisionWatcher) {
        let mut watchers = self.watchers.write().await;
        if let Some(existing) = watchers.iter_mut().find(|w| w.name == watcher.name) {
            *existing = watcher;
        } else {
            watchers.push(watcher);
        }
    }

    pub async fn remove(&self, name: &str) -> bool {
        let mut watchers = self.watchers.write().await;
        let before = watchers.len();
        watchers.retain(|w| w.name.as_str() != name);
        watchers.len() != before
    }

    /// Walks the list in declaration order and returns the first
    /// matching watcher's admitted-device request (spec §4.7 "The
    /// first matching watcher wins").
    pub async fn admit(&self, announcement: &Announcement) -> Option<AdmittedDevice> {
        let watchers = self.watchers.read().await;
        admit(&watchers, announcement).map(|w| AdmittedDevice::from_match(w, announcement))
    }

    pub async fn len(&self) -> usize {
        self.watchers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.watchers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_svc_api::device::{AdminState, Name};
    use std::collections::HashMap;

    fn mk_watcher(name: &str) -> ProvisionWatcher {
        ProvisionWatcher::new(
            Name::create(name).unwrap(),
            AdminState::Unlocked,
            true,
            HashMap::from([("mac".to_string(), "^00:.*".to_string())]),
            HashMap::new(),
            Name::create("p1").unwrap(),
            vec![],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_populate_then_admit() {
        let list = WatcherList::new();
        list.populate(vec![mk_watcher("w1")]).await;

        let announcement = Announcement {
            name: "dev1".into(),
            description: String::new(),
            properties: HashMap::from([("mac".to_string(), "00:AA:BB".to_string())]),
        };

        let admitted = list.admit(&announcement).await.unwrap();
        assert_eq!(admitted.name, "dev1");
        assert_eq!(admitted.profile_name.as_str(), "p1");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_name() {
        let list = WatcherList::new();
        list.upsert(mk_watcher("w1")).await;
        list.upsert(mk_watcher("w1")).await;
        assert_eq!(list.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let list = WatcherList::new();
        list.upsert(mk_watcher("w1")).await;
        assert!(list.remove("w1").await);
        assert!(list.is_empty().await);
        assert!(!list.remove("w1").await);
    }
}
