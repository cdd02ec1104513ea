//! Provision watchers: pattern-based admission of discovered devices
//! (spec §3, §4.7).

use crate::autoevent::Autoevent;
use crate::device::entry::AdminState;
use crate::device::name::Name;
use crate::Value;
use regex::Regex;
use std::collections::HashMap;

/// A discovered device as announced by a driver's `discover`
/// callback: a candidate name, protocol address, description, and a
/// string-keyed property map matched against watcher identifiers.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub name: String,
    pub description: String,
    pub properties: HashMap<String, String>,
}

/// A pattern-based rule admitting discovered devices into the
/// service. Each identifier regex is pre-compiled once, at
/// construction, and stored with the watcher -- the natural Rust
/// reading of spec's "pre-compiled once and stored with the watcher".
#[derive(Debug, Clone)]
pub struct ProvisionWatcher {
    pub name: Name,
    pub admin_state: AdminState,
    pub enabled: bool,
    identifiers: HashMap<String, Regex>,
    pub blocking_identifiers: HashMap<String, Vec<String>>,
    pub profile_name: Name,
    pub autoevents: Vec<Autoevent>,
}

impl ProvisionWatcher {
    pub fn new(
        name: Name,
        admin_state: AdminState,
        enabled: bool,
        identifier_patterns: HashMap<String, String>,
        blocking_identifiers: HashMap<String, Vec<String>>,
        profile_name: Name,
        autoevents: Vec<Autoevent>,
    ) -> Result<Self, crate::Error> {
        let mut identifiers = HashMap::new();
        for (property, pattern) in identifier_patterns {
            let compiled = Regex::new(&pattern)
                .map_err(|e| crate::Error::BadRequest(format!("bad identifier pattern {:?}: {}", pattern, e)))?;
            identifiers.insert(property, compiled);
        }

        Ok(ProvisionWatcher {
            name,
            admin_state,
            enabled,
            identifiers,
            blocking_identifiers,
            profile_name,
            autoevents,
        })
    }

    /// Whether this watcher would admit the given announcement, per
    /// spec §4.7 "Match": every identifier regex must match the
    /// same-named property (missing property => no match), and no
    /// blocking-identifier's value list may contain the property's
    /// value.
    pub fn matches(&self, announcement: &Announcement) -> bool {
        if !self.enabled || self.admin_state == AdminState::Locked {
            return false;
        }

        for (property, regex) in &self.identifiers {
            match announcement.properties.get(property) {
                Some(value) if regex.is_match(value) => {}
                _ => return false,
            }
        }

        for (property, forbidden) in &self.blocking_identifiers {
            if let Some(value) = announcement.properties.get(property) {
                if forbidden.iter().any(|f| f == value) {
                    return false;
                }
            }
        }

        true
    }
}

/// Walks watchers in declaration order and returns the first match,
/// per spec §4.7 "The first matching watcher wins."
pub fn admit<'a>(watchers: &'a [ProvisionWatcher], announcement: &Announcement) -> Option<&'a ProvisionWatcher> {
    watchers.iter().find(|w| w.matches(announcement))
}

/// The resulting add-device request synthesized from a winning match
/// (spec §4.7: "the announcement becomes an add-device request with
/// the watcher's profile, autoevents, and admin-state").
pub struct AdmittedDevice {
    pub name: String,
    pub profile_name: Name,
    pub admin_state: AdminState,
    pub autoevents: Vec<Autoevent>,
    pub properties: HashMap<String, Value>,
}

impl AdmittedDevice {
    pub fn from_match(watcher: &ProvisionWatcher, announcement: &Announcement) -> Self {
        AdmittedDevice {
            name: announcement.name.clone(),
            profile_name: watcher.profile_name.clone(),
            admin_state: watcher.admin_state,
            autoevents: watcher.autoevents.clone(),
            properties: announcement
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_watcher(identifiers: &[(&str, &str)], blocking: &[(&str, &[&str])]) -> ProvisionWatcher {
        ProvisionWatcher::new(
            Name::create("watcher1").unwrap(),
            AdminState::Unlocked,
            true,
            identifiers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            blocking
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
            Name::create("profile1").unwrap(),
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_s4_scenario() {
        let watcher = mk_watcher(&[("mac", "^00:1A:.*")], &[("model", &["proto"])]);

        let announcement = Announcement {
            name: "dev1".into(),
            description: String::new(),
            properties: HashMap::from([
                ("mac".to_string(), "00:1A:2B:3C:4D:5E".to_string()),
                ("model".to_string(), "prod".to_string()),
            ]),
        };

        assert!(watcher.matches(&announcement));
        assert!(admit(&[watcher], &announcement).is_some());
    }

    #[test]
    fn test_blocking_identifier_rejects() {
        let watcher = mk_watcher(&[("mac", "^00:1A:.*")], &[("model", &["proto"])]);

        let announcement = Announcement {
            name: "dev1".into(),
            description: String::new(),
            properties: HashMap::from([
                ("mac".to_string(), "00:1A:2B:3C:4D:5E".to_string()),
                ("model".to_string(), "proto".to_string()),
            ]),
        };

        assert!(!watcher.matches(&announcement));
    }

    #[test]
    fn test_missing_property_is_no_match() {
        let watcher = mk_watcher(&[("mac", "^00:1A:.*")], &[]);
        let announcement = Announcement { name: "dev1".into(), description: String::new(), properties: HashMap::new() };
        assert!(!watcher.matches(&announcement));
    }

    #[test]
    fn test_first_match_wins() {
        let a = mk_watcher(&[("mac", "^00:1A:.*")], &[]);
        let mut b = mk_watcher(&[("mac", "^00:1A:.*")], &[]);
        b.name = Name::create("watcher2").unwrap();

        let announcement = Announcement {
            name: "dev1".into(),
            description: String::new(),
            properties: HashMap::from([("mac".to_string(), "00:1A:2B:3C:4D:5E".to_string())]),
        };

        let watchers = vec![a, b];
        let winner = admit(&watchers, &announcement).unwrap();
        assert_eq!(winner.name.as_str(), "watcher1");
    }
}
