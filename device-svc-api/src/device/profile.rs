//! Profiles: the declared resource/command model for a class of
//! devices, plus the memoized command-resolution table (spec §3,
//! §4.2).

use crate::device::command::{Command, ResolvedRequest};
use crate::device::name::Name;
use crate::device::resource::{Direction, Resource};
use crate::Error;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Name, description, manufacturer, model, labels, the list of
/// resources, the list of commands, and a lazily computed
/// command-info table.
///
/// The table is computed once, under `OnceLock`, the first time any
/// command on this profile is resolved -- this is the Rust reading of
/// spec's "memoised ... under a single initialization lock": contention
/// only on the very first resolution, after which every lookup is a
/// lock-free `HashMap::get`.
#[derive(Debug)]
pub struct Profile {
    pub name: Name,
    pub description: String,
    pub manufacturer: String,
    pub model: String,
    pub labels: Vec<String>,
    pub resources: Vec<Resource>,
    pub commands: Vec<Command>,
    command_info: OnceLock<HashMap<(Name, Direction), Vec<ResolvedRequest>>>,
}

impl Profile {
    pub fn new(
        name: Name,
        description: String,
        manufacturer: String,
        model: String,
        labels: Vec<String>,
        resources: Vec<Resource>,
        commands: Vec<Command>,
    ) -> Self {
        Profile {
            name,
            description,
            manufacturer,
            model,
            labels,
            resources,
            commands,
            command_info: OnceLock::new(),
        }
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name.as_str() == name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name.as_str() == name)
    }

    fn command_info(&self) -> &HashMap<(Name, Direction), Vec<ResolvedRequest>> {
        self.command_info.get_or_init(|| self.build_command_info())
    }

    /// Builds the full command-info table for both directions of
    /// every command and every command-shaped single resource, per
    /// the three resolution rules of spec §4.2.
    fn build_command_info(&self) -> HashMap<(Name, Direction), Vec<ResolvedRequest>> {
        let mut table = HashMap::new();

        for dir in [Direction::Get, Direction::Set] {
            for cmd in &self.commands {
                if !cmd.permits(dir) {
                    continue;
                }
                if let Ok(resolved) = self.resolve_via_command(cmd, dir) {
                    table.insert((cmd.name.clone(), dir), resolved);
                }
            }
            for res in &self.resources {
                if res.property.permits(dir) && self.command(res.name.as_str()).is_none() {
                    table.insert(
                        (res.name.clone(), dir),
                        vec![ResolvedRequest {
                            resource: res.name.clone(),
                            property: res.property.clone(),
                            mapping: res.property.mapping.clone(),
                            default_value: None,
                        }],
                    );
                }
            }
        }

        table
    }

    fn resolve_via_command(
        &self,
        cmd: &Command,
        dir: Direction,
    ) -> Result<Vec<ResolvedRequest>, Error> {
        cmd.operations
            .iter()
            .map(|op| {
                let resource = self.resource(op.resource.as_str()).ok_or(Error::NotFound)?;
                if !resource.property.permits(dir) {
                    return Err(Error::NotFound);
                }
                Ok(ResolvedRequest {
                    resource: resource.name.clone(),
                    property: resource.property.clone(),
                    mapping: op.mapping.clone().or_else(|| resource.property.mapping.clone()),
                    default_value: op.default_value.clone(),
                })
            })
            .collect()
    }

    /// Resolves a command name and direction into its ordered list of
    /// resource requests, per the three rules of spec §4.2:
    /// 1. a matching command's own resource operations;
    /// 2. else a matching single resource of the same name;
    /// 3. else `NotFound`.
    pub fn resolve_command(
        &self,
        name: &str,
        dir: Direction,
    ) -> Result<Vec<ResolvedRequest>, Error> {
        self.command_info()
            .iter()
            .find(|((n, d), _)| n.as_str() == name && *d == dir)
            .map(|(_, v)| v.clone())
            .ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::resource::{PropertyValue, TypeCode};
    use crate::device::address::ResourceAttrs;

    fn mk_resource(name: &str, readable: bool, writable: bool) -> Resource {
        Resource {
            name: Name::create(name).unwrap(),
            description: String::new(),
            attributes: ResourceAttrs::new(),
            property: PropertyValue {
                type_code: TypeCode::I32,
                readable,
                writable,
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
        }
    }

    #[test]
    fn test_resolve_single_resource_fallback() {
        let profile = Profile::new(
            Name::create("p1").unwrap(),
            String::new(),
            String::new(),
            String::new(),
            vec![],
            vec![mk_resource("temp", true, false)],
            vec![],
        );

        let resolved = profile.resolve_command("temp", Direction::Get).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].resource.as_str(), "temp");

        assert!(profile.resolve_command("temp", Direction::Set).is_err());
        assert!(profile.resolve_command("missing", Direction::Get).is_err());
    }

    #[test]
    fn test_resolve_via_command() {
        let cmd = Command {
            name: Name::create("read_all").unwrap(),
            operations: vec![crate::device::command::ResourceOperation {
                resource: Name::create("temp").unwrap(),
                mapping: None,
                default_value: None,
            }],
            readable: true,
            writable: false,
            tags: None,
        };
        let profile = Profile::new(
            Name::create("p1").unwrap(),
            String::new(),
            String::new(),
            String::new(),
            vec![],
            vec![mk_resource("temp", true, false)],
            vec![cmd],
        );

        let resolved = profile.resolve_command("read_all", Direction::Get).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].resource.as_str(), "temp");
    }
}
