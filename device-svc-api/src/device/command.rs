//! Commands and the flattened resource-operation lists they resolve
//! into (spec §3, §4.2).

use crate::device::name::Name;
use crate::device::resource::{Direction, PropertyValue, ValueMapping};

/// One step of a command: names a resource and optionally overrides
/// its value-mapping and default for this command only.
#[derive(Debug, Clone)]
pub struct ResourceOperation {
    pub resource: Name,
    pub mapping: Option<ValueMapping>,
    pub default_value: Option<String>,
}

/// Name, ordered resource operations, and the readable/writable pair
/// a profile declares for a command.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: Name,
    pub operations: Vec<ResourceOperation>,
    pub readable: bool,
    pub writable: bool,
    pub tags: Option<Vec<String>>,
}

impl Command {
    pub fn permits(&self, dir: Direction) -> bool {
        match dir {
            Direction::Get => self.readable,
            Direction::Set => self.writable,
        }
    }
}

/// One resolved resource request within an expanded command or
/// single-resource shortcut: the resource name, its property
/// contract, and the mapping/default that apply at this step (the
/// command-level override if present, else the resource's own).
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub resource: Name,
    pub property: PropertyValue,
    pub mapping: Option<ValueMapping>,
    pub default_value: Option<String>,
}
