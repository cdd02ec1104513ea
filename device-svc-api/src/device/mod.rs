//! The device data model: names, addresses, resources, commands,
//! profiles, and the live registry entry (spec §3).

pub mod address;
pub mod command;
pub mod entry;
pub mod name;
pub mod profile;
pub mod resource;

pub use address::{DriverHandle, ProtocolAddress, ResourceAttrs};
pub use command::{Command, ResolvedRequest, ResourceOperation};
pub use entry::{AdminState, Device, DeviceEntry, DeviceHandle, OperatingState};
pub use name::Name;
pub use profile::Profile;
pub use resource::{Bounds, Direction, NumericTransform, PropertyValue, Resource, TypeCode, ValueMapping};
