//! Protocol address and resource-attribute maps (spec §3).
//!
//! Both are opaque string-keyed property bags handed to the driver's
//! `create_address`/`create_resource_attr` callbacks, which parse them
//! into their own driver-private handle. The core never interprets
//! the properties itself.

use crate::Value;
use std::collections::HashMap;

/// A mapping from protocol name (e.g. `"modbus-tcp"`) to a
/// string-keyed map of properties.
///
/// Two addresses are equal iff their (name -> property-map) mappings
/// are equal -- the derived `PartialEq` already gives this since
/// `HashMap<String, HashMap<String, Value>>`'s equality is exactly
/// that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolAddress(pub HashMap<String, HashMap<String, Value>>);

impl ProtocolAddress {
    pub fn new() -> Self {
        ProtocolAddress(HashMap::new())
    }

    pub fn protocol(&self, name: &str) -> Option<&HashMap<String, Value>> {
        self.0.get(name)
    }

    pub fn insert(&mut self, protocol: impl Into<String>, properties: HashMap<String, Value>) {
        self.0.insert(protocol.into(), properties);
    }
}

/// A string-keyed map of opaque properties attached to one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceAttrs(pub HashMap<String, Value>);

impl ResourceAttrs {
    pub fn new() -> Self {
        ResourceAttrs(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// An opaque, driver-minted token identifying a parsed protocol
/// address or resource attribute set. The core stores these alongside
/// the raw maps and hands them back to the driver's `free_*`
/// callbacks on teardown, never inspecting them itself.
pub type DriverHandle = std::sync::Arc<dyn std::any::Any + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_address_equality() {
        let mut a = ProtocolAddress::new();
        a.insert("modbus-tcp", HashMap::from([("host".into(), Value::from("10.0.0.1"))]));

        let mut b = ProtocolAddress::new();
        b.insert("modbus-tcp", HashMap::from([("host".into(), Value::from("10.0.0.1"))]));

        assert_eq!(a, b);

        b.insert("modbus-tcp", HashMap::from([("host".into(), Value::from("10.0.0.2"))]));
        assert_ne!(a, b);
    }
}
