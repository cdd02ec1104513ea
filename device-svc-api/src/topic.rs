//! The message-bus path-template grammar: compile, subscription
//! prefix derivation, and placeholder unification (spec §4.8, R3).
//!
//! Transport-independent: both the MQTT and Redis-Streams bindings in
//! `devicesvcd::bus` consume a `Template`, each doing their own
//! wildcard-character remap at the edge.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Component {
    Literal(String),
    Placeholder(String),
}

/// A compiled `'/'`-delimited path template whose components are
/// either literal strings or `{name}` placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    components: Vec<Component>,
    raw: String,
}

impl Template {
    /// Compiles a template string. Never fails: any component not
    /// shaped like `{name}` is treated as a literal.
    pub fn compile(spec: &str) -> Self {
        let components = spec
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| {
                if let Some(inner) = c.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Component::Placeholder(inner.to_string())
                } else {
                    Component::Literal(c.to_string())
                }
            })
            .collect();

        Template { components, raw: spec.to_string() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The literal components up to (not including) the first
    /// placeholder, joined with `/`. This is the MQTT subscription
    /// prefix; a subscribe on the template becomes a subscribe on
    /// `"{prefix}/#"`.
    pub fn prefix(&self) -> String {
        self.components
            .iter()
            .take_while(|c| matches!(c, Component::Literal(_)))
            .map(|c| match c {
                Component::Literal(l) => l.as_str(),
                Component::Placeholder(_) => unreachable!(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The MQTT subscription filter: `prefix` with a trailing `#`
    /// wildcard appended.
    pub fn subscription(&self) -> String {
        let prefix = self.prefix();
        if prefix.is_empty() {
            "#".to_string()
        } else {
            format!("{}/#", prefix)
        }
    }

    /// Attempts to match a concrete topic against this template.
    /// Matches head-to-tail with the same component count; on
    /// success, returns the captured placeholder -> value map.
    pub fn unify(&self, topic: &str) -> Option<HashMap<String, String>> {
        let topic_parts: Vec<&str> = topic.split('/').filter(|c| !c.is_empty()).collect();
        if topic_parts.len() != self.components.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (component, actual) in self.components.iter().zip(topic_parts.iter()) {
            match component {
                Component::Literal(l) => {
                    if l != actual {
                        return None;
                    }
                }
                Component::Placeholder(name) => {
                    params.insert(name.clone(), actual.to_string());
                }
            }
        }
        Some(params)
    }

    /// Whether this template's prefix is a prefix of the given topic
    /// (used by the dispatcher to find candidate handlers before
    /// unifying, spec §4.8 "Dispatch").
    pub fn prefix_matches(&self, topic: &str) -> bool {
        let prefix = self.prefix();
        if prefix.is_empty() {
            return true;
        }
        topic == prefix || topic.starts_with(&format!("{}/", prefix))
    }

    /// Renders a concrete topic by substituting `params` for this
    /// template's placeholders, in order. Used to publish on a
    /// registered template and, in tests, to exercise the R3
    /// compile -> publish -> match round-trip.
    pub fn render(&self, params: &HashMap<String, String>) -> Option<String> {
        let mut out = Vec::with_capacity(self.components.len());
        for component in &self.components {
            match component {
                Component::Literal(l) => out.push(l.clone()),
                Component::Placeholder(name) => out.push(params.get(name)?.clone()),
            }
        }
        Some(out.join("/"))
    }
}

/// Remaps a topic between the MQTT `'/'` convention and the Redis key
/// convention (`'.'`), per spec §4.8. A trailing `#` wildcard (used
/// in subscription patterns) becomes `*`; both remaps are their own
/// inverse on well-formed input.
pub fn mqtt_topic_to_redis(topic: &str) -> String {
    let replaced = topic.replace('/', ".");
    if let Some(stripped) = replaced.strip_suffix('#') {
        format!("{}*", stripped)
    } else {
        replaced
    }
}

pub fn redis_topic_to_mqtt(topic: &str) -> String {
    let replaced = topic.replace('.', "/");
    if let Some(stripped) = replaced.strip_suffix('*') {
        format!("{}#", stripped)
    } else {
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r3_compile_publish_match_roundtrip() {
        let template = Template::compile("/api/v3/device/name/{name}/{cmd}");

        let mut params = HashMap::new();
        params.insert("name".to_string(), "sensor7".to_string());
        params.insert("cmd".to_string(), "read_all".to_string());

        let topic = template.render(&params).unwrap();
        let matched = template.unify(&topic).unwrap();

        assert_eq!(matched, params);
    }

    #[test]
    fn test_s6_scenario() {
        let template = Template::compile("/api/v3/device/name/{name}/{cmd}");
        let matched = template.unify("/api/v3/device/name/sensor7/read_all").unwrap();

        assert_eq!(matched.get("name"), Some(&"sensor7".to_string()));
        assert_eq!(matched.get("cmd"), Some(&"read_all".to_string()));
    }

    #[test]
    fn test_prefix_and_subscription() {
        let template = Template::compile("prefix/device/command/request/svc/{name}");
        assert_eq!(template.prefix(), "prefix/device/command/request/svc");
        assert_eq!(template.subscription(), "prefix/device/command/request/svc/#");
        assert!(template.prefix_matches("prefix/device/command/request/svc/d1"));
        assert!(!template.prefix_matches("other/topic"));
    }

    #[test]
    fn test_wrong_component_count_does_not_match() {
        let template = Template::compile("a/{x}");
        assert!(template.unify("a/b/c").is_none());
        assert!(template.unify("a").is_none());
    }

    #[test]
    fn test_redis_topic_remap_is_its_own_inverse() {
        let mqtt = "prefix/device/command/request/svc/#";
        let redis = mqtt_topic_to_redis(mqtt);
        assert_eq!(redis, "prefix.device.command.request.svc.*");
        assert_eq!(redis_topic_to_mqtt(&redis), mqtt);
    }
}
