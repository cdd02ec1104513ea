//! Defines and enforces device, profile, resource, and command name
//! requirements.
//!
//! A name is one or more UTF-8 alphanumeric, dash, underscore, or dot
//! characters. This is the same newtype used for all four kinds of
//! name in the data model (device, profile, resource, command) since
//! they share an identical grammar and differ only in which map they
//! key.

use crate::Error;
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    fn is_valid_char(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.'
    }

    pub fn create(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::BadRequest(String::from("name is empty")));
        }
        if !s.chars().all(Name::is_valid_char) {
            return Err(Error::BadRequest(format!(
                "name {:?} contains an invalid character",
                s
            )));
        }
        Ok(Name(String::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::create(s)
    }
}

impl TryFrom<String> for Name {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Name::create(&s)
    }
}

impl From<Name> for String {
    fn from(n: Name) -> String {
        n.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(Name::create("sensor7").is_ok());
        assert!(Name::create("pump-1").is_ok());
        assert!(Name::create("living_room.temp").is_ok());
        assert!(Name::create("家-温度").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(Name::create("").is_err());
        assert!(Name::create("bad name").is_err());
        assert!(Name::create("bad/name").is_err());
        assert!(Name::create("emoji-\u{1F600}").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let n = Name::create("device-1").unwrap();
        assert_eq!("device-1", format!("{}", n));
        assert_eq!("device-1", String::from(n));
    }

    #[test]
    fn test_from_str() {
        let n: Name = "a.b".parse().unwrap();
        assert_eq!(n.as_str(), "a.b");
    }
}
