//! Interface schema model.
//!
//! An [`Interface`] is the validated form of a JSON interface definition:
//! a versioned, owned contract listing the endpoint mappings a device and
//! the platform agree on. Construction performs every structural check so
//! the rest of the crate can treat an `Interface` as internally consistent.
//!
//! ## Validation
//!
//! - name: reverse-DNS style, 128 chars max;
//! - version: `0.0` is reserved and rejected, negatives are rejected;
//! - mappings: at least one, pairwise unambiguous (no two patterns can
//!   match the same concrete path);
//! - object aggregates: every mapping shares the same parent path, ends in
//!   a literal leaf, and carries identical transmission policies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InterfaceError;
use crate::mapping::{Mapping, MappingDef};
use crate::value::Value;

/// Which side produces data on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Device,
    Server,
}

/// How datastream mappings are published: one value at a time or the whole
/// object at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Individual,
    Object,
}

/// The two interface families. Closed on purpose: everything downstream
/// (validation, persistence, QoS) branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Datastream { aggregation: Aggregation },
    Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum InterfaceType {
    Datastream,
    // the platform format uses the plural, accept both spellings
    #[serde(alias = "property")]
    Properties,
}

/// Raw interface fields as they appear in the JSON definition.
#[derive(Debug, Clone, Deserialize)]
struct InterfaceDef {
    interface_name: String,
    version_major: i32,
    version_minor: i32,
    #[serde(rename = "type")]
    interface_type: InterfaceType,
    ownership: Ownership,
    aggregation: Option<Aggregation>,
    description: Option<String>,
    #[serde(default)]
    mappings: Vec<MappingDef>,
}

/// A validated interface.
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    version_major: i32,
    version_minor: i32,
    ownership: Ownership,
    kind: InterfaceKind,
    mappings: Vec<Mapping>,
    description: Option<String>,
}

impl Interface {
    /// Parses and validates a JSON interface definition.
    pub fn from_json(json: &str) -> Result<Self, InterfaceError> {
        let def: InterfaceDef = serde_json::from_str(json)?;
        Self::from_def(def)
    }

    fn from_def(def: InterfaceDef) -> Result<Self, InterfaceError> {
        validate_name(&def.interface_name)?;

        if def.version_major < 0 || def.version_minor < 0 {
            return Err(InterfaceError::schema(format!(
                "interface {}: versions must be non-negative",
                def.interface_name
            )));
        }
        if def.version_major == 0 && def.version_minor == 0 {
            return Err(InterfaceError::schema(format!(
                "interface {}: version 0.0 is reserved",
                def.interface_name
            )));
        }

        let kind = match def.interface_type {
            InterfaceType::Properties => {
                if def.aggregation == Some(Aggregation::Object) {
                    return Err(InterfaceError::schema(format!(
                        "interface {}: properties cannot be object-aggregated",
                        def.interface_name
                    )));
                }
                InterfaceKind::Properties
            }
            InterfaceType::Datastream => InterfaceKind::Datastream {
                aggregation: def.aggregation.unwrap_or_default(),
            },
        };

        if def.mappings.is_empty() {
            return Err(InterfaceError::schema(format!(
                "interface {}: at least one mapping is required",
                def.interface_name
            )));
        }

        let mappings = def
            .mappings
            .into_iter()
            .map(|m| Mapping::from_def(m, kind))
            .collect::<Result<Vec<_>, _>>()?;

        for (i, first) in mappings.iter().enumerate() {
            for second in &mappings[i + 1..] {
                if first.endpoint().overlaps(second.endpoint()) {
                    return Err(InterfaceError::AmbiguousMapping {
                        interface: def.interface_name,
                        first: first.endpoint().as_str().to_string(),
                        second: second.endpoint().as_str().to_string(),
                    });
                }
            }
        }

        let interface = Self {
            name: def.interface_name,
            version_major: def.version_major,
            version_minor: def.version_minor,
            ownership: def.ownership,
            kind,
            mappings,
            description: def.description,
        };

        if interface.is_aggregate_object() {
            interface.check_object_shape()?;
        }
        Ok(interface)
    }

    /// Object aggregates publish all leaves in one message, so the shape
    /// must make that well-defined: a shared parent path, literal leaf
    /// names and one transmission policy for the whole object.
    fn check_object_shape(&self) -> Result<(), InterfaceError> {
        let first = &self.mappings[0];
        for mapping in &self.mappings {
            let endpoint = mapping.endpoint();
            if endpoint.depth() < 2 {
                return Err(InterfaceError::schema(format!(
                    "interface {}: object mapping {} needs a parent path",
                    self.name, endpoint
                )));
            }
            if endpoint.leaf().is_none() {
                return Err(InterfaceError::schema(format!(
                    "interface {}: object mapping {} must end in a literal segment",
                    self.name, endpoint
                )));
            }
            if !endpoint.same_parent(first.endpoint()) {
                return Err(InterfaceError::schema(format!(
                    "interface {}: object mappings {} and {} have different parents",
                    self.name,
                    first.endpoint(),
                    endpoint
                )));
            }
            if mapping.explicit_timestamp() != first.explicit_timestamp()
                || mapping.reliability() != first.reliability()
            {
                return Err(InterfaceError::schema(format!(
                    "interface {}: object mappings must share timestamp and reliability settings",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_major(&self) -> i32 {
        self.version_major
    }

    pub fn version_minor(&self) -> i32 {
        self.version_minor
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn is_properties(&self) -> bool {
        matches!(self.kind, InterfaceKind::Properties)
    }

    pub fn is_server_owned(&self) -> bool {
        self.ownership == Ownership::Server
    }

    pub fn is_aggregate_object(&self) -> bool {
        matches!(
            self.kind,
            InterfaceKind::Datastream {
                aggregation: Aggregation::Object
            }
        )
    }

    /// Finds the single mapping whose endpoint pattern matches `path`.
    /// Ambiguity is impossible here: overlapping patterns are rejected at
    /// construction.
    pub fn mapping(&self, path: &str) -> Result<&Mapping, InterfaceError> {
        self.mappings
            .iter()
            .find(|m| m.endpoint().matches(path))
            .ok_or_else(|| InterfaceError::PathNotFound {
                interface: self.name.clone(),
                path: path.to_string(),
            })
    }

    /// Full outgoing check for an individual value: path resolution, type,
    /// finiteness and timestamp policy.
    pub fn validate_individual(
        &self,
        path: &str,
        value: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<&Mapping, InterfaceError> {
        if self.is_aggregate_object() {
            return Err(InterfaceError::AggregationMismatch {
                interface: self.name.clone(),
                path: path.to_string(),
                reason: "interface is object-aggregated, send the whole object".to_string(),
            });
        }
        let mapping = self.mapping(path)?;
        mapping.validate_value(value)?;
        if self.is_properties() {
            if timestamp.is_some() {
                return Err(InterfaceError::validation(format!(
                    "property {}{} does not take a timestamp",
                    self.name, path
                )));
            }
        } else {
            mapping.validate_timestamp(timestamp)?;
        }
        Ok(mapping)
    }

    /// Full outgoing check for an object payload sent on the common parent
    /// path. Every key must name a leaf, every leaf must be present and
    /// each value must type-check. Returns a representative mapping; the
    /// object shape guarantees its policies hold for all of them.
    pub fn validate_object(
        &self,
        parent: &str,
        values: &[(String, Value)],
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<&Mapping, InterfaceError> {
        if !self.is_aggregate_object() {
            return Err(InterfaceError::AggregationMismatch {
                interface: self.name.clone(),
                path: parent.to_string(),
                reason: "interface is not object-aggregated".to_string(),
            });
        }
        if values.is_empty() {
            return Err(InterfaceError::validation(format!(
                "empty object payload for {}{}",
                self.name, parent
            )));
        }
        for (key, value) in values {
            let path = format!("{}/{}", parent.trim_end_matches('/'), key);
            let mapping = self.mapping(&path).map_err(|_| {
                InterfaceError::AggregationMismatch {
                    interface: self.name.clone(),
                    path: parent.to_string(),
                    reason: format!("{key} is not part of the object"),
                }
            })?;
            mapping.validate_value(value)?;
        }
        for mapping in &self.mappings {
            // leaf() is Some for every mapping of a valid object interface
            let leaf = mapping.endpoint().leaf().unwrap_or_default();
            if !values.iter().any(|(key, _)| key == leaf) {
                return Err(InterfaceError::AggregationMismatch {
                    interface: self.name.clone(),
                    path: parent.to_string(),
                    reason: format!("object is missing {leaf}"),
                });
            }
        }
        let mapping = &self.mappings[0];
        mapping.validate_timestamp(timestamp)?;
        Ok(mapping)
    }

    /// Check for a value received from the platform. Types must match, but
    /// timestamps are accepted regardless of the mapping's declaration:
    /// remote senders are not held to the outgoing policy.
    pub fn validate_received(&self, path: &str, value: &Value) -> Result<&Mapping, InterfaceError> {
        let mapping = self.mapping(path)?;
        mapping.validate_value(value)?;
        Ok(mapping)
    }
}

impl FromStr for Interface {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{}",
            self.name, self.version_major, self.version_minor
        )
    }
}

fn validate_name(name: &str) -> Result<(), InterfaceError> {
    if name.is_empty() || name.len() > 128 {
        return Err(InterfaceError::schema(
            "interface name must be 1 to 128 characters".to_string(),
        ));
    }
    for segment in name.split('.') {
        let starts_alphabetic = segment.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        let body_ok = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !starts_alphabetic || !body_ok {
            return Err(InterfaceError::schema(format!(
                "interface name {name} is not a valid reverse-DNS name"
            )));
        }
    }
    Ok(())
}
