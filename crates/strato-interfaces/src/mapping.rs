//! Mappings: one endpoint pattern with its type and transmission policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::InterfaceError;
use crate::interface::InterfaceKind;
use crate::value::{MappingType, Value};

/// Delivery guarantee requested for a mapping. Broker transports map this to
/// QoS 0/1/2; properties are always `Unique`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    #[default]
    Unreliable,
    Guaranteed,
    Unique,
}

impl Reliability {
    /// Numeric QoS level used by broker transports.
    pub fn qos(self) -> u8 {
        match self {
            Self::Unreliable => 0,
            Self::Guaranteed => 1,
            Self::Unique => 2,
        }
    }
}

/// What happens to datastream values the transport could not deliver yet.
/// Parsed for contract completeness; delivery buffering is the caller's
/// concern (the session never replays buffered messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    #[default]
    Discard,
    Volatile,
    Stored,
}

/// Raw mapping fields as they appear in the JSON definition. Unknown fields
/// are ignored to stay byte-compatible with the platform format.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MappingDef {
    pub endpoint: String,
    #[serde(rename = "type")]
    pub mapping_type: MappingType,
    pub explicit_timestamp: Option<bool>,
    pub reliability: Option<Reliability>,
    pub retention: Option<Retention>,
    pub allow_unset: Option<bool>,
    pub description: Option<String>,
    #[serde(rename = "doc")]
    pub documentation: Option<String>,
}

/// A validated mapping within an interface.
#[derive(Debug, Clone)]
pub struct Mapping {
    endpoint: Endpoint,
    mapping_type: MappingType,
    explicit_timestamp: bool,
    reliability: Reliability,
    retention: Retention,
    allow_unset: bool,
    description: Option<String>,
}

impl Mapping {
    pub(crate) fn from_def(def: MappingDef, kind: InterfaceKind) -> Result<Self, InterfaceError> {
        let endpoint = Endpoint::parse(&def.endpoint)?;

        let (reliability, retention) = match kind {
            InterfaceKind::Properties => {
                if def.explicit_timestamp.is_some()
                    || def.reliability.is_some()
                    || def.retention.is_some()
                {
                    return Err(InterfaceError::schema(format!(
                        "mapping {}: reliability, retention and explicit_timestamp have no meaning for properties",
                        def.endpoint
                    )));
                }
                // Properties are always delivered exactly once.
                (Reliability::Unique, Retention::Discard)
            }
            InterfaceKind::Datastream { .. } => {
                if def.allow_unset.is_some() {
                    return Err(InterfaceError::schema(format!(
                        "mapping {}: allow_unset has no meaning for datastreams",
                        def.endpoint
                    )));
                }
                (
                    def.reliability.unwrap_or_default(),
                    def.retention.unwrap_or_default(),
                )
            }
        };

        Ok(Self {
            endpoint,
            mapping_type: def.mapping_type,
            explicit_timestamp: def.explicit_timestamp.unwrap_or(false),
            reliability,
            retention,
            allow_unset: def.allow_unset.unwrap_or(false),
            description: def.description,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn mapping_type(&self) -> MappingType {
        self.mapping_type
    }

    pub fn explicit_timestamp(&self) -> bool {
        self.explicit_timestamp
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn allow_unset(&self) -> bool {
        self.allow_unset
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Timestamp policy: explicit-timestamp mappings require one, all others
    /// reject one.
    pub fn validate_timestamp(
        &self,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), InterfaceError> {
        match (self.explicit_timestamp, timestamp) {
            (true, None) => Err(InterfaceError::validation(format!(
                "timestamp required for {}",
                self.endpoint
            ))),
            (false, Some(_)) => Err(InterfaceError::validation(format!(
                "{} does not take an explicit timestamp",
                self.endpoint
            ))),
            _ => Ok(()),
        }
    }

    /// Type check for a payload value. The runtime shape must match the
    /// declared type exactly; the sole widening is integer values on a
    /// `double`/`doublearray` mapping. Doubles must be finite and arrays
    /// non-empty (an empty array is an empty payload, not a value).
    pub fn validate_value(&self, value: &Value) -> Result<(), InterfaceError> {
        let widened = matches!(
            (self.mapping_type, value),
            (MappingType::Double, Value::Integer(_))
                | (MappingType::DoubleArray, Value::IntegerArray(_))
        );
        if value.mapping_type() != self.mapping_type && !widened {
            return Err(InterfaceError::validation(format!(
                "{} is {} but a {} value was provided",
                self.endpoint,
                self.mapping_type,
                value.mapping_type()
            )));
        }
        if value.is_empty_array() {
            return Err(InterfaceError::validation(format!(
                "empty payload for {}",
                self.endpoint
            )));
        }
        if !value.is_finite() {
            return Err(InterfaceError::validation(format!(
                "non-finite double value for {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}
