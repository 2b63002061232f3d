//! MQTT topic layout.
//!
//! Every topic hangs off the `{realm}/{device_id}` base:
//!
//! - `{base}/{interface}{path}` carries data for one mapping
//! - `{base}/control/...` carries session control messages
//!
//! Interface names never contain `/` and mapping paths always start with
//! one, so the first `/` after the base splits the two unambiguously.

/// Payload published on the `emptyCache` control topic.
pub const EMPTY_CACHE_PAYLOAD: &[u8] = b"1";

/// Builds and parses topics for one device.
#[derive(Debug, Clone)]
pub struct TopicSpace {
    base: String,
}

/// A classified incoming topic, borrowed from the raw topic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingTopic<'a> {
    /// A control message; carries the part after `control/`.
    Control(&'a str),
    /// A data message for `interface` at `path` (leading `/` included).
    Data { interface: &'a str, path: &'a str },
}

impl TopicSpace {
    pub fn new(realm: &str, device_id: &str) -> Self {
        Self {
            base: format!("{realm}/{device_id}"),
        }
    }

    /// The `{realm}/{device_id}` prefix shared by all topics.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Data topic for one mapping of `interface`.
    pub fn data(&self, interface: &str, path: &str) -> String {
        format!("{}/{interface}{path}", self.base)
    }

    /// Wildcard subscription covering every path of `interface`.
    pub fn interface_root(&self, interface: &str) -> String {
        format!("{}/{interface}/#", self.base)
    }

    /// Control topic the broker uses to push the server-side property set.
    pub fn consumer_properties(&self) -> String {
        format!("{}/control/consumer/properties", self.base)
    }

    /// Control topic announcing the device-side property set.
    pub fn producer_properties(&self) -> String {
        format!("{}/control/producer/properties", self.base)
    }

    /// Control topic asking the broker to resend the full device state.
    pub fn empty_cache(&self) -> String {
        format!("{}/control/emptyCache", self.base)
    }

    /// Classify an incoming topic. Returns `None` for topics outside this
    /// device's base or without a mapping path.
    pub fn parse<'a>(&self, topic: &'a str) -> Option<IncomingTopic<'a>> {
        let rest = topic.strip_prefix(self.base.as_str())?;
        let rest = rest.strip_prefix('/')?;
        if let Some(control) = rest.strip_prefix("control/") {
            return Some(IncomingTopic::Control(control));
        }
        let slash = rest.find('/')?;
        if slash == 0 || slash == rest.len() - 1 {
            return None;
        }
        Some(IncomingTopic::Data {
            interface: &rest[..slash],
            path: &rest[slash..],
        })
    }
}

/// Encode a set of `interface` + `path` pairs for the property control
/// topics. Entries are `;`-joined `interface/path` strings; the path's
/// leading `/` doubles as the separator.
pub fn encode_property_paths<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let joined = entries
        .into_iter()
        .map(|(interface, path)| format!("{interface}{path}"))
        .collect::<Vec<_>>()
        .join(";");
    joined.into_bytes()
}

/// Decode a property control payload into `(interface, path)` pairs.
/// Malformed entries are skipped.
pub fn decode_property_paths(payload: &[u8]) -> Vec<(String, String)> {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Vec::new();
    };
    text.split(';')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let slash = entry.find('/')?;
            if slash == 0 {
                return None;
            }
            Some((entry[..slash].to_string(), entry[slash..].to_string()))
        })
        .collect()
}
