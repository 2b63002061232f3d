//! Endpoint templates and concrete-path matching.
//!
//! Endpoints are `/`-separated templates where a segment of the form
//! `%{name}` binds any single path token. Matching never crosses a `/` and
//! rejects the broker wildcard characters `+` and `#`.

use crate::error::InterfaceError;

/// One segment of an endpoint template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal token that must compare equal.
    Literal(String),
    /// `%{name}` parameter accepting any single non-empty token.
    Parameter(String),
}

/// A parsed endpoint template such as `/%{sensor_id}/value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    raw: String,
    segments: Vec<Segment>,
}

impl Endpoint {
    /// Parse a template. Fails on empty segments, missing leading `/`,
    /// malformed parameters and wildcard characters.
    pub fn parse(raw: &str) -> Result<Self, InterfaceError> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| InterfaceError::schema(format!("endpoint {raw} must start with /")))?;
        if rest.is_empty() {
            return Err(InterfaceError::schema("endpoint must have at least one segment"));
        }

        let mut segments = Vec::new();
        for token in rest.split('/') {
            if token.is_empty() {
                return Err(InterfaceError::schema(format!(
                    "endpoint {raw} contains an empty segment"
                )));
            }
            if let Some(name) = token.strip_prefix("%{").and_then(|t| t.strip_suffix('}')) {
                if name.is_empty()
                    || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(InterfaceError::schema(format!(
                        "invalid parameter segment {token} in endpoint {raw}"
                    )));
                }
                segments.push(Segment::Parameter(name.to_string()));
            } else if token.contains(['%', '{', '}', '+', '#']) {
                return Err(InterfaceError::schema(format!(
                    "invalid characters in endpoint segment {token}"
                )));
            } else {
                segments.push(Segment::Literal(token.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template as written in the definition.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Whether a concrete path instantiates this template. Parameter
    /// segments accept any non-empty token without `/`, `+` or `#`.
    pub fn matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };
        let tokens: Vec<&str> = rest.split('/').collect();
        if tokens.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(tokens)
            .all(|(segment, token)| match segment {
                Segment::Literal(lit) => lit == token,
                Segment::Parameter(_) => !token.is_empty() && !token.contains(['+', '#']),
            })
    }

    /// Whether some concrete path could instantiate both templates. Used at
    /// load time to reject ambiguous mapping sets.
    pub fn overlaps(&self, other: &Endpoint) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| match (a, b) {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                // A parameter overlaps both literals and parameters.
                _ => true,
            })
    }

    /// Whether both templates share the same parent pattern, i.e. all
    /// segments but the last are pairwise compatible with parameter names
    /// ignored. Object-aggregated interfaces require this of every mapping.
    pub fn same_parent(&self, other: &Endpoint) -> bool {
        if self.segments.len() != other.segments.len() || self.segments.len() < 2 {
            return false;
        }
        let n = self.segments.len() - 1;
        self.segments[..n]
            .iter()
            .zip(&other.segments[..n])
            .all(|(a, b)| match (a, b) {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                (Segment::Parameter(_), Segment::Parameter(_)) => true,
                _ => false,
            })
    }

    /// The final segment when it is a literal. Object aggregates use it as
    /// the payload key for this mapping.
    pub fn leaf(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::Literal(lit)) => Some(lit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_and_parameter_segments() {
        let ep = Endpoint::parse("/%{sensor_id}/value").unwrap();
        assert_eq!(ep.depth(), 2);
        assert_eq!(
            ep.segments()[0],
            Segment::Parameter("sensor_id".to_string())
        );
        assert_eq!(ep.segments()[1], Segment::Literal("value".to_string()));
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(Endpoint::parse("no-slash").is_err());
        assert!(Endpoint::parse("/").is_err());
        assert!(Endpoint::parse("/a//b").is_err());
        assert!(Endpoint::parse("/a/%{}").is_err());
        assert!(Endpoint::parse("/a/%{bad-name}").is_err());
        assert!(Endpoint::parse("/a/half%{open").is_err());
        assert!(Endpoint::parse("/a/#").is_err());
        assert!(Endpoint::parse("/a/+").is_err());
    }

    #[test]
    fn matches_literal_instantiations() {
        let ep = Endpoint::parse("/%{id}/enabled").unwrap();
        assert!(ep.matches("/s1/enabled"));
        assert!(ep.matches("/anything/enabled"));
        assert!(!ep.matches("/s1/disabled"));
        assert!(!ep.matches("/s1/enabled/extra"));
        assert!(!ep.matches("/s1"));
        assert!(!ep.matches("s1/enabled"));
    }

    #[test]
    fn parameters_reject_wildcards_and_empty_tokens() {
        let ep = Endpoint::parse("/%{id}/value").unwrap();
        assert!(!ep.matches("/+/value"));
        assert!(!ep.matches("/#/value"));
        assert!(!ep.matches("//value"));
    }

    #[test]
    fn overlap_detection() {
        let a = Endpoint::parse("/%{id}/value").unwrap();
        let b = Endpoint::parse("/config/value").unwrap();
        let c = Endpoint::parse("/config/other").unwrap();
        let d = Endpoint::parse("/one/two/three").unwrap();
        assert!(a.overlaps(&b));
        assert!(!b.overlaps(&c));
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn parent_and_leaf_for_objects() {
        let x = Endpoint::parse("/%{id}/x").unwrap();
        let y = Endpoint::parse("/%{id}/y").unwrap();
        let z = Endpoint::parse("/other/z").unwrap();
        assert!(x.same_parent(&y));
        assert!(!x.same_parent(&z));
        assert_eq!(x.leaf(), Some("x"));
        let param_leaf = Endpoint::parse("/a/%{k}").unwrap();
        assert_eq!(param_leaf.leaf(), None);
    }
}
