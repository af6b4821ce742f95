//! `ChannelUri`: the `aeron:udp?...` string surface from the design notes,
//! parsed into a structured, immutable value. Mutators (`with_session_id`,
//! ...) return a new value rather than mutating in place, matching the data
//! model's "immutable; mutators return new values" contract.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, ErrorKind};

const SCHEME: &str = "aeron:udp";

/// A structured, normalized representation of a channel endpoint address.
///
/// Equality and hashing are defined on the normalized key/value map, not the
/// original string, so two URIs that differ only in key order or whitespace
/// compare equal -- this is what the data model calls "equality by normalized
/// string".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelUri {
    params: BTreeMap<String, String>,
}

impl ChannelUri {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let rest = raw.strip_prefix(SCHEME).ok_or_else(|| {
            CoreError::new(
                ErrorKind::Other,
                format!("channel uri must start with `{SCHEME}`: {raw}"),
            )
        })?;
        let rest = rest.strip_prefix('?').unwrap_or(rest);

        let mut params = BTreeMap::new();
        if !rest.is_empty() {
            for pair in rest.split('|') {
                let mut parts = pair.splitn(2, '=');
                let key = parts.next().unwrap_or_default().trim();
                if key.is_empty() {
                    continue;
                }
                let value = parts.next().unwrap_or_default().trim();
                params.insert(key.to_owned(), value.to_owned());
            }
        }

        let uri = Self { params };
        // A dynamic-MDC publication channel (the server's reverse
        // publication) deliberately has no `endpoint` -- its destination is
        // learned at runtime from the matching image, not named up front.
        if uri.endpoint().is_none() && !(uri.control().is_some() && uri.control_mode_dynamic()) {
            return Err(CoreError::new(
                ErrorKind::Other,
                format!("channel uri must carry either `endpoint` or a dynamic `control`: {raw}"),
            ));
        }
        Ok(uri)
    }

    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        let mut params = BTreeMap::new();
        params.insert("endpoint".to_owned(), endpoint.into());
        Self { params }
    }

    /// Builds a dynamic-MDC channel with no fixed endpoint: `control-mode=dynamic`
    /// plus the given control-endpoint, used for the server's reverse
    /// publication whose destination is filled in once the client's image
    /// is observed (§4.F/§4.G, §9's "session-id rendezvous").
    pub fn for_dynamic_control(control: impl Into<String>) -> Self {
        let mut params = BTreeMap::new();
        params.insert("control".to_owned(), control.into());
        params.insert("control-mode".to_owned(), "dynamic".to_owned());
        Self { params }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.params.get("endpoint").map(String::as_str)
    }

    pub fn control(&self) -> Option<&str> {
        self.params.get("control").map(String::as_str)
    }

    pub fn control_mode_dynamic(&self) -> bool {
        self.params.get("control-mode").map(String::as_str) == Some("dynamic")
    }

    pub fn session_id(&self) -> Option<i32> {
        self.params.get("session-id").and_then(|v| v.parse().ok())
    }

    pub fn term_length(&self) -> Option<usize> {
        self.params.get("term-length").and_then(|v| v.parse().ok())
    }

    fn with_param(&self, key: &str, value: impl Into<String>) -> Self {
        let mut params = self.params.clone();
        params.insert(key.to_owned(), value.into());
        Self { params }
    }

    pub fn with_session_id(&self, session_id: i32) -> Self {
        self.with_param("session-id", session_id.to_string())
    }

    pub fn with_control(&self, control: impl Into<String>) -> Self {
        self.with_param("control", control.into()).with_param("control-mode", "dynamic")
    }

    pub fn with_term_length(&self, term_length: usize) -> Self {
        self.with_param("term-length", term_length.to_string())
    }
}

impl fmt::Display for ChannelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}?")?;
        let mut first = true;
        for (key, value) in &self.params {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_full_grammar() {
        let uri = ChannelUri::parse(
            "aeron:udp?endpoint=127.0.0.1:9000|control=127.0.0.1:9001|control-mode=dynamic|session-id=42|term-length=65536",
        )
        .expect("parse");
        assert_eq!(uri.endpoint(), Some("127.0.0.1:9000"));
        assert_eq!(uri.control(), Some("127.0.0.1:9001"));
        assert!(uri.control_mode_dynamic());
        assert_eq!(uri.session_id(), Some(42));
        assert_eq!(uri.term_length(), Some(65536));
    }

    #[test]
    fn key_order_does_not_affect_equality() {
        let a = ChannelUri::parse("aeron:udp?endpoint=127.0.0.1:9000|session-id=1").unwrap();
        let b = ChannelUri::parse("aeron:udp?session-id=1|endpoint=127.0.0.1:9000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        assert!(ChannelUri::parse("aeron:udp?session-id=1").is_err());
    }

    #[test]
    fn dynamic_control_channel_needs_no_endpoint() {
        let uri = ChannelUri::for_dynamic_control("127.0.0.1:9001").with_session_id(7);
        assert_eq!(uri.endpoint(), None);
        assert_eq!(uri.control(), Some("127.0.0.1:9001"));
        assert!(uri.control_mode_dynamic());

        let reparsed = ChannelUri::parse(&uri.to_string()).expect("dynamic control channel parses");
        assert_eq!(reparsed, uri);
    }

    #[test]
    fn with_session_id_is_immutable() {
        let base = ChannelUri::for_endpoint("127.0.0.1:9000");
        let derived = base.with_session_id(7);
        assert_eq!(base.session_id(), None);
        assert_eq!(derived.session_id(), Some(7));
    }

    #[test]
    fn round_trips_through_display() {
        let uri = ChannelUri::for_endpoint("127.0.0.1:9000").with_session_id(5);
        let rendered = uri.to_string();
        let reparsed = ChannelUri::parse(&rendered).unwrap();
        assert_eq!(uri, reparsed);
    }

    proptest! {
        #[test]
        fn for_endpoint_with_session_id_round_trips_for_any_port_and_session(
            port in 1u16..=65535,
            session_id in any::<i32>(),
        ) {
            let uri = ChannelUri::for_endpoint(format!("127.0.0.1:{port}")).with_session_id(session_id);
            let reparsed = ChannelUri::parse(&uri.to_string()).expect("a uri this module built must reparse");
            prop_assert_eq!(&reparsed, &uri);
            prop_assert_eq!(reparsed.session_id(), Some(session_id));
        }
    }
}
