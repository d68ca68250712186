use crate::error::{Error, Result};

/// Default key expression prefix for all bridge traffic.
pub const KEY_PREFIX: &str = "pnpbridge";

/// Builder for the key expressions of one bridge's device twin.
///
/// All keys live under a root of the form `<prefix>[/<scope>]/<device_id>`:
///
/// ```text
/// <root>/@/status                                   bridge status
/// <root>/@/interfaces                               registered interface set
/// <root>/@/components/<component>/alive             liveliness token
/// <root>/<component>/telemetry                      telemetry
/// <root>/<component>/properties/reported/<name>     reported properties
/// <root>/<component>/properties/desired/<name>      desired properties (inbound)
/// <root>/<component>/commands/<name>                commands (inbound)
/// <root>/<component>/commands/<name>/response       command responses
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinKeys {
    root: String,
}

impl TwinKeys {
    /// Create keys for a device under the default prefix.
    ///
    /// # Example
    /// ```
    /// use pnpbridge_common::keyexpr::TwinKeys;
    ///
    /// let keys = TwinKeys::new("gateway01").unwrap();
    /// assert_eq!(keys.status(), "pnpbridge/gateway01/@/status");
    /// ```
    pub fn new(device_id: &str) -> Result<Self> {
        Self::with_prefix(KEY_PREFIX, None, device_id)
    }

    /// Create keys with a custom prefix and an optional scope chunk.
    pub fn with_prefix(prefix: &str, scope: Option<&str>, device_id: &str) -> Result<Self> {
        validate_chunk(device_id)?;
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Err(Error::KeyExpr("key prefix cannot be empty".to_string()));
        }
        let root = match scope {
            Some(scope) => {
                validate_chunk(scope)?;
                format!("{}/{}/{}", prefix, scope, device_id)
            }
            None => format!("{}/{}", prefix, device_id),
        };
        Ok(Self { root })
    }

    /// The twin root key.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn status(&self) -> String {
        format!("{}/@/status", self.root)
    }

    pub fn interfaces(&self) -> String {
        format!("{}/@/interfaces", self.root)
    }

    pub fn component_alive(&self, component: &str) -> String {
        format!("{}/@/components/{}/alive", self.root, component)
    }

    pub fn telemetry(&self, component: &str) -> String {
        format!("{}/{}/telemetry", self.root, component)
    }

    pub fn reported_property(&self, component: &str, property: &str) -> String {
        format!("{}/{}/properties/reported/{}", self.root, component, property)
    }

    pub fn desired_property(&self, component: &str, property: &str) -> String {
        format!("{}/{}/properties/desired/{}", self.root, component, property)
    }

    pub fn command(&self, component: &str, command: &str) -> String {
        format!("{}/{}/commands/{}", self.root, component, command)
    }

    pub fn command_response(&self, component: &str, command: &str) -> String {
        format!("{}/{}/commands/{}/response", self.root, component, command)
    }

    /// Wildcard matching every inbound command of every component.
    ///
    /// Responses have one more chunk and are therefore not matched.
    pub fn commands_wildcard(&self) -> String {
        format!("{}/*/commands/*", self.root)
    }

    /// Wildcard matching every desired property of every component.
    pub fn desired_properties_wildcard(&self) -> String {
        format!("{}/*/properties/desired/*", self.root)
    }

    /// Parse an inbound key (command or desired property) under this root.
    ///
    /// Returns `None` for keys outside the root or with any other shape.
    pub fn parse_inbound<'a>(&self, key: &'a str) -> Option<InboundKey<'a>> {
        let rest = key.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        match parts[..] {
            [component, "commands", command] if component != "@" => Some(InboundKey::Command {
                component,
                command,
            }),
            [component, "properties", "desired", property] if component != "@" => {
                Some(InboundKey::DesiredProperty {
                    component,
                    property,
                })
            }
            _ => None,
        }
    }
}

/// An inbound twin key addressed to one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKey<'a> {
    Command {
        component: &'a str,
        command: &'a str,
    },
    DesiredProperty {
        component: &'a str,
        property: &'a str,
    },
}

/// Check that a value can be used as a single key expression chunk.
pub fn validate_chunk(chunk: &str) -> Result<()> {
    if chunk.is_empty() {
        return Err(Error::KeyExpr("key chunk cannot be empty".to_string()));
    }
    if chunk == "@" || chunk.contains(['/', '*', '$', '?', '#']) {
        return Err(Error::KeyExpr(format!(
            "'{}' is not a valid key chunk",
            chunk
        )));
    }
    Ok(())
}
