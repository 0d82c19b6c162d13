use crate::{
    Error,
    stream::{Reader, Writer},
};

use std::collections::HashMap;

/// Body codec for an externalizable class.
///
/// The wire format gives no length for an externalizable body; only the
/// user class knows where it ends, so decoding hands the stream to the
/// registered handler and keeps whatever bytes it consumed as the opaque
/// payload.
pub trait ExternalCodec: Send + Sync {
    fn decode(&self, reader: &mut Reader) -> Result<Vec<u8>, Error>;

    fn encode(&self, writer: &mut Writer, data: &[u8]) -> Result<(), Error> {
        writer.put_slice(data);
        Ok(())
    }
}

/// Built-in alias mappings for the flex messaging envelope classes.
///
/// These are always present so that command and remoting messages decode
/// to their short server-side class ids no matter what the deployment
/// registers on top.
const BUILTIN_MAPPINGS: &[(&str, &str)] = &[
    ("flex.messaging.messages.RemotingMessage", "RemotingMessage"),
    ("flex.messaging.messages.CommandMessage", "CommandMessage"),
    ("flex.messaging.messages.AsyncMessage", "AsyncMessage"),
    ("flex.messaging.messages.AcknowledgeMessage", "AcknowledgeMessage"),
    ("flex.messaging.messages.ErrorMessage", "ErrorMessage"),
    ("flex.messaging.io.ArrayCollection", "ArrayCollection"),
];

/// Bidirectional mapping between wire class aliases and server class ids,
/// plus the externalizable handler table.
///
/// This is an explicit object handed to the codecs rather than process
/// state; a deployment builds one at startup and shares it read-only.
pub struct TypeRegistry {
    to_class: HashMap<String, String>,
    to_alias: HashMap<String, String>,
    externals: HashMap<String, Box<dyn ExternalCodec>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            to_class: HashMap::new(),
            to_alias: HashMap::new(),
            externals: HashMap::new(),
        };

        registry.reset_map();
        registry
    }
}

impl TypeRegistry {
    /// Register a wire alias for a server class id, in both directions.
    pub fn set_mapping(&mut self, alias: &str, class: &str) {
        self.to_class.insert(alias.to_string(), class.to_string());
        self.to_alias.insert(class.to_string(), alias.to_string());
    }

    /// Map a name across the table, whichever side it appears on.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::TypeRegistry;
    ///
    /// let mut registry = TypeRegistry::default();
    /// registry.set_mapping("com.example.Contact", "Contact");
    ///
    /// assert_eq!(registry.get_mapped("com.example.Contact"), Some("Contact"));
    /// assert_eq!(registry.get_mapped("Contact"), Some("com.example.Contact"));
    /// assert_eq!(registry.get_mapped("Unknown"), None);
    /// ```
    pub fn get_mapped(&self, name: &str) -> Option<&str> {
        self.to_class
            .get(name)
            .or_else(|| self.to_alias.get(name))
            .map(|it| it.as_str())
    }

    /// Server class id for a wire alias; the alias itself when unmapped.
    pub fn class_of<'a>(&'a self, alias: &'a str) -> &'a str {
        self.to_class.get(alias).map(|it| it.as_str()).unwrap_or(alias)
    }

    /// Wire alias for a server class id; the class id itself when unmapped.
    pub fn alias_of<'a>(&'a self, class: &'a str) -> &'a str {
        self.to_alias.get(class).map(|it| it.as_str()).unwrap_or(class)
    }

    /// Drop all deployment mappings and reload the built-ins.
    pub fn reset_map(&mut self) {
        self.to_class.clear();
        self.to_alias.clear();

        for (alias, class) in BUILTIN_MAPPINGS {
            self.set_mapping(alias, class);
        }
    }

    /// Register the body codec for an externalizable class alias.
    pub fn set_external(&mut self, alias: &str, codec: Box<dyn ExternalCodec>) {
        self.externals.insert(alias.to_string(), codec);
    }

    pub fn external(&self, alias: &str) -> Option<&dyn ExternalCodec> {
        self.externals.get(alias).map(|it| it.as_ref())
    }
}
