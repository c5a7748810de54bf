//! Client session identity.

use std::fmt;

use uuid::Uuid;

/// Identifies one WebSocket client for the lifetime of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_distinct() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn test_display_is_short_prefix_of_uuid() {
        let id = ClientId::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), 8);
        assert!(id.as_uuid().simple().to_string().starts_with(&shown));
    }
}
