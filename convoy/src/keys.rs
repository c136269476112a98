/// Redis key layout for one migration namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationKeys {
    namespace: String,
}

impl MigrationKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// String key holding the current lock owner's token.
    pub fn lock(&self) -> String {
        format!("{}:migrations:lock", self.namespace)
    }

    /// List of applied identifiers in commit order.
    pub fn history(&self) -> String {
        format!("{}:migrations:history", self.namespace)
    }

    /// Hash of identifier to JSON-encoded applied-migration record.
    pub fn records(&self) -> String {
        format!("{}:migrations:records", self.namespace)
    }

    /// Pattern matching every key in the namespace.
    pub fn pattern(&self) -> String {
        format!("{}:migrations:*", self.namespace)
    }
}
