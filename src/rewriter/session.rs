use std::{collections::HashSet, fmt};

use log::trace;

/// Something the rewriter did to a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteEvent {
    /// A reference to a removed assembly was dropped
    AssemblyRemoved(String),
    /// A reference to a target assembly was added
    AssemblyAdded(String),
    /// A type reference was re-scoped
    ScopeRedirected {
        /// Full name of the type
        type_name: String,
        /// Short name of the assembly it now resolves against
        assembly: String,
    },
    /// A transform rule rewrote an instruction or method definition
    RuleApplied {
        /// The rule's noun phrase
        noun_phrase: String,
        /// `Namespace.Type.Method`
        location: String,
    },
}

impl fmt::Display for RewriteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteEvent::AssemblyRemoved(name) => write!(f, "removed reference to {name}"),
            RewriteEvent::AssemblyAdded(name) => write!(f, "added reference to {name}"),
            RewriteEvent::ScopeRedirected {
                type_name,
                assembly,
            } => write!(f, "redirected {type_name} to {assembly}"),
            RewriteEvent::RuleApplied {
                noun_phrase,
                location,
            } => write!(f, "rewrote {noun_phrase} in {location}"),
        }
    }
}

/// State owned by the rewrite of one module.
///
/// Every rewrite gets its own session, so concurrent rewrites never share mutable state.
#[derive(Debug, Clone, Default)]
pub struct RewriteSession {
    module_name: String,
    logged_types: HashSet<String>,
    events: Vec<RewriteEvent>,
}

impl RewriteSession {
    /// Start a session for the named module.
    pub fn new(module_name: impl Into<String>) -> Self {
        RewriteSession {
            module_name: module_name.into(),
            logged_types: HashSet::new(),
            events: Vec::new(),
        }
    }

    /// Name of the module being rewritten.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Record an event.
    pub fn record(&mut self, event: RewriteEvent) {
        self.events.push(event);
    }

    /// Record a scope redirect, tracing it the first time the type is seen.
    pub fn redirected(&mut self, type_name: &str, assembly: &str) {
        if self.logged_types.insert(type_name.to_string()) {
            trace!(
                "{}: redirected {} to {}",
                self.module_name,
                type_name,
                assembly
            );
        }
        self.record(RewriteEvent::ScopeRedirected {
            type_name: type_name.to_string(),
            assembly: assembly.to_string(),
        });
    }

    /// Events in the order they happened.
    #[must_use]
    pub fn events(&self) -> &[RewriteEvent] {
        &self.events
    }

    /// Consume the session, returning its events.
    #[must_use]
    pub fn into_events(self) -> Vec<RewriteEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_every_redirect() {
        let mut session = RewriteSession::new("Mod.dll");
        session.redirected("StardewValley.Game1", "StardewValley");
        session.redirected("StardewValley.Game1", "StardewValley");
        session.record(RewriteEvent::AssemblyRemoved("Stardew Valley".into()));

        assert_eq!(session.events().len(), 3);
        assert_eq!(session.logged_types.len(), 1);
        assert_eq!(
            session.events()[2].to_string(),
            "removed reference to Stardew Valley"
        );
    }
}
