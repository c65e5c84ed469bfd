//! Rewrite rules: what the rewriter looks for in a mod and what it does about it.
//!
//! A [`RewriteRule`] pairs a pattern ([`RuleKind`]) with a human-readable noun phrase used in
//! diagnostics. Rules are plain data: matching lives in [`RewriteRule::is_match`] and
//! [`RewriteRule::is_match_definition`], rewriting in [`RewriteRule::rewrite`] and
//! [`RewriteRule::rewrite_definition`]. Two policies coexist:
//!
//! - **Hard failure** ([`RuleKind::RemovedField`], [`RuleKind::RemovedMethod`],
//!   [`RuleKind::RemovedEvent`], [`RuleKind::RemovedType`]): a match rejects the whole mod with
//!   an [`IncompatibleModule`] naming the construct.
//! - **Transform** ([`RuleKind::FieldToProperty`], [`RuleKind::ReplaceType`],
//!   [`RuleKind::RedirectMethodParent`]): the matched instruction is replaced in place by an
//!   equivalent sequence with the same stack shape.
//!
//! # Example
//!
//! ```rust
//! use modshim::prelude::*;
//!
//! let rules = RuleSet::new()
//!     .with(RewriteRule::removed_method("StardewValley.Farmer", "addQuest"))
//!     .with(RewriteRule::field_to_property("StardewValley.Game1", "player", "player"));
//!
//! assert_eq!(rules.len(), 2);
//! assert_eq!(rules.iter().next().unwrap().noun_phrase, "Farmer.addQuest method");
//! ```

mod incompatible;
mod matcher;
mod rewrite;

pub use incompatible::{Incompatibility, IncompatibleModule};

/// A type a rule redirects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTarget {
    /// Namespace of the replacement type
    pub namespace: String,
    /// Simple name of the replacement type
    pub name: String,
    /// Short name of the assembly defining it
    pub assembly: String,
}

impl TypeTarget {
    /// Create a new target.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        assembly: impl Into<String>,
    ) -> Self {
        TypeTarget {
            namespace: namespace.into(),
            name: name.into(),
            assembly: assembly.into(),
        }
    }

    /// `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// The pattern a rule matches and the action it takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// A field that became a property; accesses are rewritten to accessor calls
    FieldToProperty {
        /// Full name of the declaring type
        type_name: String,
        /// Field name
        field_name: String,
        /// Property name, giving `get_{name}` and `set_{name}`
        property_name: String,
    },
    /// Every reference to one type is replaced by another type
    ReplaceType {
        /// Full name of the replaced type
        from: String,
        /// Replacement type
        to: TypeTarget,
    },
    /// Calls to methods of a type are redirected to a facade type with compatible overloads
    RedirectMethodParent {
        /// Full name of the original declaring type
        from_type: String,
        /// Facade type
        to: TypeTarget,
        /// Only redirect this method, or every method when `None`
        method_name: Option<String>,
    },
    /// A field that no longer exists
    RemovedField {
        /// Full name of the declaring type
        type_name: String,
        /// Field name
        field_name: String,
    },
    /// A method that no longer exists
    RemovedMethod {
        /// Full name of the declaring type
        type_name: String,
        /// Method name
        method_name: String,
    },
    /// An event that no longer exists; matches its `add_` and `remove_` accessors
    RemovedEvent {
        /// Full name of the declaring type
        type_name: String,
        /// Event name
        event_name: String,
    },
    /// A type that no longer exists
    RemovedType {
        /// Full name of the type
        type_name: String,
    },
}

/// A matcher and rewriter pair targeting one incompatible member or type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RewriteRule {
    /// What to match and how to rewrite it
    pub kind: RuleKind,
    /// Description used in diagnostics and rejection messages
    pub noun_phrase: String,
    /// Only match mods compiled against another platform's assemblies
    pub only_if_platform_changed: bool,
    /// Type rules also match calls and field accesses whose signature exposes the type
    pub widen_to_signature: bool,
}

/// Last segment of a dotted type name: `StardewValley.Game1` gives `Game1`.
fn short_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

impl RewriteRule {
    fn with_kind(kind: RuleKind, noun_phrase: String) -> Self {
        RewriteRule {
            kind,
            noun_phrase,
            only_if_platform_changed: false,
            widen_to_signature: false,
        }
    }

    /// Rewrite accesses of `type_name.field_name` into calls of the property accessors.
    pub fn field_to_property(
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        property_name: impl Into<String>,
    ) -> Self {
        let type_name = type_name.into();
        let field_name = field_name.into();
        let noun_phrase = format!("{}.{} field", short_name(&type_name), field_name);
        Self::with_kind(
            RuleKind::FieldToProperty {
                type_name,
                field_name,
                property_name: property_name.into(),
            },
            noun_phrase,
        )
    }

    /// Replace every reference to `from` with `to`, including method signatures and locals.
    pub fn replace_type(from: impl Into<String>, to: TypeTarget) -> Self {
        let from = from.into();
        let noun_phrase = format!("{from} type");
        let mut rule = Self::with_kind(RuleKind::ReplaceType { from, to }, noun_phrase);
        rule.widen_to_signature = true;
        rule
    }

    /// Redirect calls to methods of `from_type` to the facade type `to`.
    pub fn redirect_method_parent(from_type: impl Into<String>, to: TypeTarget) -> Self {
        let from_type = from_type.into();
        let noun_phrase = format!("{} methods", short_name(&from_type));
        Self::with_kind(
            RuleKind::RedirectMethodParent {
                from_type,
                to,
                method_name: None,
            },
            noun_phrase,
        )
    }

    /// Reject mods accessing `type_name.field_name`.
    pub fn removed_field(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let field_name = field_name.into();
        let noun_phrase = format!("{}.{} field", short_name(&type_name), field_name);
        Self::with_kind(
            RuleKind::RemovedField {
                type_name,
                field_name,
            },
            noun_phrase,
        )
    }

    /// Reject mods calling `type_name.method_name`.
    pub fn removed_method(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let method_name = method_name.into();
        let noun_phrase = format!("{}.{} method", short_name(&type_name), method_name);
        Self::with_kind(
            RuleKind::RemovedMethod {
                type_name,
                method_name,
            },
            noun_phrase,
        )
    }

    /// Reject mods subscribing to or unsubscribing from `type_name.event_name`.
    pub fn removed_event(type_name: impl Into<String>, event_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let event_name = event_name.into();
        let noun_phrase = format!("{}.{} event", short_name(&type_name), event_name);
        Self::with_kind(
            RuleKind::RemovedEvent {
                type_name,
                event_name,
            },
            noun_phrase,
        )
    }

    /// Reject mods referencing `type_name`.
    pub fn removed_type(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let noun_phrase = format!("{type_name} type");
        Self::with_kind(RuleKind::RemovedType { type_name }, noun_phrase)
    }

    /// Override the noun phrase.
    #[must_use]
    pub fn with_noun_phrase(mut self, noun_phrase: impl Into<String>) -> Self {
        self.noun_phrase = noun_phrase.into();
        self
    }

    /// Only match mods compiled against another platform's assemblies.
    #[must_use]
    pub fn only_if_platform_changed(mut self) -> Self {
        self.only_if_platform_changed = true;
        self
    }

    /// Also match calls and field accesses whose signature exposes the type.
    #[must_use]
    pub fn widened(mut self) -> Self {
        self.widen_to_signature = true;
        self
    }

    /// Restrict a [`RuleKind::RedirectMethodParent`] rule to one method name.
    #[must_use]
    pub fn for_method(mut self, name: impl Into<String>) -> Self {
        if let RuleKind::RedirectMethodParent { method_name, .. } = &mut self.kind {
            *method_name = Some(name.into());
        }
        self
    }

    /// `true` if a match always rejects the mod.
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self.kind,
            RuleKind::RemovedField { .. }
                | RuleKind::RemovedMethod { .. }
                | RuleKind::RemovedEvent { .. }
                | RuleKind::RemovedType { .. }
        )
    }
}

/// An ordered collection of rules, shared read-only by every rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
}

impl RuleSet {
    /// An empty rule set.
    #[must_use]
    pub fn new() -> Self {
        RuleSet { rules: Vec::new() }
    }

    /// Add a rule.
    #[must_use]
    pub fn with(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a rule.
    pub fn push(&mut self, rule: RewriteRule) {
        self.rules.push(rule);
    }

    /// Rules in evaluation order.
    pub fn iter(&self) -> std::slice::Iter<'_, RewriteRule> {
        self.rules.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The rules for the game's known API changes.
    #[must_use]
    pub fn stardew_valley() -> Self {
        RuleSet::new()
            .with(RewriteRule::removed_method(
                "StardewValley.GameLocation",
                "transferDataFromSavedLocation",
            ))
            .with(RewriteRule::field_to_property(
                "StardewValley.Game1",
                "player",
                "player",
            ))
            .with(RewriteRule::field_to_property(
                "StardewValley.Game1",
                "currentLocation",
                "currentLocation",
            ))
            .with(RewriteRule::removed_event(
                "StardewModdingAPI.Events.GameEvents",
                "FirstUpdateTick",
            ))
            .with(RewriteRule::removed_type("StardewModdingAPI.Events.ContentEvents").widened())
            .with(
                RewriteRule::redirect_method_parent(
                    "Microsoft.Xna.Framework.Graphics.SpriteBatch",
                    TypeTarget::new(
                        "StardewModdingAPI.Framework.RewriteFacades",
                        "SpriteBatchMethods",
                        "StardewModdingAPI",
                    ),
                )
                .only_if_platform_changed(),
            )
    }
}

impl FromIterator<RewriteRule> for RuleSet {
    fn from_iter<T: IntoIterator<Item = RewriteRule>>(iter: T) -> Self {
        RuleSet {
            rules: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a RewriteRule;
    type IntoIter = std::slice::Iter<'a, RewriteRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noun_phrases() {
        assert_eq!(
            RewriteRule::removed_method(
                "StardewValley.GameLocation",
                "transferDataFromSavedLocation"
            )
            .noun_phrase,
            "GameLocation.transferDataFromSavedLocation method"
        );
        assert_eq!(
            RewriteRule::removed_event("StardewModdingAPI.Events.GameEvents", "FirstUpdateTick")
                .noun_phrase,
            "GameEvents.FirstUpdateTick event"
        );
        assert_eq!(
            RewriteRule::removed_type("StardewModdingAPI.Events.ContentEvents").noun_phrase,
            "StardewModdingAPI.Events.ContentEvents type"
        );
        assert_eq!(
            RewriteRule::removed_field("Game1", "version")
                .with_noun_phrase("Game1.version field (use Game1.GetVersionString)")
                .noun_phrase,
            "Game1.version field (use Game1.GetVersionString)"
        );
    }

    #[test]
    fn policies() {
        assert!(RewriteRule::removed_type("A.B").is_hard_failure());
        assert!(!RewriteRule::field_to_property("A.B", "c", "C").is_hard_failure());
        let replace = RewriteRule::replace_type("A.B", TypeTarget::new("C", "D", "E"));
        assert!(replace.widen_to_signature);

        let redirect = RewriteRule::redirect_method_parent("A.B", TypeTarget::new("C", "D", "E"))
            .for_method("Draw")
            .only_if_platform_changed();
        assert!(redirect.only_if_platform_changed);
        assert!(matches!(
            redirect.kind,
            RuleKind::RedirectMethodParent { method_name: Some(ref name), .. } if name == "Draw"
        ));
    }

    #[test]
    fn default_rules() {
        let rules = RuleSet::stardew_valley();
        assert_eq!(rules.len(), 6);
        assert_eq!(rules.iter().filter(|rule| rule.is_hard_failure()).count(), 3);
        assert_eq!(TypeTarget::new("", "Global", "A").full_name(), "Global");
    }
}
