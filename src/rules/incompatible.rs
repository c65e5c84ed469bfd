use std::fmt;

/// One construct in a mod that has no safe rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Incompatibility {
    /// Human-readable description of the construct, e.g.
    /// `GameLocation.transferDataFromSavedLocation method`
    pub noun_phrase: String,
    /// Where it was found, `Namespace.Type.Method`
    pub location: String,
}

impl Incompatibility {
    /// Create a new incompatibility.
    pub fn new(noun_phrase: impl Into<String>, location: impl Into<String>) -> Self {
        Incompatibility {
            noun_phrase: noun_phrase.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in {})", self.noun_phrase, self.location)
    }
}

/// Rejection of a whole mod module, carrying every incompatible construct found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompatibleModule {
    /// Module file name
    pub module: String,
    /// Every incompatible construct, in scan order
    pub reasons: Vec<Incompatibility>,
}

impl IncompatibleModule {
    /// Create a rejection.
    pub fn new(module: impl Into<String>, reasons: Vec<Incompatibility>) -> Self {
        IncompatibleModule {
            module: module.into(),
            reasons,
        }
    }

    /// Distinct noun phrases in first-seen order.
    #[must_use]
    pub fn noun_phrases(&self) -> Vec<&str> {
        let mut phrases: Vec<&str> = Vec::with_capacity(self.reasons.len());
        for reason in &self.reasons {
            if !phrases.contains(&reason.noun_phrase.as_str()) {
                phrases.push(&reason.noun_phrase);
            }
        }
        phrases
    }
}

impl fmt::Display for IncompatibleModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} can't be loaded because it uses {}, which is no longer available",
            self.module,
            self.noun_phrases().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lists_distinct_phrases() {
        let rejection = IncompatibleModule::new(
            "ExampleMod.dll",
            vec![
                Incompatibility::new(
                    "GameLocation.transferDataFromSavedLocation method",
                    "ExampleMod.ModEntry.Entry",
                ),
                Incompatibility::new(
                    "GameEvents.FirstUpdateTick event",
                    "ExampleMod.ModEntry.Entry",
                ),
                Incompatibility::new(
                    "GameLocation.transferDataFromSavedLocation method",
                    "ExampleMod.ModEntry.Load",
                ),
            ],
        );

        assert_eq!(
            rejection.to_string(),
            "ExampleMod.dll can't be loaded because it uses \
             GameLocation.transferDataFromSavedLocation method, GameEvents.FirstUpdateTick event, \
             which is no longer available"
        );
        assert_eq!(rejection.noun_phrases().len(), 2);
    }
}
