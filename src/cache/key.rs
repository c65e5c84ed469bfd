use sha1::{Digest, Sha1};

use crate::{
    cache::{identity::to_hex, MachineIdentity, SemanticVersion},
    Platform,
};

/// Everything a cached rewrite depends on.
///
/// A cache entry is only reused if all four components equal the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// SHA-1 of the mod's bytes, followed by its symbol bytes if it has any
    pub hash: String,
    /// Version of the rewriter that produced the entry
    pub tool_version: SemanticVersion,
    /// Platform the entry was rewritten for
    pub platform: Platform,
    /// Machine the entry was rewritten on
    pub machine: MachineIdentity,
}

impl CacheKey {
    /// Compute the key for a mod.
    #[must_use]
    pub fn compute(
        assembly: &[u8],
        symbols: Option<&[u8]>,
        tool_version: SemanticVersion,
        platform: Platform,
        machine: MachineIdentity,
    ) -> Self {
        CacheKey {
            hash: content_hash(assembly, symbols),
            tool_version,
            platform,
            machine,
        }
    }

    /// Name of the first component that differs from `other`, or `None` if the keys match.
    #[must_use]
    pub fn mismatch(&self, other: &CacheKey) -> Option<&'static str> {
        if self.hash != other.hash {
            Some("content hash")
        } else if self.tool_version != other.tool_version {
            Some("tool version")
        } else if self.platform != other.platform {
            Some("platform")
        } else if self.machine != other.machine {
            Some("machine identity")
        } else {
            None
        }
    }
}

/// SHA-1 of the assembly bytes followed by the symbol bytes, as lower-case hex.
#[must_use]
pub fn content_hash(assembly: &[u8], symbols: Option<&[u8]>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(assembly);
    if let Some(symbols) = symbols {
        hasher.update(symbols);
    }
    to_hex(&hasher.finalize())
}
