use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters of a [`crate::ModLoader`], updated concurrently by every load.
#[derive(Debug, Default)]
pub struct LoaderStats {
    loaded: AtomicUsize,
    rewritten: AtomicUsize,
    unchanged: AtomicUsize,
    rejected: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    symbol_failures: AtomicUsize,
}

macro_rules! counters {
    ($($(#[$meta:meta])* $name:ident => $record:ident),* $(,)?) => {
        impl LoaderStats {
            $(
                $(#[$meta])*
                #[must_use]
                pub fn $name(&self) -> usize {
                    self.$name.load(Ordering::Relaxed)
                }

                pub(crate) fn $record(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counters! {
    /// Mods returned successfully, from any source
    loaded => record_loaded,
    /// Mods rewritten in this session
    rewritten => record_rewritten,
    /// Mods decoded and found to need no changes
    unchanged => record_unchanged,
    /// Mods rejected as incompatible
    rejected => record_rejected,
    /// Loads served from the cache
    cache_hits => record_cache_hit,
    /// Loads the cache could not serve
    cache_misses => record_cache_miss,
    /// Symbol files that could not be read or written
    symbol_failures => record_symbol_failure,
}
