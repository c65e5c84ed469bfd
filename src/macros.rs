#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let _guard = lock!(entry_lock);
///  fs::rename(&temp, &target)?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for bailing out of a signature walk that nests too deeply
///
/// ```rust, ignore
///  check_depth!(depth);
/// ```
macro_rules! check_depth {
    ($depth:expr) => {
        if $depth > crate::module::MAX_SIGNATURE_DEPTH {
            return Err(crate::Error::RecursionLimit(crate::module::MAX_SIGNATURE_DEPTH));
        }
    };
}

/// Helper macro for declaring arena handles
///
/// ```rust, ignore
///  define_id!(
///      /// Index into the module's type reference table
///      TypeRefId
///  );
/// ```
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Create a handle from a zero-based table index.
            #[must_use]
            pub fn new(index: usize) -> Self {
                $name(index as u32)
            }

            /// The zero-based table index this handle refers to.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}
