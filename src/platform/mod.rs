//! Platform detection and the platform assembly map.
//!
//! The game ships against different framework assemblies per operating system: the Windows
//! build links the XNA framework and names its own assembly `Stardew Valley`, while the Linux
//! and macOS builds link MonoGame and name it `StardewValley`. A mod compiled on one platform
//! therefore references assemblies that do not exist on the other. [`PlatformAssemblyMap`]
//! captures, for the current [`Platform`], which assembly names must be stripped from a mod and
//! which assemblies replace them.

mod game;
mod map;

pub use game::{game_assembly_names, GameAssemblies};
pub use map::{PlatformAssemblyMap, TargetAssembly};

use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString};

use crate::{Error, Result};

/// Host platform, as far as it affects which framework assemblies are available.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, EnumCount, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Platform {
    /// Windows, running the XNA build on the .NET Framework
    Windows,
    /// Linux, running the MonoGame build on Mono
    Linux,
    /// macOS, running the MonoGame build on Mono
    #[strum(to_string = "Mac", serialize = "macos", serialize = "osx")]
    Mac,
}

impl Platform {
    /// Detect the platform the crate was compiled for.
    ///
    /// # Errors
    /// Returns [`Error::UnknownPlatform`] on operating systems the game does not run on.
    pub fn current() -> Result<Platform> {
        if cfg!(target_os = "windows") {
            Ok(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Ok(Platform::Mac)
        } else {
            Err(Error::UnknownPlatform(std::env::consts::OS.to_string()))
        }
    }

    /// Parse a platform name (`windows`, `linux`, `mac`, `macos`, `osx`; case insensitive).
    ///
    /// # Errors
    /// Returns [`Error::UnknownPlatform`] for any other value.
    pub fn parse(value: &str) -> Result<Platform> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::UnknownPlatform(value.to_string()))
    }

    /// `true` if the game runs on a Mono-style runtime on this platform.
    #[must_use]
    pub fn is_mono(self) -> bool {
        self != Platform::Windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn parse_names() {
        assert_eq!(Platform::parse("Windows").unwrap(), Platform::Windows);
        assert_eq!(Platform::parse("linux").unwrap(), Platform::Linux);
        assert_eq!(Platform::parse("MacOS").unwrap(), Platform::Mac);
        assert_eq!(Platform::parse("osx").unwrap(), Platform::Mac);
        assert!(matches!(
            Platform::parse("Android"),
            Err(Error::UnknownPlatform(name)) if name == "Android"
        ));
    }

    #[test]
    fn display_round_trips() {
        for platform in Platform::iter() {
            assert_eq!(Platform::parse(&platform.to_string()).unwrap(), platform);
        }
        assert_eq!(Platform::Mac.as_ref(), "Mac");
        assert_eq!(Platform::COUNT, 3);
    }

    #[test]
    fn mono_runtime() {
        assert!(!Platform::Windows.is_mono());
        assert!(Platform::Linux.is_mono());
        assert!(Platform::Mac.is_mono());
    }

    #[test]
    #[cfg(any(target_os = "windows", target_os = "linux", target_os = "macos"))]
    fn detects_host() {
        assert!(Platform::current().is_ok());
    }
}
