use crate::Platform;

/// Framework assemblies shipped with the Windows build.
const XNA_ASSEMBLIES: &[&str] = &[
    "Stardew Valley",
    "Microsoft.Xna.Framework",
    "Microsoft.Xna.Framework.Game",
    "Microsoft.Xna.Framework.Graphics",
    "Microsoft.Xna.Framework.Xact",
];

/// Framework assemblies shipped with the Linux and macOS builds.
const MONOGAME_ASSEMBLIES: &[&str] = &["StardewValley", "MonoGame.Framework"];

/// The assembly names a mod may reference on the wrong platform, and their replacements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameAssemblies {
    /// Short names to strip from mods
    pub remove: &'static [&'static str],
    /// Short names of the assemblies that replace them, primary assembly first
    pub targets: &'static [&'static str],
}

/// The game's assembly names for a platform.
#[must_use]
pub fn game_assembly_names(platform: Platform) -> GameAssemblies {
    match platform {
        Platform::Windows => GameAssemblies {
            remove: MONOGAME_ASSEMBLIES,
            targets: XNA_ASSEMBLIES,
        },
        Platform::Linux | Platform::Mac => GameAssemblies {
            remove: XNA_ASSEMBLIES,
            targets: MONOGAME_ASSEMBLIES,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_mirrored() {
        let windows = game_assembly_names(Platform::Windows);
        let linux = game_assembly_names(Platform::Linux);
        assert_eq!(windows.remove, linux.targets);
        assert_eq!(windows.targets, linux.remove);
        assert_eq!(linux, game_assembly_names(Platform::Mac));
        assert_eq!(linux.targets[0], "StardewValley");
        assert_eq!(windows.targets[0], "Stardew Valley");
    }
}
