//! Integration tests for rewriting whole mod modules against the Linux game.

mod common;

use common::{compatible_mod, incompatible_mod, rewriter, sprite_batch_mod, windows_mod};
use modshim::prelude::*;

fn entry_body(module: &Module) -> &MethodBody {
    module.type_defs[0].methods[0].body.as_ref().unwrap()
}

/// A Windows mod loses its XNA and `Stardew Valley` references, its field access becomes a
/// getter call and its `Vector2` local resolves against MonoGame.
#[test]
fn test_windows_mod_is_ported_to_linux() -> Result<()> {
    let mut module = windows_mod("ExampleMod.dll");
    let rewriter = rewriter();
    let mut session = RewriteSession::new(module.name.clone());

    assert!(rewriter.map().is_platform_changed(&module));
    assert!(rewriter.rewrite(&mut module, &mut session)?);

    assert!(!module.references_assembly("Stardew Valley"));
    assert!(!module.references_assembly("Microsoft.Xna.Framework"));
    assert!(module.references_assembly("StardewValley"));
    assert!(module.references_assembly("MonoGame.Framework"));
    assert!(module.dangling_scopes().is_empty());
    assert!(module.field_refs.is_empty());

    let body = entry_body(&module);
    assert_eq!(body.instructions[0].opcode, OpCode::Call);
    let getter = module
        .method_ref(body.instructions[0].method().unwrap())
        .unwrap();
    assert_eq!(getter.name, "get_player");

    let vector = match &body.locals[1] {
        TypeSig::ValueType(id) => *id,
        other => panic!("unexpected local {other:?}"),
    };
    let scope = module.type_assembly(vector).unwrap();
    assert_eq!(module.assembly_ref(scope).unwrap().name, "MonoGame.Framework");

    assert!(session.events().iter().any(|event| matches!(
        event,
        RewriteEvent::AssemblyRemoved(name) if name == "Stardew Valley"
    )));
    assert!(session.events().iter().any(|event| matches!(
        event,
        RewriteEvent::RuleApplied { noun_phrase, location }
            if noun_phrase == "Game1.player field" && location == "ExampleMod.ModEntry.Entry"
    )));
    Ok(())
}

/// Calls into `SpriteBatch` from another platform go through the facade type.
#[test]
fn test_sprite_batch_calls_use_the_facade() -> Result<()> {
    let mut module = sprite_batch_mod();
    let rewriter = rewriter();
    let mut session = RewriteSession::new(module.name.clone());

    assert!(rewriter.rewrite(&mut module, &mut session)?);

    let body = entry_body(&module);
    let draw = module
        .method_ref(body.instructions[2].method().unwrap())
        .unwrap();
    assert_eq!(draw.name, "Draw");
    let facade = draw.declaring.definition().unwrap();
    assert_eq!(
        module.type_full_name(facade),
        "StardewModdingAPI.Framework.RewriteFacades.SpriteBatchMethods"
    );
    assert!(module.references_assembly("StardewModdingAPI"));
    assert!(module.references_assembly("MonoGame.Framework"));
    assert!(!module.references_assembly("Microsoft.Xna.Framework.Graphics"));
    Ok(())
}

/// Mods built for this platform are left alone, including the `SpriteBatch` rule that only
/// applies across platforms.
#[test]
fn test_compatible_mod_is_untouched() -> Result<()> {
    let mut module = compatible_mod();
    let before = module.clone();
    let rewriter = rewriter();
    let mut session = RewriteSession::new(module.name.clone());

    assert!(!rewriter.map().is_platform_changed(&module));
    assert!(!rewriter.rewrite(&mut module, &mut session)?);
    assert_eq!(module, before);
    assert!(session.events().is_empty());
    Ok(())
}

/// Every use of a removed API is reported, not just the first one.
#[test]
fn test_incompatible_mod_lists_every_use() {
    let mut module = incompatible_mod();
    let before = module.clone();
    let rewriter = rewriter();
    let mut session = RewriteSession::new(module.name.clone());

    match rewriter.rewrite(&mut module, &mut session) {
        Err(Error::Incompatible(rejection)) => {
            assert_eq!(rejection.module, "Broken.dll");
            assert_eq!(
                rejection.noun_phrases(),
                vec!["GameLocation.transferDataFromSavedLocation method"]
            );
            let locations: Vec<&str> = rejection
                .reasons
                .iter()
                .map(|reason| reason.location.as_str())
                .collect();
            assert_eq!(
                locations,
                vec!["ExampleMod.ModEntry.Load", "ExampleMod.ModEntry.Reload"]
            );
            assert!(rejection
                .to_string()
                .contains("GameLocation.transferDataFromSavedLocation method"));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(module, before);
}

/// Rewriting a rewritten mod changes nothing.
#[test]
fn test_rewrite_is_idempotent() -> Result<()> {
    let rewriter = rewriter();
    let mut module = windows_mod("ExampleMod.dll");
    assert!(rewriter.rewrite(&mut module, &mut RewriteSession::new("ExampleMod.dll"))?);
    let once = module.clone();

    let mut session = RewriteSession::new("ExampleMod.dll");
    assert!(!rewriter.rewrite(&mut module, &mut session)?);
    assert_eq!(module, once);
    assert!(session.events().is_empty());
    Ok(())
}

/// The same input always produces the same bytes.
#[test]
fn test_rewrite_is_deterministic() -> Result<()> {
    let rewriter = rewriter();
    let mut outputs = Vec::new();
    for _ in 0..3 {
        let bytes = windows_mod("ExampleMod.dll").to_bytes()?;
        let mut module = Module::from_bytes(&bytes)?;
        rewriter.rewrite(&mut module, &mut RewriteSession::new("ExampleMod.dll"))?;
        outputs.push(module.to_bytes()?);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
    Ok(())
}

/// A rewritten module survives encoding and decoding.
#[test]
fn test_rewritten_module_round_trips() -> Result<()> {
    let rewriter = rewriter();
    let mut module = windows_mod("ExampleMod.dll");
    rewriter.rewrite(&mut module, &mut RewriteSession::new("ExampleMod.dll"))?;

    let bytes = module.to_bytes()?;
    let decoded = Module::from_bytes(&bytes)?;
    assert_eq!(decoded.to_bytes()?, bytes);
    assert_eq!(decoded.assembly_refs, module.assembly_refs);
    assert!(!rewriter.map().is_platform_changed(&decoded));
    Ok(())
}
