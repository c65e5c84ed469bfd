//! Shared fixtures for unit tests.
//!
//! The mods built here mirror the situations the loader meets in practice: a mod compiled
//! against the Windows build, one already compiled for the current platform, and one using an
//! API the game removed.

use std::collections::HashMap;

use uguid::{guid, Guid};

use crate::{
    module::{
        builder::ModuleBuilder,
        instruction::Operand,
        method::{MethodAttributes, MethodBody, MethodDef},
        opcodes::OpCode,
        references::{AssemblyRef, AssemblyVersion},
        signature::{MethodSig, TypeSig},
        types::TypeAttributes,
        Module,
    },
    platform::{game_assembly_names, PlatformAssemblyMap, TargetAssembly},
    symbols::{portable, SequencePoint, SourceSpan, SymbolData},
    Platform,
};

/// Debug header guid of every fixture mod.
pub const MOD_GUID: Guid = guid!("6f1c2d3e-4b5a-4978-8a6b-5c4d3e2f1a0b");

/// Linux map: Windows assembly names are removed, game and MonoGame types are known.
pub fn linux_map() -> PlatformAssemblyMap {
    let names = game_assembly_names(Platform::Linux);
    PlatformAssemblyMap::new(
        Platform::Linux,
        names.remove.iter().copied(),
        vec![
            TargetAssembly::new(AssemblyRef::new(
                "StardewValley",
                AssemblyVersion::new(1, 5, 6, 0),
            ))
            .with_types([
                "StardewValley.Game1",
                "StardewValley.Farmer",
                "StardewValley.GameLocation",
            ]),
            TargetAssembly::new(AssemblyRef::new(
                "MonoGame.Framework",
                AssemblyVersion::new(3, 7, 1, 189),
            ))
            .with_types([
                "Microsoft.Xna.Framework.Vector2",
                "Microsoft.Xna.Framework.Graphics.SpriteBatch",
            ]),
        ],
    )
}

/// Add a public static `void ModEntry.{name}()` to the builder's `ExampleMod.ModEntry` type.
pub fn entry(builder: &mut ModuleBuilder, name: &str, body: MethodBody) {
    let index = match builder
        .module()
        .type_defs
        .iter()
        .position(|type_def| type_def.name == "ModEntry")
    {
        Some(index) => index,
        None => builder.define_type("ExampleMod", "ModEntry", TypeAttributes::PUBLIC),
    };
    builder.define_method(
        index,
        MethodDef::new(
            name,
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSig::static_method(TypeSig::VOID, Vec::new()),
            Some(body),
        ),
    );
}

/// A mod built against the Windows game: reads `Game1.player` as a field and keeps a
/// `Vector2` local.
pub fn windows_mod() -> Module {
    let mut builder = ModuleBuilder::new("ExampleMod.dll");
    builder
        .assembly("ExampleMod", AssemblyVersion::new(1, 0, 0, 0))
        .debug(MOD_GUID, 1);
    let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
    let xna = builder.assembly_ref("Microsoft.Xna.Framework", AssemblyVersion::new(4, 0, 0, 0));
    let game1 = builder.type_ref(game, "StardewValley", "Game1");
    let farmer = builder.type_ref(game, "StardewValley", "Farmer");
    let vector = builder.type_ref(xna, "Microsoft.Xna.Framework", "Vector2");
    let player = builder.field_ref(TypeSig::Class(game1), "player", TypeSig::Class(farmer));

    let mut body = MethodBody::new();
    body.locals.push(TypeSig::ValueType(vector));
    body.push(OpCode::Ldsfld, Operand::Field(player));
    body.push(OpCode::Pop, Operand::None);
    body.push(OpCode::Ret, Operand::None);
    entry(&mut builder, "Entry", body);
    builder.build()
}

/// A mod built for the current platform that uses nothing the rules track.
pub fn compatible_mod() -> Module {
    let mut builder = ModuleBuilder::new("Compatible.dll");
    let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
    let farmer = builder.type_ref(game, "StardewValley", "Farmer");
    let add_quest = builder.method_ref(
        TypeSig::Class(farmer),
        "addQuest",
        MethodSig::instance(TypeSig::VOID, vec![TypeSig::INT32]),
    );

    let mut body = MethodBody::new();
    body.push(OpCode::Ldnull, Operand::None);
    body.push(OpCode::LdcI4S, Operand::Int32(7));
    body.push(OpCode::Callvirt, Operand::Method(add_quest));
    body.push(OpCode::Ret, Operand::None);
    entry(&mut builder, "Entry", body);
    builder.build()
}

/// A mod calling `GameLocation.transferDataFromSavedLocation`, which no longer exists.
pub fn incompatible_mod() -> Module {
    let mut builder = ModuleBuilder::new("Broken.dll");
    let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
    let location = builder.type_ref(game, "StardewValley", "GameLocation");
    let transfer = builder.method_ref(
        TypeSig::Class(location),
        "transferDataFromSavedLocation",
        MethodSig::instance(TypeSig::VOID, vec![TypeSig::Class(location)]),
    );

    let mut body = MethodBody::new();
    body.push(OpCode::Ldnull, Operand::None);
    body.push(OpCode::Ldnull, Operand::None);
    body.push(OpCode::Callvirt, Operand::Method(transfer));
    body.push(OpCode::Ret, Operand::None);
    entry(&mut builder, "Load", body);
    builder.build()
}

/// Portable symbols with one sequence point per instruction of every method in `module`.
pub fn symbols_for(module: &Module) -> Vec<u8> {
    let mut methods = HashMap::new();
    for (token, _, method) in module.methods() {
        let Some(body) = &method.body else {
            continue;
        };
        let offsets = body.offsets();
        let points = (0..body.instructions.len())
            .map(|index| SequencePoint {
                offset: offsets[index],
                span: SourceSpan {
                    document: 0,
                    start_line: 10 + index as u32,
                    start_column: 9,
                    end_line: 10 + index as u32,
                    end_column: 30,
                },
            })
            .collect();
        methods.insert(token, points);
    }

    let data = SymbolData {
        documents: vec!["ModEntry.cs".to_string()],
        methods,
    };
    let guid = module.debug.map_or(MOD_GUID, |header| header.guid);
    portable::encode(guid, 1, &data, module).unwrap()
}

