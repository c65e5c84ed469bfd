//! Mods and symbol files shared by the integration tests.

#![allow(dead_code)]

use std::{fs, path::Path, sync::Arc};

use modshim::{
    prelude::*,
    symbols::{MethodSymbols, SequencePoint, SourceSpan},
};
use uguid::{guid, Guid};

pub const MOD_GUID: Guid = guid!("0b6e3f0d-92a4-4c17-b1de-7d4c2a9e5f31");

/// The Linux game directory as seen by the shim.
pub fn linux_map() -> PlatformAssemblyMap {
    map_for(Platform::Linux)
}

/// The Linux game assemblies, reported as installed on `platform`.
pub fn map_for(platform: Platform) -> PlatformAssemblyMap {
    PlatformAssemblyMap::new(
        platform,
        [
            "Stardew Valley",
            "Microsoft.Xna.Framework",
            "Microsoft.Xna.Framework.Game",
            "Microsoft.Xna.Framework.Graphics",
            "Microsoft.Xna.Framework.Xact",
        ],
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
                "Microsoft.Xna.Framework.Graphics.Texture2D",
            ]),
        ],
    )
}

pub fn rewriter() -> AssemblyRewriter {
    AssemblyRewriter::new(Arc::new(RuleSet::stardew_valley()), Arc::new(linux_map()))
}

pub fn loader(config: LoaderConfig) -> ModLoader {
    loader_for(Platform::Linux, config)
}

pub fn loader_for(platform: Platform, config: LoaderConfig) -> ModLoader {
    ModLoader::new(
        config,
        Arc::new(RuleSet::stardew_valley()),
        Arc::new(map_for(platform)),
    )
}

/// Add `public static void ModEntry.{name}()` to the mod.
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

/// A mod compiled on Windows that reads `Game1.player` and stores it in a `Farmer` local.
pub fn windows_mod(name: &str) -> Module {
    let mut builder = ModuleBuilder::new(name);
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
    body.locals.push(TypeSig::Class(farmer));
    body.locals.push(TypeSig::ValueType(vector));
    body.push(OpCode::Ldsfld, Operand::Field(player));
    body.push(OpCode::Stloc0, Operand::None);
    body.push(OpCode::Ret, Operand::None);
    entry(&mut builder, "Entry", body);
    builder.build()
}

/// A mod that draws through `SpriteBatch.Draw` from the Windows XNA assembly.
pub fn sprite_batch_mod() -> Module {
    let mut builder = ModuleBuilder::new("Drawing.dll");
    builder.debug(MOD_GUID, 2);
    let xna = builder.assembly_ref(
        "Microsoft.Xna.Framework.Graphics",
        AssemblyVersion::new(4, 0, 0, 0),
    );
    let batch = builder.type_ref(xna, "Microsoft.Xna.Framework.Graphics", "SpriteBatch");
    let texture = builder.type_ref(xna, "Microsoft.Xna.Framework.Graphics", "Texture2D");
    let draw = builder.method_ref(
        TypeSig::Class(batch),
        "Draw",
        MethodSig::instance(TypeSig::VOID, vec![TypeSig::Class(texture)]),
    );

    let mut body = MethodBody::new();
    body.push(OpCode::Ldnull, Operand::None);
    body.push(OpCode::Ldnull, Operand::None);
    body.push(OpCode::Callvirt, Operand::Method(draw));
    body.push(OpCode::Ret, Operand::None);
    entry(&mut builder, "Draw", body);
    builder.build()
}

/// A mod already built for Linux that only uses stable APIs.
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

/// A mod calling two removed methods from two different methods.
pub fn incompatible_mod() -> Module {
    let mut builder = ModuleBuilder::new("Broken.dll");
    let game = builder.assembly_ref("StardewValley", AssemblyVersion::new(1, 5, 6, 0));
    let location = builder.type_ref(game, "StardewValley", "GameLocation");
    let transfer = builder.method_ref(
        TypeSig::Class(location),
        "transferDataFromSavedLocation",
        MethodSig::instance(TypeSig::VOID, vec![TypeSig::Class(location)]),
    );

    for name in ["Load", "Reload"] {
        let mut body = MethodBody::new();
        body.push(OpCode::Ldnull, Operand::None);
        body.push(OpCode::Ldnull, Operand::None);
        body.push(OpCode::Callvirt, Operand::Method(transfer));
        body.push(OpCode::Ret, Operand::None);
        entry(&mut builder, name, body);
    }
    builder.build()
}

/// Symbol reader handing out one sequence point per instruction.
pub struct LineReader {
    methods: Vec<MethodSymbols>,
    documents: Vec<String>,
}

impl LineReader {
    pub fn new(module: &Module) -> Self {
        let methods = module
            .methods()
            .filter_map(|(token, _, method)| {
                let body = method.body.as_ref()?;
                let offsets = body.offsets();
                let points = (0..body.instructions.len())
                    .map(|index| SequencePoint {
                        offset: offsets[index],
                        span: SourceSpan {
                            document: 0,
                            start_line: 20 + index as u32,
                            start_column: 13,
                            end_line: 20 + index as u32,
                            end_column: 40,
                        },
                    })
                    .collect();
                Some(MethodSymbols { token, points })
            })
            .collect();
        LineReader {
            methods,
            documents: vec!["ModEntry.cs".to_string()],
        }
    }
}

impl SymbolReader for LineReader {
    fn process_debug_header(&mut self, _header: &DebugHeader) -> Result<()> {
        Ok(())
    }

    fn read_method(&self, token: Token) -> Option<MethodSymbols> {
        self.methods
            .iter()
            .find(|method| method.token == token)
            .cloned()
    }

    fn documents(&self) -> &[String] {
        &self.documents
    }
}

/// Portable symbols for `module` with one line per instruction.
pub fn portable_symbols(module: &Module) -> Vec<u8> {
    let mut reader = LineReader::new(module);
    let table = SymbolTable::read(module, &mut reader).unwrap();
    PortableSymbolWriter.write(module, &table).unwrap()
}

/// Write `module` and optionally its symbols into `dir`.
pub fn write_mod(dir: &Path, module: &Module, symbols: Option<&[u8]>) -> std::path::PathBuf {
    let path = dir.join(&module.name);
    fs::write(&path, module.to_bytes().unwrap()).unwrap();
    if let Some(symbols) = symbols {
        fs::write(path.with_extension("pdb"), symbols).unwrap();
    }
    path
}
