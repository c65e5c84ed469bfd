//! Benchmarks for the mod rewrite pipeline.
//!
//! - Decoding and encoding a module image
//! - Rewriting a Windows-built mod for Linux
//! - Loading through a warm cache

extern crate modshim;

use criterion::{criterion_group, criterion_main, Criterion};
use modshim::prelude::*;
use std::{hint::black_box, path::Path, sync::Arc};

/// A Windows-built mod with `methods` methods, each reading `Game1.player` and drawing once.
fn windows_mod(methods: usize) -> Module {
    let mut builder = ModuleBuilder::new("BenchMod.dll");
    let game = builder.assembly_ref("Stardew Valley", AssemblyVersion::new(1, 3, 0, 0));
    let xna = builder.assembly_ref("Microsoft.Xna.Framework", AssemblyVersion::new(4, 0, 0, 0));
    let game1 = builder.type_ref(game, "StardewValley", "Game1");
    let farmer = builder.type_ref(game, "StardewValley", "Farmer");
    let vector = builder.type_ref(xna, "Microsoft.Xna.Framework", "Vector2");
    let player = builder.field_ref(TypeSig::Class(game1), "player", TypeSig::Class(farmer));
    let add_quest = builder.method_ref(
        TypeSig::Class(farmer),
        "addQuest",
        MethodSig::instance(TypeSig::VOID, vec![TypeSig::INT32]),
    );

    let index = builder.define_type("BenchMod", "ModEntry", TypeAttributes::PUBLIC);
    for method in 0..methods {
        let mut body = MethodBody::new();
        body.locals.push(TypeSig::ValueType(vector));
        body.push(OpCode::Ldsfld, Operand::Field(player));
        body.push(OpCode::LdcI4S, Operand::Int32(method as i32 % 100));
        body.push(OpCode::Callvirt, Operand::Method(add_quest));
        body.push(OpCode::Ret, Operand::None);
        builder.define_method(
            index,
            MethodDef::new(
                format!("Method{method}"),
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodSig::static_method(TypeSig::VOID, Vec::new()),
                Some(body),
            ),
        );
    }
    builder.build()
}

fn linux_map() -> PlatformAssemblyMap {
    PlatformAssemblyMap::new(
        Platform::Linux,
        ["Stardew Valley", "Microsoft.Xna.Framework"],
        vec![
            TargetAssembly::new(AssemblyRef::new(
                "StardewValley",
                AssemblyVersion::new(1, 5, 6, 0),
            ))
            .with_types(["StardewValley.Game1", "StardewValley.Farmer"]),
            TargetAssembly::new(AssemblyRef::new(
                "MonoGame.Framework",
                AssemblyVersion::new(3, 7, 1, 189),
            ))
            .with_types(["Microsoft.Xna.Framework.Vector2"]),
        ],
    )
}

/// Benchmark decoding a mod image with 200 methods.
fn bench_decode(c: &mut Criterion) {
    let bytes = windows_mod(200).to_bytes().unwrap();

    c.bench_function("module_decode_200_methods", |b| {
        b.iter(|| {
            let module = Module::from_bytes(black_box(&bytes)).unwrap();
            black_box(module)
        });
    });
}

/// Benchmark encoding a mod image with 200 methods.
fn bench_encode(c: &mut Criterion) {
    let module = windows_mod(200);

    c.bench_function("module_encode_200_methods", |b| {
        b.iter(|| black_box(black_box(&module).to_bytes().unwrap()));
    });
}

/// Benchmark the full rewrite pass: scope rewriting plus one field-to-property rewrite per
/// method.
fn bench_rewrite(c: &mut Criterion) {
    let module = windows_mod(200);
    let rewriter =
        AssemblyRewriter::new(Arc::new(RuleSet::stardew_valley()), Arc::new(linux_map()));

    c.bench_function("rewrite_200_methods", |b| {
        b.iter(|| {
            let mut module = module.clone();
            let mut session = RewriteSession::new("BenchMod.dll");
            let changed = rewriter.rewrite(&mut module, &mut session).unwrap();
            black_box((changed, module))
        });
    });
}

/// Benchmark a load that is served from the cache.
fn bench_cached_load(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let bytes = windows_mod(200).to_bytes().unwrap();
    let loader = ModLoader::new(
        LoaderConfig::default().with_cache_dir(dir.path()),
        Arc::new(RuleSet::stardew_valley()),
        Arc::new(linux_map()),
    );
    let origin = Path::new("Mods/Bench/BenchMod.dll");
    loader.load_bytes(origin, &bytes, None).unwrap();

    c.bench_function("load_cached_200_methods", |b| {
        b.iter(|| black_box(loader.load_bytes(origin, black_box(&bytes), None).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_encode,
    bench_rewrite,
    bench_cached_load
);
criterion_main!(benches);
