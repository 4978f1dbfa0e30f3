#![allow(dead_code, unused_imports)]

use chunked_ecs::prelude::*;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy, Default)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy, Default)]
struct Health(u32);

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(world))]
fn profile_spawns(world: &mut World, count: usize) -> Result<()> {
    for i in 0..count {
        if i % 1_000 == 0 {
            tracing::info!("Spawning entity {}/{}", i, count);
        }
        world.spawn((
            Position(1.0, 2.0, 3.0),
            Velocity(1.0, 0.0, 0.0),
            Health(100),
        ))?;
    }
    Ok(())
}

#[cfg(feature = "profiling")]
fn main() -> Result<()> {
    let _guard = chunked_ecs::profiling::init_file_tracing("trace.json", true)?;

    let mut world = World::new();

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        for _ in 0..1000 {
            world.spawn((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0)))?;
        }
    }

    println!("Profiling spawn with 3 components...");
    let start = Instant::now();
    profile_spawns(&mut world, 10_000)?;
    println!("Spawn 10k entities complete in: {:?}", start.elapsed());

    let archetype = world.archetype_of::<(Position, Velocity, Health)>()?;
    let _span = tracing::info_span!("defragment").entered();
    let moved = world.defragment(archetype)?;
    println!("Defragment moved {moved} entities");
    Ok(())
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_spawn binary requires --features profiling");
}
