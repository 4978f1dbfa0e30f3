//! Example: Basic storage usage
//!
//! Creates entities in archetypes, moves them with structural changes and
//! walks a group chunk by chunk.

use chunked_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Health(u32);

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct Team(u8);
impl SharedComponent for Team {}

fn main() -> Result<()> {
    let mut world = World::new();

    println!("Creating entities...");

    // Spawn entity with Position + Velocity
    let entity1 = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.5 }))?;
    println!("Spawned entity {entity1:?}");

    // Spawn entity with all three components
    let entity2 = world.spawn((
        Position { x: 10.0, y: 20.0 },
        Velocity { x: -1.0, y: 2.0 },
        Health(100),
    ))?;
    println!("Spawned entity {entity2:?}");

    // Batch-create default entities
    let archetype = world.archetype_of::<(Position, Velocity)>()?;
    let batch = world.create_entities(archetype, 1000)?;
    println!("Created {} more entities", batch.len());

    let loc = world.location(entity1)?;
    println!(
        "Entity {:?} is in archetype {}, chunk {}, row {}",
        entity1,
        loc.archetype.index(),
        loc.chunk.index(),
        loc.index_in_chunk
    );

    // Structural change: entity1 moves to the (Position, Velocity, Health) archetype
    world.add_component(entity1, Health(50))?;
    world.add_shared_component(entity1, Team(1))?;
    println!("Entity {:?} now has team {:?}", entity1, world.get_shared_component::<Team>(entity1)?);

    let movers = world.create_group(&[
        ComponentType::of::<Position>()?,
        ComponentType::read_only::<Velocity>()?,
    ])?;
    println!("Group holds {} entities", world.group_length(movers)?);

    for chunk in world.group_chunks(movers)? {
        println!("chunk {:?}: {} entities", chunk.id(), chunk.len());
    }

    let velocities = world.component_array::<Velocity>(movers)?.to_vec();
    let mut positions = world.component_array_mut::<Position>(movers)?;
    for (i, v) in velocities.iter().enumerate() {
        if let Some(p) = positions.get_mut(i) {
            p.x += v.x;
            p.y += v.y;
        }
    }
    drop(positions);
    println!("Entity {:?} moved to {:?}", entity2, world.get_component::<Position>(entity2)?);

    world.destroy_entity(entity2)?;
    println!("Entity {entity2:?} exists: {}", world.exists(entity2));
    println!("Total entities: {}", world.entity_count());
    Ok(())
}
