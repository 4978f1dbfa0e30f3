use chunked_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Position(f32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Velocity(f32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Health(u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Dead;

fn ty<T: Component>() -> ComponentType {
    ComponentType::of::<T>().unwrap()
}

#[test]
fn test_group_matches_supersets_only() -> Result<()> {
    let mut world = World::new();
    let p = world.create_archetype(&[ty::<Position>()])?;
    let pv = world.create_archetype(&[ty::<Position>(), ty::<Velocity>()])?;
    let pvh = world.create_archetype(&[ty::<Position>(), ty::<Velocity>(), ty::<Health>()])?;
    world.create_entities(p, 10)?;
    world.create_entities(pv, 20)?;
    world.create_entities(pvh, 30)?;

    let moving = world.create_group(&[ty::<Position>(), ty::<Velocity>()])?;
    assert_eq!(world.group_length(moving)?, 50);
    assert_eq!(world.group(moving).map(|g| g.matches().len()), Some(2));
    Ok(())
}

#[test]
fn test_group_sees_archetypes_created_later() -> Result<()> {
    let mut world = World::new();
    let group = world.create_group(&[ty::<Health>()])?;
    assert_eq!(world.group_length(group)?, 0);

    world.spawn((Health(3),))?;
    world.spawn((Health(4), Position(1.0)))?;
    assert_eq!(world.group_length(group)?, 2);
    Ok(())
}

#[test]
fn test_same_types_return_same_group() -> Result<()> {
    let mut world = World::new();
    let first = world.create_group(&[ty::<Position>(), ty::<Velocity>()])?;
    let second = world.create_group(&[ty::<Velocity>(), ty::<Position>()])?;
    assert_eq!(first, second);

    let read_only = world.create_group(&[
        ty::<Position>().with_access(AccessMode::ReadOnly),
        ty::<Velocity>(),
    ])?;
    assert_ne!(first, read_only);
    Ok(())
}

#[test]
fn test_subtractive_type_excludes_archetypes() -> Result<()> {
    let mut world = World::new();
    for i in 0..40 {
        let entity = world.spawn((Health(i),))?;
        if i % 4 == 0 {
            world.add_component(entity, Dead)?;
        }
    }
    let alive = world.create_group(&[ty::<Health>(), ty::<Dead>().exclude()])?;
    assert_eq!(world.group_length(alive)?, 30);
    let healths = world.component_array::<Health>(alive)?;
    assert!(healths.iter().all(|h| h.0 % 4 != 0));
    Ok(())
}

#[test]
fn test_arrays_agree_with_per_entity_reads() -> Result<()> {
    let mut world = World::new();
    for i in 0..2500 {
        world.spawn((Position(i as f32), Health(i)))?;
    }
    for i in 0..700 {
        world.spawn((Position(i as f32), Health(i), Velocity(1.0)))?;
    }
    let group = world.create_group(&[ty::<Health>()])?;
    let entities = world.entity_array(group)?;
    let healths = world.component_array::<Health>(group)?;
    assert_eq!(entities.len(), 3200);
    assert_eq!(healths.len(), 3200);

    // Descending walk restarts the chunk cursor on every step back
    for i in (0..healths.len()).rev().step_by(13) {
        assert_eq!(world.get_component::<Health>(entities[i])?, healths[i]);
    }
    assert_eq!(healths.get(3200), None);

    let per_chunk: usize = world.group_chunks(group)?.iter().map(|c| c.len()).sum();
    assert_eq!(per_chunk, 3200);
    Ok(())
}

#[test]
fn test_mutable_array_writes_through() -> Result<()> {
    let mut world = World::new();
    let entities: Vec<Entity> = (0..1000)
        .map(|i| world.spawn((Health(i),)))
        .collect::<Result<_>>()?;
    let group = world.create_group(&[ty::<Health>()])?;

    let mut healths = world.component_array_mut::<Health>(group)?;
    healths.for_each_mut(|h| h.0 += 1000);
    assert!(healths.set(0, Health(0)));
    assert!(!healths.set(1000, Health(0)));
    drop(healths);

    let first = world.entity_array(group)?[0];
    assert_eq!(world.get_component::<Health>(first)?, Health(0));
    let others = entities.iter().filter(|e| **e != first);
    for entity in others {
        assert!(world.get_component::<Health>(*entity)?.0 >= 1000);
    }
    Ok(())
}

#[test]
fn test_array_of_type_outside_group_fails() -> Result<()> {
    let mut world = World::new();
    world.spawn((Health(1),))?;
    let group = world.create_group(&[ty::<Health>()])?;
    assert!(matches!(
        world.component_array::<Position>(group),
        Err(EcsError::ComponentNotFound { .. })
    ));
    Ok(())
}
