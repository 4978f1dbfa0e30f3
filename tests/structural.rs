use chunked_ecs::prelude::*;
use chunked_ecs::CHUNK_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct B(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Pad([[u8; 25]; 4]);

impl Default for Wrapper {
    fn default() -> Self {
        Wrapper([7; 4])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Wrapper([u16; 4]);

fn a() -> ComponentType {
    ComponentType::of::<A>().unwrap()
}

fn b() -> ComponentType {
    ComponentType::of::<B>().unwrap()
}

#[test]
fn test_archetype_identity_ignores_order() -> Result<()> {
    let mut world = World::new();
    let ab = world.create_archetype(&[a(), b()])?;
    let ba = world.create_archetype(&[b(), a()])?;
    assert_eq!(ab, ba);
    assert_eq!(world.archetype_count(), 1);
    Ok(())
}

#[test]
fn test_duplicate_types_rejected() {
    let mut world = World::new();
    assert!(matches!(
        world.create_archetype(&[a(), a()]),
        Err(EcsError::DuplicateComponent { .. })
    ));
}

#[test]
fn test_chunk_capacity_and_layout() -> Result<()> {
    let mut world = World::new();
    let archetype = world.create_archetype(&[ComponentType::of::<Pad>()?])?;
    let capacity = world.archetype(archetype).map(|arch| arch.capacity()).unwrap_or(0);
    // Entity id (8 bytes) plus the 100-byte payload per row
    assert_eq!(capacity, CHUNK_SIZE / 108);

    let entities = world.create_entities(archetype, capacity + 1)?;
    let first = world.location(entities[0])?;
    let last = world.location(entities[capacity])?;
    assert_ne!(first.chunk, last.chunk);
    assert_eq!(last.index_in_chunk, 0);
    Ok(())
}

#[test]
fn test_new_components_use_type_default() -> Result<()> {
    let mut world = World::new();
    let archetype = world.create_archetype(&[a(), ComponentType::of::<Wrapper>()?])?;
    let entity = world.create_entity(archetype)?;
    assert_eq!(world.get_component::<Wrapper>(entity)?, Wrapper([7; 4]));
    assert_eq!(world.get_component::<A>(entity)?, A(0));
    Ok(())
}

#[test]
fn test_destroy_compacts_and_keeps_values() -> Result<()> {
    let mut world = World::new();
    let archetype = world.create_archetype(&[a()])?;
    let entities = world.create_entities(archetype, 10)?;
    for (i, entity) in entities.iter().enumerate() {
        world.set_component(*entity, A(i as u32))?;
    }

    world.destroy_entities(&entities[2..5])?;

    assert_eq!(world.entity_count(), 7);
    for (i, entity) in entities.iter().enumerate() {
        if (2..5).contains(&i) {
            assert!(!world.exists(*entity));
        } else {
            assert_eq!(world.get_component::<A>(*entity)?, A(i as u32));
            assert!(world.location(*entity)?.index_in_chunk < 7);
        }
    }
    assert_eq!(world.check_internal_consistency()?, 7);
    Ok(())
}

#[test]
fn test_destroy_stale_handle_fails() -> Result<()> {
    let mut world = World::new();
    let archetype = world.create_archetype(&[a()])?;
    let entity = world.create_entity(archetype)?;
    world.destroy_entity(entity)?;
    assert_eq!(world.destroy_entity(entity), Err(EcsError::EntityNotFound));
    Ok(())
}

#[test]
fn test_add_remove_roundtrip_preserves_components() -> Result<()> {
    let mut world = World::new();
    let entity = world.spawn((A(11),))?;
    world.add_component(entity, B(22))?;
    assert_eq!(world.get_component::<A>(entity)?, A(11));
    assert_eq!(world.get_component::<B>(entity)?, B(22));

    world.remove_component::<A>(entity)?;
    assert!(!world.has_component::<A>(entity)?);
    assert_eq!(world.get_component::<B>(entity)?, B(22));
    assert!(matches!(
        world.remove_component::<A>(entity),
        Err(EcsError::ComponentNotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_entity_column_cannot_be_removed() -> Result<()> {
    let mut world = World::new();
    let entity = world.spawn((A(1),))?;
    let id_column = ComponentType::from_index(chunked_ecs::TypeIndex::ENTITY);
    assert_eq!(
        world.remove_component_type(entity, id_column),
        Err(EcsError::EntityColumnRemoval)
    );
    Ok(())
}

#[test]
fn test_instantiate_copies_everything() -> Result<()> {
    let mut world = World::new();
    let src = world.spawn((A(5), B(6)))?;
    let copies = world.instantiate_many(src, 3000)?;
    assert_eq!(copies.len(), 3000);
    for copy in copies.iter().step_by(97) {
        assert_eq!(world.get_component::<A>(*copy)?, A(5));
        assert_eq!(world.get_component::<B>(*copy)?, B(6));
    }
    assert_eq!(world.check_internal_consistency()?, 3001);
    Ok(())
}

#[test]
fn test_entity_capacity_grows() -> Result<()> {
    let mut world = World::with_config(WorldConfig {
        initial_entity_capacity: 16,
        ..WorldConfig::default()
    });
    let archetype = world.create_archetype(&[a()])?;
    world.create_entities(archetype, 100)?;
    assert!(world.entity_capacity() >= 100);
    world.set_entity_capacity(4096)?;
    assert!(world.entity_capacity() >= 4096);
    Ok(())
}

#[test]
fn test_defragment_fills_chunks() -> Result<()> {
    let mut world = World::new();
    let archetype = world.create_archetype(&[ComponentType::of::<Pad>()?])?;
    let capacity = world.archetype(archetype).map(|arch| arch.capacity()).unwrap_or(0);
    let entities = world.create_entities(archetype, capacity * 3)?;
    let doomed: Vec<Entity> = entities.iter().copied().step_by(2).collect();
    world.destroy_entities(&doomed)?;

    let survivors = world.entity_count();
    world.defragment(archetype)?;
    let chunks = world.archetype(archetype).map(|arch| arch.chunks().len()).unwrap_or(0);
    assert_eq!(chunks, survivors.div_ceil(capacity));
    assert_eq!(world.check_internal_consistency()?, survivors);
    Ok(())
}

#[test]
fn test_move_entities_between_worlds() -> Result<()> {
    let mut src = World::new();
    let mut dst = World::new();
    let mut originals = Vec::new();
    for i in 0..50 {
        originals.push(src.spawn((A(i), B(i as u64 * 2)))?);
    }
    src.bind_external(originals[0], 99)?;

    let remap = dst.move_entities_from(&mut src)?;
    assert_eq!(src.entity_count(), 0);
    assert_eq!(dst.entity_count(), 50);
    for (i, old) in originals.iter().enumerate() {
        let new = remap[old];
        assert_eq!(dst.get_component::<A>(new)?, A(i as u32));
        assert_eq!(dst.get_component::<B>(new)?, B(i as u64 * 2));
    }
    assert_eq!(dst.external_binding(remap[&originals[0]]), Some(99));
    Ok(())
}
