use chunked_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct B(u32);

#[test]
fn test_full_lifecycle() -> Result<()> {
    let mut world = World::new();
    let ab = world.create_archetype(&[ComponentType::of::<A>()?, ComponentType::of::<B>()?])?;
    let entities = world.create_entities(ab, 1000)?;
    for (i, entity) in entities.iter().enumerate() {
        world.set_component(*entity, A(i as u32))?;
        world.set_component(*entity, B(i as u32 * 3))?;
    }

    let group_a = world.create_group(&[ComponentType::of::<A>()?])?;
    let group_ab = world.create_group(&[ComponentType::of::<A>()?, ComponentType::of::<B>()?])?;
    assert_eq!(world.group_length(group_a)?, 1000);
    assert_eq!(world.group_length(group_ab)?, 1000);

    for entity in entities.iter().take(500) {
        world.remove_component::<B>(*entity)?;
    }
    assert_eq!(world.group_length(group_a)?, 1000);
    assert_eq!(world.group_length(group_ab)?, 500);
    assert_eq!(world.archetype_count(), 2);

    for (i, entity) in entities.iter().enumerate() {
        assert_eq!(world.get_component::<A>(*entity)?, A(i as u32));
        if i >= 500 {
            assert_eq!(world.get_component::<B>(*entity)?, B(i as u32 * 3));
        }
    }
    let sum: u64 = world
        .component_array::<A>(group_a)?
        .iter()
        .map(|a| a.0 as u64)
        .sum();
    assert_eq!(sum, (0..1000u64).sum::<u64>());
    assert_eq!(world.check_internal_consistency()?, 1000);

    world.destroy_entities(&entities)?;
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.group_length(group_a)?, 0);
    assert!(entities.iter().all(|entity| !world.exists(*entity)));
    assert_eq!(world.check_internal_consistency()?, 0);
    Ok(())
}

#[test]
fn test_config_from_json() -> Result<()> {
    let config = WorldConfig::from_json(r#"{ "command_block_size": 4096 }"#)?;
    assert_eq!(config.command_block_size, 4096);
    assert_eq!(config.initial_entity_capacity, WorldConfig::default().initial_entity_capacity);

    let world = World::with_config(config.clone());
    assert_eq!(world.config(), &config);
    assert!(WorldConfig::from_json("not json").is_err());
    Ok(())
}
