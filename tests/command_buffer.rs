use chunked_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct A(i32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct B(i32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Marker;

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(align(16))]
struct Wide([u32; 4]);

impl Default for Wide {
    fn default() -> Self {
        Wide([0; 4])
    }
}

#[test]
fn test_commands_apply_in_recorded_order() -> Result<()> {
    let mut world = World::new();
    let entity = world.spawn((A(1),))?;

    let mut commands = CommandBuffer::new();
    commands.add_component(entity, B(2))?;
    commands.set_component(entity, A(10))?;
    commands.set_component(entity, B(20))?;
    commands.remove_component::<A>(entity)?;
    assert_eq!(commands.len(), 4);

    // Nothing happens before playback
    assert_eq!(world.get_component::<A>(entity)?, A(1));
    assert!(!world.has_component::<B>(entity)?);

    commands.playback(&mut world)?;
    assert!(commands.is_empty());
    assert!(!world.has_component::<A>(entity)?);
    assert_eq!(world.get_component::<B>(entity)?, B(20));
    Ok(())
}

#[test]
fn test_created_entity_targets_follow_latest_create() -> Result<()> {
    let mut world = World::new();
    let archetype = world.archetype_of::<(A,)>()?;

    let mut commands = CommandBuffer::with_block_size(128);
    commands.create_entity(archetype);
    commands.set_component_on_created(A(1))?;
    commands.create_entity(archetype);
    commands.set_component_on_created(A(2))?;
    commands.add_component_to_created(Marker)?;
    commands.add_component_to_created(Wide([1, 2, 3, 4]))?;
    commands.playback(&mut world)?;

    assert_eq!(world.entity_count(), 2);
    let marked = world.create_group(&[
        ComponentType::of::<A>()?,
        ComponentType::of::<Marker>()?,
        ComponentType::of::<Wide>()?,
    ])?;
    let values = world.component_array::<A>(marked)?.to_vec();
    assert_eq!(values, vec![A(2)]);
    let wides = world.component_array::<Wide>(marked)?.to_vec();
    assert_eq!(wides, vec![Wide([1, 2, 3, 4])]);
    Ok(())
}

#[test]
fn test_decoded_commands_describe_records() -> Result<()> {
    let mut world = World::new();
    let archetype = world.archetype_of::<(A, B)>()?;
    let entity = world.create_entity(archetype)?;

    let mut commands = CommandBuffer::new();
    commands.create_entity(archetype);
    commands.destroy_entity(entity);
    let decoded = commands.commands()?;
    assert_eq!(
        decoded,
        vec![Command::CreateEntity(archetype), Command::DestroyEntity(entity)]
    );
    assert_eq!(commands.byte_len() % 8, 0);
    Ok(())
}

#[test]
fn test_failed_command_stops_playback() -> Result<()> {
    let mut world = World::new();
    let entity = world.spawn((A(5),))?;
    world.destroy_entity(entity)?;

    let mut commands = CommandBuffer::new();
    commands.set_component(entity, A(6))?;
    let survivor = world.spawn((A(7),))?;
    commands.destroy_entity(survivor);

    assert_eq!(commands.playback(&mut world), Err(EcsError::EntityNotFound));
    assert!(world.exists(survivor));
    assert!(commands.is_empty());
    Ok(())
}

#[test]
fn test_large_payload_gets_own_block() -> Result<()> {
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Blob([u64; 64]);
    impl Default for Blob {
        fn default() -> Self {
            Blob([0; 64])
        }
    }

    let mut world = World::new();
    let entity = world.spawn((A(0),))?;
    let mut commands = CommandBuffer::with_block_size(64);
    commands.add_component(entity, Blob([9; 64]))?;
    commands.playback(&mut world)?;
    assert_eq!(world.get_component::<Blob>(entity)?, Blob([9; 64]));
    Ok(())
}
