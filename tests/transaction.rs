use std::thread;

use chunked_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Spawned(u32);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Other(u8);

#[test]
fn test_worker_thread_creates_entities() -> Result<()> {
    let mut world = World::new();
    let archetype = world.archetype_of::<(Spawned,)>()?;

    let created = {
        let mut transaction = world.begin_transaction();
        let (completer, handle) = JobHandle::pending();
        transaction.set_dependency(handle)?;

        thread::scope(|scope| {
            let worker = scope.spawn(|| -> Result<Vec<Entity>> {
                let archetype = transaction.existing_archetype_of::<(Spawned,)>()?;
                let entities = transaction.create_entities(archetype, 500)?;
                for (i, entity) in entities.iter().enumerate() {
                    transaction.set_component(*entity, Spawned(i as u32))?;
                }
                completer.complete();
                Ok(entities)
            });
            worker.join().unwrap_or_else(|_| Err(EcsError::JobAbandoned))
        })?
    };

    assert!(world.is_in_transaction());
    world.end_transaction()?;
    assert!(!world.is_in_transaction());

    assert_eq!(world.entity_count(), 500);
    assert_eq!(world.get_component::<Spawned>(created[42])?, Spawned(42));
    assert_eq!(world.location(created[0])?.archetype, archetype);
    Ok(())
}

#[test]
fn test_structural_change_closes_transaction() -> Result<()> {
    let mut world = World::new();
    let archetype = world.archetype_of::<(Spawned,)>()?;
    {
        let mut transaction = world.begin_transaction();
        transaction.create_entity(archetype)?;
    }
    assert!(world.is_in_transaction());
    world.create_entity(archetype)?;
    assert!(!world.is_in_transaction());
    assert_eq!(world.entity_count(), 2);
    Ok(())
}

#[test]
fn test_missing_archetype_is_not_created() -> Result<()> {
    let mut world = World::new();
    let transaction = world.begin_transaction();
    assert_eq!(
        transaction.existing_archetype_of::<(Other,)>().map(|_| ()),
        Err(EcsError::ArchetypeNotFound)
    );
    drop(transaction);
    world.end_transaction()?;
    assert_eq!(world.archetype_count(), 0);
    Ok(())
}

#[test]
fn test_foreign_archetype_is_rejected() -> Result<()> {
    let mut source = World::new();
    let archetype = source.archetype_of::<(Spawned,)>()?;

    let mut target = World::new();
    {
        let mut transaction = target.begin_transaction();
        assert_eq!(
            transaction.create_entity(archetype),
            Err(EcsError::ArchetypeNotFound)
        );
        assert_eq!(
            transaction.create_entities(archetype, 8).map(|e| e.len()),
            Err(EcsError::ArchetypeNotFound)
        );
    }
    target.end_transaction()?;
    assert_eq!(target.entity_count(), 0);
    assert_eq!(target.create_entity(archetype), Err(EcsError::ArchetypeNotFound));
    Ok(())
}

#[test]
fn test_stale_and_foreign_handles_fail() -> Result<()> {
    let mut source = World::new();
    let source_archetype = source.archetype_of::<(Spawned,)>()?;
    let foreign = source.create_entities(source_archetype, 16)?;

    let mut world = World::new();
    let archetype = world.archetype_of::<(Spawned,)>()?;
    let stale = world.create_entity(archetype)?;
    world.destroy_entity(stale)?;
    {
        let mut transaction = world.begin_transaction();
        assert!(!transaction.exists(stale));
        assert_eq!(
            transaction.get_component::<Spawned>(stale),
            Err(EcsError::EntityNotFound)
        );
        assert_eq!(
            transaction.set_component(stale, Spawned(1)),
            Err(EcsError::EntityNotFound)
        );

        let outsider = foreign[15];
        assert!(!transaction.exists(outsider));
        assert_eq!(
            transaction.get_component::<Spawned>(outsider),
            Err(EcsError::EntityNotFound)
        );
        assert_eq!(
            transaction.set_component(outsider, Spawned(2)),
            Err(EcsError::EntityNotFound)
        );
    }
    world.end_transaction()?;
    assert_eq!(world.entity_count(), 0);
    Ok(())
}

#[test]
fn test_dependency_must_follow_transaction_handle() -> Result<()> {
    let mut world = World::new();
    let archetype = world.archetype_of::<(Spawned,)>()?;
    world.create_entities(archetype, 4)?;
    let group = world.create_group(&[ComponentType::of::<Spawned>()?])?;
    let (background, running) = JobHandle::pending();
    world.add_group_dependency(group, &running)?;

    let transaction = world.begin_transaction();
    let (_unrelated_completer, unrelated) = JobHandle::pending();
    if cfg!(feature = "checked") {
        assert!(matches!(
            transaction.set_dependency(unrelated),
            Err(EcsError::TransactionError(_))
        ));
    }
    let chained = JobHandle::combine(&[transaction.dependency(), JobHandle::completed()]);
    transaction.set_dependency(chained)?;
    drop(transaction);

    background.complete();
    world.end_transaction()?;
    Ok(())
}

#[test]
fn test_reopening_keeps_handle() -> Result<()> {
    let mut world = World::new();
    let (completer, handle) = JobHandle::pending();
    {
        let transaction = world.begin_transaction();
        transaction.set_dependency(JobHandle::combine(&[transaction.dependency(), handle]))?;
    }
    let again = world.begin_transaction();
    assert!(!again.dependency().is_completed());
    drop(again);
    completer.complete();
    world.end_transaction()?;
    Ok(())
}
