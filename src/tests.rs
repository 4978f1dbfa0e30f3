// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Crate-level scenarios spanning storage, groups and fences

#[cfg(test)]
mod tests {
    #![allow(clippy::module_inception)]
    use std::sync::Arc;

    use crate::{
        CommandBuffer, ComponentType, DirtyFlag, EcsError, Entity, JobHandle, ManagedComponent,
        ManagedObjectListener, Result, SharedComponent, World,
    };

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Frozen;

    #[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
    struct Team(u8);
    impl SharedComponent for Team {}

    #[derive(Debug)]
    struct Mesh(String);
    impl ManagedComponent for Mesh {}

    fn pos() -> ComponentType {
        ComponentType::of::<Position>().unwrap()
    }

    fn vel() -> ComponentType {
        ComponentType::of::<Velocity>().unwrap()
    }

    #[test]
    fn test_destroyed_handle_is_stale_after_reuse() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos()])?;
        let first = world.create_entity(archetype)?;
        world.destroy_entity(first)?;
        let second = world.create_entity(archetype)?;

        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(!world.exists(first));
        assert_eq!(
            world.get_component::<Position>(first),
            Err(EcsError::EntityNotFound)
        );
        Ok(())
    }

    #[test]
    fn test_exclusion_group_tracks_tag_changes() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos(), vel()])?;
        let entities = world.create_entities(archetype, 100)?;
        let moving = world.create_group(&[
            pos(),
            vel(),
            ComponentType::of::<Frozen>()?.exclude(),
        ])?;
        assert_eq!(world.group_length(moving)?, 100);

        for entity in entities.iter().step_by(4) {
            world.add_component(*entity, Frozen)?;
        }
        assert_eq!(world.group_length(moving)?, 75);

        let frozen = world.create_group(&[ComponentType::of::<Frozen>()?])?;
        assert_eq!(world.group_length(frozen)?, 25);
        world.check_internal_consistency()?;
        Ok(())
    }

    #[test]
    fn test_movement_over_group_arrays() -> Result<()> {
        let mut world = World::new();
        for i in 0..300 {
            world.spawn((
                Position { x: i as f32, y: 0.0 },
                Velocity { dx: 1.0, dy: 2.0 },
            ))?;
        }
        let group = world.create_group(&[pos(), vel().with_access(crate::AccessMode::ReadOnly)])?;

        let velocities = world.component_array::<Velocity>(group)?.to_vec();
        let mut positions = world.component_array_mut::<Position>(group)?;
        for (i, v) in velocities.iter().enumerate() {
            if let Some(p) = positions.get_mut(i) {
                p.x += v.dx;
                p.y += v.dy;
            }
        }
        drop(positions);

        let positions = world.component_array::<Position>(group)?;
        let entities = world.entity_array(group)?;
        for i in 0..positions.len() {
            let p = positions[i];
            assert_eq!(p.y, 2.0);
            assert_eq!(world.get_component::<Position>(entities[i])?, p);
        }
        Ok(())
    }

    #[test]
    fn test_shared_values_partition_chunks() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos(), ComponentType::shared::<Team>()?])?;
        let entities = world.create_entities(archetype, 10)?;
        assert_eq!(world.shared_component_order_version(&Team(1))?, 0);

        for (i, entity) in entities.iter().enumerate() {
            world.set_shared_component(*entity, Team((i % 2) as u8 + 1))?;
        }
        assert_eq!(world.get_shared_component::<Team>(entities[3])?, Team(2));
        assert_eq!(
            world.all_unique_shared_values::<Team>()?,
            vec![Team(0), Team(1), Team(2)]
        );
        assert!(world.shared_component_order_version(&Team(1))? > 0);

        let red = world.create_group_with_filter(&[pos()], Team(1))?;
        assert_eq!(world.group_length(red)?, 5);
        for chunk in world.group_chunks(red)? {
            assert_eq!(chunk.len(), 5);
        }
        world.check_internal_consistency()?;
        Ok(())
    }

    #[test]
    fn test_managed_listener_sees_writes() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos(), ComponentType::managed::<Mesh>()?])?;
        let entity = world.create_entity(archetype)?;
        assert!(world.get_managed_component::<Mesh>(entity)?.is_none());

        let flag = DirtyFlag::new();
        let listener: Arc<dyn ManagedObjectListener> = flag.clone();
        world.add_managed_listener::<Mesh>(archetype, listener.clone())?;
        world.set_managed_component(entity, Mesh("cube".into()))?;
        assert!(flag.take());
        assert_eq!(
            world.get_managed_component::<Mesh>(entity)?.map(|m| m.0.clone()),
            Some("cube".to_string())
        );

        world.remove_managed_listener::<Mesh>(archetype, &listener)?;
        world.set_managed_component(entity, Mesh("sphere".into()))?;
        assert!(!flag.is_dirty());

        world.add_component(entity, Velocity::default())?;
        assert_eq!(
            world.get_managed_component::<Mesh>(entity)?.map(|m| m.0.clone()),
            Some("sphere".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_order_version_bumps_on_structural_change() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[vel()])?;
        let before = world.component_order_version::<Velocity>()?;
        let entity = world.create_entity(archetype)?;
        let after_create = world.component_order_version::<Velocity>()?;
        assert!(after_create > before);

        world.set_component(entity, Velocity { dx: 3.0, dy: 0.0 })?;
        assert_eq!(world.component_order_version::<Velocity>()?, after_create);

        world.destroy_entity(entity)?;
        assert!(world.component_order_version::<Velocity>()? > after_create);
        Ok(())
    }

    #[test]
    fn test_command_buffer_builds_entities() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos()])?;
        let victim = world.create_entity(archetype)?;

        let mut commands = CommandBuffer::with_config(world.config());
        for i in 0..50 {
            commands.create_entity(archetype);
            commands.set_component_on_created(Position { x: i as f32, y: 1.0 })?;
            commands.add_component_to_created(Velocity { dx: 0.5, dy: 0.0 })?;
        }
        commands.destroy_entity(victim);
        commands.playback(&mut world)?;

        assert!(!world.exists(victim));
        assert_eq!(world.entity_count(), 50);
        let group = world.create_group(&[pos(), vel()])?;
        let positions = world.component_array::<Position>(group)?;
        let mut xs: Vec<f32> = positions.iter().map(|p| p.x).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(xs.first().copied(), Some(0.0));
        assert_eq!(xs.last().copied(), Some(49.0));
        Ok(())
    }

    #[test]
    fn test_mixed_operations_stay_consistent() -> Result<()> {
        let mut world = World::new();
        let a = world.create_archetype(&[pos()])?;
        let b = world.create_archetype(&[pos(), vel()])?;
        let mut live: Vec<Entity> = Vec::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2000 {
            match next() % 5 {
                0 | 1 => live.extend(world.create_entities(if next() % 2 == 0 { a } else { b }, 3)?),
                2 if !live.is_empty() => {
                    let entity = live.swap_remove((next() as usize) % live.len());
                    world.destroy_entity(entity)?;
                }
                3 if !live.is_empty() => {
                    let entity = live[(next() as usize) % live.len()];
                    if world.has_component::<Velocity>(entity)? {
                        world.remove_component::<Velocity>(entity)?;
                    } else {
                        world.add_component(entity, Velocity { dx: 1.0, dy: 1.0 })?;
                    }
                }
                _ => {
                    if let Some(&entity) = live.first() {
                        live.extend(world.instantiate_many(entity, 2)?);
                    }
                }
            }
        }
        assert_eq!(world.entity_count(), live.len());
        assert_eq!(world.check_internal_consistency()?, live.len());
        world.defragment(a)?;
        world.defragment(b)?;
        assert_eq!(world.check_internal_consistency()?, live.len());
        Ok(())
    }

    #[test]
    fn test_group_dependency_orders_background_write() -> Result<()> {
        let mut world = World::new();
        let archetype = world.create_archetype(&[pos()])?;
        world.create_entities(archetype, 10)?;
        let group = world.create_group(&[pos()])?;

        let (completer, handle) = JobHandle::pending();
        let dependency = world.group_dependency(group)?;
        assert!(dependency.is_completed());
        world.add_group_dependency(group, &handle)?;
        assert!(!world.group_dependency(group)?.is_completed());

        completer.complete();
        let positions = world.component_array::<Position>(group)?;
        assert_eq!(positions.len(), 10);
        Ok(())
    }
}
