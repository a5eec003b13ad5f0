//! Change-detection flow across frames.

use prism_ecs::{Query, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[test]
fn test_change_detection_flow() {
    let mut world = World::new();

    // 1. Initial spawn: adding components marks them dirty.
    let e1 = world.create_entity();
    world.add_component(e1, Position { x: 0.0, y: 0.0 }).unwrap();
    world.add_component(e1, Velocity { x: 1.0, y: 1.0 }).unwrap();
    let e2 = world.create_entity();
    world.add_component(e2, Position { x: 10.0, y: 10.0 }).unwrap();

    let changed_positions = Query::new().changed::<Position>();
    assert_eq!(world.query_count(&changed_positions), 2);

    // 2. Frame boundary: nothing is dirty anymore.
    world.end_frame();
    assert_eq!(world.query_count(&changed_positions), 0);

    // 3. Mutate e1 only.
    if let Some(pos) = world.get_component_mut::<Position>(e1) {
        pos.x = 1.0;
    }
    assert_eq!(world.query_count(&changed_positions), 1);
    assert!(world.has_changed::<Position>(e1));
    assert!(!world.has_changed::<Position>(e2));

    // 4. Next frame: adding a component dirties only that type.
    world.end_frame();
    world.add_component(e2, Velocity { x: 0.0, y: 0.0 }).unwrap();

    let changed_velocities = Query::new().changed::<Velocity>();
    assert_eq!(world.query_count(&changed_velocities), 1);
    assert_eq!(world.query_count(&changed_positions), 0);
}

#[test]
fn test_changed_combines_with_other_filters() {
    let mut world = World::new();

    for i in 0..4 {
        let e = world.create_entity();
        world.add_component(e, Position { x: i as f32, y: 0.0 }).unwrap();
        if i % 2 == 0 {
            world.add_component(e, Velocity { x: 1.0, y: 0.0 }).unwrap();
        }
    }
    world.end_frame();

    // Dirty every Position through a mutable column walk.
    let all_positions = Query::new().with::<Position>();
    for mut view in world.iter_chunks_mut(&all_positions) {
        for p in view.column_mut::<Position>().unwrap() {
            p.y += 1.0;
        }
    }

    // Changed ∧ without narrows to the velocity-less pair.
    let q = Query::new().changed::<Position>().without::<Velocity>();
    assert_eq!(world.query_count(&q), 2);
}

#[test]
fn test_explicit_mark_changed() {
    let mut world = World::new();
    let e = world.create_entity();
    world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
    world.end_frame();

    world.mark_changed::<Position>(e);
    assert!(world.has_changed::<Position>(e));
    assert!(world.change_tracker().changed_mask(e) != 0);
}

#[test]
fn test_frame_counter_advances() {
    let mut world = World::new();
    assert_eq!(world.change_tracker().frame(), 0);
    world.step(0.016);
    world.step(0.016);
    assert_eq!(world.change_tracker().frame(), 2);
    assert_eq!(world.time().frame_count(), 2);
}
