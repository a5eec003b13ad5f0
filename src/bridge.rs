//! Visual bridge: intents emitted by the simulation for an out-of-core
//! visual consumer.
//!
//! Systems publish intent values into the world's event channels; the
//! [`IntentProcessor`] drains them in `Presentation` phase and forwards
//! each, FIFO, to a [`VisualBridge`] implementation. The bridge receives
//! only intent data and must not reach back into the world.

use crate::entity::Entity;
use crate::error::Result;
use crate::schedule::{Phase, System};
use crate::world::World;

/// Entity moved; the visual side should update its transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionChanged {
    pub entity: Entity,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Entity entered the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySpawned {
    pub entity: Entity,
}

/// Entity left the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDestroyed {
    pub entity: Entity,
}

/// Health values changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChanged {
    pub entity: Entity,
    pub current: i32,
    pub max: i32,
}

/// Play an animation on the entity's visual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationTriggered {
    pub entity: Entity,
    pub animation: String,
}

/// Play a sound effect.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundTriggered {
    pub entity: Entity,
    pub sound: String,
    pub volume: f32,
}

/// Consumer of simulation intents, one callback per intent kind.
pub trait VisualBridge: Send + Sync {
    fn on_position_changed(&mut self, intent: &PositionChanged);
    fn on_entity_spawned(&mut self, intent: &EntitySpawned);
    fn on_entity_destroyed(&mut self, intent: &EntityDestroyed);
    fn on_health_changed(&mut self, intent: &HealthChanged);
    fn on_animation_triggered(&mut self, intent: &AnimationTriggered);
    fn on_sound_triggered(&mut self, intent: &SoundTriggered);
}

/// Presentation-phase system that drains the intent channels into a bridge.
pub struct IntentProcessor {
    bridge: Box<dyn VisualBridge>,
}

impl IntentProcessor {
    pub fn new(bridge: Box<dyn VisualBridge>) -> Self {
        Self { bridge }
    }
}

impl System for IntentProcessor {
    fn name(&self) -> &'static str {
        "intent_processor"
    }

    fn phase(&self) -> Phase {
        Phase::Presentation
    }

    fn update(&mut self, world: &mut World, _delta_time: f32) -> Result<()> {
        let bridge = &mut self.bridge;
        world
            .events::<PositionChanged>()
            .consume_all(|i| bridge.on_position_changed(&i));
        world
            .events::<EntitySpawned>()
            .consume_all(|i| bridge.on_entity_spawned(&i));
        world
            .events::<EntityDestroyed>()
            .consume_all(|i| bridge.on_entity_destroyed(&i));
        world
            .events::<HealthChanged>()
            .consume_all(|i| bridge.on_health_changed(&i));
        world
            .events::<AnimationTriggered>()
            .consume_all(|i| bridge.on_animation_triggered(&i));
        world
            .events::<SoundTriggered>()
            .consume_all(|i| bridge.on_sound_triggered(&i));
        Ok(())
    }
}

/// Flag every intent channel one-frame, so intents never outlive the frame
/// that produced them even without a processor registered.
pub fn mark_intents_one_frame(world: &mut World) {
    world.mark_one_frame::<PositionChanged>();
    world.mark_one_frame::<EntitySpawned>();
    world.mark_one_frame::<EntityDestroyed>();
    world.mark_one_frame::<HealthChanged>();
    world.mark_one_frame::<AnimationTriggered>();
    world.mark_one_frame::<SoundTriggered>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingBridge {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl VisualBridge for RecordingBridge {
        fn on_position_changed(&mut self, intent: &PositionChanged) {
            self.log
                .lock()
                .unwrap()
                .push(format!("pos {} {}", intent.entity, intent.x));
        }
        fn on_entity_spawned(&mut self, intent: &EntitySpawned) {
            self.log.lock().unwrap().push(format!("spawn {}", intent.entity));
        }
        fn on_entity_destroyed(&mut self, intent: &EntityDestroyed) {
            self.log.lock().unwrap().push(format!("destroy {}", intent.entity));
        }
        fn on_health_changed(&mut self, intent: &HealthChanged) {
            self.log
                .lock()
                .unwrap()
                .push(format!("health {}", intent.current));
        }
        fn on_animation_triggered(&mut self, intent: &AnimationTriggered) {
            self.log.lock().unwrap().push(format!("anim {}", intent.animation));
        }
        fn on_sound_triggered(&mut self, intent: &SoundTriggered) {
            self.log.lock().unwrap().push(format!("sound {}", intent.sound));
        }
    }

    #[test]
    fn test_processor_drains_fifo_into_bridge() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut world = World::new();
        world.add_system(IntentProcessor::new(Box::new(RecordingBridge {
            log: log.clone(),
        })));

        let e = world.create_entity();
        world.publish(PositionChanged { entity: e, x: 1.0, y: 0.0, z: 0.0 });
        world.publish(PositionChanged { entity: e, x: 2.0, y: 0.0, z: 0.0 });
        world.publish(AnimationTriggered {
            entity: e,
            animation: "walk".into(),
        });

        world.step(0.016);

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                format!("pos {e} 1"),
                format!("pos {e} 2"),
                "anim walk".to_string()
            ]
        );
    }

    #[test]
    fn test_channels_empty_after_processing() {
        let mut world = World::new();
        world.add_system(IntentProcessor::new(Box::<RecordingBridge>::default()));

        let e = world.create_entity();
        world.publish(HealthChanged { entity: e, current: 10, max: 100 });
        world.step(0.016);

        assert!(world.try_events::<HealthChanged>().unwrap().is_empty());
    }
}
