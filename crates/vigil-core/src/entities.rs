//! Moving entities: vehicles, ambulances, patrol units.
//!
//! Every entity is in exactly one motion state. The dispatched states
//! carry their target inline, so a dispatched entity without a target
//! cannot be represented. Arrival is a state change from `EnRoute` to
//! `OnScene`, which can happen at most once per dispatch; the arrival event
//! is emitted on that transition only.
//!
//! Leaving `OnScene` is never implicit: the engine releases the unit on
//! dwell timeout or on an explicit `Release` command.

use vigil_types::{AlertId, AllocationId, EntityId, EntityStatus, EntityView, PoolId, Position};

use crate::config::{BehaviorConfig, EntityConfig};
use crate::walk::RandomWalkGenerator;

/// Errors raised by entity operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    /// No entity with this id exists.
    #[error("unknown entity: {0}")]
    Unknown(EntityId),

    /// The entity is already assigned.
    #[error("entity {entity} is unavailable ({status:?})")]
    Unavailable {
        /// The entity.
        entity: EntityId,
        /// Its current status.
        status: EntityStatus,
    },
}

/// Events produced while advancing entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityEvent {
    /// A dispatched entity reached its target.
    Arrived {
        /// The entity.
        entity: EntityId,
        /// The alert it was sent to.
        alert: AlertId,
        /// The allocation it carries out.
        allocation: AllocationId,
    },
    /// The target disappeared; the entity went back to its behaviour.
    Recalled {
        /// The entity.
        entity: EntityId,
        /// The alert that disappeared.
        alert: AlertId,
        /// The allocation it was carrying out.
        allocation: AllocationId,
    },
}

/// A dispatch in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Target alert.
    pub alert: AlertId,
    /// Allocation carried out.
    pub allocation: AllocationId,
    /// Where to go.
    pub target: Position,
}

/// Movement state of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    /// Following its configured behaviour.
    Roaming,
    /// Assigned, waiting for mobilization to finish.
    Mobilizing(Assignment),
    /// Moving toward the target.
    EnRoute(Assignment),
    /// Arrived; waiting to be released.
    OnScene(Assignment),
}

impl Motion {
    const fn assignment(self) -> Option<Assignment> {
        match self {
            Self::Roaming => None,
            Self::Mobilizing(a) | Self::EnRoute(a) | Self::OnScene(a) => Some(a),
        }
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Wander { jitter: f64 },
    Patrol { waypoints: Vec<Position>, next: usize },
}

#[derive(Debug, Clone)]
struct Entity {
    id: EntityId,
    label: String,
    kind: String,
    pool: Option<PoolId>,
    position: Position,
    speed: f64,
    behavior: Behavior,
    motion: Motion,
}

impl Entity {
    const fn status(&self) -> EntityStatus {
        match (self.motion, &self.behavior) {
            (Motion::Roaming, Behavior::Wander { .. }) => EntityStatus::Idle,
            (Motion::Roaming, Behavior::Patrol { .. }) => EntityStatus::Moving,
            (Motion::Mobilizing(_), _) => EntityStatus::Busy,
            (Motion::EnRoute(_), _) => EntityStatus::Dispatched,
            (Motion::OnScene(_), _) => EntityStatus::Arrived,
        }
    }

    fn waypoint(&self) -> Option<Position> {
        match &self.behavior {
            Behavior::Patrol { waypoints, next } => waypoints.get(*next).copied(),
            Behavior::Wander { .. } => None,
        }
    }

    fn roam(&mut self, walk: &mut RandomWalkGenerator) {
        match &mut self.behavior {
            Behavior::Wander { jitter } => {
                let dx = walk.noise(*jitter);
                let dy = walk.noise(*jitter);
                self.position = self.position.offset(dx, dy);
            }
            Behavior::Patrol { waypoints, next } => {
                let Some(&waypoint) = waypoints.get(*next) else {
                    *next = 0;
                    return;
                };
                self.position = self.position.step_toward(waypoint, self.speed);
                if self.position.distance_to(waypoint) <= f64::EPSILON {
                    *next = next
                        .checked_add(1)
                        .filter(|n| *n < waypoints.len())
                        .unwrap_or(0);
                }
            }
        }
    }

    fn view(&self) -> EntityView {
        let assignment = self.motion.assignment();
        EntityView {
            id: self.id.clone(),
            label: self.label.clone(),
            kind: self.kind.clone(),
            pool: self.pool.clone(),
            position: self.position,
            status: self.status(),
            target: assignment.map(|a| a.target).or_else(|| self.waypoint()),
            target_alert: assignment.map(|a| a.alert),
            allocation: assignment.map(|a| a.allocation),
            speed: self.speed,
        }
    }
}

/// All simulated entities in configuration order.
#[derive(Debug, Clone, Default)]
pub struct EntitySimulator {
    entities: Vec<Entity>,
}

impl EntitySimulator {
    /// Build entities from configuration. Positions are clamped into the map.
    pub fn new(configs: &[EntityConfig]) -> Self {
        let entities = configs
            .iter()
            .map(|c| Entity {
                id: c.id.clone(),
                label: c.label.clone().unwrap_or_else(|| c.id.to_string()),
                kind: c.kind.clone(),
                pool: c.pool.clone(),
                position: c.position.clamped(),
                speed: c.speed,
                behavior: match &c.behavior {
                    BehaviorConfig::Wander { jitter } => Behavior::Wander { jitter: *jitter },
                    BehaviorConfig::Patrol { waypoints } => Behavior::Patrol {
                        waypoints: waypoints.iter().map(|w| w.clamped()).collect(),
                        next: 0,
                    },
                },
                motion: Motion::Roaming,
            })
            .collect();
        Self { entities }
    }

    /// Advance every entity by one tick.
    ///
    /// `is_active` reports whether a target alert still exists and is
    /// unresolved. Entities heading for a vanished target are recalled.
    pub fn advance(
        &mut self,
        walk: &mut RandomWalkGenerator,
        is_active: impl Fn(AlertId) -> bool,
        arrival_radius: f64,
    ) -> Vec<EntityEvent> {
        let mut events = Vec::new();
        for entity in &mut self.entities {
            let motion = entity.motion;
            match motion {
                Motion::Roaming => entity.roam(walk),
                Motion::OnScene(_) => {}
                Motion::Mobilizing(a) | Motion::EnRoute(a) if !is_active(a.alert) => {
                    tracing::info!(entity = %entity.id, alert = %a.alert, "target gone, recalling unit");
                    entity.motion = Motion::Roaming;
                    events.push(EntityEvent::Recalled {
                        entity: entity.id.clone(),
                        alert: a.alert,
                        allocation: a.allocation,
                    });
                }
                Motion::Mobilizing(_) => {}
                Motion::EnRoute(a) => {
                    entity.position = entity.position.step_toward(a.target, entity.speed);
                    if entity.position.distance_to(a.target) <= arrival_radius {
                        tracing::info!(entity = %entity.id, alert = %a.alert, "unit arrived");
                        entity.motion = Motion::OnScene(a);
                        events.push(EntityEvent::Arrived {
                            entity: entity.id.clone(),
                            alert: a.alert,
                            allocation: a.allocation,
                        });
                    }
                }
            }
        }
        events
    }

    /// Assign an available entity to a target.
    ///
    /// With `mobilizing` the entity waits in `Busy` until
    /// [`EntitySimulator::start_moving`]; otherwise it starts moving on the
    /// next advance.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Unknown`] or [`EntityError::Unavailable`].
    pub fn assign(&mut self, id: &EntityId, assignment: Assignment, mobilizing: bool) -> Result<(), EntityError> {
        let entity = self
            .entities
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or_else(|| EntityError::Unknown(id.clone()))?;
        if entity.motion != Motion::Roaming {
            return Err(EntityError::Unavailable {
                entity: id.clone(),
                status: entity.status(),
            });
        }
        entity.motion = if mobilizing {
            Motion::Mobilizing(assignment)
        } else {
            Motion::EnRoute(assignment)
        };
        Ok(())
    }

    /// Finish mobilization for the entity carrying `allocation`.
    pub fn start_moving(&mut self, allocation: AllocationId) -> Option<EntityId> {
        let entity = self.find_by_allocation(allocation)?;
        match entity.motion {
            Motion::Mobilizing(a) => {
                entity.motion = Motion::EnRoute(a);
                Some(entity.id.clone())
            }
            _ => None,
        }
    }

    /// Return the entity carrying `allocation` to its behaviour.
    pub fn release(&mut self, allocation: AllocationId) -> Option<EntityId> {
        let entity = self.find_by_allocation(allocation)?;
        entity.motion = Motion::Roaming;
        Some(entity.id.clone())
    }

    /// The nearest roaming member of `pool` not in `reserved`, ties broken
    /// by configuration order.
    pub fn nearest_available(&self, pool: &PoolId, target: Position, reserved: &[EntityId]) -> Option<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.pool.as_ref() == Some(pool) && e.motion == Motion::Roaming)
            .filter(|e| !reserved.contains(&e.id))
            .map(|e| (e.position.distance_to(target), e))
            .reduce(|best, candidate| if candidate.0 < best.0 { candidate } else { best })
            .map(|(_, e)| e.id.clone())
    }

    /// Whether any entity belongs to `pool`.
    pub fn has_members(&self, pool: &PoolId) -> bool {
        self.entities.iter().any(|e| e.pool.as_ref() == Some(pool))
    }

    /// View of one entity.
    pub fn view(&self, id: &str) -> Option<EntityView> {
        self.entities.iter().find(|e| e.id.as_str() == id).map(Entity::view)
    }

    /// Views of every entity in configuration order.
    pub fn views(&self) -> Vec<EntityView> {
        self.entities.iter().map(Entity::view).collect()
    }

    fn find_by_allocation(&mut self, allocation: AllocationId) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|e| e.motion.assignment().is_some_and(|a| a.allocation == allocation))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assignment(target: Position) -> Assignment {
        Assignment {
            alert: AlertId(1),
            allocation: AllocationId(1),
            target,
        }
    }

    fn ambulance(position: Position) -> EntitySimulator {
        EntitySimulator::new(&[EntityConfig::new("amb-1", position).in_pool("ambulances").with_speed(5.0)])
    }

    #[test]
    fn arrival_fires_exactly_once() {
        let mut sim = ambulance(Position::new(10.0, 10.0));
        let mut walk = RandomWalkGenerator::seeded(1);
        sim.assign(&EntityId::from("amb-1"), assignment(Position::new(50.0, 50.0)), false)
            .unwrap();

        let mut arrivals = Vec::new();
        for tick in 1..=21_u64 {
            let events = sim.advance(&mut walk, |_| true, 3.0);
            if events.iter().any(|e| matches!(e, EntityEvent::Arrived { .. })) {
                arrivals.push(tick);
            }
        }
        assert_eq!(arrivals, vec![11]);
        let view = sim.view("amb-1").unwrap();
        assert_eq!(view.status, EntityStatus::Arrived);
        assert!(view.position.distance_to(Position::new(50.0, 50.0)) <= 3.0);
    }

    #[test]
    fn dispatched_entity_always_has_a_target() {
        let mut sim = ambulance(Position::new(10.0, 10.0));
        sim.assign(&EntityId::from("amb-1"), assignment(Position::new(20.0, 10.0)), false)
            .unwrap();
        let view = sim.view("amb-1").unwrap();
        assert_eq!(view.status, EntityStatus::Dispatched);
        assert_eq!(view.target, Some(Position::new(20.0, 10.0)));
        assert_eq!(view.target_alert, Some(AlertId(1)));
    }

    #[test]
    fn vanished_target_recalls_the_unit() {
        let mut sim = ambulance(Position::new(10.0, 10.0));
        let mut walk = RandomWalkGenerator::seeded(1);
        sim.assign(&EntityId::from("amb-1"), assignment(Position::new(90.0, 90.0)), false)
            .unwrap();
        sim.advance(&mut walk, |_| true, 3.0);
        let events = sim.advance(&mut walk, |_| false, 3.0);
        assert!(matches!(events.first(), Some(EntityEvent::Recalled { .. })));
        assert_eq!(sim.view("amb-1").unwrap().status, EntityStatus::Idle);
    }

    #[test]
    fn mobilizing_waits_until_started() {
        let mut sim = ambulance(Position::new(10.0, 10.0));
        let mut walk = RandomWalkGenerator::seeded(1);
        sim.assign(&EntityId::from("amb-1"), assignment(Position::new(50.0, 10.0)), true)
            .unwrap();
        assert_eq!(sim.view("amb-1").unwrap().status, EntityStatus::Busy);
        sim.advance(&mut walk, |_| true, 3.0);
        assert_eq!(sim.view("amb-1").unwrap().position, Position::new(10.0, 10.0));
        assert_eq!(sim.start_moving(AllocationId(1)), Some(EntityId::from("amb-1")));
        sim.advance(&mut walk, |_| true, 3.0);
        assert_eq!(sim.view("amb-1").unwrap().position, Position::new(15.0, 10.0));
    }

    #[test]
    fn busy_entities_cannot_be_assigned_twice() {
        let mut sim = ambulance(Position::new(10.0, 10.0));
        let id = EntityId::from("amb-1");
        sim.assign(&id, assignment(Position::new(50.0, 10.0)), false).unwrap();
        assert!(matches!(
            sim.assign(&id, assignment(Position::new(50.0, 10.0)), false),
            Err(EntityError::Unavailable { .. })
        ));
        assert_eq!(sim.release(AllocationId(1)), Some(id.clone()));
        assert!(sim.assign(&id, assignment(Position::new(50.0, 10.0)), false).is_ok());
    }

    #[test]
    fn wandering_stays_on_the_map() {
        let mut config = EntityConfig::new("w", Position::new(0.0, 100.0));
        config.behavior = BehaviorConfig::Wander { jitter: 5.0 };
        let mut sim = EntitySimulator::new(&[config]);
        let mut walk = RandomWalkGenerator::seeded(9);
        for _ in 0..200 {
            sim.advance(&mut walk, |_| true, 3.0);
            assert!(sim.view("w").unwrap().position.is_within_bounds());
        }
    }

    #[test]
    fn patrol_cycles_waypoints() {
        let config = EntityConfig::new("p", Position::new(0.0, 0.0))
            .with_speed(10.0)
            .patrolling(vec![Position::new(10.0, 0.0), Position::new(0.0, 0.0)]);
        let mut sim = EntitySimulator::new(&[config]);
        let mut walk = RandomWalkGenerator::seeded(1);
        assert_eq!(sim.view("p").unwrap().status, EntityStatus::Moving);
        sim.advance(&mut walk, |_| true, 3.0);
        assert_eq!(sim.view("p").unwrap().target, Some(Position::new(0.0, 0.0)));
        sim.advance(&mut walk, |_| true, 3.0);
        assert_eq!(sim.view("p").unwrap().position, Position::new(0.0, 0.0));
        assert_eq!(sim.view("p").unwrap().target, Some(Position::new(10.0, 0.0)));
    }

    #[test]
    fn nearest_available_member_is_chosen() {
        let mut sim = EntitySimulator::new(&[
            EntityConfig::new("far", Position::new(90.0, 90.0)).in_pool("fire"),
            EntityConfig::new("near", Position::new(12.0, 12.0)).in_pool("fire"),
            EntityConfig::new("other", Position::new(10.0, 10.0)).in_pool("police"),
        ]);
        let pool = PoolId::from("fire");
        let target = Position::new(10.0, 10.0);
        assert_eq!(sim.nearest_available(&pool, target, &[]), Some(EntityId::from("near")));
        sim.assign(&EntityId::from("near"), assignment(target), false).unwrap();
        assert_eq!(sim.nearest_available(&pool, target, &[]), Some(EntityId::from("far")));
    }

    #[test]
    fn reserved_members_are_skipped() {
        let sim = EntitySimulator::new(&[
            EntityConfig::new("a", Position::new(10.0, 10.0)).in_pool("fire"),
            EntityConfig::new("b", Position::new(50.0, 50.0)).in_pool("fire"),
        ]);
        let pool = PoolId::from("fire");
        let target = Position::new(10.0, 10.0);
        let reserved = [EntityId::from("a")];
        assert_eq!(sim.nearest_available(&pool, target, &reserved), Some(EntityId::from("b")));
        let all = [EntityId::from("a"), EntityId::from("b")];
        assert_eq!(sim.nearest_available(&pool, target, &all), None);
    }
}
