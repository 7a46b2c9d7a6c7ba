//! Built-in domain configurations.
//!
//! Each preset is a complete [`EngineConfig`] for one dashboard domain and
//! passes [`EngineConfig::validate`]. Presets are starting points: callers
//! may override the seed or tick interval before building an engine.

use vigil_types::{Comparator, Position, Severity};

use crate::config::{
    AlertRuleConfig, DedupGranularity, DependencyConfig, DependencyRule, EngineConfig, EntityConfig,
    FlagConfig, IncidentGeneratorConfig, MetricConfig, ResourcePoolConfig, SiteConfig,
};

/// Names accepted by [`by_name`].
pub const PRESET_NAMES: [&str; 4] = ["waste_management", "traffic", "fire_response", "child_safety"];

/// Look up a preset by name.
pub fn by_name(name: &str) -> Option<EngineConfig> {
    match name {
        "waste_management" => Some(waste_management()),
        "traffic" => Some(traffic()),
        "fire_response" => Some(fire_response()),
        "child_safety" => Some(child_safety()),
        _ => None,
    }
}

fn flag(name: &str, delay: u64) -> FlagConfig {
    FlagConfig {
        name: name.to_owned(),
        initial: false,
        activation_delay_ticks: delay,
    }
}

fn rule(
    name: &str,
    metric: &str,
    comparator: Comparator,
    threshold: f64,
    severity: Severity,
    category: &str,
) -> AlertRuleConfig {
    AlertRuleConfig {
        severity,
        category: category.to_owned(),
        ..AlertRuleConfig::new(name, metric, comparator, threshold)
    }
}

fn site(label: &str, x: f64, y: f64) -> SiteConfig {
    SiteConfig {
        label: label.to_owned(),
        position: Position::new(x, y),
    }
}

fn unit(id: &str, pool: &str, kind: &str, x: f64, y: f64, speed: f64) -> EntityConfig {
    EntityConfig::new(id, Position::new(x, y))
        .in_pool(pool)
        .with_kind(kind)
        .with_speed(speed)
}

/// Bin fill levels, landfill capacity, recycling and collection trucks.
pub fn waste_management() -> EngineConfig {
    let depot = (10.0, 10.0);
    EngineConfig {
        domain: "waste_management".to_owned(),
        flags: vec![flag("holiday", 0)],
        metrics: vec![
            MetricConfig::bounded("binFill", 55.0, 0.0, 100.0)
                .with_walk(2.0, 0.4)
                .with_flag_bias("holiday", 1.0)
                .with_unit("%")
                .with_history(24),
            MetricConfig::bounded("landfillCapacity", 72.0, 0.0, 100.0)
                .with_walk(0.5, 0.05)
                .with_unit("%")
                .with_history(7),
            MetricConfig::bounded("recyclingRate", 38.0, 0.0, 100.0)
                .with_walk(1.0, 0.0)
                .with_unit("%")
                .with_history(7),
            MetricConfig::unbounded("treesSaved", 1_200.0).with_walk(0.0, 3.0),
        ],
        dependencies: vec![
            DependencyConfig::new(
                "landfillCapacity",
                "binFill",
                DependencyRule::Step {
                    comparator: Comparator::Ge,
                    threshold: 85.0,
                    delta: 0.3,
                },
            ),
            DependencyConfig::new(
                "treesSaved",
                "recyclingRate",
                DependencyRule::Linear {
                    coefficient: 0.1,
                    pivot: 20.0,
                },
            ),
        ],
        alert_rules: vec![
            AlertRuleConfig {
                dedup_key: Some("landfill-critical".to_owned()),
                scope: "landfill".to_owned(),
                location: Some(Position::new(90.0, 80.0)),
                clear_after_ticks: 3,
                ..rule(
                    "landfill-critical",
                    "landfillCapacity",
                    Comparator::Ge,
                    90.0,
                    Severity::Critical,
                    "landfill",
                )
            },
            AlertRuleConfig {
                scope: "district".to_owned(),
                location: Some(Position::new(45.0, 35.0)),
                ..rule("bins-overflowing", "binFill", Comparator::Ge, 85.0, Severity::High, "collection")
            },
            rule("recycling-low", "recyclingRate", Comparator::Lt, 20.0, Severity::Low, "recycling"),
        ],
        incident_generators: vec![IncidentGeneratorConfig {
            name: "illegal-dumping".to_owned(),
            category: "illegal_dumping".to_owned(),
            chance: 0.02,
            flag_chance: [("holiday".to_owned(), 0.03)].into_iter().collect(),
            severity: Severity::Medium,
            sites: vec![
                site("North Alley", 30.0, 85.0),
                site("Riverside Lot", 70.0, 20.0),
                site("Market Square", 50.0, 50.0),
            ],
            dedup: DedupGranularity::PerScope,
            message: "Illegal dumping reported at {scope}".to_owned(),
        }],
        entities: vec![
            unit("truck-1", "trucks", "truck", depot.0, depot.1, 4.0),
            unit("truck-2", "trucks", "truck", depot.0, depot.1, 4.0),
            unit("truck-3", "trucks", "truck", depot.0, depot.1, 4.0),
        ],
        resource_pools: vec![ResourcePoolConfig {
            label: Some("Collection trucks".to_owned()),
            mobilization_ticks: 1,
            dwell_ticks: Some(4),
            ..ResourcePoolConfig::new("trucks", 3)
        }],
        ..EngineConfig::default()
    }
}

/// Congestion, speeds and emissions with rain and patrol units.
pub fn traffic() -> EngineConfig {
    let ring = vec![
        Position::new(20.0, 20.0),
        Position::new(80.0, 20.0),
        Position::new(80.0, 80.0),
        Position::new(20.0, 80.0),
    ];
    EngineConfig {
        domain: "traffic".to_owned(),
        flags: vec![flag("rain", 0)],
        metrics: vec![
            MetricConfig::bounded("congestion", 45.0, 0.0, 100.0)
                .with_walk(3.0, 0.0)
                .with_flag_bias("rain", 1.0)
                .with_unit("%")
                .with_history(30),
            MetricConfig::bounded("avgSpeed", 48.0, 5.0, 90.0)
                .with_walk(2.0, 0.0)
                .with_unit("km/h")
                .with_history(30),
            MetricConfig::bounded("emissions", 120.0, 0.0, 400.0)
                .with_walk(4.0, 0.0)
                .with_unit("g/km"),
        ],
        dependencies: vec![
            DependencyConfig::new(
                "avgSpeed",
                "congestion",
                DependencyRule::Linear {
                    coefficient: -0.05,
                    pivot: 50.0,
                },
            ),
            DependencyConfig::new(
                "emissions",
                "congestion",
                DependencyRule::Scale {
                    coefficient: 0.001,
                    pivot: 50.0,
                },
            ),
        ],
        alert_rules: vec![
            AlertRuleConfig {
                scope: "ring-road".to_owned(),
                location: Some(Position::new(50.0, 20.0)),
                ..rule("gridlock", "congestion", Comparator::Ge, 85.0, Severity::High, "congestion")
            },
            rule("crawl", "avgSpeed", Comparator::Le, 15.0, Severity::Medium, "speed"),
            rule("smog", "emissions", Comparator::Gt, 300.0, Severity::High, "air_quality"),
        ],
        incident_generators: vec![IncidentGeneratorConfig {
            name: "collisions".to_owned(),
            category: "collision".to_owned(),
            chance: 0.03,
            flag_chance: [("rain".to_owned(), 0.05)].into_iter().collect(),
            severity: Severity::High,
            sites: vec![
                site("Junction 4", 20.0, 50.0),
                site("Harbour Bridge", 65.0, 75.0),
                site("Central Interchange", 50.0, 50.0),
            ],
            dedup: DedupGranularity::PerScope,
            message: "Collision reported at {scope}".to_owned(),
        }],
        entities: vec![
            unit("patrol-1", "patrols", "patrol_car", 20.0, 20.0, 6.0).patrolling(ring.clone()),
            unit("patrol-2", "patrols", "patrol_car", 80.0, 80.0, 6.0).patrolling(ring),
        ],
        resource_pools: vec![ResourcePoolConfig {
            label: Some("Traffic patrols".to_owned()),
            dwell_ticks: Some(3),
            ..ResourcePoolConfig::new("patrols", 2)
        }],
        ..EngineConfig::default()
    }
}

/// Fire risk driven by temperature and humidity, with fire engines.
pub fn fire_response() -> EngineConfig {
    let station = (50.0, 5.0);
    EngineConfig {
        domain: "fire_response".to_owned(),
        flags: vec![flag("heatwave", 0)],
        metrics: vec![
            MetricConfig::bounded("temperature", 24.0, -10.0, 48.0)
                .with_walk(0.8, 0.0)
                .with_flag_bias("heatwave", 0.4)
                .with_unit("C")
                .with_history(24),
            MetricConfig::bounded("humidity", 55.0, 5.0, 100.0)
                .with_walk(1.5, 0.0)
                .with_unit("%"),
            MetricConfig::bounded("fireRisk", 30.0, 0.0, 100.0)
                .with_walk(1.0, 0.0)
                .with_unit("%")
                .with_history(24),
        ],
        dependencies: vec![
            DependencyConfig::new(
                "fireRisk",
                "temperature",
                DependencyRule::Linear {
                    coefficient: 0.08,
                    pivot: 25.0,
                },
            ),
            DependencyConfig::new(
                "fireRisk",
                "humidity",
                DependencyRule::Linear {
                    coefficient: -0.05,
                    pivot: 50.0,
                },
            ),
            DependencyConfig::new(
                "humidity",
                "temperature",
                DependencyRule::Step {
                    comparator: Comparator::Gt,
                    threshold: 35.0,
                    delta: -0.5,
                },
            ),
        ],
        alert_rules: vec![
            AlertRuleConfig {
                scope: "county".to_owned(),
                location: Some(Position::new(60.0, 60.0)),
                clear_after_ticks: 3,
                ..rule("extreme-fire-risk", "fireRisk", Comparator::Ge, 80.0, Severity::Critical, "fire_risk")
            },
            rule("dry-air", "humidity", Comparator::Lt, 15.0, Severity::Medium, "weather"),
        ],
        incident_generators: vec![IncidentGeneratorConfig {
            name: "wildfires".to_owned(),
            category: "fire".to_owned(),
            chance: 0.02,
            flag_chance: [("heatwave".to_owned(), 0.04)].into_iter().collect(),
            severity: Severity::Critical,
            sites: vec![
                site("Pine Ridge", 20.0, 90.0),
                site("Old Mill", 85.0, 40.0),
                site("Canyon Road", 40.0, 70.0),
            ],
            dedup: DedupGranularity::PerCategory,
            message: "Fire reported at {scope}".to_owned(),
        }],
        entities: vec![
            unit("engine-1", "engines", "fire_engine", station.0, station.1, 5.0),
            unit("engine-2", "engines", "fire_engine", station.0, station.1, 5.0),
            unit("engine-3", "engines", "fire_engine", station.0, station.1, 5.0),
            unit("engine-4", "engines", "fire_engine", station.0, station.1, 5.0),
        ],
        resource_pools: vec![ResourcePoolConfig {
            label: Some("Fire engines".to_owned()),
            mobilization_ticks: 2,
            dwell_ticks: Some(5),
            ..ResourcePoolConfig::new("engines", 4)
        }],
        ..EngineConfig::default()
    }
}

/// Zone risk and guardian coverage with cameras and patrol officers.
pub fn child_safety() -> EngineConfig {
    EngineConfig {
        domain: "child_safety".to_owned(),
        flags: vec![flag("cameras", 3)],
        metrics: vec![
            MetricConfig::bounded("zoneRisk", 25.0, 0.0, 100.0)
                .with_walk(2.0, 0.0)
                .with_flag_bias("cameras", -0.6)
                .with_unit("%")
                .with_history(20),
            MetricConfig::bounded("guardiansOnline", 40.0, 0.0, 120.0)
                .with_walk(2.0, 0.0)
                .with_unit("guardians"),
        ],
        dependencies: vec![DependencyConfig::new(
            "zoneRisk",
            "guardiansOnline",
            DependencyRule::Linear {
                coefficient: -0.04,
                pivot: 40.0,
            },
        )],
        alert_rules: vec![
            AlertRuleConfig {
                scope: "school-zone".to_owned(),
                location: Some(Position::new(35.0, 65.0)),
                ..rule("zone-risk-high", "zoneRisk", Comparator::Ge, 75.0, Severity::High, "zone_risk")
            },
            rule("guardians-low", "guardiansOnline", Comparator::Lt, 10.0, Severity::Medium, "coverage"),
        ],
        incident_generators: vec![IncidentGeneratorConfig {
            name: "missing-child".to_owned(),
            category: "missing_child".to_owned(),
            chance: 0.01,
            flag_chance: std::collections::BTreeMap::new(),
            severity: Severity::Critical,
            sites: vec![
                site("Playground", 30.0, 60.0),
                site("Library", 70.0, 55.0),
                site("Bus Stop 12", 55.0, 15.0),
            ],
            dedup: DedupGranularity::PerScope,
            message: "Child reported missing at {scope}".to_owned(),
        }],
        entities: vec![
            unit("officer-1", "officers", "officer", 25.0, 25.0, 3.0),
            unit("officer-2", "officers", "officer", 75.0, 75.0, 3.0),
        ],
        resource_pools: vec![ResourcePoolConfig {
            label: Some("Patrol officers".to_owned()),
            dwell_ticks: Some(4),
            ..ResourcePoolConfig::new("officers", 2)
        }],
        ..EngineConfig::default()
    }
}
