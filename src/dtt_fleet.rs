// Fleet store: the single source of truth for the current set of buses.
//
// The store publishes immutable snapshots through a watch channel. Every write
// builds a new bus list from the current snapshot and swaps it in under the
// channel's write lock, so readers only ever see whole snapshots.

use crate::dtt_models::{Bus, BusStatus, DTTModels, Location, Route};
use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value, feature::Id};
use rand::Rng;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    pub revision: u64,
    pub buses: Vec<Bus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteFilter {
    All,
    Route(String),
}

impl RouteFilter {
    pub fn matches(&self, bus: &Bus) -> bool {
        match self {
            RouteFilter::All => true,
            RouteFilter::Route(route_id) => &bus.route_id == route_id,
        }
    }
}

impl FromStr for RouteFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s == "all" { RouteFilter::All } else { RouteFilter::Route(s.to_string()) })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub route_id: String,
    pub route_name: String,
    pub total: usize,
    pub active: usize,
    pub passengers: u32,
}

impl FleetSnapshot {
    pub fn new(buses: Vec<Bus>) -> Self {
        FleetSnapshot { revision: 0, buses }
    }

    /// The snapshot that follows this one
    pub fn next(&self, buses: Vec<Bus>) -> Self {
        FleetSnapshot { revision: self.revision + 1, buses }
    }

    pub fn list(&self) -> &[Bus] {
        &self.buses
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn filter_by_route(&self, filter: &RouteFilter) -> Vec<&Bus> {
        self.buses.iter().filter(|b| filter.matches(b)).collect()
    }

    pub fn count_by_status(&self, status: BusStatus) -> usize {
        self.buses.iter().filter(|b| b.status == status).count()
    }

    pub fn active_count(&self) -> usize {
        self.count_by_status(BusStatus::Active)
    }

    pub fn route_summaries(&self, routes: &[Route]) -> Vec<RouteSummary> {
        routes
            .iter()
            .map(|route| {
                let on_route: Vec<&Bus> = self.buses.iter().filter(|b| b.route_id == route.id).collect();
                RouteSummary {
                    route_id: route.id.clone(),
                    route_name: route.name.clone(),
                    total: on_route.len(),
                    active: on_route.iter().filter(|b| b.is_active()).count(),
                    passengers: on_route.iter().map(|b| b.passengers).sum(),
                }
            })
            .collect()
    }
}

// ============================================================================
// Store handle
// ============================================================================

#[derive(Clone)]
pub struct FleetStore {
    tx: Arc<watch::Sender<Arc<FleetSnapshot>>>,
}

impl FleetStore {
    pub fn new(buses: Vec<Bus>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(FleetSnapshot::new(buses)));
        FleetStore { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    /// Read-modify-replace against the current snapshot. `f` returns the new
    /// bus list, or `None` to leave the store (and its revision) untouched.
    /// Returns whether a new snapshot was published.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&FleetSnapshot) -> Option<Vec<Bus>>,
    {
        self.tx.send_if_modified(|current| match f(&**current) {
            Some(buses) => {
                *current = Arc::new(current.next(buses));
                true
            }
            None => false,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FleetSnapshot>> {
        self.tx.subscribe()
    }

    /// Stream of snapshots published after this call
    pub fn updates(&self) -> WatchStream<Arc<FleetSnapshot>> {
        WatchStream::from_changes(self.subscribe())
    }

    pub fn list(&self) -> Vec<Bus> {
        self.snapshot().buses.clone()
    }

    pub fn filter_by_route(&self, filter: &RouteFilter) -> Vec<Bus> {
        self.snapshot().filter_by_route(filter).into_iter().cloned().collect()
    }

    pub fn count_by_status(&self, status: BusStatus) -> usize {
        self.snapshot().count_by_status(status)
    }

    /// Removes every bus carrying `id`. No-op (and no new revision) if absent.
    pub fn remove(&self, id: &str) -> bool {
        self.update(|current| {
            if !current.contains(id) {
                return None;
            }
            Some(current.buses.iter().filter(|b| b.id != id).cloned().collect())
        })
    }
}

// ============================================================================
// Mock seeding
// ============================================================================

pub fn seed_mock_fleet<R: Rng + ?Sized>(
    count: usize,
    routes: &[Route],
    origin: Location,
    capacity: u32,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Vec<Bus> {
    if routes.is_empty() {
        return Vec::new();
    }

    (0..count)
        .map(|i| {
            let number = 1000 + i;
            let moving = rng.gen_bool(0.7);
            let lat_offset = rng.gen_range(-0.05..0.05);
            let lng_offset = rng.gen_range(-0.05..0.05);

            Bus {
                id: format!("B-{}", number),
                name: format!("DIU Bus {}", number),
                route_id: routes[i % routes.len()].id.clone(),
                driver_name: Some(format!("Driver {}", i + 1)),
                status: if moving { BusStatus::Active } else { BusStatus::Inactive },
                location: Location::new(origin.lat + lat_offset, origin.lng + lng_offset),
                speed: if moving { rng.gen_range(10..50) as f64 } else { 0.0 },
                capacity,
                passengers: rng.gen_range(0..45),
                last_updated: now,
            }
        })
        .collect()
}

// ============================================================================
// Map layer export
// ============================================================================

pub fn to_geojson(buses: &[&Bus], routes: &[Route]) -> FeatureCollection {
    let features = buses
        .iter()
        .map(|bus| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(bus.id));
            properties.insert("name".to_string(), json!(bus.name));
            properties.insert("routeId".to_string(), json!(bus.route_id));
            properties.insert("color".to_string(), json!(DTTModels::get_route_color(&bus.route_id, routes)));
            properties.insert("status".to_string(), json!(bus.status.as_str()));
            properties.insert("speed".to_string(), json!(bus.speed));
            properties.insert("lastUpdated".to_string(), json!(bus.last_updated.to_rfc3339()));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![bus.location.lng, bus.location.lat]))),
                id: Some(Id::String(bus.id.clone())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dtt_models::{DEFAULT_ROUTES, DIU_LOCATION};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub(crate) fn bus(id: &str, route_id: &str, status: BusStatus) -> Bus {
        Bus {
            id: id.to_string(),
            name: format!("DIU Bus {}", id),
            route_id: route_id.to_string(),
            driver_name: None,
            status,
            location: DIU_LOCATION,
            speed: 20.0,
            capacity: 50,
            passengers: 10,
            last_updated: Utc::now(),
        }
    }

    fn sample_store() -> FleetStore {
        FleetStore::new(vec![
            bus("B-1", "R1", BusStatus::Active),
            bus("B-2", "R2", BusStatus::Inactive),
            bus("B-3", "R1", BusStatus::Maintenance),
            bus("B-4", "R3", BusStatus::Active),
        ])
    }

    #[test]
    fn filter_all_is_identity() {
        let store = sample_store();
        let all = store.filter_by_route(&"all".parse().unwrap());
        assert_eq!(all, store.list());
    }

    #[test]
    fn filter_by_route_keeps_only_matching_buses_in_order() {
        let store = sample_store();
        let ids: Vec<String> = store
            .filter_by_route(&RouteFilter::Route("R1".to_string()))
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["B-1", "B-3"]);
        assert!(store.filter_by_route(&RouteFilter::Route("R9".to_string())).is_empty());
    }

    #[test]
    fn empty_snapshot_reports_empty() {
        let empty = FleetSnapshot::new(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.active_count(), 0);
        assert!(!sample_store().snapshot().is_empty());
    }

    #[test]
    fn counts_by_status() {
        let store = sample_store();
        assert_eq!(store.count_by_status(BusStatus::Active), 2);
        assert_eq!(store.count_by_status(BusStatus::Inactive), 1);
        assert_eq!(store.count_by_status(BusStatus::Maintenance), 1);
    }

    #[test]
    fn remove_deletes_exactly_the_requested_bus() {
        let store = sample_store();
        let before = store.snapshot();

        assert!(store.remove("B-2"));
        let after = store.snapshot();
        assert_eq!(after.len(), before.len() - 1);
        assert!(!after.contains("B-2"));
        for bus in after.list() {
            assert_eq!(Some(bus), before.get(&bus.id));
        }
    }

    #[test]
    fn removing_an_unknown_id_publishes_nothing() {
        let store = sample_store();
        let revision = store.revision();
        assert!(!store.remove("B-404"));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn readers_keep_their_snapshot_across_replacement() {
        let store = sample_store();
        let held = store.snapshot();
        store.remove("B-1");
        assert_eq!(held.len(), 4);
        assert_eq!(store.snapshot().len(), 3);
        assert_eq!(store.revision(), held.revision + 1);
    }

    #[test]
    fn subscribers_see_replacements() {
        let store = sample_store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());
        store.remove("B-4");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 3);
    }

    #[test]
    fn route_summaries_cover_every_route() {
        let store = sample_store();
        let summaries = store.snapshot().route_summaries(&DEFAULT_ROUTES);
        assert_eq!(summaries.len(), DEFAULT_ROUTES.len());
        let r1 = &summaries[0];
        assert_eq!((r1.total, r1.active, r1.passengers), (2, 1, 20));
    }

    #[test]
    fn seeded_fleet_follows_the_mock_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();
        let buses = seed_mock_fleet(60, &DEFAULT_ROUTES, DIU_LOCATION, 50, &mut rng, now);

        assert_eq!(buses.len(), 60);
        assert_eq!(buses[0].id, "B-1000");
        assert_eq!(buses[59].name, "DIU Bus 1059");
        assert_eq!(buses[7].route_id, "R2");
        assert_eq!(buses[7].driver_name.as_deref(), Some("Driver 8"));
        for bus in &buses {
            assert!((bus.location.lat - DIU_LOCATION.lat).abs() <= 0.05);
            assert!((bus.location.lng - DIU_LOCATION.lng).abs() <= 0.05);
            assert!(bus.passengers < 45);
            assert_eq!(bus.capacity, 50);
            assert_eq!(bus.last_updated, now);
            match bus.status {
                BusStatus::Active => assert!(bus.speed >= 10.0 && bus.speed < 50.0),
                _ => assert_eq!(bus.speed, 0.0),
            }
        }
    }

    #[test]
    fn geojson_points_are_lng_lat() {
        let store = sample_store();
        let snapshot = store.snapshot();
        let buses = snapshot.filter_by_route(&RouteFilter::Route("R1".to_string()));
        let collection = to_geojson(&buses, &DEFAULT_ROUTES);

        assert_eq!(collection.features.len(), 2);
        let feature = &collection.features[0];
        match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coords)) => assert_eq!(coords, &vec![DIU_LOCATION.lng, DIU_LOCATION.lat]),
            other => panic!("expected point geometry, got {:?}", other),
        }
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["color"], "#10b981");
        assert_eq!(props["status"], "active");
    }
}
