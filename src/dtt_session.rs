// Fleet session: owns the store, the editor, the async runtime and the
// simulation driver for the lifetime of a front end.

use crate::dtt_config::AppConfig;
use crate::dtt_editor::ReconcilingEditor;
use crate::dtt_fleet::{FleetStore, RouteFilter, seed_mock_fleet, to_geojson};
use crate::dtt_models::{DTTError, Result, Route};
use crate::dtt_sim::{SimulationDriver, SimulationHandle};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::{self, Runtime};

pub struct FleetSession {
    runtime: Runtime,
    editor: ReconcilingEditor,
    routes: Vec<Route>,
    simulation: Option<SimulationHandle>,
    seed: Option<u64>,
}

impl FleetSession {
    /// Seeds the mock fleet. The simulation is not started yet.
    pub fn new(config: &AppConfig, seed: Option<u64>) -> Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dtt-sim")
            .enable_time()
            .build()
            .map_err(|e| DTTError::Runtime(format!("Failed to start async runtime: {}", e)))?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let buses = seed_mock_fleet(
            config.seed_fleet_size,
            &config.routes,
            config.default_origin,
            config.default_capacity,
            &mut rng,
            Utc::now(),
        );
        log::info!("Seeded {} buses across {} routes", buses.len(), config.routes.len());

        let store = FleetStore::new(buses);
        Ok(FleetSession {
            runtime,
            editor: ReconcilingEditor::new(store, config.editor_policy()),
            routes: config.routes.clone(),
            simulation: None,
            seed,
        })
    }

    pub fn store(&self) -> &FleetStore {
        self.editor.store()
    }

    pub fn editor(&self) -> &ReconcilingEditor {
        &self.editor
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn start_simulation(&mut self, config: &AppConfig) {
        if self.simulation_running() {
            return;
        }
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        self.simulation = Some(SimulationDriver::spawn(
            self.runtime.handle(),
            self.store().clone(),
            config.simulation_params(),
            config.tick_interval(),
            rng,
        ));
    }

    pub fn simulation_running(&self) -> bool {
        self.simulation.as_ref().is_some_and(|s| s.is_running())
    }

    /// Writes the (filtered) fleet as a GeoJSON FeatureCollection
    pub fn export_geojson(&self, path: &Path, filter: &RouteFilter) -> Result<usize> {
        let snapshot = self.store().snapshot();
        let buses = snapshot.filter_by_route(filter);
        let collection = to_geojson(&buses, &self.routes);
        let json = serde_json::to_string_pretty(&collection)
            .map_err(|e| DTTError::FileError(format!("Failed to serialize map layer: {}", e)))?;
        fs::write(path, json).map_err(|e| DTTError::FileError(format!("Failed to write {:?}: {}", path, e)))?;
        log::info!("Exported {} buses to {:?}", buses.len(), path);
        Ok(buses.len())
    }

    /// Stops the simulation and waits for it, then tears the runtime down.
    pub fn shutdown(mut self) {
        if let Some(handle) = self.simulation.take() {
            let ticks = self.runtime.block_on(handle.shutdown());
            log::debug!("Simulation joined after {} ticks", ticks);
        }
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(fleet: usize, tick_ms: u64) -> AppConfig {
        AppConfig {
            seed_fleet_size: fleet,
            tick_interval_ms: tick_ms,
            ..AppConfig::default()
        }
    }

    #[test]
    fn seeding_is_reproducible_with_a_seed() {
        let a = FleetSession::new(&config(12, 2000), Some(99)).unwrap();
        let b = FleetSession::new(&config(12, 2000), Some(99)).unwrap();
        let (a_buses, b_buses) = (a.store().list(), b.store().list());
        assert_eq!(a_buses.len(), 12);
        for (x, y) in a_buses.iter().zip(&b_buses) {
            assert_eq!((x.status, x.location, x.passengers), (y.status, y.location, y.passengers));
        }
        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn simulation_runs_until_shutdown() {
        let mut session = FleetSession::new(&config(5, 10), Some(1)).unwrap();
        let store = session.store().clone();
        assert!(!session.simulation_running());

        session.start_simulation(&config(5, 10));
        assert!(session.simulation_running());
        thread::sleep(Duration::from_millis(150));
        assert!(store.revision() > 0);

        session.shutdown();
        let stopped_at = store.revision();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(store.revision(), stopped_at);
    }

    #[test]
    fn geojson_export_writes_a_feature_per_bus() {
        let session = FleetSession::new(&config(8, 2000), Some(3)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.geojson");

        let written = session.export_geojson(&path, &RouteFilter::Route("R1".to_string())).unwrap();
        assert_eq!(written, 2);

        let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"].as_array().unwrap().len(), 2);
        session.shutdown();
    }
}
