// Simulation driver: fabricates fleet movement on a fixed period.
//
// Only active buses move. Each tick jitters location and speed, stamps
// last_updated and publishes the result as a new fleet snapshot.

use crate::dtt_fleet::{FleetSnapshot, FleetStore};
use crate::dtt_models::{Bus, Location};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParams {
    /// Max per-axis position change per tick, in degrees
    pub position_jitter: f64,
    /// Max speed change per tick, in km/h
    pub speed_jitter: f64,
    pub max_speed: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            position_jitter: 0.0005,
            speed_jitter: 2.5,
            max_speed: 60.0,
        }
    }
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, bound: f64) -> f64 {
    if bound <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-bound..=bound)
}

fn step_bus<R: Rng + ?Sized>(bus: &Bus, params: &SimulationParams, rng: &mut R, now: DateTime<Utc>) -> Bus {
    let location = Location::new(
        bus.location.lat + jitter(rng, params.position_jitter),
        bus.location.lng + jitter(rng, params.position_jitter),
    );
    let speed = (bus.speed + jitter(rng, params.speed_jitter)).clamp(0.0, params.max_speed);

    Bus {
        location,
        speed,
        last_updated: now,
        ..bus.clone()
    }
}

/// One tick over a snapshot. Buses that are not active come back untouched.
pub fn advance<R: Rng + ?Sized>(
    snapshot: &FleetSnapshot,
    params: &SimulationParams,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Vec<Bus> {
    snapshot
        .buses
        .iter()
        .map(|bus| {
            if bus.is_active() {
                step_bus(bus, params, rng, now)
            } else {
                bus.clone()
            }
        })
        .collect()
}

// ============================================================================
// Driver task
// ============================================================================

pub struct SimulationDriver;

impl SimulationDriver {
    /// Starts ticking on `runtime`. The first tick fires one full period after
    /// the call, like a browser interval.
    pub fn spawn(
        runtime: &Handle,
        store: FleetStore,
        params: SimulationParams,
        period: Duration,
        mut rng: StdRng,
    ) -> SimulationHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = runtime.spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count: u64 = 0;

            log::info!("Simulation driver started ({} ms period)", period.as_millis());
            loop {
                tokio::select! {
                    biased;
                    // Fires on cancel() and when the handle is dropped
                    _ = &mut shutdown_rx => break,
                    _ = ticks.tick() => {
                        let now = Utc::now();
                        store.update(|current| Some(advance(current, &params, &mut rng, now)));
                        count += 1;
                        log::trace!("Simulation tick #{} published revision {}", count, store.revision());
                    }
                }
            }
            log::info!("Simulation driver stopped after {} ticks", count);
            count
        });

        SimulationHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owning handle for a running driver. Dropping it cancels the driver.
pub struct SimulationHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl SimulationHandle {
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the driver to stop. Only the first call has an effect.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            log::debug!("Simulation driver cancellation requested");
        }
    }

    /// Cancels and waits for the task to finish, returning the number of
    /// ticks it ran. No tick fires after this resolves.
    pub async fn shutdown(mut self) -> u64 {
        self.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(count) => count,
                Err(e) => {
                    log::warn!("Simulation driver ended abnormally: {}", e);
                    0
                }
            },
            None => 0,
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtt_fleet::tests::bus;
    use crate::dtt_models::BusStatus;
    use rand::SeedableRng;
    use tokio_stream::StreamExt;

    fn mixed_fleet() -> FleetSnapshot {
        let mut fast = bus("B-1", "R1", BusStatus::Active);
        fast.speed = 59.5;
        let mut slow = bus("B-2", "R1", BusStatus::Active);
        slow.speed = 0.5;
        FleetSnapshot::new(vec![
            fast,
            slow,
            bus("B-3", "R2", BusStatus::Inactive),
            bus("B-4", "R3", BusStatus::Maintenance),
        ])
    }

    #[test]
    fn non_active_buses_are_left_identical() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut snapshot = mixed_fleet();
        for _ in 0..200 {
            let next = advance(&snapshot, &SimulationParams::default(), &mut rng, Utc::now());
            assert_eq!(next[2], snapshot.buses[2]);
            assert_eq!(next[3], snapshot.buses[3]);
            snapshot = snapshot.next(next);
        }
    }

    #[test]
    fn active_buses_stay_within_tick_bounds() {
        let params = SimulationParams::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut snapshot = mixed_fleet();

        for _ in 0..500 {
            let now = Utc::now();
            let next = advance(&snapshot, &params, &mut rng, now);
            for (before, after) in snapshot.buses.iter().zip(&next).take(2) {
                assert!((after.location.lat - before.location.lat).abs() <= params.position_jitter + 1e-12);
                assert!((after.location.lng - before.location.lng).abs() <= params.position_jitter + 1e-12);
                assert!((0.0..=params.max_speed).contains(&after.speed));
                assert_eq!(after.last_updated, now);
                assert_eq!(after.status, before.status);
                assert_eq!(after.name, before.name);
                assert_eq!(after.capacity, before.capacity);
                assert_eq!(after.passengers, before.passengers);
            }
            snapshot = snapshot.next(next);
        }
    }

    #[test]
    fn zero_jitter_only_touches_the_timestamp() {
        let params = SimulationParams { position_jitter: 0.0, speed_jitter: 0.0, max_speed: 60.0 };
        let mut rng = StdRng::seed_from_u64(3);
        let snapshot = mixed_fleet();
        let next = advance(&snapshot, &params, &mut rng, Utc::now());
        assert_eq!(next[0].location, snapshot.buses[0].location);
        assert_eq!(next[0].speed, snapshot.buses[0].speed);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_ticks_on_its_period_and_stops_on_shutdown() {
        let store = FleetStore::new(mixed_fleet().buses);
        let handle = SimulationDriver::spawn(
            &Handle::current(),
            store.clone(),
            SimulationParams::default(),
            Duration::from_millis(2000),
            StdRng::seed_from_u64(4),
        );
        assert!(handle.is_running());

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.revision(), 0);

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.revision(), 1);

        time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(store.revision(), 3);

        assert_eq!(handle.shutdown().await, 3);
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.revision(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_driver() {
        let store = FleetStore::new(mixed_fleet().buses);
        let handle = SimulationDriver::spawn(
            &Handle::current(),
            store.clone(),
            SimulationParams::default(),
            Duration::from_millis(2000),
            StdRng::seed_from_u64(5),
        );
        drop(handle);

        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let store = FleetStore::new(mixed_fleet().buses);
        let mut handle = SimulationDriver::spawn(
            &Handle::current(),
            store.clone(),
            SimulationParams::default(),
            Duration::from_millis(100),
            StdRng::seed_from_u64(6),
        );
        handle.cancel();
        handle.cancel();
        assert!(!handle.is_running());
        assert_eq!(handle.shutdown().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_receive_each_tick() {
        let fleet = mixed_fleet();
        let store = FleetStore::new(fleet.buses.clone());
        let mut updates = store.updates();
        let handle = SimulationDriver::spawn(
            &Handle::current(),
            store.clone(),
            SimulationParams::default(),
            Duration::from_millis(2000),
            StdRng::seed_from_u64(7),
        );

        let first = updates.next().await.unwrap();
        assert_eq!(first.revision, 1);
        assert_eq!(first.buses[2], fleet.buses[2]);
        let second = updates.next().await.unwrap();
        assert_eq!(second.revision, 2);

        handle.shutdown().await;
    }
}
