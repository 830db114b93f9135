//! Fault injection: randomly disabling and re-enabling the local acceptor
//! role to simulate crash/recover cycles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::server::ReplicaId;
use crate::utils::PaxstoreError;

use rand::Rng;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Strategy deciding whether this node's acceptor role currently answers.
/// `prepare`/`accept` consult it; liveness checks and `learn` do not.
pub trait AcceptorGate: fmt::Debug + Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Shared on/off switch. Clones refer to the same flag, so tests (or the
/// background injector) can flip a node's acceptor from outside.
#[derive(Debug, Clone)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    /// Creates a new switch, initially enabled.
    pub fn new() -> Self {
        FaultSwitch(Arc::new(AtomicBool::new(true)))
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for FaultSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceptorGate for FaultSwitch {
    fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Timing of the crash/recover cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSchedule {
    /// Minimum duration of an active phase.
    pub active_min: Duration,

    /// Maximum duration of an active phase.
    pub active_max: Duration,

    /// Fixed duration of an inactive phase.
    pub inactive: Duration,
}

impl FaultSchedule {
    pub fn new(
        active_min: Duration,
        active_max: Duration,
        inactive: Duration,
    ) -> Result<Self, PaxstoreError> {
        if active_min > active_max {
            return Err(PaxstoreError(format!(
                "active_min {} ms > active_max {} ms",
                active_min.as_millis(),
                active_max.as_millis()
            )));
        }
        if inactive.is_zero() {
            return Err(PaxstoreError::msg("zero inactive duration"));
        }
        Ok(FaultSchedule {
            active_min,
            active_max,
            inactive,
        })
    }

    /// Draws the duration of the next active phase.
    fn draw_active(&self) -> Duration {
        if self.active_min == self.active_max {
            return self.active_min;
        }
        rand::thread_rng().gen_range(self.active_min..=self.active_max)
    }
}

/// Background fault injector module.
#[derive(Debug)]
pub struct FaultInjector {
    /// My replica ID.
    me: ReplicaId,

    /// Switch this injector drives.
    switch: FaultSwitch,

    /// Cycle timing.
    schedule: FaultSchedule,

    /// Sender side of the stop signal.
    tx_stop: Option<watch::Sender<bool>>,

    /// Join handle of the injector thread.
    injector_handle: Option<JoinHandle<()>>,
}

impl FaultInjector {
    /// Creates a new fault injector over given switch.
    pub fn new(
        me: ReplicaId,
        switch: FaultSwitch,
        schedule: FaultSchedule,
    ) -> Self {
        FaultInjector {
            me,
            switch,
            schedule,
            tx_stop: None,
            injector_handle: None,
        }
    }

    /// Spawns the injector thread.
    pub fn setup(&mut self) -> Result<(), PaxstoreError> {
        if self.injector_handle.is_some() {
            return logged_err!(self.me; "fault injector already running");
        }

        let (tx_stop, rx_stop) = watch::channel(false);
        self.tx_stop = Some(tx_stop);
        self.injector_handle = Some(tokio::spawn(Self::injector_thread(
            self.me,
            self.switch.clone(),
            self.schedule,
            rx_stop,
        )));
        Ok(())
    }

    /// Stops the injector thread and leaves the acceptor enabled.
    pub async fn stop(&mut self) -> Result<(), PaxstoreError> {
        if let Some(tx_stop) = self.tx_stop.take() {
            // receiver may be gone already if the thread has exited
            let _ = tx_stop.send(true);
        }
        if let Some(handle) = self.injector_handle.take() {
            handle.await?;
        }
        self.switch.enable();
        Ok(())
    }

    /// Injector thread function.
    async fn injector_thread(
        me: ReplicaId,
        switch: FaultSwitch,
        schedule: FaultSchedule,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "fault injector thread spawned");

        loop {
            let active = schedule.draw_active();
            tokio::select! {
                _ = time::sleep(active) => {},
                _ = rx_stop.changed() => break,
            }

            switch.disable();
            pf_info!(me; "acceptor FAILED");

            tokio::select! {
                _ = time::sleep(schedule.inactive) => {},
                _ = rx_stop.changed() => break,
            }

            switch.enable();
            pf_info!(me; "acceptor RESTARTED");
        }

        pf_debug!(me; "fault injector thread exited");
    }
}

#[cfg(test)]
mod faults_tests {
    use super::*;

    #[test]
    fn switch_shared_between_clones() {
        let switch = FaultSwitch::new();
        let other = switch.clone();
        assert!(other.is_enabled());
        switch.disable();
        assert!(!other.is_enabled());
        other.enable();
        assert!(switch.is_enabled());
    }

    #[test]
    fn schedule_validation() {
        let ms = Duration::from_millis;
        assert!(FaultSchedule::new(ms(10), ms(5), ms(1)).is_err());
        assert!(FaultSchedule::new(ms(5), ms(10), ms(0)).is_err());
        let schedule = FaultSchedule::new(ms(5), ms(10), ms(3)).unwrap();
        for _ in 0..50 {
            let d = schedule.draw_active();
            assert!(d >= ms(5) && d <= ms(10));
        }
        let fixed = FaultSchedule::new(ms(7), ms(7), ms(3)).unwrap();
        assert_eq!(fixed.draw_active(), ms(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn injector_toggles() -> Result<(), PaxstoreError> {
        let switch = FaultSwitch::new();
        let schedule = FaultSchedule::new(
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        )?;
        let mut injector = FaultInjector::new(0, switch.clone(), schedule);
        injector.setup()?;
        assert!(injector.setup().is_err());

        let mut saw_disabled = false;
        let mut saw_reenabled = false;
        for _ in 0..200 {
            time::sleep(Duration::from_millis(2)).await;
            if !switch.is_enabled() {
                saw_disabled = true;
            } else if saw_disabled {
                saw_reenabled = true;
                break;
            }
        }
        assert!(saw_disabled);
        assert!(saw_reenabled);

        injector.stop().await?;
        assert!(switch.is_enabled());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_while_inactive_reenables() -> Result<(), PaxstoreError> {
        let switch = FaultSwitch::new();
        let schedule = FaultSchedule::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_secs(60),
        )?;
        let mut injector = FaultInjector::new(1, switch.clone(), schedule);
        injector.setup()?;
        time::sleep(Duration::from_millis(50)).await;
        assert!(!switch.is_enabled());
        injector.stop().await?;
        assert!(switch.is_enabled());
        Ok(())
    }
}
