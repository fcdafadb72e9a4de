//! Runtime invariant policy and the DLA degenerate-state monitor.

use tracing::{debug, warn};

use crate::error::InvariantViolation;
use crate::settings::{DegeneracySettings, InvariantMode};

/// Applies an [`InvariantMode`] to violations as they are detected.
#[derive(Debug, Clone, Copy)]
pub struct InvariantGuard {
    mode: InvariantMode,
}

impl InvariantGuard {
    #[must_use]
    pub const fn new(mode: InvariantMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub const fn mode(&self) -> InvariantMode {
        self.mode
    }

    #[must_use]
    pub const fn checks_enabled(&self) -> bool {
        !matches!(self.mode, InvariantMode::Off)
    }

    /// `Err` when the violation must halt rendering.
    pub fn admit(&self, violation: InvariantViolation) -> Result<(), InvariantViolation> {
        match self.mode {
            InvariantMode::Enforce => Err(violation),
            InvariantMode::Warn => {
                warn!(%violation, "invariant violated; continuing");
                Ok(())
            }
            InvariantMode::Off => Ok(()),
        }
    }
}

/// Watches occupancy for the two degenerate DLA states: nothing occupied, or
/// everything occupied for too long.
#[derive(Debug, Clone)]
pub struct DegeneracyMonitor {
    settings: DegeneracySettings,
    saturated_since: Option<u64>,
}

impl DegeneracyMonitor {
    #[must_use]
    pub const fn new(settings: DegeneracySettings) -> Self {
        Self {
            settings,
            saturated_since: None,
        }
    }

    /// Checks occupancy on the configured cadence.
    pub fn observe(
        &mut self,
        frame: u64,
        occupied: usize,
        total: usize,
    ) -> Option<InvariantViolation> {
        let interval = u64::from(self.settings.check_interval_frames.max(1));
        if !frame.is_multiple_of(interval) {
            return None;
        }
        debug!(frame, occupied, total, "occupancy heartbeat");
        if occupied == 0 {
            return Some(InvariantViolation::EmptyAggregate { frame });
        }
        if occupied < total {
            self.saturated_since = None;
            return None;
        }
        let since = *self.saturated_since.get_or_insert(frame);
        let frames = frame - since;
        if frames > u64::from(self.settings.full_occupancy_frames) {
            Some(InvariantViolation::SaturatedGrid { frames })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> DegeneracyMonitor {
        DegeneracyMonitor::new(DegeneracySettings {
            check_interval_frames: 10,
            full_occupancy_frames: 30,
        })
    }

    #[test]
    fn empty_aggregate_is_reported_on_cadence() {
        let mut m = monitor();
        assert_eq!(m.observe(5, 0, 100), None, "off-cadence frames skip");
        assert_eq!(
            m.observe(10, 0, 100),
            Some(InvariantViolation::EmptyAggregate { frame: 10 })
        );
    }

    #[test]
    fn saturation_must_be_sustained() {
        let mut m = monitor();
        assert_eq!(m.observe(10, 100, 100), None);
        assert_eq!(m.observe(30, 100, 100), None);
        assert_eq!(m.observe(40, 100, 100), None);
        assert_eq!(
            m.observe(50, 100, 100),
            Some(InvariantViolation::SaturatedGrid { frames: 40 })
        );
        // A gap resets the streak.
        assert_eq!(m.observe(60, 99, 100), None);
        assert_eq!(m.observe(70, 100, 100), None);
    }

    #[test]
    fn guard_modes() {
        let v = InvariantViolation::MissingThemeColor;
        assert!(InvariantGuard::new(InvariantMode::Enforce).admit(v.clone()).is_err());
        assert!(InvariantGuard::new(InvariantMode::Warn).admit(v.clone()).is_ok());
        assert!(InvariantGuard::new(InvariantMode::Off).admit(v).is_ok());
        assert!(!InvariantGuard::new(InvariantMode::Off).checks_enabled());
    }
}
