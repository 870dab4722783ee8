//! Operational alerts (spec §8), grounded in `nst_alert.cpp`'s registry of
//! named, acknowledgeable conditions (e.g. crossing a connection limit).
//!
//! Acknowledging an alert is idempotent: acknowledging the same id twice
//! is a no-op, not an error, matching the original's
//! `AcknowledgeAlert(id); AcknowledgeAlert(id)` behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Identifies a specific alert condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertId {
    /// Connection count crossed `conn_alert_limit`.
    ConnAlertLimit,
    /// Connection count crossed `conn_soft_limit`.
    ConnSoftLimit,
    /// Connection count crossed `conn_hard_limit`.
    ConnHardLimit,
    /// A configuration value could not be reloaded.
    ConfigReloadFailed,
}

#[derive(Debug, Clone, Serialize)]
struct AlertRecord {
    count: u64,
    #[serde(skip)]
    last_raised_at: Instant,
    acknowledged: bool,
}

/// Outcome of [`Alerts::acknowledge`], distinguishing a first acknowledgement
/// from a repeated one so callers (and the testable property in spec §8)
/// can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgeOutcome {
    /// The alert was active and is now acknowledged.
    Acknowledged,
    /// The alert was already acknowledged; this call was a no-op.
    AlreadyAcknowledged,
    /// No alert with this id has ever been raised.
    Unknown,
}

/// Registry of raised alerts, one entry per [`AlertId`] ever raised.
#[derive(Default)]
pub struct Alerts {
    records: Mutex<HashMap<AlertId, AlertRecord>>,
}

impl Alerts {
    /// An empty registry.
    pub fn new() -> Arc<Alerts> {
        Arc::new(Alerts::default())
    }

    /// Raise (or re-raise) an alert, bumping its occurrence count and
    /// clearing any prior acknowledgement.
    pub fn raise(&self, id: AlertId) {
        let mut records = self.records.lock();
        let record = records.entry(id).or_insert(AlertRecord {
            count: 0,
            last_raised_at: Instant::now(),
            acknowledged: false,
        });
        record.count += 1;
        record.last_raised_at = Instant::now();
        record.acknowledged = false;
    }

    /// Acknowledge an alert, reporting whether this call was the one that
    /// actually acknowledged it.
    pub fn acknowledge(&self, id: AlertId) -> AcknowledgeOutcome {
        match self.records.lock().get_mut(&id) {
            Some(record) if record.acknowledged => AcknowledgeOutcome::AlreadyAcknowledged,
            Some(record) => {
                record.acknowledged = true;
                AcknowledgeOutcome::Acknowledged
            }
            None => AcknowledgeOutcome::Unknown,
        }
    }

    /// Whether an alert is currently raised and unacknowledged.
    pub fn is_active(&self, id: AlertId) -> bool {
        self.records.lock().get(&id).map(|r| !r.acknowledged).unwrap_or(false)
    }

    /// Number of times an alert has ever been raised.
    pub fn occurrence_count(&self, id: AlertId) -> u64 {
        self.records.lock().get(&id).map(|r| r.count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_marks_alert_active() {
        let alerts = Alerts::new();
        assert!(!alerts.is_active(AlertId::ConnHardLimit));
        alerts.raise(AlertId::ConnHardLimit);
        assert!(alerts.is_active(AlertId::ConnHardLimit));
    }

    #[test]
    fn acknowledging_twice_is_idempotent() {
        let alerts = Alerts::new();
        alerts.raise(AlertId::ConnSoftLimit);
        assert_eq!(alerts.acknowledge(AlertId::ConnSoftLimit), AcknowledgeOutcome::Acknowledged);
        assert_eq!(alerts.acknowledge(AlertId::ConnSoftLimit), AcknowledgeOutcome::AlreadyAcknowledged);
        assert!(!alerts.is_active(AlertId::ConnSoftLimit));
        assert_eq!(alerts.occurrence_count(AlertId::ConnSoftLimit), 1);
    }

    #[test]
    fn acknowledging_unraised_alert_is_unknown() {
        let alerts = Alerts::new();
        assert_eq!(alerts.acknowledge(AlertId::ConfigReloadFailed), AcknowledgeOutcome::Unknown);
    }

    #[test]
    fn re_raising_clears_acknowledgement() {
        let alerts = Alerts::new();
        alerts.raise(AlertId::ConnAlertLimit);
        alerts.acknowledge(AlertId::ConnAlertLimit);
        alerts.raise(AlertId::ConnAlertLimit);
        assert!(alerts.is_active(AlertId::ConnAlertLimit));
        assert_eq!(alerts.occurrence_count(AlertId::ConnAlertLimit), 2);
    }
}
