//! Weighted zone selection shared by every VM a test run creates.

use parking_lot::Mutex;
use tracing::debug;

use crate::verified::ZoneSpecError;
use crate::verified::ZoneWeight;
use crate::verified::parse_zone_weights;
use crate::verified::smooth_weighted_pick;

/// Hands out zones in proportion to their configured weights.
///
/// Safe to share between concurrently provisioned VMs; the running counters
/// advance under a mutex so no two callers observe the same step.
#[derive(Debug)]
pub struct ZonePicker {
    zones: Vec<ZoneWeight>,
    weights: Vec<u32>,
    current: Mutex<Vec<i64>>,
}

impl ZonePicker {
    /// Parse a `zone=weight,...` list. Invalid lists fail here, never later.
    pub fn parse(spec: &str) -> Result<Self, ZoneSpecError> {
        Ok(Self::from_weights(parse_zone_weights(spec)?))
    }

    fn from_weights(zones: Vec<ZoneWeight>) -> Self {
        let weights: Vec<u32> = zones.iter().map(|z| z.weight).collect();
        let current = Mutex::new(vec![0; zones.len()]);
        Self {
            zones,
            weights,
            current,
        }
    }

    /// The next zone in the weighted rotation.
    pub fn next(&self) -> &str {
        let index = {
            let mut current = self.current.lock();
            smooth_weighted_pick(&self.weights, &mut current)
        };
        let zone = &self.zones[index].zone;
        debug!(zone = %zone, "picked zone");
        zone
    }

    pub fn zones(&self) -> &[ZoneWeight] {
        &self.zones
    }

    /// Sum of all weights; one full rotation is this many calls.
    pub fn period(&self) -> u64 {
        self.weights.iter().map(|w| u64::from(*w)).sum()
    }
}
