//! Pure zone-weight parsing and smooth weighted round-robin selection.

use snafu::Snafu;

/// A zone and its relative selection weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneWeight {
    pub zone: String,
    pub weight: u32,
}

/// Rejections for a `zone=weight,...` list.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum ZoneSpecError {
    #[snafu(display("zone list is empty"))]
    EmptyZoneList,

    #[snafu(display("malformed zone entry {entry:?}"))]
    MalformedZoneEntry { entry: String },

    #[snafu(display("zone entry {entry:?} has invalid weight {weight:?}: weights must be positive integers"))]
    InvalidZoneWeight { entry: String, weight: String },

    #[snafu(display("zone {zone:?} is listed more than once"))]
    DuplicateZone { zone: String },
}

/// Parse `zone1=weight1,zone2=weight2,...`.
///
/// The weight is optional and defaults to 1. Whitespace around entries and
/// around `=` is ignored.
pub fn parse_zone_weights(input: &str) -> Result<Vec<ZoneWeight>, ZoneSpecError> {
    if input.trim().is_empty() {
        return EmptyZoneListSnafu.fail();
    }

    let mut zones: Vec<ZoneWeight> = Vec::new();
    for raw in input.split(',') {
        let entry = raw.trim();
        let (zone, weight) = match entry.split_once('=') {
            Some((zone, weight)) => {
                let weight_text = weight.trim();
                let weight = weight_text.parse::<u32>().ok().filter(|w| *w > 0).ok_or_else(|| {
                    ZoneSpecError::InvalidZoneWeight {
                        entry: entry.to_string(),
                        weight: weight_text.to_string(),
                    }
                })?;
                (zone.trim(), weight)
            }
            None => (entry, 1),
        };

        if zone.is_empty() || zone.contains(char::is_whitespace) {
            return MalformedZoneEntrySnafu { entry: raw.to_string() }.fail();
        }
        if zones.iter().any(|z| z.zone == zone) {
            return DuplicateZoneSnafu { zone: zone.to_string() }.fail();
        }
        zones.push(ZoneWeight {
            zone: zone.to_string(),
            weight,
        });
    }
    Ok(zones)
}

/// One step of smooth weighted round-robin.
///
/// Every slot gains its weight, the largest running value wins (first index
/// on ties) and pays back the total. Over any `sum(weights)` consecutive
/// steps each slot is chosen exactly `weight` times, and heavy slots are
/// interleaved rather than bunched.
///
/// # Panics
///
/// Debug builds assert that `weights` is non-empty and matches `current`.
pub fn smooth_weighted_pick(weights: &[u32], current: &mut [i64]) -> usize {
    debug_assert!(!weights.is_empty(), "ZONE_PICK: weights must be non-empty");
    debug_assert_eq!(weights.len(), current.len(), "ZONE_PICK: state length mismatch");

    let total: i64 = weights.iter().map(|w| i64::from(*w)).sum();
    let mut best = 0;
    for (i, weight) in weights.iter().enumerate() {
        current[i] += i64::from(*weight);
        if current[i] > current[best] {
            best = i;
        }
    }
    current[best] -= total;
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_weight_to_one() {
        let zones = parse_zone_weights("us-central1-a=3, us-east1-b").unwrap();
        assert_eq!(zones, vec![
            ZoneWeight {
                zone: "us-central1-a".into(),
                weight: 3
            },
            ZoneWeight {
                zone: "us-east1-b".into(),
                weight: 1
            },
        ]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_zone_weights(""), Err(ZoneSpecError::EmptyZoneList));
        assert!(matches!(parse_zone_weights("a=0"), Err(ZoneSpecError::InvalidZoneWeight { .. })));
        assert!(matches!(parse_zone_weights("a=-2"), Err(ZoneSpecError::InvalidZoneWeight { .. })));
        assert!(matches!(parse_zone_weights("a=x"), Err(ZoneSpecError::InvalidZoneWeight { .. })));
        assert!(matches!(parse_zone_weights("a,,b"), Err(ZoneSpecError::MalformedZoneEntry { .. })));
        assert!(matches!(parse_zone_weights("=2"), Err(ZoneSpecError::MalformedZoneEntry { .. })));
        assert!(matches!(parse_zone_weights("a,a=2"), Err(ZoneSpecError::DuplicateZone { .. })));
    }

    #[test]
    fn test_pick_interleaves() {
        let weights = [2, 1];
        let mut current = [0, 0];
        let picks: Vec<usize> = (0..6).map(|_| smooth_weighted_pick(&weights, &mut current)).collect();
        assert_eq!(picks, vec![0, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn test_pick_state_returns_to_zero_each_period() {
        let weights = [5, 1, 1];
        let mut current = [0, 0, 0];
        for _ in 0..7 {
            smooth_weighted_pick(&weights, &mut current);
        }
        assert_eq!(current, [0, 0, 0]);
    }
}
