//! Selection of the regions handed to the OS region monitor.

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::error::EngineError;
use crate::models::{Coordinate, GeoFence};

/// OS cap on concurrently monitored regions.
pub const MAX_MONITORED_REGIONS: usize = 20;

/// Circle registered with the region monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredRegion {
    /// Geofence key (`scheduleId_deviceUid`); region callbacks come back with it.
    pub identifier: String,
    pub center: Coordinate,
    pub radius_meters: f64,
}

impl From<&GeoFence> for MonitoredRegion {
    fn from(region: &GeoFence) -> Self {
        Self {
            identifier: region.key(),
            center: region.center(),
            radius_meters: region.radius_meters(),
        }
    }
}

/// OS-level region monitoring.
pub trait RegionMonitor: Send + Sync {
    fn has_permission(&self) -> bool;

    /// Replace the monitored set with `regions`.
    fn start_monitoring(&self, regions: &[MonitoredRegion]) -> Result<(), EngineError>;

    fn stop_monitoring_all(&self);
}

/// Monitor that only logs what it would register.
#[derive(Debug, Default)]
pub struct LogRegionMonitor;

impl RegionMonitor for LogRegionMonitor {
    fn has_permission(&self) -> bool {
        true
    }

    fn start_monitoring(&self, regions: &[MonitoredRegion]) -> Result<(), EngineError> {
        info!(count = regions.len(), "Monitoring regions");
        for region in regions {
            debug!(
                identifier = %region.identifier,
                center = %region.center,
                radius_m = region.radius_meters,
                "Monitor region"
            );
        }
        Ok(())
    }

    fn stop_monitoring_all(&self) {
        info!("Stopped monitoring all regions");
    }
}

/// Pick up to `max` regions nearest `location`.
///
/// Candidates are taken nearest first; a candidate whose center lies inside
/// a region already selected is skipped since that circle covers it.
pub fn filter_and_reduce_crossed_regions(
    regions: &[GeoFence],
    location: &Coordinate,
    max: usize,
) -> Vec<GeoFence> {
    let mut by_distance: Vec<(f64, &GeoFence)> = regions
        .iter()
        .map(|r| (r.distance_from(location), r))
        .collect();
    by_distance.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut selected: Vec<GeoFence> = Vec::new();
    for (_, candidate) in by_distance {
        if selected.len() >= max {
            break;
        }
        let center = candidate.center();
        if selected.iter().any(|s| s.contains(&center)) {
            continue;
        }
        selected.push(candidate.clone());
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::region_at;

    const HOME: Coordinate = Coordinate {
        latitude: 51.5,
        longitude: -0.12,
    };

    #[test]
    fn test_caps_and_sorts_by_distance() {
        // 30 small regions walking north, 1 km apart
        let regions: Vec<GeoFence> = (0..30)
            .map(|i| region_at(i, 51.5 + 0.009 * i as f64, -0.12, 0.1))
            .rev()
            .collect();

        let selected = filter_and_reduce_crossed_regions(&regions, &HOME, MAX_MONITORED_REGIONS);

        assert_eq!(selected.len(), 20);
        let distances: Vec<f64> = selected.iter().map(|r| r.distance_from(&HOME)).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(selected[0].schedule_id, 0);
        assert_eq!(selected[19].schedule_id, 19);
    }

    #[test]
    fn test_skips_regions_centered_inside_selected() {
        let big = region_at(1, 51.5, -0.12, 2.0);
        // About 550 m north, inside `big`
        let enclosed = region_at(2, 51.505, -0.12, 0.1);
        // About 5.5 km north, outside
        let far = region_at(3, 51.55, -0.12, 0.1);

        let selected =
            filter_and_reduce_crossed_regions(&[far, enclosed, big], &HOME, MAX_MONITORED_REGIONS);

        let ids: Vec<i64> = selected.iter().map(|r| r.schedule_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_thirty_regions_with_overlap_stay_under_cap() {
        let mut regions = Vec::new();
        for i in 0..30 {
            // Pairs share a center area; the second of each pair is enclosed
            let lat = 51.5 + 0.02 * (i / 2) as f64;
            let radius = if i % 2 == 0 { 1.0 } else { 0.2 };
            regions.push(region_at(i, lat + 0.0001 * (i % 2) as f64, -0.12, radius));
        }

        let selected = filter_and_reduce_crossed_regions(&regions, &HOME, MAX_MONITORED_REGIONS);

        assert!(selected.len() <= 20);
        assert_eq!(selected.len(), 15);
        for (i, a) in selected.iter().enumerate() {
            for b in &selected[..i] {
                assert!(!b.contains(&a.center()));
            }
        }
    }

    #[test]
    fn test_monitored_region_from_geofence() {
        let r = region_at(42, 51.5, -0.12, 0.25);
        let monitored = MonitoredRegion::from(&r);
        assert_eq!(monitored.identifier, "42_dev-42");
        assert_eq!(monitored.radius_meters, 250.0);
    }
}
