//! Restart recovery: filter a persisted store down to what still exists on
//! both maps. Replay afterwards fills in whatever was dropped.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use debrief_core::FeatureId;
use debrief_storage::{CorrespondenceStore, Outing};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub dropped_targets: usize,
    pub dropped_correspondences: usize,
    pub kept_outings: usize,
    pub dropped_outings: Vec<String>,
    pub dropped_unclaimed: usize,
    pub dropped_app_tracks: usize,
    /// Live target features of dropped outings. They must be deleted before
    /// replay so their sources import afresh into the recreated outing.
    pub orphaned_targets: Vec<FeatureId>,
}

/// Keep correspondence target ids that are still live (a source whose list
/// empties out is dropped), outings whose folder is live and whose boundary,
/// if one was ever drawn, is live too, and live tracks whose source is live.
/// The outing's own assignment does not have to exist.
///
/// A dropped outing takes its correspondences with it: every source mirrored
/// into it loses its `corr` entry, and its surviving target features are
/// reported as orphans.
pub fn recover(
    persisted: CorrespondenceStore,
    source_live: &BTreeSet<FeatureId>,
    target_live: &BTreeSet<FeatureId>,
) -> (CorrespondenceStore, RecoveryReport) {
    let mut report = RecoveryReport::default();
    let CorrespondenceStore {
        outings,
        corr,
        unclaimed_tracks,
        unclaimed_clues,
        app_tracks,
    } = persisted;

    let mut kept_outings = BTreeMap::new();
    let mut orphans: BTreeSet<FeatureId> = BTreeSet::new();
    for (name, outing) in outings {
        let folder_live = outing.fid.is_some_and(|id| target_live.contains(&id));
        let boundary_live = outing.bid.is_none_or(|id| target_live.contains(&id));
        if folder_live && boundary_live {
            kept_outings.insert(name, filter_outing(outing, target_live));
        } else {
            warn!(outing = %name, "boundary or folder gone from target map; dropping outing");
            orphans.extend(outing.target_ids());
            report.dropped_outings.push(name);
        }
    }
    report.kept_outings = kept_outings.len();

    let mut kept_corr = BTreeMap::new();
    for (sid, tids) in corr {
        if tids.iter().any(|t| orphans.contains(t)) {
            report.dropped_correspondences += 1;
            continue;
        }
        let before = tids.len();
        let live: Vec<FeatureId> = tids.into_iter().filter(|t| target_live.contains(t)).collect();
        report.dropped_targets += before - live.len();
        if live.is_empty() && before > 0 {
            report.dropped_correspondences += 1;
        } else if !live.is_empty() {
            kept_corr.insert(sid, live);
        }
    }
    report.orphaned_targets = orphans.into_iter().filter(|t| target_live.contains(t)).collect();

    let before = unclaimed_tracks.len() + unclaimed_clues.len();
    let unclaimed_tracks: BTreeMap<_, _> = unclaimed_tracks
        .into_iter()
        .filter(|(tid, _)| target_live.contains(tid))
        .collect();
    let unclaimed_clues: BTreeMap<_, _> = unclaimed_clues
        .into_iter()
        .filter(|(tid, _)| target_live.contains(tid))
        .collect();
    report.dropped_unclaimed = before - unclaimed_tracks.len() - unclaimed_clues.len();

    let before = app_tracks.len();
    let app_tracks: BTreeMap<_, _> = app_tracks
        .into_iter()
        .filter(|(sid, _)| source_live.contains(sid))
        .collect();
    report.dropped_app_tracks = before - app_tracks.len();

    info!(
        kept_outings = report.kept_outings,
        dropped_outings = report.dropped_outings.len(),
        dropped_targets = report.dropped_targets,
        dropped_correspondences = report.dropped_correspondences,
        orphaned_targets = report.orphaned_targets.len(),
        "recovered persisted state"
    );

    let store = CorrespondenceStore {
        outings: kept_outings,
        corr: kept_corr,
        unclaimed_tracks,
        unclaimed_clues,
        app_tracks,
    };
    (store, report)
}

fn filter_outing(mut outing: Outing, target_live: &BTreeSet<FeatureId>) -> Outing {
    outing.tids = outing
        .tids
        .into_iter()
        .map(|group| group.into_iter().filter(|t| target_live.contains(t)).collect::<Vec<_>>())
        .filter(|group| !group.is_empty())
        .collect();
    outing.utids.retain(|t| target_live.contains(t));
    outing.cids.retain(|t| target_live.contains(t));
    outing
}
