use debrief_core::{FeatureClass, Geometry};
use debrief_engine::{Engine, EngineConfig, EngineError, RebuildScope};
use debrief_harness::{init_test_logging, line, point, square, FakeMapSession, TestRig};

fn area() -> Geometry {
    square(-120.0, 39.0, 0.01)
}

fn inside_track() -> Geometry {
    line(&[(-120.005, 39.0), (-120.0, 39.005)])
}

fn folders_titled(rig: &TestRig, title: &str) -> usize {
    rig.target
        .titled(title)
        .iter()
        .filter(|f| f.class() == FeatureClass::Folder)
        .count()
}

/// Assignment with one track and one clue, plus a loose marker.
fn populated() -> Result<TestRig, Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "101", Some(area()))?;
    rig.add_track("AA101a", inside_track())?;
    rig.add_clue("Glove", Some(sid), point(-120.0, 39.0))?;
    rig.add_marker("CP1", point(-120.02, 39.0))?;
    Ok(rig)
}

// ============================================================================
// Restart
// ============================================================================

#[test]
fn restart_without_changes_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    init_test_logging();
    let mut rig = populated()?;
    let writes = rig.target.write_count();
    let before = rig.store_json()?;

    let report = rig.restart()?;
    assert_eq!(report.replayed, rig.source.len());
    assert_eq!(report.reaped, 0);
    assert_eq!(report.recovery.dropped_targets, 0);
    assert!(report.recovery.dropped_outings.is_empty());
    assert_eq!(report.recovery.kept_outings, 1);

    assert_eq!(rig.target.write_count(), writes);
    assert_eq!(rig.store_json()?, before);
    assert_eq!(rig.engine.state().write_count(), 0);
    Ok(())
}

#[test]
fn state_file_holds_the_store() -> Result<(), Box<dyn std::error::Error>> {
    let rig = populated()?;
    let text = std::fs::read_to_string(rig.state_path())?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    for key in ["outings", "corr", "unclaimedTracks", "unclaimedClues", "appTracks"] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    let outing = rig.outing("AA 101")?;
    let bid = outing.bid.ok_or("no boundary")?;
    assert_eq!(value["outings"]["AA 101"]["bid"], bid.to_string());
    assert_eq!(value["outings"]["AA 101"]["log"][0][1], "Outing entry created");
    Ok(())
}

#[test]
fn vanished_mirror_is_reimported_on_restart() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let old = rig.outing("AA 101")?.tids[0][0];
    rig.target.remove(old);

    let report = rig.restart()?;
    assert_eq!(report.recovery.dropped_targets, 1);
    assert_eq!(report.recovery.kept_outings, 1);

    let outing = rig.outing("AA 101")?;
    assert_eq!(outing.tids.len(), 1);
    assert_ne!(outing.tids[0][0], old);
    assert!(rig.target.contains(outing.tids[0][0]));
    Ok(())
}

#[test]
fn partial_loss_keeps_surviving_segment() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let track = rig.add_track(
        "AA101a",
        line(&[
            (-120.005, 39.0),
            (-120.0, 39.0),
            (-119.9, 39.0),
            (-119.9, 39.005),
            (-120.0, 39.005),
            (-120.005, 39.005),
        ]),
    )?;
    let segments = rig.store().correspondents(track).ok_or("no mirror")?.to_vec();
    assert_eq!(segments.len(), 2);
    rig.target.remove(segments[1]);

    let report = rig.restart()?;
    assert_eq!(report.recovery.dropped_targets, 1);
    assert_eq!(report.recovery.dropped_correspondences, 0);
    assert_eq!(rig.store().correspondents(track), Some(&segments[..1]));
    assert_eq!(rig.outing("AA 101")?.tids, vec![vec![segments[0]]]);
    Ok(())
}

#[test]
fn outing_without_boundary_and_folder_is_recreated() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let old = rig.outing("AA 101")?;
    rig.target.remove(old.bid.ok_or("no boundary")?);
    rig.target.remove(old.fid.ok_or("no folder")?);

    let report = rig.restart()?;
    assert_eq!(report.recovery.dropped_outings, vec!["AA 101".to_string()]);

    let outing = rig.outing("AA 101")?;
    assert_ne!(outing.fid, old.fid);
    assert!(rig.target.contains(outing.fid.ok_or("no folder")?));
    assert_eq!(outing.track_count(), 1);
    assert_eq!(outing.cids.len(), 1);
    assert_eq!(folders_titled(&rig, "AA 101"), 1);
    Ok(())
}

#[test]
fn losing_only_the_boundary_rebuilds_the_whole_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let old = rig.outing("AA 101")?;
    rig.target.remove(old.bid.ok_or("no boundary")?);

    let report = rig.restart()?;
    assert_eq!(report.recovery.dropped_outings, vec!["AA 101".to_string()]);
    assert!(report.recovery.orphaned_targets.contains(&old.fid.ok_or("no folder")?));

    let outing = rig.outing("AA 101")?;
    assert!(outing.bid.is_some());
    assert_eq!(outing.track_count(), 1);
    assert_eq!(outing.tids.len(), 1);
    assert_eq!(outing.cids.len(), 1);
    assert_eq!(folders_titled(&rig, "AA 101"), 1);

    // the previous mirrors went with the old folder
    for id in old.tids.iter().flatten().chain(&old.cids) {
        assert!(!rig.target.contains(*id));
    }
    assert_eq!(rig.target.titled("AA101a").len(), 1);
    assert_eq!(rig.target.titled("Glove").len(), 1);

    // and a second restart settles
    let writes = rig.target.write_count();
    rig.restart()?;
    assert_eq!(rig.target.write_count(), writes);
    Ok(())
}

#[test]
fn outing_waiting_for_its_boundary_survives_restart() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "101", None)?;
    rig.add_track("AA101a", inside_track())?;
    let waiting = rig.outing("AA 101")?.utids;
    assert_eq!(waiting.len(), 1);

    let report = rig.restart()?;
    assert!(report.recovery.dropped_outings.is_empty());
    assert_eq!(rig.outing("AA 101")?.utids, waiting);

    rig.edit_geometry(sid, area())?;
    let outing = rig.outing("AA 101")?;
    assert!(outing.utids.is_empty());
    assert_eq!(outing.tids, vec![waiting]);
    Ok(())
}

#[test]
fn source_deleted_while_offline_is_reaped() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let marker = rig.source.titled("CP1")[0].id;
    let mirror = rig.store().correspondents(marker).ok_or("no mirror")?[0];
    rig.source.remove(marker);

    let report = rig.restart()?;
    assert_eq!(report.reaped, 1);
    assert!(rig.store().correspondents(marker).is_none());
    assert!(!rig.target.contains(mirror));
    Ok(())
}

#[test]
fn assignment_deleted_while_offline_prunes_empty_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("BB", "201", Some(area()))?;
    let outing = rig.outing("BB 201")?;
    rig.source.remove(sid);

    rig.restart()?;
    assert!(rig.store().outings.is_empty());
    assert!(!rig.target.contains(outing.fid.ok_or("no folder")?));
    Ok(())
}

#[test]
fn unreachable_source_is_fatal_at_startup() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = EngineConfig {
        state_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let source = FakeMapSession::new("SRC");
    source.set_unavailable(true);
    let mut engine = Engine::new(source, FakeMapSession::new("DBF"), config);
    let err = engine.start().unwrap_err();
    assert!(matches!(err, EngineError::Session(_)));
    Ok(())
}

// ============================================================================
// Rebuild
// ============================================================================

#[test]
fn rebuild_one_outing_recreates_it() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let old = rig.outing("AA 101")?;
    let marker = rig.source.titled("CP1")[0].id;
    let marker_mirror = rig.store().correspondents(marker).ok_or("no mirror")?[0];

    let report = rig.engine.rebuild(RebuildScope::Outing("AA 101".into()))?;
    // folder, boundary, one track segment, one clue
    assert_eq!(report.deleted, 4);
    assert_eq!(report.replayed, rig.source.len());
    assert!(!rig.engine.gate().is_paused());

    let outing = rig.outing("AA 101")?;
    assert_ne!(outing.fid, old.fid);
    assert_eq!(outing.tids.len(), 1);
    assert_eq!(outing.cids.len(), 1);
    assert!(!rig.target.contains(old.fid.ok_or("no folder")?));
    assert_eq!(rig.store().correspondents(marker), Some(&[marker_mirror][..]));

    let persisted = std::fs::read_to_string(rig.state_path())?;
    let fid = outing.fid.ok_or("no folder")?;
    assert!(persisted.contains(&fid.to_string()));
    Ok(())
}

#[test]
fn rebuild_everything_replaces_every_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let before = rig.target.features();

    let report = rig.engine.rebuild(RebuildScope::All)?;
    assert_eq!(report.deleted, before.len());
    let after = rig.target.features();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|f| before.iter().all(|b| b.id != f.id)));
    assert_eq!(rig.outing("AA 101")?.tids.len(), 1);
    Ok(())
}

#[test]
fn rebuild_unknown_outing_fails_cleanly() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = populated()?;
    let writes = rig.target.write_count();
    let err = rig.engine.rebuild(RebuildScope::Outing("ZZ 999".into())).unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
    assert_eq!(rig.target.write_count(), writes);
    assert!(!rig.engine.gate().is_paused());
    Ok(())
}
