use debrief_core::{Geometry, Properties};
use debrief_engine::SourceEvent;
use debrief_harness::{assignment_props, init_test_logging, line, point, square, TestRig};
use debrief_storage::ClueOwner;

fn area() -> Geometry {
    square(-120.0, 39.0, 0.01)
}

fn inside_track() -> Geometry {
    line(&[(-120.005, 39.0), (-120.0, 39.005)])
}

fn digest(rig: &TestRig) -> Result<blake3::Hash, Box<dyn std::error::Error>> {
    Ok(blake3::hash(rig.store_json()?.as_bytes()))
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn replaying_unchanged_features_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    init_test_logging();
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "101", Some(area()))?;
    rig.add_assignment("AA", "101", Some(square(-120.1, 39.0, 0.01)))?;
    rig.add_track("AA101a", line(&[(-120.105, 39.0), (-120.1, 39.005)]))?;
    rig.add_marker("CP1", point(-120.02, 39.0))?;
    rig.add_clue("Glove", Some(sid), point(-120.0, 39.0))?;
    rig.create(
        Properties::new().with("class", "Shape").with("title", "Road block").with("stroke", "#00FF00"),
        Some(square(-120.03, 39.0, 0.001)),
    )?;

    let writes = rig.target.write_count();
    let before = digest(&rig)?;
    let state_writes = rig.engine.state().write_count();

    for f in rig.source.features() {
        rig.engine.apply(SourceEvent::NewFeature(f.clone()))?;
        rig.engine.apply(SourceEvent::PropertyChanged(f))?;
    }

    assert_eq!(rig.target.write_count(), writes);
    assert_eq!(digest(&rig)?, before);
    assert_eq!(rig.engine.state().write_count(), state_writes);
    Ok(())
}

// ============================================================================
// Tracks
// ============================================================================

#[test]
fn renamed_track_is_reimported() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let track = rig.add_track("AA101a", inside_track())?;
    let old = rig.store().correspondents(track).ok_or("no mirror")?[0];

    rig.edit_properties(track, Properties::new().with("title", "AA101b"))?;
    let new = rig.store().correspondents(track).ok_or("no mirror")?[0];
    assert_ne!(old, new);
    assert!(!rig.target.contains(old));

    let mirror = rig.target.feature(new).ok_or("mirror missing")?;
    assert_eq!(mirror.title(), "AA101b");
    assert_eq!(mirror.properties.get_str("stroke"), Some("#00CD00"));

    let outing = rig.outing("AA 101")?;
    assert_eq!(outing.tids, vec![vec![new]]);
    assert!(outing
        .log
        .iter()
        .any(|e| e.text() == "Reimported track AA101b due to property changes"));
    Ok(())
}

#[test]
fn track_geometry_change_recrops() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let track = rig.add_track("AA101a", inside_track())?;
    let old = rig.store().correspondents(track).ok_or("no mirror")?[0];

    rig.edit_geometry(track, line(&[(-120.005, 39.005), (-120.0, 39.0), (-119.995, 39.005)]))?;
    let new = rig.store().correspondents(track).ok_or("no mirror")?[0];
    assert_ne!(old, new);
    let outing = rig.outing("AA 101")?;
    assert_eq!(outing.tids, vec![vec![new]]);
    assert!(outing
        .log
        .iter()
        .any(|e| e.text() == "Reimported track AA101a due to geometry change"));
    Ok(())
}

#[test]
fn line_renamed_away_from_track_convention_is_reimported() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let track = rig.add_track("AA101a", inside_track())?;

    rig.edit_properties(track, Properties::new().with("title", "CURRENT TRACK"))?;
    let tid = rig.store().correspondents(track).ok_or("no mirror")?[0];
    assert!(rig.outing("AA 101")?.tids.is_empty());
    assert!(!rig.store().is_track_target(tid));
    assert_eq!(rig.target.feature(tid).ok_or("mirror missing")?.title(), "CURRENT TRACK");
    Ok(())
}

// ============================================================================
// In-place edits
// ============================================================================

#[test]
fn marker_edits_apply_in_place() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let marker = rig.add_marker("CP1", point(-120.0, 39.0))?;
    let tid = rig.store().correspondents(marker).ok_or("no mirror")?[0];

    rig.edit_properties(marker, Properties::new().with("marker-color", "#FF00FF"))?;
    assert_eq!(rig.store().correspondents(marker), Some(&[tid][..]));
    let mirror = rig.target.feature(tid).ok_or("mirror missing")?;
    assert_eq!(mirror.properties.get_str("marker-color"), Some("#FF00FF"));

    let writes = rig.target.write_count();
    rig.edit_geometry(marker, point(-120.1, 39.1))?;
    assert_eq!(rig.target.write_count(), writes + 1);
    let mirror = rig.target.feature(tid).ok_or("mirror missing")?;
    assert_eq!(mirror.geometry, Some(point(-120.1, 39.1)));
    Ok(())
}

#[test]
fn feature_with_several_mirrors_is_left_alone() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let marker = rig.add_marker("CP1", point(-120.0, 39.0))?;
    let first = rig.store().correspondents(marker).ok_or("no mirror")?[0];
    let original = rig.target.feature(first).ok_or("mirror missing")?;
    let copy = rig.target.put(original.properties.clone(), original.geometry.clone());

    // Point the marker at both copies in the saved state.
    let path = rig.state_path();
    let mut state: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    state["corr"][marker.to_string()] = serde_json::json!([first.to_string(), copy.id.to_string()]);
    std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
    rig.restart()?;
    assert_eq!(rig.store().correspondents(marker), Some(&[first, copy.id][..]));

    let writes = rig.target.write_count();
    rig.edit_properties(marker, Properties::new().with("title", "CP9"))?;
    rig.edit_geometry(marker, point(-120.1, 39.1))?;
    assert_eq!(rig.target.write_count(), writes);
    assert_eq!(rig.target.feature(first), Some(original));
    assert_eq!(rig.target.feature(copy.id), Some(copy.clone()));
    assert_eq!(rig.store().correspondents(marker), Some(&[first, copy.id][..]));
    Ok(())
}

#[test]
fn hand_deleted_mirror_is_reimported() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let marker = rig.add_marker("CP1", point(-120.0, 39.0))?;
    let old = rig.store().correspondents(marker).ok_or("no mirror")?[0];
    rig.target.remove(old);

    rig.edit_properties(marker, Properties::new().with("description", "gate"))?;
    let new = rig.store().correspondents(marker).ok_or("no mirror")?[0];
    assert_ne!(old, new);
    let mirror = rig.target.feature(new).ok_or("mirror missing")?;
    assert_eq!(mirror.properties.get_str("description"), Some("gate"));
    assert_eq!(mirror.title(), "CP1");
    Ok(())
}

// ============================================================================
// Folders
// ============================================================================

#[test]
fn excluded_folder_contents_are_not_mirrored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let scratch = rig.add_folder("Scratch work")?;
    assert!(rig.engine.excluded_folders().contains(&scratch));

    let hidden = rig.create(
        Properties::new()
            .with("class", "Marker")
            .with("title", "draft")
            .with("folderId", scratch.to_string()),
        Some(point(-120.0, 39.0)),
    )?;
    assert!(rig.store().correspondents(hidden).is_none());

    let marker = rig.add_marker("CP1", point(-120.0, 39.0))?;
    let tid = rig.store().correspondents(marker).ok_or("no mirror")?[0];
    rig.edit_properties(marker, Properties::new().with("folderId", scratch.to_string()))?;
    assert!(rig.store().correspondents(marker).is_none());
    assert!(!rig.target.contains(tid));

    // deleting the folder lifts the exclusion
    rig.delete(scratch)?;
    assert!(rig.engine.excluded_folders().is_empty());
    Ok(())
}

#[test]
fn folders_themselves_are_never_mirrored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_folder("Team notes")?;
    assert!(rig.target.is_empty());
    assert!(rig.engine.excluded_folders().is_empty());
    Ok(())
}

// ============================================================================
// Clues
// ============================================================================

#[test]
fn clue_lands_in_assignment_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "101", Some(area()))?;
    let clue = rig.add_clue("Glove", Some(sid), point(-120.0, 39.0))?;

    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];
    let outing = rig.outing("AA 101")?;
    assert_eq!(outing.cids, vec![cid]);
    let mirror = rig.target.feature(cid).ok_or("mirror missing")?;
    assert_eq!(mirror.properties.get_str("marker-symbol"), Some("clue"));
    assert_eq!(mirror.properties.folder_id(), outing.fid);
    assert!(outing.log.iter().any(|e| e.text() == "Added clue Glove"));

    rig.edit_properties(clue, Properties::new().with("title", "Left glove"))?;
    assert_eq!(rig.target.feature(cid).ok_or("mirror missing")?.title(), "Left glove");
    assert!(rig
        .outing("AA 101")?
        .log
        .iter()
        .any(|e| e.text() == "Clue title changed: Glove --> Left glove"));

    rig.delete(clue)?;
    let outing = rig.outing("AA 101")?;
    assert!(outing.cids.is_empty());
    assert_eq!(outing.log.last().map(|e| e.text()), Some("Clue deleted: Left glove"));
    Ok(())
}

#[test]
fn reassigned_clue_moves_between_outings() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let a = rig.add_assignment("AA", "101", Some(area()))?;
    let b = rig.add_assignment("BB", "201", Some(square(-120.1, 39.0, 0.01)))?;
    let clue = rig.add_clue("Glove", Some(a), point(-120.0, 39.0))?;
    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];

    // first folder move fails; the single retry succeeds
    rig.target.fail_next_writes(1);
    rig.edit_properties(clue, Properties::new().with("assignmentId", b.to_string()))?;

    let from = rig.outing("AA 101")?;
    let to = rig.outing("BB 201")?;
    assert!(from.cids.is_empty());
    assert_eq!(to.cids, vec![cid]);
    assert_eq!(rig.target.feature(cid).ok_or("mirror missing")?.properties.folder_id(), to.fid);
    assert!(from
        .log
        .iter()
        .any(|e| e.text() == "Moved clue Glove from this outing to BB 201"));
    assert!(to.log.iter().any(|e| e.text() == "Clue Glove moved here from AA 101"));
    Ok(())
}

#[test]
fn clue_reassigned_to_unseen_assignment_creates_its_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let a = rig.add_assignment("AA", "101", Some(area()))?;
    let clue = rig.add_clue("Glove", Some(a), point(-120.0, 39.0))?;
    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];

    // on the source map, but no event for it has arrived yet
    let b = rig.source.put(assignment_props("BB", "201"), Some(square(-120.1, 39.0, 0.01)));
    rig.edit_properties(clue, Properties::new().with("assignmentId", b.id.to_string()))?;

    let to = rig.outing("BB 201")?;
    assert_eq!(to.sid, Some(b.id));
    assert_eq!(to.cids, vec![cid]);
    assert!(rig.outing("AA 101")?.cids.is_empty());
    assert!(rig.store().unclaimed_clues.is_empty());
    assert_eq!(rig.target.feature(cid).ok_or("mirror missing")?.properties.folder_id(), to.fid);
    Ok(())
}

#[test]
fn clue_waits_for_its_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "", Some(area()))?;
    let clue = rig.add_clue("Glove", Some(sid), point(-120.0, 39.0))?;
    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];
    assert_eq!(rig.store().unclaimed_clues.get(&cid), Some(&ClueOwner::Assignment(sid)));

    rig.edit_properties(sid, Properties::new().with("number", "101").with("title", "AA 101"))?;
    assert!(rig.store().unclaimed_clues.is_empty());
    let outing = rig.outing("AA 101")?;
    assert_eq!(outing.cids, vec![cid]);
    assert_eq!(rig.target.feature(cid).ok_or("mirror missing")?.properties.folder_id(), outing.fid);
    Ok(())
}

#[test]
fn clue_without_assignment_is_unclaimed() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let clue = rig.add_clue("Footprint", None, point(-120.0, 39.0))?;
    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];
    assert_eq!(rig.store().unclaimed_clues.get(&cid), Some(&ClueOwner::Unassigned));
    assert_eq!(rig.target.feature(cid).ok_or("mirror missing")?.properties.folder_id(), None);
    Ok(())
}

#[test]
fn shared_assignment_clue_goes_to_first_outing() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let sid = rig.add_assignment("AA", "101 102", Some(area()))?;
    let clue = rig.add_clue("Glove", Some(sid), point(-120.0, 39.0))?;
    let cid = rig.store().correspondents(clue).ok_or("no mirror")?[0];
    assert_eq!(rig.outing("AA 101")?.cids, vec![cid]);
    assert!(rig.outing("AA 102")?.cids.is_empty());
    Ok(())
}

// ============================================================================
// Live tracks
// ============================================================================

#[test]
fn live_track_is_linked_but_not_mirrored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let writes = rig.target.write_count();

    let live = rig.create(
        Properties::new()
            .with("class", "AppTrack")
            .with("title", "AA101 phone")
            .with("updated", 5_u64),
        Some(inside_track()),
    )?;
    assert_eq!(rig.target.write_count(), writes);
    let entry = rig.store().app_tracks.get(&live).ok_or("no entry")?;
    assert_eq!(entry.outing(), Some("AA 101"));
    assert_eq!(entry.last_seen(), 5);
    assert!(rig
        .outing("AA 101")?
        .log
        .iter()
        .any(|e| e.text() == "Live track AA101 phone in progress"));

    rig.delete(live)?;
    assert!(rig.store().app_tracks.is_empty());
    Ok(())
}

#[test]
fn finished_live_track_becomes_a_track() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.add_assignment("AA", "101", Some(area()))?;
    let live = rig.create(
        Properties::new().with("class", "AppTrack").with("title", "AA101 phone"),
        Some(inside_track()),
    )?;

    rig.edit_properties(live, Properties::new().with("class", "Shape").with("title", "AA101d"))?;
    let entry = rig.store().app_tracks.get(&live).ok_or("no entry")?;
    assert_eq!(entry.title(), "AA101 phone [FINISHED]");
    assert_eq!(rig.outing("AA 101")?.tids.len(), 1);

    // the server's delete for the live track keeps the finished entry
    rig.engine.apply(SourceEvent::Deleted { id: live, class: debrief_core::FeatureClass::AppTrack })?;
    assert!(rig.store().app_tracks.contains_key(&live));
    Ok(())
}

#[test]
fn live_track_before_outing_is_linked_later() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let live = rig.create(
        Properties::new().with("class", "AppTrack").with("title", "BB 201 radio"),
        Some(inside_track()),
    )?;
    assert_eq!(rig.store().app_tracks.get(&live).and_then(|e| e.outing()), None);

    rig.add_assignment("BB", "201", Some(area()))?;
    assert_eq!(rig.store().app_tracks.get(&live).and_then(|e| e.outing()), Some("BB 201"));
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn unknown_classes_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.create(
        Properties::new().with("class", "OperationalPeriod").with("title", "OP 2"),
        None,
    )?;
    assert_eq!(rig.target.write_count(), 0);
    assert!(rig.store().corr.is_empty());
    Ok(())
}

#[test]
fn failed_write_leaves_store_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.target.fail_next_writes(1);
    assert!(rig.add_marker("CP1", point(-120.0, 39.0)).is_err());
    assert!(rig.store().corr.is_empty());

    let marker = rig.add_marker("CP2", point(-120.0, 39.0))?;
    assert!(rig.store().correspondents(marker).is_some());
    Ok(())
}
