use std::error::Error;
use std::path::PathBuf;

use tempfile::TempDir;

use debrief_core::{Feature, FeatureId, Geometry, Properties};
use debrief_engine::{Engine, EngineConfig, SourceEvent, StartupReport};
use debrief_storage::{CorrespondenceStore, Outing};

use crate::map::FakeMapSession;

pub type RigResult<T> = Result<T, Box<dyn Error>>;

/// An engine mirroring one fake map into another, with its state file in a
/// temp directory. Source edits go through the rig so the matching event is
/// fed to the engine straight away.
pub struct TestRig {
    pub engine: Engine<FakeMapSession, FakeMapSession>,
    pub source: FakeMapSession,
    pub target: FakeMapSession,
    config: EngineConfig,
    _dir: TempDir,
}

impl TestRig {
    pub fn new() -> RigResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Started engine over empty maps. The state directory and clue retry
    /// delay in `config` are overridden.
    pub fn with_config(mut config: EngineConfig) -> RigResult<Self> {
        let dir = tempfile::tempdir()?;
        config.state_dir = dir.path().to_path_buf();
        config.clue_retry_delay_ms = 0;
        let source = FakeMapSession::new("SRC");
        let target = FakeMapSession::new("DBF");
        let mut engine = Engine::new(source.clone(), target.clone(), config.clone());
        engine.start()?;
        Ok(Self {
            engine,
            source,
            target,
            config,
            _dir: dir,
        })
    }

    /// Drop the engine and start a fresh one over the same maps and state
    /// file.
    pub fn restart(&mut self) -> RigResult<StartupReport> {
        self.engine = Engine::new(self.source.clone(), self.target.clone(), self.config.clone());
        Ok(self.engine.start()?)
    }

    pub fn state_path(&self) -> PathBuf {
        self.config.state_dir.join("dmg_SRC_DBF.json")
    }

    pub fn store(&self) -> &CorrespondenceStore {
        self.engine.store()
    }

    pub fn outing(&self, name: &str) -> RigResult<Outing> {
        Ok(self.engine.store().outing(name)?.clone())
    }

    /// Store as persisted JSON, for before/after comparisons.
    pub fn store_json(&self) -> RigResult<String> {
        Ok(serde_json::to_string(self.engine.store())?)
    }

    // ========================================================================
    // Source edits
    // ========================================================================

    pub fn create(&mut self, properties: Properties, geometry: Option<Geometry>) -> RigResult<FeatureId> {
        let f = self.source.put(properties, geometry);
        let id = f.id;
        self.engine.apply(SourceEvent::NewFeature(f))?;
        Ok(id)
    }

    pub fn add_assignment(&mut self, letter: &str, number: &str, geometry: Option<Geometry>) -> RigResult<FeatureId> {
        self.create(assignment_props(letter, number), geometry)
    }

    pub fn add_track(&mut self, title: &str, geometry: Geometry) -> RigResult<FeatureId> {
        self.create(Properties::new().with("class", "Shape").with("title", title), Some(geometry))
    }

    pub fn add_clue(&mut self, title: &str, assignment: Option<FeatureId>, geometry: Geometry) -> RigResult<FeatureId> {
        let mut props = Properties::new()
            .with("class", "Clue")
            .with("title", title)
            .with("description", "");
        if let Some(sid) = assignment {
            props.set("assignmentId", sid.to_string());
        }
        self.create(props, Some(geometry))
    }

    pub fn add_marker(&mut self, title: &str, geometry: Geometry) -> RigResult<FeatureId> {
        self.create(Properties::new().with("class", "Marker").with("title", title), Some(geometry))
    }

    pub fn add_folder(&mut self, title: &str) -> RigResult<FeatureId> {
        self.create(Properties::new().with("class", "Folder").with("title", title), None)
    }

    pub fn edit_properties(&mut self, id: FeatureId, properties: Properties) -> RigResult<Feature> {
        let f = self
            .source
            .set_properties(id, &properties)
            .ok_or_else(|| format!("no source feature {id}"))?;
        self.engine.apply(SourceEvent::PropertyChanged(f.clone()))?;
        Ok(f)
    }

    pub fn edit_geometry(&mut self, id: FeatureId, geometry: Geometry) -> RigResult<Feature> {
        let f = self
            .source
            .set_geometry(id, geometry)
            .ok_or_else(|| format!("no source feature {id}"))?;
        self.engine.apply(SourceEvent::GeometryChanged(f.clone()))?;
        Ok(f)
    }

    pub fn delete(&mut self, id: FeatureId) -> RigResult<()> {
        let f = self.source.remove(id).ok_or_else(|| format!("no source feature {id}"))?;
        self.engine.apply(SourceEvent::Deleted { id, class: f.class() })?;
        Ok(())
    }
}

pub fn assignment_props(letter: &str, number: &str) -> Properties {
    Properties::new()
        .with("class", "Assignment")
        .with("letter", letter)
        .with("number", number)
        .with("title", format!("{letter} {number}"))
}
