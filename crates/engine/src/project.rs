use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::machine::Context;
use crate::timeline::{Clip, ClipId, Take, TakeId, Timeline};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current on-disk document version.
pub const PROJECT_VERSION: u32 = 1;

/// Persisted form of a session: takes plus clip placements.
///
/// Timeline positions are not stored; they are re-derived on load so a
/// hand-edited document can never describe overlapping clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub version: u32,
    pub takes: Vec<Take>,
    pub clips: Vec<ClipRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub id: ClipId,
    pub take_id: TakeId,
    pub source_in: i64,
    pub source_out: i64,
    #[serde(default)]
    pub track: u32,
    pub order: u32,
}

impl From<&Clip> for ClipRecord {
    fn from(clip: &Clip) -> Self {
        Self {
            id: clip.id,
            take_id: clip.take_id,
            source_in: clip.source_in,
            source_out: clip.source_out,
            track: clip.track,
            order: clip.order,
        }
    }
}

impl From<ClipRecord> for Clip {
    fn from(record: ClipRecord) -> Self {
        Self {
            track: record.track,
            order: record.order,
            ..Clip::new(record.id, record.take_id, record.source_in, record.source_out)
        }
    }
}

impl ProjectDocument {
    pub fn from_context(context: &Context) -> Self {
        Self {
            version: PROJECT_VERSION,
            takes: context.takes.values().cloned().collect(),
            clips: context.timeline.clips.iter().map(ClipRecord::from).collect(),
        }
    }

    /// Checks version, id uniqueness, take references and source ranges.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROJECT_VERSION {
            return Err(EngineError::InvalidProjectFile {
                reason: format!("unsupported version {}", self.version),
            });
        }

        let mut takes = BTreeMap::new();
        for take in &self.takes {
            if take.duration_tl <= 0 {
                return Err(EngineError::InvalidTakeDuration {
                    take_id: take.id,
                    duration_tl: take.duration_tl,
                });
            }
            if takes.insert(take.id, take).is_some() {
                return Err(EngineError::InvalidProjectFile {
                    reason: format!("take {} appears more than once", take.id),
                });
            }
        }

        let mut clip_ids = HashSet::new();
        for clip in &self.clips {
            if !clip_ids.insert(clip.id) {
                return Err(EngineError::InvalidProjectFile {
                    reason: format!("clip {} appears more than once", clip.id),
                });
            }
            let take = takes.get(&clip.take_id).ok_or(EngineError::TakeNotFound {
                take_id: clip.take_id,
            })?;
            if clip.source_in < 0
                || clip.source_out <= clip.source_in
                || clip.source_out > take.duration_tl
            {
                return Err(EngineError::InvalidClipRange {
                    clip_id: clip.id,
                    source_in: clip.source_in,
                    source_out: clip.source_out,
                });
            }
        }
        Ok(())
    }

    /// Validates the document and rebuilds the laid-out timeline and take table.
    pub fn into_parts(self) -> Result<(Timeline, BTreeMap<TakeId, Take>)> {
        self.validate()?;
        let takes = self
            .takes
            .into_iter()
            .map(|take| (take.id, take))
            .collect();
        let timeline = Timeline::from_clips(self.clips.into_iter().map(Clip::from).collect());
        Ok((timeline, takes))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| EngineError::ProjectSerialization {
            path: Default::default(),
            source,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|source| EngineError::ProjectSerialization {
            path: Default::default(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_vec_pretty(self).map_err(|source| EngineError::ProjectSerialization {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, json).map_err(|source| EngineError::ProjectIo {
            context: "failed to write project",
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), clips = self.clips.len(), "project saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| EngineError::ProjectIo {
            context: "failed to read project",
            path: path.to_path_buf(),
            source,
        })?;
        let document: Self =
            serde_json::from_slice(&bytes).map_err(|source| EngineError::ProjectSerialization {
                path: path.to_path_buf(),
                source,
            })?;
        document.validate()?;
        debug!(path = %path.display(), clips = document.clips.len(), "project loaded");
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClipRecord, PROJECT_VERSION, ProjectDocument};
    use crate::error::EngineError;
    use crate::machine::{Machine, Mode};
    use crate::timeline::Take;

    fn document() -> ProjectDocument {
        ProjectDocument {
            version: PROJECT_VERSION,
            takes: vec![
                Take {
                    id: 1,
                    url: String::from("file:///takes/1.mkv"),
                    duration_tl: 6_000_000,
                },
                Take {
                    id: 2,
                    url: String::from("file:///takes/2.mkv"),
                    duration_tl: 3_000_000,
                },
            ],
            clips: vec![
                ClipRecord {
                    id: 4,
                    take_id: 2,
                    source_in: 0,
                    source_out: 3_000_000,
                    track: 0,
                    order: 1,
                },
                ClipRecord {
                    id: 3,
                    take_id: 1,
                    source_in: 1_000_000,
                    source_out: 5_000_000,
                    track: 0,
                    order: 0,
                },
            ],
        }
    }

    #[test]
    fn save_and_load_preserve_document() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("project.json");

        document().save(&path).expect("save project");
        let loaded = ProjectDocument::load(&path).expect("load project");

        assert_eq!(loaded, document());
    }

    #[test]
    fn restore_relays_out_clips_and_continues_id_allocation() {
        let mut machine = Machine::restore(document()).expect("restore");

        let context = machine.context();
        assert_eq!(context.mode(), Mode::Idle);
        let layout: Vec<(u64, i64)> = context
            .timeline
            .clips
            .iter()
            .map(|clip| (clip.id, clip.timeline_start))
            .collect();
        assert_eq!(layout, vec![(3, 0), (4, 4_000_000)]);

        machine
            .handle(crate::machine::MachineEvent::Split {
                clip_id: 3,
                at_tl: 1_000_000,
            })
            .expect("split");
        assert!(machine.context().timeline.contains(5));
    }

    #[test]
    fn validate_rejects_clip_outside_its_take() {
        let mut doc = document();
        doc.clips[0].source_out = 9_000_000;

        assert!(matches!(
            doc.validate(),
            Err(EngineError::InvalidClipRange { clip_id: 4, .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_take_and_version() {
        let mut doc = document();
        doc.clips[1].take_id = 42;
        assert!(matches!(
            doc.validate(),
            Err(EngineError::TakeNotFound { take_id: 42 })
        ));

        let mut doc = document();
        doc.version = 99;
        assert!(matches!(
            doc.validate(),
            Err(EngineError::InvalidProjectFile { .. })
        ));
    }

    #[test]
    fn from_json_defaults_missing_track() {
        let json = r#"{
            "version": 1,
            "takes": [{ "id": 1, "url": "blob:a", "duration_tl": 1000 }],
            "clips": [{ "id": 1, "take_id": 1, "source_in": 0, "source_out": 1000, "order": 0 }]
        }"#;

        let doc = ProjectDocument::from_json(json).expect("parse");

        assert_eq!(doc.clips[0].track, 0);
        assert!(doc.to_json().expect("serialize").contains("\"take_id\": 1"));
    }
}
