//! Offset calibration: computing, applying and persisting per-actuator
//! corrective offsets.
//!
//! An offset is the additive correction reconciling an actuator's raw (dial)
//! reading with the geometrically expected position: the reported position
//! is `dial + offset`. Calibrating against a known emission line makes the
//! reported positions line up with the geometry engine's output.
//!
//! Records are flat JSON files: an offsets map keyed by actuator name plus a
//! fixed metadata block. Loading validates the spectrometer identity and the
//! complete metadata before any actuator is touched; a bad record never
//! half-applies.

use crate::capabilities::OffsettableHandle;
use crate::energy::{energy_to_bragg, CrystalCut, CrystalMaterial};
use crate::error::{XesError, XesResult};
use crate::spectrometer::XesSpectrometer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Record name used by [`OffsetStore::apply_from_live`] for its scratch
/// persistence.
pub const SCRATCH_RECORD: &str = "live-calibration";

/// Fixed metadata block of a calibration record.
///
/// Every key is required; a record missing any of them fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetadata {
    /// Identity of the spectrometer the record belongs to.
    pub spectrometer: String,
    /// Analyser material at calibration time.
    pub crystal_material: CrystalMaterial,
    /// Crystal cut at calibration time.
    pub crystal_cut: CrystalCut,
    /// Rowland radius at calibration time, mm.
    pub radius_mm: f64,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Free-form operator note.
    pub note: String,
}

/// A persisted set of per-actuator offsets plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Metadata block, validated before the offsets are applied.
    pub metadata: CalibrationMetadata,
    /// Actuator-name → offset map.
    pub offsets: BTreeMap<String, f64>,
}

/// Computes, applies and persists per-actuator offsets.
pub struct OffsetStore {
    axis: Arc<XesSpectrometer>,
    material: CrystalMaterial,
    cut: CrystalCut,
    actuators: Vec<OffsettableHandle>,
    directory: PathBuf,
}

impl OffsetStore {
    /// Build a store over the offset-capable actuators of a spectrometer.
    ///
    /// `directory` is created if missing; records live there as
    /// `<name>.json`.
    pub fn new(
        axis: Arc<XesSpectrometer>,
        material: CrystalMaterial,
        cut: CrystalCut,
        actuators: Vec<OffsettableHandle>,
        directory: impl Into<PathBuf>,
    ) -> XesResult<Self> {
        if actuators.is_empty() {
            return Err(XesError::Configuration(
                "offset store needs at least one offsettable actuator".into(),
            ));
        }
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| {
            XesError::Calibration(format!(
                "cannot create calibration directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self {
            axis,
            material,
            cut,
            actuators,
            directory,
        })
    }

    /// Geometrically expected position per actuator for a photon energy.
    ///
    /// Energy converts to a Bragg angle through the store's material and
    /// cut, then through the geometry engine with the live radius.
    pub async fn calc_expected_positions(
        &self,
        energy_ev: f64,
    ) -> XesResult<BTreeMap<String, f64>> {
        let bragg = energy_to_bragg(self.material, self.cut, energy_ev)?;
        self.axis.expected_positions(bragg).await
    }

    /// Calibrate every actuator against the live rig at a known energy.
    ///
    /// For each actuator: `new_offset = expected - (reported - old_offset)`,
    /// i.e. the offset that makes the raw dial reading report the expected
    /// position. All new offsets are computed and validated first, then
    /// applied, then persisted to the scratch record. A hardware failure
    /// mid-apply is not rolled back (same policy as a committed move).
    pub async fn apply_from_live(&self, energy_ev: f64) -> XesResult<CalibrationRecord> {
        let expected = self.calc_expected_positions(energy_ev).await?;

        let mut planned = Vec::with_capacity(self.actuators.len());
        for actuator in &self.actuators {
            let name = actuator.name().to_owned();
            let Some(&target) = expected.get(&name) else {
                return Err(XesError::Configuration(format!(
                    "no expected position for actuator '{name}'; it is not part of the \
                     spectrometer model"
                )));
            };
            let reported = actuator.position().await?;
            let old_offset = actuator.offset().await?.unwrap_or(0.0);
            let new_offset = target - (reported - old_offset);
            if !new_offset.is_finite() {
                return Err(XesError::validation(
                    &name,
                    format!("computed offset {new_offset} is not finite"),
                ));
            }
            planned.push((actuator.clone(), name, new_offset));
        }

        let mut offsets = BTreeMap::new();
        for (actuator, name, offset) in planned {
            actuator.set_offset(offset).await?;
            offsets.insert(name, offset);
        }

        let record = CalibrationRecord {
            metadata: self
                .metadata(format!("applied from live positions at {energy_ev} eV"))
                .await?,
            offsets,
        };
        self.write(SCRATCH_RECORD, &record)?;
        info!(energy_ev, record = SCRATCH_RECORD, "offsets calibrated from live rig");
        Ok(record)
    }

    /// Persist the current offsets of every actuator as a named record.
    ///
    /// Actuators whose live offset was never set are recorded as 0.
    pub async fn save_as(&self, name: &str, note: &str) -> XesResult<CalibrationRecord> {
        let mut offsets = BTreeMap::new();
        for actuator in &self.actuators {
            let offset = actuator.offset().await?.unwrap_or(0.0);
            offsets.insert(actuator.name().to_owned(), offset);
        }
        let record = CalibrationRecord {
            metadata: self.metadata(note.to_owned()).await?,
            offsets,
        };
        self.write(name, &record)?;
        info!(record = name, "calibration record saved");
        Ok(record)
    }

    /// Load a named record, validate it, and apply its offsets.
    ///
    /// Validation happens in full before any actuator is mutated: the file
    /// must exist and parse, every metadata key must be present, the
    /// spectrometer identity must match, and every offset key must name a
    /// known actuator.
    pub async fn apply(&self, name: &str) -> XesResult<CalibrationRecord> {
        let record = self.load(name)?;
        let own_name = &self.axis.settings().name;
        if record.metadata.spectrometer != *own_name {
            return Err(XesError::Calibration(format!(
                "record '{name}' belongs to spectrometer '{}', this is '{own_name}'",
                record.metadata.spectrometer
            )));
        }
        if record.metadata.crystal_material != self.material
            || record.metadata.crystal_cut != self.cut
        {
            warn!(
                record = name,
                "record was taken with {} {}, store is configured for {} {}",
                record.metadata.crystal_material,
                record.metadata.crystal_cut,
                self.material,
                self.cut
            );
        }
        for (key, offset) in &record.offsets {
            if !offset.is_finite() {
                return Err(XesError::Calibration(format!(
                    "record '{name}' has non-finite offset for '{key}'"
                )));
            }
            if !self.actuators.iter().any(|a| a.name() == key) {
                return Err(XesError::Calibration(format!(
                    "record '{name}' references unknown actuator '{key}'"
                )));
            }
        }

        for actuator in &self.actuators {
            if let Some(&offset) = record.offsets.get(actuator.name()) {
                actuator.set_offset(offset).await?;
            }
        }
        info!(record = name, "calibration record applied");
        Ok(record)
    }

    /// Load and validate a record without applying it.
    pub fn load(&self, name: &str) -> XesResult<CalibrationRecord> {
        let path = self.record_path(name)?;
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            XesError::Calibration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| XesError::Calibration(format!("malformed record '{name}': {e}")))
    }

    /// Path of a named record inside the store directory.
    pub fn record_path(&self, name: &str) -> XesResult<PathBuf> {
        if name.is_empty()
            || name.contains(&['/', '\\'][..])
            || name == "."
            || name == ".."
            || Path::new(name).components().count() != 1
        {
            return Err(XesError::Calibration(format!(
                "invalid record name '{name}'"
            )));
        }
        Ok(self.directory.join(format!("{name}.json")))
    }

    async fn metadata(&self, note: String) -> XesResult<CalibrationMetadata> {
        Ok(CalibrationMetadata {
            spectrometer: self.axis.settings().name.clone(),
            crystal_material: self.material,
            crystal_cut: self.cut,
            radius_mm: self.axis.current_radius().await?,
            timestamp: Utc::now(),
            note,
        })
    }

    fn write(&self, name: &str, record: &CalibrationRecord) -> XesResult<()> {
        let path = self.record_path(name)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| XesError::Calibration(format!("cannot encode record '{name}': {e}")))?;
        std::fs::write(&path, json).map_err(|e| {
            XesError::Calibration(format!("cannot write {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_survives_json_round_trip() {
        let record = CalibrationRecord {
            metadata: CalibrationMetadata {
                spectrometer: "xes-1".into(),
                crystal_material: CrystalMaterial::Silicon,
                crystal_cut: CrystalCut::new(4, 4, 0).unwrap(),
                radius_mm: 1000.0,
                timestamp: Utc::now(),
                note: "nightly".into(),
            },
            offsets: BTreeMap::from([("det_x".into(), 0.25), ("xtal0_rot".into(), -0.01)]),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: CalibrationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_metadata_key_fails_to_parse() {
        let json = r#"{
            "metadata": {
                "spectrometer": "xes-1",
                "crystal_material": "Silicon",
                "crystal_cut": { "h": 4, "k": 4, "l": 0 },
                "radius_mm": 1000.0,
                "timestamp": "2026-08-01T00:00:00Z"
            },
            "offsets": {}
        }"#;
        // note is missing
        assert!(serde_json::from_str::<CalibrationRecord>(json).is_err());
    }
}
