//! Energy ↔ Bragg-angle conversion and the layered energy axis.
//!
//! Photon energy and Bragg angle are related through the Bragg law,
//! `E = hc / (2d·sinθ)`, where `d` is the lattice spacing of the analyser
//! crystal's material and cut. [`EnergyAxis`] layers this conversion over the
//! [`XesSpectrometer`] so callers can drive the rig in eV instead of degrees.

use crate::error::{XesError, XesResult};
use crate::geometry::checked_asin_deg;
use crate::spectrometer::{AxisStatus, XesSpectrometer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// hc in eV·Å (CODATA): converts between photon energy and wavelength.
pub const HC_EV_ANGSTROM: f64 = 12_398.419_843_320_026;

/// Analyser crystal material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrystalMaterial {
    /// Silicon, lattice constant 5.4310205 Å.
    Silicon,
    /// Germanium, lattice constant 5.6579060 Å.
    Germanium,
}

impl CrystalMaterial {
    /// Cubic lattice constant in Å.
    pub fn lattice_constant(&self) -> f64 {
        match self {
            Self::Silicon => 5.431_020_5,
            Self::Germanium => 5.657_906_0,
        }
    }
}

impl std::fmt::Display for CrystalMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silicon => write!(f, "silicon"),
            Self::Germanium => write!(f, "germanium"),
        }
    }
}

/// Miller indices of the analyser crystal cut, e.g. Si(4,4,0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrystalCut {
    /// First Miller index.
    pub h: u32,
    /// Second Miller index.
    pub k: u32,
    /// Third Miller index.
    pub l: u32,
}

impl CrystalCut {
    /// Build a cut, rejecting the all-zero index triple.
    pub fn new(h: u32, k: u32, l: u32) -> XesResult<Self> {
        if h == 0 && k == 0 && l == 0 {
            return Err(XesError::Configuration(
                "crystal cut indices must not all be zero".into(),
            ));
        }
        Ok(Self { h, k, l })
    }

    /// Lattice-plane spacing `d = a / sqrt(h² + k² + l²)` in Å.
    pub fn d_spacing(&self, material: CrystalMaterial) -> f64 {
        let sum = f64::from(self.h * self.h + self.k * self.k + self.l * self.l);
        material.lattice_constant() / sum.sqrt()
    }
}

impl std::fmt::Display for CrystalCut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.h, self.k, self.l)
    }
}

/// Photon energy in eV selected by `(material, cut)` at a Bragg angle.
pub fn bragg_to_energy(
    material: CrystalMaterial,
    cut: CrystalCut,
    theta_deg: f64,
) -> XesResult<f64> {
    let sin = theta_deg.to_radians().sin();
    if !sin.is_finite() || sin <= 0.0 {
        return Err(XesError::GeometryDomain {
            context: "bragg to energy",
            value: sin,
        });
    }
    Ok(HC_EV_ANGSTROM / (2.0 * cut.d_spacing(material) * sin))
}

/// Bragg angle in degrees selecting `energy_ev` for `(material, cut)`.
///
/// Fails with a domain error when the energy is below the backscattering
/// limit of the cut (the asin argument exceeds 1).
pub fn energy_to_bragg(
    material: CrystalMaterial,
    cut: CrystalCut,
    energy_ev: f64,
) -> XesResult<f64> {
    if !(energy_ev.is_finite() && energy_ev > 0.0) {
        return Err(XesError::GeometryDomain {
            context: "energy to bragg",
            value: energy_ev,
        });
    }
    checked_asin_deg(
        HC_EV_ANGSTROM / (2.0 * cut.d_spacing(material) * energy_ev),
        "energy to bragg",
    )
}

/// Virtual energy axis layered over the spectrometer.
///
/// Translates eV to Bragg degrees through the configured material and cut and
/// delegates motion to the underlying [`XesSpectrometer`].
pub struct EnergyAxis {
    spectrometer: Arc<XesSpectrometer>,
    material: CrystalMaterial,
    cut: CrystalCut,
}

impl EnergyAxis {
    /// Layer an energy axis over a spectrometer.
    pub fn new(spectrometer: Arc<XesSpectrometer>, material: CrystalMaterial, cut: CrystalCut) -> Self {
        Self {
            spectrometer,
            material,
            cut,
        }
    }

    /// Configured analyser material.
    pub fn material(&self) -> CrystalMaterial {
        self.material
    }

    /// Configured crystal cut.
    pub fn cut(&self) -> CrystalCut {
        self.cut
    }

    /// Schedule a coordinated move to the Bragg angle selecting `energy_ev`.
    ///
    /// Returns once commands are issued, like
    /// [`XesSpectrometer::set_position`].
    pub async fn set_energy(&self, energy_ev: f64) -> XesResult<()> {
        let theta = energy_to_bragg(self.material, self.cut, energy_ev)?;
        self.spectrometer.set_position(theta).await
    }

    /// Current energy derived from the spectrometer's Bragg position.
    pub async fn get_energy(&self) -> XesResult<f64> {
        let theta = self.spectrometer.get_position().await?;
        bragg_to_energy(self.material, self.cut, theta)
    }

    /// Whether the underlying spectrometer is in motion.
    pub async fn is_busy(&self) -> XesResult<bool> {
        self.spectrometer.is_busy().await
    }

    /// Stop the underlying spectrometer.
    pub async fn stop(&self) -> XesResult<()> {
        self.spectrometer.stop().await
    }

    /// Subscribe to the underlying axis status channel.
    pub fn subscribe(&self) -> watch::Receiver<AxisStatus> {
        self.spectrometer.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn si440() -> (CrystalMaterial, CrystalCut) {
        (CrystalMaterial::Silicon, CrystalCut::new(4, 4, 0).unwrap())
    }

    #[test]
    fn silicon_440_d_spacing() {
        let (mat, cut) = si440();
        // a / sqrt(32)
        assert!((cut.d_spacing(mat) - 5.431_020_5 / 32f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn conversion_round_trips() {
        let (mat, cut) = si440();
        for &theta in &[55.0, 65.0, 75.0, 85.0] {
            let energy = bragg_to_energy(mat, cut, theta).unwrap();
            let back = energy_to_bragg(mat, cut, energy).unwrap();
            assert!((back - theta).abs() < 1e-9, "theta {theta} -> {back}");
        }
    }

    #[test]
    fn si440_at_75_degrees_is_near_6685_ev() {
        let (mat, cut) = si440();
        let energy = bragg_to_energy(mat, cut, 75.0).unwrap();
        assert!((6000.0..7500.0).contains(&energy), "got {energy}");
    }

    #[test]
    fn sub_backscatter_energy_is_a_domain_error() {
        let (mat, cut) = si440();
        // Below the minimum energy the cut can reach, asin argument > 1.
        let e_min = bragg_to_energy(mat, cut, 90.0 - 1e-9).unwrap();
        assert!(matches!(
            energy_to_bragg(mat, cut, e_min * 0.9),
            Err(XesError::GeometryDomain { .. })
        ));
        assert!(energy_to_bragg(mat, cut, -1.0).is_err());
    }

    #[test]
    fn all_zero_cut_rejected() {
        assert!(CrystalCut::new(0, 0, 0).is_err());
    }
}
