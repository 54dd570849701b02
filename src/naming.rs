//! Filename grammar for inputs and derived artifacts
//!
//! Input volumes are named `<base>-<modality>.nii.gz`. From that name we derive
//! the segmented intermediate `<base>-segmented-<modality>.nii.gz` and the
//! requested output `<base>-<modality>.vrdf`. Matching is anchored at the end
//! of the name and case-sensitive.

use crate::error::{Result, VrdfError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extension of input and intermediate volumes
pub const VOLUME_EXTENSION: &str = ".nii.gz";

/// Extension of encoded output files
pub const OUTPUT_EXTENSION: &str = ".vrdf";

const SEGMENTED_MARKER: &str = "-segmented";

/// Acquisition type embedded in a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Native T1
    T1n,
    /// Contrast-enhanced T1
    T1c,
    /// T2-weighted
    T2w,
    /// T2 FLAIR
    T2f,
}

impl Modality {
    pub const ALL: [Modality; 4] = [Modality::T1n, Modality::T1c, Modality::T2w, Modality::T2f];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::T1n => "t1n",
            Modality::T1c => "t1c",
            Modality::T2w => "t2w",
            Modality::T2f => "t2f",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = VrdfError;

    fn from_str(s: &str) -> Result<Self> {
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| VrdfError::ModalityUnresolved {
                filename: s.to_string(),
            })
    }
}

/// Split `<base>-<modality><extension>` into its base and modality
fn split_suffix<'a>(name: &'a str, extension: &str) -> Option<(&'a str, Modality)> {
    let stem = name.strip_suffix(extension)?;
    Modality::ALL.into_iter().find_map(|modality| {
        stem.strip_suffix(modality.as_str())
            .and_then(|rest| rest.strip_suffix('-'))
            .map(|base| (base, modality))
    })
}

/// Extract the modality token from an input filename
pub fn extract_modality(filename: &str) -> Result<Modality> {
    VolumeName::parse(filename).map(|name| name.modality())
}

/// A parsed input volume name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeName {
    base: String,
    modality: Modality,
}

impl VolumeName {
    pub fn new(base: impl Into<String>, modality: Modality) -> Self {
        Self {
            base: base.into(),
            modality,
        }
    }

    /// Parse an input filename of the form `<base>-<modality>.nii.gz`
    pub fn parse(filename: &str) -> Result<Self> {
        split_suffix(filename, VOLUME_EXTENSION)
            .map(|(base, modality)| Self::new(base, modality))
            .ok_or_else(|| VrdfError::ModalityUnresolved {
                filename: filename.to_string(),
            })
    }

    /// Recover the input name from a segmented intermediate name
    pub fn from_segmented(filename: &str) -> Result<Self> {
        split_suffix(filename, VOLUME_EXTENSION)
            .and_then(|(base, modality)| {
                base.strip_suffix(SEGMENTED_MARKER)
                    .map(|base| Self::new(base, modality))
            })
            .ok_or_else(|| VrdfError::ModalityUnresolved {
                filename: filename.to_string(),
            })
    }

    /// Recover the input name from an output name, with or without an
    /// encoder suffix such as `_lw`
    pub fn from_output(filename: &str, encoder_suffix: &str) -> Result<Self> {
        let unresolved = || VrdfError::ModalityUnresolved {
            filename: filename.to_string(),
        };
        let stem = filename.strip_suffix(OUTPUT_EXTENSION).ok_or_else(unresolved)?;
        let stem = stem.strip_suffix(encoder_suffix).unwrap_or(stem);
        let with_ext = format!("{}{}", stem, VOLUME_EXTENSION);
        split_suffix(&with_ext, VOLUME_EXTENSION)
            .map(|(base, modality)| Self::new(base, modality))
            .ok_or_else(unresolved)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// `<base>-<modality>.nii.gz`
    pub fn input_name(&self) -> String {
        format!("{}-{}{}", self.base, self.modality, VOLUME_EXTENSION)
    }

    /// `<base>-segmented-<modality>.nii.gz`
    pub fn segmented_name(&self) -> String {
        format!(
            "{}{}-{}{}",
            self.base, SEGMENTED_MARKER, self.modality, VOLUME_EXTENSION
        )
    }

    /// `<base>-<modality>.vrdf`; the encoder may write under a different name
    pub fn requested_output_name(&self) -> String {
        format!("{}-{}{}", self.base, self.modality, OUTPUT_EXTENSION)
    }
}
