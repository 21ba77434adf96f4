//! Instrument identifiers and asset-class tagging.

use serde::{Deserialize, Serialize};

/// Leg codes the broker uses for precious metals.
const METAL_CODES: &[&str] = &["XAU", "XAG", "XPT", "XPD"];

/// Asset class of an instrument. Only Fx and Metal instruments join the
/// correlation universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Fx,
    Metal,
    Cfd,
}

impl AssetClass {
    /// Classify an instrument identifier by its legs.
    ///
    /// A metal leg makes the instrument Metal; two three-letter alphabetic
    /// legs make it Fx; anything else (indices, commodities) is a CFD.
    pub fn classify(instrument: &str) -> AssetClass {
        let legs: Vec<&str> = instrument.split('_').collect();
        if legs.iter().any(|leg| METAL_CODES.contains(leg)) {
            return AssetClass::Metal;
        }
        if legs.len() == 2
            && legs
                .iter()
                .all(|leg| leg.len() == 3 && leg.chars().all(|c| c.is_ascii_uppercase()))
        {
            return AssetClass::Fx;
        }
        AssetClass::Cfd
    }

    /// Whether this class participates in correlation computation.
    pub fn correlates(&self) -> bool {
        matches!(self, AssetClass::Fx | AssetClass::Metal)
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetClass::Fx => "FX",
            AssetClass::Metal => "METAL",
            AssetClass::Cfd => "CFD",
        };
        f.write_str(s)
    }
}
