//! Asset classes, their TPMERC market codes, and year bounds for COTAHIST data

use std::collections::BTreeSet;

use chrono::Datelike;

/// User-facing asset classes mapped to the TPMERC codes that select them.
const ASSET_CLASSES: &[(&str, &[&str])] = &[
    ("ações", &["010", "020"]),
    ("etf", &["010", "020"]),
    ("opções", &["070", "080"]),
    ("termo", &["030"]),
    ("exercicio_opcoes", &["012", "013"]),
    ("forward", &["050", "060"]),
    ("leilao", &["017"]),
];

/// COTAHIST files are published from 1986 onward
pub const MIN_YEAR: u16 = 1986;

/// Validation failures raised before any extraction I/O.
#[derive(Debug)]
pub enum B3ValidationError {
    InvalidAssetName { name: String },
    EmptyAssetList,
    InvalidFirstYear { min: u16, current: u16 },
    InvalidLastYear { first: u16, current: u16 },
    EmptyOutputFilename,
}

impl std::fmt::Display for B3ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAssetName { name } => write!(
                f,
                "invalid asset name '{name}'; must be one of: {}",
                asset_names().join(", ")
            ),
            Self::EmptyAssetList => write!(f, "asset list cannot be empty"),
            Self::InvalidFirstYear { min, current } => write!(
                f,
                "invalid first year; must be an integer between {min} and {current}"
            ),
            Self::InvalidLastYear { first, current } => write!(
                f,
                "invalid last year; must be an integer between {first} and {current}"
            ),
            Self::EmptyOutputFilename => write!(f, "output filename cannot be empty"),
        }
    }
}

impl std::error::Error for B3ValidationError {}

/// All known asset class names, catalog order.
pub fn asset_names() -> Vec<&'static str> {
    ASSET_CLASSES.iter().map(|(name, _)| *name).collect()
}

/// Resolve asset classes into the union of their TPMERC codes.
pub fn market_codes_for(assets: &[String]) -> Result<BTreeSet<String>, B3ValidationError> {
    if assets.is_empty() {
        return Err(B3ValidationError::EmptyAssetList);
    }
    let mut codes = BTreeSet::new();
    for asset in assets {
        let key = asset.trim().to_lowercase();
        let entry = ASSET_CLASSES
            .iter()
            .find(|(name, _)| *name == key)
            .ok_or_else(|| B3ValidationError::InvalidAssetName {
                name: asset.clone(),
            })?;
        codes.extend(entry.1.iter().map(|code| code.to_string()));
    }
    Ok(codes)
}

pub fn current_year() -> u16 {
    chrono::Local::now().year() as u16
}

/// Validate a COTAHIST year range: `1986 ≤ first ≤ last ≤ current year`.
pub fn validate_years(first: u16, last: u16) -> Result<(), B3ValidationError> {
    let current = current_year();
    if first < MIN_YEAR || first > current {
        return Err(B3ValidationError::InvalidFirstYear {
            min: MIN_YEAR,
            current,
        });
    }
    if last > current || first > last {
        return Err(B3ValidationError::InvalidLastYear { first, current });
    }
    Ok(())
}
