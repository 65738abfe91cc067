//! Catalog of CVM document types, their download URLs, and year bounds

use chrono::Datelike;

/// CVM open-data portal base URL
const BASE_URL: &str = "https://dados.cvm.gov.br";

/// Document codes with their portal descriptions.
///
/// DFP (Standardized Financial Statements), ITR (Quarterly Information),
/// FRE (Reference Form), FCA (Registration Form), CGVN (Governance Code
/// Report), VLMO (Negotiated and Held Securities), IPE (Periodic and
/// Eventual Documents).
const AVAILABLE_DOCS: &[(&str, &str)] = &[
    ("DFP", "Standardized financial statements for the closed fiscal year: balance sheet, income statement, cash flow, value added, notes, and auditor's report"),
    ("ITR", "Quarterly statements and disclosures required each quarter"),
    ("FRE", "Reference form: activities, risk factors, corporate structure, management, compensation, securities, auditing"),
    ("FCA", "Registration form: official company data and its updates"),
    ("CGVN", "Adherence report for the corporate governance code"),
    ("VLMO", "Reports on securities negotiated and held by insiders"),
    ("IPE", "Periodic and eventual unstructured documents: minutes, material facts, announcements, prospectuses"),
];

/// First year the CVM portal serves general document types
const MIN_GENERAL_YEAR: u16 = 2010;
/// ITR datasets start a year later
const MIN_ITR_YEAR: u16 = 2011;
/// Governance and insider-trading datasets start in 2018
const MIN_CGVN_VLMO_YEAR: u16 = 2018;

/// Validation failures raised before any download I/O.
#[derive(Debug)]
pub enum CvmValidationError {
    InvalidDocName { name: String },
    InvalidFirstYear { min: u16, current: u16 },
    InvalidLastYear { first: u16, current: u16 },
    EmptyDocumentList,
}

impl std::fmt::Display for CvmValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDocName { name } => write!(
                f,
                "invalid document name '{name}'; must be one of: {}",
                doc_codes().join(", ")
            ),
            Self::InvalidFirstYear { min, current } => write!(
                f,
                "invalid first year; must be an integer between {min} and {current}"
            ),
            Self::InvalidLastYear { first, current } => write!(
                f,
                "invalid last year; must be an integer between {first} and {current}"
            ),
            Self::EmptyDocumentList => write!(f, "document list cannot be empty"),
        }
    }
}

impl std::error::Error for CvmValidationError {}

/// All known document codes, catalog order.
pub fn doc_codes() -> Vec<&'static str> {
    AVAILABLE_DOCS.iter().map(|(code, _)| *code).collect()
}

/// Code → description map of every available document type.
pub fn available_docs() -> &'static [(&'static str, &'static str)] {
    AVAILABLE_DOCS
}

/// Resolve a user-supplied name to its canonical code.
pub fn validate_doc_name(name: &str) -> Result<&'static str, CvmValidationError> {
    let key = name.trim().to_uppercase();
    AVAILABLE_DOCS
        .iter()
        .map(|(code, _)| *code)
        .find(|code| *code == key)
        .ok_or(CvmValidationError::InvalidDocName {
            name: name.to_string(),
        })
}

/// First year the portal serves the given document type.
pub fn min_year_for(doc: &str) -> u16 {
    match doc {
        "ITR" => MIN_ITR_YEAR,
        "CGVN" | "VLMO" => MIN_CGVN_VLMO_YEAR,
        _ => MIN_GENERAL_YEAR,
    }
}

pub fn current_year() -> u16 {
    chrono::Local::now().year() as u16
}

/// Validate a requested year range against the general CVM bounds.
///
/// Per-document floors (ITR, CGVN/VLMO) are applied later by clamping the
/// range, so a mixed request like `[DFP, ITR] 2010..2012` stays valid.
pub fn validate_years(first: u16, last: u16) -> Result<(), CvmValidationError> {
    let current = current_year();
    if first < MIN_GENERAL_YEAR || first > current {
        return Err(CvmValidationError::InvalidFirstYear {
            min: MIN_GENERAL_YEAR,
            current,
        });
    }
    if last > current || first > last {
        return Err(CvmValidationError::InvalidLastYear { first, current });
    }
    Ok(())
}

/// Download URL for one document/year, matching the portal layout:
/// `{base}/dados/CIA_ABERTA/DOC/{DOC}/DADOS/{doc}_cia_aberta_{yyyy}.zip`.
pub fn doc_url(doc: &str, year: u16) -> String {
    format!(
        "{BASE_URL}/dados/CIA_ABERTA/DOC/{doc}/DADOS/{}_cia_aberta_{year}.zip",
        doc.to_lowercase()
    )
}

/// Local file name for one document/year.
pub fn doc_filename(doc: &str, year: u16) -> String {
    format!("{}_cia_aberta_{year}.zip", doc.to_lowercase())
}
