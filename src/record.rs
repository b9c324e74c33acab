use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Immutable snapshot of the vehicle facts supplied at workflow entry.
///
/// Everything beyond the pricing basics is optional; the residual predictor
/// uses whatever richer features are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarRecord {
    pub id: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub mileage: u32,
    pub price_paid: f64,

    #[serde(default)]
    pub accident_history: Option<String>,

    #[serde(default)]
    pub clean_title: bool,

    #[serde(default)]
    pub horsepower: Option<f64>,

    #[serde(default)]
    pub engine_liters: Option<f64>,

    #[serde(default)]
    pub fuel_type: Option<String>,

    #[serde(default)]
    pub transmission: Option<String>,
}

impl CarRecord {
    /// One-line text used as the retrieval query and index document.
    pub fn description(&self) -> String {
        let mut text = format!(
            "{} {} {} {} miles paid ${:.0}",
            self.year, self.make, self.model, self.mileage, self.price_paid
        );
        if let Some(fuel) = &self.fuel_type {
            text.push(' ');
            text.push_str(fuel);
        }
        if let Some(trans) = &self.transmission {
            text.push(' ');
            text.push_str(trans);
        }
        text
    }

    /// Stable fingerprint for index dedupe across re-seeds.
    pub fn fingerprint(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}|{}|{}",
            self.id, self.year, self.make, self.model, self.mileage, self.price_paid
        );
        let hash = Sha256::digest(input.as_bytes());
        format!("{:x}", hash)[..12].to_string()
    }
}

/// Outcome of a past evaluation, kept alongside its record so the
/// retrieval index has something to say about each historical case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    #[serde(default)]
    pub market_median: Option<f64>,

    #[serde(default)]
    pub verdict: Option<String>,

    #[serde(default)]
    pub rule_score: Option<u8>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEntry {
    #[serde(flatten)]
    pub record: CarRecord,

    #[serde(default)]
    pub outcome: Option<CaseOutcome>,
}

/// JSON-backed store of input records and their historical outcomes.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CaseStore {
    pub cases: Vec<CaseEntry>,
}

impl CaseStore {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).map_err(|e| StoreError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let store: CaseStore = serde_json::from_str(&content)?;
        if store.cases.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Result<&CaseEntry, StoreError> {
        self.cases
            .iter()
            .find(|c| c.record.id == id)
            .ok_or_else(|| StoreError::UnknownCase(id.to_string()))
    }

    /// Select records for a run: explicit ids win, otherwise a limit/offset
    /// window over the whole store.
    pub fn select(
        &self,
        ids: &[String],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<CarRecord>, StoreError> {
        if !ids.is_empty() {
            return ids
                .iter()
                .map(|id| self.get(id).map(|c| c.record.clone()))
                .collect();
        }

        let window: Vec<CarRecord> = self
            .cases
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|c| c.record.clone())
            .collect();

        if window.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(window)
    }
}
