use crate::error::CollabError;
use crate::record::CarRecord;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub value: f64,
    pub confidence: f64,
}

/// Residual-value predictor collaborator.
pub trait ResidualPredictor: Send + Sync {
    fn predict(&self, record: &CarRecord, reference_year: i32) -> Result<Prediction, CollabError>;
}

/// Log-linear depreciation model loaded from a JSON coefficient artifact.
///
/// ln(price) = intercept + age·age_coef + mileage·mileage_coef
///           + hp·hp_coef + clean_title_bonus
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactModel {
    pub intercept: f64,
    pub age_coef: f64,
    pub mileage_coef: f64,

    #[serde(default)]
    pub hp_coef: f64,

    #[serde(default)]
    pub clean_title_bonus: f64,

    #[serde(default = "default_confidence")]
    pub base_confidence: f64,
}

fn default_confidence() -> f64 {
    0.75
}

impl ArtifactModel {
    /// Missing artifact is the expected not-configured state, not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, CollabError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let model: ArtifactModel = serde_json::from_str(&content)
            .map_err(|e| CollabError::Invalid(format!("bad model artifact: {}", e)))?;
        Ok(Some(model))
    }
}

impl ResidualPredictor for ArtifactModel {
    fn predict(&self, record: &CarRecord, reference_year: i32) -> Result<Prediction, CollabError> {
        let age = (reference_year - record.year).max(0) as f64;
        let mut log_price =
            self.intercept + age * self.age_coef + record.mileage as f64 * self.mileage_coef;

        // Optional features shrink confidence when absent
        let mut confidence = self.base_confidence;
        match record.horsepower {
            Some(hp) => log_price += hp * self.hp_coef,
            None => confidence *= 0.9,
        }
        if record.clean_title {
            log_price += self.clean_title_bonus;
        }

        let value = log_price.exp();
        if !value.is_finite() || value <= 0.0 {
            return Err(CollabError::Invalid(format!(
                "predictor produced non-positive value {}",
                value
            )));
        }

        Ok(Prediction { value, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ArtifactModel {
        // Roughly: $30k new, -8.5%/yr, -0.55%/10k miles
        ArtifactModel {
            intercept: 10.31,
            age_coef: -0.085,
            mileage_coef: -0.0000055,
            hp_coef: 0.0,
            clean_title_bonus: 0.04,
            base_confidence: 0.75,
        }
    }

    fn record(year: i32, mileage: u32) -> CarRecord {
        CarRecord {
            id: "t".to_string(),
            year,
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            mileage,
            price_paid: 22_500.0,
            accident_history: None,
            clean_title: true,
            horsepower: None,
            engine_liters: None,
            fuel_type: None,
            transmission: None,
        }
    }

    #[test]
    fn test_newer_car_worth_more() {
        let m = model();
        let newer = m.predict(&record(2022, 20_000), 2025).unwrap();
        let older = m.predict(&record(2016, 20_000), 2025).unwrap();
        assert!(newer.value > older.value);
    }

    #[test]
    fn test_mileage_depresses_value() {
        let m = model();
        let low = m.predict(&record(2020, 20_000), 2025).unwrap();
        let high = m.predict(&record(2020, 120_000), 2025).unwrap();
        assert!(low.value > high.value);
    }

    #[test]
    fn test_missing_hp_lowers_confidence() {
        let m = model();
        let mut with_hp = record(2020, 30_000);
        with_hp.horsepower = Some(200.0);
        let a = m.predict(&with_hp, 2025).unwrap();
        let b = m.predict(&record(2020, 30_000), 2025).unwrap();
        assert!(a.confidence > b.confidence);
    }

    #[test]
    fn test_missing_artifact_is_none() {
        let loaded = ArtifactModel::load(Path::new("/nonexistent/model.json")).unwrap();
        assert!(loaded.is_none());
    }
}
