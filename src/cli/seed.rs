use crate::cli::{SeedArgs, DEFAULT_CONFIG};
use crate::config::Config;
use crate::record::{CaseEntry, CaseStore};
use crate::retrieval::{Embedder, HashedEmbedder, IndexDoc, MemoryIndex, VectorIndex};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

/// Upsert every case-store entry into the retrieval index so both
/// retrieval stages have a corpus to query.
pub fn execute(args: SeedArgs) -> anyhow::Result<()> {
    let explicit = args.config.is_some();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::load_or_default(&config_path, explicit)?;
    if let Some(cases) = args.cases.clone() {
        config.cases_file = cases;
    }

    let store = CaseStore::load(&config.cases_file)?;
    let embedder = HashedEmbedder::new(config.embedding_dimension);
    let mut index = MemoryIndex::load(&config.index_file)?;

    for entry in &store.cases {
        let (text, label) = case_document(entry);
        index.upsert(
            IndexDoc {
                id: entry.record.fingerprint(),
                text: text.clone(),
                label,
            },
            embedder.embed(&text),
        );
    }

    index.save(&config.index_file)?;
    info!(
        "indexed {} case(s) into {:?}",
        index.len(),
        config.index_file
    );
    Ok(())
}

fn case_document(entry: &CaseEntry) -> (String, String) {
    let mut text = entry.record.description();
    let mut label = text.clone();
    if let Some(outcome) = &entry.outcome {
        if let Some(median) = outcome.market_median {
            let _ = write!(text, " market median ${:.0}", median);
        }
        if let Some(verdict) = &outcome.verdict {
            let _ = write!(text, " verdict {}", verdict);
            let _ = write!(label, " ({})", verdict);
        }
        if let Some(notes) = &outcome.notes {
            let _ = write!(text, " {}", notes);
        }
    }
    (text, label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CarRecord, CaseOutcome};

    #[test]
    fn test_case_document_folds_outcome_in() {
        let entry = CaseEntry {
            record: CarRecord {
                id: "camry-19".to_string(),
                year: 2019,
                make: "Toyota".to_string(),
                model: "Camry".to_string(),
                mileage: 42_000,
                price_paid: 19_500.0,
                accident_history: None,
                clean_title: true,
                horsepower: None,
                engine_liters: None,
                fuel_type: None,
                transmission: None,
            },
            outcome: Some(CaseOutcome {
                market_median: Some(20_100.0),
                verdict: Some("favorable".to_string()),
                rule_score: Some(72),
                notes: Some("sold below market".to_string()),
            }),
        };

        let (text, label) = case_document(&entry);
        assert!(text.contains("market median $20100"));
        assert!(text.contains("sold below market"));
        assert!(label.contains("(favorable)"));
    }
}
