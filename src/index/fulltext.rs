use std::collections::HashMap;

use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

use crate::core::error::{Error, Result};
use crate::core::value::{RowId, Value};
use crate::index::idset::IdSet;
use crate::index::KeySelect;
use crate::query::query::CondType;

/// Text analysis chain: unicode word split, lowercase, then stemming.
pub struct Analyzer {
    stemmer: Option<Stemmer>,
    max_token_length: usize,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("stemming", &self.stemmer.is_some())
            .field("max_token_length", &self.max_token_length)
            .finish()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer {
            stemmer: Some(Stemmer::create(Algorithm::English)),
            max_token_length: 255,
        }
    }
}

impl Analyzer {
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        lowered
            .unicode_words()
            .filter(|w| w.len() <= self.max_token_length)
            .map(|w| match &self.stemmer {
                Some(s) => s.stem(w).to_string(),
                None => w.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Posting {
    row: RowId,
    term_freq: u32,
}

/// Inverted index over one string field. Only `Match` is served; the
/// result carries a relevance rank per row (tf·idf over query terms).
#[derive(Debug)]
pub struct FullTextIndex {
    postings: HashMap<String, Vec<Posting>>,
    /// Terms each row contributed, so delete can walk its postings back.
    row_terms: HashMap<RowId, Vec<String>>,
    analyzer: Analyzer,
}

impl FullTextIndex {
    pub fn new() -> Self {
        FullTextIndex {
            postings: HashMap::new(),
            row_terms: HashMap::new(),
            analyzer: Analyzer::default(),
        }
    }

    pub fn upsert(&mut self, key: &Value, row: RowId) -> Result<()> {
        let text = match key {
            Value::String(s) => s.as_str(),
            Value::Null => "",
            other => {
                return Err(Error::params(format!(
                    "full-text index expects string values, got {}",
                    other.value_type().name()
                )))
            }
        };

        // Re-inserting a row replaces its postings wholesale
        self.remove_row(row);

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for term in self.analyzer.analyze(text) {
            *freqs.entry(term).or_insert(0) += 1;
        }

        let mut terms = Vec::with_capacity(freqs.len());
        for (term, term_freq) in freqs {
            let list = self.postings.entry(term.clone()).or_default();
            let pos = list.partition_point(|p| p.row < row);
            list.insert(pos, Posting { row, term_freq });
            terms.push(term);
        }
        self.row_terms.insert(row, terms);
        Ok(())
    }

    pub fn delete(&mut self, _key: &Value, row: RowId) {
        self.remove_row(row);
    }

    pub fn select(&self, keys: &[Value], cond: CondType) -> Result<KeySelect> {
        if cond != CondType::Match {
            return Err(Error::params(
                "full-text index serves only match conditions",
            ));
        }
        let query = match keys.first() {
            Some(Value::String(s)) => s.as_str(),
            _ => return Err(Error::params("match condition needs a string value")),
        };

        let total_rows = self.row_terms.len().max(1) as f32;
        let mut ranks: HashMap<RowId, f32> = HashMap::new();
        for term in self.analyzer.analyze(query) {
            if let Some(list) = self.postings.get(&term) {
                let idf = (total_rows / list.len() as f32).ln() + 1.0;
                for p in list {
                    *ranks.entry(p.row).or_insert(0.0) += p.term_freq as f32 * idf;
                }
            }
        }

        let ids: IdSet = ranks.keys().copied().collect();
        Ok(KeySelect::Ranked(ids, ranks))
    }

    pub fn unique_keys(&self) -> usize {
        self.postings.len()
    }

    pub fn mem_usage(&self) -> (usize, usize) {
        let ids = self
            .postings
            .values()
            .map(|l| l.capacity() * std::mem::size_of::<Posting>())
            .sum();
        let data = self.postings.keys().map(|t| t.len()).sum();
        (ids, data)
    }

    fn remove_row(&mut self, row: RowId) {
        if let Some(terms) = self.row_terms.remove(&row) {
            for term in terms {
                if let Some(list) = self.postings.get_mut(&term) {
                    list.retain(|p| p.row != row);
                    if list.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }
    }
}

impl Default for FullTextIndex {
    fn default() -> Self {
        FullTextIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(sel: KeySelect) -> (IdSet, HashMap<RowId, f32>) {
        match sel {
            KeySelect::Ranked(ids, ranks) => (ids, ranks),
            other => panic!("expected ranked result, got {:?}", other),
        }
    }

    #[test]
    fn match_finds_stemmed_terms() {
        let mut ix = FullTextIndex::new();
        ix.upsert(&Value::String("quick brown foxes".into()), 1)
            .unwrap();
        ix.upsert(&Value::String("lazy dogs sleeping".into()), 2)
            .unwrap();

        let (ids, _) = ranked(ix.select(&[Value::String("fox".into())], CondType::Match).unwrap());
        assert_eq!(ids.as_slice(), &[1]);
    }

    #[test]
    fn rank_prefers_repeated_terms() {
        let mut ix = FullTextIndex::new();
        ix.upsert(&Value::String("ada ada ada".into()), 1).unwrap();
        ix.upsert(&Value::String("ada once".into()), 2).unwrap();

        let (_, ranks) = ranked(
            ix.select(&[Value::String("ada".into())], CondType::Match)
                .unwrap(),
        );
        assert!(ranks[&1] > ranks[&2]);
    }

    #[test]
    fn delete_removes_postings() {
        let mut ix = FullTextIndex::new();
        ix.upsert(&Value::String("hello world".into()), 1).unwrap();
        ix.delete(&Value::Null, 1);
        let (ids, _) = ranked(
            ix.select(&[Value::String("hello".into())], CondType::Match)
                .unwrap(),
        );
        assert!(ids.is_empty());
        assert_eq!(ix.unique_keys(), 0);
    }

    #[test]
    fn non_match_condition_is_rejected() {
        let ix = FullTextIndex::new();
        assert!(ix.select(&[Value::String("x".into())], CondType::Eq).is_err());
    }
}
