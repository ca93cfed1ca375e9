//! In-process NLP scoring: a naive-Bayes model trained from the category
//! keyword samples at config load, plus TF-IDF over category keywords with
//! a bounded document corpus.

use std::{collections::VecDeque, sync::Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

use super::classifier::ServiceScores;
use crate::{config::routing::RoutingConfig, types::service::ServiceName};

/// Most recent documents retained for idf counts.
const CORPUS_CAPACITY: usize = 512;
const MIN_TOKEN_LEN: usize = 2;

pub struct NlpModel {
    categories: Vec<CategoryProfile>,
    vocab_size: usize,
    corpus: Mutex<TfIdfCorpus>,
}

struct CategoryProfile {
    target: ServiceName,
    keyword_tokens: Vec<String>,
    token_counts: FxHashMap<String, usize>,
    total_tokens: usize,
}

impl NlpModel {
    #[must_use]
    pub fn train(config: &RoutingConfig) -> Self {
        let mut vocab = FxHashSet::default();
        let mut categories = Vec::new();
        let mut corpus = TfIdfCorpus::default();
        for (name, category) in &config.intent_categories {
            let mut token_counts: FxHashMap<String, usize> =
                FxHashMap::default();
            let mut keyword_tokens = Vec::new();
            for keyword in &category.keywords {
                for token in tokenize(keyword) {
                    vocab.insert(token.clone());
                    *token_counts.entry(token.clone()).or_default() += 1;
                    keyword_tokens.push(token);
                }
            }
            for token in tokenize(name) {
                vocab.insert(token.clone());
                *token_counts.entry(token).or_default() += 1;
            }
            let total_tokens = token_counts.values().sum();
            // Keyword lists double as seed documents so idf has signal
            // before live traffic arrives.
            corpus.push(keyword_tokens.iter().cloned().collect());
            categories.push(CategoryProfile {
                target: category.target_service.clone(),
                keyword_tokens,
                token_counts,
                total_tokens,
            });
        }
        Self {
            categories,
            vocab_size: vocab.len().max(1),
            corpus: Mutex::new(corpus),
        }
    }

    /// Score `text` against every category, mapping the winner of the two
    /// signals (Bayes posterior, TF-IDF keyword sum) onto target services.
    #[must_use]
    pub fn score(&self, text: &str) -> ServiceScores {
        let tokens = tokenize(text);
        let mut scores = ServiceScores::new();
        if tokens.is_empty() || self.categories.is_empty() {
            return scores;
        }

        let posteriors = self.bayes_posteriors(&tokens);
        let tfidf = self.tfidf_scores(&tokens);

        for (index, category) in self.categories.iter().enumerate() {
            let fused = posteriors[index].max(tfidf[index]);
            if fused <= 0.0 {
                continue;
            }
            let entry =
                scores.entry(category.target.clone()).or_insert(0.0);
            *entry = entry.max(fused);
        }
        scores
    }

    fn bayes_posteriors(&self, tokens: &[String]) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let vocab = self.vocab_size as f64;
        let log_likelihoods: Vec<f64> = self
            .categories
            .iter()
            .map(|category| {
                #[allow(clippy::cast_precision_loss)]
                let denominator = category.total_tokens as f64 + vocab;
                tokens
                    .iter()
                    .map(|token| {
                        #[allow(clippy::cast_precision_loss)]
                        let count = category
                            .token_counts
                            .get(token)
                            .copied()
                            .unwrap_or(0)
                            as f64;
                        ((count + 1.0) / denominator).ln()
                    })
                    .sum()
            })
            .collect();
        // Uniform priors; softmax normalizes into [0, 1].
        let max = log_likelihoods
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = log_likelihoods
            .iter()
            .map(|ll| (ll - max).exp())
            .collect();
        let sum: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / sum).collect()
    }

    fn tfidf_scores(&self, tokens: &[String]) -> Vec<f64> {
        let mut corpus = self
            .corpus
            .lock()
            .expect("corpus lock never poisoned");
        corpus.push(tokens.iter().cloned().collect());

        let mut term_frequency: FxHashMap<&str, f64> = FxHashMap::default();
        #[allow(clippy::cast_precision_loss)]
        let token_count = tokens.len() as f64;
        for token in tokens {
            *term_frequency.entry(token.as_str()).or_default() +=
                1.0 / token_count;
        }

        self.categories
            .iter()
            .map(|category| {
                if category.keyword_tokens.is_empty() {
                    return 0.0;
                }
                let sum: f64 = category
                    .keyword_tokens
                    .iter()
                    .map(|keyword| {
                        term_frequency
                            .get(keyword.as_str())
                            .map_or(0.0, |tf| tf * corpus.idf(keyword))
                    })
                    .sum();
                #[allow(clippy::cast_precision_loss)]
                let normalized =
                    sum / category.keyword_tokens.len() as f64;
                normalized.min(1.0)
            })
            .collect()
    }

    /// Documents currently retained for idf, for observability and tests.
    #[must_use]
    pub fn corpus_len(&self) -> usize {
        self.corpus
            .lock()
            .expect("corpus lock never poisoned")
            .documents
            .len()
    }
}

#[derive(Default)]
struct TfIdfCorpus {
    documents: VecDeque<FxHashSet<String>>,
    document_frequency: FxHashMap<String, usize>,
}

impl TfIdfCorpus {
    fn push(&mut self, document: FxHashSet<String>) {
        for token in &document {
            *self
                .document_frequency
                .entry(token.clone())
                .or_default() += 1;
        }
        self.documents.push_back(document);
        while self.documents.len() > CORPUS_CAPACITY {
            let Some(evicted) = self.documents.pop_front() else {
                break;
            };
            for token in &evicted {
                if let Some(count) =
                    self.document_frequency.get_mut(token)
                {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.document_frequency.remove(token);
                    }
                }
            }
        }
    }

    fn idf(&self, token: &str) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let documents = self.documents.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let frequency = self
            .document_frequency
            .get(token)
            .copied()
            .unwrap_or(0) as f64;
        (1.0 + documents / (1.0 + frequency)).ln()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= MIN_TOKEN_LEN)
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::service::ServiceName;

    fn model() -> NlpModel {
        NlpModel::train(&RoutingConfig::default())
    }

    #[test]
    fn password_text_scores_the_auth_target() {
        let scores =
            model().score("I forgot my password and need to reset it");
        let auth = scores
            .get(&ServiceName::from("user-authentication-service"))
            .copied()
            .unwrap_or(0.0);
        for (service, score) in &scores {
            assert!(
                auth >= *score,
                "expected auth to win, {service} scored {score}"
            );
        }
        assert!(auth > 0.0);
    }

    #[test]
    fn scores_stay_in_bounds() {
        let scores = model().score(
            "charge payment billing invoice refund card transaction payment",
        );
        for score in scores.values() {
            assert!((0.0..=1.0).contains(score));
        }
    }

    #[test]
    fn corpus_is_bounded() {
        let model = model();
        for i in 0..(CORPUS_CAPACITY * 2) {
            let _ = model.score(&format!("document number {i} search"));
        }
        assert!(model.corpus_len() <= CORPUS_CAPACITY);
    }

    #[test]
    fn empty_text_scores_nothing() {
        assert!(model().score("   ").is_empty());
    }
}
