use std::collections::HashMap;
use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lowercase alphanumeric words longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// BM25 inverted index over record ids.
///
/// Scores use Robertson's non-negative IDF:
/// `idf = ln((N - df + 0.5) / (df + 0.5) + 1)` and the usual length
/// normalisation with `k1 = 1.2`, `b = 0.75`.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    /// term -> (record id -> occurrences)
    postings: HashMap<String, HashMap<Uuid, u32>>,
    /// record id -> token count
    lengths: HashMap<Uuid, usize>,
    total_tokens: usize,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `text` under `id`, replacing any previous text for that id.
    pub fn insert(&mut self, id: Uuid, text: &str) {
        self.remove(id);

        let tokens = tokenize(text);
        self.total_tokens += tokens.len();
        self.lengths.insert(id, tokens.len());
        for token in tokens {
            *self.postings.entry(token).or_default().entry(id).or_insert(0) += 1;
        }
    }

    /// Drop `id` from the index. Returns whether it was present.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(len) = self.lengths.remove(&id) else {
            return false;
        };
        self.total_tokens = self.total_tokens.saturating_sub(len);
        self.postings.retain(|_, docs| {
            docs.remove(&id);
            !docs.is_empty()
        });
        true
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Up to `limit` `(id, score)` pairs with a positive score, best first.
    /// Ties keep no particular order.
    pub fn rank(&self, query: &str, limit: usize) -> Vec<(Uuid, f32)> {
        if self.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n = self.len() as f32;
        let avg_len = (self.total_tokens as f32 / n).max(1.0);

        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for term in &query_terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (id, &count) in docs {
                let tf = count as f32;
                let len = self.lengths.get(id).copied().unwrap_or(0) as f32;
                let norm = tf + K1 * (1.0 - B + B * len / avg_len);
                *scores.entry(*id).or_insert(0.0) += idf * tf * (K1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_single_chars_and_punctuation() {
        let tokens = tokenize("Deploy a K8s cluster, then scale!");
        assert_eq!(tokens, vec!["deploy", "k8s", "cluster", "then", "scale"]);
    }

    #[test]
    fn test_rank_prefers_more_matching_terms() {
        let mut index = KeywordIndex::new();
        let web = Uuid::new_v4();
        let db = Uuid::new_v4();
        let lunch = Uuid::new_v4();
        index.insert(web, "deploy web app to prod cluster");
        index.insert(db, "deploy postgres database");
        index.insert(lunch, "order lunch for the team");

        let ranked = index.rank("deploy web app", 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, web);
        assert_eq!(ranked[1].0, db);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn test_reinsert_replaces_text() {
        let mut index = KeywordIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, "monitor costs");
        index.insert(id, "rotate certificates");

        assert_eq!(index.len(), 1);
        assert!(index.rank("costs", 5).is_empty());
        assert_eq!(index.rank("certificates", 5)[0].0, id);
    }

    #[test]
    fn test_remove() {
        let mut index = KeywordIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, "backup storage account");
        assert!(index.remove(id));
        assert!(!index.remove(id));
        assert!(index.is_empty());
        assert!(index.rank("backup", 5).is_empty());
    }

    #[test]
    fn test_rank_respects_limit() {
        let mut index = KeywordIndex::new();
        for i in 0..6 {
            index.insert(Uuid::new_v4(), &format!("deploy service number{i}"));
        }
        assert_eq!(index.rank("deploy", 3).len(), 3);
        assert!(index.rank("deploy", 0).is_empty());
    }
}
