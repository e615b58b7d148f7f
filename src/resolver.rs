//! Tiered question resolution
//!
//! A question walks an explicit state machine: exact cache lookup, then
//! vector similarity with thresholds, then heuristic disambiguation between
//! close candidates, then a lexical full scan, and only as a last resort a
//! fresh model generation whose result is validated before it may enter the
//! cache. Cheap, high-precision tiers always run before expensive ones.

use crate::catalog::{QueryCatalog, CATALOG_COLLECTION};
use crate::disambiguate::{self, QueryCandidate};
use crate::error::Result;
use crate::executor::SqlProbe;
use crate::intent::{self, AgentKind, StructuredIntent};
use crate::join_graph::BUSINESS_GRAPH;
use crate::llm::IntentGenerator;
use crate::validator::{self, Validation};
use crate::vector_store::{StoredDocument, VectorStore};
use crate::{normalize, prompts, repair, scoring, synthesizer};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collection journaling every answered question.
pub const PROMPT_COLLECTION: &str = "user_prompts";

/// Cache ids minted for model-generated entries, as opposed to curated
/// catalog ids.
pub const LEARNED_ID_PREFIX: &str = "model_";

const TOP_K: usize = 3;
const TOMORROW_BOOST: f64 = 0.9;

/// Which tier produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedSource {
    Exact,
    Threshold,
    Disambiguated,
    Generated,
}

impl ResolvedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedSource::Exact => "exact",
            ResolvedSource::Threshold => "threshold",
            ResolvedSource::Disambiguated => "disambiguated",
            ResolvedSource::Generated => "generated",
        }
    }
}

impl fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAnswer {
    pub final_query: String,
    pub intent: StructuredIntent,
    pub source: ResolvedSource,
    pub confidence: f64,
    /// False when the validator rejected a generated intent; the answer is
    /// still returned best-effort but was not cached.
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    /// Placeholder names the caller must supply before execution.
    pub required_parameters: Vec<String>,
}

/// Tier thresholds. Values mirror the resolution contract: exact hits need
/// 0.85, a lone vector match 0.8, disambiguation runs from 0.75 with a gap
/// under 0.1, and the lexical scan accepts above 0.65.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub exact: f64,
    pub accept: f64,
    pub disambiguate: f64,
    pub gap: f64,
    pub lexical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            exact: 0.85,
            accept: 0.8,
            disambiguate: 0.75,
            gap: 0.1,
            lexical: 0.65,
        }
    }
}

enum ResolutionState {
    ExactLookup,
    ThresholdMatch,
    Disambiguate(Vec<QueryCandidate>),
    GenerateFresh,
    Validate(StructuredIntent),
    PersistOrReject(StructuredIntent, Validation),
    Resolved(ResolvedAnswer),
}

pub struct Resolver {
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn IntentGenerator>,
    probe: Option<Arc<dyn SqlProbe>>,
    catalog: Arc<QueryCatalog>,
    thresholds: Thresholds,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn IntentGenerator>,
        catalog: Arc<QueryCatalog>,
    ) -> Self {
        Self {
            store,
            generator,
            probe: None,
            catalog,
            thresholds: Thresholds::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn SqlProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Load the curated catalog into the cache collection. Safe to call on
    /// every start; already-seeded entries are skipped.
    pub async fn seed_catalog(&self) -> Result<usize> {
        self.catalog
            .seed(self.store.as_ref(), CATALOG_COLLECTION)
            .await
    }

    /// Resolve one question through the tier pipeline.
    pub async fn resolve(&self, question: &str) -> Result<ResolvedAnswer> {
        normalize::validate_question(question)?;
        let trace = Uuid::new_v4();
        info!(%trace, question, "resolving question");

        let mut state = ResolutionState::ExactLookup;
        loop {
            state = match state {
                ResolutionState::ExactLookup => self.exact_lookup(question).await?,
                ResolutionState::ThresholdMatch => self.threshold_match(question).await?,
                ResolutionState::Disambiguate(candidates) => {
                    self.disambiguate_candidates(question, candidates).await?
                }
                ResolutionState::GenerateFresh => self.generate_fresh(question).await?,
                ResolutionState::Validate(intent) => self.validate(intent),
                ResolutionState::PersistOrReject(intent, validation) => {
                    self.persist(question, intent, validation).await?
                }
                ResolutionState::Resolved(answer) => {
                    info!(
                        %trace,
                        source = %answer.source,
                        confidence = answer.confidence,
                        "question resolved"
                    );
                    return Ok(answer);
                }
            };
        }
    }

    /// Near-exact scan over the stored questions. Pure lexical comparison,
    /// so a case or accent variant of a known question never costs a vector
    /// query or a model call.
    async fn exact_lookup(&self, question: &str) -> Result<ResolutionState> {
        let all = match self.store.get_all(CATALOG_COLLECTION).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "vector store unavailable for exact lookup");
                return Ok(ResolutionState::ThresholdMatch);
            }
        };

        let mut best: Option<(usize, f64)> = None;
        for (i, document) in all.documents.iter().enumerate() {
            let score = scoring::exact_match_score(question, document);
            if score >= self.thresholds.exact && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((i, score)) = best else {
            return Ok(ResolutionState::ThresholdMatch);
        };
        let metadata = all.metadatas.get(i).cloned().unwrap_or(Value::Null);
        info!(id = %all.ids[i], similarity = score, "exact cache hit");
        let candidate = candidate_from(&all.ids[i], &all.documents[i], &metadata, score);
        self.finish_cache_hit(
            question,
            candidate,
            ResolvedSource::Exact,
            ResolutionState::ThresholdMatch,
        )
        .await
    }

    async fn threshold_match(&self, question: &str) -> Result<ResolutionState> {
        let hits = match self.store.query(CATALOG_COLLECTION, question, TOP_K).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "similarity backend unavailable, falling back to lexical scan");
                return self.lexical_scan(question).await;
            }
        };
        let Some(distances) = hits.distances.clone() else {
            return self.lexical_scan(question).await;
        };
        if hits.is_empty() {
            debug!("no vector neighbours, falling back to lexical scan");
            return self.lexical_scan(question).await;
        }

        let mut candidates = Vec::with_capacity(hits.len());
        for (i, id) in hits.ids.iter().enumerate() {
            let (Some(document), Some(distance)) = (hits.documents.get(i), distances.get(i))
            else {
                continue;
            };
            let metadata = hits.metadatas.get(i).cloned().unwrap_or(Value::Null);
            let similarity = scoring::distance_to_similarity(*distance);
            candidates.push(candidate_from(id, document, &metadata, similarity));
        }
        if candidates.is_empty() {
            return self.lexical_scan(question).await;
        }

        if candidates[0].similarity >= self.thresholds.accept {
            info!(
                id = %candidates[0].id,
                similarity = candidates[0].similarity,
                "vector match above acceptance threshold"
            );
            let best = candidates.swap_remove(0);
            return self
                .finish_cache_hit(
                    question,
                    best,
                    ResolvedSource::Threshold,
                    ResolutionState::GenerateFresh,
                )
                .await;
        }

        if candidates.len() >= 2
            && candidates[0].similarity - candidates[1].similarity < self.thresholds.gap
            && candidates[0].similarity >= self.thresholds.disambiguate
        {
            debug!(
                best = candidates[0].similarity,
                runner_up = candidates[1].similarity,
                "close candidates, disambiguating"
            );
            return Ok(ResolutionState::Disambiguate(candidates));
        }

        self.lexical_scan(question).await
    }

    async fn disambiguate_candidates(
        &self,
        question: &str,
        candidates: Vec<QueryCandidate>,
    ) -> Result<ResolutionState> {
        match disambiguate::disambiguate(question, candidates) {
            Some(winner) => {
                info!(id = %winner.id, score = winner.score, "disambiguation picked a candidate");
                self.finish_cache_hit(
                    question,
                    winner,
                    ResolvedSource::Disambiguated,
                    ResolutionState::GenerateFresh,
                )
                .await
            }
            None => Ok(ResolutionState::GenerateFresh),
        }
    }

    /// Full lexical scan over the cache, the fallback when the vector tiers
    /// produced nothing usable. Catches shorthand variants ("quel chantier
    /// dem ?") that embed poorly.
    async fn lexical_scan(&self, question: &str) -> Result<ResolutionState> {
        let all = match self.store.get_all(CATALOG_COLLECTION).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "cache scan impossible, generating fresh");
                return Ok(ResolutionState::GenerateFresh);
            }
        };
        if all.is_empty() {
            return Ok(ResolutionState::GenerateFresh);
        }
        debug!(entries = all.len(), "scanning cache lexically");

        let asks_tomorrow = wants_tomorrow(question);
        let mut best: Option<QueryCandidate> = None;
        for (i, id) in all.ids.iter().enumerate() {
            let Some(document) = all.documents.get(i) else {
                continue;
            };
            let metadata = all.metadatas.get(i).cloned().unwrap_or(Value::Null);
            let stored_question = metadata
                .get("question")
                .and_then(|v| v.as_str())
                .unwrap_or(document);

            let mut similarity = scoring::combined_similarity(question, stored_question);
            // A "demain" question matching the dedicated tomorrow-schedule
            // entry is almost certainly what the user meant.
            if asks_tomorrow && id_suggests_tomorrow(id) {
                similarity = similarity.max(TOMORROW_BOOST);
            }

            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(candidate_from(id, stored_question, &metadata, similarity));
            }
        }

        match best {
            Some(candidate) if candidate.similarity > self.thresholds.lexical => {
                info!(
                    id = %candidate.id,
                    similarity = candidate.similarity,
                    "lexical scan matched a stored question"
                );
                self.finish_cache_hit(
                    question,
                    candidate,
                    ResolvedSource::Threshold,
                    ResolutionState::GenerateFresh,
                )
                .await
            }
            _ => Ok(ResolutionState::GenerateFresh),
        }
    }

    async fn generate_fresh(&self, question: &str) -> Result<ResolutionState> {
        info!("no cache tier matched, generating a fresh intent");
        let prompt = prompts::analysis_prompt(question)?;
        let raw = self.generator.generate(&prompt).await?;
        let mut intent = intent::parse_model_response(question, &raw)?;

        if intent.agent == AgentKind::QueryBuilder {
            let query = synthesizer::synthesize(&intent, &BUSINESS_GRAPH);
            intent.final_query = if query.is_empty() { None } else { Some(query) };
        }
        Ok(ResolutionState::Validate(intent))
    }

    fn validate(&self, intent: StructuredIntent) -> ResolutionState {
        let validation = validator::validate_intent(&intent);
        if validation.valid {
            ResolutionState::PersistOrReject(intent, validation)
        } else {
            warn!(
                confidence = validation.confidence,
                "low-confidence answer, returned unvalidated and not cached"
            );
            ResolutionState::Resolved(answer_from_generation(intent, validation, false))
        }
    }

    async fn persist(
        &self,
        question: &str,
        intent: StructuredIntent,
        validation: Validation,
    ) -> Result<ResolutionState> {
        let cacheable = intent.agent == AgentKind::QueryBuilder
            && intent.final_query.as_deref().map_or(false, |q| !q.is_empty());

        if cacheable {
            let id = learned_id(question);
            let metadata = json!({
                "question": question,
                "questionReformulated": intent.reformulated_question,
                "finalQuery": intent.final_query,
                "agent": intent.agent.as_str(),
                "confidence": validation.confidence,
                "timestamp": Utc::now().to_rfc3339(),
            });
            match self
                .store
                .upsert(
                    CATALOG_COLLECTION,
                    vec![StoredDocument::new(&id, question, metadata)],
                )
                .await
            {
                Ok(()) => info!(%id, "resolved query cached"),
                Err(e) => warn!(error = %e, "failed to cache resolved query"),
            }
        }

        let journal = json!({
            "confidenceScore": validation.confidence,
            "agent": intent.agent.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        let journal_doc = StoredDocument::new(&Uuid::new_v4().to_string(), question, journal);
        if let Err(e) = self.store.upsert(PROMPT_COLLECTION, vec![journal_doc]).await {
            warn!(error = %e, "failed to journal the question");
        }

        Ok(ResolutionState::Resolved(answer_from_generation(
            intent, validation, true,
        )))
    }

    /// Finalize a cache hit: repair status references, probe executability
    /// when a probe is wired, and drop stale entries that no longer plan.
    async fn finish_cache_hit(
        &self,
        question: &str,
        candidate: QueryCandidate,
        source: ResolvedSource,
        fallback: ResolutionState,
    ) -> Result<ResolutionState> {
        let repaired = repair::correct_status_references(&candidate.final_query);

        if !self.probe_ok(&repaired).await? {
            warn!(id = %candidate.id, "cached query no longer plans, dropping entry");
            if let Err(e) = self
                .store
                .delete(CATALOG_COLLECTION, &[candidate.id.clone()])
                .await
            {
                warn!(error = %e, "failed to drop stale cache entry");
            }
            return Ok(fallback);
        }

        let mut intent = StructuredIntent::new(question, AgentKind::QueryBuilder);
        intent.reformulated_question = if candidate.description.is_empty() {
            candidate.question.clone()
        } else {
            candidate.description.clone()
        };
        intent.final_query = Some(repaired.clone());

        let required_parameters = repair::required_parameters(&repaired);
        Ok(ResolutionState::Resolved(ResolvedAnswer {
            final_query: repaired,
            intent,
            source,
            confidence: candidate.similarity,
            validated: true,
            similarity: Some(candidate.similarity),
            matched_id: Some(candidate.id),
            required_parameters,
        }))
    }

    async fn probe_ok(&self, query: &str) -> Result<bool> {
        let Some(probe) = &self.probe else {
            return Ok(true);
        };
        // Parameterized queries cannot be planned until the caller fills
        // the placeholders in.
        if query.is_empty() || !repair::required_parameters(query).is_empty() {
            return Ok(true);
        }
        probe.explain(query).await
    }

    /// Drop journal entries and learned cache entries older than `max_age`.
    /// Curated catalog entries are never pruned.
    pub async fn prune_cache(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for collection in [PROMPT_COLLECTION, CATALOG_COLLECTION] {
            let all = self.store.get_all(collection).await?;
            let stale: Vec<String> = all
                .ids
                .iter()
                .zip(&all.metadatas)
                .filter(|(id, metadata)| {
                    if collection == CATALOG_COLLECTION && !id.starts_with(LEARNED_ID_PREFIX) {
                        return false;
                    }
                    entry_timestamp(metadata).map_or(false, |ts| ts < cutoff)
                })
                .map(|(id, _)| id.clone())
                .collect();

            if !stale.is_empty() {
                self.store.delete(collection, &stale).await?;
                removed += stale.len();
            }
        }

        info!(removed, "cache pruned");
        Ok(removed)
    }
}

fn entry_timestamp(metadata: &Value) -> Option<DateTime<Utc>> {
    let raw = metadata.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn candidate_from(id: &str, document: &str, metadata: &Value, similarity: f64) -> QueryCandidate {
    let final_query = metadata
        .get("finalQuery")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let mut candidate = QueryCandidate::new(id, document, final_query, similarity);
    if let Some(description) = metadata.get("questionReformulated").and_then(|v| v.as_str()) {
        candidate.description = description.to_string();
    }
    candidate
}

fn answer_from_generation(
    intent: StructuredIntent,
    validation: Validation,
    validated: bool,
) -> ResolvedAnswer {
    let final_query = intent.final_query.clone().unwrap_or_default();
    let required_parameters = repair::required_parameters(&final_query);
    ResolvedAnswer {
        final_query,
        intent,
        source: ResolvedSource::Generated,
        confidence: validation.confidence,
        validated,
        similarity: None,
        matched_id: None,
        required_parameters,
    }
}

/// Deterministic id for a learned cache entry, so re-answering the same
/// question overwrites instead of duplicating.
pub fn learned_id(question: &str) -> String {
    let digest = Sha256::digest(question.as_bytes());
    let mut id = String::from(LEARNED_ID_PREFIX);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

fn wants_tomorrow(question: &str) -> bool {
    normalize::normalize(question)
        .split_whitespace()
        .any(|word| word == "demain")
}

fn id_suggests_tomorrow(id: &str) -> bool {
    id.contains("tomorrow")
}
