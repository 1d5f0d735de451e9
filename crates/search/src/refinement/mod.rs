//! Iterative query refinement
//!
//! Widens recall beyond the translated seed query:
//!
//! ```text
//! Init -> Searched(round 0) -> Refining(1) -> ... -> Refining(rounds) -> Done
//! ```
//!
//! Each refinement round shows the language model the question and a digest
//! of the previous round's results, asks for up to `fan_out` alternate
//! Boolean queries, and searches each one. At most
//! `1 + rounds * fan_out` external searches are issued per question.

use crate::dedup::MergedResultSet;
use crate::retrieval::LiteratureSearch;
use futures::future::join_all;
use paperscout_common::config::AppConfig;
use paperscout_common::context::QueryTranslator;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::DocumentRecord;
use paperscout_common::provider::{ChatProvider, ChatRequest};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a PubMed expert.";

/// Refiner progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementState {
    Init,
    /// Seed query searched
    Searched,
    /// Inside refinement round `n`, 1-based
    Refining(usize),
    Done,
}

/// One issued query and what it returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRound {
    /// 0 for the seed query
    pub round: usize,

    pub query: String,

    pub results: Vec<DocumentRecord>,

    /// Set when the search failed and was dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a refinement run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub seed_query: String,

    /// Issued queries in order: seed first, then alternates in generation order
    pub rounds: Vec<RefinementRound>,

    /// Deduplicated union of all results, first-seen order
    pub results: Vec<DocumentRecord>,

    pub searches_issued: usize,

    pub dropped_queries: usize,
}

/// Refiner knobs
#[derive(Debug, Clone)]
pub struct RefinerSettings {
    pub model: String,
    pub rounds: usize,
    pub fan_out: usize,
    /// Results shown to the model per round
    pub digest_size: usize,
    pub concurrent: bool,
    /// Per-search result cap
    pub max_results: usize,
}

impl RefinerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.refinement_model.clone(),
            rounds: config.refinement.rounds,
            fan_out: config.refinement.fan_out,
            digest_size: config.refinement.digest_size,
            concurrent: config.refinement.concurrent,
            max_results: config.pubmed.max_results,
        }
    }
}

impl Default for RefinerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Seed search plus LLM-suggested alternates
pub struct IterativeRefiner {
    translator: Arc<QueryTranslator>,
    search: Arc<dyn LiteratureSearch>,
    provider: Arc<dyn ChatProvider>,
    settings: RefinerSettings,
    list_marker: Regex,
}

impl IterativeRefiner {
    pub fn new(
        translator: Arc<QueryTranslator>,
        search: Arc<dyn LiteratureSearch>,
        provider: Arc<dyn ChatProvider>,
        settings: RefinerSettings,
    ) -> Result<Self> {
        let list_marker = Regex::new(r"^(?:[-*+•]|\d+[.)])\s+").map_err(|e| AppError::Internal {
            message: format!("Invalid list marker pattern: {}", e),
        })?;

        Ok(Self {
            translator,
            search,
            provider,
            settings,
            list_marker,
        })
    }

    pub fn settings(&self) -> &RefinerSettings {
        &self.settings
    }

    /// Run the full refinement for a question.
    ///
    /// Translation or seed search failure is fatal. Failed alternates and a
    /// failed refinement prompt only end or shrink refinement.
    pub async fn run(&self, question: &str) -> Result<RefinementOutcome> {
        let mut state = RefinementState::Init;
        debug!(?state, "Refinement started");

        let seed_query = self.translator.translate(question).await?;
        let seed_results = self.search.search(&seed_query, self.settings.max_results).await?;

        let mut merged = MergedResultSet::new();
        merged.extend(seed_results.iter().cloned());

        let mut issued: HashSet<String> = HashSet::from([query_key(&seed_query)]);
        let mut rounds = vec![RefinementRound {
            round: 0,
            query: seed_query.clone(),
            results: seed_results.clone(),
            error: None,
        }];
        let mut searches_issued = 1;
        let mut dropped_queries = 0;

        state = RefinementState::Searched;
        info!(
            ?state,
            query = %seed_query,
            results = seed_results.len(),
            source = self.search.name(),
            "Seed search complete"
        );

        let mut digest_source = seed_results;

        for round in 1..=self.settings.rounds {
            state = RefinementState::Refining(round);
            debug!(?state, "Requesting alternate queries");

            let alternates = match self.suggest(question, &digest_source, &issued).await {
                Ok(alternates) => alternates,
                Err(e) => {
                    warn!(round, error = %e, "Refinement prompt failed, keeping results so far");
                    break;
                }
            };
            if alternates.is_empty() {
                debug!(round, "No usable alternate queries");
                break;
            }
            issued.extend(alternates.iter().map(|q| query_key(q)));

            let outcomes = self.search_all(&alternates).await;
            searches_issued += alternates.len();

            let mut round_results = Vec::new();
            let mut added = 0;
            for (query, outcome) in alternates.into_iter().zip(outcomes) {
                match outcome {
                    Ok(records) => {
                        info!(
                            round,
                            query = %query,
                            results = records.len(),
                            "Alternate search complete"
                        );
                        added += merged.extend(records.iter().cloned());
                        round_results.extend(records.iter().cloned());
                        rounds.push(RefinementRound {
                            round,
                            query,
                            results: records,
                            error: None,
                        });
                    }
                    Err(e) => {
                        warn!(round, query = %query, error = %e, "Alternate search dropped");
                        dropped_queries += 1;
                        rounds.push(RefinementRound {
                            round,
                            query,
                            results: Vec::new(),
                            error: Some(e.to_string()),
                        });
                    }
                }
            }

            if added == 0 {
                debug!(round, "Round found nothing new");
                break;
            }
            digest_source = round_results;
        }

        state = RefinementState::Done;
        let results = merged.into_records();
        info!(
            ?state,
            searches = searches_issued,
            dropped = dropped_queries,
            results = results.len(),
            "Refinement finished"
        );

        Ok(RefinementOutcome {
            seed_query,
            rounds,
            results,
            searches_issued,
            dropped_queries,
        })
    }

    /// Ask the model for alternates to the queries issued so far
    async fn suggest(
        &self,
        question: &str,
        results: &[DocumentRecord],
        issued: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let digest = &results[..results.len().min(self.settings.digest_size)];
        let prompt = refinement_prompt(question, digest, self.settings.fan_out);
        let request = ChatRequest::new(&self.settings.model, SYSTEM_PROMPT, prompt);
        let text = self.provider.complete(request).await?;
        Ok(self.parse_alternates(&text, issued))
    }

    /// Clean model output into at most `fan_out` new queries
    fn parse_alternates(&self, text: &str, issued: &HashSet<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        text.lines()
            .map(str::trim)
            .filter(|line| !line.starts_with("```"))
            .map(|line| self.list_marker.replace(line, "").trim().to_string())
            .filter(|query| !query.is_empty())
            .filter(|query| {
                let key = query_key(query);
                !issued.contains(&key) && seen.insert(key)
            })
            .take(self.settings.fan_out)
            .collect()
    }

    /// Search every alternate; results line up with `queries`
    async fn search_all(&self, queries: &[String]) -> Vec<Result<Vec<DocumentRecord>>> {
        let max_results = self.settings.max_results;
        if self.settings.concurrent {
            join_all(queries.iter().map(|q| self.search.search(q, max_results))).await
        } else {
            let mut outcomes = Vec::with_capacity(queries.len());
            for query in queries {
                outcomes.push(self.search.search(query, max_results).await);
            }
            outcomes
        }
    }
}

/// Identity of a query for "already issued" checks.
///
/// Only whitespace is normalized: case, quotes and punctuation change what
/// PubMed matches, so `"a AND b"` and `a and b` are distinct from `a AND b`.
fn query_key(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn refinement_prompt(question: &str, results: &[DocumentRecord], fan_out: usize) -> String {
    let summaries = results
        .iter()
        .map(|r| format!("Title: {}\nAbstract: {}", r.title, r.abstract_text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Given the research question: {}\nAnd these top PubMed results:\n{}\n\n\
         Suggest up to {} improved or alternate PubMed Boolean queries that could find \
         additional relevant papers not in the above list. Only return the Boolean queries, \
         each on its own line.",
        question, summaries, fan_out
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ScriptedSearch;
    use paperscout_common::models::Source;
    use async_trait::async_trait;
    use paperscout_common::provider::MockChatProvider;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const QUESTION: &str = "Does calcium affect cholesterol?";
    const SEED: &str = "calcium AND cholesterol";

    fn paper(id: &str, title: &str, year: &str) -> DocumentRecord {
        let abstract_text = format!("Abstract of {}", title);
        DocumentRecord::new(id, title, vec![], year, abstract_text, Source::External)
    }

    fn titles(records: &[DocumentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    /// Translator answers with SEED, refiner model answers with `alternates`
    fn refiner(
        search: Arc<ScriptedSearch>,
        refinement: MockChatProvider,
        settings: RefinerSettings,
    ) -> (IterativeRefiner, Arc<MockChatProvider>) {
        let translator = Arc::new(QueryTranslator::new(
            Arc::new(MockChatProvider::always(SEED)),
            "gpt-4",
            200,
        ));
        let provider = Arc::new(refinement);
        let refiner =
            IterativeRefiner::new(translator, search, provider.clone(), settings).unwrap();
        (refiner, provider)
    }

    #[tokio::test]
    async fn test_two_alternates_extend_seed_results_in_order() {
        let search = Arc::new(
            ScriptedSearch::new()
                .on(SEED, vec![paper("1", "Paper 1", "2023"), paper("2", "Paper 2", "2022")])
                .on("cholesterol OR lipids", vec![paper("3", "Paper 3", "2021")])
                .on("calcium metabolism", vec![paper("4", "Paper 4", "2020")]),
        );
        let (refiner, _) = refiner(
            search.clone(),
            MockChatProvider::new().reply("cholesterol OR lipids\ncalcium metabolism"),
            RefinerSettings::default(),
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(titles(&outcome.results), vec!["Paper 1", "Paper 2", "Paper 3", "Paper 4"]);
        assert_eq!(outcome.seed_query, SEED);
        assert_eq!(outcome.searches_issued, 3);
        assert_eq!(outcome.dropped_queries, 0);
        assert_eq!(search.calls(), vec![SEED, "cholesterol OR lipids", "calcium metabolism"]);
    }

    #[tokio::test]
    async fn test_duplicate_title_across_rounds_kept_once() {
        let search = Arc::new(
            ScriptedSearch::new()
                .on(SEED, vec![paper("1", "Paper X", "2023")])
                .on("alt query", vec![paper("2", "paper x", "2019")]),
        );
        let (refiner, _) =
            refiner(search, MockChatProvider::new().reply("alt query"), RefinerSettings::default());

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].title, "Paper X");
        assert_eq!(outcome.results[0].id, "1");
    }

    #[tokio::test]
    async fn test_default_settings_bound_searches_at_four() {
        let search = Arc::new(ScriptedSearch::new().on(SEED, vec![paper("1", "Seed", "2020")]));
        let (refiner, provider) = refiner(
            search.clone(),
            MockChatProvider::always("1. q one\n2) q two\n- q three\n* q four\nq five"),
            RefinerSettings::default(),
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert!(search.calls().len() <= 4);
        assert_eq!(search.calls(), vec![SEED, "q one", "q two", "q three"]);
        assert_eq!(outcome.searches_issued, 4);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_alternate_is_dropped() {
        let search = Arc::new(
            ScriptedSearch::new()
                .on(SEED, vec![paper("1", "Paper 1", "2023")])
                .failing("bad query", AppError::SourceUnavailable { message: "html".into() })
                .on("good query", vec![paper("2", "Paper 2", "2022")]),
        );
        let (refiner, _) = refiner(
            search,
            MockChatProvider::new().reply("bad query\ngood query"),
            RefinerSettings::default(),
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(titles(&outcome.results), vec!["Paper 1", "Paper 2"]);
        assert_eq!(outcome.dropped_queries, 1);
        assert!(outcome.rounds[1].error.is_some());
        assert_eq!(outcome.rounds[2].query, "good query");
    }

    #[tokio::test]
    async fn test_seed_failure_is_fatal() {
        let search = Arc::new(
            ScriptedSearch::new().failing(SEED, AppError::Network { message: "timeout".into() }),
        );
        let (refiner, provider) =
            refiner(search.clone(), MockChatProvider::always("alt"), RefinerSettings::default());

        let err = refiner.run(QUESTION).await.unwrap_err();
        assert!(matches!(err, AppError::Network { .. }));
        assert_eq!(search.calls(), vec![SEED]);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refinement_prompt_keeps_seed_results() {
        let search = Arc::new(ScriptedSearch::new().on(SEED, vec![paper("1", "Paper 1", "2023")]));
        let (refiner, _) = refiner(
            search.clone(),
            MockChatProvider::new().fail("rate limited"),
            RefinerSettings::default(),
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(titles(&outcome.results), vec!["Paper 1"]);
        assert_eq!(search.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_suggestion_ends_refinement() {
        let search = Arc::new(ScriptedSearch::new().on(SEED, vec![paper("1", "Paper 1", "2023")]));
        let (refiner, _) = refiner(
            search.clone(),
            MockChatProvider::new().reply("\n   \n```\n```\ncalcium AND cholesterol"),
            RefinerSettings::default(),
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(search.calls(), vec![SEED]);
    }

    #[tokio::test]
    async fn test_second_round_uses_previous_round_digest() {
        let search = Arc::new(
            ScriptedSearch::new()
                .on(SEED, vec![paper("1", "Seed paper", "2023")])
                .on("round one", vec![paper("2", "Round one paper", "2022")])
                .on("round two", vec![paper("3", "Round two paper", "2021")]),
        );
        let settings = RefinerSettings {
            rounds: 2,
            fan_out: 1,
            ..RefinerSettings::default()
        };
        let (refiner, provider) = refiner(
            search.clone(),
            MockChatProvider::new().reply("round one").reply("round two"),
            settings,
        );

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(
            titles(&outcome.results),
            vec!["Seed paper", "Round one paper", "Round two paper"]
        );
        assert_eq!(outcome.searches_issued, 3);

        let prompts: Vec<String> = provider
            .requests()
            .iter()
            .map(|r| r.user_prompt().to_string())
            .collect();
        assert!(prompts[0].contains("Title: Seed paper"));
        assert!(prompts[1].contains("Title: Round one paper"));
        assert!(!prompts[1].contains("Title: Seed paper"));
        assert!(prompts[1].contains("Suggest up to 1 improved"));
    }

    #[tokio::test]
    async fn test_sequential_mode_matches_concurrent_order() {
        let search = Arc::new(
            ScriptedSearch::new()
                .on(SEED, vec![])
                .on("a", vec![paper("1", "A", "2020")])
                .on("b", vec![paper("2", "B", "2020")]),
        );
        let settings = RefinerSettings {
            concurrent: false,
            ..RefinerSettings::default()
        };
        let (refiner, _) = refiner(search.clone(), MockChatProvider::new().reply("a\nb"), settings);

        let outcome = refiner.run(QUESTION).await.unwrap();
        assert_eq!(titles(&outcome.results), vec!["A", "B"]);
        assert_eq!(search.calls(), vec![SEED, "a", "b"]);
    }

    /// Wraps a scripted source, delaying chosen queries and logging completions
    struct DelayedSearch {
        inner: ScriptedSearch,
        delays: HashMap<String, Duration>,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LiteratureSearch for DelayedSearch {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<DocumentRecord>> {
            if let Some(delay) = self.delays.get(query) {
                tokio::time::sleep(*delay).await;
            }
            let result = self.inner.search(query, max_results).await;
            self.completed.lock().unwrap().push(query.to_string());
            result
        }

        fn name(&self) -> &str {
            "delayed"
        }
    }

    #[tokio::test]
    async fn test_concurrent_results_follow_generation_order_not_completion() {
        let search = Arc::new(DelayedSearch {
            inner: ScriptedSearch::new()
                .on(SEED, vec![paper("1", "Seed", "2023")])
                .on(
                    "slow query",
                    vec![paper("2", "Slow paper", "2022"), paper("3", "Shared", "2022")],
                )
                .on(
                    "fast query",
                    vec![paper("4", "Fast paper", "2021"), paper("5", "shared", "2021")],
                ),
            delays: HashMap::from([("slow query".to_string(), Duration::from_millis(50))]),
            completed: Mutex::new(Vec::new()),
        });
        let translator = Arc::new(QueryTranslator::new(
            Arc::new(MockChatProvider::always(SEED)),
            "gpt-4",
            200,
        ));
        let settings = RefinerSettings {
            concurrent: true,
            ..RefinerSettings::default()
        };
        let refiner = IterativeRefiner::new(
            translator,
            search.clone(),
            Arc::new(MockChatProvider::new().reply("slow query\nfast query")),
            settings,
        )
        .unwrap();

        let outcome = refiner.run(QUESTION).await.unwrap();

        let completed = search.completed.lock().unwrap().clone();
        assert_eq!(completed, vec![SEED, "fast query", "slow query"]);

        assert_eq!(
            titles(&outcome.results),
            vec!["Seed", "Slow paper", "Shared", "Fast paper"]
        );
        assert_eq!(outcome.results[2].id, "3");
        let queries: Vec<&str> = outcome.rounds.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec![SEED, "slow query", "fast query"]);
    }

    #[tokio::test]
    async fn test_case_and_quoting_make_distinct_queries() {
        let search = Arc::new(ScriptedSearch::new().on(SEED, vec![paper("1", "Seed", "2023")]));
        let (refiner, _) = refiner(
            search.clone(),
            MockChatProvider::new().reply(
                "\"calcium AND cholesterol\"\n\
                 calcium and cholesterol\n\
                 calcium   AND  cholesterol",
            ),
            RefinerSettings::default(),
        );

        refiner.run(QUESTION).await.unwrap();
        assert_eq!(
            search.calls(),
            vec![SEED, "\"calcium AND cholesterol\"", "calcium and cholesterol"]
        );
    }

    #[test]
    fn test_query_key_only_collapses_whitespace() {
        assert_eq!(query_key("  a   AND\tb "), "a AND b");
        assert_ne!(query_key("a AND b"), query_key("a and b"));
        assert_ne!(query_key("a AND b"), query_key("\"a AND b\""));
    }

    #[test]
    fn test_refinement_prompt_digest() {
        let prompt = refinement_prompt(QUESTION, &[paper("1", "Paper 1", "2023")], 3);
        assert!(prompt.starts_with(
            "Given the research question: Does calcium affect cholesterol?\n"
        ));
        assert!(prompt.contains("Title: Paper 1\nAbstract: Abstract of Paper 1"));
        assert!(prompt.contains("Suggest up to 3 improved or alternate PubMed Boolean queries"));
    }
}
