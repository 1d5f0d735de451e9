//! Research pipeline
//!
//! question -> { library search || translate + PubMed refinement }
//!          -> context budget -> synthesis -> answer with citations

use paperscout_common::config::AppConfig;
use paperscout_common::context::{BudgetSummary, ContextBudget, QueryTranslator, Synthesizer};
use paperscout_common::embeddings::{Embedder, OpenAIEmbedder};
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::DocumentRecord;
use paperscout_common::provider::OpenAIClient;
use paperscout_common::tokens::TokenCounter;
use paperscout_search::refinement::{IterativeRefiner, RefinementRound, RefinerSettings};
use paperscout_search::retrieval::pubmed::{PubMedClient, ReqwestTransport};
use paperscout_search::retrieval::LocalLibrary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Per-query summary of the refinement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    pub query: String,
    pub results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RefinementRound> for RoundSummary {
    fn from(round: &RefinementRound) -> Self {
        Self {
            round: round.round,
            query: round.query.clone(),
            results: round.results.len(),
            error: round.error.clone(),
        }
    }
}

/// Final answer and the evidence behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchAnswer {
    pub run_id: Uuid,
    pub question: String,
    pub seed_query: String,
    pub answer: String,

    /// Library records, nearest first
    pub local: Vec<DocumentRecord>,

    /// Deduplicated PubMed records, first-seen order
    pub external: Vec<DocumentRecord>,

    /// PubMed records whose title is not in the library
    pub not_in_library: Vec<DocumentRecord>,

    pub rounds: Vec<RoundSummary>,

    pub context: BudgetSummary,
}

/// Wires every stage together for one question at a time
pub struct ResearchPipeline {
    library: LocalLibrary,
    refiner: IterativeRefiner,
    synthesizer: Synthesizer,
    budget: ContextBudget,
    local_k: usize,
}

impl ResearchPipeline {
    pub fn new(
        library: LocalLibrary,
        refiner: IterativeRefiner,
        synthesizer: Synthesizer,
        budget: ContextBudget,
        local_k: usize,
    ) -> Self {
        Self {
            library,
            refiner,
            synthesizer,
            budget,
            local_k,
        }
    }

    /// Build every component from configuration.
    ///
    /// One provider client is shared by the embedder, translator, refiner
    /// and synthesizer.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = Arc::new(OpenAIClient::from_config(config)?);
        let tokens = TokenCounter::new()?;

        let embedder: Arc<dyn Embedder> =
            Arc::new(OpenAIEmbedder::new(client.clone(), tokens.clone(), &config.embedding));
        let library = LocalLibrary::open(&config.library, embedder)?;

        let transport = Arc::new(ReqwestTransport::from_config(config)?);
        let pubmed = Arc::new(PubMedClient::new(transport, &config.pubmed));

        let translator = Arc::new(QueryTranslator::from_config(client.clone(), &config.llm)?);
        let refiner = IterativeRefiner::new(
            translator,
            pubmed,
            client.clone(),
            RefinerSettings::from_config(config),
        )?;

        let synthesizer = Synthesizer::from_config(client, &config.llm);
        let budget = ContextBudget::from_config(tokens, &config.synthesis);

        Ok(Self::new(library, refiner, synthesizer, budget, config.library.top_k))
    }

    /// Answer one question.
    ///
    /// Library search and PubMed refinement run concurrently; either
    /// failing aborts the question, as does synthesis failure.
    pub async fn answer(&self, question: &str) -> Result<ResearchAnswer> {
        let run_id = Uuid::new_v4();
        let span = info_span!("question", %run_id);

        async {
            info!(question, "Research question received");

            let (local, outcome) = tokio::join!(
                self.library.search(question, self.local_k),
                self.refiner.run(question)
            );
            let local = local?;
            let outcome = outcome?;

            let context = self.budget.apply(&local, &outcome.results);
            let answer = self
                .synthesizer
                .synthesize(question, &context.local, &context.external)
                .await?;

            let index = self.library.index();
            let not_in_library = outcome
                .results
                .iter()
                .filter(|r| r.has_title() && !index.contains_title(&r.title))
                .cloned()
                .collect::<Vec<_>>();

            info!(
                local = local.len(),
                external = outcome.results.len(),
                not_in_library = not_in_library.len(),
                dropped_context = context.dropped,
                "Question answered"
            );

            Ok::<_, AppError>(ResearchAnswer {
                run_id,
                question: question.to_string(),
                seed_query: outcome.seed_query.clone(),
                answer,
                rounds: outcome.rounds.iter().map(RoundSummary::from).collect(),
                context: context.summary(),
                local,
                external: outcome.results,
                not_in_library,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::embeddings::MockEmbedder;
    use paperscout_common::models::Source;
    use paperscout_common::provider::MockChatProvider;
    use paperscout_common::context::SynthesisOptions;
    use paperscout_search::retrieval::{ScriptedSearch, VectorIndex};
    use tokio_test::{assert_err, assert_ok};

    const SEED: &str = "calcium AND cholesterol";

    fn external(id: &str, title: &str) -> DocumentRecord {
        DocumentRecord::new(id, title, vec!["Jane Smith".into()], "2022", "PubMed abstract.", Source::External)
    }

    async fn library(titles: &[&str]) -> LocalLibrary {
        let embedder = Arc::new(MockEmbedder::new(8));
        let mut vectors = Vec::new();
        let mut records = Vec::new();
        for (i, title) in titles.iter().enumerate() {
            vectors.push(embedder.embed(title).await.unwrap());
            records.push(DocumentRecord::new(format!("key{}", i), *title, vec![], "2019", "", Source::Local));
        }
        let index = VectorIndex::from_parts(8, vectors, records).unwrap();
        LocalLibrary::new(embedder, Arc::new(index)).unwrap()
    }

    async fn pipeline(
        search: ScriptedSearch,
        refinement: MockChatProvider,
        synthesis: Arc<MockChatProvider>,
    ) -> ResearchPipeline {
        let translator = Arc::new(QueryTranslator::new(Arc::new(MockChatProvider::always(SEED)), "gpt-4", 200));
        let refiner = IterativeRefiner::new(
            translator,
            Arc::new(search),
            Arc::new(refinement),
            RefinerSettings::default(),
        )
        .unwrap();
        let synthesizer = Synthesizer::new(synthesis, "gpt-4", SynthesisOptions::default());
        let budget = ContextBudget::new(TokenCounter::new().unwrap(), 12_000, 1_000);

        ResearchPipeline::new(
            library(&["Calcium and cholesterol in adults", "Statin myopathy"]).await,
            refiner,
            synthesizer,
            budget,
            2,
        )
    }

    #[tokio::test]
    async fn test_answer_combines_both_sources() {
        let search = ScriptedSearch::new()
            .on(SEED, vec![external("1", "Calcium and cholesterol in adults"), external("2", "Paper 2")])
            .on("lipids AND calcium", vec![external("3", "Paper 3")]);
        let synthesis = Arc::new(MockChatProvider::new().reply("Calcium lowers LDL modestly."));

        let pipeline = pipeline(search, MockChatProvider::new().reply("lipids AND calcium"), synthesis.clone()).await;
        let answer = assert_ok!(pipeline.answer("Does calcium affect cholesterol?").await);

        assert_eq!(answer.answer, "Calcium lowers LDL modestly.");
        assert_eq!(answer.seed_query, SEED);
        assert_eq!(answer.local.len(), 2);
        assert_eq!(answer.external.len(), 3);
        assert_eq!(answer.rounds.len(), 2);
        assert_eq!(answer.context.dropped, 0);

        let missing: Vec<_> = answer.not_in_library.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(missing, vec!["Paper 2", "Paper 3"]);

        let prompt = synthesis.requests()[0].user_prompt().to_string();
        assert!(prompt.contains("Title: Statin myopathy"));
        assert!(prompt.contains("Title: Paper 3"));
    }

    #[tokio::test]
    async fn test_translation_failure_is_fatal() {
        let translator = Arc::new(QueryTranslator::new(Arc::new(MockChatProvider::new().fail("down")), "gpt-4", 200));
        let search = Arc::new(ScriptedSearch::new());
        let refiner = IterativeRefiner::new(
            translator,
            search.clone(),
            Arc::new(MockChatProvider::new()),
            RefinerSettings::default(),
        )
        .unwrap();
        let synthesis = Arc::new(MockChatProvider::always("unused"));
        let pipeline = ResearchPipeline::new(
            library(&["A"]).await,
            refiner,
            Synthesizer::new(synthesis.clone(), "gpt-4", SynthesisOptions::default()),
            ContextBudget::new(TokenCounter::new().unwrap(), 12_000, 1_000),
            5,
        );

        let err = assert_err!(pipeline.answer("q").await);
        assert!(matches!(err, AppError::Translation { .. }));
        assert!(search.calls().is_empty());
        assert_eq!(synthesis.call_count(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_fatal() {
        let search = ScriptedSearch::new().on(SEED, vec![external("1", "Paper 1")]);
        let synthesis = Arc::new(MockChatProvider::new().fail("overloaded"));

        let pipeline = pipeline(search, MockChatProvider::new().reply(""), synthesis).await;
        let err = pipeline.answer("q").await.unwrap_err();
        assert!(matches!(err, AppError::Provider { .. }));
    }
}
