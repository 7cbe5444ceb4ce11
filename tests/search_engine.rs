//! Search engine tests against a real migrated database.

mod common;

use catalog_hub::backends::Backends;
use catalog_hub::config::Config;
use catalog_hub::ingest::Ingestor;
use catalog_hub::models::{EntityType, HitSource};
use catalog_hub::repo;
use catalog_hub::search::engine::{SearchEngine, SearchRequest};
use catalog_hub::search::ranker::SearchWeights;
use catalog_hub::search::{SearchFilters, SearchMode};
use chrono::Utc;
use common::{setup, test_config, MemoryFetcher, RecordingRegistrar};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn catalog(cfg: &Config, docs: Vec<Value>) -> (SqlitePool, Backends) {
    let (pool, backends, _) = setup(cfg, MemoryFetcher::new(), RecordingRegistrar::new()).await;
    let ingestor = Ingestor::new(pool.clone(), &backends, cfg);
    for doc in docs {
        ingestor.ingest_document(doc, None).await.unwrap();
    }
    (pool, backends)
}

fn engine(cfg: &Config, pool: &SqlitePool, backends: &Backends) -> SearchEngine {
    SearchEngine::new(pool.clone(), backends, &cfg.search)
}

async fn mark_ready(pool: &SqlitePool, uid: &str) {
    let mut conn = pool.acquire().await.unwrap();
    repo::set_registration_status(&mut conn, uid, Ok(()), Utc::now())
        .await
        .unwrap();
}

fn tool(id: &str, name: &str, summary: &str) -> Value {
    json!({"type": "tool", "id": id, "version": "1.0.0", "name": name, "summary": summary})
}

/// Scenario C: no vector backend configured.
#[tokio::test]
async fn test_null_vector_backend_returns_nothing() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(
        &tmp,
        "[search]\nvector = \"none\"\n\n[embedding]\nprovider = \"hash\"\ndims = 16\n",
    );
    let (pool, backends) = catalog(&cfg, vec![tool("a", "Alpha", "First tool")]).await;

    let hits = backends
        .vector
        .search(&[0.25; 16], &SearchFilters::default(), 5)
        .await
        .unwrap();
    assert!(hits.is_empty());

    let semantic = engine(&cfg, &pool, &backends)
        .run_semantic("first tool", &[], true, 10, 0)
        .await
        .unwrap();
    assert!(semantic.is_empty());
}

/// Scenario D: a natural-key query that no text field contains.
#[tokio::test]
async fn test_uid_fallback_returns_single_hit() {
    for lexical in ["similarity", "like"] {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, &format!("[search]\nlexical = \"{}\"\n", lexical));
        let (pool, backends) = catalog(
            &cfg,
            vec![
                json!({"type": "tool", "id": "hello", "version": "0.1.0", "name": "Hello Tool"}),
                json!({"type": "tool", "id": "hello", "version": "0.2.0", "name": "Hello Tool"}),
            ],
        )
        .await;

        let hits = engine(&cfg, &pool, &backends)
            .run_keyword("tool:hello@0.1.0", &[], true, 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "backend {}", lexical);
        assert_eq!(hits[0].entity_id, "tool:hello@0.1.0");
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].source, HitSource::Fallback);
    }
}

#[tokio::test]
async fn test_uid_fragment_fallback_prefers_newest() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            json!({"type": "agent", "id": "scout", "version": "1.0.0", "release_ts": "2023-01-01"}),
            json!({"type": "agent", "id": "scout", "version": "2.0.0", "release_ts": "2024-06-01"}),
        ],
    )
    .await;
    let engine = engine(&cfg, &pool, &backends);

    let hits = engine
        .run_keyword("agent:scout", &[], true, 10, 0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity_id, "agent:scout@2.0.0");

    // A type filter also applies to the fallback.
    let hits = engine
        .run_keyword("agent:scout", &[EntityType::Tool], true, 10, 0)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_pending_entities_hidden_by_default() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("ready", "Invoice Parser", "Parses invoices"),
            tool("pending", "Invoice Renderer", "Renders invoices"),
        ],
    )
    .await;
    mark_ready(&pool, "tool:ready@1.0.0").await;
    let engine = engine(&cfg, &pool, &backends);

    let visible = engine
        .run_keyword("invoice", &[], false, 10, 0)
        .await
        .unwrap();
    let ids: Vec<&str> = visible.iter().map(|h| h.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["tool:ready@1.0.0"]);

    let all = engine.run_keyword("invoice", &[], true, 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    // The uid fallback honors visibility too.
    let hidden = engine
        .run_keyword("tool:pending@1.0.0", &[], false, 10, 0)
        .await
        .unwrap();
    assert!(hidden.is_empty());
}

#[tokio::test]
async fn test_similarity_ranks_closer_names_first() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("long", "Summarizer for PDF files, slides and spreadsheets", "Office helper"),
            tool("short", "PDF Summarizer", "Summaries"),
            tool("other", "Weather", "Forecasts"),
        ],
    )
    .await;

    let hits = engine(&cfg, &pool, &backends)
        .run_keyword("summarizer", &[], true, 10, 0)
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["tool:short@1.0.0", "tool:long@1.0.0"]);
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[1].score, 0.0);
    assert!(hits.iter().all(|h| h.source == HitSource::Lexical));
    assert!(hits.iter().all(|h| h.recency.is_some() && h.quality.is_some()));
}

#[tokio::test]
async fn test_like_backend_scores_by_matching_fields() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[search]\nlexical = \"like\"\n");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("both", "PDF Tools", "Split and merge PDF files"),
            tool("name-only", "PDF Viewer", "Displays documents"),
            tool("none", "Spreadsheet", "Edits tables"),
        ],
    )
    .await;

    let hits = engine(&cfg, &pool, &backends)
        .run_keyword("pdf", &[], true, 10, 0)
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["tool:both@1.0.0", "tool:name-only@1.0.0"]);
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[1].score, 0.0);

    // An empty query lists everything instead of failing.
    let everything = backends
        .lexical
        .search("", &SearchFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);
    assert!(everything.iter().all(|h| h.score == 0.0));
}

#[tokio::test]
async fn test_type_filter() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            json!({"type": "agent", "id": "research", "version": "1", "name": "Research Assistant"}),
            json!({"type": "tool", "id": "search", "version": "1", "name": "Research Search API"}),
        ],
    )
    .await;

    let hits = engine(&cfg, &pool, &backends)
        .run_keyword("research", &[EntityType::Agent], true, 10, 0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity_id, "agent:research@1");
}

#[tokio::test]
async fn test_offset_and_limit_slice_after_ranking() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[search]\nlexical = \"like\"\n");
    let docs = (1..=5)
        .map(|i| tool(&format!("widget-{}", i), &format!("Widget {}", i), "A widget"))
        .collect();
    let (pool, backends) = catalog(&cfg, docs).await;
    let engine = engine(&cfg, &pool, &backends);

    let all = engine.run_keyword("widget", &[], true, 10, 0).await.unwrap();
    assert_eq!(all.len(), 5);

    let first = engine.run_keyword("widget", &[], true, 2, 0).await.unwrap();
    let second = engine.run_keyword("widget", &[], true, 2, 2).await.unwrap();
    let tail = engine.run_keyword("widget", &[], true, 2, 4).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(tail.len(), 1);

    let paged: Vec<&str> = first
        .iter()
        .chain(&second)
        .chain(&tail)
        .map(|h| h.entity_id.as_str())
        .collect();
    let expected: Vec<&str> = all.iter().map(|h| h.entity_id.as_str()).collect();
    assert_eq!(paged, expected);
}

#[tokio::test]
async fn test_semantic_search_finds_nearest_entity() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[embedding]\nprovider = \"hash\"\ndims = 256\n");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("pdf", "PDF Summarizer", "Summarizes long PDF documents"),
            tool("weather", "Weather Agent", "Forecasts rain and sunshine"),
        ],
    )
    .await;

    let hits = engine(&cfg, &pool, &backends)
        .run_semantic("summarizes pdf documents", &[], true, 10, 0)
        .await
        .unwrap();
    assert_eq!(hits[0].entity_id, "tool:pdf@1.0.0");
    assert_eq!(hits[0].source, HitSource::Vector);
    assert!(hits[0].best_chunk_id.is_some());
}

/// Scenario E through the engine: with only semantic and lexical weights,
/// every final score is their even blend.
#[tokio::test]
async fn test_hybrid_blends_lexical_and_semantic() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[embedding]\nprovider = \"hash\"\ndims = 128\n");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("ocr", "OCR Reader", "Reads scanned pages"),
            tool("ocr-pro", "OCR Reader Pro", "Reads scanned pages in bulk"),
            tool("tts", "Speech", "Reads text aloud"),
        ],
    )
    .await;
    let weights = SearchWeights {
        semantic: 0.5,
        lexical: 0.5,
        quality: 0.0,
        recency: 0.0,
    };
    let engine = engine(&cfg, &pool, &backends).with_weights(weights);

    let results = engine
        .run_hybrid("ocr reader", &[], true, 10, 0)
        .await
        .unwrap();
    assert!(!results.is_empty());
    for r in &results {
        let expected = 0.5 * r.score_semantic + 0.5 * r.score_lexical;
        assert!((r.score_final - expected).abs() < 1e-9, "{:?}", r);
    }
    for pair in results.windows(2) {
        assert!(pair[0].score_final >= pair[1].score_final);
    }
    assert!(results.iter().any(|r| r.score_lexical > 0.0));
    assert!(results.iter().any(|r| r.best_chunk_id.is_some()));
}

#[tokio::test]
async fn test_search_request_dispatch() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[search]\ninclude_pending = true\n");
    let (pool, backends) = catalog(
        &cfg,
        vec![
            tool("git", "Git Helper", "Commits and branches"),
            json!({"type": "agent", "id": "git-bot", "version": "1.0.0", "name": "Git Bot",
                   "capabilities": ["review"]}),
        ],
    )
    .await;
    let engine = engine(&cfg, &pool, &backends);

    let mut request = SearchRequest::new("git");
    request.mode = SearchMode::Keyword;
    let results = engine.search(&request).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.score_semantic == 0.0));

    request.capabilities = vec!["review".to_string()];
    let results = engine.search(&request).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity_id, "agent:git-bot@1.0.0");

    // Embeddings are disabled, so semantic mode is empty rather than an error.
    request.mode = SearchMode::Semantic;
    assert!(engine.search(&request).await.unwrap().is_empty());

    // Configured default hides nothing here; an explicit override does.
    request.mode = SearchMode::Hybrid;
    request.include_pending = Some(false);
    assert!(engine.search(&request).await.unwrap().is_empty());
}
