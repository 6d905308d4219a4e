//! Searcher tests: mode behavior, hybrid fusion, filters, validation,
//! caching, and ranking properties.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{MockEmbedder, TestIndex};
use codeseek::searcher::rrf_fuse;
use codeseek::{SearchError, SearchMode, SearchRequest};

/// A corpus with one chunk that matches "automobile" only semantically
/// (through the car synonym group) and one that matches only lexically.
const FUSION_TREE: &[(&str, &str)] = &[
    (
        "sem.src",
        "package garage\nfn RepairEngine()\n    car car car wrench\n",
    ),
    (
        "lex.src",
        "package notes\nfn MiscNotes()\n    automobile zebra quantum pickle assorted words everywhere\n",
    ),
    (
        "other.src",
        "package other\nfn Unrelated()\n    completely different topic\n",
    ),
];

async fn fusion_fixture() -> (TestIndex, i64) {
    let fixture = TestIndex::new(Some(Arc::new(MockEmbedder))).await;
    fixture.write_tree(FUSION_TREE);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;
    (fixture, project_id)
}

fn request(project_id: i64, query: &str, mode: SearchMode, limit: usize) -> SearchRequest {
    let mut request = SearchRequest::new(project_id, query, mode);
    request.limit = limit;
    request
}

fn hit_paths(response: &codeseek::SearchResponse) -> Vec<String> {
    response.hits.iter().map(|h| h.file.rel_path.clone()).collect()
}

#[tokio::test]
async fn test_vector_mode_finds_semantic_match() {
    let (fixture, project_id) = fusion_fixture().await;
    let response = fixture
        .searcher
        .search(&request(project_id, "automobile", SearchMode::Vector, 1))
        .await
        .unwrap();
    assert_eq!(hit_paths(&response), vec!["sem.src"]);
}

#[tokio::test]
async fn test_keyword_mode_finds_lexical_match() {
    let (fixture, project_id) = fusion_fixture().await;
    let response = fixture
        .searcher
        .search(&request(project_id, "automobile", SearchMode::Keyword, 1))
        .await
        .unwrap();
    assert_eq!(hit_paths(&response), vec!["lex.src"]);
}

#[tokio::test]
async fn test_hybrid_mode_fuses_both_matches() {
    let (fixture, project_id) = fusion_fixture().await;
    let response = fixture
        .searcher
        .search(&request(project_id, "automobile", SearchMode::Hybrid, 2))
        .await
        .unwrap();
    let paths = hit_paths(&response);
    assert!(paths.contains(&"sem.src".to_string()), "hybrid must surface the semantic match");
    assert!(paths.contains(&"lex.src".to_string()), "hybrid must surface the lexical match");
}

#[tokio::test]
async fn test_results_sorted_non_increasing_and_limited() {
    let (fixture, project_id) = fusion_fixture().await;
    for mode in [SearchMode::Vector, SearchMode::Keyword, SearchMode::Hybrid] {
        for limit in [1usize, 2, 5] {
            let response = fixture
                .searcher
                .search(&request(project_id, "car words topic", mode, limit))
                .await
                .unwrap();
            assert!(response.hits.len() <= limit, "limit violated in {mode} mode");
            for window in response.hits.windows(2) {
                assert!(
                    window[0].relevance_score >= window[1].relevance_score,
                    "scores must be non-increasing in {mode} mode"
                );
            }
            for (index, hit) in response.hits.iter().enumerate() {
                assert_eq!(hit.rank, index + 1, "ranks are 1-based and dense");
                assert!((0.0..=1.0).contains(&hit.relevance_score));
            }
        }
    }
}

#[tokio::test]
async fn test_validation_rejects_bad_requests() {
    let (fixture, project_id) = fusion_fixture().await;

    let empty = request(project_id, "   ", SearchMode::Keyword, 5);
    assert!(matches!(
        fixture.searcher.search(&empty).await,
        Err(SearchError::InvalidArgument(_))
    ));

    let mut zero_limit = request(project_id, "q", SearchMode::Keyword, 5);
    zero_limit.limit = 0;
    assert!(matches!(
        fixture.searcher.search(&zero_limit).await,
        Err(SearchError::InvalidArgument(_))
    ));

    let mut huge_limit = request(project_id, "q", SearchMode::Keyword, 5);
    huge_limit.limit = 101;
    assert!(matches!(
        fixture.searcher.search(&huge_limit).await,
        Err(SearchError::InvalidArgument(_))
    ));

    assert!("sideways".parse::<SearchMode>().is_err());

    let mut bad_filter = request(project_id, "q", SearchMode::Keyword, 5);
    bad_filter.filters.min_relevance = 2.0;
    assert!(matches!(
        fixture.searcher.search(&bad_filter).await,
        Err(SearchError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_unknown_project_is_rejected() {
    let (fixture, _) = fusion_fixture().await;
    let result = fixture
        .searcher
        .search(&request(9999, "query", SearchMode::Keyword, 5))
        .await;
    assert!(matches!(result, Err(SearchError::ProjectNotFound(9999))));
}

#[tokio::test]
async fn test_vector_mode_without_embedder_fails_cleanly() {
    let fixture = TestIndex::new(None).await;
    fixture.write_tree(&[("a.src", "package a\nfn A()\n    body\n")]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;

    assert!(matches!(
        fixture
            .searcher
            .search(&request(project_id, "anything", SearchMode::Vector, 5))
            .await,
        Err(SearchError::Embedder(_))
    ));
    // Keyword mode keeps working without a provider.
    fixture
        .searcher
        .search(&request(project_id, "body", SearchMode::Keyword, 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fts_injection_attempts_return_normally() {
    let (fixture, project_id) = fusion_fixture().await;
    for hostile in [
        r#"" OR 1=1 --"#,
        "NEAR(a b)",
        "alpha AND beta OR NOT gamma",
        "col:value*",
        "(((((",
        r#""unterminated"#,
    ] {
        for mode in [SearchMode::Keyword, SearchMode::Hybrid] {
            let result = fixture
                .searcher
                .search(&request(project_id, hostile, mode, 5))
                .await;
            assert!(
                result.is_ok(),
                "hostile query {hostile:?} must not error in {mode} mode: {result:?}"
            );
        }
    }
}

#[tokio::test]
async fn test_min_relevance_filters_results() {
    let (fixture, project_id) = fusion_fixture().await;
    let mut req = request(project_id, "car words topic", SearchMode::Hybrid, 10);
    req.filters.min_relevance = 0.5;
    let response = fixture.searcher.search(&req).await.unwrap();
    for hit in &response.hits {
        assert!(
            hit.relevance_score >= 0.5,
            "hit below min_relevance: {}",
            hit.relevance_score
        );
    }
}

#[tokio::test]
async fn test_symbol_kind_filter_honored() {
    let fixture = TestIndex::new(Some(Arc::new(MockEmbedder))).await;
    fixture.write_tree(&[(
        "mixed.src",
        "package mixed\nfn FetchRecords()\n    fetch fetch\nstruct FetchPlan\n    fetch fetch\n",
    )]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;

    let mut req = request(project_id, "fetch", SearchMode::Hybrid, 10);
    req.filters.symbol_kinds = vec!["function".to_string()];
    let response = fixture.searcher.search(&req).await.unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        let symbol = hit.symbol.as_ref().expect("kind-filtered hits carry a symbol");
        assert_eq!(symbol.kind, "function");
    }
}

#[tokio::test]
async fn test_package_and_glob_filters_honored() {
    let fixture = TestIndex::new(Some(Arc::new(MockEmbedder))).await;
    fixture.write_tree(&[
        ("auth/login.src", "package auth\nfn Login()\n    auth auth token\n"),
        ("billing/pay.src", "package billing\nfn Pay()\n    auth auth token\n"),
    ]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;

    let mut by_package = request(project_id, "token", SearchMode::Keyword, 10);
    by_package.filters.packages = vec!["auth".to_string()];
    let response = fixture.searcher.search(&by_package).await.unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert_eq!(hit.file.package_name, "auth");
    }

    let mut by_glob = request(project_id, "token", SearchMode::Keyword, 10);
    by_glob.filters.file_glob = Some("billing/**".to_string());
    let response = fixture.searcher.search(&by_glob).await.unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert!(hit.file.rel_path.starts_with("billing/"));
    }
}

#[tokio::test]
async fn test_ddd_pattern_filter_honored() {
    let fixture = TestIndex::new(Some(Arc::new(MockEmbedder))).await;
    fixture.write_tree(&[(
        "domain.src",
        "package domain\nstruct UserRepository\n    load save\nstruct UserThing\n    load save\n",
    )]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;

    let mut req = request(project_id, "load save", SearchMode::Keyword, 10);
    req.filters.ddd_patterns = vec!["repository".to_string()];
    let response = fixture.searcher.search(&req).await.unwrap();
    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert_eq!(hit.symbol.as_ref().unwrap().name, "UserRepository");
    }
}

#[tokio::test]
async fn test_hydration_includes_context_and_file_info() {
    let (fixture, project_id) = fusion_fixture().await;
    let response = fixture
        .searcher
        .search(&request(project_id, "automobile", SearchMode::Keyword, 1))
        .await
        .unwrap();
    let hit = &response.hits[0];
    assert!(!hit.content.is_empty());
    assert_eq!(hit.file.rel_path, "lex.src");
    assert_eq!(hit.file.package_name, "notes");
    assert!(hit.start_line >= 1 && hit.end_line >= hit.start_line);
    let symbol = hit.symbol.as_ref().expect("chunk is symbol-linked");
    assert_eq!(symbol.name, "MiscNotes");
}

#[tokio::test]
async fn test_cache_round_trip_and_invalidation() {
    let (fixture, project_id) = fusion_fixture().await;
    let mut req = request(project_id, "automobile", SearchMode::Keyword, 5);
    req.use_cache = true;

    let first = fixture.searcher.search(&req).await.unwrap();
    let second = fixture.searcher.search(&req).await.unwrap();
    assert_eq!(hit_paths(&first), hit_paths(&second));

    // New content only becomes visible after invalidation.
    fixture.write_tree(&[(
        "new.src",
        "package fresh\nfn Automobile()\n    automobile automobile automobile\n",
    )]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();

    let cached = fixture.searcher.search(&req).await.unwrap();
    assert_eq!(hit_paths(&cached), hit_paths(&first), "cache still serves the old response");

    fixture.searcher.invalidate_cache();
    let fresh = fixture.searcher.search(&req).await.unwrap();
    assert!(
        hit_paths(&fresh).contains(&"new.src".to_string()),
        "fresh search must see the new file: {:?}",
        hit_paths(&fresh)
    );
}

#[tokio::test]
async fn test_cache_is_per_request_shape() {
    let (fixture, project_id) = fusion_fixture().await;
    let mut narrow = request(project_id, "automobile", SearchMode::Keyword, 5);
    narrow.use_cache = true;
    narrow.filters.packages = vec!["notes".to_string()];
    let narrow_response = fixture.searcher.search(&narrow).await.unwrap();

    let mut broad = narrow.clone();
    broad.filters.packages.clear();
    let broad_response = fixture.searcher.search(&broad).await.unwrap();

    // Different filters hash to different cache keys; the narrow response
    // must not leak into the broad request.
    assert_eq!(hit_paths(&narrow_response), vec!["lex.src"]);
    assert_eq!(hit_paths(&broad_response), vec!["lex.src"]);
    let mut third = broad.clone();
    third.query = "wrench".into();
    let third_response = fixture.searcher.search(&third).await.unwrap();
    assert_eq!(hit_paths(&third_response), vec!["sem.src"]);
}

#[tokio::test]
async fn test_custom_rrf_constant_accepted() {
    let (fixture, project_id) = fusion_fixture().await;
    let mut req = request(project_id, "automobile", SearchMode::Hybrid, 2);
    req.rrf_constant = Some(5.0);
    let response = fixture.searcher.search(&req).await.unwrap();
    assert_eq!(response.hits.len(), 2);
}

#[tokio::test]
async fn test_find_definitions_ranks_by_name_exactness() {
    let fixture = TestIndex::new(None).await;
    fixture.write_tree(&[(
        "defs.src",
        "package defs\nfn Parse()\n    body\nfn ParseConfig()\n    body\nfn Reparse()\n    body\n",
    )]);
    fixture
        .indexer
        .index_project(fixture.root(), Default::default())
        .await
        .unwrap();
    let project_id = fixture.project_id().await;

    let defs = fixture
        .searcher
        .find_definitions(project_id, "Parse", 10)
        .await
        .unwrap();
    assert!(defs.len() >= 2);
    assert_eq!(defs[0].symbol.name, "Parse", "exact match first");
    assert_eq!(defs[0].score, 1.0);
    assert_eq!(defs[1].symbol.name, "ParseConfig", "prefix match second");
    assert_eq!(defs[1].score, 0.9);
    assert_eq!(defs[0].file.rel_path, "defs.src");
    assert!(defs[0].start_line >= 1);

    assert!(matches!(
        fixture.searcher.find_definitions(project_id, "  ", 5).await,
        Err(SearchError::InvalidArgument(_))
    ));
    assert!(fixture
        .searcher
        .find_definitions(project_id, "NoSuchSymbol", 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_request_and_response_serialize_round_trip() {
    // The request/response types are the transport surface; they must
    // survive JSON round trips with field names callers rely on.
    let (fixture, project_id) = fusion_fixture().await;
    let mut req = request(project_id, "automobile", SearchMode::Hybrid, 2);
    req.filters.packages = vec!["notes".to_string()];
    req.filters.min_relevance = 0.1;

    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains("\"mode\":\"hybrid\""));
    let parsed: SearchRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.query, req.query);
    assert_eq!(parsed.filters.packages, req.filters.packages);

    let response = fixture.searcher.search(&parsed).await.unwrap();
    let value: serde_json::Value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["query"], "automobile");
    assert!(value["hits"].as_array().is_some());
    // Defaults fill in omitted fields
    let minimal: SearchRequest = serde_json::from_str(
        &format!(r#"{{"query":"q","limit":5,"mode":"keyword","project_id":{project_id}}}"#),
    )
    .unwrap();
    assert!(minimal.filters.packages.is_empty());
    assert!(!minimal.use_cache);
}

#[test]
fn test_rrf_fusion_scales_like_n_log_n_not_n_squared() {
    // Runtime scaling check across n in {100, 1000, 10000}: comparison
    // sorting grows ~n log n. A quadratic implementation would blow the
    // generous factor below by two orders of magnitude.
    fn time_fuse(n: i64) -> Duration {
        let dense: Vec<i64> = (0..n).collect();
        let sparse: Vec<i64> = (n / 2..n / 2 + n).collect();
        // Warm-up pass, then the measured pass
        let _ = rrf_fuse(&dense, &sparse, 60.0, n as usize);
        let start = Instant::now();
        let fused = rrf_fuse(&dense, &sparse, 60.0, n as usize);
        let elapsed = start.elapsed();
        assert!(fused.len() <= n as usize);
        elapsed
    }

    let small = time_fuse(100).max(Duration::from_micros(5));
    let _medium = time_fuse(1_000);
    let large = time_fuse(10_000);

    // n log n predicts ~130x; quadratic predicts ~10000x. The 2000x bound
    // leaves plenty of scheduler noise headroom while still failing any
    // quadratic sort.
    assert!(
        large < small * 2000,
        "fusion at n=10000 took {large:?}, vs {small:?} at n=100, worse than n log n"
    );
}
