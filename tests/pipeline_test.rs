use async_trait::async_trait;
use news_pipeline::aggregator::Aggregator;
use news_pipeline::generate::{MockProvider, ProviderSet};
use news_pipeline::sources::{NewsSource, SourceFetch};
use news_pipeline::store::MemoryStore;
use news_pipeline::transform::{TransformRequest, Transformer};
use news_pipeline::types::{Article, GenerationMethod, Language};
use news_pipeline::{Pipeline, Ranker, SimilarityJudge, Store};
use std::sync::Arc;
use std::time::Duration;

struct FixtureSource {
    name: &'static str,
    articles: Vec<(&'static str, &'static str)>,
    error: Option<&'static str>,
}

#[async_trait]
impl NewsSource for FixtureSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, keyword: &str) -> SourceFetch {
        let articles = self
            .articles
            .iter()
            .filter_map(|(title, url)| {
                Article::new(*title, "", self.name, None, *url, Language::Ko, keyword)
            })
            .collect();
        match self.error {
            Some(error) => SourceFetch::partial(self.name, articles, error.to_string()),
            None => SourceFetch::ok(self.name, articles),
        }
    }
}

fn pipeline_with(
    sources: Vec<Arc<dyn NewsSource>>,
    providers: Vec<Arc<dyn news_pipeline::generate::GenerativeProvider>>,
    store: Arc<MemoryStore>,
) -> Pipeline {
    let providers = Arc::new(ProviderSet::with_providers(
        providers,
        Duration::from_secs(1),
    ));
    Pipeline::new(
        Aggregator::new(sources, Duration::from_secs(5)),
        Ranker::new(vec!["연합뉴스".to_string()], 5),
        SimilarityJudge::new(Arc::clone(&providers)),
        Transformer::new(providers),
        store,
    )
}

#[tokio::test]
async fn full_pass_saves_and_transforms() {
    let _ = tracing_subscriber::fmt().try_init();
    let store = Arc::new(MemoryStore::new());

    let response = r#"{"summary": "생성된 요약", "script": "대본", "seo_title": "제목"}"#;
    let pipeline = pipeline_with(
        vec![Arc::new(FixtureSource {
            name: "fixture",
            articles: vec![
                ("노인 건강 관리의 핵심", "https://a.com/1"),
                ("시니어 운동 프로그램 안내", "https://a.com/2"),
            ],
            error: None,
        })],
        vec![Arc::new(MockProvider::new(response))],
        Arc::clone(&store),
    );

    let counts = pipeline
        .run(&["노인 건강".to_string()], &TransformRequest::default())
        .await
        .unwrap();
    assert_eq!(counts.total_found, 2);
    assert_eq!(counts.new_saved, 2);
    assert_eq!(counts.duplicates_skipped, 0);

    let content = store.content_for("https://a.com/1").await.unwrap().unwrap();
    assert_eq!(content.generation_method, GenerationMethod::Ai);
    assert_eq!(content.summary, "생성된 요약");
}

#[tokio::test]
async fn rerun_skips_already_saved_articles() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![Arc::new(FixtureSource {
            name: "fixture",
            articles: vec![("노인 건강 관리의 핵심", "https://a.com/1")],
            error: None,
        })],
        vec![],
        Arc::clone(&store),
    );
    let keywords = vec!["노인 건강".to_string()];

    let first = pipeline
        .run(&keywords, &TransformRequest::default())
        .await
        .unwrap();
    assert_eq!(first.new_saved, 1);

    let second = pipeline
        .run(&keywords, &TransformRequest::default())
        .await
        .unwrap();
    assert_eq!(second.new_saved, 0);
    assert_eq!(second.duplicates_skipped, 1);
}

#[tokio::test]
async fn provider_failure_still_yields_content() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![Arc::new(FixtureSource {
            name: "fixture",
            articles: vec![("노인 건강 관리의 핵심", "https://a.com/1")],
            error: None,
        })],
        vec![Arc::new(MockProvider::failing())],
        Arc::clone(&store),
    );

    pipeline
        .run(&["노인 건강".to_string()], &TransformRequest::default())
        .await
        .unwrap();

    let content = store.content_for("https://a.com/1").await.unwrap().unwrap();
    assert_eq!(content.generation_method, GenerationMethod::FallbackTemplate);
    assert!(content.summary.contains("노인 건강 관리의 핵심"));
}

#[tokio::test]
async fn degraded_source_does_not_fail_the_pass() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![
            Arc::new(FixtureSource {
                name: "healthy",
                articles: vec![("노인 건강 관리의 핵심", "https://a.com/1")],
                error: None,
            }),
            Arc::new(FixtureSource {
                name: "broken",
                articles: vec![],
                error: Some("HTTP 503"),
            }),
        ],
        vec![],
        Arc::clone(&store),
    );

    let counts = pipeline
        .run(&["노인 건강".to_string()], &TransformRequest::default())
        .await
        .unwrap();
    assert_eq!(counts.new_saved, 1);
    assert_eq!(counts.sources_failed, 1);
}

#[tokio::test]
async fn search_reports_source_failures() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![
            Arc::new(FixtureSource {
                name: "healthy",
                articles: vec![("노인 건강 관리의 핵심", "https://a.com/1")],
                error: None,
            }),
            Arc::new(FixtureSource {
                name: "broken",
                articles: vec![],
                error: Some("HTTP 503"),
            }),
        ],
        vec![],
        Arc::clone(&store),
    );

    let report = pipeline.search(&["노인 건강".to_string()]).await.unwrap();
    assert_eq!(report.articles.len(), 1);
    assert_eq!(report.sources_failed(), 1);

    // Search never persists.
    assert!(store.recent_articles(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn all_sources_failing_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![Arc::new(FixtureSource {
            name: "broken",
            articles: vec![],
            error: Some("HTTP 503"),
        })],
        vec![],
        Arc::clone(&store),
    );

    let result = pipeline
        .run(&["노인 건강".to_string()], &TransformRequest::default())
        .await;
    assert!(result.is_err());
    assert!(store.recent_articles(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn cross_source_duplicates_are_folded() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        vec![
            Arc::new(FixtureSource {
                name: "first",
                articles: vec![("노인 건강 관리의 핵심", "https://a.com/1")],
                error: None,
            }),
            Arc::new(FixtureSource {
                name: "second",
                articles: vec![("노인 건강 관리의 핵심!", "https://b.com/other")],
                error: None,
            }),
        ],
        vec![],
        Arc::clone(&store),
    );

    let counts = pipeline
        .run(&["노인 건강".to_string()], &TransformRequest::default())
        .await
        .unwrap();
    assert_eq!(counts.total_found, 2);
    assert_eq!(counts.new_saved, 1);
    assert_eq!(counts.duplicates_skipped, 1);
}
