use std::env;
use std::time::Duration;

/// HTTP fetching knobs shared by all source adapters.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub min_host_interval_ms: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            timeout_seconds: 10,
            max_retries: 2,
            retry_delay_seconds: 1,
            min_host_interval_ms: 1000,
            max_redirects: 5,
        }
    }
}

/// Credentials for a keyword search API upstream (Naver-style open API).
#[derive(Debug, Clone)]
pub struct SearchApiConfig {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub page_size: u32,
}

/// Endpoint of a remote browser-rendering service used for ranking pages
/// that require a rendered DOM. Absent means plain HTTP fetching.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub endpoint: String,
    pub token: String,
}

/// Everything the pipeline needs, resolved once at process start.
/// There is no ambient provider registry; constructors receive this struct.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub search_api: Option<SearchApiConfig>,
    pub browser: Option<BrowserConfig>,
    pub feed_base_url: String,
    pub ranking_origin: String,
    /// Extra listing pages without a feed or API, handled by the generic
    /// HTML adapter.
    pub html_pages: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Default keywords for scheduled collection runs.
    pub default_keywords: Vec<String>,
    /// Sources whose articles receive the trust bonus when scoring.
    pub trusted_sources: Vec<String>,
    /// How many top-ranked articles to keep per keyword.
    pub top_n: usize,
    pub search_budget: Duration,
    pub generation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            search_api: None,
            browser: None,
            feed_base_url: "https://news.google.com/rss".to_string(),
            ranking_origin: "https://news.nate.com".to_string(),
            html_pages: Vec::new(),
            gemini_api_key: None,
            openai_api_key: None,
            default_keywords: vec!["노인 건강".to_string(), "시니어 건강".to_string()],
            trusted_sources: vec![
                "연합뉴스".to_string(),
                "뉴시스".to_string(),
                "KBS".to_string(),
                "조선일보".to_string(),
                "한국경제".to_string(),
            ],
            top_n: 5,
            search_budget: Duration::from_secs(20),
            generation_timeout: Duration::from_secs(15),
        }
    }
}

impl PipelineConfig {
    /// Resolve configuration from the process environment. This is the only
    /// place that reads env vars; everything downstream takes the struct.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let (Ok(id), Ok(secret)) = (
            env::var("SEARCH_API_CLIENT_ID"),
            env::var("SEARCH_API_CLIENT_SECRET"),
        ) {
            config.search_api = Some(SearchApiConfig {
                endpoint: env::var("SEARCH_API_ENDPOINT")
                    .unwrap_or_else(|_| "https://openapi.naver.com/v1/search/news.json".to_string()),
                client_id: id,
                client_secret: secret,
                page_size: 20,
            });
        }

        if let Ok(endpoint) = env::var("BROWSER_SERVICE_URL") {
            config.browser = Some(BrowserConfig {
                endpoint,
                token: env::var("BROWSER_SERVICE_TOKEN").unwrap_or_default(),
            });
        }

        config.gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        config.openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(pages) = env::var("HTML_SOURCE_PAGES") {
            config.html_pages = pages
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        if let Ok(keywords) = env::var("PIPELINE_KEYWORDS") {
            let parsed: Vec<String> = keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.default_keywords = parsed;
            }
        }

        config
    }
}
