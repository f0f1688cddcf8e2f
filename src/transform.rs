use crate::generate::{parse_json_reply, ProviderSet};
use crate::types::{Article, GenerationMethod, TransformedContent};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a transformation request asks for: the editorial voice and the
/// approximate summary length in characters.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub style: String,
    pub target_length: usize,
}

impl Default for TransformRequest {
    fn default() -> Self {
        Self {
            style: "친근한 해설".to_string(),
            target_length: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedPayload {
    summary: String,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    seo_title: Option<String>,
}

/// Turns an article into publishable content. The generative path is best
/// effort: any provider failure, timeout, or malformed response drops to
/// the deterministic template, so transformation itself never fails.
pub struct Transformer {
    providers: Arc<ProviderSet>,
}

impl Transformer {
    pub fn new(providers: Arc<ProviderSet>) -> Self {
        Self { providers }
    }

    pub async fn transform(&self, article: &Article, request: &TransformRequest) -> TransformedContent {
        if !self.providers.is_empty() {
            match self.providers.generate(&build_prompt(article, request)).await {
                Ok(raw) => match parse_payload(&raw) {
                    Some(payload) => {
                        debug!(article_id = %article.id, "Generated content via provider");
                        return TransformedContent {
                            article_id: article.id.clone(),
                            summary: payload.summary,
                            script: payload.script,
                            seo_title: payload.seo_title,
                            generation_method: GenerationMethod::Ai,
                            created_at: Utc::now(),
                        };
                    }
                    None => {
                        warn!(article_id = %article.id, "Unparseable provider response, using template");
                    }
                },
                Err(e) => {
                    warn!(article_id = %article.id, error = %e, "Generation failed, using template");
                }
            }
        }

        fallback_template(article, request)
    }
}

fn build_prompt(article: &Article, request: &TransformRequest) -> String {
    format!(
        "다음 뉴스 기사를 바탕으로 콘텐츠를 만들어 주세요.\n\
         스타일: {style}\n\
         요약 길이: 약 {length}자\n\n\
         제목: {title}\n\
         출처: {source}\n\
         본문:\n{body}\n\n\
         아래 JSON 형식으로만 답하세요. 다른 텍스트는 포함하지 마세요.\n\
         {{\"summary\": \"...\", \"script\": \"...\", \"seo_title\": \"...\"}}",
        style = request.style,
        length = request.target_length,
        title = article.title,
        source = article.source_name,
        body = truncate_chars(&article.body, 3000),
    )
}

/// A summary-less payload counts as unparseable.
fn parse_payload(raw: &str) -> Option<GeneratedPayload> {
    let payload: GeneratedPayload = parse_json_reply(raw)?;
    if payload.summary.trim().is_empty() {
        return None;
    }
    Some(payload)
}

/// The deterministic rendition: same article and request in, same content
/// out. This is the floor the generative path can never take away.
pub fn fallback_template(article: &Article, request: &TransformRequest) -> TransformedContent {
    let date = article.published_at.format("%Y-%m-%d");
    let lead = if article.body.trim().is_empty() {
        article.title.clone()
    } else {
        truncate_chars(article.body.trim(), request.target_length)
    };

    let summary = format!(
        "[{source} | {date}] {title}\n\n{lead}\n\n원문: {url}",
        source = article.source_name,
        date = date,
        title = article.title,
        lead = lead,
        url = article.origin_url,
    );

    TransformedContent {
        article_id: article.id.clone(),
        summary,
        script: None,
        seo_title: Some(truncate_chars(&article.title, 60)),
        generation_method: GenerationMethod::FallbackTemplate,
        created_at: Utc::now(),
    }
}

/// Character-boundary-safe truncation with an ellipsis. Byte slicing is
/// not an option here: Hangul is three bytes per syllable.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{MockProvider, ProviderSet};
    use crate::types::Language;
    use std::sync::Arc;
    use std::time::Duration;

    fn article() -> Article {
        Article::new(
            "노인 건강 특집 기사",
            "본문 내용입니다. ".repeat(10),
            "연합뉴스",
            None,
            "https://news.example.com/1",
            Language::Ko,
            "노인 건강",
        )
        .unwrap()
    }

    fn transformer(providers: Vec<Arc<dyn crate::generate::GenerativeProvider>>) -> Transformer {
        Transformer::new(Arc::new(ProviderSet::with_providers(
            providers,
            Duration::from_secs(1),
        )))
    }

    #[tokio::test]
    async fn well_formed_provider_output_is_used() {
        let response = r#"```json
{"summary": "요약 본문", "script": "대본", "seo_title": "SEO 제목"}
```"#;
        let transformer = transformer(vec![Arc::new(MockProvider::new(response))]);

        let content = transformer
            .transform(&article(), &TransformRequest::default())
            .await;
        assert_eq!(content.generation_method, GenerationMethod::Ai);
        assert_eq!(content.summary, "요약 본문");
        assert_eq!(content.script.as_deref(), Some("대본"));
    }

    #[tokio::test]
    async fn malformed_provider_output_falls_back() {
        let transformer = transformer(vec![Arc::new(MockProvider::new("JSON이 아닌 응답"))]);

        let content = transformer
            .transform(&article(), &TransformRequest::default())
            .await;
        assert_eq!(content.generation_method, GenerationMethod::FallbackTemplate);
        assert!(content.summary.contains("노인 건강 특집 기사"));
    }

    #[tokio::test]
    async fn failing_providers_fall_back() {
        let transformer = transformer(vec![Arc::new(MockProvider::failing())]);

        let content = transformer
            .transform(&article(), &TransformRequest::default())
            .await;
        assert_eq!(content.generation_method, GenerationMethod::FallbackTemplate);
        assert!(!content.summary.is_empty());
    }

    #[tokio::test]
    async fn no_providers_means_template() {
        let transformer = transformer(vec![]);

        let content = transformer
            .transform(&article(), &TransformRequest::default())
            .await;
        assert_eq!(content.generation_method, GenerationMethod::FallbackTemplate);
        assert!(content.summary.contains("원문: https://news.example.com/1"));
    }

    #[test]
    fn truncation_respects_hangul_boundaries() {
        let text = "가나다라마바사";
        assert_eq!(truncate_chars(text, 7), text);
        let cut = truncate_chars(text, 4);
        assert_eq!(cut.chars().count(), 4);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn template_is_deterministic() {
        let article = article();
        let request = TransformRequest::default();
        let first = fallback_template(&article, &request);
        let second = fallback_template(&article, &request);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.seo_title, second.seo_title);
    }
}
