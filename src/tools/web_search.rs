use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::Url;

use crate::config::SearchProvider;

use super::{
    optional_str, optional_str_array, optional_u64, required_str, ParameterKind, Tool,
    ToolCategory, ToolDefinition, ToolError, ToolParameter,
};

const MAX_RESULTS_CAP: usize = 20;

/// One normalized hit, independent of the provider that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

/// Web search over one of several providers, normalized to a single result
/// shape. Domain include/exclude lists are applied before results leave the
/// tool.
pub struct WebSearchTool {
    provider: SearchProvider,
    client: Client,
    tavily_key: Option<SecretString>,
    serpapi_key: Option<SecretString>,
    tavily_url: String,
    serpapi_url: String,
    duckduckgo_url: String,
}

impl WebSearchTool {
    pub fn new(provider: SearchProvider) -> Self {
        Self {
            provider,
            client: Client::new(),
            tavily_key: None,
            serpapi_key: None,
            tavily_url: "https://api.tavily.com/search".into(),
            serpapi_url: "https://serpapi.com/search".into(),
            duckduckgo_url: "https://duckduckgo.com/html/".into(),
        }
    }

    pub fn with_tavily_key(mut self, key: impl Into<String>) -> Self {
        self.tavily_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_serpapi_key(mut self, key: impl Into<String>) -> Self {
        self.serpapi_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_endpoints(
        mut self,
        tavily_url: impl Into<String>,
        serpapi_url: impl Into<String>,
        duckduckgo_url: impl Into<String>,
    ) -> Self {
        self.tavily_url = tavily_url.into();
        self.serpapi_url = serpapi_url.into();
        self.duckduckgo_url = duckduckgo_url.into();
        self
    }

    fn domain_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
    }

    fn domain_allowed(url: &str, include: &[String], exclude: &[String]) -> bool {
        let Some(domain) = Self::domain_of(url) else {
            return include.is_empty();
        };
        if exclude.iter().any(|d| domain.ends_with(d.trim_start_matches("www."))) {
            return false;
        }
        if include.is_empty() {
            return true;
        }
        include.iter().any(|d| domain.ends_with(d.trim_start_matches("www.")))
    }

    async fn search_tavily(
        &self,
        query: &str,
        max_results: usize,
        depth: &str,
        include: &[String],
        exclude: &[String],
    ) -> Result<Vec<SearchResult>, ToolError> {
        let key = self
            .tavily_key
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable("Tavily API key not configured".into()))?;

        let payload = json!({
            "api_key": key.expose_secret(),
            "query": query,
            "max_results": max_results,
            "search_depth": depth,
            "include_domains": include,
            "exclude_domains": exclude,
        });

        let response = self
            .client
            .post(&self.tavily_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        let body: Value = response.json().await.map_err(ToolError::execution)?;

        let results = body["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|r| SearchResult {
                        title: r["title"].as_str().unwrap_or("").to_string(),
                        url: r["url"].as_str().unwrap_or("").to_string(),
                        snippet: r["content"].as_str().unwrap_or("").to_string(),
                        score: r["score"].as_f64().unwrap_or(0.0),
                        published_date: r["published_date"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }

    async fn search_serpapi(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let key = self
            .serpapi_key
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable("SerpAPI key not configured".into()))?;

        let mut url = Url::parse(&self.serpapi_url).map_err(ToolError::execution)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("num", &max_results.to_string())
            .append_pair("api_key", key.expose_secret());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        let body: Value = response.json().await.map_err(ToolError::execution)?;

        let results = body["organic_results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .enumerate()
                    .map(|(i, r)| SearchResult {
                        title: r["title"].as_str().unwrap_or("").to_string(),
                        url: r["link"].as_str().unwrap_or("").to_string(),
                        snippet: r["snippet"].as_str().unwrap_or("").to_string(),
                        score: 1.0 - (i as f64 / MAX_RESULTS_CAP as f64),
                        published_date: r["date"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(results)
    }

    async fn search_duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let mut url = Url::parse(&self.duckduckgo_url).map_err(ToolError::execution)?;
        url.query_pairs_mut().append_pair("q", query);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        let body = response.text().await.map_err(ToolError::execution)?;

        let page = DuckDuckGoPage::new();
        let document = Html::parse_document(&body);

        let mut results = Vec::new();
        for hit in document.select(&page.hits) {
            if results.len() >= max_results {
                break;
            }
            if let Some(result) = page.parse_hit(hit) {
                results.push(result);
            }
        }
        Ok(results)
    }
}

/// Selectors for the DuckDuckGo HTML endpoint's result markup.
struct DuckDuckGoPage {
    hits: Selector,
    title: Selector,
    link: Selector,
    snippet: Selector,
}

impl DuckDuckGoPage {
    fn new() -> Self {
        Self {
            hits: Selector::parse(".web-result").expect("static selector"),
            title: Selector::parse(".result__a").expect("static selector"),
            link: Selector::parse(".result__url").expect("static selector"),
            snippet: Selector::parse(".result__snippet").expect("static selector"),
        }
    }

    /// One result block to one normalized hit; blocks missing any field are
    /// dropped.
    fn parse_hit(&self, hit: ElementRef<'_>) -> Option<SearchResult> {
        let title = field_text(hit, &self.title)?;
        let link = field_text(hit, &self.link)?;
        let snippet = field_text(hit, &self.snippet)?;

        // The markup shows bare domains; rebuild a usable URL from them.
        let link = link.trim();
        let url = if link.starts_with("http") {
            link.to_string()
        } else {
            format!("https://{link}")
        };

        Some(SearchResult {
            title,
            url,
            snippet,
            score: 0.0,
            published_date: None,
        })
    }
}

/// Accumulated text of the first `selector` match inside `hit`.
fn field_text(hit: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = hit.select(selector).next()?;
    let mut text = String::new();
    for fragment in element.text() {
        text.push_str(fragment);
    }
    Some(text)
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "web_search",
            "Search the web for information on any topic; returns titles, URLs and snippets",
            ToolCategory::Network,
        )
        .with_parameters([
            ToolParameter::new("query", ParameterKind::String).description("The search query"),
            ToolParameter::new("max_results", ParameterKind::Number)
                .description("Maximum number of results (default 5, max 20)")
                .optional(),
            ToolParameter::new("search_depth", ParameterKind::String)
                .description("Search depth (Tavily only)")
                .one_of([json!("basic"), json!("advanced")])
                .optional(),
            ToolParameter::new("include_domains", ParameterKind::Array)
                .description("Restrict results to these domains")
                .optional(),
            ToolParameter::new("exclude_domains", ParameterKind::Array)
                .description("Drop results from these domains")
                .optional(),
        ])
        .with_returns(json!({
            "query": "Echoed query",
            "provider": "Provider used",
            "results": "Normalized search results",
        }))
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let query = required_str(args, "query")?;
        let max_results = optional_u64(args, "max_results")
            .map(|n| n as usize)
            .unwrap_or(5)
            .min(MAX_RESULTS_CAP);
        let depth = optional_str(args, "search_depth").unwrap_or("basic");
        let include = optional_str_array(args, "include_domains");
        let exclude = optional_str_array(args, "exclude_domains");

        let results = match self.provider {
            SearchProvider::Tavily => {
                self.search_tavily(query, max_results, depth, &include, &exclude)
                    .await?
            }
            SearchProvider::SerpApi => self.search_serpapi(query, max_results).await?,
            SearchProvider::DuckDuckGo => self.search_duckduckgo(query, max_results).await?,
        };

        let filtered: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| Self::domain_allowed(&r.url, &include, &exclude))
            .collect();

        Ok(json!({
            "query": query,
            "provider": format!("{:?}", self.provider).to_lowercase(),
            "results": filtered,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(query: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("query".into(), json!(query));
        map
    }

    #[test]
    fn domain_filtering() {
        let include = vec!["rust-lang.org".to_string()];
        let exclude = vec!["spam.example".to_string()];
        assert!(WebSearchTool::domain_allowed(
            "https://www.rust-lang.org/learn",
            &include,
            &exclude
        ));
        assert!(!WebSearchTool::domain_allowed(
            "https://crates.io/",
            &include,
            &exclude
        ));
        assert!(!WebSearchTool::domain_allowed(
            "https://spam.example/page",
            &[],
            &exclude
        ));
        assert!(WebSearchTool::domain_allowed("https://any.site/", &[], &[]));
    }

    #[tokio::test]
    async fn tavily_results_are_normalized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/search")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results": [
                    {"title": "Rust", "url": "https://rust-lang.org", "content": "A language", "score": 0.97},
                    {"title": "Spam", "url": "https://spam.example", "content": "junk", "score": 0.2}
                ]}"#,
            )
            .create_async()
            .await;

        let tool = WebSearchTool::new(SearchProvider::Tavily)
            .with_tavily_key("tv-key")
            .with_endpoints(format!("{}/search", server.url()), String::new(), String::new());

        let mut call = args("rust language");
        call.insert("exclude_domains".into(), json!(["spam.example"]));
        let output = tool.run(&call).await.unwrap();

        let results = output["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["title"], "Rust");
        assert_eq!(results[0]["score"], 0.97);
    }

    #[tokio::test]
    async fn missing_tavily_key_is_unavailable() {
        let tool = WebSearchTool::new(SearchProvider::Tavily);
        let err = tool.run(&args("anything")).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[tokio::test]
    async fn duckduckgo_parses_result_markup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"<html><body>
                <div class="web-result">
                    <a class="result__a">Rust Book</a>
                    <span class="result__url"> doc.rust-lang.org/book </span>
                    <span class="result__snippet">Learn Rust</span>
                </div>
                </body></html>"#,
            )
            .create_async()
            .await;

        let tool = WebSearchTool::new(SearchProvider::DuckDuckGo).with_endpoints(
            String::new(),
            String::new(),
            server.url(),
        );
        let output = tool.run(&args("rust book")).await.unwrap();
        let results = output["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["title"], "Rust Book");
        assert_eq!(results[0]["url"], "https://doc.rust-lang.org/book");
    }
}
