use crate::{
    QUESTIONS_PER_FETCH, TERATAIL_BASE_URL,
    errors::{NotifierError, Result},
    models::questions::{Question, QuestionsResponse},
};
use async_trait::async_trait;
use reqwest::{
    Client, Url,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use utils::errors::HTTP_CLIENT_BUILD_FAILED;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can list the newest questions for a tag.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch_questions(&self, tag: &str) -> Result<Vec<Question>>;
}

#[derive(Clone, Debug)]
pub struct TeratailApi {
    client: Client,
    base_url: String,
}

impl TeratailApi {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Self::new_with_base_url(TERATAIL_BASE_URL.to_string(), request_timeout)
    }

    pub fn new_with_base_url(base_url: String, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .default_headers(Self::default_headers())
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotifierError::Network(format!("{HTTP_CLIENT_BUILD_FAILED}: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("teratail-notifier/0.1 reqwest/0.12"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// `{base}/api/v1/tags/{tag}/questions?limit=5&page=1`, with the tag encoded as one
    /// path segment.
    pub fn questions_url(&self, tag: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| NotifierError::Network(format!("invalid base url {}: {e}", self.base_url)))?;

        url.path_segments_mut()
            .map_err(|_| NotifierError::Network(format!("base url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "tags", tag, "questions"]);

        url.query_pairs_mut()
            .append_pair("limit", &QUESTIONS_PER_FETCH.to_string())
            .append_pair("page", "1");

        Ok(url)
    }
}

#[async_trait]
impl QuestionSource for TeratailApi {
    #[instrument(skip(self))]
    async fn fetch_questions(&self, tag: &str) -> Result<Vec<Question>> {
        let url = self.questions_url(tag)?;
        debug!(%url, "Fetching questions");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                NotifierError::Network(format!("request to {url} timed out"))
            } else {
                NotifierError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status = %status, body, "Request failed");
            return Err(NotifierError::Network(format!(
                "request failed with status {status}"
            )));
        }

        let body = response.text().await?;
        let parsed: QuestionsResponse =
            serde_json::from_str(&body).map_err(|e| NotifierError::Parse(e.to_string()))?;

        debug!(count = parsed.questions.len(), "Fetched questions");
        Ok(parsed.questions)
    }
}
