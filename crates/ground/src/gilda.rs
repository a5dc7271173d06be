use async_trait::async_trait;
use ingest::EntityKind;
use serde::{Deserialize, Serialize};

use crate::error::GroundingError;
use crate::retry::RetryPolicy;
use crate::schema::Candidate;
use crate::service::{GroundingService, namespaces_for};

/// Client for a Gilda-compatible grounding web service.
#[derive(Clone)]
pub struct GildaClient {
    base_url: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GroundRequest<'a> {
    text: &'a str,
    namespaces: &'a [&'a str],
}

#[derive(Deserialize)]
struct ScoredMatch {
    term: Term,
    score: f64,
}

#[derive(Deserialize)]
struct Term {
    db: String,
    id: String,
    entry_name: String,
}

impl GildaClient {
    pub fn new(base_url: String, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new("http://localhost:8001".to_string(), RetryPolicy::default())
    }

    async fn ground_once(&self, text: &str, hint: EntityKind) -> Result<Vec<Candidate>, GroundingError> {
        let url = format!("{}/ground", self.base_url);

        let request = GroundRequest {
            text,
            namespaces: namespaces_for(hint),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(GroundingError::Status(response.status().as_u16()));
        }

        let matches: Vec<ScoredMatch> = response.json().await?;

        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                namespace: m.term.db,
                id: m.term.id,
                name: m.term.entry_name,
                score: m.score,
            })
            .collect())
    }
}

#[async_trait]
impl GroundingService for GildaClient {
    async fn lookup(&self, text: &str, hint: EntityKind) -> Result<Vec<Candidate>, GroundingError> {
        self.retry
            .retry("gilda_ground", move || self.ground_once(text, hint))
            .await
    }

    async fn health(&self) -> Result<(), GroundingError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GroundingError::Unavailable(format!(
                "status {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_wire_format() {
        let body = r#"[{"term": {"norm_text": "type 2 diabetes", "text": "Type 2 Diabetes",
            "db": "MESH", "id": "D003924", "entry_name": "Diabetes Mellitus, Type 2",
            "status": "synonym", "source": "mesh"}, "score": 0.77, "match": {}}]"#;
        let matches: Vec<ScoredMatch> = serde_json::from_str(body).unwrap();
        assert_eq!(matches[0].term.db, "MESH");
        assert_eq!(matches[0].term.entry_name, "Diabetes Mellitus, Type 2");
        assert_eq!(matches[0].score, 0.77);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = GildaClient::new("http://grounding.local/".to_string(), RetryPolicy::none());
        assert_eq!(client.base_url, "http://grounding.local");
    }
}
