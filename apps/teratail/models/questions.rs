use crate::TERATAIL_BASE_URL;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Question {
    pub id: i64,
    pub title: String,
}

impl Question {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/questions/{}", TERATAIL_BASE_URL, self.id)
    }
}
