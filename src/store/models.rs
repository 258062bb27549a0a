use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a generation job.
///
/// Transitions only ever move pending -> processing -> {done, error}; the
/// atomic claim in the store is the only place the first transition happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl GenerationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Done => "done",
            GenerationStatus::Error => "error",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GenerationStatus::Pending),
            "processing" => Some(GenerationStatus::Processing),
            "done" => Some(GenerationStatus::Done),
            "error" => Some(GenerationStatus::Error),
            _ => None,
        }
    }
}

/// Category of requested artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    CredentialCard,
    QuizResult,
    PhotoWith,
}

impl GenerationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::CredentialCard => "credential_card",
            GenerationKind::QuizResult => "quiz_result",
            GenerationKind::PhotoWith => "photo_with",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credential_card" => Some(GenerationKind::CredentialCard),
            "quiz_result" => Some(GenerationKind::QuizResult),
            "photo_with" => Some(GenerationKind::PhotoWith),
            _ => None,
        }
    }
}

/// One generation job: a single output artifact for one credential of one
/// kind.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: Uuid,
    pub experience_id: Uuid,
    pub credential_id: Uuid,
    pub kind: GenerationKind,
    pub status: GenerationStatus,
    pub output_path: Option<String>,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub cost_estimated_usd: Option<f64>,
    pub cost_currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Quiz credential row, read-only to the worker.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    /// Free-form answer payload captured by the quiz frontend.
    pub data: Value,
    pub photo_path: Option<String>,
}

impl Credential {
    /// Answer payload as an object map; non-object payloads behave as empty.
    #[must_use]
    pub fn data_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.data.as_object()
    }

    /// Winner archetype reference stored by the quiz flow, when parseable.
    #[must_use]
    pub fn winner_archetype_id(&self) -> Option<Uuid> {
        self.data_object()
            .and_then(|data| data.get("winner_archetype_id"))
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }
}

/// Archetype prompt template scoped to an experience.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub id: Uuid,
    pub name: Option<String>,
    pub image_prompt: Option<String>,
    pub use_photo_prompt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            GenerationStatus::Pending,
            GenerationStatus::Processing,
            GenerationStatus::Done,
            GenerationStatus::Error,
        ] {
            assert_eq!(GenerationStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(GenerationStatus::from_str("queued"), None);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            GenerationKind::CredentialCard,
            GenerationKind::QuizResult,
            GenerationKind::PhotoWith,
        ] {
            assert_eq!(GenerationKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(GenerationKind::from_str("poster"), None);
    }

    #[test]
    fn winner_archetype_id_parses_from_payload() {
        let id = Uuid::new_v4();
        let credential = Credential {
            id: Uuid::new_v4(),
            data: json!({ "winner_archetype_id": id.to_string() }),
            photo_path: None,
        };
        assert_eq!(credential.winner_archetype_id(), Some(id));
    }

    #[test]
    fn winner_archetype_id_tolerates_garbage() {
        let credential = Credential {
            id: Uuid::new_v4(),
            data: json!({ "winner_archetype_id": "not-a-uuid" }),
            photo_path: None,
        };
        assert_eq!(credential.winner_archetype_id(), None);

        let scalar_payload = Credential {
            id: Uuid::new_v4(),
            data: json!("free text"),
            photo_path: None,
        };
        assert_eq!(scalar_payload.winner_archetype_id(), None);
    }
}
