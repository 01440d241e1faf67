use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodulyxError {
    /// Fatal for the affected document only; batch processing continues.
    #[error("XML syntax error: {0}")]
    XmlSyntax(String),

    /// Systemic: there is no fallback rule set, so the whole batch aborts.
    #[error("Rule repository unavailable: {0}")]
    RuleRepositoryUnavailable(String),

    /// Non-fatal per field; the engine substitutes a default or a missing tag.
    #[error("Field extraction error: {0}")]
    FieldExtraction(String),

    /// Non-fatal per entity; recorded as a quality note, siblings continue.
    #[error("Entity extraction error: {0}")]
    EntityExtraction(String),

    #[error("Profile error: {0}")]
    Profile(String),

    /// Canonical-document builder used out of transition order.
    #[error("Document assembly error: {0}")]
    Assembly(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NodulyxError>;
