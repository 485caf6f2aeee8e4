//! Core opaque-identifier types shared across the crate.

use serde::{Deserialize, Serialize};

/// The closed set of entity kinds the core schedules enrichment over.
/// IDs within a kind are opaque strings owned by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Lead,
}

/// `(kind, id)` pair identifying an account or lead. The core never
/// interprets the id beyond using it as a map/storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn account(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Account,
            id: id.into(),
        }
    }

    pub fn lead(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Lead,
            id: id.into(),
        }
    }
}

/// The closed set of enrichment kinds recognised by the callback
/// protocol and result store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentType {
    CompanyInfo,
    GenerateLeads,
    LeadLinkedinResearch,
    CustomColumn,
}

impl EnrichmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrichmentType::CompanyInfo => "company_info",
            EnrichmentType::GenerateLeads => "generate_leads",
            EnrichmentType::LeadLinkedinResearch => "lead_linkedin_research",
            EnrichmentType::CustomColumn => "custom_column",
        }
    }

    /// The set is declared closed in the spec: an unrecognised string is
    /// a `ValidationError`, not silently accepted via `#[serde(other)]`.
    pub fn parse(value: &str) -> Result<Self, crate::error::ValidationError> {
        match value {
            "company_info" => Ok(EnrichmentType::CompanyInfo),
            "generate_leads" => Ok(EnrichmentType::GenerateLeads),
            "lead_linkedin_research" => Ok(EnrichmentType::LeadLinkedinResearch),
            "custom_column" => Ok(EnrichmentType::CustomColumn),
            other => Err(crate::error::ValidationError::UnknownEnrichmentType {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EnrichmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-call hint limiting an LLM provider's internal reasoning tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingBudget {
    Zero,
    #[default]
    Low,
    Medium,
    High,
}

/// Per-call hint controlling how much web evidence a search-grounded
/// LLM call should gather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchContextSize {
    Low,
    #[default]
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_type_round_trips_through_str() {
        for t in [
            EnrichmentType::CompanyInfo,
            EnrichmentType::GenerateLeads,
            EnrichmentType::LeadLinkedinResearch,
            EnrichmentType::CustomColumn,
        ] {
            assert_eq!(EnrichmentType::parse(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn unknown_enrichment_type_is_validation_error() {
        assert!(EnrichmentType::parse("bogus").is_err());
    }
}
