use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short project namespace such as `INFRA`. Stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("project key cannot be empty".to_string());
        }
        if !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(format!(
                "invalid project key `{trimmed}`: use letters, digits and `_` only"
            ));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record identifier of the form `{PROJECT}-{number}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssueKey(String);

impl IssueKey {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim().to_ascii_uppercase();
        let Some((project, number)) = trimmed.rsplit_once('-') else {
            return Err(format!("invalid issue key `{trimmed}`: expected PROJECT-NUMBER"));
        };
        ProjectKey::parse(project)?;
        if number.is_empty() || !number.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(format!("invalid issue key `{trimmed}`: expected PROJECT-NUMBER"));
        }
        Ok(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn project(&self) -> ProjectKey {
        let (project, _) = self.0.rsplit_once('-').unwrap_or((&self.0, ""));
        ProjectKey(project.to_string())
    }

    pub fn number(&self) -> u64 {
        self.0
            .rsplit_once('-')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(u64::MAX)
    }
}

impl TryFrom<String> for IssueKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IssueKey> for String {
    fn from(value: IssueKey) -> Self {
        value.0
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the identifier list artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRow {
    pub id: String,
    pub key: IssueKey,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub url: String,
}

impl IssueRow {
    pub fn sort_key(&self) -> (u64, u64) {
        (self.id.parse().unwrap_or(u64::MAX), self.key.number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub author: String,
    pub created: DateTime<FixedOffset>,
}

impl AttachmentDescriptor {
    pub fn created_epoch_secs(&self) -> i64 {
        self.created.timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    pub key: IssueKey,
    pub summary: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    /// Attachment elements that could not be turned into descriptors.
    pub rejected_attachments: Vec<String>,
}
