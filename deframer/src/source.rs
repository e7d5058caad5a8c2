//! The source document: which feeds to deframe and the prompt templates per language.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    #[serde(rename = "rss_url")]
    pub url: String,
    /// e.g. "en" for English; selects the prompt template
    pub language: String,
}

/// User and system prompt for one language. `$TITLE` and `$DESCRIPTION` are
/// replaced with the item's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub language: String,
    pub user: String,
    pub system: String,
}

impl PromptTemplate {
    /// Returns the (system, user) pair for one item.
    pub fn render(&self, title: &str, description: &str) -> (String, String) {
        let fill = |template: &str| {
            template
                .replace("$TITLE", title)
                .replace("$DESCRIPTION", description)
        };
        (fill(&self.system), fill(&self.user))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub feeds: Vec<FeedDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptTemplate>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceShape {
    Full(SourceDocument),
    FeedsOnly(Vec<FeedDescriptor>),
}

impl SourceDocument {
    /// Parses the document. A bare array of feed descriptors is accepted as well.
    pub fn parse_str(json: &str) -> Result<Self> {
        let shape: SourceShape = serde_json::from_str(json).context("Failed to parse source document")?;
        Ok(match shape {
            SourceShape::Full(doc) => doc,
            SourceShape::FeedsOnly(feeds) => SourceDocument {
                feeds,
                prompts: Vec::new(),
            },
        })
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read source document: {}", path.as_ref().display()))?;
        Self::parse_str(&data)
    }
}

/// Prompt templates keyed by language. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    pub fn new(templates: impl IntoIterator<Item = PromptTemplate>) -> Self {
        let mut prompts = HashMap::new();
        for template in templates {
            if prompts.contains_key(&template.language) {
                tracing::warn!(language = %template.language, "duplicate prompt template, the last one wins");
            }
            prompts.insert(template.language.clone(), template);
        }
        Self { prompts }
    }

    pub fn get(&self, language: &str) -> Option<&PromptTemplate> {
        self.prompts.get(language)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
