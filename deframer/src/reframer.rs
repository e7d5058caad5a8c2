//! Asks the completion service whether an item's title is framed and, if the answer
//! clears the decision rule, rewrites the published title and content.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::ingestion::ParsedItem;
use crate::llm::{extract_json, CompletionClient};
use crate::retry::{retry, RetryPolicy};
use crate::source::{FeedDescriptor, PromptRegistry};
use crate::storage::{NewItem, Revision};

/// What the model is asked to answer with. Missing or wrong-typed fields read as
/// empty/zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    pub title_corrected: String,
    pub framing: f64,
    pub reason: String,
}

impl Verdict {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        Verdict {
            title_corrected: text("title_corrected"),
            framing: value.get("framing").and_then(Value::as_f64).unwrap_or(0.0),
            reason: text("reason"),
        }
    }

    /// A revision is only worth publishing with a corrected title and a positive score.
    pub fn into_revision(self) -> Option<Revision> {
        if self.title_corrected.is_empty() || self.framing <= 0.0 {
            return None;
        }
        Some(Revision {
            framing: self.framing,
            title: self.title_corrected,
            reason: self.reason,
        })
    }
}

pub struct Reframer {
    client: Arc<dyn CompletionClient>,
    prompts: PromptRegistry,
    policy: RetryPolicy,
}

impl Reframer {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: PromptRegistry) -> Self {
        Self {
            client,
            prompts,
            policy: RetryPolicy::new(3).with_backoff(Duration::from_millis(100)),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the ledger entry for one item. Never fails: when the model cannot be
    /// reached or keeps answering garbage, the item is published as it came in.
    pub async fn reframe(&self, feed: &FeedDescriptor, item: &ParsedItem) -> NewItem {
        let mut record = NewItem {
            feed_url: feed.url.clone(),
            link: item.link.clone(),
            guid: item.guid.clone(),
            title: item.title.clone(),
            original_title: item.title.clone(),
            description: item.description.clone(),
            content: item.content.clone(),
            revision: None,
        };

        let Some(template) = self.prompts.get(&feed.language) else {
            debug!(language = %feed.language, "no prompt for language, passing item through");
            return record;
        };

        let (system, user) = template.render(&item.title, &item.description);

        let answer = retry(self.policy, |e: &crate::error::DeframeError| e.is_retryable(), |_| {
            self.ask(&system, &user)
        })
        .await;

        let verdict = match answer {
            Ok(value) => Verdict::from_value(&value),
            Err(e) => {
                error!(feed_url = %feed.url, guid = %item.guid, error = %e, "giving up on revision, publishing item unchanged");
                return record;
            }
        };

        if let Some(revision) = verdict.into_revision() {
            info!(guid = %item.guid, framing = revision.framing, "framed title revised");
            apply_revision(&mut record, revision);
        }

        record
    }

    async fn ask(&self, system: &str, user: &str) -> Result<Value> {
        let raw = self.client.complete(system, user).await?;
        extract_json(&raw)
    }
}

fn apply_revision(record: &mut NewItem, revision: Revision) {
    record.title = format!("Framing: {} - {}", format_score(revision.framing), revision.title);
    if !record.content.is_empty() {
        record.content = format!(
            "Original title: {} <br/> Reason: {} <br/> {}",
            record.original_title, revision.reason, record.content
        );
    }
    record.revision = Some(revision);
}

/// `%g`-style shortest form: plain decimals for `1e-4 <= |x| < 1e6`, otherwise
/// `1e-05` / `1.5e+06`.
fn format_score(x: f64) -> String {
    if x == 0.0 || !x.is_finite() {
        return x.to_string();
    }
    let sci = format!("{:e}", x);
    let (mantissa, exp) = match sci.split_once('e').and_then(|(m, e)| Some((m, e.parse::<i32>().ok()?))) {
        Some(parts) => parts,
        None => return x.to_string(),
    };
    if (-4..6).contains(&exp) {
        x.to_string()
    } else {
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    }
}
