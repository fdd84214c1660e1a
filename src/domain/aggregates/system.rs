//! Integrated System Aggregate

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An external platform that sells its products through this service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegratedSystem {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegratedSystem {
    pub fn create(name: impl Into<String>) -> Result<Self, SystemError> {
        let name = name.into().trim().to_string();
        let slug = slugify(&name);
        if slug.is_empty() { return Err(SystemError::MissingName); }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), name, slug, description: String::new(), api_key: generate_api_key(),
            webhook_url: None, is_active: true, created_at: now, updated_at: now,
        })
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn rotate_api_key(&mut self) { self.api_key = generate_api_key(); self.touch(); }
    pub fn deactivate(&mut self) { self.is_active = false; self.touch(); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Lower-case, with every run of non-alphanumerics collapsed into one dash.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn generate_api_key() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(40).map(char::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SystemError { MissingName }
impl std::error::Error for SystemError {}
impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Integrated system needs a name") }
}
