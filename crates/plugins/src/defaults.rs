//! Default single-slot plugins: in-memory auth and a static system
//! prompt library. Deployments override either by registering a
//! higher-priority plugin for the role.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use weft_domain::Result;

use crate::roles::{AuthPlugin, CorePlugin, SystemPromptPlugin};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StaticAuth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured user.
#[derive(Debug, Clone)]
pub struct StaticUser {
    pub password: String,
    /// Model names this user may call; `"*"` grants everything.
    pub allowed_models: Vec<String>,
}

/// Auth against a fixed user table, with opaque in-memory session
/// tokens. Suitable for single-box deployments and tests.
pub struct StaticAuth {
    users: HashMap<String, StaticUser>,
    /// token -> user_id
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticAuth {
    pub fn new(users: HashMap<String, StaticUser>) -> Self {
        Self {
            users,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// A single user allowed to use every model.
    pub fn single_user(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        let mut users = HashMap::new();
        users.insert(
            user_id.into(),
            StaticUser {
                password: password.into(),
                allowed_models: vec!["*".into()],
            },
        );
        Self::new(users)
    }
}

#[async_trait]
impl CorePlugin for StaticAuth {
    fn name(&self) -> &str {
        "static-auth"
    }
}

#[async_trait]
impl AuthPlugin for StaticAuth {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<String>> {
        match self.users.get(username) {
            Some(user) if user.password == password => Ok(Some(username.to_owned())),
            _ => Ok(None),
        }
    }

    async fn issue_token(&self, user_id: &str) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        self.tokens
            .write()
            .insert(token.clone(), user_id.to_owned());
        Ok(token)
    }

    async fn verify_token(&self, token: &str) -> Result<Option<String>> {
        Ok(self.tokens.read().get(token).cloned())
    }

    async fn authorize_model(&self, user_id: &str, model: &str) -> Result<bool> {
        let Some(user) = self.users.get(user_id) else {
            return Ok(false);
        };
        Ok(user
            .allowed_models
            .iter()
            .any(|m| m == "*" || m == model))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PromptLibrary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System prompts resolved from a fixed key -> text map.
pub struct PromptLibrary {
    prompts: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn new(prompts: HashMap<String, String>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl CorePlugin for PromptLibrary {
    fn name(&self) -> &str {
        "prompt-library"
    }
}

#[async_trait]
impl SystemPromptPlugin for PromptLibrary {
    async fn get_prompt(&self, key: &str) -> Result<Option<String>> {
        // Empty text means "no system prompt" rather than a prompt of "".
        Ok(self
            .prompts
            .get(key)
            .filter(|text| !text.is_empty())
            .cloned())
    }
}
