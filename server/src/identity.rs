use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// A caller whose identity has already been verified by an [`IdentityProvider`].
/// The ledger treats the inner key as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(String);

impl Principal {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityProvider: Send + Sync {
    /// Exchange a credential presented by a client for the principal it belongs to.
    fn verify(&self, credential: &str) -> Option<Principal>;
}

#[derive(Deserialize, Debug, Default)]
struct TokenFile {
    tokens: HashMap<String, String>,
}

/// Bearer tokens mapped to principals, loaded from a YAML file of the form
///
/// ```yaml
/// tokens:
///   5f0c9a: alice
/// ```
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Principal>,
}

impl StaticTokens {
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let file: TokenFile = serde_yaml::from_str(contents).context("malformed identities file")?;
        let tokens = file
            .tokens
            .into_iter()
            .filter(|(token, user)| !token.trim().is_empty() && !user.trim().is_empty())
            .map(|(token, user)| (token, Principal::new(user)))
            .collect();
        Ok(Self { tokens })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read identities from {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for StaticTokens {
    fn verify(&self, credential: &str) -> Option<Principal> {
        self.tokens.get(credential).cloned()
    }
}
