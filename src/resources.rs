//! Resources and prompts served next to tools.
//!
//! Content strategies are supplied by the embedding application and keyed by
//! name in a [`StrategyRegistry`], built once and handed to the server
//! builder.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RegistryError, ToolError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub key: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub key: String,
    pub mime_type: String,
    pub text: String,
}

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn describe(&self) -> ResourceDescriptor;

    async fn read(&self) -> Result<ResourceContent, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait PromptProvider: Send + Sync {
    fn describe(&self) -> PromptDescriptor;

    /// Render with arguments already checked for presence of required ones.
    async fn render(&self, args: &Map<String, Value>) -> Result<Vec<PromptMessage>, ToolError>;
}

/// Named strategies of one kind, ordered by key.
pub struct StrategyRegistry<T: ?Sized> {
    entity: &'static str,
    entries: BTreeMap<String, Arc<T>>,
}

pub type ResourceRegistry = StrategyRegistry<dyn ResourceProvider>;
pub type PromptRegistry = StrategyRegistry<dyn PromptProvider>;

impl<T: ?Sized> fmt::Debug for StrategyRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("entity", &self.entity)
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: ?Sized> StrategyRegistry<T> {
    /// `entity` names what a failed lookup could not find ("resource", "prompt").
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, key: impl Into<String>, strategy: Arc<T>) -> Result<(), RegistryError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        self.entries.insert(key, strategy);
        Ok(())
    }

    pub fn with(mut self, key: impl Into<String>, strategy: Arc<T>) -> Result<Self, RegistryError> {
        self.register(key, strategy)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Result<Arc<T>, ToolError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| ToolError::not_found(self.entity, key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new("resource")
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new("prompt")
    }
}

/// Fails with `InvalidParams` naming every required argument that is missing.
pub fn check_prompt_args(
    descriptor: &PromptDescriptor,
    args: &Map<String, Value>,
) -> Result<(), ToolError> {
    let missing: Vec<String> = descriptor
        .arguments
        .iter()
        .filter(|a| a.required && !args.contains_key(&a.name))
        .map(|a| a.name.clone())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ToolError::invalid_params(
        format!(
            "prompt {} is missing required arguments: {}",
            descriptor.name,
            missing.join(", ")
        ),
        missing,
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    struct Readme;

    #[async_trait]
    impl ResourceProvider for Readme {
        fn describe(&self) -> ResourceDescriptor {
            ResourceDescriptor {
                key: "docs://readme".into(),
                name: "README".into(),
                description: "Project readme".into(),
                mime_type: "text/markdown".into(),
            }
        }

        async fn read(&self) -> Result<ResourceContent, ToolError> {
            Ok(ResourceContent {
                key: "docs://readme".into(),
                mime_type: "text/markdown".into(),
                text: "# App".into(),
            })
        }
    }

    struct NewScreen;

    #[async_trait]
    impl PromptProvider for NewScreen {
        fn describe(&self) -> PromptDescriptor {
            PromptDescriptor {
                name: "new_screen".into(),
                description: "Plan a new screen".into(),
                arguments: vec![PromptArgument {
                    name: "screen".into(),
                    description: "Screen name".into(),
                    required: true,
                }],
            }
        }

        async fn render(&self, args: &Map<String, Value>) -> Result<Vec<PromptMessage>, ToolError> {
            Ok(vec![PromptMessage::user(format!("Add a {} screen", args["screen"]))])
        }
    }

    #[tokio::test]
    async fn lookup_by_key() {
        let registry = ResourceRegistry::default()
            .with("docs://readme", Arc::new(Readme))
            .unwrap();
        let content = registry.get("docs://readme").unwrap().read().await.unwrap();
        assert_eq!(content.text, "# App");
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["docs://readme"]);
    }

    #[test]
    fn missing_key_is_not_found() {
        let registry = PromptRegistry::default();
        let err = registry.get("nope").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "prompt not found: nope");
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut registry = ResourceRegistry::default();
        registry.register("a", Arc::new(Readme)).unwrap();
        assert!(registry.register("a", Arc::new(Readme)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn required_prompt_args() {
        let descriptor = NewScreen.describe();
        let mut args = Map::new();
        let err = check_prompt_args(&descriptor, &args).unwrap_err();
        assert_eq!(err.data().unwrap()["fields"], json!(["screen"]));

        args.insert("screen".into(), json!("settings"));
        assert!(check_prompt_args(&descriptor, &args).is_ok());
    }
}
