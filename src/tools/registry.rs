use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::handler::{ToolDefinition, ToolSupplier};
use crate::error::{RegistryError, ToolError};
use crate::schema;

/// Catalog of available tools. Built once at startup, then shared read-only
/// behind an `Arc`. Keeps registration order for listings.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDefinition>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every tool from `suppliers`. Fails on the first duplicate or
    /// malformed definition.
    pub fn from_suppliers<'a, I>(suppliers: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'a dyn ToolSupplier>,
    {
        let mut registry = Self::new();
        for supplier in suppliers {
            for tool in supplier.tools() {
                registry.register(tool)?;
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        validate_definition(&definition)?;
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(Arc::new(definition));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(mut self, definition: ToolDefinition) -> Result<Self, RegistryError> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDefinition>, ToolError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ToolError::tool_not_found(name))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ToolDefinition>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Listing entries for every tool, in registration order.
    pub fn descriptors(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Search tools by keyword against name and description. Returns compact
    /// summaries (name + description only) for discovery.
    pub fn search(&self, query: &str) -> Vec<Value> {
        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();

        self.tools
            .iter()
            .filter(|t| {
                let haystack = format!("{} {}", t.name, t.description).to_lowercase();
                terms.iter().any(|term| haystack.contains(term))
            })
            .map(|t| json!({ "name": t.name, "description": t.description }))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

fn validate_definition(def: &ToolDefinition) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidDefinition {
        name: def.name.clone(),
        reason: reason.to_string(),
    };

    if def.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if !def.params_schema.is_object() {
        return Err(invalid("params schema must be a JSON object"));
    }
    if let Some(result_schema) = &def.result_schema {
        if !schema::is_schema(result_schema) {
            return Err(invalid("result schema must be a JSON object or boolean"));
        }
    }
    if def.timeout.is_some_and(|t| t.is_zero()) {
        return Err(invalid("timeout override must be greater than zero"));
    }
    if def.max_concurrency == Some(0) {
        return Err(invalid("concurrency override must be at least 1"));
    }
    Ok(())
}
