// Variable contexts
//
// A context is one variable scope at one stack depth (locals, globals,
// constants). Properties are fetched on first access and cached until
// update_properties() discards them.

use std::collections::BTreeMap;

use tracing::debug;

use crate::arguments::MessageArguments;
use crate::connection::Connection;
use crate::error::{DbgpError, DbgpResult};
use crate::property::{parse_property, Property};

/// One variable scope at one stack depth. Cloning copies the cached
/// property trees.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: String,
    pub name: String,
    level: u32,
    properties: BTreeMap<String, Property>,
    retrieved: bool,
}

impl Context {
    pub(crate) fn new(id: &str, name: &str, level: u32) -> Self {
        Context {
            id: id.to_string(),
            name: name.to_string(),
            level,
            properties: BTreeMap::new(),
            retrieved: false,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// One property of this context by name, fetching the context on first
    /// access.
    pub async fn get_property(
        &mut self,
        connection: &Connection,
        name: &str,
    ) -> DbgpResult<&Property> {
        self.retrieve_properties(connection).await?;
        self.properties
            .get(name)
            .ok_or_else(|| DbgpError::NotFound(format!("no property '{}' in context", name)))
    }

    /// All properties of this context, fetching on first access.
    pub async fn get_properties(
        &mut self,
        connection: &Connection,
    ) -> DbgpResult<&BTreeMap<String, Property>> {
        self.retrieve_properties(connection).await?;
        Ok(&self.properties)
    }

    /// Discard the cached properties and refetch them.
    pub async fn update_properties(&mut self, connection: &Connection) -> DbgpResult<()> {
        self.properties.clear();
        self.retrieved = false;
        self.retrieve_properties(connection).await
    }

    async fn retrieve_properties(&mut self, connection: &Connection) -> DbgpResult<()> {
        if self.retrieved {
            return Ok(());
        }

        let args = MessageArguments::new()
            .append_with("-d", &self.level.to_string())
            .append_with("-c", &self.id);
        let root = connection.link().send_wait("context_get", args, None).await?;

        for element in root.children_named("property") {
            let property = parse_property(element, connection.typemap(), self.level, &self.id);
            self.properties.insert(property.name.clone(), property);
        }
        self.retrieved = true;

        debug!(
            "retrieved {} properties for context '{}' at depth {}",
            self.properties.len(),
            self.name,
            self.level
        );
        Ok(())
    }
}
