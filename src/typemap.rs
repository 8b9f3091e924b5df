// Engine type mapping
//
// The engine declares its own type names via typemap_get; each maps onto a
// small fixed set of common kinds plus an optional xsi type string.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DbgpError, DbgpResult};

/// The common value kinds every engine type maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommonType {
    Bool,
    Int,
    Float,
    String,
    Null,
    Array,
    Hash,
    Object,
    Resource,
    #[default]
    Undefined,
}

impl CommonType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommonType::Bool => "bool",
            CommonType::Int => "int",
            CommonType::Float => "float",
            CommonType::String => "string",
            CommonType::Null => "null",
            CommonType::Array => "array",
            CommonType::Hash => "hash",
            CommonType::Object => "object",
            CommonType::Resource => "resource",
            CommonType::Undefined => "undefined",
        }
    }

    /// Unrecognized kind strings map to Undefined, not an error.
    pub fn from_str(s: &str) -> CommonType {
        match s {
            "bool" => CommonType::Bool,
            "int" => CommonType::Int,
            "float" => CommonType::Float,
            "string" => CommonType::String,
            "null" => CommonType::Null,
            "array" => CommonType::Array,
            "hash" => CommonType::Hash,
            "object" => CommonType::Object,
            "resource" => CommonType::Resource,
            _ => CommonType::Undefined,
        }
    }
}

/// One engine-declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Type {
    pub common: CommonType,
    pub name: String,
    pub xsi_type: String,
}

impl Default for Type {
    fn default() -> Self {
        Type {
            common: CommonType::Undefined,
            name: "?".to_string(),
            xsi_type: String::new(),
        }
    }
}

impl Type {
    pub fn new(common: CommonType, name: &str, xsi_type: &str) -> Self {
        Type {
            common,
            name: name.to_string(),
            xsi_type: xsi_type.to_string(),
        }
    }
}

/// The engine's wire-type-name to Type map, fetched once per connection.
#[derive(Debug, Clone, Default)]
pub struct Typemap {
    types: HashMap<String, Type>,
}

impl Typemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, t: Type) {
        self.types.insert(t.name.clone(), t);
    }

    pub fn get(&self, name: &str) -> DbgpResult<&Type> {
        self.types
            .get(name)
            .ok_or_else(|| DbgpError::NotFound(format!("unknown engine type '{}'", name)))
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_type_round_trip() {
        for kind in [
            CommonType::Bool,
            CommonType::Int,
            CommonType::Float,
            CommonType::String,
            CommonType::Null,
            CommonType::Array,
            CommonType::Hash,
            CommonType::Object,
            CommonType::Resource,
            CommonType::Undefined,
        ] {
            assert_eq!(CommonType::from_str(kind.as_str()), kind);
        }
        assert_eq!(CommonType::from_str("wibble"), CommonType::Undefined);
    }

    #[test]
    fn test_typemap_lookup() {
        let mut map = Typemap::new();
        map.add(Type::new(CommonType::Bool, "bool", "xsd:boolean"));
        map.add(Type::new(CommonType::String, "string", "xsd:string"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("bool").unwrap().common, CommonType::Bool);
        assert!(matches!(map.get("unicorn"), Err(DbgpError::NotFound(_))));
    }

    #[test]
    fn test_default_type_is_undefined() {
        let t = Type::default();
        assert_eq!(t.common, CommonType::Undefined);
        assert_eq!(t.name, "?");
    }
}
