// Variable properties
//
// A property is one variable (or array element, or object member) at a
// stack depth within a context. Children arrive inline up to the engine's
// depth limit; update() refetches a subtree on demand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arguments::MessageArguments;
use crate::connection::Connection;
use crate::error::{DbgpError, DbgpResult};
use crate::typemap::{Type, Typemap};
use crate::xml::Element;

/// One variable the engine reported.
///
/// Cloning a property deep-copies its whole subtree; the clone is a
/// snapshot and no longer tracks the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub full_name: String,
    pub class_name: String,
    pub address: String,
    pub key: String,
    pub size: u64,
    pub constant: bool,
    pub has_children: bool,
    pub data: String,
    pub ptype: Type,
    pub depth: u32,
    pub context_id: String,
    pub children: BTreeMap<String, Property>,
}

impl Property {
    /// Child property by name.
    pub fn get_child(&self, name: &str) -> DbgpResult<&Property> {
        self.children
            .get(name)
            .ok_or_else(|| DbgpError::NotFound(format!("no child property '{}'", name)))
    }

    /// Refetch this property and its children from the engine.
    pub async fn update(&mut self, connection: &Connection) -> DbgpResult<()> {
        let mut args = MessageArguments::new()
            .append_with("-d", &self.depth.to_string())
            .append_with("-c", &self.context_id)
            .append_with("-n", &self.full_name);
        if !self.address.is_empty() {
            args = args.append_with("-a", &self.address);
        }
        if !self.key.is_empty() {
            args = args.append_with("-k", &self.key);
        }

        let root = connection
            .link()
            .send_wait("property_get", args, None)
            .await?;
        let element = root.find_child("property").ok_or_else(|| {
            DbgpError::MalformedDocument("property_get response without property".into())
        })?;

        debug!("refreshed property '{}'", self.full_name);
        let depth = self.depth;
        let context_id = self.context_id.clone();
        *self = parse_property(element, connection.typemap(), depth, &context_id);
        Ok(())
    }
}

/// Build a property tree from a `<property>` element. Engine types missing
/// from the typemap fall back to the undefined type rather than failing.
pub(crate) fn parse_property(
    element: &Element,
    typemap: &Typemap,
    depth: u32,
    context_id: &str,
) -> Property {
    let type_name = element.attr_or("type", "");
    let ptype = match typemap.get(type_name) {
        Ok(t) => t.clone(),
        Err(_) => {
            debug!("engine type '{}' not in typemap", type_name);
            Type::default()
        }
    };

    let mut children = BTreeMap::new();
    for child in element.children_named("property") {
        let parsed = parse_property(child, typemap, depth, context_id);
        children.insert(parsed.name.clone(), parsed);
    }

    Property {
        name: element.attr_or("name", "").to_string(),
        full_name: element.attr_or("fullname", "").to_string(),
        class_name: element.attr_or("classname", "").to_string(),
        address: element.attr_or("address", "").to_string(),
        key: element.attr_or("key", "").to_string(),
        size: element.attr("size").and_then(|s| s.parse().ok()).unwrap_or(0),
        constant: element.attr_or("constant", "0") == "1",
        has_children: element.attr_or("children", "0") == "1",
        data: element.text.clone(),
        ptype,
        depth,
        context_id: context_id.to_string(),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typemap::CommonType;

    fn typemap() -> Typemap {
        let mut map = Typemap::new();
        map.add(Type::new(CommonType::String, "string", "xsd:string"));
        map.add(Type::new(CommonType::Int, "int", "xsd:int"));
        map.add(Type::new(CommonType::Array, "array", ""));
        map
    }

    #[test]
    fn test_parse_scalar_property() {
        let doc = br#"<property name="$name" fullname="$name" type="string" size="5" constant="0">quux</property>"#;
        let element = Element::parse(doc).unwrap();
        let property = parse_property(&element, &typemap(), 0, "0");

        assert_eq!(property.name, "$name");
        assert_eq!(property.full_name, "$name");
        assert_eq!(property.data, "quux");
        assert_eq!(property.size, 5);
        assert_eq!(property.ptype.common, CommonType::String);
        assert_eq!(property.depth, 0);
        assert_eq!(property.context_id, "0");
        assert!(!property.has_children);
        assert!(property.children.is_empty());
    }

    #[test]
    fn test_parse_array_with_children() {
        let doc = br#"<property name="$arr" fullname="$arr" type="array" children="1" numchildren="2">
            <property name="0" fullname="$arr[0]" type="int">1</property>
            <property name="1" fullname="$arr[1]" type="string" size="2">hi</property>
        </property>"#;
        let element = Element::parse(doc).unwrap();
        let property = parse_property(&element, &typemap(), 1, "0");

        assert_eq!(property.ptype.common, CommonType::Array);
        assert!(property.has_children);
        assert_eq!(property.children.len(), 2);

        let first = property.get_child("0").unwrap();
        assert_eq!(first.full_name, "$arr[0]");
        assert_eq!(first.ptype.common, CommonType::Int);
        assert_eq!(first.data, "1");
        assert_eq!(first.depth, 1);

        assert!(matches!(
            property.get_child("2"),
            Err(DbgpError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_type_falls_back_to_undefined() {
        let doc = br#"<property name="$r" fullname="$r" type="socket"/>"#;
        let element = Element::parse(doc).unwrap();
        let property = parse_property(&element, &typemap(), 0, "0");

        assert_eq!(property.ptype.common, CommonType::Undefined);
        assert_eq!(property.ptype.name, "?");
    }

    #[test]
    fn test_clone_is_deep() {
        let doc = br#"<property name="$arr" fullname="$arr" type="array" children="1">
            <property name="0" fullname="$arr[0]" type="int">1</property>
        </property>"#;
        let element = Element::parse(doc).unwrap();
        let property = parse_property(&element, &typemap(), 0, "0");

        let mut copy = property.clone();
        copy.children.get_mut("0").map(|c| c.data = "99".to_string());

        assert_eq!(property.get_child("0").unwrap().data, "1");
        assert_eq!(copy.get_child("0").unwrap().data, "99");
    }
}
