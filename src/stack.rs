// Call stack snapshots
//
// Fetching the stack asks for the depth, then each level and its context
// names individually. A snapshot is only meaningful while the engine stays
// in the break it was taken at.

use tracing::warn;

use crate::arguments::MessageArguments;
use crate::connection::Connection;
use crate::context::Context;
use crate::error::{DbgpError, DbgpResult};
use crate::xml::Element;

/// A line and character offset within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line_no: u32,
    pub text_offset: u32,
}

impl Location {
    /// Parse the "line:offset" form used by cmdbegin/cmdend attributes.
    pub fn parse(s: &str) -> Option<Location> {
        let (line, offset) = s.split_once(':')?;
        Some(Location {
            line_no: line.parse().ok()?,
            text_offset: offset.parse().ok()?,
        })
    }
}

/// What kind of code a stack level is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackLevelType {
    File,
    Eval,
}

impl StackLevelType {
    fn from_str(s: &str) -> StackLevelType {
        match s {
            "eval" => StackLevelType::Eval,
            _ => StackLevelType::File,
        }
    }
}

/// One level of the call stack. Level 0 is the innermost frame.
#[derive(Debug, Clone)]
pub struct StackLevel {
    pub level: u32,
    pub level_type: StackLevelType,
    pub file_uri: String,
    pub line_no: u32,
    pub function: String,
    pub cmd_begin: Option<Location>,
    pub cmd_end: Option<Location>,
    contexts: Vec<Context>,
}

impl StackLevel {
    pub(crate) async fn fetch(connection: &Connection, level: u32) -> DbgpResult<StackLevel> {
        let args = MessageArguments::new().append_with("-d", &level.to_string());
        let root = connection.link().send_wait("stack_get", args, None).await?;
        let element = root.find_child("stack").ok_or_else(|| {
            DbgpError::MalformedDocument("stack_get response without stack element".into())
        })?;
        let mut stack_level = parse_stack_level(element, level);

        let args = MessageArguments::new().append_with("-d", &level.to_string());
        let root = connection
            .link()
            .send_wait("context_names", args, None)
            .await?;
        for context in root.children_named("context") {
            stack_level.contexts.push(Context::new(
                context.attr_or("id", ""),
                context.attr_or("name", ""),
                level,
            ));
        }

        Ok(stack_level)
    }

    /// The variable contexts available at this level.
    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut [Context] {
        &mut self.contexts
    }

    /// Context by its engine-assigned id.
    pub fn get_context(&mut self, id: &str) -> DbgpResult<&mut Context> {
        self.contexts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DbgpError::NotFound(format!("no context '{}' at this level", id)))
    }
}

/// A snapshot of the engine's call stack, innermost frame first.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    levels: Vec<StackLevel>,
}

impl Stack {
    pub(crate) async fn fetch(connection: &Connection) -> DbgpResult<Stack> {
        let root = connection
            .link()
            .send_wait("stack_depth", MessageArguments::new(), None)
            .await?;
        let depth: u32 = root
            .attr("depth")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                DbgpError::MalformedDocument("stack_depth response without depth".into())
            })?;

        let mut levels = Vec::new();
        for level in 0..depth {
            match StackLevel::fetch(connection, level).await {
                Ok(stack_level) => levels.push(stack_level),
                // The stack can shrink between stack_depth and stack_get;
                // the engine reports the vanished level as error 301.
                Err(e) if e.engine_code() == Some(301) => {
                    warn!("stack level {} vanished during fetch: {}", level, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Stack { levels })
    }

    pub fn depth(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn levels(&self) -> &[StackLevel] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [StackLevel] {
        &mut self.levels
    }

    pub fn get_level(&mut self, level: u32) -> DbgpResult<&mut StackLevel> {
        self.levels
            .iter_mut()
            .find(|l| l.level == level)
            .ok_or_else(|| DbgpError::NotFound(format!("no stack level {}", level)))
    }
}

fn parse_stack_level(element: &Element, level: u32) -> StackLevel {
    StackLevel {
        level,
        level_type: StackLevelType::from_str(element.attr_or("type", "file")),
        file_uri: element.attr_or("filename", "").to_string(),
        line_no: element
            .attr("lineno")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        function: element.attr_or("where", "").to_string(),
        cmd_begin: element.attr("cmdbegin").and_then(Location::parse),
        cmd_end: element.attr("cmdend").and_then(Location::parse),
        contexts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse() {
        assert_eq!(
            Location::parse("12:4"),
            Some(Location {
                line_no: 12,
                text_offset: 4
            })
        );
        assert_eq!(Location::parse("12"), None);
        assert_eq!(Location::parse("a:b"), None);
    }

    #[test]
    fn test_parse_stack_level() {
        let doc = br#"<stack level="1" type="file" filename="file:///srv/index.php" lineno="42" where="render" cmdbegin="42:0" cmdend="42:17"/>"#;
        let element = Element::parse(doc).unwrap();
        let level = parse_stack_level(&element, 1);

        assert_eq!(level.level, 1);
        assert_eq!(level.level_type, StackLevelType::File);
        assert_eq!(level.file_uri, "file:///srv/index.php");
        assert_eq!(level.line_no, 42);
        assert_eq!(level.function, "render");
        assert_eq!(
            level.cmd_begin,
            Some(Location {
                line_no: 42,
                text_offset: 0
            })
        );
    }

    #[test]
    fn test_parse_eval_level_defaults() {
        let doc = br#"<stack level="0" type="eval" lineno="1"/>"#;
        let element = Element::parse(doc).unwrap();
        let level = parse_stack_level(&element, 0);

        assert_eq!(level.level_type, StackLevelType::Eval);
        assert_eq!(level.file_uri, "");
        assert_eq!(level.cmd_begin, None);
    }
}
