// Breakpoint lifecycle
//
// A breakpoint starts inert. The first type setter performs breakpoint_set
// and captures the server-assigned id; every later mutation goes out as
// breakpoint_update. Dropping a set breakpoint makes a best-effort attempt
// to remove it engine-side.

use tracing::{debug, warn};

use crate::arguments::MessageArguments;
use crate::error::{DbgpError, DbgpResult};
use crate::eventloop::Link;
use crate::xml::Element;

/// Hit count comparisons an engine can apply before triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition {
    /// Trigger when hit count >= hit value.
    Ge,
    /// Trigger when hit count == hit value.
    Eq,
    /// Trigger when hit count is a multiple of hit value.
    Mult,
}

impl HitCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            HitCondition::Ge => ">=",
            HitCondition::Eq => "==",
            HitCondition::Mult => "%",
        }
    }

    pub fn from_str(s: &str) -> Option<HitCondition> {
        match s {
            ">=" => Some(HitCondition::Ge),
            "==" => Some(HitCondition::Eq),
            "%" => Some(HitCondition::Mult),
            _ => None,
        }
    }
}

/// What a breakpoint triggers on. A breakpoint has exactly one kind at a
/// time; setting a new kind replaces the old one on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Break when a line of a file is reached.
    Line { file: String, line: u32 },
    /// Break when a function is entered.
    Call { function: String },
    /// Break when a function returns.
    Return { function: String },
    /// Break when an exception is thrown.
    Exception { exception: String },
    /// Break when an expression evaluates to true.
    Conditional { expression: String },
    /// Break when the watched expression changes.
    Watch { expression: String },
}

impl BreakpointKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            BreakpointKind::Line { .. } => "line",
            BreakpointKind::Call { .. } => "call",
            BreakpointKind::Return { .. } => "return",
            BreakpointKind::Exception { .. } => "exception",
            BreakpointKind::Conditional { .. } => "conditional",
            BreakpointKind::Watch { .. } => "watch",
        }
    }
}

/// One breakpoint, usually owned by its connection.
#[derive(Debug)]
pub struct Breakpoint {
    link: Link,
    kind: Option<BreakpointKind>,
    enabled: bool,
    temporary: bool,
    hit_condition: HitCondition,
    hit_value: u32,
    hit_count: u32,
    id: String,
    is_set: bool,
    removed: bool,
}

impl Breakpoint {
    pub(crate) fn new(link: Link) -> Self {
        Breakpoint {
            link,
            kind: None,
            enabled: true,
            temporary: false,
            hit_condition: HitCondition::Ge,
            hit_value: 0,
            hit_count: 0,
            id: String::new(),
            is_set: false,
            removed: false,
        }
    }

    /// Server-assigned id, empty until the breakpoint has been set.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the engine knows about this breakpoint.
    pub fn is_set(&self) -> bool {
        self.is_set && !self.removed
    }

    pub fn kind(&self) -> Option<&BreakpointKind> {
        self.kind.as_ref()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn temporary(&self) -> bool {
        self.temporary
    }

    /// Hit condition applied against the hit value; a hit value of 0 with
    /// the default >= condition triggers on every hit.
    pub fn hit_condition(&self) -> HitCondition {
        self.hit_condition
    }

    pub fn hit_value(&self) -> u32 {
        self.hit_value
    }

    /// Times the engine reports this breakpoint was hit. Refreshed by
    /// [`Breakpoint::get`].
    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    pub async fn set_line_type(&mut self, file: &str, line: u32) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Line {
            file: file.to_string(),
            line,
        })
        .await
    }

    pub async fn set_call_type(&mut self, function: &str) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Call {
            function: function.to_string(),
        })
        .await
    }

    pub async fn set_return_type(&mut self, function: &str) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Return {
            function: function.to_string(),
        })
        .await
    }

    pub async fn set_exception_type(&mut self, exception: &str) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Exception {
            exception: exception.to_string(),
        })
        .await
    }

    pub async fn set_conditional_type(&mut self, expression: &str) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Conditional {
            expression: expression.to_string(),
        })
        .await
    }

    pub async fn set_watch_type(&mut self, expression: &str) -> DbgpResult<()> {
        self.set_kind(BreakpointKind::Watch {
            expression: expression.to_string(),
        })
        .await
    }

    pub async fn set_enabled(&mut self, enabled: bool) -> DbgpResult<()> {
        self.enabled = enabled;
        self.sync().await
    }

    pub async fn set_temporary(&mut self, temporary: bool) -> DbgpResult<()> {
        self.temporary = temporary;
        self.sync().await
    }

    pub async fn set_hit_condition(
        &mut self,
        condition: HitCondition,
        value: u32,
    ) -> DbgpResult<()> {
        self.hit_condition = condition;
        self.hit_value = value;
        self.sync().await
    }

    pub async fn set_hit_value(&mut self, value: u32) -> DbgpResult<()> {
        self.hit_value = value;
        self.sync().await
    }

    /// Refresh this breakpoint's fields from the engine. A no-op for a
    /// breakpoint that has never been set.
    pub async fn get(&mut self) -> DbgpResult<()> {
        if !self.is_set() {
            return Ok(());
        }

        let args = MessageArguments::new().append_with("-d", &self.id);
        let root = self.link.send_wait("breakpoint_get", args, None).await?;
        let element = root.find_child("breakpoint").ok_or_else(|| {
            DbgpError::MalformedDocument("breakpoint_get response without breakpoint".into())
        })?;
        self.apply_element(element);
        Ok(())
    }

    /// Remove the breakpoint, telling the engine to drop it.
    pub async fn remove(mut self) -> DbgpResult<()> {
        if !self.is_set() {
            self.removed = true;
            return Ok(());
        }
        self.removed = true;

        let args = MessageArguments::new().append_with("-d", &self.id);
        self.link.send_wait("breakpoint_remove", args, None).await?;
        Ok(())
    }

    async fn set_kind(&mut self, kind: BreakpointKind) -> DbgpResult<()> {
        self.kind = Some(kind);
        self.sync().await
    }

    /// Push the full current state to the engine. The first sync is a
    /// breakpoint_set and captures the id; every later sync re-sends the
    /// complete state as breakpoint_update.
    async fn sync(&mut self) -> DbgpResult<()> {
        let Some(kind) = self.kind.clone() else {
            // No type yet; state is applied with the first breakpoint_set.
            return Ok(());
        };

        let mut args = MessageArguments::new()
            .append_with("-t", kind.type_name())
            .append_with("-s", if self.enabled { "enabled" } else { "disabled" })
            .append_with("-r", if self.temporary { "1" } else { "0" })
            .append_with("-h", &self.hit_value.to_string())
            .append_with("-o", self.hit_condition.as_str());

        let mut data: Option<Vec<u8>> = None;
        match &kind {
            BreakpointKind::Line { file, line } => {
                args = args
                    .append_with("-f", file)
                    .append_with("-n", &line.to_string());
            }
            BreakpointKind::Call { function } | BreakpointKind::Return { function } => {
                args = args.append_with("-m", function);
            }
            BreakpointKind::Exception { exception } => {
                args = args.append_with("-x", exception);
            }
            BreakpointKind::Conditional { expression } | BreakpointKind::Watch { expression } => {
                data = Some(expression.clone().into_bytes());
            }
        }

        let command = if self.is_set {
            args = args.append_with("-d", &self.id);
            "breakpoint_update"
        } else {
            "breakpoint_set"
        };

        let root = self.link.send_wait(command, args, data.as_deref()).await?;

        if !self.is_set {
            self.id = root.attr_or("id", "").to_string();
            self.is_set = true;
            debug!("breakpoint set with id '{}'", self.id);
        }
        Ok(())
    }

    /// Apply a breakpoint_get `<breakpoint>` element to the local fields.
    fn apply_element(&mut self, element: &Element) {
        self.enabled = element.attr_or("state", "enabled") == "enabled";
        self.temporary = element.attr_or("temporary", "0") == "1";
        self.hit_count = element
            .attr("hit_count")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        self.hit_value = element
            .attr("hit_value")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.hit_value);
        if let Some(condition) = element.attr("hit_condition").and_then(HitCondition::from_str) {
            self.hit_condition = condition;
        }

        let expression = element.find_child("expression").map(|e| e.text.clone());
        self.kind = match element.attr_or("type", "") {
            "line" => Some(BreakpointKind::Line {
                file: element.attr_or("filename", "").to_string(),
                line: element
                    .attr("lineno")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            }),
            "call" => Some(BreakpointKind::Call {
                function: element.attr_or("function", "").to_string(),
            }),
            "return" => Some(BreakpointKind::Return {
                function: element.attr_or("function", "").to_string(),
            }),
            "exception" => Some(BreakpointKind::Exception {
                exception: element.attr_or("exception", "").to_string(),
            }),
            "conditional" => Some(BreakpointKind::Conditional {
                expression: expression.unwrap_or_default(),
            }),
            "watch" => Some(BreakpointKind::Watch {
                expression: expression.unwrap_or_default(),
            }),
            _ => self.kind.take(),
        };
    }
}

impl Drop for Breakpoint {
    fn drop(&mut self) {
        if !self.is_set() {
            return;
        }
        let args = MessageArguments::new().append_with("-d", &self.id);
        if self.link.try_fire("breakpoint_remove", args) {
            debug!("queued removal of dropped breakpoint {}", self.id);
        } else {
            warn!("could not queue removal of dropped breakpoint {}", self.id);
        }
    }
}
