// Command argument handling
//
// DBGp commands carry space-delimited flag/value pairs. Flags are keyed by
// name, so appending the same flag twice overwrites, and serialization order
// is deterministic (sorted by flag name). DBGp itself does not care about
// flag order.

use std::collections::BTreeMap;

/// The flag/value pairs of one DBGp command.
#[derive(Debug, Clone, Default)]
pub struct MessageArguments {
    arguments: BTreeMap<String, String>,
}

impl MessageArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bare flag with no value.
    pub fn append(self, name: &str) -> Self {
        self.append_with(name, "")
    }

    /// Append a flag with a value, overwriting any previous value for the
    /// same flag.
    pub fn append_with(mut self, name: &str, value: &str) -> Self {
        self.arguments.insert(name.to_string(), value.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }

    /// Render the arguments for the wire. Empty values are emitted as bare
    /// flags; non-empty values are double-quoted verbatim. No escaping is
    /// performed on the value.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.arguments {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(name);
            if !value.is_empty() {
                out.push_str(" \"");
                out.push_str(value);
                out.push('"');
            }
        }
        out
    }
}
