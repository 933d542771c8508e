//! Job context - template variables for commands

use crate::core::trigger::{RefKind, TriggerEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Variables available to the commands of one job instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobContext {
    /// Built-in and user-defined variables
    pub variables: HashMap<String, String>,

    /// Label of the job instance (if any)
    pub instance: Option<String>,
}

impl JobContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with workflow variables and the trigger event
    pub fn for_event(workflow_variables: &HashMap<String, String>, event: &TriggerEvent) -> Self {
        let mut context = Self::new();
        context.variables.extend(workflow_variables.clone());

        context.set_variable("event", event.kind.as_str());
        context.set_variable("ref", event.git_ref.as_str());
        context.set_variable("ref_name", event.git_ref.short_name());
        context.set_variable("sha", event.sha.as_deref().unwrap_or_default());
        if event.git_ref.kind() == RefKind::Tag {
            context.set_variable("tag", event.git_ref.short_name());
        }

        context
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Set a variable holding a path
    pub fn set_path(&mut self, key: &str, path: &Path) {
        self.set_variable(key, path.to_string_lossy().into_owned());
    }

    /// Get a variable
    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    /// Replace `{{ name }}` placeholders; unknown names are left as-is
    ///
    /// A single left-to-right pass, so substituted values are never rendered again.
    pub fn render(&self, template: &str) -> String {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(OPEN) {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + OPEN.len()..];
            match after.find(CLOSE) {
                Some(end) if is_variable_name(&after[..end]) => {
                    let name = &after[..end];
                    match self.variables.get(name) {
                        Some(value) => rendered.push_str(value),
                        None => rendered.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]),
                    }
                    rest = &after[end + CLOSE.len()..];
                }
                _ => {
                    rendered.push_str(OPEN);
                    rest = after;
                }
            }
        }

        rendered.push_str(rest);
        rendered
    }
}

const OPEN: &str = "{{ ";
const CLOSE: &str = " }}";

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
