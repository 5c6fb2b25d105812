//! Builds the prompt written to the assistant's stdin.
//!
//! Fixed instruction sections around a single slot for the sanitized user
//! task; the task text is never spliced into an instruction sentence.

use std::path::Path;

use huddle_protocol::protocol::ActionKind;

use crate::context_store::CONTEXT_FILENAME;

/// Entries beyond this many are fair game for the assistant to condense
/// during its own maintenance pass.
const RECENT_ENTRIES_KEPT: usize = 20;

const SECTION_SEPARATOR: &str = "\n\n";

pub struct PromptBuilder<'a> {
    directory: &'a Path,
    action: ActionKind,
    task: &'a str,
    context_line_cap: Option<usize>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(directory: &'a Path, action: ActionKind, task: &'a str) -> Self {
        Self {
            directory,
            action,
            task,
            context_line_cap: None,
        }
    }

    /// Enable the context-maintenance wrapping around the task.
    pub fn with_context(mut self, line_cap: usize) -> Self {
        self.context_line_cap = Some(line_cap);
        self
    }

    pub fn build(self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(line_cap) = self.context_line_cap {
            sections.push(format!(
                "Before doing anything else, read `{CONTEXT_FILENAME}` in the working \
                 directory. It is the persistent memory for this project; treat its \
                 entries as what previous sessions already did."
            ));
            sections.push(format!(
                "After completing the task, append a timestamped summary of what you \
                 did to `{CONTEXT_FILENAME}`. Keep the file maintainable: condense \
                 entries older than the most recent {RECENT_ENTRIES_KEPT}, and never \
                 let the file exceed {line_cap} lines."
            ));
        }

        sections.push(format!(
            "{}\n\n{}",
            action_phrase(self.action),
            self.task
        ));
        sections.push(format!("Working directory: {}", self.directory.display()));

        sections.join(SECTION_SEPARATOR)
    }
}

fn action_phrase(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Generate => "Generate the code or files described below.",
        ActionKind::Analyze => "Analyze this project as described below and report what you find.",
        ActionKind::Refactor => "Refactor the code as described below without changing behavior.",
        ActionKind::Review => "Review the code as described below and report concrete findings.",
        ActionKind::Test => "Write or update tests as described below.",
    }
}
