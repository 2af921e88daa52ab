//! Terminal rendering of session snapshots.

use crate::session::SessionSnapshot;

/// Turns successive snapshots into append-only terminal output.
#[derive(Debug, Default)]
pub struct LivePrinter {
    printed: String,
    last_tool: Option<String>,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for this snapshot, if anything changed.
    pub fn render(&mut self, snapshot: &SessionSnapshot) -> Option<String> {
        let mut out = String::new();

        if let Some(tool) = &snapshot.active_tool {
            if self.last_tool.as_deref() != Some(tool.call_id.as_str()) {
                if !self.printed.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("[tool {}]\n", tool.function_name));
                self.last_tool = Some(tool.call_id.clone());
                self.printed.clear();
            }
        }

        if !snapshot.showing_placeholder && !snapshot.text.is_empty() {
            match snapshot.text.strip_prefix(self.printed.as_str()) {
                Some(suffix) => out.push_str(suffix),
                None => {
                    // Buffer restarted (tool phase or interpretation pass).
                    out.push('\n');
                    out.push_str(&snapshot.text);
                }
            }
            self.printed = snapshot.text.clone();
        }

        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
