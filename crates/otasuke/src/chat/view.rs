/// Where a turn is rendered. Each call is one visible UI operation.
pub trait TurnView: Send {
    /// Show the user's input in the transcript
    fn user_message(&mut self, content: &str);

    /// Replace the contents of the current text slot
    fn render_text(&mut self, text: &str);

    /// Show a notice and open a fresh text slot after it
    fn info(&mut self, message: &str);

    /// Show an error notice with its full detail
    fn error(&mut self, message: &str, detail: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOp {
    User(String),
    Text(String),
    Info(String),
    Error { message: String, detail: String },
}

/// Keeps every operation in order, for tests and for replaying a turn
#[derive(Debug, Default)]
pub struct RecordingView {
    pub ops: Vec<ViewOp>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text renders only, in order
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ViewOp::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn infos(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ViewOp::Info(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ViewOp::Error { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl TurnView for RecordingView {
    fn user_message(&mut self, content: &str) {
        self.ops.push(ViewOp::User(content.to_string()));
    }

    fn render_text(&mut self, text: &str) {
        self.ops.push(ViewOp::Text(text.to_string()));
    }

    fn info(&mut self, message: &str) {
        self.ops.push(ViewOp::Info(message.to_string()));
    }

    fn error(&mut self, message: &str, detail: &str) {
        self.ops.push(ViewOp::Error {
            message: message.to_string(),
            detail: detail.to_string(),
        });
    }
}
