//! Result buffers for compile diagnostics.
//!
//! Every AST carries its own buffer, and the compile project aggregates
//! all of them. Messages are deduplicated by (kind, line, column, text) on
//! insert; transfers between buffers additionally skip messages whose
//! random tag was already absorbed, so repeated transfers stay idempotent.

use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Error,
    Warning,
    Info,
}

/// One diagnostic. `line`/`column` are 1-based; -1 means "no position".
#[derive(Debug, Clone)]
pub struct ResultMessage {
    pub kind: MessageKind,
    pub message: String,
    pub file_uri: Option<String>,
    pub line: i64,
    pub column: i64,
    /// Random tag identifying this exact message instance across buffers.
    pub id: [u8; 32],
}

impl ResultMessage {
    pub fn new(
        kind: MessageKind,
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) -> ResultMessage {
        ResultMessage {
            kind,
            message: message.into(),
            file_uri: file_uri.map(|s| s.to_owned()),
            line,
            column,
            id: rand::random(),
        }
    }

    pub fn error(
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) -> ResultMessage {
        ResultMessage::new(MessageKind::Error, message, file_uri, line, column)
    }

    pub fn warning(
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) -> ResultMessage {
        ResultMessage::new(MessageKind::Warning, message, file_uri, line, column)
    }

    pub fn with_file_uri(mut self, file_uri: &str) -> ResultMessage {
        if self.file_uri.is_none() {
            self.file_uri = Some(file_uri.to_owned());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResultMessages {
    pub success: bool,
    pub messages: Vec<ResultMessage>,
    absorbed_ids: FxHashSet<[u8; 32]>,
}

impl Default for ResultMessages {
    fn default() -> ResultMessages {
        ResultMessages::new()
    }
}

impl ResultMessages {
    pub fn new() -> ResultMessages {
        ResultMessages {
            success: true,
            messages: Vec::new(),
            absorbed_ids: FxHashSet::default(),
        }
    }

    fn is_duplicate(&self, msg: &ResultMessage) -> bool {
        self.messages.iter().any(|m| {
            m.kind == msg.kind
                && m.line == msg.line
                && m.column == msg.column
                && m.message == msg.message
        })
    }

    /// Insert a message, deduplicating by (kind, line, column, message).
    /// An error message also marks the whole buffer as failed.
    pub fn push(&mut self, msg: ResultMessage) {
        if msg.kind == MessageKind::Error {
            self.success = false;
        }
        self.absorbed_ids.insert(msg.id);
        if self.is_duplicate(&msg) {
            return;
        }
        self.messages.push(msg);
    }

    pub fn add_error(
        &mut self,
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) {
        self.push(ResultMessage::error(message, file_uri, line, column));
    }

    pub fn add_warning(
        &mut self,
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) {
        self.push(ResultMessage::warning(message, file_uri, line, column));
    }

    pub fn add_info(
        &mut self,
        message: impl Into<String>,
        file_uri: Option<&str>,
        line: i64,
        column: i64,
    ) {
        self.push(ResultMessage::new(
            MessageKind::Info,
            message,
            file_uri,
            line,
            column,
        ));
    }

    /// Copy all messages from another buffer into this one, skipping
    /// anything this buffer already absorbed in a previous transfer.
    pub fn transfer_from(&mut self, other: &ResultMessages) {
        if !other.success {
            self.success = false;
        }
        for msg in &other.messages {
            if self.absorbed_ids.contains(&msg.id) {
                continue;
            }
            self.push(msg.clone());
        }
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.kind == MessageKind::Error)
    }

    pub fn error_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.kind == MessageKind::Error)
            .count()
    }
}

/// Bail out of a lexing/parsing routine with a syntax error message.
#[macro_export]
macro_rules! return_syntax_error {
    ($line:expr, $column:expr, $($arg:tt)*) => {
        return Err($crate::compiler::compiler_messages::results::ResultMessage::error(
            format!($($arg)*),
            None,
            $line,
            $column,
        ))
    };
}

/// Bail out with an error that indicates a compiler bug, not a user mistake.
#[macro_export]
macro_rules! return_internal_error {
    ($line:expr, $column:expr, $($arg:tt)*) => {
        return Err($crate::compiler::compiler_messages::results::ResultMessage::error(
            format!("internal error: {}", format!($($arg)*)),
            None,
            $line,
            $column,
        ))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_flip_success() {
        let mut buffer = ResultMessages::new();
        assert!(buffer.success);
        buffer.add_warning("odd escape", None, 3, 1);
        assert!(buffer.success);
        buffer.add_error("bad token", None, 4, 9);
        assert!(!buffer.success);
        assert!(buffer.has_errors());
    }

    #[test]
    fn duplicate_messages_collapse() {
        let mut buffer = ResultMessages::new();
        buffer.add_error("unknown identifier \"x\"", None, 2, 5);
        buffer.add_error("unknown identifier \"x\"", None, 2, 5);
        assert_eq!(buffer.messages.len(), 1);
    }

    #[test]
    fn transfer_is_idempotent() {
        let mut file_buffer = ResultMessages::new();
        file_buffer.add_error("unknown identifier \"x\"", Some("file:///a.h64"), 2, 5);

        let mut project_buffer = ResultMessages::new();
        project_buffer.transfer_from(&file_buffer);
        project_buffer.transfer_from(&file_buffer);
        assert_eq!(project_buffer.messages.len(), 1);
        assert!(!project_buffer.success);
    }

    #[test]
    fn transfer_distinguishes_equal_text_from_new_source() {
        let mut file_buffer = ResultMessages::new();
        file_buffer.add_error("unknown identifier \"x\"", None, 2, 5);

        let mut project_buffer = ResultMessages::new();
        project_buffer.transfer_from(&file_buffer);

        // A genuinely new message with identical text at a new position
        // still lands.
        file_buffer.add_error("unknown identifier \"x\"", None, 7, 5);
        project_buffer.transfer_from(&file_buffer);
        assert_eq!(project_buffer.messages.len(), 2);
    }
}
