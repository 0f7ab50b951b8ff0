use crate::compiler::compiler_messages::results::{MessageKind, ResultMessage, ResultMessages};
use crate::compiler::project::uri;
use saying::say;
use std::fs;

pub fn print_result_messages(messages: &ResultMessages) {
    for msg in &messages.messages {
        print_formatted_message(msg);
    }
}

pub fn print_formatted_message(msg: &ResultMessage) {
    match msg.kind {
        MessageKind::Error => {
            say!(Red { format!("error: {}", msg.message) });
        }
        MessageKind::Warning => {
            say!(Yellow { format!("warning: {}", msg.message) });
        }
        MessageKind::Info => {
            println!("info: {}", msg.message);
        }
    }

    if let Some(file_uri) = &msg.file_uri {
        let location = if msg.line >= 0 {
            format!("{}:{}:{}", file_uri, msg.line, msg.column.max(0))
        } else {
            file_uri.clone()
        };
        say!(Dark Magenta { location });
    }

    print_source_snippet(msg);
}

/// Print the offending source line with a caret under the column, when the
/// file is still readable and the position is meaningful.
fn print_source_snippet(msg: &ResultMessage) {
    if msg.line < 1 {
        return;
    }
    let Some(file_uri) = &msg.file_uri else {
        return;
    };
    let Ok(path) = uri::to_file_path(file_uri) else {
        return;
    };
    let Ok(source) = fs::read_to_string(&path) else {
        return;
    };
    let Some(line) = source.lines().nth((msg.line - 1) as usize) else {
        return;
    };

    println!("\n{line}");
    if msg.column >= 1 {
        print!("{}", " ".repeat((msg.column - 1) as usize));
        say!(Red { "^".to_owned() });
    }
}
