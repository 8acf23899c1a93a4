//! Action dispatch table: each [`Action`] variant maps to the device shell
//! commands that carry it out.

use crate::contracts::Action;

/// Gesture duration for swipes, in milliseconds.
pub const SWIPE_DURATION_MS: u32 = 500;

const KEYCODE_BACK: &str = "4";
const KEYCODE_ENTER: &str = "66";

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Shell command lines for an action, in execution order. `None` maps to nothing.
pub fn action_commands(action: &Action) -> Vec<Vec<String>> {
    match action {
        Action::Tap { x, y } => vec![vec![
            "input".into(),
            "tap".into(),
            x.to_string(),
            y.to_string(),
        ]],
        Action::Swipe { x1, y1, x2, y2 } => vec![vec![
            "input".into(),
            "swipe".into(),
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            SWIPE_DURATION_MS.to_string(),
        ]],
        Action::Type { text } => type_commands(text),
        Action::Back => vec![cmd(&["input", "keyevent", KEYCODE_BACK])],
        Action::Home => vec![cmd(&[
            "am",
            "start",
            "-a",
            "android.intent.action.MAIN",
            "-c",
            "android.intent.category.HOME",
        ])],
        Action::None => Vec::new(),
    }
}

/// Characters `input text` accepts without shell quoting.
fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ',' | '@' | '/' | ':' | '_' | '+' | '=')
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Split text into input commands: plain runs through `input text`, spaces as
/// `%s`, newlines as ENTER, everything else through the `ADB_INPUT_TEXT` broadcast.
fn type_commands(text: &str) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    let mut run = String::new();

    let flush = |run: &mut String, commands: &mut Vec<Vec<String>>| {
        if !run.is_empty() {
            commands.push(cmd(&["input", "text", run.as_str()]));
            run.clear();
        }
    };

    for c in text.chars() {
        if is_plain(c) {
            run.push(c);
            continue;
        }
        flush(&mut run, &mut commands);
        match c {
            ' ' => commands.push(cmd(&["input", "text", "%s"])),
            '\n' => commands.push(cmd(&["input", "keyevent", KEYCODE_ENTER])),
            other => {
                let mut broadcast = cmd(&["am", "broadcast", "-a", "ADB_INPUT_TEXT", "--es", "msg"]);
                broadcast.push(shell_quote(&other.to_string()));
                commands.push(broadcast);
            }
        }
    }
    flush(&mut run, &mut commands);
    commands
}

/// Launch through event injection.
pub fn monkey_launch(package: &str) -> Vec<String> {
    vec![
        "monkey".into(),
        "-v".into(),
        "-p".into(),
        package.to_string(),
        "1".into(),
    ]
}

/// Launch an explicit activity.
pub fn activity_launch(package: &str, activity: &str) -> Vec<String> {
    let mut args = cmd(&["am", "start", "-n"]);
    args.push(format!("{}/{}", package, activity));
    args
}

/// Package listing with artifact paths.
pub fn list_packages() -> Vec<String> {
    cmd(&["pm", "list", "packages", "-f"])
}
