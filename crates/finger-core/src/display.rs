use crate::errors::AppResult;

/// Number of messages a screen can carry.
pub const MAX_LINES: usize = 5;

pub trait TextDisplay {
    /// Replaces the screen with up to `MAX_LINES` messages; each message is
    /// wrapped on its own.
    fn show_lines(&mut self, lines: &[&str]) -> AppResult<()>;

    fn clear(&mut self) -> AppResult<()>;
}

/// Greedy word wrap. Words longer than `columns` are split hard.
pub fn wrap_line(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut rows = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > columns {
            if !current.is_empty() {
                rows.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            rows.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current.is_empty() {
            word.len()
        } else {
            current.chars().count() + 1 + word.len()
        };
        if needed > columns {
            rows.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() || rows.is_empty() {
        rows.push(current);
    }
    rows
}

/// Wraps each message and flattens the result into screen rows. Messages
/// past `MAX_LINES` are dropped; empty messages keep their blank row.
pub fn layout(lines: &[&str], columns: usize) -> Vec<String> {
    lines
        .iter()
        .take(MAX_LINES)
        .flat_map(|line| wrap_line(line, columns))
        .collect()
}
