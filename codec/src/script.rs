//! Splitting SQL text into complete statements.
//!
//! A statement ends at a `;` outside string literals, quoted identifiers and
//! comments. Inside `CREATE [TEMP] TRIGGER` the body's own semicolons do not
//! end the statement; only `; END ;` does, so a `CASE ... END` inside the
//! body is not mistaken for the terminator. These are the same completeness
//! rules the engine applies in `sqlite3_complete`.

/// Splits `sql` into trimmed statements, each including its terminating `;`.
///
/// Statements consisting only of whitespace, comments and `;` are dropped. A
/// trailing statement without a terminator is returned as-is.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = StatementState::default();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_past(bytes, i + 1, quote);
                state.other_token();
            }
            b'[' => {
                i = skip_past(bytes, i + 1, b']');
                state.other_token();
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_past(bytes, i + 2, b'\n');
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i + 2);
            }
            b';' => {
                i += 1;
                if state.in_trigger && !state.last_was_end {
                    state.body_semicolon();
                    continue;
                }
                if state.has_content {
                    statements.push(sql[start..i].trim().to_string());
                }
                start = i;
                state = StatementState::default();
            }
            b if is_word_byte(b) => {
                let word_start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                state.word(&sql[word_start..i]);
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                state.other_token();
                i += 1;
            }
        }
    }

    if state.has_content {
        statements.push(sql[start..].trim().to_string());
    }
    statements
}

#[derive(Debug, Default)]
struct StatementState {
    has_content: bool,
    /// First three words, uppercased; enough to recognize `CREATE TEMP TRIGGER`.
    leading: Vec<String>,
    in_trigger: bool,
    /// Previous token was `;` inside a trigger body.
    after_semicolon: bool,
    /// Previous token was an `END` that closes a trigger body.
    last_was_end: bool,
}

impl StatementState {
    fn word(&mut self, word: &str) {
        self.has_content = true;
        let upper = word.to_ascii_uppercase();
        self.last_was_end = self.in_trigger && self.after_semicolon && upper == "END";
        self.after_semicolon = false;
        if self.leading.len() < 3 {
            self.leading.push(upper);
            self.in_trigger = self.starts_trigger();
        }
    }

    fn other_token(&mut self) {
        self.has_content = true;
        self.last_was_end = false;
        self.after_semicolon = false;
    }

    fn body_semicolon(&mut self) {
        self.other_token();
        self.after_semicolon = true;
    }

    fn starts_trigger(&self) -> bool {
        let words: Vec<&str> = self.leading.iter().map(String::as_str).collect();
        matches!(
            words.as_slice(),
            ["CREATE", "TRIGGER", ..] | ["CREATE", "TEMP" | "TEMPORARY", "TRIGGER"]
        )
    }
}

// Non-ASCII bytes are treated as identifier characters, like the engine does.
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Returns the index just past the next `close` byte at or after `from`.
fn skip_past(bytes: &[u8], from: usize, close: u8) -> usize {
    match bytes[from.min(bytes.len())..].iter().position(|&b| b == close) {
        Some(offset) => from + offset + 1,
        None => bytes.len(),
    }
}

fn skip_block_comment(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}
