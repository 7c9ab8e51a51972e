//! Statement-level reader for qmake-style project descriptors.
//!
//! Only the subset the publisher needs is understood: assignments with the
//! `=`, `+=`, `*=` and `-=` operators, `scope:` prefixes, `scope { .. }`
//! blocks, `\` continuations and `#` comments. Everything else (function
//! calls, bare braces, `~=`) is left alone and never rewritten.

/// Assignment operator of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Assign,
    Append,
    AppendUnique,
    Remove,
}

/// One assignment, possibly spanning several physical lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statement {
    pub key: String,
    pub op: Operator,
    pub values: Vec<String>,
    /// Index of the first physical line.
    pub first_line: usize,
    /// Index of the last physical line (inclusive).
    pub last_line: usize,
    /// `symbian {` when the statement opens a block on its own line.
    pub scope_open: Option<String>,
    /// Whether the same line also closes that block.
    pub scope_closed: bool,
}

/// Parse every assignment statement in `lines`.
pub(crate) fn parse_statements(lines: &[String]) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let first_line = idx;
        let mut logical = String::new();

        loop {
            let content = strip_comment(&lines[idx]);
            let content = content.trim_end();
            match content.strip_suffix('\\') {
                Some(head) if idx + 1 < lines.len() => {
                    logical.push_str(head);
                    logical.push(' ');
                    idx += 1;
                }
                Some(head) => {
                    logical.push_str(head);
                    break;
                }
                None => {
                    logical.push_str(content);
                    break;
                }
            }
        }

        if let Some(assignment) = split_assignment(&logical) {
            statements.push(Statement {
                key: assignment.key,
                op: assignment.op,
                values: tokenize_values(assignment.rhs),
                first_line,
                last_line: idx,
                scope_open: assignment.scope_open,
                scope_closed: assignment.scope_closed,
            });
        }
        idx += 1;
    }

    statements
}

/// Fold the statements for `key` into its effective value list.
pub(crate) fn evaluate(statements: &[Statement], key: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for statement in statements.iter().filter(|s| s.key == key) {
        match statement.op {
            Operator::Assign => values = statement.values.clone(),
            Operator::Append => values.extend(statement.values.iter().cloned()),
            Operator::AppendUnique => {
                for value in &statement.values {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
            Operator::Remove => values.retain(|v| !statement.values.contains(v)),
        }
    }
    values
}

/// Split whitespace-separated values. Double quotes group a value and are
/// removed; `\"` inside quotes yields a literal quote.
pub(crate) fn tokenize_values(rhs: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = rhs.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    values.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        values.push(current);
    }
    values
}

struct Assignment<'a> {
    key: String,
    op: Operator,
    rhs: &'a str,
    scope_open: Option<String>,
    scope_closed: bool,
}

fn split_assignment(logical: &str) -> Option<Assignment<'_>> {
    let eq = find_unquoted(logical, '=')?;
    let (lhs, mut rhs) = (&logical[..eq], &logical[eq + 1..]);

    let (lhs, op) = match lhs.chars().last()? {
        '+' => (&lhs[..lhs.len() - 1], Operator::Append),
        '*' => (&lhs[..lhs.len() - 1], Operator::AppendUnique),
        '-' => (&lhs[..lhs.len() - 1], Operator::Remove),
        '~' => return None,
        _ => (lhs, Operator::Assign),
    };

    // `symbian { KEY = v }` reads as `KEY = v`
    let (scope_open, lhs) = match lhs.rfind('{') {
        Some(pos) => (Some(lhs[..=pos].trim().to_string()), &lhs[pos + 1..]),
        None => (None, lhs),
    };
    let mut scope_closed = false;
    if scope_open.is_some() {
        if let Some(inner) = strip_closing_brace(rhs) {
            rhs = inner;
            scope_closed = true;
        }
    }

    // `symbian:KEY` and `win32:symbian:KEY` read as plain `KEY`
    let key = lhs.trim().rsplit(':').next()?.trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    valid.then(|| Assignment {
        key: key.to_string(),
        op,
        rhs,
        scope_open,
        scope_closed,
    })
}

/// `rhs` without a final `}` that sits outside quotes.
fn strip_closing_brace(rhs: &str) -> Option<&str> {
    let trimmed = rhs.trim_end();
    let last = unquoted_positions(trimmed, '}').pop()?;
    (last + 1 == trimmed.len()).then(|| &trimmed[..last])
}

fn strip_comment(line: &str) -> &str {
    match find_unquoted(line, '#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    unquoted_positions(text, needle).first().copied()
}

fn unquoted_positions(text: &str, needle: char) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for (pos, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => positions.push(pos),
            _ => {}
        }
    }
    positions
}
