//! Line-based command scripts for `authctl`.
//!
//! One command per line, `#` starts a comment:
//!
//! ```text
//! login ada@example.com secret
//! get /cart
//! post /cart {"sku": "tee", "qty": 1}
//! status
//! logout
//! ```
//!
//! A script runs against a single `SessionStore`, so cookies set by one
//! command are sent by the next.

use serde_json::{Value, json};

use crate::error::AuthError;
use crate::store::{SessionStore, SignUp};
use crate::transport::ApiRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SignUp(SignUpArgs),
    Login { email: String, password: String },
    Logout,
    Profile,
    Refresh,
    Get { path: String },
    Post { path: String, body: Option<Value> },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpArgs {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("line {line}: unknown command `{command}`")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: usage: {usage}")]
    Usage { line: usize, usage: &'static str },
    #[error("line {line}: invalid JSON body: {reason}")]
    InvalidJson { line: usize, reason: String },
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse a whole script, skipping blank lines and comments.
///
/// # Errors
///
/// Returns the first malformed line.
pub fn parse_script(text: &str) -> Result<Vec<Command>, ScriptError> {
    let mut commands = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        if let Some(command) = parse_line(raw, idx + 1)? {
            commands.push(command);
        }
    }
    Ok(commands)
}

/// Parse one line; `Ok(None)` for blanks and comments.
///
/// # Errors
///
/// Returns an error for unknown commands, wrong arity, or bad JSON.
pub fn parse_line(raw: &str, line: usize) -> Result<Option<Command>, ScriptError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (name, rest) = split_word(trimmed);
    let args: Vec<&str> = rest.split_whitespace().collect();
    let command = match name {
        "signup" => match args.as_slice() {
            [name, email, password, confirm] => Command::SignUp(SignUpArgs {
                name: (*name).to_string(),
                email: (*email).to_string(),
                password: (*password).to_string(),
                confirm_password: (*confirm).to_string(),
            }),
            _ => return Err(ScriptError::Usage { line, usage: "signup <name> <email> <password> <confirm>" }),
        },
        "login" => match args.as_slice() {
            [email, password] => Command::Login { email: (*email).to_string(), password: (*password).to_string() },
            _ => return Err(ScriptError::Usage { line, usage: "login <email> <password>" }),
        },
        "logout" | "profile" | "refresh" | "status" if !args.is_empty() => {
            return Err(ScriptError::Usage { line, usage: "command takes no arguments" });
        }
        "logout" => Command::Logout,
        "profile" => Command::Profile,
        "refresh" => Command::Refresh,
        "status" => Command::Status,
        "get" => match args.as_slice() {
            [path] => Command::Get { path: normalize_path(path) },
            _ => return Err(ScriptError::Usage { line, usage: "get <path>" }),
        },
        "post" => {
            let (path, body) = split_word(rest);
            if path.is_empty() {
                return Err(ScriptError::Usage { line, usage: "post <path> [json]" });
            }
            let body = if body.is_empty() {
                None
            } else {
                Some(
                    serde_json::from_str(body)
                        .map_err(|e| ScriptError::InvalidJson { line, reason: e.to_string() })?,
                )
            };
            Command::Post { path: normalize_path(path), body }
        }
        other => return Err(ScriptError::UnknownCommand { line, command: other.to_string() }),
    };
    Ok(Some(command))
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') { path.to_string() } else { format!("/{path}") }
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Run one command and return its JSON output.
///
/// # Errors
///
/// Propagates the store or API error.
pub async fn run(store: &SessionStore, command: &Command) -> Result<Value, AuthError> {
    match command {
        Command::SignUp(args) => {
            let form = SignUp {
                name: args.name.clone(),
                email: args.email.clone(),
                password: args.password.clone(),
                confirm_password: args.confirm_password.clone(),
            };
            let user = store.sign_up(form).await?;
            Ok(json!({ "user": user }))
        }
        Command::Login { email, password } => {
            let user = store.login(email, password).await?;
            Ok(json!({ "user": user }))
        }
        Command::Logout => {
            store.logout().await?;
            Ok(Value::Null)
        }
        Command::Profile => {
            let user = store.check_auth().await;
            Ok(json!({ "user": user }))
        }
        Command::Refresh => {
            let payload = store.refresh_token().await?;
            Ok(json!({ "refreshed": payload.is_some(), "payload": payload }))
        }
        Command::Get { path } => store.client().send(ApiRequest::get(path.as_str())).await,
        Command::Post { path, body } => {
            let mut request = ApiRequest::post(path.as_str());
            if let Some(body) = body {
                request = request.json(body.clone());
            }
            store.client().send(request).await
        }
        Command::Status => {
            let snapshot = store.snapshot();
            Ok(json!({
                "authenticated": snapshot.user.is_some(),
                "user": snapshot.user,
                "loading": snapshot.loading,
                "checking_auth": snapshot.checking_auth,
            }))
        }
    }
}

#[cfg(test)]
#[path = "script_test.rs"]
mod tests;
