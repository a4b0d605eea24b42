//! Port declarations in a Dockerfile.
//!
//! Only the final build stage matters: `EXPOSE` and `ENV` in a builder stage
//! never reach the runtime image, so every `FROM` starts over.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct DockerfileError {
    pub line: usize,
    pub message: String,
}

impl DockerfileError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Ports declared by the final stage of a Dockerfile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DockerfilePorts {
    /// Every port listed by `EXPOSE`, in order.
    pub exposed: Vec<u16>,
    /// The value of `ENV PORT`, if the image sets it.
    pub env_port: Option<u16>,
}

/// One instruction after joining `\` continuations. `line` is where it starts.
struct Instruction {
    line: usize,
    keyword: String,
    args: String,
}

fn instructions(text: &str) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (continues, body) = match trimmed.strip_suffix('\\') {
            Some(body) => (true, body.trim_end()),
            None => (false, trimmed),
        };

        let (start, mut acc) = pending.take().unwrap_or((idx + 1, String::new()));
        if !acc.is_empty() {
            acc.push(' ');
        }
        acc.push_str(body);

        if continues {
            pending = Some((start, acc));
        } else if !acc.is_empty() {
            out.push(split_instruction(start, acc));
        }
    }

    if let Some((start, acc)) = pending
        && !acc.is_empty()
    {
        out.push(split_instruction(start, acc));
    }

    out
}

fn split_instruction(line: usize, full: String) -> Instruction {
    let (keyword, args) = match full.split_once(char::is_whitespace) {
        Some((k, a)) => (k.to_ascii_uppercase(), a.trim().to_string()),
        None => (full.to_ascii_uppercase(), String::new()),
    };
    Instruction {
        line,
        keyword,
        args,
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

/// `KEY=VALUE KEY2=VALUE2` or the legacy single `KEY VALUE` form.
fn key_values(args: &str) -> Vec<(String, String)> {
    let first = args.split_whitespace().next().unwrap_or_default();
    if !first.contains('=') {
        return match args.split_once(char::is_whitespace) {
            Some((k, v)) => vec![(k.to_string(), unquote(v.trim()).to_string())],
            None => Vec::new(),
        };
    }

    args.split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), unquote(v).to_string()))
        .collect()
}

/// Substitute `$NAME`, `${NAME}` and `${NAME:-default}` anywhere in `value`
/// from variables defined earlier in the stage.
fn expand(
    value: &str,
    vars: &HashMap<String, String>,
    line: usize,
) -> Result<String, DockerfileError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (reference, consumed) = match after.strip_prefix('{') {
            Some(braced) => {
                let end = braced.find('}').ok_or_else(|| {
                    DockerfileError::new(line, format!("unterminated variable in `{value}`"))
                })?;
                (&braced[..end], end + 2)
            }
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };

        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };
        if name.is_empty() {
            return Err(DockerfileError::new(line, format!("empty variable in `{value}`")));
        }

        match (vars.get(name), default) {
            (Some(v), _) => out.push_str(v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => {
                return Err(DockerfileError::new(
                    line,
                    format!("undefined variable `{name}`"),
                ));
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

fn parse_port(value: &str, line: usize) -> Result<u16, DockerfileError> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(DockerfileError::new(line, format!("invalid port `{value}`"))),
        Ok(port) => Ok(port),
    }
}

pub fn parse(text: &str) -> Result<DockerfilePorts, DockerfileError> {
    let mut ports = DockerfilePorts::default();
    let mut vars: HashMap<String, String> = HashMap::new();

    for ins in instructions(text) {
        match ins.keyword.as_str() {
            "FROM" => {
                ports = DockerfilePorts::default();
                vars.clear();
            }
            "ARG" | "ENV" => {
                for (key, raw) in key_values(&ins.args) {
                    let is_port = ins.keyword == "ENV" && key == "PORT";
                    // Base images define variables we never see (`$PATH`); only PORT must resolve.
                    let value = match expand(&raw, &vars, ins.line) {
                        Ok(value) => value,
                        Err(e) if is_port => return Err(e),
                        Err(_) => raw,
                    };
                    if is_port {
                        ports.env_port = Some(parse_port(&value, ins.line)?);
                    }
                    vars.insert(key, value);
                }
            }
            "EXPOSE" => {
                for token in ins.args.split_whitespace() {
                    let expanded = expand(token, &vars, ins.line)?;
                    let number = expanded.split('/').next().unwrap_or_default();
                    if number.contains('-') {
                        return Err(DockerfileError::new(
                            ins.line,
                            format!("port ranges are not supported: `{expanded}`"),
                        ));
                    }
                    ports.exposed.push(parse_port(number, ins.line)?);
                }
            }
            _ => {}
        }
    }

    Ok(ports)
}
