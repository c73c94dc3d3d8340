// Keyward — Credential file codec
//
// Newline-delimited `NAME=value` records. Comments and blank lines are
// ignored and the last occurrence of a duplicate name wins. Writes replace a
// single line in place and go through a temp file + rename so a concurrent
// reader never sees a half-written file.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use zeroize::Zeroizing;

use super::StoreError;

/// Parsed contents of a credential file, keyed by name.
pub type Entries = BTreeMap<String, Zeroizing<String>>;

fn file_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::CredentialFile {
        path: path.display().to_string(),
        source,
    }
}

/// Split one line into `(name, value)`. Returns `None` for lines that carry
/// no record, including malformed ones, which are skipped with a warning.
fn parse_line(line: &str, line_no: usize) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let Some((name, value)) = body.split_once('=') else {
        tracing::warn!(line = line_no, "Skipping credential file line without NAME=value");
        return None;
    };

    let name = name.trim();
    if !is_valid_name(name) {
        tracing::warn!(line = line_no, "Skipping credential file line with an invalid name");
        return None;
    }

    Some((name.to_string(), unquote(value.trim()).to_string()))
}

/// Names are shell-style identifiers.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// A value can be stored only if it fits on one line.
pub fn is_single_line(value: &str) -> bool {
    !value.contains(['\r', '\n'])
}

/// The on-disk form of `value`. Values that the parser would trim or unquote
/// are wrapped in double quotes, which it strips exactly once.
fn encode_value(value: &str) -> String {
    let needs_quotes = value != value.trim()
        || value.starts_with(['"', '\''])
        || value.ends_with(['"', '\'']);
    if needs_quotes {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Parse credential file contents.
pub fn parse(contents: &str) -> Entries {
    let mut entries = Entries::new();
    for (idx, line) in contents.lines().enumerate() {
        if let Some((name, value)) = parse_line(line, idx + 1) {
            entries.insert(name, Zeroizing::new(value));
        }
    }
    entries
}

/// Read and parse a credential file. A missing file is an empty store.
pub fn read(path: &Path) -> Result<Entries, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let contents = Zeroizing::new(contents);
            Ok(parse(&contents))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
        Err(e) => Err(file_error(path, e)),
    }
}

/// Replace the value of `name` in place, preserving every other line.
/// Appends the record when the name is not present yet. Every occurrence of
/// a duplicated name is rewritten so the "last one wins" rule cannot resurrect
/// an old value.
pub fn update_value(path: &Path, name: &str, value: &str) -> Result<(), StoreError> {
    if !is_single_line(value) {
        return Err(StoreError::MultiLineValue(name.to_string()));
    }
    let value = Zeroizing::new(encode_value(value));

    let existing = match fs::read_to_string(path) {
        Ok(c) => Zeroizing::new(c),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Zeroizing::new(String::new()),
        Err(e) => return Err(file_error(path, e)),
    };

    let mut out = Zeroizing::new(String::with_capacity(existing.len() + name.len() + value.len() + 2));
    let mut replaced = false;

    for (idx, line) in existing.lines().enumerate() {
        let is_target = matches!(parse_line(line, idx + 1), Some((ref n, _)) if n == name);
        if is_target {
            let prefix = if line.trim_start().starts_with("export ") { "export " } else { "" };
            out.push_str(prefix);
            out.push_str(name);
            out.push('=');
            out.push_str(&value);
            replaced = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !replaced {
        out.push_str(name);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }

    write_atomically(path, out.as_bytes())
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".to_string());
    let tmp = dir.join(format!(".{}.keyward-tmp", file_name));

    {
        let mut f = fs::File::create(&tmp).map_err(|e| file_error(&tmp, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(path).map(|m| m.permissions().mode()).unwrap_or(0o600);
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode)).map_err(|e| file_error(&tmp, e))?;
        }
        f.write_all(contents).map_err(|e| file_error(&tmp, e))?;
        f.sync_all().map_err(|e| file_error(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| file_error(path, e))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
