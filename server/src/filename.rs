//! Demo file naming: name sanitization, relative path validation and the
//! `MM-SS-mmm` elapsed-time strings used in race demo names.

/// Longest sanitized name, in bytes
pub const MAX_NAME_LEN: usize = 1023;

/// Strips junk from a user supplied demo or player name
///
/// Control bytes are dropped, characters that are unsafe in file names are
/// replaced with `_`, and angle brackets become parentheses. Never fails.
pub fn sanitize(raw: &str) -> String {
    let mut clean = String::with_capacity(raw.len().min(MAX_NAME_LEN));

    for c in raw.chars() {
        let mapped = match c {
            c if (c as u32) < 0x20 || c == '\x7f' => continue,
            '"' | '*' | '/' | ':' | '?' | '\\' | '.' | '|' | ' ' => '_',
            '<' => '(',
            '>' => ')',
            c => c,
        };

        if clean.len() + mapped.len_utf8() > MAX_NAME_LEN {
            break;
        }
        clean.push(mapped);
    }

    clean
}

/// Normalizes path separators to forward slashes
pub fn sanitize_file_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Checks that `path` is a legal relative path confined below `root`
pub fn validate_relative(path: &str, root: &str) -> bool {
    if path.is_empty() || path.contains('\\') || path.contains(':') {
        return false;
    }
    if path.contains("..") || path.contains("//") {
        return false;
    }
    if path.starts_with('/') || path.starts_with('.') {
        return false;
    }

    path.len() > root.len() + 1
        && path.starts_with(root)
        && path.as_bytes()[root.len()] == b'/'
}

/// Builds `root/sub/.../leaf<ext>` in one allocation
pub fn build_demo_path(root: &str, folders: &[&str], leaf: &str, extension: &str) -> String {
    let capacity = root.len()
        + folders.iter().map(|f| f.len() + 1).sum::<usize>()
        + 1
        + leaf.len()
        + extension.len();

    let mut path = String::with_capacity(capacity);
    path.push_str(root);
    for folder in folders {
        path.push('/');
        path.push_str(folder);
    }
    path.push('/');
    path.push_str(leaf);
    if file_extension(leaf).is_none() {
        path.push_str(extension);
    }
    path
}

/// Extension of the last path component, including the dot
pub fn file_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map(|dot| &name[dot..])
}

/// Formats elapsed milliseconds as `MM-SS-mmm`
pub fn encode_elapsed(millis: u64) -> String {
    let minutes = millis / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let millis = millis % 1000;
    format!("{:02}-{:02}-{:03}", minutes, seconds, millis)
}

/// Decodes a time string by reading digit runs from the end
///
/// Runs are weighted milliseconds, seconds, minutes, hours, days, then the
/// multiplier freezes. Every non-digit closes a run, so repeated separators
/// produce empty runs that still advance the multiplier.
pub fn decode_elapsed(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let mut total: u64 = 0;
    let mut multiplier: u64 = 1;
    let mut parts = 0;
    let mut end = bytes.len();

    let mut add_part = |digits: &[u8], total: &mut u64| {
        let value = digits
            .iter()
            .fold(0u64, |acc, d| acc.saturating_mul(10).saturating_add(u64::from(d - b'0')));
        *total = total.saturating_add(value.saturating_mul(multiplier));

        parts += 1;
        match parts {
            1 => multiplier *= 1000,
            2 | 3 => multiplier *= 60,
            4 => multiplier *= 24,
            5 => multiplier *= 365,
            _ => {}
        }
    };

    for i in (0..bytes.len()).rev() {
        if !bytes[i].is_ascii_digit() {
            add_part(&bytes[i + 1..end], &mut total);
            end = i;
        }
    }
    if end > 0 {
        add_part(&bytes[..end], &mut total);
    }

    total
}

/// Case-insensitive ASCII prefix test
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
