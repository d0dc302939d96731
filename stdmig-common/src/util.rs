//! Shared utilities for the migrator.

/// Mask a credential before printing it, keeping only the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", tail)
}

/// Render at most `limit` identifiers for a log line, noting how many were left out.
pub fn preview_ids<I, S>(ids: I, limit: usize) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut shown = Vec::new();
    let mut hidden = 0usize;
    for id in ids {
        if shown.len() < limit {
            shown.push(id.as_ref().to_string());
        } else {
            hidden += 1;
        }
    }

    let mut out = shown.join(", ");
    if hidden > 0 {
        out.push_str(&format!(" ... and {} more", hidden));
    }
    out
}
