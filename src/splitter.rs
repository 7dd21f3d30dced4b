//! Split `git format-patch --stdout` output into one body per commit.

const BOUNDARY: &str = "\n\nFrom ";

/// Split a multi-commit patch blob.
///
/// A commit starts at a line beginning with `From ` that follows a blank
/// line. Each body keeps its leading `From ` and the previous body keeps one
/// trailing newline. Whitespace-only segments are dropped, and a blob with a
/// single commit comes back unchanged.
pub fn split_patches(blob: &str) -> Vec<String> {
    let mut out = vec![];
    let mut rest = blob;
    while let Some(at) = rest.find(BOUNDARY) {
        // Keep the first newline with the body it terminates.
        push_segment(&mut out, &rest[..at + 1]);
        rest = &rest[at + 2..];
    }
    push_segment(&mut out, rest);
    out
}

fn push_segment(out: &mut Vec<String>, segment: &str) {
    if !segment.trim().is_empty() {
        out.push(segment.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = "From 1111 Mon Sep 17 00:00:00 2001\nFrom: a <a@b>\nSubject: [PATCH 1/2] one\n\n---\n a | 1 +\n-- \n2.43.0\n";
    const SECOND: &str = "From 2222 Mon Sep 17 00:00:00 2001\nFrom: a <a@b>\nSubject: [PATCH 2/2] two\n\n---\n b | 1 +\n-- \n2.43.0\n";

    #[test]
    fn single_commit_is_unchanged() {
        assert_eq!(split_patches(FIRST), vec![FIRST.to_string()]);
    }

    #[test]
    fn splits_series_on_blank_line_from() {
        let blob = format!("{FIRST}\n{SECOND}");
        let parts = split_patches(&blob);
        assert_eq!(parts, vec![FIRST.to_string(), SECOND.to_string()]);
        assert!(parts.iter().all(|p| p.starts_with("From ")));
    }

    #[test]
    fn from_header_inside_body_is_not_a_boundary() {
        // "From:" follows a non-blank line, and "\n\nFrom:" lacks the space.
        let blob = "From 1 x\nFrom: me\n\nFrom:someone quoted\n";
        assert_eq!(split_patches(blob).len(), 1);
    }

    #[test]
    fn empty_segments_are_dropped() {
        assert!(split_patches("").is_empty());
        assert!(split_patches("  \n").is_empty());
        let blob = format!("\n\n{FIRST}");
        assert_eq!(split_patches(&blob), vec![FIRST.to_string()]);
    }

    #[test]
    fn three_commits() {
        let blob = format!("{FIRST}\n{SECOND}\n{FIRST}");
        assert_eq!(split_patches(&blob).len(), 3);
    }
}
