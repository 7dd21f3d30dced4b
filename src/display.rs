//! Human-readable rendering of patches and repositories.

use std::fmt::Write as _;

use chrono::{DateTime, Months, TimeZone, Utc};

use crate::{
    event::{parse_address, Event, ISSUE, PATCH, REPLY, REPOSITORY_ANNOUNCEMENT},
    nip19::encode_npub,
};

fn npub_or_hex(pubkey: &str) -> String {
    encode_npub(pubkey).unwrap_or_else(|_| pubkey.to_string())
}

/// Short name for a message kind.
pub fn kind_name(kind: u32) -> &'static str {
    match kind {
        PATCH => "patch",
        ISSUE => "issue",
        REPLY => "reply",
        REPOSITORY_ANNOUNCEMENT => "repository",
        _ => "event",
    }
}

/// Preview of a patch: id, author, target repository, then the content.
pub fn sprint_patch(ev: &Event) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id: {}", ev.id);
    let _ = writeln!(out, "author: {}", npub_or_hex(&ev.pubkey));
    let target = ev
        .first_tag("a")
        .and_then(|t| t.value())
        .and_then(parse_address);
    match target {
        Some((_, pubkey, identifier)) => {
            let _ = writeln!(out, "target repo: {identifier}");
            let _ = writeln!(out, "target author: {}", npub_or_hex(pubkey));
        }
        None => {
            let _ = writeln!(out, "target repo: (none)");
        }
    }
    let _ = write!(out, "\n{}", ev.content);
    out
}

/// Preview of a repository announcement.
pub fn sprint_repository(ev: &Event) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "author: {}", npub_or_hex(&ev.pubkey));
    let _ = writeln!(out, "id: {}", ev.identifier().unwrap_or_default());
    for name in ["name", "description"] {
        if let Some(value) = ev.first_tag(name).and_then(|t| t.value()) {
            let _ = writeln!(out, "{name}: {value}");
        }
    }
    out
}

/// One-line heading printed above each listed message.
pub fn heading(ev: &Event, now: DateTime<Utc>) -> String {
    format!(
        "{} {} by {} ({})",
        kind_name(ev.kind),
        ev.id,
        npub_or_hex(&ev.pubkey),
        human_date(ev.created_at, now)
    )
}

fn timestamp(created_at: u64) -> DateTime<Utc> {
    i64::try_from(created_at)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_default()
}

/// Relative-precision date: full date when old, month and day within the
/// year, weekday and time within the last week.
pub fn human_date(created_at: u64, now: DateTime<Utc>) -> String {
    let ts = timestamp(created_at);
    let nine_months_ago = now.checked_sub_months(Months::new(9)).unwrap_or(now);
    if ts < nine_months_ago {
        ts.format("%d %b %Y").to_string()
    } else if ts < now - chrono::Duration::days(6) {
        ts.format("%b %e").to_string()
    } else {
        ts.format("%a, %b %e %H:%M UTC").to_string()
    }
}

/// `Subject:` header of a `format-patch` body.
pub fn subject(content: &str) -> Option<&str> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Subject: "))
        .map(str::trim)
}

/// File name a downloaded patch is stored under:
/// `<YYYY-MM-DD> [<id prefix>] <subject>`.
pub fn patch_file_name(ev: &Event) -> Option<String> {
    let subject = subject(&ev.content)?.replace('/', "_").replace('\'', "");
    let date = timestamp(ev.created_at).format("%Y-%m-%d");
    let prefix = ev.id.get(..8).unwrap_or(&ev.id);
    Some(format!("{date} [{prefix}] {subject}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn patch(tags: Vec<Tag>, content: &str, created_at: u64) -> Event {
        Event {
            id: "0123456789abcdef".repeat(4),
            pubkey: "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e".into(),
            kind: PATCH,
            created_at,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn patch_preview_names_target() {
        let ev = patch(
            vec![Tag::address(
                REPOSITORY_ANNOUNCEMENT,
                "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e",
                "myrepo",
                "wss://r",
            )],
            "From x",
            0,
        );
        let text = sprint_patch(&ev);
        assert!(text.contains(
            "author: npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg"
        ));
        assert!(text.contains("target repo: myrepo"));
        assert!(text.ends_with("\nFrom x"));
    }

    #[test]
    fn dangling_patch_preview() {
        let text = sprint_patch(&patch(vec![], "From x", 0));
        assert!(text.contains("target repo: (none)"));
    }

    #[test]
    fn file_name_uses_date_id_and_subject() {
        let ev = patch(
            vec![],
            "From x\nSubject: [PATCH] fix a/b 'quoted'\n\nbody",
            1_700_000_000,
        );
        assert_eq!(
            patch_file_name(&ev).unwrap(),
            "2023-11-14 [01234567] [PATCH] fix a_b quoted"
        );
        assert_eq!(patch_file_name(&patch(vec![], "no subject", 0)), None);
    }

    #[test]
    fn human_date_precision() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let at = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap().timestamp() as u64;
        assert_eq!(human_date(at(2023, 1, 2), now), "02 Jan 2023");
        assert_eq!(human_date(at(2024, 3, 5), now), "Mar  5");
        assert_eq!(human_date(at(2024, 6, 14), now), "Fri, Jun 14 10:30 UTC");
    }
}
