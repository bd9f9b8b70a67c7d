//! Decides whether a message comes from a watched sender.

use std::sync::LazyLock;

use regex::Regex;

static BRACKETED_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]+)>").expect("static regex"));

/// Normalize a `From` header value to a bare lowercase address.
///
/// `"Boss <BOSS@Corp.com>"` → `"boss@corp.com"`. Headers without an angle
/// bracket portion are lowercased and trimmed as a whole.
pub fn normalize_sender(raw: &str) -> String {
    match BRACKETED_ADDRESS.captures(raw) {
        Some(caps) => caps[1].trim().to_lowercase(),
        None => raw.trim().to_lowercase(),
    }
}

/// Check a sender against the allow-list.
///
/// Matching is symmetric substring containment: an entry matches if it occurs
/// in the normalized sender or in the raw header, or if the normalized sender
/// occurs in the entry. This accepts domain-only (`corp.com`, `@corp.com`) and
/// local-part-only entries, and also means very short entries match broadly.
///
/// - Empty list → nothing matches
/// - Blank entries are ignored
pub fn is_target(normalized_sender: &str, raw_sender_header: &str, allow_list: &[String]) -> bool {
    let raw_lower = raw_sender_header.to_lowercase();
    allow_list
        .iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            normalized_sender.contains(&entry)
                || raw_lower.contains(&entry)
                || (!normalized_sender.is_empty() && entry.contains(normalized_sender))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    // ── normalize_sender ────────────────────────────────────────────

    #[test]
    fn normalize_extracts_bracketed_address() {
        assert_eq!(normalize_sender("Boss <BOSS@Corp.com>"), "boss@corp.com");
        assert_eq!(
            normalize_sender("\"Doe, Jane\" < jane@example.org >"),
            "jane@example.org"
        );
    }

    #[test]
    fn normalize_plain_address() {
        assert_eq!(normalize_sender("  Alerts@Example.COM "), "alerts@example.com");
    }

    #[test]
    fn normalize_empty() {
        assert_eq!(normalize_sender(""), "");
    }

    // ── is_target ───────────────────────────────────────────────────

    #[test]
    fn empty_allow_list_matches_nothing() {
        assert!(!is_target("boss@corp.com", "Boss <boss@corp.com>", &[]));
    }

    #[test]
    fn display_name_header_matches_exact_entry() {
        let raw = "Boss <BOSS@Corp.com>";
        let sender = normalize_sender(raw);
        assert!(is_target(&sender, raw, &list(&["boss@corp.com"])));
    }

    #[test]
    fn domain_and_local_part_entries_match() {
        let raw = "ceo@partner.io";
        assert!(is_target(raw, raw, &list(&["partner.io"])));
        assert!(is_target(raw, raw, &list(&["@partner.io"])));
        assert!(is_target(raw, raw, &list(&["ceo"])));
        assert!(!is_target(raw, raw, &list(&["other.io"])));
    }

    #[test]
    fn entry_matches_display_name_in_raw_header() {
        let raw = "Payroll Team <noreply@hr-system.net>";
        let sender = normalize_sender(raw);
        assert!(is_target(&sender, raw, &list(&["payroll"])));
    }

    #[test]
    fn containment_is_symmetric() {
        // A sender that is a substring of the entry also matches.
        assert!(is_target("boss", "boss", &list(&["boss@corp.com"])));
    }

    #[test]
    fn short_entries_match_broadly() {
        let raw = "someone@company.com";
        assert!(is_target(raw, raw, &list(&["co"])));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let raw = "random@evil.com";
        assert!(!is_target(raw, raw, &list(&["", "   "])));
    }

    #[test]
    fn empty_sender_only_matches_via_raw_header() {
        assert!(!is_target("", "", &list(&["boss@corp.com"])));
    }

    #[test]
    fn entries_are_compared_case_insensitively() {
        let raw = "boss@corp.com";
        assert!(is_target(raw, raw, &list(&["BOSS@CORP.COM"])));
    }
}
