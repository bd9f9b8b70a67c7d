//! Voice markup for escalation calls and keypad responses.

const VOICE: &str = "alice";
const GATHER_TIMEOUT_SECS: u32 = 10;

/// Escape text for inclusion in an XML element or attribute.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Spell a code out so text-to-speech reads it digit by digit: `199` → `1 9 9`.
pub fn spoken_digits(code: &str) -> String {
    code.chars()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

fn gather(gather_url: &str, stop_code: &str, prompt: &str) -> String {
    format!(
        r#"  <Gather input="dtmf" numDigits="{digits}" action="{action}" method="POST" timeout="{timeout}">
    <Say voice="{VOICE}">{prompt}</Say>
  </Gather>"#,
        digits = stop_code.chars().count().max(1),
        action = escape_xml(gather_url),
        timeout = GATHER_TIMEOUT_SECS,
    )
}

/// Script played when an escalation call is answered.
pub fn call_script(sender: &str, subject: &str, gather_url: &str, stop_code: &str) -> String {
    let prompt = format!(
        "Press {} on your keypad to stop these calls.",
        spoken_digits(stop_code)
    );
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say voice="{VOICE}">Important email from {sender}.</Say>
  <Say voice="{VOICE}">Subject: {subject}.</Say>
{gather}
  <Say voice="{VOICE}">No input received. We will call you again.</Say>
</Response>"#,
        sender = escape_xml(sender),
        subject = escape_xml(subject),
        gather = gather(gather_url, stop_code, &prompt),
    )
}

/// Terminal response after the code was accepted on the keypad.
pub fn accepted_response() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say voice="{VOICE}">Stop code accepted. Notifications have been stopped. Goodbye!</Say>
  <Hangup/>
</Response>"#
    )
}

/// Re-prompt after a wrong or missing code; re-arms digit capture.
pub fn retry_response(gather_url: &str, stop_code: &str, notice: &str) -> String {
    let digits = spoken_digits(stop_code);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say voice="{VOICE}">{notice} Please press {digits} to stop calls.</Say>
{gather}
</Response>"#,
        notice = escape_xml(notice),
        gather = gather(gather_url, stop_code, &format!("Press {digits} now.")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://alarm.example.com/twilio-gather";

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_xml(r#"Q&A <today> "now" it's"#),
            "Q&amp;A &lt;today&gt; &quot;now&quot; it&apos;s"
        );
    }

    #[test]
    fn digits_are_spaced() {
        assert_eq!(spoken_digits("199"), "1 9 9");
        assert_eq!(spoken_digits("007"), "0 0 7");
    }

    #[test]
    fn call_script_announces_sender_and_gathers_code() {
        let xml = call_script("boss@corp.com", "Servers <down> & out", URL, "199");
        assert!(xml.contains("Important email from boss@corp.com."));
        assert!(xml.contains("Subject: Servers &lt;down&gt; &amp; out."));
        assert!(xml.contains(r#"numDigits="3""#));
        assert!(xml.contains(&format!(r#"action="{URL}""#)));
        assert!(xml.contains("Press 1 9 9 on your keypad"));
    }

    #[test]
    fn gather_length_follows_code() {
        let xml = call_script("a@b.com", "x", URL, "4321");
        assert!(xml.contains(r#"numDigits="4""#));
    }

    #[test]
    fn accepted_response_hangs_up() {
        let xml = accepted_response();
        assert!(xml.contains("Stop code accepted"));
        assert!(xml.contains("<Hangup/>"));
        assert!(!xml.contains("<Gather"));
    }

    #[test]
    fn retry_response_rearms_gather() {
        let xml = retry_response(URL, "199", "Invalid code.");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("Invalid code. Please press 1 9 9 to stop calls."));
        assert!(xml.contains("<Gather"));
        assert!(xml.contains("Press 1 9 9 now."));
        assert!(!xml.contains("<Hangup/>"));
    }
}
