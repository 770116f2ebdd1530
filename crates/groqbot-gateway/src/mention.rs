//! Deciding whether a group message is addressed to the bot.

/// Text to answer if the message is addressed to the bot, with the
/// `@username` mention removed. `always_addressed` covers replies to the
/// bot and private chats, where no mention is needed.
///
/// Returns `Some("")` for a bare mention so the caller can greet instead.
pub fn addressed_text(text: &str, bot_username: &str, always_addressed: bool) -> Option<String> {
    let mention = format!("@{}", bot_username.trim_start_matches('@'));
    let stripped = remove_mention(text, &mention);
    match stripped {
        Some(rest) => Some(rest),
        None if always_addressed => Some(text.trim().to_string()),
        None => None,
    }
}

pub fn mentions_bot(text: &str, bot_username: &str) -> bool {
    let mention = format!("@{}", bot_username.trim_start_matches('@'));
    remove_mention(text, &mention).is_some()
}

/// `None` when `mention` does not occur as a whole word (case-insensitive).
fn remove_mention(text: &str, mention: &str) -> Option<String> {
    // Usernames are ASCII, so ASCII folding keeps byte offsets aligned.
    let lower = text.to_ascii_lowercase();
    let needle = mention.to_ascii_lowercase();

    let mut found = false;
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(&needle) {
        let end = idx + needle.len();
        let boundary = lower[end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if !boundary || idx < last {
            continue;
        }
        out.push_str(&text[last..idx]);
        out.push(' ');
        last = end;
        found = true;
    }
    if !found {
        return None;
    }
    out.push_str(&text[last..]);
    Some(collapse(&out))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
