/// AMQP topic matching: `*` matches exactly one dot-separated word,
/// `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pat: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pat, &key)
}

fn matches(pat: &[&str], key: &[&str]) -> bool {
    match (pat.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // `#` absorbs zero words or one word at a time.
            matches(&pat[1..], key) || (!key.is_empty() && matches(pat, &key[1..]))
        }
        (Some(&"*"), Some(_)) => matches(&pat[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => matches(&pat[1..], &key[1..]),
        _ => false,
    }
}
