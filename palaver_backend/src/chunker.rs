//! Splitting replies to fit the channel's per-message size limit.

/// Telegram enforces a 4096-character limit per message.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Split `text` into ordered, non-empty chunks of at most `limit` characters.
///
/// Lines are accumulated greedily and a chunk is closed before the line that
/// would overflow it, so a line that fits within `limit` is never split. A
/// single line longer than `limit` is cut at character boundaries into
/// `limit`-sized pieces.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    // Whether `current` holds at least one line, possibly an empty one.
    let mut open = false;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            if open {
                chunks.push(std::mem::take(&mut current));
            }
            let mut pieces = hard_split(line, limit);
            // The tail stays open so following lines can join it.
            let tail = pieces.pop().unwrap_or_default();
            chunks.extend(pieces);
            current_len = tail.chars().count();
            current = tail;
            open = true;
            continue;
        }

        if !open {
            current.push_str(line);
            current_len = line_len;
            open = true;
        } else if current_len + line_len + 1 <= limit {
            current.push('\n');
            current.push_str(line);
            current_len += line_len + 1;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        }
    }

    if open && !current.is_empty() {
        chunks.push(current);
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

fn hard_split(line: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(limit)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split_message("hello world", 4096), vec!["hello world"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_message("", 4096).is_empty());
    }

    #[test]
    fn lines_are_packed_greedily_without_splitting() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn boundary_counts_the_joining_newline() {
        // 4 + 1 + 4 = 9 fits exactly; one more character does not.
        assert_eq!(split_message("aaaa\nbbbb", 9), vec!["aaaa\nbbbb"]);
        assert_eq!(split_message("aaaa\nbbbbb", 9), vec!["aaaa", "bbbbb"]);
    }

    #[test]
    fn every_chunk_respects_the_limit_and_lines_survive_intact() {
        let lines: Vec<String> = (0..600)
            .map(|i| format!("line {} {}", i, "x".repeat(i % 97)))
            .collect();
        let text = lines.join("\n");

        let chunks = split_message(&text, MAX_MESSAGE_LENGTH);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(chunk.chars().count() <= MAX_MESSAGE_LENGTH);
        }
        assert_eq!(chunks.join("\n"), text);

        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split('\n')).collect();
        assert_eq!(rejoined, lines.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn oversized_single_line_is_cut_to_the_limit() {
        let text = "hello".repeat(5000);
        let chunks = split_message(&text, MAX_MESSAGE_LENGTH);

        assert_eq!(chunks.len(), 7);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LENGTH));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn oversized_line_tail_joins_following_lines() {
        let chunks = split_message("abcdefg\nhi", 5);
        assert_eq!(chunks, vec!["abcde", "fg\nhi"]);
    }

    #[test]
    fn limit_is_measured_in_characters_not_bytes() {
        let text = "狼人杀".repeat(2);
        assert_eq!(split_message(&text, 6), vec![text.clone()]);
        assert_eq!(split_message(&text, 3), vec!["狼人杀", "狼人杀"]);
    }

    #[test]
    fn blank_lines_are_preserved() {
        assert_eq!(split_message("a\n\nb", 4096), vec!["a\n\nb"]);
        assert_eq!(split_message("\n\nb", 4096), vec!["\n\nb"]);
        assert_eq!(split_message("aaaa\n\nb", 4), vec!["aaaa", "\nb"]);
    }
}
