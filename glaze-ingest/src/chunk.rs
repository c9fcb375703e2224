/// Split `text` into chunks of at most `max_chars` characters on word
/// boundaries. Consecutive chunks share up to `overlap` characters of trailing
/// words. A single word longer than `max_chars` becomes its own chunk.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let mut end = start;
        let mut len = 0;
        while end < words.len() {
            let add = words[end].chars().count() + usize::from(end > start);
            if end > start && len + add > max_chars {
                break;
            }
            len += add;
            end += 1;
        }

        chunks.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }

        let mut next = end;
        let mut carried = 0;
        while next > start + 1 {
            let add = words[next - 1].chars().count() + 1;
            if carried + add > overlap {
                break;
            }
            carried += add;
            next -= 1;
        }
        start = next;
    }

    chunks
}
