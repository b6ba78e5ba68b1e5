//! Shortest unique prefix for human-facing identifier display.
//!
//! The result depends on which identifiers are visible together, so it is
//! computed per result set and never stored alongside an identifier.

/// Shortest prefix length ever shown for slot and agent ids.
pub const MIN_PREFIX_SIZE: usize = 4;

/// Smallest length `L >= min_size` at which every identifier, truncated to
/// `L` characters, is distinct from every other.
///
/// When two identifiers are identical no such length exists and the length
/// of the longest identifier is returned instead.
pub fn shortest_unique_prefix<S: AsRef<str>>(ids: &[S], min_size: usize) -> usize {
    let mut sorted: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();

    let max_len = sorted.iter().map(|s| s.chars().count()).max().unwrap_or(0);

    // After sorting, the longest shared prefix of any pair is found between
    // neighbours, so one pass over adjacent pairs is enough.
    let mut needed = 0;
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            return max_len;
        }
        needed = needed.max(common_prefix_len(pair[0], pair[1]) + 1);
    }

    needed.max(min_size)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn truncated(ids: &[&str], len: usize) -> HashSet<String> {
        ids.iter().map(|s| s.chars().take(len).collect()).collect()
    }

    #[test]
    fn differing_at_eighth_character() {
        let ids = [
            "slot1-u1-aaaa-bbbb",
            "slot1-u2-aaaa-bbbb",
        ];
        // Shared "slot1-u" (7 chars), different at position 8.
        assert_eq!(shortest_unique_prefix(&ids, 4), 8);
    }

    #[test]
    fn minimum_is_respected() {
        let ids = ["abcdef", "zyxwvu"];
        assert_eq!(shortest_unique_prefix(&ids, 4), 4);
        assert_eq!(shortest_unique_prefix(&ids, 1), 1);
    }

    #[test]
    fn empty_and_single_sets_use_minimum() {
        let empty: [&str; 0] = [];
        assert_eq!(shortest_unique_prefix(&empty, 4), 4);
        assert_eq!(shortest_unique_prefix(&["0123456789"], 4), 4);
    }

    #[test]
    fn duplicates_return_full_length() {
        let ids = ["abcdef", "abcdef", "abzzzz"];
        assert_eq!(shortest_unique_prefix(&ids, 2), 6);
    }

    #[test]
    fn duplicates_shorter_than_longest_return_full_length() {
        let ids = ["abc", "abc", "abcdefgh"];
        assert_eq!(shortest_unique_prefix(&ids, 1), 8);
    }

    #[test]
    fn one_id_prefix_of_another() {
        let ids = ["abc", "abcd"];
        let len = shortest_unique_prefix(&ids, 1);
        assert_eq!(len, 4);
        assert_eq!(truncated(&ids, len).len(), 2);
    }

    #[test]
    fn result_is_minimal_and_unique() {
        let ids = [
            "3f2a0c1e-0000-4000-8000-000000000001",
            "3f2a0c1e-0000-4000-8000-000000000002",
            "3f2b9999-0000-4000-8000-000000000003",
            "91aa0000-0000-4000-8000-000000000004",
        ];
        let min = 4;
        let len = shortest_unique_prefix(&ids, min);

        assert!(len >= min);
        assert_eq!(truncated(&ids, len).len(), ids.len());
        for shorter in min..len {
            assert!(
                truncated(&ids, shorter).len() < ids.len(),
                "length {shorter} would already be unique"
            );
        }
    }

    #[test]
    fn random_uuids_are_unique_at_result() {
        let ids: Vec<String> = (0..50).map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let len = shortest_unique_prefix(&refs, MIN_PREFIX_SIZE);
        assert!(len >= MIN_PREFIX_SIZE);
        assert_eq!(truncated(&refs, len).len(), refs.len());
    }
}
