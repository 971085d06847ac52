//! Fuzzy "did you mean" suggestions for unknown commands.

/// Minimum normalised similarity for a suggestion.
pub const SUGGESTION_THRESHOLD: f64 = 0.6;

/// Returns the candidate most similar to `input`, if any scores at least
/// [`SUGGESTION_THRESHOLD`].
///
/// Similarity is normalised Levenshtein distance over lowercase strings.
/// Ties keep the first candidate.
pub fn suggest<I, S>(input: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return None;
    }

    let mut best: Option<(f64, String)> = None;
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let score = strsim::normalized_levenshtein(&input, &candidate.to_lowercase());
        if score < SUGGESTION_THRESHOLD {
            continue;
        }
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, candidate.to_string()));
        }
    }
    best.map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_close_command() {
        let names = ["ping", "addprem", "delprem", "menu"];
        assert_eq!(suggest("adprem", names).as_deref(), Some("addprem"));
        assert_eq!(suggest("MENUU", names).as_deref(), Some("menu"));
    }

    #[test]
    fn nothing_close_enough() {
        assert_eq!(suggest("weather", ["ping", "menu"]), None);
        assert_eq!(suggest("", ["ping"]), None);
        assert_eq!(suggest("ping", Vec::<String>::new()), None);
    }
}
