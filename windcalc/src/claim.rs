//! Extraction of numeric crosswind claims from free-form answer text.
//!
//! The accepted grammar is deliberately small: a numeric token and a knots
//! unit within a two-token window, in a sentence that also carries a
//! crosswind cue, in either order ("7.4 knots crosswind", "crosswind is
//! 7.4 kt"). Implemented as a plain token scan so the behavior does not
//! depend on a regex engine's semantics.

/// Longest first, so "knots" wins over "knot" when stripping suffixes.
const UNIT_WORDS: [&str; 4] = ["knots", "knot", "kts", "kt"];

const CUE_PHRASES: [&str; 3] = ["crosswind", "cross wind", "x wind"];

/// Returns the first crosswind figure claimed in `text`, in knots.
pub fn extract_claim(text: &str) -> Option<f64> {
    split_sentences(text)
        .into_iter()
        .map(|sentence| normalize(&sentence))
        .filter(|sentence| !is_hypothetical(sentence))
        .filter(|sentence| has_crosswind_cue(sentence))
        .find_map(|sentence| first_claimed_knots(&sentence))
}

/// Sentence boundaries at `.`, `!`, `?`, `;`, except a `.` flanked by digits,
/// which is a decimal point.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let decimal_point = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);
        if matches!(c, '.' | '!' | '?' | ';') && !decimal_point {
            if !current.trim().is_empty() {
                sentences.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current);
    }
    sentences
}

fn normalize(sentence: &str) -> String {
    sentence.to_lowercase().replace('-', " ")
}

fn is_hypothetical(sentence: &str) -> bool {
    sentence.trim_start().starts_with("if ")
}

fn has_crosswind_cue(sentence: &str) -> bool {
    CUE_PHRASES.iter().any(|cue| sentence.contains(cue))
}

fn first_claimed_knots(sentence: &str) -> Option<f64> {
    let tokens: Vec<&str> = sentence.split_whitespace().collect();
    for (i, raw) in tokens.iter().enumerate() {
        let token = trim_punctuation(raw);
        if token.is_empty() {
            continue;
        }
        // "7.4kt" with the unit glued on.
        if let Some(stripped) = strip_unit_suffix(token) {
            if let Ok(value) = stripped.parse::<f64>() {
                return Some(value);
            }
            continue;
        }
        if token.parse::<f64>().is_ok() {
            let unit_follows = tokens[i + 1..]
                .iter()
                .take(2)
                .any(|next| is_unit_word(trim_punctuation(next)));
            if unit_follows {
                return token.parse().ok();
            }
        }
    }
    None
}

fn trim_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.')
}

fn strip_unit_suffix(token: &str) -> Option<&str> {
    UNIT_WORDS
        .iter()
        .find_map(|unit| token.strip_suffix(unit))
        .filter(|prefix| !prefix.is_empty())
}

fn is_unit_word(token: &str) -> bool {
    UNIT_WORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_after_cue() {
        assert_eq!(extract_claim("The crosswind is 7.4 kt."), Some(7.4));
        assert_eq!(extract_claim("Crosswind component: 12 knots"), Some(12.0));
    }

    #[test]
    fn test_claim_before_cue() {
        assert_eq!(
            extract_claim("Expect 7.4 knots crosswind on final."),
            Some(7.4)
        );
    }

    #[test]
    fn test_hyphen_and_glued_units() {
        assert_eq!(extract_claim("A 7.4-knot crosswind."), Some(7.4));
        assert_eq!(extract_claim("crosswind of 7.4kt"), Some(7.4));
        assert_eq!(extract_claim("X-wind 15kts today"), Some(15.0));
        assert_eq!(extract_claim("cross-wind near 6 kt"), Some(6.0));
    }

    #[test]
    fn test_requires_cue_and_unit() {
        // Unit without a crosswind cue in the sentence.
        assert_eq!(extract_claim("Winds aloft are 25 knots."), None);
        // Cue without any unit near a number.
        assert_eq!(extract_claim("The crosswind on runway 26 is strong."), None);
        assert_eq!(extract_claim(""), None);
    }

    #[test]
    fn test_skips_hypothetical_sentence() {
        let text = "If the crosswind were 30 kt you would divert. The crosswind is 7.4 kt.";
        assert_eq!(extract_claim(text), Some(7.4));
    }

    #[test]
    fn test_first_match_wins() {
        let text = "Crosswind is 5 kt. Later it could be a crosswind of 9 kt.";
        assert_eq!(extract_claim(text), Some(5.0));
    }

    #[test]
    fn test_runway_number_not_mistaken_for_claim() {
        assert_eq!(
            extract_claim("On runway 26 the crosswind is 6.4 kt."),
            Some(6.4)
        );
    }

    #[test]
    fn test_extraction_grid_one_decimal() {
        for tenths in 0..1000u32 {
            let value = f64::from(tenths) / 10.0;
            let text = format!("crosswind is {value:.1} kt");
            let extracted = extract_claim(&text).unwrap();
            assert!(
                (extracted - value).abs() < 1e-6,
                "{text:?} extracted {extracted}"
            );
        }
    }

    #[test]
    fn test_decimal_point_does_not_split_sentence() {
        assert_eq!(
            extract_claim("Crosswind is 10.25 knots on runway 17."),
            Some(10.25)
        );
    }
}
