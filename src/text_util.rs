//! Character-level helpers shared by the normalizer, tokenizer and
//! gazetteer.

/// Right-to-left mark, left-to-right mark and byte-order mark.
const INVISIBLE_MARKS: [char; 3] = ['\u{200F}', '\u{200E}', '\u{FEFF}'];

/// Hebrew letter block (letters, points, maqaf, geresh, gershayim).
pub fn is_hebrew(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}

pub fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic()
}

pub fn contains_hebrew(s: &str) -> bool {
    s.chars().any(is_hebrew)
}

pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// The sorted multiset of ASCII digits in `s`.
pub fn sorted_digits(s: &str) -> Vec<char> {
    let mut digits: Vec<char> = s.chars().filter(char::is_ascii_digit).collect();
    digits.sort_unstable();
    digits
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Map a final-form Hebrew letter to its base form.
fn base_letter(c: char) -> char {
    match c {
        'ך' => 'כ',
        'ם' => 'מ',
        'ן' => 'נ',
        'ף' => 'פ',
        'ץ' => 'צ',
        other => other,
    }
}

/// Key under which a surface string is stored in and looked up from the
/// gazetteer.
///
/// Strips bidi and byte-order marks, folds final letters to their base
/// form, collapses whitespace runs to one space, trims and lowercases.
///
/// ```
/// use dentlink::text_util::surface_key;
///
/// assert_eq!(surface_key("\u{200F}שתלים  Zirconia "), "שתלימ zirconia");
/// ```
pub fn surface_key(s: &str) -> String {
    let folded: String = s
        .chars()
        .filter(|c| !INVISIBLE_MARKS.contains(c))
        .map(base_letter)
        .collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Surface key with separators removed, used for edit-distance comparison
/// so that `מולטי-יוניט` and `מולטיוניט` differ only by their letters.
pub fn fuzzy_form(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '\u{05F4}' | '\u{05F3}'))
        .collect()
}

/// Byte offset to character offset table for one string.
///
/// Regex matches report byte offsets while every span in the pipeline is
/// expressed in characters.
pub struct CharOffsets {
    starts: Vec<usize>,
    byte_len: usize,
}

impl CharOffsets {
    pub fn new(text: &str) -> Self {
        Self {
            starts: text.char_indices().map(|(b, _)| b).collect(),
            byte_len: text.len(),
        }
    }

    /// Character offset of a byte offset that falls on a char boundary.
    pub fn to_char(&self, byte: usize) -> usize {
        match self.starts.binary_search(&byte) {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }

    pub fn to_byte(&self, ch: usize) -> usize {
        self.starts.get(ch).copied().unwrap_or(self.byte_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_key_folds_final_letters_and_marks() {
        assert_eq!(surface_key("שתלים"), "שתלימ");
        assert_eq!(surface_key("\u{FEFF}Multi  Unit\u{200E}"), "multi unit");
        assert_eq!(surface_key("   "), "");
    }

    #[test]
    fn fuzzy_form_drops_separators() {
        assert_eq!(fuzzy_form("מולטי-יוניט"), "מולטייוניט");
        assert_eq!(fuzzy_form("מ\u{05F4}מ"), "ממ");
        assert_eq!(fuzzy_form("multi unit"), "multiunit");
    }

    #[test]
    fn sorted_digits_ignores_other_characters() {
        assert_eq!(sorted_digits("שתל 14 18/0"), vec!['0', '1', '1', '4', '8']);
        assert!(sorted_digits("אין מספרים").is_empty());
    }

    #[test]
    fn char_offsets_round_trip_on_mixed_scripts() {
        let text = "שתל 14mm";
        let offsets = CharOffsets::new(text);
        let byte = text.find("14").unwrap();
        assert_eq!(offsets.to_char(byte), 4);
        assert_eq!(offsets.to_byte(4), byte);
        assert_eq!(offsets.to_char(text.len()), char_len(text));
        assert_eq!(offsets.to_byte(char_len(text)), text.len());
    }

    #[test]
    fn digit_predicates() {
        assert!(is_all_digits("0123"));
        assert!(!is_all_digits(""));
        assert!(!is_all_digits("12a"));
        assert!(contains_hebrew("abc ש"));
        assert!(!contains_hebrew("abc"));
    }
}
