//! Sort key derivation
//!
//! The sort key groups records for by-letter lookup and names the export
//! bucket directory. Turning CJK text into a transliteration is the job of an
//! external library plugged in through [`SortKey`]; the built-in
//! [`FirstLetter`] only understands Latin text, including tone-marked pinyin.

/// Derives a short grouping key from a record's sort source
pub trait SortKey: Send + Sync {
    fn sort_key(&self, source: &str) -> String;
}

impl<F> SortKey for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sort_key(&self, source: &str) -> String {
        self(source)
    }
}

/// Bucket for keys starting with a digit
pub const DIGIT_BUCKET: &str = "0-9";

/// Bucket for everything that has no Latin first letter
pub const OTHER_BUCKET: &str = "#";

/// Upper-cased first letter of the source
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstLetter;

impl SortKey for FirstLetter {
    fn sort_key(&self, source: &str) -> String {
        let Some(first) = source.chars().find(|c| c.is_alphanumeric()) else {
            return OTHER_BUCKET.to_string();
        };

        if first.is_ascii_digit() {
            return DIGIT_BUCKET.to_string();
        }

        match fold_tone_mark(first) {
            Some(letter) => letter.to_string(),
            None if first.is_ascii_alphabetic() => first.to_ascii_uppercase().to_string(),
            None => OTHER_BUCKET.to_string(),
        }
    }
}

/// Maps a tone-marked pinyin vowel to its bare upper-case letter
fn fold_tone_mark(c: char) -> Option<char> {
    let letter = match c {
        'ā' | 'á' | 'ǎ' | 'à' | 'Ā' | 'Á' | 'Ǎ' | 'À' => 'A',
        'ē' | 'é' | 'ě' | 'è' | 'Ē' | 'É' | 'Ě' | 'È' => 'E',
        'ī' | 'í' | 'ǐ' | 'ì' | 'Ī' | 'Í' | 'Ǐ' | 'Ì' => 'I',
        'ō' | 'ó' | 'ǒ' | 'ò' | 'Ō' | 'Ó' | 'Ǒ' | 'Ò' => 'O',
        'ū' | 'ú' | 'ǔ' | 'ù' | 'Ū' | 'Ú' | 'Ǔ' | 'Ù' => 'U',
        'ü' | 'ǖ' | 'ǘ' | 'ǚ' | 'ǜ' | 'Ü' | 'Ǖ' | 'Ǘ' | 'Ǚ' | 'Ǜ' => 'U',
        _ => return None,
    };
    Some(letter)
}
