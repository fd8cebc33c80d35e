//! Soundex-style phonetic codes for Cyrillic and Latin words.
//!
//! A code is the upper-cased first letter followed by three digits. Vowels,
//! soft/hard signs, and repeated digits are skipped; short codes are padded
//! with `0`.

/// Encodes a single word. Returns `None` when the word has no letters.
///
/// # Example
///
/// ```rust
/// use dupscan::services::similarity::soundex;
///
/// assert_eq!(soundex("Robert").as_deref(), Some("R163"));
/// assert_eq!(soundex("Rupert").as_deref(), Some("R163"));
/// ```
#[must_use]
pub fn soundex(word: &str) -> Option<String> {
    let mut letters = word.chars().filter(|c| c.is_alphabetic());
    let first = letters.next()?;

    let mut code = String::with_capacity(8);
    code.extend(first.to_uppercase());

    let mut last = digit(first);
    let mut digits = 0;
    for c in letters {
        let d = digit(c);
        if d != 0 && d != last {
            code.push(char::from(b'0' + d));
            digits += 1;
            if digits == 3 {
                break;
            }
        }
        // Vowels separate repeats: "Tymczak" keeps both 2s.
        last = d;
    }
    for _ in digits..3 {
        code.push('0');
    }
    Some(code)
}

/// Phonetic digit for a letter; 0 for vowels and unmapped characters.
fn digit(c: char) -> u8 {
    let upper = c.to_uppercase().next().unwrap_or(c);
    match upper {
        'Б' | 'П' | 'Ф' | 'В' | 'B' | 'F' | 'P' | 'V' => 1,
        'Г' | 'К' | 'Х' | 'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => 2,
        'Д' | 'Т' | 'D' | 'T' => 3,
        'Ж' | 'Ш' | 'Щ' | 'Ч' => 4,
        'З' | 'С' | 'Ц' => 5,
        'Л' => 6,
        'М' | 'Н' => 7,
        'Р' => 8,
        'Й' => 9,
        'L' => 4,
        'M' | 'N' => 5,
        'R' => 6,
        _ => 0,
    }
}
