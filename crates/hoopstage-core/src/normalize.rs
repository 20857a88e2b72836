// Player-name normalization: mojibake repair, diacritic stripping and the
// ASCII key used to match names across providers.
//
// Everything here is a pure function of its input. `make_key` must produce the
// same key on every machine, so nothing consults the locale.

use encoding_rs::WINDOWS_1252;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Characters that show up when UTF-8 bytes were decoded as a single-byte
/// code page. Repair is only attempted when one of these is present.
const MOJIBAKE_MARKERS: &[char] = &['Ã', 'Ä', 'Â', 'â', '€', 'œ', '\u{FFFD}', 'Å'];

/// Letters that NFKD leaves intact but that have an obvious ASCII spelling.
const LETTER_SUBSTITUTIONS: &[(char, &str)] = &[
    ('Ł', "L"),
    ('ł', "l"),
    ('Đ', "D"),
    ('đ', "d"),
    ('Ø', "O"),
    ('ø', "o"),
    ('ß', "ss"),
    ('Æ', "AE"),
    ('æ', "ae"),
    ('ı', "i"),
];

/// Single-byte code pages tried, in order, when re-encoding mojibake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodePage {
    Latin1,
    Windows1252,
}

const REPAIR_CODE_PAGES: &[CodePage] = &[CodePage::Latin1, CodePage::Windows1252];

/// Upper bound on clean-up passes in `normalize_display`. Each successful
/// repair shortens the text, so real names settle in two or three.
const MAX_CLEANUP_PASSES: usize = 8;

impl CodePage {
    /// Encode `s` into this code page, or `None` if any character has no
    /// byte in it.
    fn encode(self, s: &str) -> Option<Vec<u8>> {
        match self {
            CodePage::Latin1 => s
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
            CodePage::Windows1252 => {
                let (bytes, _, had_unmappable) = WINDOWS_1252.encode(s);
                if had_unmappable {
                    None
                } else {
                    Some(bytes.into_owned())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Undo UTF-8 text that was mis-decoded through Latin-1 or Windows-1252,
/// e.g. `"JokiÄ‡"` -> `"Jokić"`.
///
/// Best-effort: if no code page yields valid UTF-8 the input is returned
/// unchanged.
pub fn repair_mojibake(s: &str) -> String {
    if !s.contains(MOJIBAKE_MARKERS) {
        return s.to_string();
    }
    for page in REPAIR_CODE_PAGES {
        let Some(bytes) = page.encode(s) else {
            continue;
        };
        if let Ok(repaired) = String::from_utf8(bytes) {
            return repaired;
        }
    }
    s.to_string()
}

/// Decompose, drop combining marks, then apply the fixed letter table.
pub fn strip_diacritics(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.nfkd().filter(|c| !is_combining_mark(*c)) {
        match LETTER_SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

fn standardize_punctuation(s: &str) -> String {
    let replaced: String = s
        .chars()
        .filter(|c| *c != '.')
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '`' => '\'',
            other => other,
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cleanup_pass(s: &str) -> String {
    let repaired = repair_mojibake(s);
    let stripped = strip_diacritics(&repaired);
    standardize_punctuation(&stripped)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Clean a raw name into the accentless display form used everywhere
/// downstream. Never fails; blank input yields an empty string.
///
/// Stripping can expose a mojibake sequence the first repair could not see
/// (`"Ã"` folds to `"A"`, leaving the rest valid UTF-8), so passes repeat
/// until the text stops changing. The result is a fixed point:
/// `normalize_display(normalize_display(x)) == normalize_display(x)`.
pub fn normalize_display(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_CLEANUP_PASSES {
        if current.is_empty() {
            break;
        }
        let next = cleanup_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Matching key: normalized display name, lower-cased, ASCII letters and
/// digits only.
pub fn make_key(raw: &str) -> String {
    normalize_display(raw)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
