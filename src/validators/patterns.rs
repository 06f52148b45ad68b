//! XSD regular expressions
//!
//! XSD patterns are always anchored, have no `^`/`$` metacharacters, and
//! add the `\i`, `\c` name escapes, `\p{IsBlock}` block escapes and
//! character class subtraction (`[a-z-[aeiou]]`). They are translated to
//! the `regex` crate's syntax, which covers everything else natively
//! (class subtraction maps to `--`).

use crate::error::{Error, Result};
use regex::Regex;

const NAME_START: &str = r":A-Z_a-z\x{C0}-\x{D6}\x{D8}-\x{F6}\x{F8}-\x{2FF}\x{370}-\x{37D}\x{37F}-\x{1FFF}\x{200C}-\x{200D}\x{2070}-\x{218F}\x{2C00}-\x{2FEF}\x{3001}-\x{D7FF}\x{F900}-\x{FDCF}\x{FDF0}-\x{FFFD}\x{10000}-\x{EFFFF}";
const NAME_EXTRA: &str = r"\-.0-9\x{B7}\x{300}-\x{36F}\x{203F}-\x{2040}";

/// Unicode block ranges for the `\p{IsBlock}` escapes
const BLOCKS: &[(&str, u32, u32)] = &[
    ("BasicLatin", 0x0000, 0x007F),
    ("Latin-1Supplement", 0x0080, 0x00FF),
    ("LatinExtended-A", 0x0100, 0x017F),
    ("LatinExtended-B", 0x0180, 0x024F),
    ("IPAExtensions", 0x0250, 0x02AF),
    ("SpacingModifierLetters", 0x02B0, 0x02FF),
    ("CombiningDiacriticalMarks", 0x0300, 0x036F),
    ("Greek", 0x0370, 0x03FF),
    ("GreekandCoptic", 0x0370, 0x03FF),
    ("Cyrillic", 0x0400, 0x04FF),
    ("Armenian", 0x0530, 0x058F),
    ("Hebrew", 0x0590, 0x05FF),
    ("Arabic", 0x0600, 0x06FF),
    ("Syriac", 0x0700, 0x074F),
    ("Thaana", 0x0780, 0x07BF),
    ("Devanagari", 0x0900, 0x097F),
    ("Bengali", 0x0980, 0x09FF),
    ("Gurmukhi", 0x0A00, 0x0A7F),
    ("Gujarati", 0x0A80, 0x0AFF),
    ("Tamil", 0x0B80, 0x0BFF),
    ("Thai", 0x0E00, 0x0E7F),
    ("Lao", 0x0E80, 0x0EFF),
    ("Tibetan", 0x0F00, 0x0FFF),
    ("Georgian", 0x10A0, 0x10FF),
    ("HangulJamo", 0x1100, 0x11FF),
    ("LatinExtendedAdditional", 0x1E00, 0x1EFF),
    ("GreekExtended", 0x1F00, 0x1FFF),
    ("GeneralPunctuation", 0x2000, 0x206F),
    ("SuperscriptsandSubscripts", 0x2070, 0x209F),
    ("CurrencySymbols", 0x20A0, 0x20CF),
    ("LetterlikeSymbols", 0x2100, 0x214F),
    ("NumberForms", 0x2150, 0x218F),
    ("Arrows", 0x2190, 0x21FF),
    ("MathematicalOperators", 0x2200, 0x22FF),
    ("MiscellaneousTechnical", 0x2300, 0x23FF),
    ("BoxDrawing", 0x2500, 0x257F),
    ("GeometricShapes", 0x25A0, 0x25FF),
    ("MiscellaneousSymbols", 0x2600, 0x26FF),
    ("Dingbats", 0x2700, 0x27BF),
    ("CJKSymbolsandPunctuation", 0x3000, 0x303F),
    ("Hiragana", 0x3040, 0x309F),
    ("Katakana", 0x30A0, 0x30FF),
    ("CJKUnifiedIdeographs", 0x4E00, 0x9FFF),
    ("HangulSyllables", 0xAC00, 0xD7AF),
    ("PrivateUse", 0xE000, 0xF8FF),
    ("CJKCompatibilityIdeographs", 0xF900, 0xFAFF),
    ("AlphabeticPresentationForms", 0xFB00, 0xFB4F),
    ("ArabicPresentationForms-B", 0xFE70, 0xFEFF),
    ("HalfwidthandFullwidthForms", 0xFF00, 0xFFEF),
    ("Specials", 0xFFF0, 0xFFFF),
];

/// A compiled XSD regular expression
#[derive(Debug, Clone)]
pub struct XsdRegex {
    regex: Regex,
}

impl XsdRegex {
    /// Translate and compile an XSD pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate(pattern)?;
        let regex = Regex::new(&format!("^(?:{})$", translated))
            .map_err(|e| Error::value(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { regex })
    }

    /// Whether the entire input matches
    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }
}

/// Translate an XSD pattern to `regex` crate syntax
pub fn translate(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i = translate_escape(&chars, i, &mut out, pattern)?;
                continue;
            }
            '[' => {
                i = translate_class(&chars, i, &mut out, pattern)?;
                continue;
            }
            '.' => out.push_str(r"[^\n\r]"),
            '^' => out.push_str(r"\^"),
            '$' => out.push_str(r"\$"),
            ']' => return Err(invalid(pattern, "unbalanced ']'")),
            _ => out.push(c),
        }
        i += 1;
    }
    Ok(out)
}

fn invalid(pattern: &str, reason: &str) -> Error {
    Error::value(format!("invalid pattern '{}': {}", pattern, reason))
}

/// Class body (without brackets) for a multi-character or category escape
fn escape_class(chars: &[char], i: usize, pattern: &str) -> Result<Option<(String, bool, usize)>> {
    // Returns (class body, negated, index after escape)
    let c = chars[i + 1];
    let simple = |body: &str, neg: bool| Ok(Some((body.to_string(), neg, i + 2)));
    match c {
        's' => simple(r" \t\n\r", false),
        'S' => simple(r" \t\n\r", true),
        'w' => simple(r"\p{P}\p{Z}\p{C}", true),
        'W' => simple(r"\p{P}\p{Z}\p{C}", false),
        'i' => simple(NAME_START, false),
        'I' => simple(NAME_START, true),
        'c' => simple(&format!("{}{}", NAME_START, NAME_EXTRA), false),
        'C' => simple(&format!("{}{}", NAME_START, NAME_EXTRA), true),
        'p' | 'P' => {
            if chars.get(i + 2) != Some(&'{') {
                return Err(invalid(pattern, "expected '{' after \\p"));
            }
            let close = chars[i + 3..]
                .iter()
                .position(|&ch| ch == '}')
                .map(|p| p + i + 3)
                .ok_or_else(|| invalid(pattern, "unterminated \\p{...}"))?;
            let name: String = chars[i + 3..close].iter().collect();
            let negated = c == 'P';
            let body = if let Some(block) = name.strip_prefix("Is") {
                let (_, lo, hi) = BLOCKS
                    .iter()
                    .find(|(n, _, _)| *n == block)
                    .ok_or_else(|| invalid(pattern, &format!("unknown block '{}'", block)))?;
                format!(r"\x{{{:X}}}-\x{{{:X}}}", lo, hi)
            } else {
                format!(r"\p{{{}}}", name)
            };
            Ok(Some((body, negated, close + 1)))
        }
        _ => Ok(None),
    }
}

fn single_escape(c: char) -> Option<&'static str> {
    Some(match c {
        'n' => r"\n",
        'r' => r"\r",
        't' => r"\t",
        '\\' => r"\\",
        '|' => r"\|",
        '.' => r"\.",
        '-' => r"\-",
        '^' => r"\^",
        '?' => r"\?",
        '*' => r"\*",
        '+' => r"\+",
        '{' => r"\{",
        '}' => r"\}",
        '(' => r"\(",
        ')' => r"\)",
        '[' => r"\[",
        ']' => r"\]",
        'd' => r"\d",
        'D' => r"\D",
        _ => return None,
    })
}

fn translate_escape(chars: &[char], i: usize, out: &mut String, pattern: &str) -> Result<usize> {
    let Some(&c) = chars.get(i + 1) else {
        return Err(invalid(pattern, "trailing backslash"));
    };
    if let Some(s) = single_escape(c) {
        out.push_str(s);
        return Ok(i + 2);
    }
    match escape_class(chars, i, pattern)? {
        Some((body, negated, next)) => {
            out.push('[');
            if negated {
                out.push('^');
            }
            out.push_str(&body);
            out.push(']');
            Ok(next)
        }
        None => Err(invalid(pattern, &format!("unknown escape '\\{}'", c))),
    }
}

fn translate_class(chars: &[char], start: usize, out: &mut String, pattern: &str) -> Result<usize> {
    let mut i = start + 1;
    out.push('[');
    if chars.get(i) == Some(&'^') {
        out.push('^');
        i += 1;
    }
    let body_start = i;
    loop {
        let Some(&c) = chars.get(i) else {
            return Err(invalid(pattern, "unterminated character class"));
        };
        match c {
            ']' if i > body_start => {
                out.push(']');
                return Ok(i + 1);
            }
            '-' if chars.get(i + 1) == Some(&'[') => {
                // Subtraction must be the last thing in the class
                out.push_str("--");
                i = translate_class(chars, i + 1, out, pattern)?;
                if chars.get(i) != Some(&']') {
                    return Err(invalid(pattern, "subtraction must end the class"));
                }
                out.push(']');
                return Ok(i + 1);
            }
            '-' => {
                let at_edge = i == body_start || chars.get(i + 1) == Some(&']');
                out.push_str(if at_edge { r"\-" } else { "-" });
                i += 1;
            }
            '\\' => {
                let Some(&e) = chars.get(i + 1) else {
                    return Err(invalid(pattern, "trailing backslash"));
                };
                if let Some(s) = single_escape(e) {
                    out.push_str(s);
                    i += 2;
                } else if let Some((body, negated, next)) = escape_class(chars, i, pattern)? {
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    out.push_str(&body);
                    out.push(']');
                    i = next;
                } else {
                    return Err(invalid(pattern, &format!("unknown escape '\\{}'", e)));
                }
            }
            '[' => {
                out.push_str(r"\[");
                i += 1;
            }
            '&' | '~' => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, input: &str) -> bool {
        XsdRegex::new(pattern).unwrap().is_match(input)
    }

    #[test]
    fn test_patterns_are_anchored() {
        assert!(matches("[0-9]{3}", "123"));
        assert!(!matches("[0-9]{3}", "1234"));
        assert!(!matches("abc", "xabc"));
    }

    #[test]
    fn test_caret_and_dollar_are_literal() {
        assert!(matches("a^b$", "a^b$"));
        assert!(!matches("^a", "a"));
    }

    #[test]
    fn test_name_escapes() {
        assert!(matches(r"\i\c*", "_foo-1.x"));
        assert!(!matches(r"\i\c*", "1foo"));
        assert!(matches(r"\S+", "abc"));
        assert!(!matches(r"\s", "\u{A0}"));
    }

    #[test]
    fn test_class_subtraction() {
        assert!(matches("[a-z-[aeiou]]+", "bcd"));
        assert!(!matches("[a-z-[aeiou]]+", "bad"));
    }

    #[test]
    fn test_category_and_block() {
        assert!(matches(r"\p{Lu}+", "ABC"));
        assert!(!matches(r"\p{Lu}+", "AbC"));
        assert!(matches(r"\p{IsBasicLatin}*", "plain"));
        assert!(!matches(r"\p{IsBasicLatin}*", "caf\u{E9}"));
        assert!(XsdRegex::new(r"\p{IsNoSuchBlock}").is_err());
    }

    #[test]
    fn test_dot_excludes_line_breaks() {
        assert!(matches("a.c", "abc"));
        assert!(!matches("a.c", "a\rc"));
    }

    #[test]
    fn test_hyphen_edges() {
        assert!(matches("[+-]?[0-9]+", "-12"));
        assert!(matches("[-a]", "-"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(XsdRegex::new("[abc").is_err());
        assert!(XsdRegex::new(r"\q").is_err());
    }
}
