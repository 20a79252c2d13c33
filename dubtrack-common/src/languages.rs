//! Display names and flags for target languages
//!
//! Mirrors the table the backend uses when it builds status payloads, so a
//! payload that omits `languageName` or `flag` still renders sensibly.

const LANGUAGES: &[(&str, &str, &str)] = &[
    ("en", "English", "🇺🇸"),
    ("es", "Spanish", "🇪🇸"),
    ("fr", "French", "🇫🇷"),
    ("de", "German", "🇩🇪"),
    ("ja", "Japanese", "🇯🇵"),
    ("zh", "Chinese", "🇨🇳"),
    ("ko", "Korean", "🇰🇷"),
    ("pt", "Portuguese", "🇵🇹"),
    ("it", "Italian", "🇮🇹"),
    ("ru", "Russian", "🇷🇺"),
    ("ar", "Arabic", "🇸🇦"),
    ("hi", "Hindi", "🇮🇳"),
];

const UNKNOWN_FLAG: &str = "🌐";

/// Display name and flag for a language code.
///
/// Regional codes (`es-ES`) fall back to their primary subtag. Unknown codes
/// yield the upper-cased code and a globe.
pub fn language_info(code: &str) -> (String, String) {
    let primary = code
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or(code)
        .to_ascii_lowercase();

    LANGUAGES
        .iter()
        .find(|(c, _, _)| *c == primary)
        .map(|(_, name, flag)| (name.to_string(), flag.to_string()))
        .unwrap_or_else(|| (code.to_ascii_uppercase(), UNKNOWN_FLAG.to_string()))
}
