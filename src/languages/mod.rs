//! Static language tables shared by the recognizer, the translator and the
//! block normalizer.

/// Translator tag used when the source language is `auto` or unknown.
pub const FALLBACK_TRANSLATOR_TAG: &str = "en";
/// Recognizer tag used when the source language is `auto` or unknown.
pub const FALLBACK_RECOGNIZER_TAG: &str = "eng";

struct LanguageEntry {
    code: &'static str,
    translator_tag: &'static str,
    recognizer_tag: &'static str,
    spaced: bool,
}

const LANGUAGES: &[LanguageEntry] = &[
    entry("en", "en", "eng", true),
    entry("ja", "ja", "jpn", false),
    entry("zh", "zh-Hans", "chi_sim", false),
    entry("zh-cn", "zh-Hans", "chi_sim", false),
    entry("zh-hans", "zh-Hans", "chi_sim", false),
    entry("zh-tw", "zh-Hant", "chi_tra", false),
    entry("zh-hant", "zh-Hant", "chi_tra", false),
    entry("ko", "ko", "kor", true),
    entry("fr", "fr", "fra", true),
    entry("de", "de", "deu", true),
    entry("es", "es", "spa", true),
    entry("it", "it", "ita", true),
    entry("pt", "pt", "por", true),
    entry("ru", "ru", "rus", true),
    entry("uk", "uk", "ukr", true),
    entry("pl", "pl", "pol", true),
    entry("nl", "nl", "nld", true),
    entry("tr", "tr", "tur", true),
    entry("vi", "vi", "vie", true),
    entry("id", "id", "ind", true),
    entry("ar", "ar", "ara", true),
    entry("hi", "hi", "hin", true),
    entry("th", "th", "tha", false),
    entry("lo", "lo", "lao", false),
    entry("km", "km", "khm", false),
    entry("my", "my", "mya", false),
];

const fn entry(
    code: &'static str,
    translator_tag: &'static str,
    recognizer_tag: &'static str,
    spaced: bool,
) -> LanguageEntry {
    LanguageEntry {
        code,
        translator_tag,
        recognizer_tag,
        spaced,
    }
}

fn lookup(code: &str) -> Option<&'static LanguageEntry> {
    let code = normalize_code(code);
    if code.is_empty() || code == "auto" {
        return None;
    }
    LANGUAGES
        .iter()
        .find(|entry| entry.code == code)
        .or_else(|| {
            let base = code.split(['-', '_']).next()?;
            LANGUAGES.iter().find(|entry| entry.code == base)
        })
}

pub fn is_known(code: &str) -> bool {
    lookup(code).is_some()
}

/// Maps a user-facing code to the translator's tag. `auto` and unknown codes
/// collapse to [`FALLBACK_TRANSLATOR_TAG`].
pub fn translator_tag(code: &str) -> &'static str {
    lookup(code)
        .map(|entry| entry.translator_tag)
        .unwrap_or(FALLBACK_TRANSLATOR_TAG)
}

pub fn recognizer_tag(code: &str) -> &'static str {
    lookup(code)
        .map(|entry| entry.recognizer_tag)
        .unwrap_or(FALLBACK_RECOGNIZER_TAG)
}

/// Separator placed between recognized fragments of one line.
pub fn joiner_for(code: &str) -> &'static str {
    match lookup(code) {
        Some(entry) if !entry.spaced => "",
        _ => " ",
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase().replace('_', "-")
}
