//! Host locale to module language.

use std::env;

use crate::abi::Language;

// Matched against expanded locale names. `C` ends the search with the default language.
const LOCALES: &[(&str, Language)] = &[
    ("ar", Language::Arabic),
    ("de", Language::German),
    ("en", Language::English),
    ("eo", Language::Esperanto),
    ("es", Language::Spanish),
    ("fr", Language::French),
    ("it", Language::Italian),
    ("jp", Language::Japanese),
    ("ko", Language::Korean),
    ("nl", Language::Dutch),
    ("pl", Language::Polish),
    ("pt_BR", Language::PortugueseBrazil),
    ("pt_PT", Language::PortuguesePortugal),
    ("ru", Language::Russian),
    ("vi", Language::Vietnamese),
    ("zh_CN", Language::ChineseSimplified),
    ("zh_HK", Language::ChineseTraditional),
    ("zh_SG", Language::ChineseSimplified),
    ("zh_TW", Language::ChineseTraditional),
    ("C", Language::DEFAULT),
];

/// Locale names of the process, read from `LANGUAGE`, `LC_ALL`, `LC_MESSAGES` and `LANG`
/// (first non-empty wins; `:`-separated lists are split).
pub fn host_locales() -> Vec<String> {
    ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.is_empty())
        .map(|value| {
            value
                .split(':')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Variants of a locale name, most specific first:
/// `pt_BR.UTF-8@euro` gives `pt_BR.UTF-8@euro`, `pt_BR`, `pt`.
fn expand(locale: &str) -> Vec<&str> {
    let base = locale.split(['.', '@']).next().unwrap_or(locale);
    let lang = base.split('_').next().unwrap_or(base);

    let mut variants = vec![locale];
    for variant in [base, lang] {
        if !variant.is_empty() && !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}

/// First language of the table matching a locale, in locale order.
pub fn language_for<S: AsRef<str>>(locales: &[S]) -> Language {
    for locale in locales {
        let locale = match locale.as_ref() {
            "POSIX" => "C",
            other => other,
        };
        for variant in expand(locale) {
            if let Some((_, language)) = LOCALES.iter().find(|(name, _)| *name == variant) {
                return *language;
            }
        }
    }
    Language::DEFAULT
}
