//! Name inflection for resource lookup: "article" -> "ArticlesApi".

use heck::ToUpperCamelCase;

pub const API_SUFFIX: &str = "Api";

pub fn singularize(word: &str) -> String {
    pluralizer::pluralize(word, 1, false)
}

pub fn pluralize(word: &str) -> String {
    pluralizer::pluralize(word, 2, false)
}

/// "product_variant" -> "ProductVariant".
pub fn camelize(word: &str) -> String {
    word.to_upper_camel_case()
}

/// Lowercased identifier used as a resource key.
pub fn normalize(word: &str) -> String {
    word.to_lowercase()
}

/// Conventional descriptor name: camelcase the singular stem, then pluralize it and append `Api`.
/// A trailing `Api` on the input is ignored, so "articles_api" and "article" agree.
pub fn canonical_api_name(value: &str) -> String {
    let camel = camelize(value);
    let stem = match camel.strip_suffix(API_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem,
        _ => camel.as_str(),
    };
    format!("{}{}", pluralize(&singularize(stem)), API_SUFFIX)
}

/// Exact descriptor path with no pluralization: "product::variant" -> "Product::VariantApi".
pub fn strict_api_name(value: &str) -> String {
    let segments: Vec<String> = value
        .split(|c| c == '/' || c == ':')
        .filter(|s| !s.is_empty())
        .map(camelize)
        .collect();
    format!("{}{}", segments.join("::"), API_SUFFIX)
}
