use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;
use std::iter;
use std::str;
use std::sync::Arc;

use log::debug;
use rust_stemmers::Algorithm;
use serde::Deserialize;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Error;
use crate::error::Result;

pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 255;

/// The stop words removed by default, the classic English list.
pub const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// One analyzed token. Offsets are byte offsets into the analyzed value and
/// `position` is the token's index in the tokenizer output, so removed stop
/// words leave gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: Cow<'a, str>,
    pub start: usize,
    pub end: usize,
    pub position: usize,
}

pub trait Analyzer: AnalyzerClone + Send + Sync + Debug {
    fn analyzer_type(&self) -> &'static str;
    fn analyze<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a>;

    /// Like `analyze`, but for raw bytes. Anything that is not UTF-8 yields
    /// no tokens.
    fn analyze_bytes<'a>(&self, value: &'a [u8]) -> Box<dyn Iterator<Item = Token<'a>> + 'a> {
        match str::from_utf8(value) {
            Ok(text) => self.analyze(text),
            Err(e) => {
                debug!("Skipping analysis of non-text value: {}", e);
                Box::new(iter::empty())
            }
        }
    }
}

pub trait AnalyzerClone {
    fn clone_box(&self) -> Box<dyn Analyzer>;
}

impl<T> AnalyzerClone for T
where
    T: 'static + Analyzer + Clone,
{
    fn clone_box(&self) -> Box<dyn Analyzer> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Analyzer> {
    fn clone(&self) -> Box<dyn Analyzer> {
        self.clone_box()
    }
}

pub trait Tokenizer: Send + Sync + Debug {
    fn tokenizer_type(&self) -> &'static str;
    fn tokenize<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a>;
}

pub trait Stemmer: Send + Sync + Debug {
    fn stem<'a>(&self, token: Cow<'a, str>) -> Cow<'a, str>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    Standard,
    Whitespace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemmerKind {
    Porter,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopWords {
    English,
    None,
    Custom(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub tokenizer: TokenizerKind,
    pub max_token_length: usize,
    pub stop_words: StopWords,
    pub stemmer: StemmerKind,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            tokenizer: TokenizerKind::Standard,
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
            stop_words: StopWords::English,
            stemmer: StemmerKind::Porter,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_token_length == 0 {
            return Err(Error::Configuration(
                "max_token_length must be at least 1".to_string(),
            ));
        }
        if let StopWords::Custom(words) = &self.stop_words {
            if words.iter().any(|w| w.trim().is_empty()) {
                return Err(Error::Configuration(
                    "custom stop words must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn Analyzer>> {
        self.validate()?;
        let mut builder = StandardAnalyzer::builder().max_token_length(self.max_token_length);
        builder = match self.tokenizer {
            TokenizerKind::Standard => builder.tokenizer(StandardTokenizer),
            TokenizerKind::Whitespace => builder.tokenizer(WhitespaceTokenizer),
        };
        builder = match &self.stop_words {
            StopWords::English => builder.stop_words(ENGLISH_STOP_WORDS.iter().cloned()),
            StopWords::None => builder.stop_words(iter::empty::<&str>()),
            StopWords::Custom(words) => builder.stop_words(words.iter().map(|w| w.as_str())),
        };
        builder = match self.stemmer {
            StemmerKind::Porter => builder.stemmer(PorterStemmer::new()),
            StemmerKind::None => builder.stemmer(NoopStemmer),
        };
        Ok(Box::new(builder.build()))
    }
}

/// Tokenizer, max token length, lower casing, stop words and stemming, in
/// that order. Every stage can be swapped through the builder.
#[derive(Clone, Debug)]
pub struct StandardAnalyzer {
    tokenizer: Arc<dyn Tokenizer>,
    max_token_length: usize,
    stop_words: Arc<HashSet<String>>,
    stemmer: Arc<dyn Stemmer>,
}

impl StandardAnalyzer {
    pub fn new() -> StandardAnalyzer {
        StandardAnalyzer::builder().build()
    }

    pub fn builder() -> StandardAnalyzerBuilder {
        StandardAnalyzerBuilder {
            tokenizer: Arc::new(StandardTokenizer),
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
            stop_words: ENGLISH_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            stemmer: Arc::new(PorterStemmer::new()),
        }
    }

    pub fn boxed(self) -> Box<StandardAnalyzer> {
        Box::new(self)
    }
}

impl Default for StandardAnalyzer {
    fn default() -> StandardAnalyzer {
        StandardAnalyzer::new()
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyzer_type(&self) -> &'static str {
        "standard"
    }

    fn analyze<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a> {
        let max_len = self.max_token_length;
        let stop_words = self.stop_words.clone();
        let stemmer = self.stemmer.clone();
        Box::new(
            self.tokenizer
                .tokenize(value)
                .map(|mut token| {
                    if token.text.chars().any(char::is_uppercase) {
                        token.text = Cow::Owned(token.text.to_lowercase());
                    }
                    token
                })
                // After lowercasing, which can add chars ('İ' becomes two).
                .map(move |token| truncate(token, max_len))
                .filter(move |token| !stop_words.contains(token.text.as_ref()))
                .map(move |mut token| {
                    token.text = stemmer.stem(token.text);
                    token
                }),
        )
    }
}

pub struct StandardAnalyzerBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    max_token_length: usize,
    stop_words: HashSet<String>,
    stemmer: Arc<dyn Stemmer>,
}

impl StandardAnalyzerBuilder {
    pub fn tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Arc::new(tokenizer);
        self
    }

    pub fn max_token_length(mut self, max_token_length: usize) -> Self {
        self.max_token_length = max_token_length;
        self
    }

    pub fn stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words = words
            .into_iter()
            .map(|w| w.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn stemmer(mut self, stemmer: impl Stemmer + 'static) -> Self {
        self.stemmer = Arc::new(stemmer);
        self
    }

    pub fn build(self) -> StandardAnalyzer {
        StandardAnalyzer {
            tokenizer: self.tokenizer,
            max_token_length: self.max_token_length.max(1),
            stop_words: Arc::new(self.stop_words),
            stemmer: self.stemmer,
        }
    }
}

fn truncate(mut token: Token, max_chars: usize) -> Token {
    let cut = token.text.char_indices().nth(max_chars).map(|(i, _)| i);
    if let Some(cut) = cut {
        token.text = match token.text {
            Cow::Borrowed(text) => Cow::Borrowed(&text[..cut]),
            Cow::Owned(mut text) => {
                text.truncate(cut);
                Cow::Owned(text)
            }
        };
    }
    token
}

/// Emits the whole value as a single token.
#[derive(Clone, Debug, Default)]
pub struct NoopAnalyzer;

impl NoopAnalyzer {
    pub fn new() -> NoopAnalyzer {
        NoopAnalyzer {}
    }

    pub fn boxed(self) -> Box<NoopAnalyzer> {
        Box::new(self)
    }
}

impl Analyzer for NoopAnalyzer {
    fn analyzer_type(&self) -> &'static str {
        "noop"
    }

    fn analyze<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a> {
        if value.is_empty() {
            return Box::new(iter::empty());
        }
        Box::new(iter::once(Token {
            text: Cow::Borrowed(value),
            start: 0,
            end: value.len(),
            position: 0,
        }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenizer_type(&self) -> &'static str {
        "whitespace"
    }

    fn tokenize<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a> {
        Box::new(
            whitespace_runs(value)
                .enumerate()
                .map(|(position, (start, run))| Token {
                    text: Cow::Borrowed(run),
                    start,
                    end: start + run.len(),
                    position,
                }),
        )
    }
}

/// Splits on whitespace and punctuation with a few exceptions:
///
/// * anything containing a digit stays whole, along with its inner `-_/.,`,
///   so `AB-123` and `1.5` are single tokens,
/// * email addresses and host names stay whole,
/// * everything else is split on unicode word boundaries.
///
/// A trailing `'s` is dropped and acronyms lose their dots (`U.S.A.` gives
/// `USA`).
#[derive(Clone, Debug, Default)]
pub struct StandardTokenizer;

impl Tokenizer for StandardTokenizer {
    fn tokenizer_type(&self) -> &'static str {
        "standard"
    }

    fn tokenize<'a>(&self, value: &'a str) -> Box<dyn Iterator<Item = Token<'a>> + 'a> {
        Box::new(
            whitespace_runs(value)
                .flat_map(|(start, run)| run_tokens(start, run))
                .enumerate()
                .map(|(position, (start, raw))| Token {
                    text: normalize(raw),
                    start,
                    end: start + raw.len(),
                    position,
                }),
        )
    }
}

fn whitespace_runs<'a>(value: &'a str) -> impl Iterator<Item = (usize, &'a str)> + 'a {
    value
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|run| !run.is_empty())
        .map(move |run| (offset_in(value, run), run))
}

fn offset_in(outer: &str, inner: &str) -> usize {
    inner.as_ptr() as usize - outer.as_ptr() as usize
}

fn trim_punctuation(value: &str) -> &str {
    value.trim_matches(|c: char| !c.is_alphanumeric())
}

fn run_tokens(start: usize, run: &str) -> Vec<(usize, &str)> {
    let trimmed = trim_punctuation(run);
    if trimmed.is_empty() {
        return Vec::new();
    }
    let start = start + offset_in(run, trimmed);
    if is_email(trimmed) || is_host(trimmed) {
        return vec![(start, trimmed)];
    }
    if !trimmed.chars().any(char::is_numeric) {
        return word_tokens(start, trimmed);
    }
    let mut tokens = Vec::new();
    for piece in trimmed.split(|c: char| !(c.is_alphanumeric() || "-_/.,".contains(c))) {
        let piece = trim_punctuation(piece);
        if piece.is_empty() {
            continue;
        }
        let piece_start = start + offset_in(trimmed, piece);
        if piece.chars().any(char::is_numeric) {
            tokens.push((piece_start, piece));
        } else {
            tokens.extend(word_tokens(piece_start, piece));
        }
    }
    tokens
}

fn word_tokens(start: usize, value: &str) -> Vec<(usize, &str)> {
    value
        .split_word_bound_indices()
        .filter(|(_, word)| word.chars().any(char::is_alphanumeric))
        .map(|(offset, word)| (start + offset, word))
        .collect()
}

fn is_host(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() < 2 {
        return false;
    }
    let well_formed = parts.iter().all(|part| {
        !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '-')
    });
    let tld = parts[parts.len() - 1];
    well_formed && tld.chars().count() >= 2 && tld.chars().all(char::is_alphabetic)
}

fn is_email(value: &str) -> bool {
    let mut split = value.splitn(2, '@');
    match (split.next(), split.next()) {
        (Some(local), Some(host)) => {
            !local.is_empty()
                && local
                    .chars()
                    .all(|c| c.is_alphanumeric() || "._-+".contains(c))
                && is_host(host)
        }
        _ => false,
    }
}

fn is_acronym(value: &str) -> bool {
    let parts: Vec<&str> = value.trim_end_matches('.').split('.').collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|p| p.chars().count() == 1 && p.chars().all(char::is_alphabetic))
}

fn normalize(raw: &str) -> Cow<str> {
    for suffix in &["'s", "'S", "\u{2019}s", "\u{2019}S"] {
        if raw.len() > suffix.len() && raw.ends_with(suffix) {
            return Cow::Borrowed(&raw[..raw.len() - suffix.len()]);
        }
    }
    if is_acronym(raw) {
        return Cow::Owned(raw.chars().filter(|c| *c != '.').collect());
    }
    Cow::Borrowed(raw)
}

/// English Porter stemming, the snowball variant.
#[derive(Clone)]
pub struct PorterStemmer {
    inner: Arc<rust_stemmers::Stemmer>,
}

impl PorterStemmer {
    pub fn new() -> PorterStemmer {
        PorterStemmer {
            inner: Arc::new(rust_stemmers::Stemmer::create(Algorithm::English)),
        }
    }
}

impl Default for PorterStemmer {
    fn default() -> PorterStemmer {
        PorterStemmer::new()
    }
}

impl Debug for PorterStemmer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PorterStemmer")
    }
}

impl Stemmer for PorterStemmer {
    fn stem<'a>(&self, token: Cow<'a, str>) -> Cow<'a, str> {
        match token {
            Cow::Borrowed(text) => self.inner.stem(text),
            Cow::Owned(text) => Cow::Owned(self.inner.stem(&text).into_owned()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoopStemmer;

impl Stemmer for NoopStemmer {
    fn stem<'a>(&self, token: Cow<'a, str>) -> Cow<'a, str> {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn texts(analyzer: &dyn Analyzer, value: &str) -> Vec<String> {
        analyzer.analyze(value).map(|t| t.text.into_owned()).collect()
    }

    fn unstemmed() -> StandardAnalyzer {
        StandardAnalyzer::builder().stemmer(NoopStemmer).build()
    }

    #[test]
    fn splits_on_whitespace_and_punctuation() {
        assert_eq!(
            vec!["processor", "time", "percent"],
            texts(&unstemmed(), "% Processor Time (percent)")
        );
    }

    #[test]
    fn keeps_product_codes_whole() {
        assert_eq!(
            vec!["ab-123", "1.5", "x64"],
            texts(&unstemmed(), "AB-123, 1.5 x64")
        );
        assert_eq!(vec!["wide", "open"], texts(&unstemmed(), "wide-open"));
    }

    #[test]
    fn keeps_emails_and_hosts_whole() {
        assert_eq!(
            vec!["mail", "ops@example.com", "www.example.org"],
            texts(&unstemmed(), "mail ops@example.com, www.example.org.")
        );
    }

    #[test]
    fn strips_possessives_and_acronym_dots() {
        assert_eq!(
            vec!["system", "usa"],
            texts(&unstemmed(), "System's U.S.A.")
        );
    }

    #[test]
    fn removes_stop_words_and_keeps_position_gaps() {
        let tokens: Vec<Token> = unstemmed().analyze("The Available Bytes").collect();
        assert_eq!(2, tokens.len());
        assert_eq!("available", tokens[0].text);
        assert_eq!(1, tokens[0].position);
        assert_eq!(4, tokens[0].start);
        assert_eq!(13, tokens[0].end);
        assert_eq!(2, tokens[1].position);
    }

    #[test]
    fn stems_with_porter_by_default() {
        assert_eq!(
            vec!["cach", "fault"],
            texts(&StandardAnalyzer::new(), "Cache Faults")
        );
    }

    #[test]
    fn truncates_long_tokens() {
        let analyzer = StandardAnalyzer::builder()
            .stemmer(NoopStemmer)
            .max_token_length(4)
            .build();
        assert_eq!(vec!["abcd", "xy"], texts(&analyzer, "abcdefgh xy"));
    }

    #[test]
    fn truncates_after_lowercasing() {
        let analyzer = StandardAnalyzer::builder()
            .stemmer(NoopStemmer)
            .max_token_length(3)
            .build();
        for token in analyzer.analyze("İİİİ") {
            assert!(token.text.chars().count() <= 3, "{:?}", token.text);
        }
        assert_eq!(1, analyzer.analyze("İİİİ").count());
    }

    #[test]
    fn non_text_bytes_yield_nothing() {
        let analyzer = StandardAnalyzer::new();
        assert_eq!(0, analyzer.analyze_bytes(&[0xff, 0xfe, 0x41]).count());
        assert_eq!(1, analyzer.analyze_bytes(b"memory").count());
    }

    #[test]
    fn custom_pipeline_from_config() {
        let config = AnalysisConfig {
            tokenizer: TokenizerKind::Whitespace,
            max_token_length: 255,
            stop_words: StopWords::Custom(vec!["bytes".to_string()]),
            stemmer: StemmerKind::None,
        };
        let analyzer = config.build().unwrap();
        assert_eq!(vec!["the", "available"], texts(&*analyzer, "The Available Bytes"));
    }

    #[test]
    fn rejects_zero_token_length() {
        let config = AnalysisConfig {
            max_token_length: 0,
            ..AnalysisConfig::default()
        };
        match config.build() {
            Err(Error::Configuration(_)) => (),
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn noop_emits_whole_value() {
        assert_eq!(vec!["Memory Usage"], texts(&NoopAnalyzer, "Memory Usage"));
        assert!(texts(&NoopAnalyzer, "").is_empty());
    }

    proptest! {
        #[test]
        fn offsets_point_into_value(ref value in "\\PC{0,64}") {
            for token in unstemmed().analyze(value) {
                prop_assert!(token.start <= token.end);
                prop_assert!(value.get(token.start..token.end).is_some());
            }
        }

        #[test]
        fn tokens_never_exceed_max_length(ref value in "[a-zA-Z0-9İẞ .-]{0,64}", max in 1usize..8) {
            let analyzer = StandardAnalyzer::builder().max_token_length(max).build();
            for token in analyzer.analyze(value) {
                prop_assert!(token.text.chars().count() <= max);
            }
        }
    }
}
