//! Built-in token extractor units
//!
//! Windowed units emit one key per offset, prefixed with the signed offset
//! (`-1:lower`, `+0:lower`, `+1:lower`). Offsets that fall outside the
//! document emit nothing.

use std::collections::BTreeSet;

use medner_core::Token;

use super::{FeatureUnit, FeatureValue, FeatureVector, TokenContext, TokenFeature};
use crate::units::is_unit;

fn offsets(window: usize) -> impl Iterator<Item = isize> {
    let window = window as isize;
    -window..=window
}

fn windowed_key(offset: isize, base: &str) -> String {
    format!("{offset:+}:{base}")
}

fn windowed_names(window: usize, bases: &[&str]) -> Vec<String> {
    offsets(window)
        .flat_map(|o| bases.iter().map(move |b| windowed_key(o, b)))
        .collect()
}

/// Neighbouring tokens within `window`, with their offsets
fn neighbours<'a>(
    context: &'a TokenContext<'_>,
    window: usize,
) -> impl Iterator<Item = (isize, &'a Token)> + 'a {
    let tokens: &'a [Token] = context.document.tokens();
    let index = context.index as isize;
    offsets(window).filter_map(move |o| {
        let i = index + o;
        (i >= 0)
            .then(|| tokens.get(i as usize))
            .flatten()
            .map(|t| (o, t))
    })
}

/// spaCy-like word shape: `Xxxx`, `dd.d`; runs longer than four are cut
pub fn word_shape(text: &str) -> String {
    let mut shape = String::new();
    let mut last = None;
    let mut run = 0;
    for ch in text.chars() {
        let class = if ch.is_uppercase() {
            'X'
        } else if ch.is_lowercase() {
            'x'
        } else if ch.is_numeric() {
            'd'
        } else {
            ch
        };
        if Some(class) == last {
            run += 1;
        } else {
            run = 1;
            last = Some(class);
        }
        if run <= 4 {
            shape.push(class);
        }
    }
    shape
}

fn is_punct(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_punctuation())
}

fn is_title(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(char::is_uppercase) && chars.all(|c| !c.is_uppercase())
}

// ============================================================================
// Surface form
// ============================================================================

/// Lowercased word form and orthographic flags
#[derive(Debug, Clone)]
pub struct WordForm {
    pub window: usize,
}

impl FeatureUnit for WordForm {
    fn name(&self) -> &str {
        "word_form"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(
            self.window,
            &["lower", "is_title", "is_upper", "is_digit", "is_punct"],
        )
    }
}

impl TokenFeature for WordForm {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        for (o, token) in neighbours(context, self.window) {
            let text = token.text.as_str();
            vector.insert(windowed_key(o, "lower"), text.to_lowercase().into());
            vector.insert(windowed_key(o, "is_title"), is_title(text).into());
            vector.insert(
                windowed_key(o, "is_upper"),
                (text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase))
                    .into(),
            );
            vector.insert(
                windowed_key(o, "is_digit"),
                text.chars().all(|c| c.is_ascii_digit()).into(),
            );
            vector.insert(windowed_key(o, "is_punct"), is_punct(text).into());
        }
        vector
    }
}

/// Word shape
#[derive(Debug, Clone)]
pub struct Shape {
    pub window: usize,
}

impl FeatureUnit for Shape {
    fn name(&self) -> &str {
        "shape"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(self.window, &["shape"])
    }
}

impl TokenFeature for Shape {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        neighbours(context, self.window)
            .map(|(o, t)| (windowed_key(o, "shape"), FeatureValue::Categorical(word_shape(&t.text))))
            .collect()
    }
}

/// Prefixes and suffixes of the current token
#[derive(Debug, Clone)]
pub struct Affixes {
    pub lengths: Vec<usize>,
}

impl FeatureUnit for Affixes {
    fn name(&self) -> &str {
        "affixes"
    }

    fn feature_names(&self) -> Vec<String> {
        let lengths: BTreeSet<usize> = self.lengths.iter().copied().collect();
        lengths
            .iter()
            .flat_map(|n| [format!("prefix{n}"), format!("suffix{n}")])
            .collect()
    }
}

impl TokenFeature for Affixes {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        let Some(token) = context.document.tokens().get(context.index) else {
            return vector;
        };
        let chars: Vec<char> = token.text.to_lowercase().chars().collect();
        for &n in &self.lengths {
            if n == 0 || chars.len() < n {
                continue;
            }
            let prefix: String = chars[..n].iter().collect();
            let suffix: String = chars[chars.len() - n..].iter().collect();
            vector.insert(format!("prefix{n}"), prefix.into());
            vector.insert(format!("suffix{n}"), suffix.into());
        }
        vector
    }
}

// ============================================================================
// Linguistic layers
// ============================================================================

/// Part-of-speech tags
#[derive(Debug, Clone)]
pub struct PartOfSpeech {
    pub window: usize,
}

impl FeatureUnit for PartOfSpeech {
    fn name(&self) -> &str {
        "part_of_speech"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(self.window, &["pos"])
    }
}

impl TokenFeature for PartOfSpeech {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        neighbours(context, self.window)
            .filter_map(|(o, t)| Some((windowed_key(o, "pos"), FeatureValue::Categorical(t.pos.clone()?))))
            .collect()
    }
}

/// Lemmas
#[derive(Debug, Clone)]
pub struct Lemma {
    pub window: usize,
}

impl FeatureUnit for Lemma {
    fn name(&self) -> &str {
        "lemma"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(self.window, &["lemma"])
    }
}

impl TokenFeature for Lemma {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        neighbours(context, self.window)
            .filter_map(|(o, t)| Some((windowed_key(o, "lemma"), FeatureValue::Categorical(t.lemma.clone()?))))
            .collect()
    }
}

/// Dependency label and head word of the current token
#[derive(Debug, Clone, Default)]
pub struct Dependency;

impl FeatureUnit for Dependency {
    fn name(&self) -> &str {
        "dependency"
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["dep".to_string(), "head_lower".to_string()]
    }
}

impl TokenFeature for Dependency {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        let tokens = context.document.tokens();
        let Some(token) = tokens.get(context.index) else {
            return vector;
        };
        if let Some(dep) = &token.dep {
            vector.insert("dep".to_string(), dep.as_str().into());
        }
        if let Some(head) = token.head.and_then(|h| tokens.get(h)) {
            vector.insert("head_lower".to_string(), head.text.to_lowercase().into());
        }
        vector
    }
}

/// Sentence start and end flags
#[derive(Debug, Clone, Default)]
pub struct SentenceBoundary;

impl FeatureUnit for SentenceBoundary {
    fn name(&self) -> &str {
        "sentence_boundary"
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["bos".to_string(), "eos".to_string()]
    }
}

impl TokenFeature for SentenceBoundary {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        let document = context.document;
        let index = context.index;
        let (bos, eos) = match document.sentence_of(index) {
            Some(s) => {
                let range = &document.sentences()[s].tokens;
                (index == range.start, index + 1 == range.end)
            }
            None => (index == 0, index + 1 == document.tokens().len()),
        };
        FeatureVector::from([
            ("bos".to_string(), FeatureValue::Flag(bos)),
            ("eos".to_string(), FeatureValue::Flag(eos)),
        ])
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Unit-of-measure flags
#[derive(Debug, Clone)]
pub struct UnitOfMeasure {
    pub window: usize,
}

impl FeatureUnit for UnitOfMeasure {
    fn name(&self) -> &str {
        "unit_of_measure"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(self.window, &["is_unit"])
    }
}

impl TokenFeature for UnitOfMeasure {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        neighbours(context, self.window)
            .map(|(o, t)| (windowed_key(o, "is_unit"), FeatureValue::Flag(is_unit(&t.text))))
            .collect()
    }
}

/// Lexicon tags of every phrase covering a token.
///
/// Phrases up to the lexicon's longest entry are matched over consecutive
/// tokens, so a token inside "acetylsalicylic acid" carries the tags of the
/// whole phrase.
#[derive(Debug, Clone)]
pub struct LexiconTags {
    pub window: usize,
}

impl LexiconTags {
    fn tags_at(context: &TokenContext<'_>, index: usize) -> BTreeSet<String> {
        let tokens = context.document.tokens();
        let longest = context.lexicon.max_phrase_words();
        let mut tags = BTreeSet::new();
        for len in 1..=longest {
            let first = (index + 1).saturating_sub(len);
            for start in first..=index {
                let end = start + len;
                if end > tokens.len() {
                    break;
                }
                let words: Vec<&str> = tokens[start..end].iter().map(|t| t.text.as_str()).collect();
                if let Some(found) = context.lexicon.lookup_words(&words) {
                    tags.extend(found.iter().cloned());
                }
            }
        }
        tags
    }
}

impl FeatureUnit for LexiconTags {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn feature_names(&self) -> Vec<String> {
        windowed_names(self.window, &["lexicon"])
    }
}

impl TokenFeature for LexiconTags {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        if context.lexicon.is_empty() {
            return vector;
        }
        let index = context.index as isize;
        for (o, _) in neighbours(context, self.window) {
            let tags = Self::tags_at(context, (index + o) as usize);
            if !tags.is_empty() {
                let joined = tags.into_iter().collect::<Vec<_>>().join("|");
                vector.insert(windowed_key(o, "lexicon"), joined.into());
            }
        }
        vector
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use medner_core::{Document, Lexicon, Span};

    fn document(words: &[&str]) -> Document {
        let text = words.join(" ");
        let mut doc = Document::new("t", text.clone());
        let mut offset = 0;
        for word in words {
            let start = text[offset..].find(word).unwrap() + offset;
            let end = start + word.len();
            doc.add_token(Token::new(Span::new(start, end), *word).with_pos("NOUN"))
                .unwrap();
            offset = end;
        }
        doc.add_sentence(0..words.len()).unwrap();
        doc
    }

    fn context<'a>(doc: &'a Document, lexicon: &'a Lexicon, index: usize) -> TokenContext<'a> {
        TokenContext {
            document: doc,
            index,
            lexicon,
        }
    }

    #[test]
    fn test_word_shape() {
        assert_eq!(word_shape("Aspirin"), "Xxxxx");
        assert_eq!(word_shape("12.5"), "dd.d");
        assert_eq!(word_shape("mg"), "xx");
    }

    #[test]
    fn test_window_keys_at_document_edge() {
        let doc = document(&["Patient", "received", "aspirin"]);
        let lexicon = Lexicon::new();
        let vector = WordForm { window: 1 }.extract(&context(&doc, &lexicon, 0));

        assert_eq!(vector["+0:lower"], FeatureValue::from("patient"));
        assert_eq!(vector["+1:lower"], FeatureValue::from("received"));
        assert!(!vector.contains_key("-1:lower"));
        assert_eq!(vector["+0:is_title"], FeatureValue::Flag(true));
    }

    #[test]
    fn test_extracted_keys_are_declared() {
        let doc = document(&["Took", "5", "mg", "of", "aspirin", "."]);
        let lexicon = Lexicon::from_entries([("aspirin", "DRUG")]);
        let units: Vec<Box<dyn TokenFeature>> = vec![
            Box::new(WordForm { window: 2 }),
            Box::new(Shape { window: 1 }),
            Box::new(Affixes { lengths: vec![2, 3] }),
            Box::new(PartOfSpeech { window: 1 }),
            Box::new(Lemma { window: 1 }),
            Box::new(LexiconTags { window: 1 }),
            Box::new(UnitOfMeasure { window: 1 }),
            Box::new(SentenceBoundary),
            Box::new(Dependency),
        ];
        for unit in &units {
            let declared = unit.feature_names();
            for index in 0..doc.tokens().len() {
                for key in unit.extract(&context(&doc, &lexicon, index)).keys() {
                    assert!(declared.contains(key), "{} emitted undeclared {key}", unit.name());
                }
            }
        }
    }

    #[test]
    fn test_multi_word_lexicon_phrase() {
        let doc = document(&["given", "acetylsalicylic", "acid", "daily"]);
        let lexicon = Lexicon::from_entries([("acetylsalicylic acid", "DRUG")]);
        let unit = LexiconTags { window: 0 };

        let inside = unit.extract(&context(&doc, &lexicon, 2));
        assert_eq!(inside["+0:lexicon"], FeatureValue::from("DRUG"));
        let outside = unit.extract(&context(&doc, &lexicon, 3));
        assert!(outside.is_empty());
    }

    #[test]
    fn test_unit_and_boundary_flags() {
        let doc = document(&["5", "mg", "daily"]);
        let lexicon = Lexicon::new();
        let units = UnitOfMeasure { window: 0 }.extract(&context(&doc, &lexicon, 1));
        assert_eq!(units["+0:is_unit"], FeatureValue::Flag(true));

        let boundary = SentenceBoundary.extract(&context(&doc, &lexicon, 2));
        assert_eq!(boundary["bos"], FeatureValue::Flag(false));
        assert_eq!(boundary["eos"], FeatureValue::Flag(true));
    }
}
