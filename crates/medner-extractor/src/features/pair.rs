//! Built-in pair extractor units

use std::collections::BTreeSet;
use std::ops::Range;

use medner_core::{Document, Entity, EntityId};

use super::{FeatureUnit, FeatureValue, FeatureVector, PairContext, PairFeature};

/// Both endpoints of a pair with their token ranges
struct Endpoints<'a> {
    source: &'a Entity,
    target: &'a Entity,
    source_tokens: Range<usize>,
    target_tokens: Range<usize>,
}

impl<'a> Endpoints<'a> {
    fn resolve(context: &PairContext<'a>) -> Option<Self> {
        let document = context.document;
        let source = document.entity(context.source)?;
        let target = document.entity(context.target)?;
        Some(Self {
            source,
            target,
            source_tokens: document.token_range_for(source.span)?,
            target_tokens: document.token_range_for(target.span)?,
        })
    }

    fn source_first(&self) -> bool {
        self.source_tokens.start <= self.target_tokens.start
    }

    /// Token indices strictly between the two entities
    fn between(&self) -> Range<usize> {
        let (first, second) = if self.source_first() {
            (&self.source_tokens, &self.target_tokens)
        } else {
            (&self.target_tokens, &self.source_tokens)
        };
        first.end..second.start.max(first.end)
    }
}

fn surface(document: &Document, id: EntityId) -> Option<String> {
    document
        .entity_text(id)
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
}

fn names(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Entity types of both endpoints
#[derive(Debug, Clone, Default)]
pub struct EntityTypes;

impl FeatureUnit for EntityTypes {
    fn name(&self) -> &str {
        "entity_types"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["source_type", "target_type", "type_pair"])
    }
}

impl PairFeature for EntityTypes {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let document = context.document;
        let (Some(source), Some(target)) =
            (document.entity(context.source), document.entity(context.target))
        else {
            return FeatureVector::new();
        };
        FeatureVector::from([
            ("source_type".to_string(), source.label.as_str().into()),
            ("target_type".to_string(), target.label.as_str().into()),
            (
                "type_pair".to_string(),
                format!("{}->{}", source.label, target.label).into(),
            ),
        ])
    }
}

/// Token distance and direction
#[derive(Debug, Clone, Default)]
pub struct TokenDistance;

impl FeatureUnit for TokenDistance {
    fn name(&self) -> &str {
        "token_distance"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["token_distance", "source_first"])
    }
}

impl PairFeature for TokenDistance {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let Some(ends) = Endpoints::resolve(context) else {
            return FeatureVector::new();
        };
        FeatureVector::from([
            (
                "token_distance".to_string(),
                FeatureValue::Numeric(ends.between().len() as f64),
            ),
            ("source_first".to_string(), ends.source_first().into()),
        ])
    }
}

/// Words between the two entities
#[derive(Debug, Clone, Default)]
pub struct WordsBetween;

impl FeatureUnit for WordsBetween {
    fn name(&self) -> &str {
        "words_between"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["between_first", "between_last", "between_bag"])
    }
}

impl PairFeature for WordsBetween {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        let Some(ends) = Endpoints::resolve(context) else {
            return vector;
        };
        let tokens = &context.document.tokens()[ends.between()];
        let words: Vec<String> = tokens.iter().map(|t| t.text.to_lowercase()).collect();
        if let (Some(first), Some(last)) = (words.first(), words.last()) {
            vector.insert("between_first".to_string(), first.as_str().into());
            vector.insert("between_last".to_string(), last.as_str().into());
            let bag: BTreeSet<&str> = words.iter().map(String::as_str).collect();
            vector.insert(
                "between_bag".to_string(),
                bag.into_iter().collect::<Vec<_>>().join(" ").into(),
            );
        }
        vector
    }
}

/// Surface text of both endpoints
#[derive(Debug, Clone, Default)]
pub struct EntityText;

impl FeatureUnit for EntityText {
    fn name(&self) -> &str {
        "entity_text"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["source_text", "target_text"])
    }
}

impl PairFeature for EntityText {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        if let Some(text) = surface(context.document, context.source) {
            vector.insert("source_text".to_string(), text.into());
        }
        if let Some(text) = surface(context.document, context.target) {
            vector.insert("target_text".to_string(), text.into());
        }
        vector
    }
}

/// Number of other entities lying between the two endpoints
#[derive(Debug, Clone, Default)]
pub struct EntitiesBetween;

impl FeatureUnit for EntitiesBetween {
    fn name(&self) -> &str {
        "entities_between"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["entities_between"])
    }
}

impl PairFeature for EntitiesBetween {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let Some(ends) = Endpoints::resolve(context) else {
            return FeatureVector::new();
        };
        let (first, second) = if ends.source_first() {
            (ends.source.span, ends.target.span)
        } else {
            (ends.target.span, ends.source.span)
        };
        let count = if first.end < second.start {
            let gap = medner_core::Span::new(first.end, second.start);
            context
                .document
                .entities_overlapping(gap)
                .filter(|(id, e)| {
                    *id != context.source && *id != context.target && gap.contains(&e.span)
                })
                .count()
        } else {
            0
        };
        FeatureVector::from([(
            "entities_between".to_string(),
            FeatureValue::Numeric(count as f64),
        )])
    }
}

/// Whether both endpoints lie in the same sentence
#[derive(Debug, Clone, Default)]
pub struct SameSentence;

impl FeatureUnit for SameSentence {
    fn name(&self) -> &str {
        "same_sentence"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["same_sentence"])
    }
}

impl PairFeature for SameSentence {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let document = context.document;
        let (Some(source), Some(target)) =
            (document.entity(context.source), document.entity(context.target))
        else {
            return FeatureVector::new();
        };
        FeatureVector::from([(
            "same_sentence".to_string(),
            super::same_sentence(document, source.span, target.span).into(),
        )])
    }
}

/// Lexicon tags of both endpoints' surface text
#[derive(Debug, Clone, Default)]
pub struct EndpointLexicon;

impl FeatureUnit for EndpointLexicon {
    fn name(&self) -> &str {
        "endpoint_lexicon"
    }

    fn feature_names(&self) -> Vec<String> {
        names(&["source_lexicon", "target_lexicon"])
    }
}

impl PairFeature for EndpointLexicon {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        for (key, id) in [("source_lexicon", context.source), ("target_lexicon", context.target)] {
            let tags = context
                .document
                .entity_text(id)
                .and_then(|text| context.lexicon.lookup(text));
            if let Some(tags) = tags {
                vector.insert(key.to_string(), tags.join("|").into());
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
    use medner_core::{Lexicon, Span, Token};

    const TEXT: &str = "Patient received 5 mg of aspirin .";

    fn document() -> (Document, EntityId, EntityId) {
        let mut doc = Document::new("note", TEXT);
        let mut offset = 0;
        for word in TEXT.split(' ') {
            let start = TEXT[offset..].find(word).unwrap() + offset;
            doc.add_token(Token::new(Span::new(start, start + word.len()), word))
                .unwrap();
            offset = start + word.len();
        }
        doc.add_sentence(0..7).unwrap();
        let dose = doc.add_entity(Span::new(17, 21), "DOSAGE").unwrap();
        let drug = doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        (doc, dose, drug)
    }

    fn context<'a>(
        doc: &'a Document,
        lexicon: &'a Lexicon,
        source: EntityId,
        target: EntityId,
    ) -> PairContext<'a> {
        PairContext {
            document: doc,
            source,
            target,
            lexicon,
        }
    }

    #[test]
    fn test_entity_types_are_directional() {
        let (doc, dose, drug) = document();
        let lexicon = Lexicon::new();
        let forward = EntityTypes.extract(&context(&doc, &lexicon, dose, drug));
        let backward = EntityTypes.extract(&context(&doc, &lexicon, drug, dose));
        assert_eq!(forward["type_pair"], FeatureValue::from("DOSAGE->MEDICATION"));
        assert_eq!(backward["type_pair"], FeatureValue::from("MEDICATION->DOSAGE"));
    }

    #[test]
    fn test_between_features() {
        let (doc, dose, drug) = document();
        let lexicon = Lexicon::new();
        let ctx = context(&doc, &lexicon, drug, dose);

        let distance = TokenDistance.extract(&ctx);
        assert_eq!(distance["token_distance"], FeatureValue::Numeric(1.0));
        assert_eq!(distance["source_first"], FeatureValue::Flag(false));

        let words = WordsBetween.extract(&ctx);
        assert_eq!(words["between_first"], FeatureValue::from("of"));
        assert_eq!(words["between_bag"], FeatureValue::from("of"));

        assert_eq!(
            EntitiesBetween.extract(&ctx)["entities_between"],
            FeatureValue::Numeric(0.0)
        );
        assert_eq!(SameSentence.extract(&ctx)["same_sentence"], FeatureValue::Flag(true));
    }

    #[test]
    fn test_endpoint_lexicon() {
        let (doc, dose, drug) = document();
        let lexicon = Lexicon::from_entries([("Aspirin", "NSAID"), ("aspirin", "DRUG")]);
        let vector = EndpointLexicon.extract(&context(&doc, &lexicon, dose, drug));
        assert_eq!(vector["target_lexicon"], FeatureValue::from("DRUG|NSAID"));
        assert!(!vector.contains_key("source_lexicon"));
    }
}
