//! Document model
//!
//! A [`Document`] owns its raw text together with every linguistic and
//! semantic annotation layered on top of it. Entities and relations live in
//! id-keyed arenas: relations refer to entities by [`EntityId`], never by
//! reference, so removing an entity simply drops the relations that name it.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{MedError, Result};

// ============================================================================
// Spans and identifiers
// ============================================================================

/// Byte offset range into a document's text (start inclusive, end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the two spans share at least one character
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Slice the span out of `text`, if it denotes a valid substring
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.is_empty() {
            return None;
        }
        text.get(self.start..self.end)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identifier of an entity within its owning document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Identifier of a relation within its owning document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

// ============================================================================
// Annotation layers
// ============================================================================

/// Where an entity or relation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Human annotation
    Gold,
    /// Model output
    Predicted,
}

/// A token produced by the linguistic annotator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub span: Span,
    pub text: String,
    /// Part-of-speech tag
    pub pos: Option<String>,
    pub lemma: Option<String>,
    /// Dependency label
    pub dep: Option<String>,
    /// Index of the syntactic head token
    pub head: Option<usize>,
}

impl Token {
    pub fn new(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
            pos: None,
            lemma: None,
            dep: None,
            head: None,
        }
    }

    pub fn with_pos(mut self, pos: impl Into<String>) -> Self {
        self.pos = Some(pos.into());
        self
    }

    pub fn with_lemma(mut self, lemma: impl Into<String>) -> Self {
        self.lemma = Some(lemma.into());
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<String>, head: usize) -> Self {
        self.dep = Some(dep.into());
        self.head = Some(head);
        self
    }
}

/// A contiguous run of tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Token indices covered by the sentence
    pub tokens: Range<usize>,
    /// Character span from the first token start to the last token end
    pub span: Span,
}

/// A typed text span
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub span: Span,
    /// Semantic type; open vocabulary
    pub label: String,
    pub provenance: Option<Provenance>,
}

impl Entity {
    pub fn new(span: Span, label: impl Into<String>) -> Self {
        Self {
            span,
            label: label.into(),
            provenance: None,
        }
    }

    pub fn gold(span: Span, label: impl Into<String>) -> Self {
        Self::new(span, label).with_provenance(Provenance::Gold)
    }

    pub fn predicted(span: Span, label: impl Into<String>) -> Self {
        Self::new(span, label).with_provenance(Provenance::Predicted)
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// A directed, typed link between two entities of the same document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub source: EntityId,
    pub target: EntityId,
    pub label: String,
    pub provenance: Option<Provenance>,
}

impl Relation {
    pub fn new(source: EntityId, target: EntityId, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

/// What to do when an entity overlaps an entity of a different type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Keep both entities
    #[default]
    Allow,
    /// Keep both entities and log a warning
    Warn,
    /// Refuse the new entity
    Reject,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "warn" => Ok(Self::Warn),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown overlap policy: {other}")),
        }
    }
}

// ============================================================================
// Document
// ============================================================================

/// Text plus its tokens, sentences, entities and relations
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    text: String,
    tokens: Vec<Token>,
    sentences: Vec<Sentence>,
    entities: BTreeMap<EntityId, Entity>,
    /// (start offset, id) sorted ascending; drives ordered overlap queries
    by_start: Vec<(usize, EntityId)>,
    relations: BTreeMap<RelationId, Relation>,
    next_entity: u32,
    next_relation: u32,
    overlap_policy: OverlapPolicy,
}

impl Document {
    /// Create an empty document over `text`
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            tokens: Vec::new(),
            sentences: Vec::new(),
            entities: BTreeMap::new(),
            by_start: Vec::new(),
            relations: BTreeMap::new(),
            next_entity: 0,
            next_relation: 0,
            overlap_policy: OverlapPolicy::default(),
        }
    }

    /// Set the policy applied to overlapping entities of different types
    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }

    /// Copy of this document keeping text and linguistic layers but no
    /// entities or relations. Used as inference input.
    pub fn stripped(&self) -> Self {
        Self {
            name: self.name.clone(),
            text: self.text.clone(),
            tokens: self.tokens.clone(),
            sentences: self.sentences.clone(),
            entities: BTreeMap::new(),
            by_start: Vec::new(),
            relations: BTreeMap::new(),
            next_entity: 0,
            next_relation: 0,
            overlap_policy: self.overlap_policy,
        }
    }

    // ------------------------------------------------------------------------
    // Tokens and sentences
    // ------------------------------------------------------------------------

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    /// Whether the linguistic annotator has populated tokens
    pub fn is_annotated(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Append a token. Tokens must arrive in text order without overlapping.
    pub fn add_token(&mut self, token: Token) -> Result<usize> {
        self.check_span(token.span)?;
        if let Some(last) = self.tokens.last() {
            if token.span.start < last.span.end {
                return Err(MedError::InvalidSpan {
                    span: token.span,
                    reason: format!("token overlaps or precedes previous token {}", last.span),
                });
            }
        }
        self.tokens.push(token);
        Ok(self.tokens.len() - 1)
    }

    /// Append a sentence covering `tokens`
    pub fn add_sentence(&mut self, tokens: Range<usize>) -> Result<usize> {
        if tokens.is_empty() || tokens.end > self.tokens.len() {
            return Err(MedError::InvalidSpan {
                span: Span::new(tokens.start, tokens.end),
                reason: format!(
                    "sentence token range is empty or exceeds {} tokens",
                    self.tokens.len()
                ),
            });
        }
        if let Some(last) = self.sentences.last() {
            if tokens.start < last.tokens.end {
                return Err(MedError::InvalidSpan {
                    span: Span::new(tokens.start, tokens.end),
                    reason: "sentence overlaps the previous sentence".to_string(),
                });
            }
        }
        let span = Span::new(
            self.tokens[tokens.start].span.start,
            self.tokens[tokens.end - 1].span.end,
        );
        self.sentences.push(Sentence { tokens, span });
        Ok(self.sentences.len() - 1)
    }

    /// Indices of the tokens that intersect `span`
    pub fn token_range_for(&self, span: Span) -> Option<Range<usize>> {
        let first = self.tokens.partition_point(|t| t.span.end <= span.start);
        let last = self.tokens.partition_point(|t| t.span.start < span.end);
        (first < last).then_some(first..last)
    }

    /// Index of the sentence containing token `index`
    pub fn sentence_of(&self, index: usize) -> Option<usize> {
        let pos = self.sentences.partition_point(|s| s.tokens.end <= index);
        self.sentences
            .get(pos)
            .filter(|s| s.tokens.contains(&index))
            .map(|_| pos)
    }

    /// Whether `span` starts on a token start and ends on a token end
    pub fn is_token_aligned(&self, span: Span) -> bool {
        let starts = self
            .tokens
            .binary_search_by_key(&span.start, |t| t.span.start)
            .is_ok();
        let ends = self
            .tokens
            .binary_search_by_key(&span.end, |t| t.span.end)
            .is_ok();
        starts && ends
    }

    /// Spans of entities that do not fall on token boundaries
    pub fn misaligned_entities(&self) -> Vec<Span> {
        self.entities
            .values()
            .filter(|e| !self.is_token_aligned(e.span))
            .map(|e| e.span)
            .collect()
    }

    /// Number of tokens strictly between two spans (0 when adjacent or overlapping)
    pub fn token_gap(&self, a: Span, b: Span) -> Option<usize> {
        let ra = self.token_range_for(a)?;
        let rb = self.token_range_for(b)?;
        let (first, second) = if ra.start <= rb.start { (ra, rb) } else { (rb, ra) };
        Some(second.start.saturating_sub(first.end))
    }

    fn check_span(&self, span: Span) -> Result<()> {
        if span.is_empty() {
            return Err(MedError::InvalidSpan {
                span,
                reason: "span is empty".to_string(),
            });
        }
        if span.end > self.text.len() {
            return Err(MedError::InvalidSpan {
                span,
                reason: format!("span exceeds text length {}", self.text.len()),
            });
        }
        if !self.text.is_char_boundary(span.start) || !self.text.is_char_boundary(span.end) {
            return Err(MedError::InvalidSpan {
                span,
                reason: "span does not fall on character boundaries".to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Add an entity with no provenance
    pub fn add_entity(&mut self, span: Span, label: impl Into<String>) -> Result<EntityId> {
        self.add_entity_with(Entity::new(span, label))
    }

    /// Add a fully specified entity
    pub fn add_entity_with(&mut self, entity: Entity) -> Result<EntityId> {
        self.check_span(entity.span)?;
        if self.is_annotated() && !self.is_token_aligned(entity.span) {
            return Err(MedError::InvalidSpan {
                span: entity.span,
                reason: "span is not aligned to token boundaries".to_string(),
            });
        }

        if self.overlap_policy != OverlapPolicy::Allow {
            let conflict = self
                .entities_overlapping(entity.span)
                .find(|(_, other)| other.label != entity.label)
                .map(|(id, _)| id);
            if let Some(existing) = conflict {
                if self.overlap_policy == OverlapPolicy::Reject {
                    return Err(MedError::OverlappingEntity {
                        span: entity.span,
                        label: entity.label,
                        existing,
                    });
                }
                tracing::warn!(
                    document = %self.name,
                    span = %entity.span,
                    label = %entity.label,
                    %existing,
                    "entity overlaps an entity of a different type"
                );
            }
        }

        let id = EntityId(self.next_entity);
        self.next_entity += 1;

        let pos = self.by_start.partition_point(|&(s, _)| s <= entity.span.start);
        self.by_start.insert(pos, (entity.span.start, id));
        self.entities.insert(id, entity);
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Entities in insertion order
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.entities.iter().map(|(id, e)| (*id, e))
    }

    /// Entities ordered by start offset, then insertion order
    pub fn entities_by_position(&self) -> impl Iterator<Item = (EntityId, &Entity)> + '_ {
        self.by_start.iter().map(|(_, id)| (*id, &self.entities[id]))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Lazily enumerate entities intersecting `span`, ordered by start
    /// offset and then insertion order. The iterator is `Clone`, so it can be
    /// restarted from any point.
    pub fn entities_overlapping(&self, span: Span) -> EntitiesOverlapping<'_> {
        EntitiesOverlapping {
            document: self,
            span,
            position: 0,
        }
    }

    /// Discard an entity and every relation that references it
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity> {
        let entity = self
            .entities
            .remove(&id)
            .ok_or(MedError::UnknownEntity(id))?;
        self.by_start.retain(|(_, other)| *other != id);

        let before = self.relations.len();
        self.relations
            .retain(|_, r| r.source != id && r.target != id);
        let dropped = before - self.relations.len();
        if dropped > 0 {
            tracing::debug!(document = %self.name, entity = %id, dropped, "removed dangling relations");
        }
        Ok(entity)
    }

    // ------------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------------

    /// Add a relation with no provenance
    pub fn add_relation(
        &mut self,
        source: EntityId,
        target: EntityId,
        label: impl Into<String>,
    ) -> Result<RelationId> {
        self.add_relation_with(Relation::new(source, target, label))
    }

    /// Add a fully specified relation
    pub fn add_relation_with(&mut self, relation: Relation) -> Result<RelationId> {
        for id in [relation.source, relation.target] {
            if !self.entities.contains_key(&id) {
                return Err(MedError::UnknownEntity(id));
            }
        }
        let id = RelationId(self.next_relation);
        self.next_relation += 1;
        self.relations.insert(id, relation);
        Ok(id)
    }

    pub fn relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(&id)
    }

    /// Relations in insertion order
    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &Relation)> + '_ {
        self.relations.iter().map(|(id, r)| (*id, r))
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Text covered by an entity
    pub fn entity_text(&self, id: EntityId) -> Option<&str> {
        self.entity(id).and_then(|e| e.span.slice(&self.text))
    }
}

/// Iterator returned by [`Document::entities_overlapping`]
#[derive(Debug, Clone)]
pub struct EntitiesOverlapping<'a> {
    document: &'a Document,
    span: Span,
    position: usize,
}

impl<'a> Iterator for EntitiesOverlapping<'a> {
    type Item = (EntityId, &'a Entity);

    fn next(&mut self) -> Option<Self::Item> {
        let document = self.document;
        let index = &document.by_start;
        while self.position < index.len() {
            let (start, id) = index[self.position];
            if start >= self.span.end {
                self.position = index.len();
                return None;
            }
            self.position += 1;
            let entity = &document.entities[&id];
            if entity.span.end > self.span.start {
                return Some((id, entity));
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEXT: &str = "Patient received 5 mg of aspirin.";

    fn tokenized() -> Document {
        let mut doc = Document::new("note", TEXT);
        let mut offset = 0;
        for word in ["Patient", "received", "5", "mg", "of", "aspirin", "."] {
            let start = TEXT[offset..].find(word).unwrap() + offset;
            let end = start + word.len();
            doc.add_token(Token::new(Span::new(start, end), word)).unwrap();
            offset = end;
        }
        doc.add_sentence(0..7).unwrap();
        doc
    }

    #[test]
    fn test_add_entity_rejects_invalid_spans() {
        let mut doc = Document::new("note", TEXT);
        assert!(matches!(
            doc.add_entity(Span::new(5, 5), "X"),
            Err(MedError::InvalidSpan { .. })
        ));
        assert!(matches!(
            doc.add_entity(Span::new(30, 80), "X"),
            Err(MedError::InvalidSpan { .. })
        ));
        assert!(doc.add_entity(Span::new(17, 21), "DOSAGE").is_ok());
    }

    #[test]
    fn test_add_entity_requires_token_alignment_once_tokenized() {
        let mut doc = tokenized();
        // "5 m" cuts through "mg"
        let err = doc.add_entity(Span::new(17, 20), "DOSAGE").unwrap_err();
        assert!(matches!(err, MedError::InvalidSpan { .. }));
        assert!(doc.add_entity(Span::new(17, 21), "DOSAGE").is_ok());
    }

    #[test]
    fn test_non_ascii_boundaries() {
        let mut doc = Document::new("note", "Café au lait");
        // 'é' is two bytes: 3..5
        assert!(doc.add_entity(Span::new(0, 4), "X").is_err());
        assert!(doc.add_entity(Span::new(0, 5), "X").is_ok());
    }

    #[test]
    fn test_add_relation_unknown_entity() {
        let mut doc = Document::new("note", TEXT);
        let a = doc.add_entity(Span::new(17, 21), "DOSAGE").unwrap();
        let err = doc.add_relation(a, EntityId(42), "dosage_of").unwrap_err();
        assert!(matches!(err, MedError::UnknownEntity(EntityId(42))));

        let mut other = Document::new("other", TEXT);
        let foreign = other.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        let foreign = EntityId(foreign.0 + 7);
        assert!(doc.add_relation(a, foreign, "dosage_of").is_err());
    }

    #[test]
    fn test_remove_entity_drops_relations() {
        let mut doc = Document::new("note", TEXT);
        let dose = doc.add_entity(Span::new(17, 21), "DOSAGE").unwrap();
        let drug = doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        doc.add_relation(dose, drug, "dosage_of").unwrap();

        let removed = doc.remove_entity(drug).unwrap();
        assert_eq!(removed.label, "MEDICATION");
        assert_eq!(doc.relation_count(), 0);
        assert_eq!(doc.entities_overlapping(Span::new(0, TEXT.len())).count(), 1);
        assert!(matches!(
            doc.remove_entity(drug),
            Err(MedError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_overlap_policy_reject() {
        let mut doc = Document::new("note", TEXT).with_overlap_policy(OverlapPolicy::Reject);
        doc.add_entity(Span::new(17, 32), "REGIMEN").unwrap();
        // same type overlap is always accepted
        assert!(doc.add_entity(Span::new(17, 21), "REGIMEN").is_ok());
        let err = doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap_err();
        assert!(matches!(err, MedError::OverlappingEntity { .. }));
    }

    #[test]
    fn test_overlap_policy_allow_keeps_both() {
        let mut doc = Document::new("note", TEXT);
        doc.add_entity(Span::new(17, 32), "REGIMEN").unwrap();
        doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        assert_eq!(doc.entity_count(), 2);
    }

    #[test]
    fn test_entities_overlapping_order_and_restart() {
        let mut doc = Document::new("note", TEXT);
        let late = doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        let early = doc.add_entity(Span::new(17, 21), "DOSAGE").unwrap();
        let same_start = doc.add_entity(Span::new(17, 18), "NUMBER").unwrap();

        let iter = doc.entities_overlapping(Span::new(0, TEXT.len()));
        let ids: Vec<EntityId> = iter.clone().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![early, same_start, late]);
        // restartable
        let again: Vec<EntityId> = iter.map(|(id, _)| id).collect();
        assert_eq!(ids, again);

        let narrow: Vec<EntityId> = doc
            .entities_overlapping(Span::new(20, 26))
            .map(|(id, _)| id)
            .collect();
        assert_eq!(narrow, vec![early, late]);
    }

    #[test]
    fn test_token_helpers() {
        let doc = tokenized();
        assert_eq!(doc.token_range_for(Span::new(17, 21)), Some(2..4));
        assert_eq!(doc.sentence_of(5), Some(0));
        assert_eq!(doc.sentence_of(9), None);
        assert_eq!(doc.token_gap(Span::new(17, 21), Span::new(25, 32)), Some(1));
        assert_eq!(doc.token_gap(Span::new(25, 32), Span::new(17, 21)), Some(1));
    }

    #[test]
    fn test_tokens_must_be_ordered() {
        let mut doc = Document::new("note", TEXT);
        doc.add_token(Token::new(Span::new(8, 16), "received")).unwrap();
        assert!(doc.add_token(Token::new(Span::new(0, 7), "Patient")).is_err());
    }

    #[test]
    fn test_stripped_keeps_tokens_only() {
        let mut doc = tokenized();
        doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        let stripped = doc.stripped();
        assert_eq!(stripped.tokens().len(), 7);
        assert_eq!(stripped.entity_count(), 0);
        assert_eq!(stripped.text(), TEXT);
    }

    proptest! {
        #[test]
        fn prop_overlap_query_sorted_and_complete(
            spans in prop::collection::vec((0usize..40, 1usize..8), 0..20),
            query in (0usize..45, 1usize..10),
        ) {
            let text = "x".repeat(48);
            let mut doc = Document::new("p", text);
            for (start, len) in &spans {
                doc.add_entity(Span::new(*start, start + len), "T").unwrap();
            }
            let query = Span::new(query.0, query.0 + query.1);

            let found: Vec<(EntityId, Span)> = doc
                .entities_overlapping(query)
                .map(|(id, e)| (id, e.span))
                .collect();

            let mut expected: Vec<(EntityId, Span)> = doc
                .entities()
                .filter(|(_, e)| e.span.overlaps(&query))
                .map(|(id, e)| (id, e.span))
                .collect();
            expected.sort_by_key(|(id, span)| (span.start, *id));

            prop_assert_eq!(&found, &expected);
            let again: Vec<(EntityId, Span)> = doc
                .entities_overlapping(query)
                .map(|(id, e)| (id, e.span))
                .collect();
            prop_assert_eq!(found, again);
        }
    }
}
