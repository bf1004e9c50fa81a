use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

/// Identifies a single word set of a [LocalVocab](crate::LocalVocab).
///
/// Word set ids are unique within a process. This allows tables that were produced with
/// different local vocabularies to be concatenated without re-mapping their ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordSetId(u64);

static NEXT_WORD_SET_ID: AtomicU64 = AtomicU64::new(0);

impl WordSetId {
    /// Allocates a new, process-unique [WordSetId].
    pub fn next() -> Self {
        Self(NEXT_WORD_SET_ID.fetch_add(1, atomic::Ordering::Relaxed))
    }

    /// Returns the raw value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for WordSetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Points to a single word of a local vocabulary.
///
/// The index remembers where the word is stored (its word set and its position in that set) and
/// holds a shared reference to the word itself. Equality, ordering and hashing only consider the
/// word. Thus, the same word that was added to two independent vocabularies yields equal indices,
/// which is required for joins over results that were computed with different vocabularies.
#[derive(Clone, Debug)]
pub struct LocalVocabIndex {
    word_set: WordSetId,
    position: u32,
    word: Arc<str>,
}

impl LocalVocabIndex {
    pub(crate) fn new(word_set: WordSetId, position: u32, word: Arc<str>) -> Self {
        Self {
            word_set,
            position,
            word,
        }
    }

    /// Returns the word set that holds the word.
    pub fn word_set(&self) -> WordSetId {
        self.word_set
    }

    /// Returns the position of the word in its word set.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Returns the word.
    pub fn word(&self) -> &str {
        &self.word
    }
}

impl PartialEq for LocalVocabIndex {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
    }
}

impl Eq for LocalVocabIndex {}

impl PartialOrd for LocalVocabIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalVocabIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.word.cmp(&other.word)
    }
}

impl Hash for LocalVocabIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.word.hash(state);
    }
}

/// A single cell of an [IdTable](crate::IdTable).
///
/// The order of the variants defines the sort order of the cells. Most importantly,
/// [Id::Undefined] sorts before all defined values. Join algorithms rely on this property, as
/// it places all UNDEF values of a sorted column at its start. Local vocabulary entries are
/// compared by their words.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Id {
    /// An unbound value. Matches every other value in joins.
    #[default]
    Undefined,
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// An index into the global vocabulary of the storage layer.
    VocabIndex(u64),
    /// An index into a local vocabulary.
    LocalVocabIndex(LocalVocabIndex),
}

impl Id {
    /// Returns `true` if this is [Id::Undefined].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Id::Undefined)
    }
}

impl From<bool> for Id {
    fn from(value: bool) -> Self {
        Id::Bool(value)
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Int(value)
    }
}

impl From<LocalVocabIndex> for Id {
    fn from(value: LocalVocabIndex) -> Self {
        Id::LocalVocabIndex(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Undefined => f.write_str("UNDEF"),
            Id::Bool(value) => write!(f, "{value}"),
            Id::Int(value) => write!(f, "{value}"),
            Id::VocabIndex(value) => write!(f, "V:{value}"),
            Id::LocalVocabIndex(index) => write!(f, "\"{}\"", index.word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_sorts_first() {
        let mut ids = vec![
            Id::VocabIndex(0),
            Id::Int(-5),
            Id::Undefined,
            Id::Bool(false),
            Id::Int(3),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                Id::Undefined,
                Id::Bool(false),
                Id::Int(-5),
                Id::Int(3),
                Id::VocabIndex(0)
            ]
        );
    }

    #[test]
    fn word_set_ids_are_unique() {
        let first = WordSetId::next();
        let second = WordSetId::next();
        assert_ne!(first, second);
    }

    #[test]
    fn local_vocab_indices_compare_by_word() {
        let a = LocalVocabIndex::new(WordSetId::next(), 3, Arc::from("a"));
        let other_a = LocalVocabIndex::new(WordSetId::next(), 0, Arc::from("a"));
        let b = LocalVocabIndex::new(a.word_set(), 0, Arc::from("b"));

        assert_eq!(a, other_a);
        assert!(a < b);
        assert!(Id::Int(i64::MAX) < Id::LocalVocabIndex(a.clone()));
        assert_eq!(Id::LocalVocabIndex(a).to_string(), "\"a\"");
    }

    #[test]
    fn display() {
        assert_eq!(Id::Undefined.to_string(), "UNDEF");
        assert_eq!(Id::Int(42).to_string(), "42");
        assert_eq!(Id::VocabIndex(7).to_string(), "V:7");
    }
}
