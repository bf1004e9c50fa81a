use crate::{IllegalConcurrentMutationError, LocalVocabError, LocalVocabIndex, WordSetId};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// An append-only set of words. Positions of words never change once assigned.
#[derive(Debug)]
struct WordSet {
    id: WordSetId,
    words: Vec<Arc<str>>,
    positions: FxHashMap<Arc<str>, u32>,
}

impl WordSet {
    fn new() -> Self {
        Self {
            id: WordSetId::next(),
            words: Vec::new(),
            positions: FxHashMap::default(),
        }
    }

    fn len(&self) -> usize {
        self.words.len()
    }

    fn index_of(&self, word: &str) -> Option<LocalVocabIndex> {
        self.positions
            .get_key_value(word)
            .map(|(word, &position)| LocalVocabIndex::new(self.id, position, Arc::clone(word)))
    }
}

/// Holds the words that were created during query evaluation and are not part of the global
/// vocabulary (e.g., the results of string functions).
///
/// A [LocalVocab] consists of one primary word set, which is the only one that accepts new words,
/// and an arbitrary number of other word sets that were merged in from the inputs of an
/// operation. Word sets are shared between vocabularies via [Arc]. Once a word set is visible from
/// more than one place, it is read-only. Cloning a [LocalVocab] shares its primary word set, which
/// makes both copies read-only until one of them obtains a fresh primary set via
/// [LocalVocab::writable_copy].
///
/// An [Id::LocalVocabIndex](crate::Id::LocalVocabIndex) stays resolvable as long as any vocabulary
/// that holds its word set is alive.
#[derive(Clone, Debug)]
pub struct LocalVocab {
    primary: Arc<WordSet>,
    others: FxHashMap<WordSetId, Arc<WordSet>>,
}

impl Default for LocalVocab {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalVocab {
    /// Creates a new empty [LocalVocab].
    pub fn new() -> Self {
        Self {
            primary: Arc::new(WordSet::new()),
            others: FxHashMap::default(),
        }
    }

    /// Returns the total number of words over all word sets.
    pub fn len(&self) -> usize {
        self.primary.len() + self.others.values().map(|set| set.len()).sum::<usize>()
    }

    /// Returns `true` if the vocabulary does not contain any word.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of non-empty word sets held by this vocabulary.
    pub fn num_sets(&self) -> usize {
        usize::from(self.primary.len() > 0) + self.others.len()
    }

    /// Returns the id of the primary word set.
    pub fn primary_word_set(&self) -> WordSetId {
        self.primary.id
    }

    /// Returns the index of `word`, inserting it into the primary word set if it is not yet
    /// contained in any word set.
    ///
    /// Fails with [LocalVocabError::IllegalConcurrentMutation] if the primary word set is shared
    /// with another vocabulary.
    pub fn get_index_and_add_if_not_contained(
        &mut self,
        word: &str,
    ) -> Result<LocalVocabIndex, LocalVocabError> {
        if let Some(index) = self.get_index_or_none(word) {
            return Ok(index);
        }

        let word_set = self.primary.id;
        let primary = Arc::get_mut(&mut self.primary)
            .ok_or(IllegalConcurrentMutationError { word_set })?;
        let position = u32::try_from(primary.words.len())
            .map_err(|_| LocalVocabError::CapacityExceeded(word_set))?;
        let word: Arc<str> = Arc::from(word);
        primary.words.push(Arc::clone(&word));
        primary.positions.insert(Arc::clone(&word), position);
        Ok(LocalVocabIndex::new(word_set, position, word))
    }

    /// Returns the index of `word` if it is contained in any word set of this vocabulary.
    pub fn get_index_or_none(&self, word: &str) -> Option<LocalVocabIndex> {
        self.primary
            .index_of(word)
            .or_else(|| self.others.values().find_map(|set| set.index_of(word)))
    }

    /// Returns the word for `index` or [None] if its word set is not held by this vocabulary.
    pub fn get_word(&self, index: &LocalVocabIndex) -> Option<&str> {
        let set = if index.word_set() == self.primary.id {
            &self.primary
        } else {
            self.others.get(&index.word_set())?
        };
        set.words
            .get(usize::try_from(index.position()).ok()?)
            .map(AsRef::as_ref)
    }

    /// Returns `true` if `index` can be resolved by this vocabulary.
    pub fn contains_index(&self, index: &LocalVocabIndex) -> bool {
        self.get_word(index).is_some()
    }

    /// Returns all words. The words of the primary set come first, followed by the other word
    /// sets in the order of their ids.
    pub fn words(&self) -> Vec<&str> {
        let mut others = self.others.values().collect::<Vec<_>>();
        others.sort_by_key(|set| set.id);
        std::iter::once(&self.primary)
            .chain(others)
            .flat_map(|set| set.words.iter().map(AsRef::as_ref))
            .collect()
    }

    /// Returns a vocabulary that can resolve everything this one can, and that owns a fresh,
    /// empty primary word set. The word sets of `self` become read-only.
    #[must_use]
    pub fn writable_copy(&self) -> Self {
        let mut result = Self::new();
        result.merge_with(self);
        result
    }

    /// Adds all word sets of `other` to this vocabulary. The primary word set of `self` stays
    /// writable as long as it was not shared before. Empty word sets are skipped.
    pub fn merge_with(&mut self, other: &LocalVocab) {
        for set in std::iter::once(&other.primary).chain(other.others.values()) {
            if set.len() == 0 || set.id == self.primary.id {
                continue;
            }
            self.others
                .entry(set.id)
                .or_insert_with(|| Arc::clone(set));
        }
    }

    /// Creates a new vocabulary that holds all word sets of `vocabs`. The result owns a fresh
    /// primary word set.
    pub fn merge<'vocab>(vocabs: impl IntoIterator<Item = &'vocab LocalVocab>) -> Self {
        let mut result = Self::new();
        for vocab in vocabs {
            result.merge_with(vocab);
        }
        result
    }
}
