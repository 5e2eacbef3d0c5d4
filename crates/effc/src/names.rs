//! Hierarchical names and a small string interner.
//!
//! A [`Name`] is either empty, a single word, or a qualified link
//! (`parent·child`). Equality is structural. Words are interned so that
//! comparing two [`Word`]s is a pointer-free integer comparison.

use std::fmt;

use ahash::AHashMap;

/// Interned identifier for a single name segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Word(u32);

/// Interns [`Word`]s so repeated segments compare by index, not by string.
#[derive(Debug, Default, Clone)]
pub struct WordInterner {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, Word>,
}

impl WordInterner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Word {
        if let Some(&w) = self.lookup.get(s) {
            return w;
        }
        let id = Word(u32::try_from(self.strings.len()).expect("too many interned words"));
        self.strings.push(s.into());
        self.lookup.insert(s.into(), id);
        id
    }

    #[must_use]
    pub fn resolve(&self, word: Word) -> &str {
        &self.strings[word.0 as usize]
    }
}

/// A hierarchical name: empty, a single word, or `parent·child`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    /// The anonymous block name, used for top-level or synthetic scopes.
    Blk,
    /// A single unqualified word.
    Local(Word),
    /// A qualified name `parent·child`.
    Link(Box<Name>, Word),
}

impl Name {
    #[must_use]
    pub fn local(word: Word) -> Self {
        Self::Local(word)
    }

    #[must_use]
    pub fn qualified(parent: Name, child: Word) -> Self {
        Self::Link(Box::new(parent), child)
    }

    /// The last segment of this name, or `None` for [`Name::Blk`].
    #[must_use]
    pub fn last(&self) -> Option<Word> {
        match self {
            Self::Blk => None,
            Self::Local(w) => Some(*w),
            Self::Link(_, w) => Some(*w),
        }
    }

    /// The parent of this name, or `None` if this name has no parent.
    #[must_use]
    pub fn parent(&self) -> Option<&Name> {
        match self {
            Self::Link(parent, _) => Some(parent),
            Self::Blk | Self::Local(_) => None,
        }
    }

    /// Renders a dot-joined display form given an interner to resolve words.
    #[must_use]
    pub fn render(&self, interner: &WordInterner) -> String {
        match self {
            Self::Blk => String::new(),
            Self::Local(w) => interner.resolve(*w).to_owned(),
            Self::Link(parent, w) => format!("{}.{}", parent.render(interner), interner.resolve(*w)),
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({})", self.0)
    }
}
