//! Transformer trait and the record transformations used between staging steps

use crate::records::Record;
use std::collections::HashSet;
use std::marker::PhantomData;

/// Transformer trait for reshaping a batch of records
///
/// Implementors define how to transform a batch:
/// - Validation (dropping records)
/// - De-duplication
/// - Pass-through
///
/// Transformers compose with [`Transformer::then`].
///
/// # Example
/// ```no_run
/// use analytics_etl::etl::{Deduplicator, Transformer, ValidityFilter};
/// use analytics_etl::records::Customer;
///
/// let clean = ValidityFilter::<Customer>::new().then(Deduplicator::new());
/// let customers = clean.transform(Vec::new());
/// assert!(customers.is_empty());
/// ```
pub trait Transformer: Send + Sync {
    /// Record type flowing through
    type Item: Send;

    /// Transform a batch, preserving the relative order of kept records
    fn transform(&self, items: Vec<Self::Item>) -> Vec<Self::Item>;

    /// Run `next` on the output of this transformer
    fn then<B>(self, next: B) -> Chain<Self, B>
    where
        Self: Sized,
        B: Transformer<Item = Self::Item>,
    {
        Chain {
            first: self,
            second: next,
        }
    }
}

/// Two transformers applied in sequence
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A, B> Transformer for Chain<A, B>
where
    A: Transformer,
    B: Transformer<Item = A::Item>,
{
    type Item = A::Item;

    fn transform(&self, items: Vec<Self::Item>) -> Vec<Self::Item> {
        self.second.transform(self.first.transform(items))
    }
}

/// Pass-through transformer for records with no independent identity to clean
pub struct PassThrough<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for PassThrough<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> PassThrough<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Send> Transformer for PassThrough<T> {
    type Item = T;

    fn transform(&self, items: Vec<Self::Item>) -> Vec<Self::Item> {
        items
    }
}

/// Drops records that fail [`Record::is_valid`]
pub struct ValidityFilter<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for ValidityFilter<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> ValidityFilter<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Record> Transformer for ValidityFilter<T> {
    type Item = T;

    fn transform(&self, items: Vec<Self::Item>) -> Vec<Self::Item> {
        let before = items.len();
        let kept: Vec<T> = items.into_iter().filter(T::is_valid).collect();
        if kept.len() < before {
            log::debug!(
                "Dropped {} invalid {} records",
                before - kept.len(),
                T::TABLE
            );
        }
        kept
    }
}

/// Keeps one record per primary key.
///
/// Tie-break: the first record encountered in input order wins; later records
/// sharing its key are dropped even if their other fields differ.
pub struct Deduplicator<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Deduplicator<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Record> Transformer for Deduplicator<T> {
    type Item = T;

    fn transform(&self, items: Vec<Self::Item>) -> Vec<Self::Item> {
        let before = items.len();
        let mut seen = HashSet::with_capacity(before);
        let kept: Vec<T> = items
            .into_iter()
            .filter(|record| seen.insert(record.key()))
            .collect();
        if kept.len() < before {
            log::debug!(
                "Dropped {} duplicate {} records by {}",
                before - kept.len(),
                T::TABLE,
                T::PRIMARY_KEY
            );
        }
        kept
    }
}
