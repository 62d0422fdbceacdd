//! First-fit packing of rule files into size-bounded buckets.
//!
//! One bucket becomes one ConfigMap. Filenames are placed in lexicographic
//! order so that unchanged input always produces the same buckets.

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from [`pack`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    /// A single file does not fit in an empty bucket
    #[error("rule file {filename:?} is {size} bytes, more than the {max} bytes a ConfigMap can hold")]
    FileTooLarge { filename: String, size: usize, max: usize },
}

/// Ordered `(filename, content)` pairs whose total size fits one ConfigMap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleBucket {
    files: Vec<(String, String)>,
    size: usize,
}

impl RuleBucket {
    /// Total content bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(name, _)| name.as_str())
    }

    /// ConfigMap `data` for this bucket.
    pub fn into_data(self) -> BTreeMap<String, String> {
        self.files.into_iter().collect()
    }

    fn push(&mut self, filename: &str, content: &str) {
        self.size += content.len();
        self.files.push((filename.to_string(), content.to_string()));
    }
}

/// Pack `files` into buckets of at most `max_size` content bytes.
///
/// Always returns at least one bucket. Any file larger than `max_size`
/// fails the whole call.
pub fn pack(files: &BTreeMap<String, String>, max_size: usize) -> Result<Vec<RuleBucket>, PackError> {
    if let Some((filename, content)) = files.iter().find(|(_, content)| content.len() > max_size) {
        return Err(PackError::FileTooLarge {
            filename: filename.clone(),
            size: content.len(),
            max: max_size,
        });
    }

    let mut buckets = vec![RuleBucket::default()];
    for (filename, content) in files {
        let fits = buckets
            .last()
            .is_some_and(|bucket| bucket.size + content.len() <= max_size);
        if !fits {
            buckets.push(RuleBucket::default());
        }
        if let Some(bucket) = buckets.last_mut() {
            bucket.push(filename, content);
        }
    }
    Ok(buckets)
}
