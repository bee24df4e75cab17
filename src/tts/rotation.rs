//! Model-variant rotation for synthesis retries.

use std::collections::HashSet;

/// Picks the model variant for each attempt.
///
/// Each call returns the next variant not yet tried this round, in list
/// order, starting after the previous pick. Once every variant has been
/// tried a new round starts, still skipping the variant used last. With two
/// or more variants the same one is never used twice in a row.
#[derive(Debug, Clone)]
pub struct ModelRotation {
    variants: Vec<String>,
    tried: HashSet<usize>,
    last: Option<usize>,
}

impl ModelRotation {
    /// Rotation over `variants`, starting with `preferred` when it is listed.
    pub fn new(variants: &[String], preferred: &str) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(variants.len());
        for v in variants {
            if !unique.contains(v) {
                unique.push(v.clone());
            }
        }
        // Rotate so the preferred variant comes first.
        if let Some(pos) = unique.iter().position(|v| v == preferred) {
            unique.rotate_left(pos);
        }
        Self {
            variants: unique,
            tried: HashSet::new(),
            last: None,
        }
    }

    /// Variant for the next attempt, or `None` if the list is empty.
    pub fn next_variant(&mut self) -> Option<&str> {
        let len = self.variants.len();
        if len == 0 {
            return None;
        }
        if self.tried.len() >= len {
            self.tried.clear();
        }
        let start = self.last.map_or(0, |i| (i + 1) % len);
        let pick = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|i| !self.tried.contains(i) && (len == 1 || Some(*i) != self.last))?;
        self.tried.insert(pick);
        self.last = Some(pick);
        Some(&self.variants[pick])
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}
