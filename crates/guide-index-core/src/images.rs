//! Image filtering policy applied between extraction and embedding.
//!
//! Generated guides usually open with a cover or logo image that carries no
//! step content. Instead of removing a hardcoded position, the policy names
//! what is dropped:
//!
//! - `skip_first`: the first N images of every document,
//! - `skip`: explicit positions for a given document,
//! - `min_side`: images too small to be screenshots (icons, bullets, rules).
//!
//! Positions refer to the extraction order. Survivors are re-indexed
//! `0..n`, and that index becomes the descriptor's `image_index`.

use std::collections::HashMap;

/// Width and height of an extracted image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Declarative filter over a document's extracted images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePolicy {
    pub skip_first: usize,
    pub skip: HashMap<String, Vec<usize>>,
    pub min_side: u32,
}

impl ImagePolicy {
    /// Whether the image at `position` (extraction order) of `doc` is kept.
    pub fn keeps(&self, doc: &str, position: usize, size: ImageSize) -> bool {
        if position < self.skip_first {
            return false;
        }
        if self
            .skip
            .get(doc)
            .is_some_and(|positions| positions.contains(&position))
        {
            return false;
        }
        size.width >= self.min_side && size.height >= self.min_side
    }

    /// Filter a document's images in order, keeping the survivors.
    pub fn apply<T, F>(&self, doc: &str, images: Vec<T>, size_of: F) -> Vec<T>
    where
        F: Fn(&T) -> ImageSize,
    {
        images
            .into_iter()
            .enumerate()
            .filter(|(position, img)| self.keeps(doc, *position, size_of(img)))
            .map(|(_, img)| img)
            .collect()
    }
}
