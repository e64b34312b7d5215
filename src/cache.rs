//! Name-to-shape cache threaded through one inference run.

use rustc_hash::FxHashMap;

use crate::graph::Shape;
use crate::infer_shapes::InferShapesError;

/// Map of tensor name to inferred shape for a single inference run.
///
/// The cache is seeded with the graph's external inputs and constant tensors,
/// then grows as each operator's outputs are inferred. Entries are stored by
/// value; a caller that wants to derive a new shape from a cached one clones
/// it first, so a shape recorded for one tensor can never be modified through
/// another tensor's entry.
pub struct ShapeCache {
    // Keys are tensor names allocated by the converter rather than untrusted
    // input, so we prefer faster hashing over the DOS resistance of the std
    // hasher.
    shapes: FxHashMap<String, Shape>,
}

impl ShapeCache {
    /// Create an empty cache.
    pub fn new() -> ShapeCache {
        ShapeCache {
            shapes: FxHashMap::default(),
        }
    }

    /// Check whether a shape has been recorded for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.shapes.contains_key(name)
    }

    /// Record the shape of the tensor `name`.
    ///
    /// Entries grow monotonically over a run: an existing entry is only ever
    /// replaced by the operator that produces the tensor.
    pub fn insert(&mut self, name: String, shape: Shape) {
        self.shapes.insert(name, shape);
    }

    /// Look up the shape of the tensor `name`.
    pub fn get(&self, name: &str) -> Result<&Shape, InferShapesError> {
        self.shapes
            .get(name)
            .ok_or_else(|| InferShapesError::UnknownTensor(name.to_string()))
    }

    /// Return the number of recorded shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl Default for ShapeCache {
    fn default() -> ShapeCache {
        ShapeCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ShapeCache;
    use crate::graph::Shape;
    use crate::infer_shapes::InferShapesError;

    #[test]
    fn test_insert_and_get() {
        let mut cache = ShapeCache::new();
        assert!(cache.is_empty());

        cache.insert("image".to_string(), Shape::from_slice(&[1, 3, 32, 32]));

        assert!(cache.contains("image"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("image").unwrap().as_slice(),
            [1, 3, 32, 32].as_slice()
        );
    }

    #[test]
    fn test_get_unknown_tensor() {
        let cache = ShapeCache::new();
        assert_eq!(
            cache.get("missing").err(),
            Some(InferShapesError::UnknownTensor("missing".to_string()))
        );
    }
}
