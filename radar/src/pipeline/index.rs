/// Flat inner-product index over every known embedding. It is a derived
/// cache: the authoritative vectors live in the embeddings table and the
/// index is rebuilt from them at startup. The pipeline actor is the only
/// writer, so no interior locking is needed.
pub struct VectorIndex {
    dim: usize,
    ids: Vec<i32>,
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn add(&mut self, id: i32, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
    }

    pub fn add_batch<'a>(&mut self, entries: impl IntoIterator<Item = (i32, &'a [f32])>) {
        for (id, vector) in entries {
            self.add(id, vector);
        }
    }

    /// Top-k neighbors by inner product (cosine similarity for unit-norm
    /// vectors), most similar first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i32, f32)> {
        debug_assert_eq!(query.len(), self.dim);

        let mut scored: Vec<(i32, f32)> = self
            .vectors
            .chunks_exact(self.dim)
            .zip(self.ids.iter())
            .map(|(vector, id)| {
                let dot = vector.iter().zip(query).map(|(a, b)| a * b).sum::<f32>();
                (*id, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn search_ranks_by_inner_product() {
        let mut index = VectorIndex::new(2);
        index.add(1, &[1.0, 0.0]);
        index.add(2, &[0.0, 1.0]);
        index.add(3, &[0.7071, 0.7071]);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, 3);
    }

    #[test]
    fn k_larger_than_size_returns_all() {
        let mut index = VectorIndex::new(2);
        index.add_batch([(10, [1.0f32, 0.0].as_slice()), (11, [0.0f32, 1.0].as_slice())]);
        let hits = index.search(&[1.0, 0.0], 30);
        assert_eq!(hits.len(), 2);
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = VectorIndex::new(4);
        assert!(index.search(&[0.0; 4], 5).is_empty());
    }
}
