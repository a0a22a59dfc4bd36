use rayon::prelude::*;

/// The amount of elements each parallel task averages.
const CHUNK_SIZE: usize = 4096;

/// Computes the elementwise arithmetic mean of `contributions`.
///
/// Every element is summed in the order of `contributions` and then divided by their
/// count, so for a fixed order the result is bit for bit reproducible no matter how the
/// work is split.
///
/// # Arguments
/// * `contributions` - The weight vectors, all of them `dimension` long.
/// * `dimension` - The length of every vector.
///
/// # Returns
/// The averaged vector.
pub(super) fn mean(contributions: &[&[f64]], dimension: usize) -> Vec<f64> {
    let mut out = vec![0.; dimension];
    let count = contributions.len() as f64;

    out.par_chunks_mut(CHUNK_SIZE)
        .enumerate()
        .for_each(|(i, chunk)| {
            let offset = i * CHUNK_SIZE;

            for (k, weights) in contributions.iter().enumerate() {
                let slice = &weights[offset..offset + chunk.len()];

                if k == 0 {
                    chunk.copy_from_slice(slice);
                } else {
                    chunk.iter_mut().zip(slice).for_each(|(acc, w)| *acc += w);
                }
            }

            chunk.iter_mut().for_each(|acc| *acc /= count);
        });

    out
}
