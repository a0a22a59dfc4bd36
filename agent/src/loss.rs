/// The contract between an agent and the model it trains.
///
/// Implementations must be pure, the same weights and iteration always produce the
/// same output.
pub trait LossFn: Send + Sync {
    /// Evaluates the loss and its gradient.
    ///
    /// # Arguments
    /// * `weights` - The weights to evaluate at.
    /// * `iteration` - The iteration counter of the agent's state.
    ///
    /// # Returns
    /// The loss and a gradient as long as `weights`.
    fn evaluate(&self, weights: &[f64], iteration: u64) -> (f64, Vec<f64>);
}

impl<F> LossFn for F
where
    F: Fn(&[f64], u64) -> (f64, Vec<f64>) + Send + Sync,
{
    fn evaluate(&self, weights: &[f64], iteration: u64) -> (f64, Vec<f64>) {
        self(weights, iteration)
    }
}
