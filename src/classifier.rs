use nalgebra::{DMatrix, DVector};

use crate::error::Result;

/// A two-class model over labels -1 and +1.
pub trait BinaryClassifier {
    fn fit(&mut self, samples: &DMatrix<f64>, labels: &DVector<f64>) -> Result<()>;

    /// Predicted label, -1.0 or 1.0, for one feature vector.
    fn predict(&self, features: &DVector<f64>) -> f64;

    /// Fraction of rows of `samples` whose prediction disagrees with `labels`.
    fn misclassification_rate(&self, samples: &DMatrix<f64>, labels: &DVector<f64>) -> f64 {
        if samples.nrows() == 0 {
            return 0.0;
        }

        let mut wrong_predictions = 0;
        for i in 0..samples.nrows() {
            let sample = samples.row(i).transpose();
            let prediction = self.predict(&sample);

            #[allow(clippy::float_cmp)]
            if prediction != labels[i] {
                wrong_predictions += 1;
            }
        }

        wrong_predictions as f64 / samples.nrows() as f64
    }
}
