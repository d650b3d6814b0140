/*!
# UMICP Matrix Operations

Vector and matrix helpers used by embedding exchange workloads. This is a
utility surface for payload producers and consumers; the protocol core does
not depend on it.
*/

use crate::error::{Result, UmicpError};

/// Matrix operations over `f32` slices
#[derive(Debug, Default)]
pub struct Matrix;

impl Matrix {
    pub fn new() -> Self {
        Matrix
    }

    /// Element-wise vector addition: `result = a + b`
    pub fn vector_add(&self, a: &[f32], b: &[f32], result: &mut [f32]) -> Result<()> {
        if a.len() != b.len() || a.len() != result.len() {
            return Err(UmicpError::invalid_argument(format!(
                "Vector length mismatch: a({}), b({}), result({})",
                a.len(),
                b.len(),
                result.len()
            )));
        }
        for ((out, &x), &y) in result.iter_mut().zip(a).zip(b) {
            *out = x + y;
        }
        Ok(())
    }

    /// Dot product of two equal-length vectors
    pub fn dot_product(&self, a: &[f32], b: &[f32]) -> Result<f64> {
        if a.len() != b.len() {
            return Err(UmicpError::invalid_argument(format!(
                "Vector length mismatch: a({}) != b({})",
                a.len(),
                b.len()
            )));
        }
        Ok(a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum())
    }

    /// Cosine similarity of two equal-length vectors
    pub fn cosine_similarity(&self, a: &[f32], b: &[f32]) -> Result<f64> {
        let dot = self.dot_product(a, b)?;
        let norm_a = self.dot_product(a, a)?.sqrt();
        let norm_b = self.dot_product(b, b)?.sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return Err(UmicpError::invalid_argument(
                "Cosine similarity is undefined for zero vectors",
            ));
        }
        Ok(dot / (norm_a * norm_b))
    }

    /// Matrix multiplication: `result(m x p) = a(m x n) * b(n x p)`,
    /// row-major
    pub fn multiply(
        &self,
        a: &[f32],
        b: &[f32],
        result: &mut [f32],
        m: usize,
        n: usize,
        p: usize,
    ) -> Result<()> {
        if a.len() != m * n || b.len() != n * p || result.len() != m * p {
            return Err(UmicpError::invalid_argument(format!(
                "Invalid matrix dimensions: a({}) != {}x{}, b({}) != {}x{}, result({}) != {}x{}",
                a.len(),
                m,
                n,
                b.len(),
                n,
                p,
                result.len(),
                m,
                p
            )));
        }
        result.fill(0.0);
        for i in 0..m {
            for k in 0..n {
                let lhs = a[i * n + k];
                for j in 0..p {
                    result[i * p + j] += lhs * b[k * p + j];
                }
            }
        }
        Ok(())
    }

    /// Matrix transpose: `output(cols x rows) = input(rows x cols)^T`
    pub fn transpose(
        &self,
        input: &[f32],
        output: &mut [f32],
        rows: usize,
        cols: usize,
    ) -> Result<()> {
        if input.len() != rows * cols || output.len() != rows * cols {
            return Err(UmicpError::invalid_argument(format!(
                "Invalid transpose dimensions: input({}) != {}x{}, output({})",
                input.len(),
                rows,
                cols,
                output.len()
            )));
        }
        for i in 0..rows {
            for j in 0..cols {
                output[j * rows + i] = input[i * cols + j];
            }
        }
        Ok(())
    }

    /// Scale a vector to unit length in place. Zero vectors are left
    /// untouched.
    pub fn normalize(&self, vector: &mut [f32]) -> Result<()> {
        let norm = self.dot_product(vector, vector)?.sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value = (*value as f64 / norm) as f32;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_add() {
        let matrix = Matrix::new();
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut result = [0.0; 4];
        matrix.vector_add(&a, &b, &mut result).unwrap();
        assert_eq!(result, [6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn test_dot_product() {
        let matrix = Matrix::new();
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_eq!(matrix.dot_product(&a, &b).unwrap(), 70.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let matrix = Matrix::new();
        let mut result = [0.0; 2];
        assert!(matrix
            .vector_add(&[1.0, 2.0], &[1.0, 2.0, 3.0], &mut result)
            .is_err());
        assert!(matrix.dot_product(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_multiply() {
        let matrix = Matrix::new();
        let a = [1.0, 2.0, 3.0, 4.0]; // 2x2
        let b = [5.0, 6.0, 7.0, 8.0]; // 2x2
        let mut result = [0.0; 4];
        matrix.multiply(&a, &b, &mut result, 2, 2, 2).unwrap();
        assert_eq!(result, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_transpose() {
        let matrix = Matrix::new();
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let mut output = [0.0; 6];
        matrix.transpose(&input, &mut output, 2, 3).unwrap();
        assert_eq!(output, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let matrix = Matrix::new();
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert!((matrix.cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-9);
        assert!(matrix.cosine_similarity(&a, &c).unwrap().abs() < 1e-9);
        assert!(matrix.cosine_similarity(&a, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_normalize() {
        let matrix = Matrix::new();
        let mut vector = [3.0, 4.0];
        matrix.normalize(&mut vector).unwrap();
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);
    }
}
