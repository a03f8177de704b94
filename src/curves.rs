//! Parametric curve families driving the synthetic book shape.
//!
//! Each family is configured by four coefficients `(a, b, c, d)` and evaluated
//! at a scalar input. Outputs are unclamped — callers clamp.

/// `a / (1 + c·e^(b·x)) + d`
pub fn logistic(c: [f64; 4], x: f64) -> f64 {
    c[0] / (1.0 + c[2] * (c[1] * x).exp()) + c[3]
}

/// `d + (a − d) / (1 + (x/c)^b)`
pub fn sigmoidal(c: [f64; 4], x: f64) -> f64 {
    c[3] + (c[0] - c[3]) / (1.0 + (x / c[2]).powf(c[1]))
}

/// `a·e^(−(x−b)² / (2c²)) + d`
pub fn exponential(c: [f64; 4], x: f64) -> f64 {
    c[0] * (-(x - c[1]).powi(2) / (2.0 * c[2].powi(2))).exp() + c[3]
}
