//! Embedded univariate root finders. Both methods are compact enough to
//! carry directly instead of pulling in a numeric stack: a Newton-secant
//! iteration seeded from two points, and Brent's method on a sign-changing
//! bracket.

use crate::error::{TciError, TciResult};

#[derive(Debug, Clone, Copy)]
pub struct RootSearch {
    pub root: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Newton-secant iteration from two seeds. Stops when the residual drops
/// below `ftol` or the step below `xtol`. Iterates are clamped to `floor`
/// when one is given; a flat residual ends the search unconverged.
pub fn secant<F>(
    mut f: F,
    seed0: f64,
    seed1: f64,
    xtol: f64,
    ftol: f64,
    max_iterations: usize,
    floor: Option<f64>,
) -> RootSearch
where
    F: FnMut(f64) -> f64,
{
    let mut x0 = seed0;
    let mut f0 = f(x0);
    if f0.abs() <= ftol {
        return RootSearch {
            root: x0,
            iterations: 0,
            converged: true,
        };
    }

    let mut x1 = seed1;
    let mut f1 = f(x1);

    for iteration in 1..=max_iterations {
        if f1.abs() <= ftol || (x1 - x0).abs() <= xtol {
            return RootSearch {
                root: x1,
                iterations: iteration,
                converged: true,
            };
        }
        if (f1 - f0).abs() <= f64::EPSILON * (f1.abs() + f0.abs()).max(1.0) {
            return RootSearch {
                root: x1,
                iterations: iteration,
                converged: false,
            };
        }

        let mut x2 = x1 - f1 * (x1 - x0) / (f1 - f0);
        if let Some(lowest) = floor {
            if x2 < lowest {
                x2 = lowest;
            }
        }
        if x2 == x1 {
            return RootSearch {
                root: x1,
                iterations: iteration,
                converged: true,
            };
        }

        x0 = x1;
        f0 = f1;
        x1 = x2;
        f1 = f(x1);
    }

    RootSearch {
        root: x1,
        iterations: max_iterations,
        converged: false,
    }
}

/// Brent's method on [lo, hi]. The endpoints must bracket a sign change.
pub fn brent<F>(mut f: F, lo: f64, hi: f64, xtol: f64, max_iterations: usize) -> TciResult<RootSearch>
where
    F: FnMut(f64) -> f64,
{
    let mut a = lo;
    let mut b = hi;
    let mut fa = f(a);
    let mut fb = f(b);

    if fa * fb > 0.0 {
        return Err(TciError::RootNotBracketed { lo, hi });
    }

    if fa.abs() < fb.abs() {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = 0.0;
    let mut bisected = true;

    for iteration in 1..=max_iterations {
        if fb == 0.0 || (b - a).abs() <= xtol {
            return Ok(RootSearch {
                root: b,
                iterations: iteration,
                converged: true,
            });
        }

        let mut s = if fa != fc && fb != fc {
            // inverse quadratic interpolation
            a * fb * fc / ((fa - fb) * (fa - fc))
                + b * fa * fc / ((fb - fa) * (fb - fc))
                + c * fa * fb / ((fc - fa) * (fc - fb))
        } else {
            b - fb * (b - a) / (fb - fa)
        };

        let midpoint = (3.0 * a + b) / 4.0;
        let out_of_bounds = !((midpoint < s && s < b) || (b < s && s < midpoint));
        let slow_progress = if bisected {
            (s - b).abs() >= (b - c).abs() / 2.0 || (b - c).abs() < xtol
        } else {
            (s - b).abs() >= (c - d).abs() / 2.0 || (c - d).abs() < xtol
        };

        if out_of_bounds || slow_progress {
            s = (a + b) / 2.0;
            bisected = true;
        } else {
            bisected = false;
        }

        let fs = f(s);
        d = c;
        c = b;
        fc = fb;

        if fa * fs < 0.0 {
            b = s;
            fb = fs;
        } else {
            a = s;
            fa = fs;
        }

        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }
    }

    Ok(RootSearch {
        root: b,
        iterations: max_iterations,
        converged: false,
    })
}
