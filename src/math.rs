//! Small rigid-motion helpers layered on top of `glam`.
//!
//! `glam` supplies the vector and matrix arithmetic; this module adds the
//! 2D cross products, a sine/cosine rotation, rigid transforms and the
//! interpolated body sweep used by continuous collision.

use glam::{Mat2, Vec2};
use serde::{Deserialize, Serialize};

/// 2D cross product (z component of the 3D cross product).
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Cross product of a vector and a scalar: `v x s`.
#[inline]
pub fn cross_vs(v: Vec2, s: f32) -> Vec2 {
    Vec2::new(s * v.y, -s * v.x)
}

/// Cross product of a scalar and a vector: `s x v`.
#[inline]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// Inverse of a 2x2 matrix. A singular matrix maps to zero instead of
/// producing infinities.
pub fn inverse22(m: Mat2) -> Mat2 {
    let (a, b) = (m.x_axis.x, m.y_axis.x);
    let (c, d) = (m.x_axis.y, m.y_axis.y);
    let mut det = a * d - b * c;
    if det != 0.0 {
        det = 1.0 / det;
    }
    Mat2::from_cols(Vec2::new(det * d, -det * c), Vec2::new(-det * b, det * a))
}

/// Solve `m * x = b`. Cheaper than inverting when only one solve is needed.
pub fn solve22(m: Mat2, b: Vec2) -> Vec2 {
    let (a11, a12) = (m.x_axis.x, m.y_axis.x);
    let (a21, a22) = (m.x_axis.y, m.y_axis.y);
    let mut det = a11 * a22 - a12 * a21;
    if det != 0.0 {
        det = 1.0 / det;
    }
    Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
}

/// Rotation stored as sine/cosine.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rot {
    pub s: f32,
    pub c: f32,
}

impl Default for Rot {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rot {
    pub const IDENTITY: Rot = Rot { s: 0.0, c: 1.0 };

    pub fn new(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self { s, c }
    }

    pub fn angle(self) -> f32 {
        self.s.atan2(self.c)
    }

    pub fn x_axis(self) -> Vec2 {
        Vec2::new(self.c, self.s)
    }

    pub fn y_axis(self) -> Vec2 {
        Vec2::new(-self.s, self.c)
    }

    /// Rotate a vector.
    #[inline]
    pub fn apply(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse rotate a vector.
    #[inline]
    pub fn apply_inv(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// `self * r`
    pub fn mul(self, r: Rot) -> Rot {
        Rot {
            s: self.s * r.c + self.c * r.s,
            c: self.c * r.c - self.s * r.s,
        }
    }

    /// `transpose(self) * r`
    pub fn mul_t(self, r: Rot) -> Rot {
        Rot {
            s: self.c * r.s - self.s * r.c,
            c: self.c * r.c + self.s * r.s,
        }
    }
}

/// Rigid transform: translation plus rotation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub p: Vec2,
    pub q: Rot,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    pub fn new(p: Vec2, angle: f32) -> Self {
        Self { p, q: Rot::new(angle) }
    }

    /// Map a local point to world space.
    #[inline]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.q.apply(v) + self.p
    }

    /// Map a world point into local space.
    #[inline]
    pub fn apply_inv(&self, v: Vec2) -> Vec2 {
        self.q.apply_inv(v - self.p)
    }

    /// `self * b`
    pub fn mul(&self, b: &Transform) -> Transform {
        Transform {
            q: self.q.mul(b.q),
            p: self.q.apply(b.p) + self.p,
        }
    }

    /// `inverse(self) * b`
    pub fn mul_t(&self, b: &Transform) -> Transform {
        Transform {
            q: self.q.mul_t(b.q),
            p: self.q.apply_inv(b.p - self.p),
        }
    }
}

/// Motion of a body over one time step, expressed at the center of mass.
///
/// `c0`/`a0` describe the pose at `alpha0`, `c`/`a` the pose at the end of
/// the step. Shapes are positioned relative to the body origin, so the
/// local center is needed to recover the body transform.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub local_center: Vec2,
    pub c0: Vec2,
    pub c: Vec2,
    pub a0: f32,
    pub a: f32,
    /// Fraction of the current step already consumed, in `[0, 1)`.
    pub alpha0: f32,
}

impl Sweep {
    /// Interpolated transform at `beta` in `[0, 1]`.
    pub fn get_transform(&self, beta: f32) -> Transform {
        let c = (1.0 - beta) * self.c0 + beta * self.c;
        let angle = (1.0 - beta) * self.a0 + beta * self.a;
        let q = Rot::new(angle);
        Transform {
            p: c - q.apply(self.local_center),
            q,
        }
    }

    /// Move the start of the sweep forward to `alpha`.
    pub fn advance(&mut self, alpha: f32) {
        debug_assert!(self.alpha0 < 1.0);
        let beta = (alpha - self.alpha0) / (1.0 - self.alpha0);
        self.c0 += beta * (self.c - self.c0);
        self.a0 += beta * (self.a - self.a0);
        self.alpha0 = alpha;
    }

    /// Keep the angles in `[0, 2pi)` to preserve precision over long runs.
    pub fn normalize(&mut self) {
        let two_pi = 2.0 * std::f32::consts::PI;
        let d = two_pi * (self.a0 / two_pi).floor();
        self.a0 -= d;
        self.a -= d;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rot_roundtrip() {
        let q = Rot::new(0.7);
        let v = Vec2::new(1.5, -2.0);
        let back = q.apply_inv(q.apply(v));
        assert!((back - v).length() < 1e-5);
        assert!((q.angle() - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_transform_mul_t_is_relative() {
        let a = Transform::new(Vec2::new(1.0, 2.0), 0.3);
        let b = Transform::new(Vec2::new(-4.0, 0.5), -1.1);
        let rel = a.mul_t(&b);
        let p = Vec2::new(0.25, 0.75);
        let direct = a.apply_inv(b.apply(p));
        assert!((rel.apply(p) - direct).length() < 1e-5);
    }

    #[test]
    fn test_solve22_matches_inverse() {
        let m = Mat2::from_cols(Vec2::new(4.0, 1.0), Vec2::new(2.0, 3.0));
        let b = Vec2::new(1.0, -2.0);
        let x = solve22(m, b);
        assert!((m * x - b).length() < 1e-5);
        assert!((inverse22(m) * b - x).length() < 1e-5);
    }

    #[test]
    fn test_singular_inverse_is_zero() {
        let m = Mat2::from_cols(Vec2::new(1.0, 2.0), Vec2::new(2.0, 4.0));
        assert_eq!(inverse22(m), Mat2::ZERO);
    }

    #[test]
    fn test_sweep_advance_and_transform() {
        let mut sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: Vec2::ZERO,
            c: Vec2::new(10.0, 0.0),
            a0: 0.0,
            a: 1.0,
            alpha0: 0.0,
        };
        sweep.advance(0.5);
        assert!((sweep.c0.x - 5.0).abs() < 1e-5);
        assert!((sweep.a0 - 0.5).abs() < 1e-5);
        let xf = sweep.get_transform(1.0);
        assert!((xf.p.x - 10.0).abs() < 1e-5);
    }
}
