use crate::core_modules::landmark::Point2D;

/// Unsigned interior angle at vertex `b`, in degrees, always within [0, 180].
///
/// Total over finite input. Coincident or collinear points fall out as 0 or
/// 180 with no special casing.
pub fn angle(a: Point2D, b: Point2D, c: Point2D) -> f64 {
    let radians = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let degrees = radians.to_degrees().abs();
    if degrees > 180.0 { 360.0 - degrees } else { degrees }
}
